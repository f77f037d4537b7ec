//! Unit conventions used throughout the crate
//!
//! Lengths are Å, energies eV, masses amu, time fs, temperature K.
//! Momenta are amu·Å/fs, stresses are eV/Å³ internally and GPa at the edges.

/// 1 eV/Å³ expressed in GPa
pub const EV_PER_A3_TO_GPA: f64 = 160.217_662_08;

/// Boltzmann constant in eV/K
pub const K_B: f64 = 8.617_333_262e-5;

/// 1 amu·Å²/fs² expressed in eV
pub const AMU_A2_PER_FS2_TO_EV: f64 = 103.642_696_53;

pub fn stress_to_gpa(stress_ev_a3: f64) -> f64 {
    stress_ev_a3 * EV_PER_A3_TO_GPA
}

pub fn gpa_to_stress(pressure_gpa: f64) -> f64 {
    pressure_gpa / EV_PER_A3_TO_GPA
}
