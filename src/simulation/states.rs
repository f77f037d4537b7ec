//! Core state types for the NPT run.
//!
//! - `SimulationState` holds everything the integrator and barostat mutate
//!   (positions, momenta, cell, step counter)
//! - `Atoms` holds the per-atom data that never changes during a run
//!
//! Cell rows are the lattice vectors, positions are absolute Cartesian.

use nalgebra::{Matrix3, Vector3};

use crate::error::{NptError, Result};
use crate::simulation::units::{stress_to_gpa, AMU_A2_PER_FS2_TO_EV, K_B};

pub type NVec3 = Vector3<f64>;
pub type Cell = Matrix3<f64>;

/// Immutable per-atom properties read from the structure file
#[derive(Debug, Clone, PartialEq)]
pub struct Atoms {
    pub symbols: Vec<String>, // chemical symbol per atom
    pub masses: Vec<f64>,     // amu
}

impl Atoms {
    pub fn len(&self) -> usize {
        self.masses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masses.is_empty()
    }

    /// Degrees of freedom used for the equipartition temperature
    pub fn degrees_of_freedom(&self) -> usize {
        3 * self.len()
    }
}

/// Mutable trajectory state, advanced in place by the integrator and the barostat
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationState {
    pub positions: Vec<NVec3>, // Å
    pub momenta: Vec<NVec3>,   // amu·Å/fs
    pub cell: Cell,            // rows are lattice vectors, Å
    pub step: u64,             // completed steps
}

impl SimulationState {
    /// Build a state at step 0 with zero momenta, checking the shape invariants
    pub fn new(positions: Vec<NVec3>, cell: Cell) -> Result<Self> {
        let momenta = vec![NVec3::zeros(); positions.len()];
        let state = Self {
            positions,
            momenta,
            cell,
            step: 0,
        };
        state.validate().map_err(NptError::Structure)?;
        Ok(state)
    }

    pub fn n_atoms(&self) -> usize {
        self.positions.len()
    }

    /// Cell volume in Å³ (determinant of the row-vector cell)
    pub fn volume(&self) -> f64 {
        self.cell.determinant()
    }

    /// Check `len(positions) == len(momenta)`, a positive finite volume and
    /// finite coordinates. Returns a description of the first violation.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.positions.len() != self.momenta.len() {
            return Err(format!(
                "{} positions but {} momenta",
                self.positions.len(),
                self.momenta.len()
            ));
        }
        let volume = self.volume();
        if !volume.is_finite() || volume <= 0.0 {
            return Err(format!("cell determinant {volume} is not positive"));
        }
        let finite = |v: &NVec3| v.iter().all(|c| c.is_finite());
        if !self.positions.iter().all(finite) || !self.momenta.iter().all(finite) {
            return Err("non-finite coordinate or momentum".to_string());
        }
        Ok(())
    }

    /// Total kinetic energy in eV
    pub fn kinetic_energy(&self, atoms: &Atoms) -> f64 {
        let ke: f64 = self
            .momenta
            .iter()
            .zip(&atoms.masses)
            .map(|(p, &m)| 0.5 * p.norm_squared() / m)
            .sum();
        ke * AMU_A2_PER_FS2_TO_EV
    }

    /// Instantaneous temperature from equipartition over 3N degrees of freedom
    pub fn temperature(&self, atoms: &Atoms) -> f64 {
        let dof = atoms.degrees_of_freedom();
        if dof == 0 {
            return 0.0;
        }
        2.0 * self.kinetic_energy(atoms) / (dof as f64 * K_B)
    }

    /// Simulated time in fs for a fixed timestep
    pub fn time_fs(&self, timestep_fs: f64) -> f64 {
        self.step as f64 * timestep_fs
    }

    /// Fractional coordinates of atom `i` in the current cell
    pub fn fractional(&self, i: usize) -> Option<NVec3> {
        let inv = self.cell.transpose().try_inverse()?;
        Some(inv * self.positions[i])
    }
}

/// Scalar pressure in GPa from a stress tensor in eV/Å³.
///
/// Stress is tensile-positive, so a compressed solid has a negative trace and
/// a positive pressure: `P = -tr(σ)/3`.
pub fn pressure_from_stress(stress: &Matrix3<f64>) -> f64 {
    stress_to_gpa(-stress.trace() / 3.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn cubic(a: f64) -> Cell {
        Cell::from_diagonal_element(a)
    }

    #[test]
    fn volume_of_cubic_cell() {
        let state = SimulationState::new(vec![NVec3::zeros()], cubic(3.0)).unwrap();
        assert_relative_eq!(state.volume(), 27.0);
    }

    #[test]
    fn singular_cell_is_rejected() {
        let mut cell = cubic(3.0);
        cell[(2, 2)] = 0.0;
        assert!(SimulationState::new(vec![NVec3::zeros()], cell).is_err());
    }

    #[test]
    fn temperature_follows_equipartition() {
        let atoms = Atoms {
            symbols: vec!["H".into(); 2],
            masses: vec![1.0, 1.0],
        };
        let mut state = SimulationState::new(vec![NVec3::zeros(); 2], cubic(5.0)).unwrap();
        // 0.5 eV of kinetic energy per atom along x
        let p = (2.0 * 0.5 / AMU_A2_PER_FS2_TO_EV).sqrt();
        state.momenta = vec![NVec3::new(p, 0.0, 0.0); 2];

        assert_relative_eq!(state.kinetic_energy(&atoms), 1.0, epsilon = 1e-12);
        assert_relative_eq!(state.temperature(&atoms), 2.0 / (6.0 * K_B), epsilon = 1e-9);
    }

    #[test]
    fn compressive_stress_is_positive_pressure() {
        let stress = Matrix3::from_diagonal_element(-0.01);
        assert_relative_eq!(pressure_from_stress(&stress), 0.01 * crate::simulation::units::EV_PER_A3_TO_GPA);
    }

    #[test]
    fn fractional_coordinates() {
        let state =
            SimulationState::new(vec![NVec3::new(1.5, 3.0, 0.75)], Cell::from_diagonal(&NVec3::new(3.0, 6.0, 3.0)))
                .unwrap();
        let frac = state.fractional(0).unwrap();
        assert_relative_eq!(frac, NVec3::new(0.5, 0.5, 0.25), epsilon = 1e-12);
    }
}
