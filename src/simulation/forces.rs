//! Force / stress providers for the NPT driver
//!
//! A provider is a black box: given positions and cell it returns per-atom
//! forces, the potential energy and the 3x3 stress tensor. The step loop only
//! talks to the [`ForceProvider`] trait so it can run against deterministic
//! models in tests.

use nalgebra::Matrix3;

use crate::error::{NptError, Result};
use crate::simulation::engine::Device;
use crate::simulation::states::{NVec3, SimulationState};
use crate::simulation::units::gpa_to_stress;

/// Output of one provider call at a fixed configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub forces: Vec<NVec3>,     // eV/Å
    pub energy: f64,            // potential energy, eV
    pub stress: Matrix3<f64>,   // eV/Å³, tensile positive
}

impl Evaluation {
    /// Reject non-finite output before anything downstream consumes it
    pub fn check_finite(&self, step: u64) -> Result<()> {
        if !self.energy.is_finite() {
            return Err(NptError::instability(step, "potential energy", self.energy));
        }
        if let Some(bad) = self.stress.iter().find(|s| !s.is_finite()) {
            return Err(NptError::instability(step, "stress component", *bad));
        }
        for f in &self.forces {
            if let Some(bad) = f.iter().find(|c| !c.is_finite()) {
                return Err(NptError::instability(step, "force component", *bad));
            }
        }
        Ok(())
    }
}

/// Capability "given state, return forces + stress"
pub trait ForceProvider {
    fn evaluate(&mut self, state: &SimulationState) -> Result<Evaluation>;

    /// Model identifier, as used in the `checkpoint` configuration key
    fn name(&self) -> &str;

    /// Backends the model can run on
    fn supported_devices(&self) -> &[Device] {
        &[Device::Cpu]
    }
}

/// Parameters of the built-in reference model
#[derive(Debug, Clone, PartialEq)]
pub struct HarmonicEosParams {
    pub spring_constant: f64,    // eV/Å², tether to lattice site
    pub bulk_modulus: f64,       // GPa, slope of the pressure-volume line
    pub reference_pressure: f64, // GPa, pressure at the reference volume
}

/// Einstein crystal on a linear equation of state.
///
/// Each atom is tethered to its lattice site by an isotropic spring. Sites are
/// stored as fractional coordinates so they follow the cell when the barostat
/// rescales it. The stress is hydrostatic and depends on volume only:
/// `P(V) = P_ref - K (V/V_ref - 1)`.
#[derive(Debug, Clone)]
pub struct HarmonicEos {
    params: HarmonicEosParams,
    sites: Vec<NVec3>, // fractional
    reference_volume: f64,
}

impl HarmonicEos {
    pub const NAME: &'static str = "harmonic-eos";

    /// Use the current positions and cell as the lattice reference
    pub fn new(reference: &SimulationState, params: HarmonicEosParams) -> Result<Self> {
        let inv = reference
            .cell
            .transpose()
            .try_inverse()
            .ok_or_else(|| NptError::Structure("reference cell is singular".into()))?;
        let sites = reference.positions.iter().map(|r| inv * r).collect();
        Ok(Self {
            params,
            sites,
            reference_volume: reference.volume(),
        })
    }

    pub fn pressure_at(&self, volume: f64) -> f64 {
        self.params.reference_pressure
            - self.params.bulk_modulus * (volume / self.reference_volume - 1.0)
    }

    // E(V) with P = -dE/dV, in eV
    fn eos_energy(&self, volume: f64) -> f64 {
        let p_ref = gpa_to_stress(self.params.reference_pressure);
        let k = gpa_to_stress(self.params.bulk_modulus);
        -(p_ref + k) * volume + 0.5 * k * volume * volume / self.reference_volume
    }
}

impl ForceProvider for HarmonicEos {
    fn evaluate(&mut self, state: &SimulationState) -> Result<Evaluation> {
        if state.n_atoms() != self.sites.len() {
            return Err(NptError::Structure(format!(
                "provider built for {} atoms, state has {}",
                self.sites.len(),
                state.n_atoms()
            )));
        }
        let to_cartesian = state.cell.transpose();
        let k = self.params.spring_constant;

        let mut energy = 0.0;
        let forces = state
            .positions
            .iter()
            .zip(&self.sites)
            .map(|(r, site)| {
                let d = r - to_cartesian * site;
                energy += 0.5 * k * d.norm_squared();
                -k * d
            })
            .collect();

        let volume = state.volume();
        energy += self.eos_energy(volume);
        let stress = Matrix3::from_diagonal_element(-gpa_to_stress(self.pressure_at(volume)));

        Ok(Evaluation {
            forces,
            energy,
            stress,
        })
    }

    fn name(&self) -> &str {
        Self::NAME
    }
}

/// Model identifiers accepted by [`build_provider`]
pub const KNOWN_MODELS: &[&str] = &[HarmonicEos::NAME];

/// Instantiate the provider named by the configuration's `checkpoint` key
pub fn build_provider(
    model: &str,
    reference: &SimulationState,
    params: HarmonicEosParams,
) -> Result<Box<dyn ForceProvider>> {
    match model {
        HarmonicEos::NAME => Ok(Box::new(HarmonicEos::new(reference, params)?)),
        other => Err(NptError::config(format!(
            "unknown model `{other}`, expected one of {KNOWN_MODELS:?}"
        ))),
    }
}
