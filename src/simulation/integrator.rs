//! Thermostatted time integrators
//!
//! Provides the [`Integrator`] seam and a Langevin leapfrog driven by forces
//! from a `ForceProvider`. The integrator's random stream is seeded and can be
//! exported into a restart artifact, so a resumed run draws the same noise as
//! an uninterrupted one.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;

use crate::error::{NptError, Result};
use crate::simulation::params::Parameters;
use crate::simulation::states::{Atoms, NVec3, SimulationState};
use crate::simulation::units::{AMU_A2_PER_FS2_TO_EV, K_B};

/// Capability "given state + forces, return next state"
pub trait Integrator {
    /// Advance positions and momenta by one timestep and bump `state.step`
    fn advance(&mut self, state: &mut SimulationState, atoms: &Atoms, forces: &[NVec3]);

    /// Opaque internal state (random stream) for checkpointing
    fn export_state(&self) -> Result<Vec<u8>>;

    fn restore_state(&mut self, bytes: &[u8]) -> Result<()>;
}

/// Langevin leapfrog: kick, Ornstein-Uhlenbeck friction + noise, drift.
///
/// With `c1 = exp(-γ dt)` the momentum update is
/// `p <- c1 (p + F dt) + sqrt((1 - c1²) m kT) ξ`, then `x <- x + p/m dt`.
#[derive(Debug, Clone)]
pub struct LangevinIntegrator {
    dt: f64, // fs
    temperature: f64, // K
    friction: f64, // 1/fs
    rng: ChaCha8Rng,
}

impl LangevinIntegrator {
    pub fn new(params: &Parameters) -> Self {
        Self {
            dt: params.timestep,
            temperature: params.target_temperature,
            friction: params.friction(),
            rng: ChaCha8Rng::seed_from_u64(params.seed),
        }
    }

    fn gaussian(&mut self) -> NVec3 {
        NVec3::new(
            self.rng.sample(StandardNormal),
            self.rng.sample(StandardNormal),
            self.rng.sample(StandardNormal),
        )
    }

    /// Draw Maxwell-Boltzmann momenta at `temperature`, remove the
    /// centre-of-mass momentum, then rescale to hit `temperature` exactly
    pub fn thermalize(&mut self, state: &mut SimulationState, atoms: &Atoms, temperature: f64) {
        let n = state.n_atoms();
        if n == 0 {
            return;
        }
        let kt = K_B * temperature / AMU_A2_PER_FS2_TO_EV;
        for (p, &m) in state.momenta.iter_mut().zip(&atoms.masses) {
            let sigma = (m * kt).sqrt();
            *p = sigma * self.gaussian();
        }

        // Remove centre-of-mass motion
        let total = state.momenta.iter().copied().sum::<NVec3>();
        let total_mass: f64 = atoms.masses.iter().sum();
        for (p, &m) in state.momenta.iter_mut().zip(&atoms.masses) {
            *p -= total * (m / total_mass);
        }

        let current = state.temperature(atoms);
        if current > 0.0 && temperature > 0.0 {
            let factor = (temperature / current).sqrt();
            for p in state.momenta.iter_mut() {
                *p *= factor;
            }
        }
    }
}

impl Integrator for LangevinIntegrator {
    fn advance(&mut self, state: &mut SimulationState, atoms: &Atoms, forces: &[NVec3]) {
        let n = state.n_atoms();
        if n == 0 { // no atoms, only the clock moves
            state.step += 1;
            return;
        }

        let dt = self.dt;
        let c1 = (-self.friction * dt).exp();
        let c2 = (1.0 - c1 * c1).sqrt();
        let kt = K_B * self.temperature / AMU_A2_PER_FS2_TO_EV; // amu·Å²/fs²

        for i in 0..n {
            let m = atoms.masses[i];

            // Kick: forces are eV/Å, convert to amu·Å/fs²
            let mut p = state.momenta[i] + forces[i] * (dt / AMU_A2_PER_FS2_TO_EV);

            // Friction and thermal noise
            let noise = self.gaussian();
            p = c1 * p + (c2 * (m * kt).sqrt()) * noise;

            // Drift
            state.positions[i] += p * (dt / m);
            state.momenta[i] = p;
        }

        state.step += 1;
    }

    fn export_state(&self) -> Result<Vec<u8>> {
        bincode::serialize(&self.rng).map_err(|e| NptError::Serialization(e.to_string()))
    }

    fn restore_state(&mut self, bytes: &[u8]) -> Result<()> {
        self.rng = bincode::deserialize(bytes)
            .map_err(|e| NptError::corrupt(format!("integrator stream: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::states::Cell;
    use approx::assert_relative_eq;

    fn gas(n: usize) -> (SimulationState, Atoms) {
        let positions = (0..n).map(|i| NVec3::new(i as f64, 0.0, 0.0)).collect();
        let state = SimulationState::new(positions, Cell::from_diagonal_element(50.0)).unwrap();
        let atoms = Atoms {
            symbols: vec!["Ar".into(); n],
            masses: vec![39.948; n],
        };
        (state, atoms)
    }

    #[test]
    fn step_counter_advances_by_one() {
        let (mut state, atoms) = gas(4);
        let mut integrator = LangevinIntegrator::new(&Parameters::default());
        let forces = vec![NVec3::zeros(); 4];
        for expected in 1..=10 {
            integrator.advance(&mut state, &atoms, &forces);
            assert_eq!(state.step, expected);
        }
    }

    #[test]
    fn thermalize_hits_target_without_drift() {
        let (mut state, atoms) = gas(64);
        let mut integrator = LangevinIntegrator::new(&Parameters::default());
        integrator.thermalize(&mut state, &atoms, 300.0);

        assert_relative_eq!(state.temperature(&atoms), 300.0, epsilon = 1e-9);
        let total = state.momenta.iter().copied().sum::<NVec3>();
        assert!(total.norm() < 1e-10, "centre of mass drifts: {total:?}");
    }

    #[test]
    fn thermostat_relaxes_toward_target() {
        let (mut state, atoms) = gas(200);
        let params = Parameters {
            friction_timescale: 20.0,
            target_temperature: 500.0,
            ..Parameters::default()
        };
        let mut integrator = LangevinIntegrator::new(&params);
        let forces = vec![NVec3::zeros(); 200];

        // Starts at 0 K
        let mut acc = 0.0;
        for step in 0..2000 {
            integrator.advance(&mut state, &atoms, &forces);
            if step >= 1000 {
                acc += state.temperature(&atoms);
            }
        }
        let mean = acc / 1000.0;
        assert!((mean - 500.0).abs() < 50.0, "mean temperature {mean}");
    }

    #[test]
    fn same_seed_same_trajectory() {
        let params = Parameters::default();
        let (mut a, atoms) = gas(8);
        let mut b = a.clone();
        let forces = vec![NVec3::new(0.01, 0.0, 0.0); 8];

        let mut ia = LangevinIntegrator::new(&params);
        let mut ib = LangevinIntegrator::new(&params);
        for _ in 0..50 {
            ia.advance(&mut a, &atoms, &forces);
            ib.advance(&mut b, &atoms, &forces);
        }
        assert_eq!(a, b);
    }

    #[test]
    fn exported_stream_resumes_identically() {
        let params = Parameters::default();
        let (mut a, atoms) = gas(3);
        let forces = vec![NVec3::zeros(); 3];
        let mut ia = LangevinIntegrator::new(&params);
        for _ in 0..10 {
            ia.advance(&mut a, &atoms, &forces);
        }
        let saved = ia.export_state().unwrap();
        let mut b = a.clone();

        let mut ib = LangevinIntegrator::new(&Parameters { seed: 7, ..params });
        ib.restore_state(&saved).unwrap();
        for _ in 0..10 {
            ia.advance(&mut a, &atoms, &forces);
            ib.advance(&mut b, &atoms, &forces);
        }
        assert_eq!(a, b);
    }

    #[test]
    fn garbage_stream_is_corrupt() {
        let mut integrator = LangevinIntegrator::new(&Parameters::default());
        assert!(matches!(
            integrator.restore_state(&[1, 2, 3]),
            Err(NptError::CorruptArtifact(_))
        ));
    }
}
