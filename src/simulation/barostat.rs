//! Isotropic barostat built from periodic cell rescaling
//!
//! The controller is a discrete-time proportional loop on the pressure error.
//! Every `barostat_interval` steps it reduces the stress tensor to a scalar
//! pressure, turns the error against the target into a linear scale factor,
//! clamps it to a band and rescales cell and Cartesian positions together
//! (fractional coordinates stay fixed).
//!
//! The scale math lives in [`scale_factor`], a pure function of the sampled
//! pressure and the parameters. [`Barostat`] adds sampling, validation and
//! the state mutation around it.

use std::collections::VecDeque;

use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};

use crate::error::{NptError, Result};
use crate::simulation::params::Parameters;
use crate::simulation::states::{pressure_from_stress, SimulationState};

/// Number of recent corrections kept for the run summary
pub const RECENT_CORRECTIONS: usize = 10;

/// Result of the proportional rule before and after clamping
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleDecision {
    pub error: f64, // P - P_target, GPa
    pub raw: f64, // unclamped linear scale
    pub scale: f64, // clamped linear scale
}

impl ScaleDecision {
    pub fn clamped(&self) -> bool {
        self.raw != self.scale
    }
}

/// Linear scale factor for a finite pressure sample.
///
/// `scale = 1 + (P - P_target) / gain` with `gain = B τ_p / Δt`, so an
/// over-pressurized cell expands and an under-pressurized one contracts. The
/// result is clamped to `[1 - max_strain, 1 + max_strain]`.
pub fn scale_factor(pressure: f64, params: &Parameters) -> ScaleDecision {
    let error = pressure - params.target_pressure;
    let raw = 1.0 + error / params.barostat_gain();
    let scale = raw.clamp(1.0 - params.max_strain, 1.0 + params.max_strain);
    ScaleDecision { error, raw, scale }
}

/// One applied correction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    pub step: u64,
    #[serde(rename = "pressure_GPa")]
    pub pressure: f64, // pressure the decision was based on
    pub scale: f64,
}

/// Controller memory; persisted in restart artifacts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerInternal {
    pub last_scale: f64,
    pub last_pressure: Option<f64>,
    pub pending_sum: f64, // samples since the last correction
    pub pending_count: u32,
    pub corrections: u64,
    pub pressure_sum: f64, // over all corrections
    pub pressure_sum_sq: f64,
    pub recent: VecDeque<Correction>,
}

impl Default for ControllerInternal {
    fn default() -> Self {
        Self {
            last_scale: 1.0,
            last_pressure: None,
            pending_sum: 0.0,
            pending_count: 0,
            corrections: 0,
            pressure_sum: 0.0,
            pressure_sum_sq: 0.0,
            recent: VecDeque::with_capacity(RECENT_CORRECTIONS),
        }
    }
}

impl ControllerInternal {
    /// Mean and population standard deviation of the corrected pressures
    pub fn pressure_stats(&self) -> Option<(f64, f64)> {
        if self.corrections == 0 {
            return None;
        }
        let n = self.corrections as f64;
        let mean = self.pressure_sum / n;
        let var = (self.pressure_sum_sq / n - mean * mean).max(0.0);
        Some((mean, var.sqrt()))
    }

    fn push(&mut self, correction: Correction) {
        self.corrections += 1;
        self.pressure_sum += correction.pressure;
        self.pressure_sum_sq += correction.pressure * correction.pressure;
        if self.recent.len() == RECENT_CORRECTIONS {
            self.recent.pop_front();
        }
        self.recent.push_back(correction);
        self.last_scale = correction.scale;
    }
}

#[derive(Debug, Clone)]
pub struct Barostat {
    params: Parameters,
    internal: ControllerInternal,
}

impl Barostat {
    pub fn new(params: &Parameters) -> Self {
        Self {
            params: params.clone(),
            internal: ControllerInternal::default(),
        }
    }

    pub fn internal(&self) -> &ControllerInternal {
        &self.internal
    }

    pub fn restore(&mut self, internal: ControllerInternal) {
        self.internal = internal;
    }

    /// Corrections happen on multiples of the interval; step 0 is skipped
    pub fn is_correction_step(&self, step: u64) -> bool {
        step > 0 && step % self.params.barostat_interval == 0
    }

    /// Steps where a smoothing sample is taken without correcting
    pub fn is_sample_step(&self, step: u64) -> bool {
        step > 0 && step % self.params.sample_interval == 0 && !self.is_correction_step(step)
    }

    /// Reduce and validate a stress sample, then add it to the pending mean
    pub fn sample(&mut self, step: u64, stress: &Matrix3<f64>) -> Result<f64> {
        let pressure = self.checked_pressure(step, stress)?;
        self.internal.pending_sum += pressure;
        self.internal.pending_count += 1;
        self.internal.last_pressure = Some(pressure);
        Ok(pressure)
    }

    /// Sample, decide and rescale `state` in place.
    ///
    /// On error the state is untouched and the pending samples are kept.
    pub fn correct(&mut self, state: &mut SimulationState, stress: &Matrix3<f64>) -> Result<Correction> {
        let step = state.step;
        let current = self.checked_pressure(step, stress)?;
        let count = self.internal.pending_count + 1;
        let pressure = (self.internal.pending_sum + current) / count as f64;

        let decision = scale_factor(pressure, &self.params);
        if !decision.raw.is_finite() {
            return Err(NptError::instability(step, "barostat scale", decision.raw));
        }
        if decision.clamped() {
            log::debug!(
                "step {step}: scale {:.5} clamped to {:.5} (ΔP = {:.2} GPa)",
                decision.raw,
                decision.scale,
                decision.error
            );
        }
        apply_scale(state, decision.scale)?;

        let correction = Correction {
            step,
            pressure,
            scale: decision.scale,
        };
        self.internal.pending_sum = 0.0;
        self.internal.pending_count = 0;
        self.internal.last_pressure = Some(current);
        self.internal.push(correction);
        Ok(correction)
    }

    fn checked_pressure(&self, step: u64, stress: &Matrix3<f64>) -> Result<f64> {
        if let Some(bad) = stress.iter().find(|s| !s.is_finite()) {
            return Err(NptError::instability(step, "stress component", *bad));
        }
        let pressure = pressure_from_stress(stress);
        if !pressure.is_finite() || pressure.abs() > self.params.pressure_limit {
            return Err(NptError::instability(step, "pressure (GPa)", pressure));
        }
        Ok(pressure)
    }
}

/// Scale cell vectors and absolute positions by the same factor.
///
/// The new cell is checked before anything is written back.
pub fn apply_scale(state: &mut SimulationState, scale: f64) -> Result<()> {
    let cell = state.cell * scale;
    let volume = cell.determinant();
    if !volume.is_finite() || volume <= 0.0 {
        return Err(NptError::instability(state.step, "rescaled volume", volume));
    }
    state.cell = cell;
    for r in state.positions.iter_mut() {
        *r *= scale;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::states::{Cell, NVec3};
    use crate::simulation::units::gpa_to_stress;
    use approx::assert_relative_eq;

    fn params() -> Parameters {
        Parameters {
            target_pressure: 150.0,
            bulk_modulus: 300.0,
            barostat_timescale: 100.0,
            timestep: 0.5,
            barostat_interval: 20,
            sample_interval: 20,
            max_strain: 0.03,
            pressure_limit: 1.0e4,
            ..Parameters::default()
        }
    }

    fn hydrostatic(pressure_gpa: f64) -> Matrix3<f64> {
        Matrix3::from_diagonal_element(-gpa_to_stress(pressure_gpa))
    }

    fn state() -> SimulationState {
        let mut state = SimulationState::new(
            vec![NVec3::new(1.0, 2.0, 3.0), NVec3::new(2.0, 0.5, 0.25)],
            Cell::new(4.0, 0.0, 0.0, 1.0, 4.0, 0.0, 0.0, 0.0, 4.0),
        )
        .unwrap();
        state.step = 20;
        state
    }

    #[test]
    fn over_pressure_expands() {
        let d = scale_factor(200.0, &params());
        assert_relative_eq!(d.error, 50.0);
        assert_relative_eq!(d.scale, 1.0 + 50.0 / 3000.0);
        assert!(!d.clamped());
    }

    #[test]
    fn under_pressure_contracts() {
        let d = scale_factor(120.0, &params());
        assert!(d.scale < 1.0);
    }

    #[test]
    fn on_target_is_identity() {
        assert_eq!(scale_factor(150.0, &params()).scale, 1.0);
    }

    #[test]
    fn extreme_error_is_clamped_to_band() {
        let p = params();
        for pressure in [5.0e3, -5.0e3, 9.9e3, -9.9e3] {
            let d = scale_factor(pressure, &p);
            assert!(d.clamped(), "pressure {pressure}");
            assert!(d.scale >= 0.97 && d.scale <= 1.03, "scale {}", d.scale);
        }
    }

    #[test]
    fn rescaling_keeps_fractional_coordinates() {
        let mut s = state();
        let before: Vec<_> = (0..2).map(|i| s.fractional(i).unwrap()).collect();
        let v0 = s.volume();
        apply_scale(&mut s, 1.02).unwrap();
        for (i, f) in before.iter().enumerate() {
            assert_relative_eq!(s.fractional(i).unwrap(), *f, epsilon = 1e-12);
        }
        assert_relative_eq!(s.volume(), v0 * 1.02f64.powi(3), epsilon = 1e-9);
    }

    #[test]
    fn correction_mutates_cell_and_history() {
        let mut baro = Barostat::new(&params());
        let mut s = state();
        let v0 = s.volume();
        let c = baro.correct(&mut s, &hydrostatic(200.0)).unwrap();
        assert_eq!(c.step, 20);
        assert_relative_eq!(c.pressure, 200.0, epsilon = 1e-9);
        assert!(s.volume() > v0);
        assert_eq!(baro.internal().corrections, 1);
        assert_eq!(baro.internal().last_scale, c.scale);
    }

    #[test]
    fn non_finite_stress_leaves_state_untouched() {
        let mut baro = Barostat::new(&params());
        let mut s = state();
        let before = s.clone();
        let err = baro.correct(&mut s, &Matrix3::from_diagonal_element(f64::INFINITY)).unwrap_err();
        assert!(matches!(err, NptError::NumericalInstability { step: 20, .. }));
        assert_eq!(s, before);
    }

    #[test]
    fn huge_stress_is_an_instability() {
        let mut baro = Barostat::new(&params());
        let mut s = state();
        let before = s.clone();
        let err = baro.correct(&mut s, &hydrostatic(1.0e9)).unwrap_err();
        assert!(matches!(err, NptError::NumericalInstability { .. }));
        assert_eq!(s, before);
        assert!(s.volume() > 0.0);
    }

    #[test]
    fn smoothing_averages_pending_samples() {
        let mut p = params();
        p.sample_interval = 5;
        let mut baro = Barostat::new(&p);
        assert!(baro.is_sample_step(5));
        assert!(!baro.is_sample_step(20));
        assert!(baro.is_correction_step(20));

        baro.sample(5, &hydrostatic(160.0)).unwrap();
        baro.sample(10, &hydrostatic(170.0)).unwrap();
        baro.sample(15, &hydrostatic(180.0)).unwrap();
        let mut s = state();
        let c = baro.correct(&mut s, &hydrostatic(190.0)).unwrap();
        assert_relative_eq!(c.pressure, 175.0, epsilon = 1e-9);
        assert_eq!(baro.internal().pending_count, 0);
    }

    #[test]
    fn step_zero_is_not_corrected() {
        let baro = Barostat::new(&params());
        assert!(!baro.is_correction_step(0));
        assert!(!baro.is_sample_step(0));
    }

    #[test]
    fn summary_stats_over_corrections() {
        let mut baro = Barostat::new(&params());
        let mut s = state();
        for p in [140.0, 160.0] {
            baro.correct(&mut s, &hydrostatic(p)).unwrap();
        }
        let (mean, std) = baro.internal().pressure_stats().unwrap();
        assert_relative_eq!(mean, 150.0, epsilon = 1e-9);
        assert_relative_eq!(std, 10.0, epsilon = 1e-6);
    }

    #[test]
    fn recent_history_is_bounded() {
        let mut baro = Barostat::new(&params());
        let mut s = state();
        for _ in 0..(RECENT_CORRECTIONS + 5) {
            baro.correct(&mut s, &hydrostatic(150.0)).unwrap();
        }
        assert_eq!(baro.internal().recent.len(), RECENT_CORRECTIONS);
        assert_eq!(baro.internal().corrections, (RECENT_CORRECTIONS + 5) as u64);
    }
}
