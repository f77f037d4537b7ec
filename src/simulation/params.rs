//! Numerical and physical parameters for the run
//!
//! `Parameters` holds the validated runtime settings:
//! - thermostat targets and coupling,
//! - barostat gain, clamp band and sanity limit,
//! - cadences for telemetry, trajectory and restart artifacts,
//! - the random seed

use crate::configuration::config::SimulationConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct Parameters {
    pub target_temperature: f64, // K
    pub target_pressure: f64, // GPa
    pub timestep: f64, // fs
    pub total_steps: u64,
    pub friction_timescale: f64, // fs
    pub barostat_interval: u64, // steps between corrections
    pub barostat_timescale: f64, // fs
    pub bulk_modulus: f64, // GPa
    pub max_strain: f64, // half-width of the scale clamp band
    pub pressure_limit: f64, // GPa
    pub sample_interval: u64, // steps between pressure samples
    pub log_interval: u64,
    pub trajectory_interval: u64,
    pub restart_interval: u64,
    pub summary_window_fraction: f64,
    pub seed: u64, // deterministic seed
}

impl Parameters {
    pub fn from_config(cfg: &SimulationConfig, seed: u64) -> Self {
        Self {
            target_temperature: cfg.target_temperature,
            target_pressure: cfg.target_pressure,
            timestep: cfg.timestep_fs,
            total_steps: cfg.total_steps,
            friction_timescale: cfg.friction_timescale_fs,
            barostat_interval: cfg.pressure_control_interval,
            barostat_timescale: cfg.barostat_timescale_fs,
            bulk_modulus: cfg.bulk_modulus,
            max_strain: cfg.max_strain_per_step,
            pressure_limit: cfg.pressure_limit,
            sample_interval: cfg
                .pressure_sample_interval
                .unwrap_or(cfg.pressure_control_interval),
            log_interval: cfg.log_interval,
            trajectory_interval: cfg.trajectory_interval,
            restart_interval: cfg.restart_interval,
            summary_window_fraction: cfg.summary_window_fraction,
            seed,
        }
    }

    /// Langevin friction coefficient, 1/fs
    pub fn friction(&self) -> f64 {
        1.0 / self.friction_timescale
    }

    /// Time between barostat corrections, fs
    pub fn correction_period(&self) -> f64 {
        self.barostat_interval as f64 * self.timestep
    }

    /// Pressure error (GPa) that maps to a unit change of the linear scale
    pub fn barostat_gain(&self) -> f64 {
        self.bulk_modulus * self.barostat_timescale / self.correction_period()
    }
}

impl Default for Parameters {
    fn default() -> Self {
        Self::from_config(&SimulationConfig::default(), 42)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gain_uses_correction_period() {
        let params = Parameters {
            bulk_modulus: 300.0,
            barostat_timescale: 100.0,
            timestep: 0.5,
            barostat_interval: 20,
            ..Parameters::default()
        };
        assert_eq!(params.correction_period(), 10.0);
        assert_eq!(params.barostat_gain(), 3000.0);
    }

    #[test]
    fn sample_interval_defaults_to_control_interval() {
        let params = Parameters::default();
        assert_eq!(params.sample_interval, params.barostat_interval);
    }
}
