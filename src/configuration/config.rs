//! Configuration types for loading an NPT run from YAML.
//!
//! This module defines a thin, `serde`-deserializable representation of a
//! run. A run configuration consists of:
//!
//! - [`RunConfig`]        – top-level wrapper (structure, model, device, seed)
//! - [`SimulationConfig`] – thermostat, barostat and cadence settings
//! - [`OutputConfig`]     – working directory and artifact file names
//! - [`ProviderConfig`]   – parameters of the built-in reference model
//!
//! # YAML format
//!
//! ```yaml
//! structure_file: LaH10.xyz
//! checkpoint: harmonic-eos      # model identifier for the force provider
//! device: cuda                  # falls back to cpu when unavailable
//! random_seed: 42
//!
//! simulation:
//!   ensemble: NPT_Langevin
//!   target_temperature_K: 300.0
//!   target_pressure_GPa: 150.0
//!   timestep_fs: 0.5
//!   total_steps: 20000
//!   friction_timescale_fs: 150.0
//!   barostat_timescale_fs: 1200.0
//!   bulk_modulus_GPa: 220.0
//!   pressure_control_interval: 5
//!   log_interval: 10
//!   trajectory_interval: 25
//!   restart_interval: 200
//!
//! output:
//!   workdir: outputs
//!   logfile: md.log
//!   trajectory: md_traj.xyz
//!   thermo_csv: thermo.csv
//!   restart: md_restart.bin
//!   summary: md_summary.json
//! ```
//!
//! Every key except `structure_file` has a default. Relative paths resolve
//! against the directory that holds the configuration file.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{NptError, Result};

/// Top-level run configuration loaded from YAML
#[derive(Deserialize, Debug, Clone)]
pub struct RunConfig {
    pub structure_file: PathBuf, // initial structure, extended XYZ
    #[serde(default = "default_model")]
    pub checkpoint: String, // model identifier for the force provider
    #[serde(default = "default_device")]
    pub device: String, // requested backend, "cpu" or "cuda"
    #[serde(default = "default_seed")]
    pub random_seed: u64, // seeds velocities and thermostat noise
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub resume_from: Option<PathBuf>, // restart artifact to continue from
}

/// Thermostat, barostat and cadence settings
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SimulationConfig {
    pub ensemble: String,
    #[serde(rename = "target_temperature_K")]
    pub target_temperature: f64,
    #[serde(rename = "target_pressure_GPa")]
    pub target_pressure: f64,
    pub timestep_fs: f64,
    pub total_steps: u64,
    pub friction_timescale_fs: f64, // larger -> weaker thermostat coupling
    pub barostat_timescale_fs: f64,
    #[serde(rename = "bulk_modulus_GPa")]
    pub bulk_modulus: f64, // assumed stiffness, acts as controller gain
    pub pressure_control_interval: u64,
    pub max_strain_per_step: f64, // clamp band half-width on the linear scale
    #[serde(rename = "pressure_limit_GPa")]
    pub pressure_limit: f64, // |P| beyond this is treated as a blow-up
    pub pressure_sample_interval: Option<u64>, // smoothing; None -> memoryless
    pub log_interval: u64,
    pub trajectory_interval: u64,
    pub restart_interval: u64,
    pub summary_window_fraction: f64, // trailing share of records averaged in the summary
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            ensemble: "NPT_Langevin".to_string(),
            target_temperature: 300.0,
            target_pressure: 150.0,
            timestep_fs: 0.5,
            total_steps: 20_000,
            friction_timescale_fs: 150.0,
            barostat_timescale_fs: 1200.0,
            bulk_modulus: 220.0,
            pressure_control_interval: 5,
            max_strain_per_step: 0.03,
            pressure_limit: 1.0e4,
            pressure_sample_interval: None,
            log_interval: 10,
            trajectory_interval: 25,
            restart_interval: 200,
            summary_window_fraction: 0.2,
        }
    }
}

/// Output directory and artifact names
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    pub workdir: PathBuf,
    pub logfile: PathBuf,
    pub trajectory: PathBuf,
    pub thermo_csv: PathBuf,
    pub restart: PathBuf,
    pub summary: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            workdir: "outputs".into(),
            logfile: "md.log".into(),
            trajectory: "md_traj.xyz".into(),
            thermo_csv: "thermo.csv".into(),
            restart: "md_restart.bin".into(),
            summary: "md_summary.json".into(),
        }
    }
}

/// Parameters for the `harmonic-eos` reference model
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    #[serde(rename = "spring_constant_eV_A2")]
    pub spring_constant: f64,
    #[serde(rename = "bulk_modulus_GPa")]
    pub bulk_modulus: f64,
    #[serde(rename = "reference_pressure_GPa")]
    pub reference_pressure: f64, // pressure of the input structure
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            spring_constant: 5.0,
            bulk_modulus: 250.0,
            reference_pressure: 150.0,
        }
    }
}

/// Absolute artifact paths, resolved against the configuration directory
#[derive(Debug, Clone, PartialEq)]
pub struct OutputPaths {
    pub workdir: PathBuf,
    pub logfile: PathBuf,
    pub trajectory: PathBuf,
    pub thermo_csv: PathBuf,
    pub restart: PathBuf,
    pub summary: PathBuf,
}

fn default_model() -> String {
    "harmonic-eos".to_string()
}

fn default_device() -> String {
    "cuda".to_string()
}

fn default_seed() -> u64 {
    42
}

impl RunConfig {
    /// Parse and validate a configuration file
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            NptError::config(format!("cannot open {}: {e}", path.display()))
        })?;
        let reader = BufReader::new(file);
        let cfg: RunConfig = serde_yaml::from_reader(reader)
            .map_err(|e| NptError::config(format!("{}: {e}", path.display())))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let cfg: RunConfig =
            serde_yaml::from_str(text).map_err(|e| NptError::config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Eager validation, so nothing is rejected once the loop is running
    pub fn validate(&self) -> Result<()> {
        let s = &self.simulation;
        positive("target_temperature_K", s.target_temperature, true)?;
        positive("timestep_fs", s.timestep_fs, false)?;
        positive("friction_timescale_fs", s.friction_timescale_fs, false)?;
        positive("barostat_timescale_fs", s.barostat_timescale_fs, false)?;
        positive("bulk_modulus_GPa", s.bulk_modulus, false)?;
        positive("pressure_limit_GPa", s.pressure_limit, false)?;
        if !s.target_pressure.is_finite() || s.target_pressure.abs() >= s.pressure_limit {
            return Err(NptError::config(format!(
                "target_pressure_GPa = {} must be finite and below pressure_limit_GPa",
                s.target_pressure
            )));
        }
        if !(s.max_strain_per_step > 0.0 && s.max_strain_per_step < 1.0) {
            return Err(NptError::config(format!(
                "max_strain_per_step = {} must lie in (0, 1)",
                s.max_strain_per_step
            )));
        }
        if !(s.summary_window_fraction > 0.0 && s.summary_window_fraction <= 1.0) {
            return Err(NptError::config(format!(
                "summary_window_fraction = {} must lie in (0, 1]",
                s.summary_window_fraction
            )));
        }
        for (key, value) in [
            ("pressure_control_interval", s.pressure_control_interval),
            ("log_interval", s.log_interval),
            ("trajectory_interval", s.trajectory_interval),
            ("restart_interval", s.restart_interval),
        ] {
            if value == 0 {
                return Err(NptError::config(format!("{key} must be at least 1")));
            }
        }
        match s.pressure_sample_interval {
            Some(0) => return Err(NptError::config("pressure_sample_interval must be at least 1")),
            Some(n) if n > s.pressure_control_interval => {
                return Err(NptError::config(format!(
                    "pressure_sample_interval = {n} exceeds pressure_control_interval = {}",
                    s.pressure_control_interval
                )))
            }
            _ => {}
        }
        positive("spring_constant_eV_A2", self.provider.spring_constant, true)?;
        positive("provider.bulk_modulus_GPa", self.provider.bulk_modulus, true)?;
        if self.structure_file.as_os_str().is_empty() {
            return Err(NptError::config("structure_file is required"));
        }
        Ok(())
    }

    /// Resolve the output section against `base` without touching the filesystem
    pub fn output_paths(&self, base: &Path) -> OutputPaths {
        let workdir = base.join(&self.output.workdir);
        OutputPaths {
            logfile: workdir.join(&self.output.logfile),
            trajectory: workdir.join(&self.output.trajectory),
            thermo_csv: workdir.join(&self.output.thermo_csv),
            restart: workdir.join(&self.output.restart),
            summary: workdir.join(&self.output.summary),
            workdir,
        }
    }

    pub fn structure_path(&self, base: &Path) -> PathBuf {
        base.join(&self.structure_file)
    }
}

fn positive(key: &str, value: f64, allow_zero: bool) -> Result<()> {
    let ok = value.is_finite() && (value > 0.0 || (allow_zero && value == 0.0));
    if ok {
        Ok(())
    } else {
        Err(NptError::config(format!("{key} = {value} is out of range")))
    }
}
