//! Build fully-initialized runs from configuration
//!
//! Takes a `RunConfig` (YAML-facing) and produces a runtime bundle
//! (`Scenario`) containing:
//! - engine settings (`Engine`): model and resolved device
//! - numerical parameters (`Parameters`)
//! - the structure (`Atoms`) and its step-0 state (`SimulationState`)
//! - the force provider
//! - resolved output paths
//!
//! [`Scenario::into_simulation`] then opens the output files and either
//! thermalizes the fresh state or restores a restart artifact.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::checkpoint::restart::CheckpointManager;
use crate::configuration::config::{OutputPaths, RunConfig};
use crate::error::{NptError, Result};
use crate::io::structure::read_extxyz;
use crate::simulation::driver::Simulation;
use crate::simulation::engine::{detect_devices, Device, Engine};
use crate::simulation::forces::{build_provider, ForceProvider, HarmonicEosParams};
use crate::simulation::integrator::LangevinIntegrator;
use crate::simulation::params::Parameters;
use crate::simulation::states::{Atoms, SimulationState};
use crate::telemetry::recorder::{discard_rows_after, Recorder};
use crate::telemetry::summary::RunMetadata;
use crate::telemetry::trajectory::{discard_frames_after, TrajectoryWriter};

/// The main "runtime bundle" constructed from a [`RunConfig`]
pub struct Scenario {
    pub engine: Engine,
    pub parameters: Parameters,
    pub atoms: Atoms,
    pub state: SimulationState,
    pub provider: Box<dyn ForceProvider>,
    pub paths: OutputPaths,
    pub metadata: RunMetadata,
    pub resume_from: Option<PathBuf>,
}

impl Scenario {
    /// Relative paths in `cfg` resolve against `base_dir`
    pub fn build_scenario(cfg: RunConfig, base_dir: &Path) -> Result<Self> {
        cfg.validate()?;

        let structure_path = cfg.structure_path(base_dir);
        let file = File::open(&structure_path).map_err(|e| {
            NptError::Structure(format!("cannot open {}: {e}", structure_path.display()))
        })?;
        let (atoms, state) = read_extxyz(BufReader::new(file))?;
        if atoms.is_empty() {
            return Err(NptError::Structure(format!("{} holds no atoms", structure_path.display())));
        }

        let parameters = Parameters::from_config(&cfg.simulation, cfg.random_seed);

        let provider = build_provider(
            &cfg.checkpoint,
            &state,
            HarmonicEosParams {
                spring_constant: cfg.provider.spring_constant,
                bulk_modulus: cfg.provider.bulk_modulus,
                reference_pressure: cfg.provider.reference_pressure,
            },
        )?;

        let requested: Device = cfg.device.parse()?;
        let engine = Engine::select(
            provider.name(),
            requested,
            &detect_devices(),
            provider.supported_devices(),
        );

        let paths = cfg.output_paths(base_dir);
        let metadata = RunMetadata {
            structure: cfg.structure_file.display().to_string(),
            ensemble: cfg.simulation.ensemble.clone(),
            device: engine.device.to_string(),
            workdir: paths.workdir.clone(),
        };
        log::info!(
            "loaded {} atoms from {}, model `{}` on {}",
            atoms.len(),
            structure_path.display(),
            engine.model,
            engine.device
        );

        Ok(Self {
            engine,
            parameters,
            atoms,
            state,
            provider,
            paths,
            metadata,
            resume_from: cfg.resume_from.map(|p| base_dir.join(p)),
        })
    }

    /// Open the outputs and assemble the step loop.
    ///
    /// A fresh run draws Maxwell-Boltzmann momenta at the target temperature.
    /// A resumed run restores state, controller memory and the random stream
    /// from the artifact, drops output rows written after the artifact's step
    /// and appends to what is left.
    pub fn into_simulation(self) -> Result<Simulation> {
        fs::create_dir_all(&self.paths.workdir).map_err(|e| NptError::io("output directory", e))?;

        let snapshot = match &self.resume_from {
            Some(path) => Some(CheckpointManager::load(path, Some(self.atoms.len()))?),
            None => None,
        };
        let append = snapshot.is_some();

        let mut state = self.state;
        let mut integrator = LangevinIntegrator::new(&self.parameters);
        match &snapshot {
            Some(snapshot) => discard_outputs_after(&self.paths, snapshot.state.step)?,
            None => integrator.thermalize(&mut state, &self.atoms, self.parameters.target_temperature),
        }

        let recorder = Recorder::open(&self.paths.logfile, &self.paths.thermo_csv, append)?
            .with_window_fraction(self.parameters.summary_window_fraction);
        let trajectory = TrajectoryWriter::open(&self.paths.trajectory, append)?;

        let mut simulation = Simulation::new(
            self.atoms,
            state,
            self.parameters,
            self.provider,
            Box::new(integrator),
        )?
        .with_recorder(recorder)
        .with_trajectory(trajectory)
        .with_checkpoints(CheckpointManager::new(&self.paths.restart))
        .with_summary(self.paths.summary.clone(), self.metadata);

        if let Some(snapshot) = snapshot {
            simulation.resume_from(snapshot)?;
        }
        Ok(simulation)
    }
}

/// Trim log, table and trajectory back to `step`
fn discard_outputs_after(paths: &OutputPaths, step: u64) -> Result<()> {
    let log_rows = discard_rows_after(&paths.logfile, step)?;
    let table_rows = discard_rows_after(&paths.thermo_csv, step)?;
    let frames = discard_frames_after(&paths.trajectory, step)?;
    if log_rows + table_rows + frames > 0 {
        log::warn!(
            "dropped {log_rows} log rows, {table_rows} table rows and {frames} frames written after step {step}"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const STRUCTURE: &str = "2
Lattice=\"4.0 0.0 0.0 0.0 4.0 0.0 0.0 0.0 4.0\" Properties=species:S:1:pos:R:3
La 0.0 0.0 0.0
H 2.0 2.0 2.0
";

    fn config(extra: &str) -> RunConfig {
        RunConfig::from_yaml_str(&format!(
            "structure_file: cell.xyz\ndevice: cuda\n{extra}"
        ))
        .unwrap()
    }

    #[test]
    fn builds_from_config_and_falls_back_to_cpu() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("cell.xyz"), STRUCTURE).unwrap();

        let scenario = Scenario::build_scenario(config(""), dir.path()).unwrap();
        assert_eq!(scenario.atoms.len(), 2);
        assert_eq!(scenario.engine.requested, Device::Cuda);
        assert_eq!(scenario.engine.device, Device::Cpu);
        assert_eq!(scenario.metadata.device, "cpu");
        assert_eq!(scenario.paths.workdir, dir.path().join("outputs"));
        assert!(scenario.resume_from.is_none());
    }

    #[test]
    fn missing_structure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = Scenario::build_scenario(config(""), dir.path()).err().unwrap();
        assert!(matches!(err, NptError::Structure(_)));
    }

    #[test]
    fn unknown_model_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("cell.xyz"), STRUCTURE).unwrap();
        let err = Scenario::build_scenario(config("checkpoint: mace-mpa-0\n"), dir.path())
            .err()
            .unwrap();
        assert!(matches!(err, NptError::Config(_)));
    }

    #[test]
    fn fresh_simulation_is_thermalized() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("cell.xyz"), STRUCTURE).unwrap();
        let scenario = Scenario::build_scenario(config(""), dir.path()).unwrap();
        let sim = scenario.into_simulation().unwrap();
        assert!(sim.state.kinetic_energy(&sim.atoms) > 0.0);
        assert!(dir.path().join("outputs").join("thermo.csv").exists());
    }
}
