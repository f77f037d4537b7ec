//! Step loop for an NPT run
//!
//! Within one step the order is fixed: evaluate forces/stress, integrate,
//! barostat-correct (on its cadence), log, write a trajectory frame, write a
//! restart artifact. Telemetry at a correction step therefore sees the
//! post-correction cell.
//!
//! Provider output is cached for the current configuration and dropped
//! whenever the integrator or the barostat mutates the state, so a step that
//! is both logged and used for the next force evaluation costs one call.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::checkpoint::restart::{CheckpointManager, Snapshot};
use crate::error::{NptError, Result};
use crate::simulation::barostat::Barostat;
use crate::simulation::forces::{Evaluation, ForceProvider};
use crate::simulation::integrator::Integrator;
use crate::simulation::params::Parameters;
use crate::simulation::states::{Atoms, SimulationState};
use crate::telemetry::recorder::{window_start, Recorder, TelemetryRecord};
use crate::telemetry::summary::{RunMetadata, RunStatus, RunSummary};
use crate::telemetry::trajectory::TrajectoryWriter;

/// Cooperative stop request, honoured at the next step boundary
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub steps_completed: u64,
}

pub struct Simulation {
    pub atoms: Atoms,
    pub state: SimulationState,
    pub params: Parameters,
    provider: Box<dyn ForceProvider>,
    integrator: Box<dyn Integrator>,
    barostat: Barostat,
    recorder: Recorder,
    trajectory: Option<TrajectoryWriter>,
    checkpoints: Option<CheckpointManager>,
    last_checkpoint: Option<u64>,
    summary_path: Option<PathBuf>,
    metadata: RunMetadata,
    cached: Option<Evaluation>,
    stop: StopHandle,
}

impl Simulation {
    pub fn new(
        atoms: Atoms,
        state: SimulationState,
        params: Parameters,
        provider: Box<dyn ForceProvider>,
        integrator: Box<dyn Integrator>,
    ) -> Result<Self> {
        if atoms.len() != state.n_atoms() {
            return Err(NptError::Structure(format!(
                "{} atom records for {} positions",
                atoms.len(),
                state.n_atoms()
            )));
        }
        let barostat = Barostat::new(&params);
        Ok(Self {
            atoms,
            state,
            params,
            provider,
            integrator,
            barostat,
            recorder: Recorder::in_memory(),
            trajectory: None,
            checkpoints: None,
            last_checkpoint: None,
            summary_path: None,
            metadata: RunMetadata::default(),
            cached: None,
            stop: StopHandle::default(),
        })
    }

    pub fn with_recorder(mut self, recorder: Recorder) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn with_trajectory(mut self, trajectory: TrajectoryWriter) -> Self {
        self.trajectory = Some(trajectory);
        self
    }

    pub fn with_checkpoints(mut self, checkpoints: CheckpointManager) -> Self {
        self.checkpoints = Some(checkpoints);
        self
    }

    pub fn with_summary(mut self, path: PathBuf, metadata: RunMetadata) -> Self {
        self.summary_path = Some(path);
        self.metadata = metadata;
        self
    }

    /// Share an existing stop flag, e.g. one owned by a signal handler
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    pub fn barostat(&self) -> &Barostat {
        &self.barostat
    }

    /// Replace state, controller memory, random stream and the summary window
    /// with a snapshot
    pub fn resume_from(&mut self, snapshot: Snapshot) -> Result<()> {
        if snapshot.state.n_atoms() != self.atoms.len() {
            return Err(NptError::corrupt(format!(
                "snapshot holds {} atoms, structure has {}",
                snapshot.state.n_atoms(),
                self.atoms.len()
            )));
        }
        self.integrator.restore_state(&snapshot.integrator)?;
        self.barostat.restore(snapshot.controller);
        self.recorder.restore(snapshot.telemetry);
        self.state = snapshot.state;
        self.cached = None;
        self.last_checkpoint = Some(self.state.step);
        log::info!("resuming from step {}", self.state.step);
        Ok(())
    }

    fn take_evaluation(&mut self) -> Result<Evaluation> {
        if let Some(eval) = self.cached.take() {
            return Ok(eval);
        }
        let eval = self.provider.evaluate(&self.state)?;
        if eval.forces.len() != self.state.n_atoms() {
            return Err(NptError::Structure(format!(
                "provider `{}` returned {} forces for {} atoms",
                self.provider.name(),
                eval.forces.len(),
                self.state.n_atoms()
            )));
        }
        eval.check_finite(self.state.step)?;
        Ok(eval)
    }

    /// Provider output at the current configuration
    pub fn evaluation(&mut self) -> Result<&Evaluation> {
        let eval = self.take_evaluation()?;
        let cached: &Evaluation = self.cached.insert(eval);
        Ok(cached)
    }

    /// Telemetry for the current state, without appending it
    pub fn observe(&mut self) -> Result<TelemetryRecord> {
        let timestep = self.params.timestep;
        let eval = self.take_evaluation()?;
        let record = TelemetryRecord::observe(&self.state, &self.atoms, &eval, timestep);
        self.cached = Some(eval);
        Ok(record)
    }

    fn record(&mut self) -> Result<()> {
        let record = self.observe()?;
        self.recorder.record(record)
    }

    fn write_frame(&mut self) -> Result<()> {
        if let Some(trajectory) = self.trajectory.as_mut() {
            trajectory.write(&self.atoms, &self.state, self.params.timestep)?;
        }
        Ok(())
    }

    /// Write a restart artifact for the current step, if a manager is attached
    pub fn save_checkpoint(&mut self) -> Result<bool> {
        let Some(manager) = self.checkpoints.as_mut() else {
            return Ok(false);
        };
        let stream = self.integrator.export_state()?;
        let window = self
            .recorder
            .since(window_start(self.state.step, self.params.summary_window_fraction));
        let written = manager.save(&self.state, self.barostat.internal(), &stream, &window)?;
        if written {
            self.last_checkpoint = Some(self.state.step);
        }
        Ok(written)
    }

    /// Advance one step with the fixed per-step ordering
    pub fn step(&mut self) -> Result<()> {
        let eval = self.take_evaluation()?;
        self.integrator.advance(&mut self.state, &self.atoms, &eval.forces);
        let step = self.state.step;

        if self.barostat.is_correction_step(step) {
            let stress = self.evaluation()?.stress;
            let correction = self.barostat.correct(&mut self.state, &stress)?;
            self.cached = None;
            log::debug!(
                "step {step}: P = {:.3} GPa, scale = {:.6}, V = {:.3} A^3",
                correction.pressure,
                correction.scale,
                self.state.volume()
            );
        } else if self.barostat.is_sample_step(step) {
            let stress = self.evaluation()?.stress;
            self.barostat.sample(step, &stress)?;
        }

        if step % self.params.log_interval == 0 {
            self.record()?;
        }
        if step % self.params.trajectory_interval == 0 {
            self.write_frame()?;
        }
        if step % self.params.restart_interval == 0 {
            self.save_checkpoint()?;
        }
        Ok(())
    }

    /// Run until `total_steps`, a stop request, or a fatal error.
    ///
    /// Telemetry is flushed and the summary written in every case. A final
    /// restart artifact is written unless the run failed.
    pub fn run(&mut self) -> Result<RunOutcome> {
        log::info!(
            "MD run: T = {:.1} K, P = {:.1} GPa, timestep = {:.3} fs, steps = {} (starting at {})",
            self.params.target_temperature,
            self.params.target_pressure,
            self.params.timestep,
            self.params.total_steps,
            self.state.step
        );

        let mut result = self.run_loop();
        let mut status = match &result {
            Ok(status) => *status,
            Err(_) => RunStatus::Failed,
        };

        if let Err(err) = self.recorder.flush() {
            log::warn!("telemetry left unflushed: {err}");
        }
        if let Some(Err(err)) = self.trajectory.as_mut().map(|t| t.flush()) {
            log::warn!("trajectory left unflushed: {err}");
        }
        if status != RunStatus::Failed && self.last_checkpoint != Some(self.state.step) {
            match self.save_checkpoint() {
                Ok(true) => {
                    if let Some(manager) = &self.checkpoints {
                        log::info!(
                            "final restart artifact for step {} written to {}",
                            self.state.step,
                            manager.path().display()
                        );
                    }
                }
                Ok(false) => {}
                Err(err) => {
                    status = RunStatus::Failed;
                    result = Err(err);
                }
            }
        }

        if let Some(path) = self.summary_path.clone() {
            match self.summary(status).write_to(&path) {
                Ok(()) => log::info!("run summary written to {}", path.display()),
                Err(err) => log::warn!("could not write summary: {err}"),
            }
        }

        match result {
            Ok(status) => Ok(RunOutcome {
                status,
                steps_completed: self.state.step,
            }),
            Err(err) => {
                log::error!("run stopped at step {}: {err}", self.state.step);
                Err(err)
            }
        }
    }

    fn run_loop(&mut self) -> Result<RunStatus> {
        if self.state.step == 0 {
            self.record()?;
            self.write_frame()?;
        }

        let total = self.params.total_steps;
        let progress_every = (total / 10).max(1);
        while self.state.step < total {
            if self.stop.is_requested() {
                log::info!("stop requested, halting at step {}", self.state.step);
                return Ok(RunStatus::Interrupted);
            }
            self.step()?;
            if self.state.step % progress_every == 0 {
                if let Some(last) = self.recorder.last() {
                    log::info!(
                        "step {}/{}: T = {:.1} K, P = {:.2} GPa, V = {:.3} A^3",
                        self.state.step,
                        total,
                        last.temperature,
                        last.pressure,
                        last.volume
                    );
                }
            }
        }
        Ok(RunStatus::Completed)
    }

    pub fn summary(&self, status: RunStatus) -> RunSummary {
        RunSummary::build(
            &self.metadata,
            &self.params,
            status,
            &self.state,
            &self.recorder,
            self.barostat.internal(),
        )
    }
}
