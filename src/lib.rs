pub mod simulation;
pub mod configuration;
pub mod io;
pub mod telemetry;
pub mod checkpoint;
pub mod error;

pub use simulation::states::{Atoms, Cell, NVec3, SimulationState};
pub use simulation::forces::{Evaluation, ForceProvider, HarmonicEos, HarmonicEosParams};
pub use simulation::integrator::{Integrator, LangevinIntegrator};
pub use simulation::barostat::{Barostat, ControllerInternal, Correction};
pub use simulation::scenario::Scenario;
pub use simulation::driver::{RunOutcome, Simulation, StopHandle};

pub use configuration::config::{OutputConfig, ProviderConfig, RunConfig, SimulationConfig};

pub use telemetry::recorder::{Recorder, TelemetryRecord};
pub use telemetry::summary::{RunStatus, RunSummary};

pub use checkpoint::restart::{CheckpointManager, Snapshot};

pub use error::{NptError, Result};
