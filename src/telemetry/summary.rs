//! Terminal run summary, written as JSON once the loop ends

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{NptError, Result};
use crate::simulation::barostat::{ControllerInternal, Correction};
use crate::simulation::params::Parameters;
use crate::simulation::states::SimulationState;
use crate::telemetry::recorder::{pressure_stats, Recorder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Interrupted,
    Failed,
}

/// Descriptive fields that do not come from the state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunMetadata {
    pub structure: String,
    pub ensemble: String,
    pub device: String,
    pub workdir: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputSummary {
    pub directory: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WindowStatistics {
    pub samples: usize,
    pub first_step: Option<u64>,
    #[serde(rename = "average_GPa")]
    pub average: Option<f64>,
    #[serde(rename = "std_GPa")]
    pub std: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BarostatStatistics {
    pub corrections: u64,
    pub samples: Vec<Correction>, // most recent corrections
    #[serde(rename = "average_GPa")]
    pub average: Option<f64>,
    #[serde(rename = "std_GPa")]
    pub std: Option<f64>,
    pub last_scale: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PressureStatistics {
    pub trailing_window: WindowStatistics,
    pub barostat: BarostatStatistics,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub structure: String,
    pub ensemble: String,
    pub status: RunStatus,
    #[serde(rename = "target_temperature_K")]
    pub target_temperature: f64,
    #[serde(rename = "target_pressure_GPa")]
    pub target_pressure: f64,
    pub timestep_fs: f64,
    pub total_steps: u64,
    pub completed_steps: u64,
    pub device: String,
    pub output: OutputSummary,
    pub pressure_statistics: PressureStatistics,
    pub final_cell: [[f64; 3]; 3],
    #[serde(rename = "final_volume_A3")]
    pub final_volume: f64,
}

impl RunSummary {
    pub fn build(
        meta: &RunMetadata,
        params: &Parameters,
        status: RunStatus,
        state: &SimulationState,
        recorder: &Recorder,
        controller: &ControllerInternal,
    ) -> Self {
        let window = recorder.trailing_window(params.summary_window_fraction, state.step);
        let trailing = pressure_stats(&window);
        let barostat = controller.pressure_stats();

        let mut final_cell = [[0.0; 3]; 3];
        for (r, row) in final_cell.iter_mut().enumerate() {
            for (c, v) in row.iter_mut().enumerate() {
                *v = state.cell[(r, c)];
            }
        }

        Self {
            structure: meta.structure.clone(),
            ensemble: meta.ensemble.clone(),
            status,
            target_temperature: params.target_temperature,
            target_pressure: params.target_pressure,
            timestep_fs: params.timestep,
            total_steps: params.total_steps,
            completed_steps: state.step,
            device: meta.device.clone(),
            output: OutputSummary {
                directory: meta.workdir.display().to_string(),
            },
            pressure_statistics: PressureStatistics {
                trailing_window: WindowStatistics {
                    samples: window.len(),
                    first_step: window.first().map(|r| r.step),
                    average: trailing.map(|(m, _)| m),
                    std: trailing.map(|(_, s)| s),
                },
                barostat: BarostatStatistics {
                    corrections: controller.corrections,
                    samples: controller.recent.iter().copied().collect(),
                    average: barostat.map(|(m, _)| m),
                    std: barostat.map(|(_, s)| s),
                    last_scale: controller.last_scale,
                },
            },
            final_cell,
            final_volume: state.volume(),
        }
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|e| NptError::io("summary", e))?;
        let mut out = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut out, self)?;
        out.write_all(b"\n").map_err(|e| NptError::io("summary", e))?;
        out.flush().map_err(|e| NptError::io("summary", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::states::{Cell, NVec3};
    use crate::telemetry::recorder::TelemetryRecord;

    #[test]
    fn summary_serializes_with_expected_keys() {
        let mut state = SimulationState::new(vec![NVec3::zeros()], Cell::from_diagonal_element(3.0)).unwrap();
        state.step = 100;
        let mut recorder = Recorder::in_memory();
        for step in [0, 50, 100] {
            recorder
                .record(TelemetryRecord {
                    step,
                    time_fs: step as f64 * 0.5,
                    temperature: 300.0,
                    pressure: 150.0,
                    volume: 27.0,
                    potential_energy: -1.0,
                    kinetic_energy: 0.1,
                })
                .unwrap();
        }
        let meta = RunMetadata {
            structure: "LaH10.xyz".into(),
            ensemble: "NPT_Langevin".into(),
            device: "cpu".into(),
            workdir: "/tmp/out".into(),
        };
        let summary = RunSummary::build(
            &meta,
            &Parameters::default(),
            RunStatus::Completed,
            &state,
            &recorder,
            &ControllerInternal::default(),
        );
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["completed_steps"], 100);
        assert_eq!(json["pressure_statistics"]["trailing_window"]["samples"], 1);
        assert_eq!(json["pressure_statistics"]["trailing_window"]["average_GPa"], 150.0);
        assert!(json["pressure_statistics"]["barostat"]["average_GPa"].is_null());
        assert_eq!(json["final_cell"][1][1], 3.0);
        assert_eq!(json["final_volume_A3"], 27.0);
    }
}
