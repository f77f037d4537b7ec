//! Restart artifacts
//!
//! Layout: a fixed header (magic tag, format version, atom count) followed by
//! the payload (step, cell, positions, momenta, controller memory, integrator
//! stream, telemetry records of the summary window), all bincode encoded.
//! Floats are stored bit for bit, so a resumed run continues exactly where
//! the saved one left off.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{NptError, Result};
use crate::simulation::barostat::ControllerInternal;
use crate::simulation::states::{Cell, NVec3, SimulationState};
use crate::telemetry::recorder::TelemetryRecord;
use crate::telemetry::sink::FailureBudget;

pub const MAGIC: [u8; 8] = *b"NPTLGVN\0";
pub const FORMAT_VERSION: u32 = 2;

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    magic: [u8; 8],
    version: u32,
    n_atoms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Payload {
    step: u64,
    cell: [[f64; 3]; 3], // rows
    positions: Vec<[f64; 3]>,
    momenta: Vec<[f64; 3]>,
    controller: ControllerInternal,
    integrator: Vec<u8>,
    telemetry: Vec<TelemetryRecord>,
}

/// Everything needed to resume a run
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub state: SimulationState,
    pub controller: ControllerInternal,
    pub integrator: Vec<u8>,
    /// Records of the summary window that ends at `state.step`
    pub telemetry: Vec<TelemetryRecord>,
}

fn to_rows(v: &[NVec3]) -> Vec<[f64; 3]> {
    v.iter().map(|r| [r.x, r.y, r.z]).collect()
}

fn from_rows(v: &[[f64; 3]]) -> Vec<NVec3> {
    v.iter().map(|r| NVec3::new(r[0], r[1], r[2])).collect()
}

/// Serialize a snapshot into artifact bytes
pub fn encode(
    state: &SimulationState,
    controller: &ControllerInternal,
    integrator: &[u8],
    telemetry: &[TelemetryRecord],
) -> Result<Vec<u8>> {
    let header = Header {
        magic: MAGIC,
        version: FORMAT_VERSION,
        n_atoms: state.n_atoms() as u64,
    };
    let mut cell = [[0.0; 3]; 3];
    for (r, row) in cell.iter_mut().enumerate() {
        for (c, v) in row.iter_mut().enumerate() {
            *v = state.cell[(r, c)];
        }
    }
    let payload = Payload {
        step: state.step,
        cell,
        positions: to_rows(&state.positions),
        momenta: to_rows(&state.momenta),
        controller: controller.clone(),
        integrator: integrator.to_vec(),
        telemetry: telemetry.to_vec(),
    };

    let ser = |e: bincode::Error| NptError::Serialization(e.to_string());
    let mut bytes = bincode::serialize(&header).map_err(ser)?;
    bytes.extend(bincode::serialize(&payload).map_err(ser)?);
    Ok(bytes)
}

/// Decode and validate artifact bytes.
///
/// `expected_atoms` is the atom count of the structure the run was built from.
pub fn decode(bytes: &[u8], expected_atoms: Option<usize>) -> Result<Snapshot> {
    let mut cursor = bytes;
    let header: Header = bincode::deserialize_from(&mut cursor)
        .map_err(|e| NptError::corrupt(format!("unreadable header: {e}")))?;
    if header.magic != MAGIC {
        return Err(NptError::corrupt("not a restart artifact (bad magic)"));
    }
    if header.version != FORMAT_VERSION {
        return Err(NptError::corrupt(format!(
            "format version {} is not supported (expected {FORMAT_VERSION})",
            header.version
        )));
    }
    if let Some(expected) = expected_atoms {
        if header.n_atoms != expected as u64 {
            return Err(NptError::corrupt(format!(
                "artifact holds {} atoms, structure has {expected}",
                header.n_atoms
            )));
        }
    }

    let payload: Payload = bincode::deserialize_from(&mut cursor)
        .map_err(|e| NptError::corrupt(format!("truncated or unreadable payload: {e}")))?;
    if !cursor.is_empty() {
        return Err(NptError::corrupt(format!("{} trailing bytes", cursor.len())));
    }
    if payload.positions.len() as u64 != header.n_atoms || payload.momenta.len() as u64 != header.n_atoms {
        return Err(NptError::corrupt(format!(
            "header says {} atoms, payload has {} positions and {} momenta",
            header.n_atoms,
            payload.positions.len(),
            payload.momenta.len()
        )));
    }

    let cell = Cell::from_fn(|r, c| payload.cell[r][c]);
    let state = SimulationState {
        positions: from_rows(&payload.positions),
        momenta: from_rows(&payload.momenta),
        cell,
        step: payload.step,
    };
    state.validate().map_err(NptError::CorruptArtifact)?;

    Ok(Snapshot {
        state,
        controller: payload.controller,
        integrator: payload.integrator,
        telemetry: payload.telemetry,
    })
}

/// Writes artifacts to a fixed path through a temporary file
pub struct CheckpointManager {
    path: PathBuf,
    budget: FailureBudget,
    saved: u64,
}

impl CheckpointManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            budget: FailureBudget::new("restart artifact"),
            saved: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of successful saves
    pub fn saved(&self) -> u64 {
        self.saved
    }

    /// Save a snapshot. Returns `Ok(false)` for a tolerated write failure; the
    /// previous artifact on disk stays intact in that case.
    pub fn save(
        &mut self,
        state: &SimulationState,
        controller: &ControllerInternal,
        integrator: &[u8],
        telemetry: &[TelemetryRecord],
    ) -> Result<bool> {
        let bytes = encode(state, controller, integrator, telemetry)?;
        let outcome = write_atomically(&self.path, &bytes);
        let written = self.budget.absorb(outcome)?.is_some();
        if written {
            self.saved += 1;
            log::debug!("restart artifact written at step {}", state.step);
        }
        Ok(written)
    }

    pub fn load(path: &Path, expected_atoms: Option<usize>) -> Result<Snapshot> {
        let bytes = fs::read(path)
            .map_err(|e| NptError::corrupt(format!("cannot read {}: {e}", path.display())))?;
        decode(&bytes, expected_atoms)
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}
