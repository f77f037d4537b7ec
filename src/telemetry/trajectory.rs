//! Trajectory stream: extended XYZ frames of positions and cell

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;

use crate::error::{NptError, Result};
use crate::io::structure::write_frame;
use crate::simulation::states::{Atoms, SimulationState};
use crate::telemetry::recorder::open_output;
use crate::telemetry::sink::LineSink;

pub struct TrajectoryWriter {
    sink: LineSink,
    frames: u64,
}

impl TrajectoryWriter {
    pub fn new(out: Box<dyn Write>) -> Self {
        Self {
            sink: LineSink::new("trajectory", out),
            frames: 0,
        }
    }

    pub fn open(path: &Path, append: bool) -> Result<Self> {
        Ok(Self::new(Box::new(open_output(path, append)?)))
    }

    /// Queue one frame and push it out; copies everything it needs from `state`
    pub fn write(&mut self, atoms: &Atoms, state: &SimulationState, timestep: f64) -> Result<()> {
        let mut frame = Vec::new();
        write_frame(&mut frame, atoms, state, &format!("time_fs={:.3}", state.time_fs(timestep)))
            .map_err(|e| NptError::io("trajectory", e))?;
        self.frames += 1;
        self.sink.push(&frame)
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn flush(&mut self) -> Result<()> {
        self.sink.drain()
    }
}

/// Drop frames written after `step` from an extended XYZ trajectory.
///
/// Frames are identified by the `step=` key of their comment line; frames
/// without one are kept. Returns the number of dropped frames.
pub fn discard_frames_after(path: &Path, step: u64) -> Result<usize> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(NptError::io("trajectory", e)),
    };
    let lines: Vec<&str> = text.lines().collect();
    let mut kept = String::with_capacity(text.len());
    let mut dropped = 0;
    let mut i = 0;
    while i < lines.len() {
        let Ok(n) = lines[i].trim().parse::<usize>() else {
            return Err(NptError::corrupt(format!(
                "{}: expected an atom count at line {}",
                path.display(),
                i + 1
            )));
        };
        let end = (i + 2 + n).min(lines.len());
        let frame_step = lines
            .get(i + 1)
            .and_then(|comment| comment.split_whitespace().find_map(|kv| kv.strip_prefix("step=")))
            .and_then(|v| v.parse::<u64>().ok());
        if frame_step.is_some_and(|s| s > step) {
            dropped += 1;
        } else {
            for line in &lines[i..end] {
                kept.push_str(line);
                kept.push('\n');
            }
        }
        i = end;
    }
    if dropped > 0 {
        fs::write(path, kept).map_err(|e| NptError::io("trajectory", e))?;
    }
    Ok(dropped)
}
