//! Telemetry records and the recorder that fans them out
//!
//! Each tick produces one [`TelemetryRecord`] that is appended to the
//! in-memory trace, written as a line of the plaintext log and as a row of
//! the CSV thermo table.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{NptError, Result};
use crate::simulation::forces::Evaluation;
use crate::simulation::states::{pressure_from_stress, Atoms, SimulationState};
use crate::telemetry::sink::LineSink;

/// CSV column names, in field order
pub const TABLE_COLUMNS: [&str; 7] = [
    "step",
    "time_fs",
    "temperature_K",
    "pressure_GPa",
    "volume_A3",
    "potential_eV",
    "kinetic_eV",
];

/// Macroscopic observables at one step
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub step: u64,
    pub time_fs: f64,
    #[serde(rename = "temperature_K")]
    pub temperature: f64,
    #[serde(rename = "pressure_GPa")]
    pub pressure: f64,
    #[serde(rename = "volume_A3")]
    pub volume: f64,
    #[serde(rename = "potential_eV")]
    pub potential_energy: f64,
    #[serde(rename = "kinetic_eV")]
    pub kinetic_energy: f64,
}

impl TelemetryRecord {
    /// Derive the observables from a state and the provider output at that state
    pub fn observe(state: &SimulationState, atoms: &Atoms, eval: &Evaluation, timestep: f64) -> Self {
        Self {
            step: state.step,
            time_fs: state.time_fs(timestep),
            temperature: state.temperature(atoms),
            pressure: pressure_from_stress(&eval.stress),
            volume: state.volume(),
            potential_energy: eval.energy,
            kinetic_energy: state.kinetic_energy(atoms),
        }
    }

    pub fn total_energy(&self) -> f64 {
        self.potential_energy + self.kinetic_energy
    }

    fn log_line(&self) -> String {
        format!(
            "{:>10} {:>12.4} {:>14.5} {:>14.5} {:>12.5} {:>10.2} {:>12.4} {:>12.4}\n",
            self.step,
            self.time_fs / 1000.0,
            self.total_energy(),
            self.potential_energy,
            self.kinetic_energy,
            self.temperature,
            self.pressure,
            self.volume
        )
    }
}

fn log_header() -> String {
    format!(
        "{:>10} {:>12} {:>14} {:>14} {:>12} {:>10} {:>12} {:>12}\n",
        "Step", "Time[ps]", "Etot[eV]", "Epot[eV]", "Ekin[eV]", "T[K]", "P[GPa]", "V[A^3]"
    )
}

fn csv_bytes(write: impl FnOnce(&mut csv::Writer<Vec<u8>>) -> csv::Result<()>) -> Result<Vec<u8>> {
    let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(Vec::new());
    write(&mut wtr)?;
    wtr.into_inner()
        .map_err(|e| NptError::Serialization(e.to_string()))
}

/// First step of the trailing window that ends at `step`
pub fn window_start(step: u64, fraction: f64) -> u64 {
    step - ((step as f64 * fraction).floor() as u64).min(step)
}

/// Append-only telemetry trace with plaintext and CSV sinks.
///
/// With a window fraction set, records older than the trailing window of the
/// newest record are dropped from memory; the sinks still get every row.
pub struct Recorder {
    records: VecDeque<TelemetryRecord>,
    recorded: u64,
    window_fraction: Option<f64>,
    log: Option<LineSink>,
    table: Option<LineSink>,
}

impl Recorder {
    /// Keep records in memory only
    pub fn in_memory() -> Self {
        Self {
            records: VecDeque::new(),
            recorded: 0,
            window_fraction: None,
            log: None,
            table: None,
        }
    }

    /// Retain only the trailing `fraction` of the run in memory
    pub fn with_window_fraction(mut self, fraction: f64) -> Self {
        self.window_fraction = Some(fraction);
        self
    }

    /// Attach writers; headers are written unless `append` continues a previous run
    pub fn with_writers(log: Box<dyn Write>, table: Box<dyn Write>, append: bool) -> Result<Self> {
        let mut log = LineSink::new("plaintext log", log);
        let mut table = LineSink::new("thermo table", table);
        if !append {
            log.push(log_header().as_bytes())?;
            table.push(&csv_bytes(|w| w.write_record(TABLE_COLUMNS))?)?;
        }
        Ok(Self {
            log: Some(log),
            table: Some(table),
            ..Self::in_memory()
        })
    }

    /// Open the plaintext log and CSV table on disk
    pub fn open(logfile: &Path, thermo_csv: &Path, append: bool) -> Result<Self> {
        let log = open_output(logfile, append)?;
        let table = open_output(thermo_csv, append)?;
        Self::with_writers(Box::new(log), Box::new(table), append)
    }

    /// Append a record and write it to every sink
    pub fn record(&mut self, record: TelemetryRecord) -> Result<()> {
        self.records.push_back(record);
        self.recorded += 1;
        if let Some(fraction) = self.window_fraction {
            let start = window_start(record.step, fraction);
            while self.records.front().is_some_and(|r| r.step < start) {
                self.records.pop_front();
            }
        }
        if let Some(log) = self.log.as_mut() {
            log.push(record.log_line().as_bytes())?;
        }
        if let Some(table) = self.table.as_mut() {
            table.push(&csv_bytes(|w| w.serialize(record))?)?;
        }
        Ok(())
    }

    /// Last attempt to write anything still queued
    pub fn flush(&mut self) -> Result<()> {
        for sink in [self.log.as_mut(), self.table.as_mut()].into_iter().flatten() {
            sink.drain()?;
        }
        Ok(())
    }

    /// Records still held in memory
    pub fn records(&self) -> &VecDeque<TelemetryRecord> {
        &self.records
    }

    /// Number of records taken by this recorder, including dropped ones
    pub fn recorded(&self) -> u64 {
        self.recorded
    }

    pub fn last(&self) -> Option<&TelemetryRecord> {
        self.records.back()
    }

    /// Records at or after `step`
    pub fn since(&self, step: u64) -> Vec<TelemetryRecord> {
        self.records.iter().filter(|r| r.step >= step).copied().collect()
    }

    /// Records in the trailing `fraction` of the steps up to `step`; the last
    /// record alone when none fall inside
    pub fn trailing_window(&self, fraction: f64, step: u64) -> Vec<TelemetryRecord> {
        let start = window_start(step, fraction);
        let window: Vec<_> = self
            .records
            .iter()
            .filter(|r| r.step >= start && r.step <= step)
            .copied()
            .collect();
        if window.is_empty() {
            self.records.back().copied().into_iter().collect()
        } else {
            window
        }
    }

    /// Replace the in-memory trace with records carried over from a restart
    /// artifact; nothing is written to the sinks
    pub fn restore(&mut self, records: Vec<TelemetryRecord>) {
        self.records = records.into();
    }
}

/// Mean and population standard deviation of the window's pressure
pub fn pressure_stats(window: &[TelemetryRecord]) -> Option<(f64, f64)> {
    if window.is_empty() {
        return None;
    }
    let n = window.len() as f64;
    let mean = window.iter().map(|r| r.pressure).sum::<f64>() / n;
    let var = window.iter().map(|r| (r.pressure - mean).powi(2)).sum::<f64>() / n;
    Some((mean, var.sqrt()))
}

/// Drop rows of a log or CSV table whose leading step is past `step`.
///
/// Lines without a numeric first field (headers) are kept. Returns the
/// number of dropped rows; a missing file is left alone.
pub fn discard_rows_after(path: &Path, step: u64) -> Result<usize> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(NptError::io("output file", e)),
    };
    let mut kept = String::with_capacity(text.len());
    let mut dropped = 0;
    for line in text.lines() {
        let first = line
            .split(|c: char| c == ',' || c.is_whitespace())
            .find(|field| !field.is_empty());
        match first.and_then(|field| field.parse::<u64>().ok()) {
            Some(row_step) if row_step > step => dropped += 1,
            _ => {
                kept.push_str(line);
                kept.push('\n');
            }
        }
    }
    if dropped > 0 {
        fs::write(path, kept).map_err(|e| NptError::io("output file", e))?;
    }
    Ok(dropped)
}

pub(crate) fn open_output(path: &Path, append: bool) -> Result<BufWriter<File>> {
    let file = if append {
        OpenOptions::new().create(true).append(true).open(path)
    } else {
        File::create(path)
    };
    file.map(BufWriter::new)
        .map_err(|e| NptError::io("output file", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::states::{Cell, NVec3};
    use crate::telemetry::sink::testing::FlakyWriter;
    use nalgebra::Matrix3;

    fn sample() -> (SimulationState, Atoms, Evaluation) {
        let mut state = SimulationState::new(vec![NVec3::zeros(), NVec3::new(1.0, 1.0, 1.0)], Cell::from_diagonal_element(2.0)).unwrap();
        state.step = 40;
        state.momenta[0] = NVec3::new(0.1, 0.0, 0.0);
        let atoms = Atoms {
            symbols: vec!["H".into(), "H".into()],
            masses: vec![1.008, 1.008],
        };
        let eval = Evaluation {
            forces: vec![NVec3::zeros(); 2],
            energy: -3.5,
            stress: Matrix3::from_diagonal_element(-0.5),
        };
        (state, atoms, eval)
    }

    fn record_at(step: u64, pressure: f64) -> TelemetryRecord {
        TelemetryRecord {
            step,
            time_fs: step as f64,
            temperature: 300.0,
            pressure,
            volume: 10.0,
            potential_energy: 0.0,
            kinetic_energy: 0.0,
        }
    }

    #[test]
    fn observing_twice_gives_identical_records() {
        let (state, atoms, eval) = sample();
        let a = TelemetryRecord::observe(&state, &atoms, &eval, 0.5);
        let b = TelemetryRecord::observe(&state, &atoms, &eval, 0.5);
        assert_eq!(a, b);
        assert_eq!(a.step, 40);
        assert_eq!(a.time_fs, 20.0);
        assert_eq!(a.volume, 8.0);
    }

    #[test]
    fn writes_header_and_rows() {
        let log = FlakyWriter::default();
        let table = FlakyWriter::default();
        let mut recorder = Recorder::with_writers(Box::new(log.clone()), Box::new(table.clone()), false).unwrap();
        let (state, atoms, eval) = sample();
        recorder.record(TelemetryRecord::observe(&state, &atoms, &eval, 0.5)).unwrap();

        let csv_text = String::from_utf8(table.written.borrow().clone()).unwrap();
        let mut lines = csv_text.lines();
        assert_eq!(lines.next().unwrap(), TABLE_COLUMNS.join(","));
        assert!(lines.next().unwrap().starts_with("40,20.0,"));

        let log_text = String::from_utf8(log.written.borrow().clone()).unwrap();
        assert!(log_text.lines().next().unwrap().contains("P[GPa]"));
        assert_eq!(log_text.lines().count(), 2);
        assert_eq!(recorder.records().len(), 1);
    }

    #[test]
    fn append_mode_skips_headers() {
        let table = FlakyWriter::default();
        let _recorder = Recorder::with_writers(Box::new(std::io::sink()), Box::new(table.clone()), true).unwrap();
        assert!(table.written.borrow().is_empty());
    }

    #[test]
    fn failed_write_keeps_record_in_memory() {
        let table = FlakyWriter::default();
        let mut recorder = Recorder::with_writers(Box::new(std::io::sink()), Box::new(table.clone()), false).unwrap();
        *table.failing.borrow_mut() = true;
        recorder.record(record_at(10, 1.0)).unwrap();
        assert_eq!(recorder.records().len(), 1);

        *table.failing.borrow_mut() = false;
        recorder.record(record_at(20, 2.0)).unwrap();
        let csv_text = String::from_utf8(table.written.borrow().clone()).unwrap();
        assert_eq!(csv_text.lines().count(), 3);
    }

    #[test]
    fn trailing_window_takes_last_fraction() {
        let mut recorder = Recorder::in_memory();
        for i in 0..10 {
            recorder.record(record_at(i, i as f64)).unwrap();
        }
        let window = recorder.trailing_window(0.2, 9);
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].step, 8);
        let (mean, std) = pressure_stats(&window).unwrap();
        assert_eq!(mean, 8.5);
        assert_eq!(std, 0.5);
    }

    #[test]
    fn trailing_window_of_few_records() {
        let mut recorder = Recorder::in_memory();
        assert!(recorder.trailing_window(0.2, 0).is_empty());
        recorder.record(record_at(0, 1.0)).unwrap();
        assert_eq!(recorder.trailing_window(0.2, 0).len(), 1);
        // nothing logged inside [80, 100]: fall back to the last record
        assert_eq!(recorder.trailing_window(0.2, 100)[0].step, 0);
    }

    #[test]
    fn window_fraction_bounds_memory() {
        let mut recorder = Recorder::in_memory().with_window_fraction(0.2);
        for step in (0..=100).step_by(10) {
            recorder.record(record_at(step, step as f64)).unwrap();
        }
        assert_eq!(recorder.recorded(), 11);
        let steps: Vec<u64> = recorder.records().iter().map(|r| r.step).collect();
        assert_eq!(steps, vec![80, 90, 100]);
        assert_eq!(recorder.trailing_window(0.2, 100).len(), 3);
        assert_eq!(recorder.since(90).len(), 2);
    }

    #[test]
    fn restored_records_rejoin_the_window() {
        let mut recorder = Recorder::in_memory().with_window_fraction(0.2);
        recorder.restore(vec![record_at(80, 1.0), record_at(90, 2.0)]);
        recorder.record(record_at(100, 3.0)).unwrap();
        let (mean, _) = pressure_stats(&recorder.trailing_window(0.2, 100)).unwrap();
        assert_eq!(mean, 2.0);
        assert_eq!(recorder.recorded(), 1);
    }

    #[test]
    fn discard_rows_after_keeps_headers_and_earlier_steps() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("thermo.csv");
        fs::write(&csv_path, "step,time_fs\n0,0.0\n10,5.0\n20,10.0\n30,15.0\n").unwrap();
        assert_eq!(discard_rows_after(&csv_path, 10).unwrap(), 2);
        assert_eq!(fs::read_to_string(&csv_path).unwrap(), "step,time_fs\n0,0.0\n10,5.0\n");

        let log_path = dir.path().join("md.log");
        fs::write(&log_path, "    step   time[fs]\n       0      0.000\n      20     10.000\n").unwrap();
        assert_eq!(discard_rows_after(&log_path, 10).unwrap(), 1);
        assert_eq!(fs::read_to_string(&log_path).unwrap().lines().count(), 2);

        assert_eq!(discard_rows_after(&dir.path().join("absent.csv"), 10).unwrap(), 0);
    }
}
