//! Extended XYZ structures and trajectory frames.
//!
//! Reads the initial structure (`Lattice="..."` on the comment line, one
//! `symbol x y z` row per atom) and writes trajectory frames in the same
//! format, so a trajectory can be fed back in as a structure.

use std::io::{BufRead, Write};

use crate::error::{NptError, Result};
use crate::simulation::states::{Atoms, Cell, NVec3, SimulationState};

/// Standard atomic weights (amu)
const MASSES: &[(&str, f64)] = &[
    ("H", 1.008), ("He", 4.0026), ("Li", 6.94), ("Be", 9.0122), ("B", 10.81),
    ("C", 12.011), ("N", 14.007), ("O", 15.999), ("F", 18.998), ("Ne", 20.180),
    ("Na", 22.990), ("Mg", 24.305), ("Al", 26.982), ("Si", 28.085), ("P", 30.974),
    ("S", 32.06), ("Cl", 35.45), ("Ar", 39.948), ("K", 39.098), ("Ca", 40.078),
    ("Sc", 44.956), ("Ti", 47.867), ("V", 50.942), ("Cr", 51.996), ("Mn", 54.938),
    ("Fe", 55.845), ("Co", 58.933), ("Ni", 58.693), ("Cu", 63.546), ("Zn", 65.38),
    ("Ga", 69.723), ("Ge", 72.630), ("As", 74.922), ("Se", 78.971), ("Br", 79.904),
    ("Kr", 83.798), ("Rb", 85.468), ("Sr", 87.62), ("Y", 88.906), ("Zr", 91.224),
    ("Nb", 92.906), ("Mo", 95.95), ("Ru", 101.07), ("Rh", 102.91), ("Pd", 106.42),
    ("Ag", 107.87), ("Cd", 112.41), ("In", 114.82), ("Sn", 118.71), ("Sb", 121.76),
    ("Te", 127.60), ("I", 126.90), ("Xe", 131.29), ("Cs", 132.91), ("Ba", 137.33),
    ("La", 138.91), ("Ce", 140.12), ("Pr", 140.91), ("Nd", 144.24), ("Gd", 157.25),
    ("Yb", 173.05), ("Lu", 174.97), ("Hf", 178.49), ("Ta", 180.95), ("W", 183.84),
    ("Re", 186.21), ("Os", 190.23), ("Ir", 192.22), ("Pt", 195.08), ("Au", 196.97),
    ("Hg", 200.59), ("Pb", 207.2), ("Bi", 208.98), ("Th", 232.04), ("U", 238.03),
];

pub fn atomic_mass(symbol: &str) -> Option<f64> {
    MASSES.iter().find(|(s, _)| *s == symbol).map(|&(_, m)| m)
}

/// Parse one extended XYZ frame into atoms and a step-0 state
pub fn read_extxyz<R: BufRead>(reader: R) -> Result<(Atoms, SimulationState)> {
    let mut lines = reader.lines();
    let mut next_line = |what: &str| -> Result<String> {
        match lines.next() {
            Some(Ok(line)) => Ok(line),
            Some(Err(e)) => Err(NptError::Structure(format!("reading {what}: {e}"))),
            None => Err(NptError::Structure(format!("unexpected end of file before {what}"))),
        }
    };

    let count_line = next_line("atom count")?;
    let n: usize = count_line
        .trim()
        .parse()
        .map_err(|_| NptError::Structure(format!("bad atom count `{}`", count_line.trim())))?;

    let comment = next_line("comment line")?;
    let cell = parse_lattice(&comment)?;

    let mut symbols = Vec::with_capacity(n);
    let mut masses = Vec::with_capacity(n);
    let mut positions = Vec::with_capacity(n);
    for i in 0..n {
        let line = next_line(&format!("atom {}", i + 1))?;
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            return Err(NptError::Structure(format!("atom {}: expected `symbol x y z`", i + 1)));
        }
        let symbol = fields[0].to_string();
        let mass = atomic_mass(&symbol)
            .ok_or_else(|| NptError::Structure(format!("unknown element `{symbol}`")))?;
        let mut xyz = [0.0; 3];
        for (d, field) in fields[1..4].iter().enumerate() {
            xyz[d] = field
                .parse()
                .map_err(|_| NptError::Structure(format!("atom {}: bad coordinate `{field}`", i + 1)))?;
        }
        symbols.push(symbol);
        masses.push(mass);
        positions.push(NVec3::new(xyz[0], xyz[1], xyz[2]));
    }

    let state = SimulationState::new(positions, cell)?;
    Ok((Atoms { symbols, masses }, state))
}

fn parse_lattice(comment: &str) -> Result<Cell> {
    let start = comment
        .find("Lattice=\"")
        .ok_or_else(|| NptError::Structure("comment line has no Lattice=\"...\"".into()))?
        + "Lattice=\"".len();
    let rest = &comment[start..];
    let end = rest
        .find('"')
        .ok_or_else(|| NptError::Structure("unterminated Lattice string".into()))?;
    let values: Vec<f64> = rest[..end]
        .split_whitespace()
        .map(|v| v.parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| NptError::Structure("non-numeric lattice entry".into()))?;
    if values.len() != 9 {
        return Err(NptError::Structure(format!("lattice has {} entries, expected 9", values.len())));
    }
    Ok(Cell::from_row_slice(&values))
}

/// Write one frame; `extra` is appended to the comment line
pub fn write_frame<W: Write>(out: &mut W, atoms: &Atoms, state: &SimulationState, extra: &str) -> std::io::Result<()> {
    writeln!(out, "{}", state.n_atoms())?;
    let c = &state.cell;
    write!(out, "Lattice=\"")?;
    for row in 0..3 {
        for col in 0..3 {
            let sep = if row == 2 && col == 2 { "" } else { " " };
            write!(out, "{:.10}{sep}", c[(row, col)])?;
        }
    }
    writeln!(out, "\" Properties=species:S:1:pos:R:3 step={} {extra}", state.step)?;
    for (symbol, r) in atoms.symbols.iter().zip(&state.positions) {
        writeln!(out, "{symbol} {:.10} {:.10} {:.10}", r.x, r.y, r.z)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const SAMPLE: &str = "2
Lattice=\"5.1 0.0 0.0 0.0 5.1 0.0 0.0 0.0 5.1\" Properties=species:S:1:pos:R:3 pbc=\"T T T\"
La 0.0 0.0 0.0
H  1.275 1.275 1.275
";

    #[test]
    fn reads_lattice_and_atoms() {
        let (atoms, state) = read_extxyz(SAMPLE.as_bytes()).unwrap();
        assert_eq!(atoms.symbols, vec!["La", "H"]);
        assert_relative_eq!(atoms.masses[0], 138.91);
        assert_relative_eq!(state.volume(), 5.1f64.powi(3), epsilon = 1e-9);
        assert_relative_eq!(state.positions[1].z, 1.275);
        assert_eq!(state.step, 0);
    }

    #[test]
    fn truncated_file_is_an_error() {
        let text = "3\nLattice=\"1 0 0 0 1 0 0 0 1\"\nH 0 0 0\n";
        assert!(matches!(read_extxyz(text.as_bytes()), Err(NptError::Structure(_))));
    }

    #[test]
    fn unknown_element_is_an_error() {
        let text = "1\nLattice=\"1 0 0 0 1 0 0 0 1\"\nXx 0 0 0\n";
        assert!(read_extxyz(text.as_bytes()).is_err());
    }

    #[test]
    fn frames_read_back() {
        let (atoms, mut state) = read_extxyz(SAMPLE.as_bytes()).unwrap();
        state.step = 25;
        let mut buf = Vec::new();
        write_frame(&mut buf, &atoms, &state, "time_fs=12.5").unwrap();

        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.contains("step=25 time_fs=12.5"));

        let (atoms2, state2) = read_extxyz(buf.as_slice()).unwrap();
        assert_eq!(atoms2, atoms);
        assert_relative_eq!(state2.cell, state.cell, epsilon = 1e-9);
    }
}
