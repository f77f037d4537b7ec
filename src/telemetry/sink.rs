//! Best-effort output sinks
//!
//! A failed write is logged and the unwritten bytes stay queued, so they go
//! out with the next cadence tick. Only a run of consecutive failures on the
//! same sink is escalated to an error.

use std::io::{ErrorKind, Write};

use crate::error::{NptError, Result};

/// Consecutive failures tolerated before a sink error becomes fatal
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Tracks consecutive failures of one sink
#[derive(Debug, Clone)]
pub struct FailureBudget {
    sink: &'static str,
    consecutive: u32,
}

impl FailureBudget {
    pub fn new(sink: &'static str) -> Self {
        Self { sink, consecutive: 0 }
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    /// `Ok(Some(v))` on success, `Ok(None)` on a tolerated failure
    pub fn absorb<T>(&mut self, outcome: std::io::Result<T>) -> Result<Option<T>> {
        match outcome {
            Ok(v) => {
                if self.consecutive > 0 {
                    log::info!("{} recovered after {} failed write(s)", self.sink, self.consecutive);
                }
                self.consecutive = 0;
                Ok(Some(v))
            }
            Err(e) => {
                self.consecutive += 1;
                if self.consecutive >= MAX_CONSECUTIVE_FAILURES {
                    Err(NptError::io(self.sink, e))
                } else {
                    log::warn!(
                        "{} write failed ({}/{}), retrying at next tick: {e}",
                        self.sink,
                        self.consecutive,
                        MAX_CONSECUTIVE_FAILURES
                    );
                    Ok(None)
                }
            }
        }
    }
}

/// Append-only text sink with a retry queue
pub struct LineSink {
    out: Box<dyn Write>,
    pending: Vec<u8>,
    budget: FailureBudget,
}

impl LineSink {
    pub fn new(name: &'static str, out: Box<dyn Write>) -> Self {
        Self {
            out,
            pending: Vec::new(),
            budget: FailureBudget::new(name),
        }
    }

    /// Queue `bytes` and try to drain the queue
    pub fn push(&mut self, bytes: &[u8]) -> Result<()> {
        self.pending.extend_from_slice(bytes);
        self.drain()
    }

    pub fn drain(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let outcome = write_prefix(&mut self.out, &mut self.pending).and_then(|_| self.out.flush());
        self.budget.absorb(outcome)?;
        Ok(())
    }

    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }
}

// Writes as much of `pending` as the sink accepts, dropping what went out
fn write_prefix(out: &mut Box<dyn Write>, pending: &mut Vec<u8>) -> std::io::Result<()> {
    while !pending.is_empty() {
        match out.write(pending) {
            Ok(0) => return Err(ErrorKind::WriteZero.into()),
            Ok(n) => {
                pending.drain(..n);
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::RefCell;
    use std::io::{self, Write};
    use std::rc::Rc;

    /// Writer that fails while `failing` is set and records what it accepted
    #[derive(Clone, Default)]
    pub struct FlakyWriter {
        pub failing: Rc<RefCell<bool>>,
        pub written: Rc<RefCell<Vec<u8>>>,
    }

    impl Write for FlakyWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if *self.failing.borrow() {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            self.written.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}
