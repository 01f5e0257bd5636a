use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rug::Integer;
use thiserror::Error;

use crate::atoms::AtomScanner;
use crate::encoder::CountingFragment;
use crate::{DOMAIN_GUESS_PREFIX, RELATION_GUESS_PREFIX};

pub const COUNT_PREFIX: &str = "s ";
/// A trailing `+` on this line marks an open (bounded) count.
pub const MODELS_PREFIX: &str = "Models       : ";

#[derive(Error, Debug)]
pub enum SolverError {
    #[error("failed to launch counter `{0}`: {1}")]
    Launch(String, #[source] std::io::Error),
    #[error("i/o towards the counter failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("run cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, SolverError>;

/// What the counter reported for one schema. `count` stays `None` when no
/// recognizable count line appeared; the aggregator treats that as a hit
/// bound, not as zero.
#[derive(Debug, Clone, Default)]
pub struct SolverResult {
    pub count: Option<Integer>,
    pub is_bound: bool,
    pub tuples: Vec<Vec<String>>,
}

/// Cooperative cancellation shared between the run loop and the signal
/// handler; cancelling kills and reaps every registered counter.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    children: Mutex<HashMap<u32, Child>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let mut children = self
            .inner
            .children
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for (_, mut child) in children.drain() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }

    fn register(&self, mut child: Child) -> Result<u32> {
        let mut children = self
            .inner
            .children
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if self.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            return Err(SolverError::Cancelled);
        }
        let pid = child.id();
        children.insert(pid, child);
        Ok(pid)
    }

    fn release(&self, pid: u32) -> Option<Child> {
        self.inner
            .children
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&pid)
    }
}

/// Drives one external counter invocation per schema: facts plus fragment
/// on stdin, stdout streamed into a [`SolverResult`].
#[derive(Debug, Clone)]
pub struct Solver {
    program: PathBuf,
    bound: Option<u64>,
    output: bool,
    extensional: bool,
}

impl Solver {
    /// `bound` is `None` for the greedy counter variant, which takes no
    /// positional argument; the regular counter always gets one, a zero
    /// bound included.
    pub fn new(
        program: impl Into<PathBuf>,
        bound: Option<u64>,
        output: bool,
        extensional: bool,
    ) -> Self {
        Self {
            program: program.into(),
            bound,
            output,
            extensional,
        }
    }

    pub fn count(
        &self,
        facts: &str,
        fragment: &CountingFragment,
        cancel: &CancelToken,
    ) -> Result<SolverResult> {
        if cancel.is_cancelled() {
            return Err(SolverError::Cancelled);
        }

        let mut command = Command::new(&self.program);
        if let Some(bound) = self.bound {
            command.arg(bound.to_string());
        }
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| SolverError::Launch(self.program.display().to_string(), err))?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let pid = cancel.register(child)?;

        let outcome = self.talk(facts, fragment, stdin, stdout);

        match cancel.release(pid) {
            Some(mut child) => {
                if outcome.is_err() {
                    let _ = child.kill();
                }
                child.wait()?;
            }
            // reaped by a concurrent cancel, the stream just ended early
            None => return Err(SolverError::Cancelled),
        }
        outcome
    }

    fn talk(
        &self,
        facts: &str,
        fragment: &CountingFragment,
        stdin: Option<impl Write>,
        stdout: Option<impl std::io::Read>,
    ) -> Result<SolverResult> {
        // the pipe must be fully written and closed before reading, or both
        // sides deadlock on buffering
        if let Some(mut stdin) = stdin {
            stdin.write_all(facts.as_bytes())?;
            stdin.write_all(fragment.program.as_bytes())?;
        }

        let mut result = SolverResult::default();
        let prefix = if self.extensional {
            DOMAIN_GUESS_PREFIX
        } else {
            RELATION_GUESS_PREFIX
        };

        if let Some(stdout) = stdout {
            for line in BufReader::new(stdout).lines() {
                let line = line?;
                if let Some(rest) = line.strip_prefix(COUNT_PREFIX) {
                    // only a numeric payload counts; `s SATISFIABLE` and the
                    // like must not clobber an already parsed result
                    if let Ok(count) = Integer::from_str(rest.trim()) {
                        result.count = Some(count);
                    }
                } else if let Some(rest) = line.strip_prefix(MODELS_PREFIX) {
                    let rest = rest.trim();
                    let (digits, is_bound) = match rest.strip_suffix('+') {
                        Some(digits) => (digits, true),
                        None => (rest, false),
                    };
                    if let Ok(count) = Integer::from_str(digits.trim()) {
                        result.count = Some(count);
                        // the bound latches for this schema, a later count
                        // line never clears it
                        result.is_bound |= is_bound;
                    }
                } else if self.output && line.starts_with(prefix) {
                    let tuple = self.decode(&line, fragment, prefix);
                    tracing::info!("{}({})", fragment.label, tuple.join(","));
                    result.tuples.push(tuple);
                }
                // anything else is counter chatter
            }
        }
        Ok(result)
    }

    // one answer-set line of guess atoms becomes a ground-argument tuple
    // aligned to head positions; unreported positions show as `_`
    fn decode(&self, line: &str, fragment: &CountingFragment, prefix: &str) -> Vec<String> {
        let mut values: Vec<Option<String>> = vec![None; fragment.vars.len()];
        for m in AtomScanner::new(line, prefix) {
            if self.extensional {
                // g_<V>(v) reports the value chosen for head variable V
                if let Some(variable) = m.atom.predicate.strip_prefix(DOMAIN_GUESS_PREFIX) {
                    if let (Some(position), Some(term)) =
                        (fragment.vars.position(variable), m.atom.terms.first())
                    {
                        values[position] = Some(term.name().to_owned());
                    }
                }
            } else {
                for (slot, term) in m.atom.terms.iter().enumerate() {
                    if let Some(&position) =
                        fragment.slots.get(&(m.atom.predicate.clone(), slot))
                    {
                        values[position] = Some(term.name().to_owned());
                    }
                }
            }
        }
        values
            .into_iter()
            .map(|v| v.unwrap_or_else(|| "_".to_owned()))
            .collect()
    }
}
