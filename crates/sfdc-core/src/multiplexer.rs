use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::stream::EnvelopeStream;
use crate::{Envelope, Error};

/// Completion bookkeeping for one logical stream.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CompletionState {
    /// Sub-sources (objects or topics) that have not finished yet.
    pub pending: usize,
    /// No further sub-sources will be registered.
    pub sealed: bool,
    pub complete: bool,
}

struct Shared {
    output: EnvelopeStream,
    state: Mutex<CompletionState>,
}

impl Shared {
    fn update(&self, f: impl FnOnce(&mut CompletionState)) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut state);
        if state.sealed && state.pending == 0 && !state.complete {
            state.complete = true;
            drop(state);
            self.output.complete();
        }
    }
}

/// Merges many sub-sources into one logical stream.
///
/// Each sub-source emits through its own [`SourceHandle`], so per-source
/// emission order is preserved; nothing is promised across sources. The
/// output completes once the multiplexer is sealed and every handle has
/// finished.
#[derive(Clone)]
pub struct Multiplexer {
    shared: Arc<Shared>,
}

impl Multiplexer {
    pub fn new(output: EnvelopeStream) -> Self {
        Self {
            shared: Arc::new(Shared {
                output,
                state: Mutex::new(CompletionState::default()),
            }),
        }
    }

    pub fn output(&self) -> &EnvelopeStream {
        &self.shared.output
    }

    /// Register a sub-source.
    pub fn source(&self, name: impl Into<String>) -> SourceHandle {
        self.shared.update(|state| state.pending += 1);
        SourceHandle {
            name: name.into(),
            shared: self.shared.clone(),
            finished: false,
        }
    }

    /// Stop accepting sub-sources; completes immediately if none are pending.
    pub fn seal(&self) {
        self.shared.update(|state| state.sealed = true);
    }

    /// Fail the merged stream, e.g. on a configuration problem found after
    /// the stream was handed out.
    pub fn fail(&self, error: Error) {
        self.shared.output.fail(error);
    }

    pub fn completion(&self) -> CompletionState {
        self.shared
            .state
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

/// Producer side of one sub-source. Finishing consumes the handle, so a
/// sub-source signals completion exactly once.
pub struct SourceHandle {
    name: String,
    shared: Arc<Shared>,
    finished: bool,
}

impl SourceHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// See [`EnvelopeStream::emit`].
    pub fn emit(&self, envelope: Envelope) -> bool {
        self.shared.output.emit(envelope)
    }

    pub fn finish(mut self) {
        self.mark_finished();
    }

    /// Fail the whole merged stream. Used for conditions that must end the
    /// run, never for per-object failures.
    pub fn fail(mut self, error: Error) {
        self.shared.output.fail(error);
        self.mark_finished();
    }

    fn mark_finished(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        debug!(source = %self.name, "Sub-source finished");
        self.shared.update(|state| state.pending -= 1);
    }
}

impl Drop for SourceHandle {
    fn drop(&mut self) {
        if !self.finished {
            // Only reachable when the producing task died (panic or abort).
            warn!(source = %self.name, "Sub-source dropped before finishing");
            self.shared.output.fail(Error::Stream(format!(
                "source '{}' stopped without finishing",
                self.name
            )));
            self.mark_finished();
        }
    }
}
