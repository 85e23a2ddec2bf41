use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::{Envelope, Error, Result};

/// Terminal-or-not state of a logical stream.
#[derive(Debug, Clone)]
pub enum StreamState {
    Open,
    Completed,
    Failed(Arc<Error>),
}

impl StreamState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamState::Open)
    }
}

/// What a subscriber observes, in emission order.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Envelope(Arc<Envelope>),
    Completed,
    Failed(Arc<Error>),
}

struct Inner {
    name: String,
    // Emits, terminal transitions and new subscriptions all go through this lock.
    subscribers: Mutex<Vec<mpsc::UnboundedSender<StreamEvent>>>,
    state: watch::Sender<StreamState>,
}

/// One logical output stream (bulk results or change events).
///
/// Single producer side, any number of independent subscribers. Each
/// subscriber owns an unbounded queue: a slow subscriber accumulates a
/// backlog but never loses envelopes and never slows the producer or its
/// siblings. When `emit` returns, the envelope is queued for every live
/// subscriber. Subscribers only see what is emitted after they subscribed;
/// the terminal state is visible to everyone.
#[derive(Clone)]
pub struct EnvelopeStream {
    inner: Arc<Inner>,
}

impl EnvelopeStream {
    pub fn new(name: impl Into<String>) -> Self {
        let (state, _) = watch::channel(StreamState::Open);
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                subscribers: Mutex::new(Vec::new()),
                state,
            }),
        }
    }

    /// A stream that was never started; it is complete from the outset.
    pub fn completed(name: impl Into<String>) -> Self {
        let stream = Self::new(name);
        stream.complete();
        stream
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> StreamState {
        self.inner.state.borrow().clone()
    }

    /// Number of subscribers still receiving.
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.lock();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }

    /// Append an envelope. Returns false when the stream is already
    /// terminal and the envelope was discarded.
    pub fn emit(&self, envelope: Envelope) -> bool {
        let mut subscribers = self.lock();
        if self.inner.state.borrow().is_terminal() {
            debug!(stream = %self.inner.name, "Discarding {}/{} after stream end", envelope.kind, envelope.name);
            return false;
        }
        // No subscribers is not an error for a hot stream.
        let event = StreamEvent::Envelope(Arc::new(envelope));
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        true
    }

    /// Mark the stream complete. Only the first terminal transition counts.
    pub fn complete(&self) -> bool {
        self.finish(StreamState::Completed, StreamEvent::Completed)
    }

    /// Fail the stream. Only the first terminal transition counts.
    pub fn fail(&self, error: Error) -> bool {
        let error = Arc::new(error);
        self.finish(StreamState::Failed(error.clone()), StreamEvent::Failed(error))
    }

    fn finish(&self, state: StreamState, event: StreamEvent) -> bool {
        let mut subscribers = self.lock();
        let changed = self.inner.state.send_if_modified(|current| {
            if current.is_terminal() {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            for tx in subscribers.drain(..) {
                let _ = tx.send(event.clone());
            }
        }
        changed
    }

    pub fn subscribe(&self) -> Subscription {
        let mut subscribers = self.lock();
        let (tx, rx) = mpsc::unbounded_channel();
        let ended = match &*self.inner.state.borrow() {
            StreamState::Open => {
                subscribers.push(tx);
                None
            }
            StreamState::Completed => Some(StreamEvent::Completed),
            StreamState::Failed(e) => Some(StreamEvent::Failed(e.clone())),
        };
        Subscription {
            events: rx,
            ended,
            done: false,
        }
    }

    /// Resolve when the stream completes; error with its failure otherwise.
    pub async fn wait(&self) -> Result<()> {
        let mut state = self.inner.state.subscribe();
        loop {
            match &*state.borrow_and_update() {
                StreamState::Open => {}
                StreamState::Completed => return Ok(()),
                StreamState::Failed(e) => {
                    return Err(Error::StreamFailed {
                        stream: self.inner.name.clone(),
                        source: e.clone(),
                    })
                }
            }
            // The sender lives in `self`, so this only fails if it is torn down.
            if state.changed().await.is_err() {
                return Err(Error::Stream(format!("{} stream closed", self.inner.name)));
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<StreamEvent>>> {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for EnvelopeStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeStream")
            .field("name", &self.inner.name)
            .field("state", &*self.inner.state.borrow())
            .finish()
    }
}

/// One subscriber's view of an [`EnvelopeStream`].
pub struct Subscription {
    events: mpsc::UnboundedReceiver<StreamEvent>,
    ended: Option<StreamEvent>,
    done: bool,
}

impl Subscription {
    /// Next event; `None` after the terminal event has been returned.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        if self.done {
            return None;
        }
        if let Some(event) = self.ended.take() {
            self.done = true;
            return Some(event);
        }
        match self.events.recv().await {
            Some(event) => {
                if matches!(event, StreamEvent::Completed | StreamEvent::Failed(_)) {
                    self.done = true;
                }
                Some(event)
            }
            None => {
                self.done = true;
                None
            }
        }
    }

    /// Drain until the stream ends; returns the envelopes seen and the
    /// terminal state.
    pub async fn collect(mut self) -> (Vec<Arc<Envelope>>, StreamState) {
        let mut envelopes = Vec::new();
        let mut state = StreamState::Completed;
        while let Some(event) = self.recv().await {
            match event {
                StreamEvent::Envelope(envelope) => envelopes.push(envelope),
                StreamEvent::Completed => {}
                StreamEvent::Failed(e) => state = StreamState::Failed(e),
            }
        }
        (envelopes, state)
    }
}
