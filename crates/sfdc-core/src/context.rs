use tracing::Span;
use uuid::Uuid;

/// Per-run context handed to every component constructor.
///
/// Components log inside `span` (directly or through child spans) instead
/// of reaching for a process-wide default.
#[derive(Debug, Clone)]
pub struct Context {
    run_id: Uuid,
    span: Span,
}

impl Context {
    pub fn new() -> Self {
        let run_id = Uuid::now_v7();
        let span = tracing::info_span!("sfdc_run", run_id = %run_id);
        Self { run_id, span }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
