use crate::shared::cancel::CancelToken;
use crate::shared::run_id::RunId;

/// Per-run handle threaded through the router, dispatcher, plan runner
/// and agent loop. Carries the run identity and the cancellation token
/// checked at suspension points.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub cancel: CancelToken,
}

impl RunContext {
    pub fn new(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            cancel: CancelToken::new(),
        }
    }

    pub fn minted() -> Self {
        Self::new(RunId::mint(chrono::Utc::now()).as_str())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
