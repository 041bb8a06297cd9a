//! Activity execution context (SPEC_FULL.md §5).

use tokio_util::sync::CancellationToken;

/// What an activity receives from its host workflow engine: a cancellation
/// signal and a heartbeat sink. Implemented by the engine integration that
/// hosts this layer; out of scope here beyond the trait boundary.
pub trait ActivityContext: Send + Sync {
    fn cancellation_token(&self) -> &CancellationToken;

    /// Records liveness with the workflow engine. Called at least every
    /// heartbeat interval during long-running activities; absence past the
    /// interval is what the engine uses to detect a stuck worker.
    fn record_heartbeat(&self);
}

/// Records a heartbeat only when an activity context is present; heartbeats
/// are meaningless (and suppressed) outside one, e.g. in plain unit tests.
pub fn heartbeat(ctx: Option<&dyn ActivityContext>) {
    if let Some(ctx) = ctx {
        ctx.record_heartbeat();
    }
}
