use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber for this process.
///
/// Mirrors the ambient convention used throughout this codebase: a `fmt`
/// layer driven by `RUST_LOG`, falling back to an info-level filter scoped
/// to the sidekick crates when unset. Safe to call once per process; a
/// second call is a silent no-op (matches `tracing_subscriber`'s own
/// global-default semantics).
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("sidekick_core=info,sidekick_chat=info,sidekick_rag=info,sidekick_llm=info,sidekick_activities=info"));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
