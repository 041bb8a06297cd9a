use svix_ksuid::{Ksuid, KsuidLike};

/// Generates fresh KSUIDs for content-block keys. Wrapped in a trait so
/// activities can be tested with deterministic ids.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

/// Production id generator: a real, time-sortable KSUID per call.
#[derive(Debug, Default, Clone, Copy)]
pub struct KsuidGenerator;

impl IdGenerator for KsuidGenerator {
    fn next_id(&self) -> String {
        Ksuid::new(None, None).to_string()
    }
}

/// Deterministic id generator for tests: hands out `prefix-0`, `prefix-1`, …
#[derive(Debug, Default)]
pub struct SequentialIdGenerator {
    prefix: String,
    counter: std::sync::atomic::AtomicU64,
}

impl SequentialIdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: std::sync::atomic::AtomicU64::new(0),
        }
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        format!("{}-{n}", self.prefix)
    }
}
