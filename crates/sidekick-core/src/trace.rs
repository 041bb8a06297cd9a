//! Daily-rotating local trace export, used when no OTLP endpoint is
//! configured. See SPEC_FULL.md §4.O / §6.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{NaiveDate, Utc};
use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing::warn;

use crate::error::{CoreError, Result};

const RETAINED_FILES: usize = 7;
const FILE_PREFIX: &str = "traces-";
const FILE_SUFFIX: &str = ".json";

/// Returns whether traces should flow to OTLP export rather than the local
/// rotating file. Default `true` unless `SIDE_OTEL_ENABLED` is `false`/`0`
/// (case-insensitive).
pub fn otel_enabled() -> bool {
    match std::env::var("SIDE_OTEL_ENABLED") {
        Ok(v) => !matches!(v.to_ascii_lowercase().as_str(), "false" | "0"),
        Err(_) => true,
    }
}

/// The configured OTLP gRPC endpoint, or `None` if unset/empty — in which
/// case traces are written to the local rotating file instead.
pub fn otel_endpoint() -> Option<String> {
    std::env::var("SIDE_OTEL_ENDPOINT")
        .ok()
        .filter(|s| !s.is_empty())
}

/// Whether this process should export to the local rotating file (as
/// opposed to an external OTLP pipeline this layer does not implement).
pub fn should_export_locally() -> bool {
    !otel_enabled() || otel_endpoint().is_none()
}

struct WriterState {
    dir: PathBuf,
    date: Option<NaiveDate>,
    file: Option<File>,
}

/// Process-wide, mutex-guarded daily-rotating trace writer.
pub struct TraceWriter {
    state: Mutex<WriterState>,
}

impl TraceWriter {
    fn new(dir: PathBuf) -> Self {
        Self {
            state: Mutex::new(WriterState { dir, date: None, file: None }),
        }
    }

    /// Append a trace record, rotating the underlying file if the UTC date
    /// has changed since the last write. Rotation and the write itself are
    /// atomic under the same mutex, so no record is lost or duplicated
    /// across a rotation boundary.
    pub fn record<T: Serialize>(&self, record: &T) -> Result<()> {
        let mut guard = self.state.lock().expect("trace writer mutex poisoned");
        let today = Utc::now().date_naive();

        if guard.date != Some(today) {
            self.rotate(&mut guard, today)?;
        }

        let line = serde_json::to_string(record)?;
        let file = guard.file.as_mut().expect("rotate always sets a file");
        file.write_all(line.as_bytes())
            .and_then(|()| file.write_all(b"\n"))
            .map_err(|e| CoreError::Storage(e.to_string()))
    }

    fn rotate(&self, guard: &mut WriterState, today: NaiveDate) -> Result<()> {
        fs::create_dir_all(&guard.dir)?;
        let path = guard.dir.join(file_name(today));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| CoreError::Storage(e.to_string()))?;

        guard.file = Some(file);
        guard.date = Some(today);

        if let Err(e) = prune_old_traces(&guard.dir) {
            warn!(error = %e, "failed to prune old trace files");
        }

        Ok(())
    }
}

fn file_name(date: NaiveDate) -> String {
    format!("{FILE_PREFIX}{}{FILE_SUFFIX}", date.format("%Y-%m-%d"))
}

/// Keep only the `RETAINED_FILES` alphabetically-newest trace files — given
/// the `traces-YYYY-MM-DD.json` naming, alphabetical order is chronological.
fn prune_old_traces(dir: &Path) -> std::io::Result<()> {
    let mut names: Vec<String> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|n| n.starts_with(FILE_PREFIX) && n.ends_with(FILE_SUFFIX))
        .collect();
    names.sort();

    if names.len() > RETAINED_FILES {
        for name in &names[..names.len() - RETAINED_FILES] {
            let _ = fs::remove_file(dir.join(name));
        }
    }
    Ok(())
}

static GLOBAL: OnceCell<TraceWriter> = OnceCell::new();

/// Initialize the process-wide trace writer. Idempotent: subsequent calls
/// are no-ops so long as they don't race the first call (matches the
/// teardown contract in SPEC_FULL.md §9 — one global instance per process).
pub fn init_global(dir: PathBuf) {
    let _ = GLOBAL.set(TraceWriter::new(dir));
}

/// Access the process-wide trace writer. Returns `None` if `init_global`
/// was never called.
pub fn global() -> Option<&'static TraceWriter> {
    GLOBAL.get()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rotation_is_keyed_on_date_and_retention_caps_at_seven() {
        let dir = tempfile::tempdir().unwrap();
        let writer = TraceWriter::new(dir.path().to_path_buf());

        // Simulate 10 distinct days by writing directly through rotate().
        for day in 1..=10u32 {
            let date = NaiveDate::from_ymd_opt(2026, 1, day).unwrap();
            let mut guard = writer.state.lock().unwrap();
            writer.rotate(&mut guard, date).unwrap();
            drop(guard);
            writer.record(&json!({"day": day})).unwrap();
        }

        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        names.sort();
        assert_eq!(names.len(), RETAINED_FILES);
        assert_eq!(names[0], "traces-2026-01-04.json");
        assert_eq!(names[6], "traces-2026-01-10.json");
    }

    #[test]
    fn otel_enabled_defaults_true() {
        std::env::remove_var("SIDE_OTEL_ENABLED");
        assert!(otel_enabled());
    }
}
