use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

// Budget and policy defaults. These are knobs, not hard contracts — see
// SPEC_FULL.md §9 (open question on CharsPerToken / context-limit constants).
pub const DEFAULT_CHAT_HISTORY_BUDGET_CHARS: usize = 180_000;
pub const DEFAULT_DIFF_SUMMARY_BUDGET_CHARS: usize = 12_000;
pub const DEFAULT_OUTLINE_BUDGET_CHARS: usize = 20_000;
pub const DEFAULT_TOOL_RESULT_CEILING_CHARS: usize = 8_000;
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_EMBED_BATCH_SIZE: usize = 2048;
pub const RRF_K: f64 = 60.0;

/// Top-level config (`sidekick.toml` + `SIDE_*` env overrides).
///
/// `SIDE_OTEL_ENABLED` / `SIDE_OTEL_ENDPOINT` are intentionally *not* part of
/// this struct: they gate the tracing subscriber itself and must be
/// readable before any config parsing (or its failure) can be logged. See
/// [`crate::trace::otel_enabled`] and [`crate::trace::otel_endpoint`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub budgets: BudgetConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde(default = "default_chat_history_budget")]
    pub chat_history_chars: usize,
    #[serde(default = "default_diff_summary_budget")]
    pub diff_summary_chars: usize,
    #[serde(default = "default_outline_budget")]
    pub outline_chars: usize,
    #[serde(default = "default_tool_result_ceiling")]
    pub tool_result_ceiling_chars: usize,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            chat_history_chars: default_chat_history_budget(),
            diff_summary_chars: default_diff_summary_budget(),
            outline_chars: default_outline_budget(),
            tool_result_ceiling_chars: default_tool_result_ceiling(),
            heartbeat_interval_secs: default_heartbeat_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheConfig {
    /// Override for the embedding cache directory. Defaults to
    /// `<temp dir>/sidekick-embedding-cache` when unset.
    pub embedding_dir: Option<String>,
    /// Override for the trace file directory. Defaults to the process
    /// state home when unset.
    pub trace_dir: Option<String>,
}

fn default_chat_history_budget() -> usize {
    DEFAULT_CHAT_HISTORY_BUDGET_CHARS
}
fn default_diff_summary_budget() -> usize {
    DEFAULT_DIFF_SUMMARY_BUDGET_CHARS
}
fn default_outline_budget() -> usize {
    DEFAULT_OUTLINE_BUDGET_CHARS
}
fn default_tool_result_ceiling() -> usize {
    DEFAULT_TOOL_RESULT_CEILING_CHARS
}
fn default_heartbeat_interval() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL_SECS
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            budgets: BudgetConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl CoreConfig {
    /// Load config from a TOML file with `SIDE_*` env var overrides.
    ///
    /// Checks, in order: explicit path argument, then `SIDE_CONFIG` env var,
    /// then `~/.sidekick/sidekick.toml`. A missing or malformed file is not
    /// fatal — defaults are used and the failure is logged.
    pub fn load(config_path: Option<&str>) -> Self {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("SIDE_CONFIG").ok())
            .unwrap_or_else(default_config_path);

        Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("SIDE_").split("_"))
            .extract()
            .unwrap_or_else(|e| {
                warn!(error = %e, path, "config load failed, using defaults");
                CoreConfig::default()
            })
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.sidekick/sidekick.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = CoreConfig::default();
        assert_eq!(cfg.budgets.chat_history_chars, DEFAULT_CHAT_HISTORY_BUDGET_CHARS);
        assert!(cfg.cache.embedding_dir.is_none());
    }

    #[test]
    fn load_falls_back_to_defaults_when_file_missing() {
        let cfg = CoreConfig::load(Some("/nonexistent/sidekick.toml"));
        assert_eq!(cfg.budgets.outline_chars, DEFAULT_OUTLINE_BUDGET_CHARS);
    }
}
