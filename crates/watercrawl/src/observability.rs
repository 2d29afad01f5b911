use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const DEFAULT_LOG_FILE: &str = "watercrawl.logs.jsonl";

fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

fn observability_enabled() -> bool {
    for key in ["WATERCRAWL_OBSERVABILITY_ENABLED", "WATERCRAWL_OBSERVABILITY"] {
        if let Ok(value) = std::env::var(key) {
            return parse_bool_env(&value).unwrap_or(true);
        }
    }
    true
}

fn resolve_env_filter() -> tracing_subscriber::EnvFilter {
    if let Ok(level) = std::env::var("WATERCRAWL_LOG_LEVEL")
        && let Ok(filter) = tracing_subscriber::EnvFilter::try_new(level)
    {
        return filter;
    }
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

/// Installs the process-wide tracing subscriber once.
///
/// Environment variables:
/// - `WATERCRAWL_OBSERVABILITY_ENABLED` / `WATERCRAWL_OBSERVABILITY`: optional enable/disable flag (default enabled).
/// - `WATERCRAWL_LOG_LEVEL`: optional level/filter override (`info`, `watercrawl=debug`, etc.).
/// - `WATERCRAWL_JSON_LOG_PATH`: optional log file path. If set, logs are JSONL in that file.
///   If unset, logs go to stderr in a compact console format so stdout stays free for results.
/// - `RUST_LOG`: fallback filter.
///
/// Stream tasks run inside a `status_stream` span and scrapes inside a
/// `scrape` span, both carrying `job_id`; JSON lines include the span list.
pub fn init_observability() {
    INIT.get_or_init(|| {
        if !observability_enabled() {
            return;
        }

        let env_filter = resolve_env_filter();
        match std::env::var("WATERCRAWL_JSON_LOG_PATH") {
            Ok(path) => {
                let (dir, file_name) = split_log_path(Path::new(&path));
                let _ = std::fs::create_dir_all(&dir);
                let json_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(false)
                    .with_writer(tracing_appender::rolling::never(dir, file_name));
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(json_layer)
                    .try_init();
            }
            Err(_) => {
                let console_layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr);
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(console_layer)
                    .try_init();
            }
        }
    });
}

/// Splits a log path into the directory to create and the file name to write.
///
/// A bare file name lands in the working directory; a path without a usable
/// file name falls back to `watercrawl.logs.jsonl` inside it.
fn split_log_path(path: &Path) -> (PathBuf, String) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => (dir, name.to_string()),
        None => (path.to_path_buf(), DEFAULT_LOG_FILE.to_string()),
    }
}
