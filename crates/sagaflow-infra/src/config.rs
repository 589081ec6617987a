//! Saga options loader.
//!
//! Reads a TOML file into [`SagaOptions`]. Falls back to the defaults when
//! the file is missing or malformed, so a bad config never stops a saga from
//! running.

use std::path::Path;

use sagaflow_types::config::SagaOptions;

/// Load saga options from the TOML file at `path`.
///
/// - If the file does not exist, returns [`SagaOptions::default()`].
/// - If the file cannot be read or parsed, logs a warning and returns the default.
/// - Otherwise returns the parsed options; keys left out keep their defaults.
pub async fn load_saga_options(path: &Path) -> SagaOptions {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No saga config found at {}, using defaults", path.display());
            return SagaOptions::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return SagaOptions::default();
        }
    };

    match toml::from_str::<SagaOptions>(&content) {
        Ok(options) => {
            tracing::debug!(path = %path.display(), ?options, "loaded saga options");
            options
        }
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            SagaOptions::default()
        }
    }
}
