//! Liveness heartbeat consumed by an external health monitor.

use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};

/// Overwrite the heartbeat file with the current timestamp.
pub fn write_heartbeat(path: &Path, now: DateTime<Utc>) -> anyhow::Result<()> {
    std::fs::write(path, format!("{}\n", now.to_rfc3339()))
        .with_context(|| format!("failed to write heartbeat to {}", path.display()))
}
