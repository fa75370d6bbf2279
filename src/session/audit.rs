use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::{json, Value};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::error;

/// Append-only audit trail for one session, one JSON object per line.
///
/// A failed initialization is fatal to session start; a failed write falls
/// back to the process log so the event is not lost entirely.
pub struct AuditLogger {
    path: PathBuf,
}

impl AuditLogger {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create audit log directory: {}", dir.display()))?;
        }

        // Touch the file so append failures surface at session start.
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to initialize audit log: {}", path.display()))?;

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one audit entry. `details` fields are merged into the entry.
    pub fn log(&self, action: &str, details: Value) {
        let mut entry = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "action": action,
        });

        if let (Some(entry_map), Value::Object(detail_map)) = (entry.as_object_mut(), details) {
            for (k, v) in detail_map {
                entry_map.insert(k, v);
            }
        }

        if let Err(e) = self.append_line(&entry) {
            error!("Failed to write audit log entry {}: {}", entry, e);
        }
    }

    fn append_line(&self, entry: &Value) -> Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        writeln!(file, "{}", entry)?;
        Ok(())
    }
}
