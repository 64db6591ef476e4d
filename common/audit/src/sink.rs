use std::io::Write;
use std::sync::Mutex;

use chrono::Utc;
use tracing::warn;

use crate::model::AuditEntry;

/// Append-only journal writing one JSON object per line. A disabled
/// sink drops every entry.
pub struct AuditSink {
    enabled: bool,
    out: Mutex<Box<dyn Write + Send>>,
}

impl AuditSink {
    pub fn new(enabled: bool, out: Box<dyn Write + Send>) -> Self {
        Self {
            enabled,
            out: Mutex::new(out),
        }
    }

    pub fn stdout(enabled: bool) -> Self {
        Self::new(enabled, Box::new(std::io::stdout()))
    }

    pub fn disabled() -> Self {
        Self::new(false, Box::new(std::io::sink()))
    }

    /// Appends the entry. The timestamp is assigned in UTC while the
    /// writer lock is held, so lines stay monotonic per sink.
    pub fn record(&self, mut entry: AuditEntry) {
        if !self.enabled {
            return;
        }
        let mut out = match self.out.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entry.time = Utc::now();
        let mut line = match serde_json::to_vec(&entry) {
            Ok(line) => line,
            Err(err) => {
                warn!(%err, "failed to serialize audit entry");
                return;
            }
        };
        line.push(b'\n');
        if let Err(err) = out.write_all(&line) {
            warn!(%err, "failed to append audit entry");
        }
    }
}
