//! Per-request usage log (JSONL).
//!
//! Write failures never fail the request: they are logged, counted, and
//! the fallback hook runs so the cost monitor still sees the charge.

use std::io::Write;
use std::path::PathBuf;

use parking_lot::Mutex;
use serde::Serialize;

use cf_domain::metric::MetricEvent;

#[derive(Debug, Clone, Serialize)]
pub struct UsageRecord {
    pub request_id: String,
    pub user_id: String,
    pub skill: String,
    pub route_label: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub cost_usd: f64,
    pub duration_ms: u64,
    pub success: bool,
}

pub struct UsageLog {
    path: Option<PathBuf>,
    file: Mutex<Option<std::fs::File>>,
}

impl UsageLog {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            file: Mutex::new(None),
        }
    }

    /// Append one record. On failure, runs `fallback` (the cost-monitor
    /// hook) and swallows the error.
    pub fn write(&self, record: &UsageRecord, fallback: impl FnOnce()) {
        match self.try_write(record) {
            Ok(()) => MetricEvent::UsageLogWritesTotal { result: "ok" }.emit(),
            Err(e) => {
                tracing::warn!(error = %e, "usage log write failed");
                MetricEvent::UsageLogWritesTotal { result: "failed" }.emit();
                fallback();
            }
        }
    }

    fn try_write(&self, record: &UsageRecord) -> std::io::Result<()> {
        let Some(path) = &self.path else {
            // No sink configured: treat as success (dev mode).
            return Ok(());
        };
        let mut guard = self.file.lock();
        if guard.is_none() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            *guard = Some(
                std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?,
            );
        }
        let file = guard.as_mut().expect("opened above");
        let line = serde_json::to_string(record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        writeln!(file, "{line}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> UsageRecord {
        UsageRecord {
            request_id: "req-1".into(),
            user_id: "u1".into(),
            skill: "QuerySkill".into(),
            route_label: "primary".into(),
            prompt_tokens: 120,
            completion_tokens: 40,
            cost_usd: 0.0021,
            duration_ms: 310,
            success: true,
        }
    }

    #[test]
    fn writes_jsonl_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage.jsonl");
        let log = UsageLog::new(Some(path.clone()));
        log.write(&record(), || panic!("fallback must not run"));
        log.write(&record(), || panic!("fallback must not run"));

        let raw = std::fs::read_to_string(path).unwrap();
        assert_eq!(raw.lines().count(), 2);
        assert!(raw.contains("\"skill\":\"QuerySkill\""));
    }

    #[test]
    fn failure_invokes_fallback() {
        // Directory path as the file → open fails.
        let dir = tempfile::tempdir().unwrap();
        let log = UsageLog::new(Some(dir.path().to_path_buf()));
        let mut fallback_ran = false;
        log.write(&record(), || fallback_ran = true);
        assert!(fallback_ran);
    }
}
