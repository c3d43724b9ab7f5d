//! Append-only human-readable run log. One entry per phase completion,
//! written to `logs/AUTONOMOUS_RUN_<utc_ts>.log`.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

/// Builds the log file path for a run started at `started_at`.
pub fn log_path(logs_dir: &Path, started_at: DateTime<Utc>) -> PathBuf {
    logs_dir.join(format!("AUTONOMOUS_RUN_{}.log", started_at.format("%Y%m%dT%H%M%SZ")))
}

/// Appends one timestamped line to the run log. Creates the file and parent
/// directories on first write.
pub fn append_line(log_path: &Path, line: &str) -> Result<(), String> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| format!("failed to create {}: {}", parent.display(), e))?;
    }

    let mut file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(log_path)
        .map_err(|e| format!("failed to open {}: {}", log_path.display(), e))?;

    writeln!(file, "{} | {}", Utc::now().to_rfc3339(), line)
        .map_err(|e| format!("failed to write {}: {}", log_path.display(), e))?;
    Ok(())
}

/// Appends one remedy record to `logs/REMEDY_LIST.txt`:
/// `<iso_ts> | <phase_id> | <reason>`.
pub fn append_remedy(logs_dir: &Path, phase_id: &str, reason: &str) -> Result<(), String> {
    let path = logs_dir.join("REMEDY_LIST.txt");
    std::fs::create_dir_all(logs_dir).map_err(|e| format!("failed to create {}: {}", logs_dir.display(), e))?;

    let mut file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(&path)
        .map_err(|e| format!("failed to open {}: {}", path.display(), e))?;

    writeln!(file, "{} | {} | {}", Utc::now().to_rfc3339(), phase_id, reason)
        .map_err(|e| format!("failed to write {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_path_embeds_utc_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let started = DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z").unwrap().with_timezone(&Utc);
        let path = log_path(dir.path(), started);
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), "AUTONOMOUS_RUN_20260102T030405Z.log");
    }

    #[test]
    fn append_line_creates_file_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");
        append_line(&path, "phase intake started").unwrap();
        append_line(&path, "phase intake finished").unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("phase intake started"));
    }

    #[test]
    fn append_remedy_formats_pipe_separated_record() {
        let dir = tempfile::tempdir().unwrap();
        append_remedy(dir.path(), "literature", "provider unavailable").unwrap();
        let contents = std::fs::read_to_string(dir.path().join("REMEDY_LIST.txt")).unwrap();
        assert!(contents.contains(" | literature | provider unavailable"));
    }
}
