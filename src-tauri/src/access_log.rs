//! Security access log: one JSON object per line, appended without the
//! database password so failed unlocks are recorded too.
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::error::AppError;
use crate::util::{clamp_string, new_id, now_string, write_text_file};

pub const ACCESS_LOG_FILE: &str = "access_log.jsonl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessEvent {
    Setup,
    Unlock,
    PasswordChange,
    Export,
    Restore,
    Sync,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessRecord {
    pub id: String,
    pub at: String,
    pub event: AccessEvent,
    pub success: bool,
    #[serde(default)]
    pub detail: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AccessFilter {
    pub event: Option<AccessEvent>,
    pub success: Option<bool>,
    pub limit: Option<usize>,
}

pub struct AccessLog<'a> {
    root: &'a Path,
    max_entries: usize,
}

impl<'a> AccessLog<'a> {
    pub fn new(root: &'a Path, max_entries: usize) -> Self {
        Self {
            root,
            max_entries: max_entries.max(1),
        }
    }

    pub fn append(&self, event: AccessEvent, success: bool, detail: &str) -> Result<AccessRecord, AppError> {
        let rec = AccessRecord {
            id: new_id(),
            at: now_string(),
            event,
            success,
            detail: clamp_string(detail, 240, true),
        };
        let path = self.root.join(ACCESS_LOG_FILE);
        fs::create_dir_all(self.root)?;
        let mut f = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut line = serde_json::to_string(&rec)?;
        line.push('\n');
        f.write_all(line.as_bytes())?;
        self.trim()?;
        Ok(rec)
    }

    /// Like `append`, but a write failure is only logged. Used on paths
    /// where the primary operation must not fail because of the log.
    pub fn record(&self, event: AccessEvent, success: bool, detail: &str) {
        if let Err(err) = self.append(event, success, detail) {
            tracing::warn!(?event, error = %err, "access log write failed");
        }
    }

    /// All readable entries, oldest first. Malformed lines are skipped.
    fn read_all(&self) -> Result<Vec<AccessRecord>, AppError> {
        let path = self.root.join(ACCESS_LOG_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(path)?;
        Ok(raw
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str::<AccessRecord>(line).ok())
            .collect())
    }

    fn trim(&self) -> Result<(), AppError> {
        let entries = self.read_all()?;
        if entries.len() <= self.max_entries {
            return Ok(());
        }
        let keep = &entries[entries.len() - self.max_entries..];
        let mut content = String::new();
        for rec in keep {
            content.push_str(serde_json::to_string(rec)?.as_str());
            content.push('\n');
        }
        write_text_file(self.root.join(ACCESS_LOG_FILE), content.as_str())
    }

    /// Newest first.
    pub fn list(&self, filter: &AccessFilter) -> Result<Vec<AccessRecord>, AppError> {
        let limit = filter.limit.unwrap_or(200).max(1);
        Ok(self
            .read_all()?
            .into_iter()
            .rev()
            .filter(|rec| filter.event.map_or(true, |event| rec.event == event))
            .filter(|rec| filter.success.map_or(true, |success| rec.success == success))
            .take(limit)
            .collect())
    }

    /// Failed unlocks since the most recent successful one.
    pub fn failure_streak(&self) -> Result<usize, AppError> {
        Ok(self
            .read_all()?
            .iter()
            .rev()
            .filter(|rec| rec.event == AccessEvent::Unlock)
            .take_while(|rec| !rec.success)
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn entries_list_newest_first_with_filters() {
        let dir = tempfile::tempdir().unwrap();
        let log = AccessLog::new(dir.path(), 100);
        log.append(AccessEvent::Setup, true, "password created").unwrap();
        log.append(AccessEvent::Unlock, false, "").unwrap();
        log.append(AccessEvent::Unlock, true, "").unwrap();

        let all = log.list(&AccessFilter::default()).unwrap();
        let events: Vec<_> = all.iter().map(|rec| (rec.event, rec.success)).collect();
        assert_eq!(
            events,
            vec![
                (AccessEvent::Unlock, true),
                (AccessEvent::Unlock, false),
                (AccessEvent::Setup, true),
            ]
        );

        let failures = log
            .list(&AccessFilter {
                success: Some(false),
                ..AccessFilter::default()
            })
            .unwrap();
        assert_eq!(failures.len(), 1);

        let limited = log
            .list(&AccessFilter {
                event: Some(AccessEvent::Unlock),
                limit: Some(1),
                ..AccessFilter::default()
            })
            .unwrap();
        assert_eq!(limited.len(), 1);
        assert!(limited[0].success);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let log = AccessLog::new(dir.path(), 100);
        log.append(AccessEvent::Export, true, "shoppers.csv").unwrap();
        let path = dir.path().join(ACCESS_LOG_FILE);
        let mut raw = fs::read_to_string(&path).unwrap();
        raw.push_str("{not json\n");
        fs::write(&path, raw).unwrap();
        assert_eq!(log.list(&AccessFilter::default()).unwrap().len(), 1);
    }

    #[test]
    fn file_is_trimmed_to_the_newest_entries() {
        let dir = tempfile::tempdir().unwrap();
        let log = AccessLog::new(dir.path(), 3);
        for n in 0..5 {
            log.append(AccessEvent::Sync, true, format!("run {n}").as_str()).unwrap();
        }
        let details: Vec<String> = log
            .list(&AccessFilter::default())
            .unwrap()
            .into_iter()
            .map(|rec| rec.detail)
            .collect();
        assert_eq!(details, vec!["run 4", "run 3", "run 2"]);
    }

    #[test]
    fn failure_streak_counts_since_last_success() {
        let dir = tempfile::tempdir().unwrap();
        let log = AccessLog::new(dir.path(), 100);
        assert_eq!(log.failure_streak().unwrap(), 0);
        log.append(AccessEvent::Unlock, false, "").unwrap();
        log.append(AccessEvent::Unlock, true, "").unwrap();
        log.append(AccessEvent::Unlock, false, "").unwrap();
        log.append(AccessEvent::Export, true, "").unwrap();
        log.append(AccessEvent::Unlock, false, "").unwrap();
        assert_eq!(log.failure_streak().unwrap(), 2);
    }
}
