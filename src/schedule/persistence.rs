use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schedule::other::OtherJobRecord;
use crate::schedule::periodic::HeatingJobRecord;

/// The saved schedule: heating programs first, then everything else.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScheduleFile {
    pub heating_jobs: Vec<HeatingJobRecord>,
    pub other_jobs: Vec<OtherJobRecord>,
}

/// Entries are kept raw so that one bad entry doesn't take the whole group down with it.
#[derive(Deserialize)]
struct RawScheduleFile {
    #[serde(default)]
    heating_jobs: Vec<Value>,
    #[serde(default)]
    other_jobs: Vec<Value>,
}

impl ScheduleFile {
    /// Fails only if the document itself is unreadable. Malformed entries are logged and skipped.
    pub fn load_str(s: &str) -> Result<Self, String> {
        let raw: RawScheduleFile = serde_json::from_str(s).map_err(|e| format!("Invalid schedule document: {}", e))?;
        Ok(Self {
            heating_jobs: parse_entries("heating job", raw.heating_jobs),
            other_jobs: parse_entries("other job", raw.other_jobs),
        })
    }

    /// A missing file is an empty schedule.
    pub fn load(path: &Path) -> Result<Self, String> {
        match fs::read_to_string(path) {
            Ok(s) => Self::load_str(&s),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No schedule at {:?}, starting empty", path);
                Ok(Self::default())
            }
            Err(e) => Err(format!("Failed to read {:?}: {}", path, e)),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), String> {
        let json = serde_json::to_string_pretty(self).map_err(|e| format!("Failed to serialize schedule: {}", e))?;
        fs::write(path, json).map_err(|e| format!("Failed to write {:?}: {}", path, e))
    }
}

fn parse_entries<T: DeserializeOwned>(what: &str, entries: Vec<Value>) -> Vec<T> {
    entries
        .into_iter()
        .enumerate()
        .filter_map(|(i, entry)| match serde_json::from_value(entry.clone()) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Skipping {} {} ({}): {}", what, i, entry, e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::other::OtherTask;

    #[test_log::test]
    fn skips_bad_entries() {
        let json = r#"{
            "heating_jobs": [
                {"day_interval": 1, "at": "06:30:00", "duration": "2:00:00", "temperature": 21.5},
                {"day_interval": 1, "at": "18:00:00"},
                {"day_interval": "daily", "at": "20:00:00", "duration": "1:00:00"}
            ],
            "other_jobs": [
                {"interval": 1, "unit": "days", "at": "08:00", "task": "status_report"},
                {"interval": 1, "unit": "days", "task": "make_tea"}
            ]
        }"#;
        let file = ScheduleFile::load_str(json).expect("Document is valid");
        assert_eq!(file.heating_jobs.len(), 1);
        assert_eq!(file.heating_jobs[0].at, "06:30:00");
        assert_eq!(file.other_jobs.len(), 1);
        assert_eq!(file.other_jobs[0].task, OtherTask::StatusReport);
    }

    #[test_log::test]
    fn missing_groups_are_empty() {
        assert_eq!(ScheduleFile::load_str("{}"), Ok(ScheduleFile::default()));
        assert!(ScheduleFile::load_str("[1, 2").is_err());
    }

    #[test_log::test]
    fn shipped_schedule_loads() {
        let file = ScheduleFile::load(Path::new("heating_schedule.json")).expect("Should read");
        assert_eq!(file.heating_jobs.len(), 2);
        assert_eq!(file.other_jobs.len(), 1);

        let missing = ScheduleFile::load(Path::new("test/does_not_exist.json")).expect("Missing is empty");
        assert_eq!(missing, ScheduleFile::default());
    }

    #[test_log::test]
    fn save_and_load() {
        let file = ScheduleFile {
            heating_jobs: vec![HeatingJobRecord {
                day_interval: 2,
                at: "07:15:00".to_owned(),
                duration: "0:45:00".to_owned(),
                temperature: None,
                hysteresis: Some(0.3),
                created_by: None,
            }],
            other_jobs: vec![],
        };
        let path = std::env::temp_dir().join(format!("heating_schedule_test_{}.json", std::process::id()));
        file.save(&path).expect("Should write");
        let reloaded = ScheduleFile::load(&path).expect("Should read back");
        let _ = fs::remove_file(&path);
        assert_eq!(reloaded, file);
    }
}
