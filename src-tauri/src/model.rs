//! Record types persisted in the encrypted database file.
//!
//! Everything here round-trips through `serde_json`; field names are the
//! ones the dashboard frontend reads.
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::str::FromStr;

use crate::error::AppError;

pub const DB_VERSION: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingStage {
    #[default]
    Applied,
    Interviewing,
    Offered,
    BackgroundCheck,
    Orientation,
    Active,
    Inactive,
}

impl OnboardingStage {
    pub const ALL: [OnboardingStage; 7] = [
        OnboardingStage::Applied,
        OnboardingStage::Interviewing,
        OnboardingStage::Offered,
        OnboardingStage::BackgroundCheck,
        OnboardingStage::Orientation,
        OnboardingStage::Active,
        OnboardingStage::Inactive,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OnboardingStage::Applied => "applied",
            OnboardingStage::Interviewing => "interviewing",
            OnboardingStage::Offered => "offered",
            OnboardingStage::BackgroundCheck => "background_check",
            OnboardingStage::Orientation => "orientation",
            OnboardingStage::Active => "active",
            OnboardingStage::Inactive => "inactive",
        }
    }
}

/// Lowercases and folds spaces and hyphens to underscores so spreadsheet
/// values like `Background Check` match enum names.
fn normalize_token(value: &str) -> String {
    value
        .trim()
        .to_lowercase()
        .split(|ch: char| ch.is_whitespace() || ch == '-' || ch == '_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

impl FromStr for OnboardingStage {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let token = normalize_token(value);
        OnboardingStage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == token)
            .ok_or_else(|| AppError::invalid(format!("Unknown onboarding stage `{}`.", value.trim())))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OnboardingChecklist {
    pub application_received: bool,
    pub background_cleared: bool,
    pub paperwork_signed: bool,
    pub orientation_completed: bool,
    pub uniform_issued: bool,
}

impl OnboardingChecklist {
    pub fn progress(&self) -> (usize, usize) {
        let items = [
            self.application_received,
            self.background_cleared,
            self.paperwork_signed,
            self.orientation_completed,
            self.uniform_issued,
        ];
        (items.iter().filter(|done| **done).count(), items.len())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shopper {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub stage: OnboardingStage,
    #[serde(default)]
    pub hire_date: Option<NaiveDate>,
    #[serde(default)]
    pub onboarding: OnboardingChecklist,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ShiftStatus {
    #[default]
    Scheduled,
    Worked,
    Late,
    NoShow,
    CalledOut,
}

impl ShiftStatus {
    pub fn label(self) -> &'static str {
        match self {
            ShiftStatus::Scheduled => "Scheduled",
            ShiftStatus::Worked => "Worked",
            ShiftStatus::Late => "Late",
            ShiftStatus::NoShow => "No show",
            ShiftStatus::CalledOut => "Called out",
        }
    }

    /// The shopper turned up, on time or not.
    pub fn attended(self) -> bool {
        matches!(self, ShiftStatus::Worked | ShiftStatus::Late)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shift {
    pub id: String,
    pub shopper_id: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub end: String,
    #[serde(default)]
    pub status: ShiftStatus,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TalkKind {
    #[default]
    Coaching,
    Review,
    Warning,
    Recognition,
}

impl TalkKind {
    pub fn label(self) -> &'static str {
        match self {
            TalkKind::Coaching => "Coaching",
            TalkKind::Review => "Review",
            TalkKind::Warning => "Warning",
            TalkKind::Recognition => "Recognition",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Talk {
    pub id: String,
    pub shopper_id: String,
    pub held_on: NaiveDate,
    #[serde(default)]
    pub kind: TalkKind,
    pub topic: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub outcome: String,
    #[serde(default)]
    pub follow_up_on: Option<NaiveDate>,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditTable {
    Shoppers,
    Shifts,
    Talks,
}

impl AuditTable {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditTable::Shoppers => "shoppers",
            AuditTable::Shifts => "shifts",
            AuditTable::Talks => "talks",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSource {
    #[default]
    Dashboard,
    SheetSync,
    Restore,
}

/// Rows that were removed together with the audited record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AuditChildren {
    pub shifts: Vec<serde_json::Value>,
    pub talks: Vec<serde_json::Value>,
}

impl AuditChildren {
    pub fn is_empty(&self) -> bool {
        self.shifts.is_empty() && self.talks.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub table: AuditTable,
    pub record_id: String,
    pub action: AuditAction,
    #[serde(default)]
    pub before: Option<serde_json::Value>,
    #[serde(default)]
    pub after: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "AuditChildren::is_empty")]
    pub children: AuditChildren,
    #[serde(default)]
    pub source: ChangeSource,
    pub at: String,
    #[serde(default)]
    pub restored_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SyncRowError {
    pub row: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SyncReport {
    pub rows_read: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub errors: Vec<SyncRowError>,
    pub ran_at: String,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Database {
    pub version: u8,
    pub shoppers: Vec<Shopper>,
    pub shifts: Vec<Shift>,
    pub talks: Vec<Talk>,
    pub audit_logs: Vec<AuditEntry>,
    pub last_sync: Option<SyncReport>,
}

impl Default for Database {
    fn default() -> Self {
        Self {
            version: DB_VERSION,
            shoppers: Vec::new(),
            shifts: Vec::new(),
            talks: Vec::new(),
            audit_logs: Vec::new(),
            last_sync: None,
        }
    }
}

impl Database {
    pub fn shopper(&self, id: &str) -> Option<&Shopper> {
        self.shoppers.iter().find(|shopper| shopper.id == id)
    }

    pub fn shopper_mut(&mut self, id: &str) -> Option<&mut Shopper> {
        self.shoppers.iter_mut().find(|shopper| shopper.id == id)
    }

    pub fn has_shopper(&self, id: &str) -> bool {
        self.shopper(id).is_some()
    }
}

const ARRAY_TABLES: [&str; 4] = ["shoppers", "shifts", "talks", "audit_logs"];

/// Repairs the top-level shape of a decrypted database so typed
/// deserialisation does not fail on a single wrong-typed collection.
pub fn ensure_db_shape_value(value: serde_json::Value) -> serde_json::Value {
    let mut out = if value.is_object() {
        value
    } else {
        json!({})
    };
    let Some(obj) = out.as_object_mut() else {
        return json!({ "version": DB_VERSION });
    };
    if !obj.get("version").is_some_and(|v| v.is_u64()) {
        obj.insert("version".to_string(), json!(DB_VERSION));
    }
    for table in ARRAY_TABLES {
        if !obj.get(table).is_some_and(|v| v.is_array()) {
            obj.insert(table.to_string(), json!([]));
        }
    }
    if !obj
        .get("last_sync")
        .is_some_and(|v| v.is_object() || v.is_null())
    {
        obj.insert("last_sync".to_string(), serde_json::Value::Null);
    }
    out
}

/// Returns `(code, message)` for the first integrity problem found.
pub fn validate_db(db: &Database) -> Option<(String, String)> {
    if db.version > DB_VERSION {
        return Some((
            "broken".to_string(),
            "Database version is newer than this app supports.".to_string(),
        ));
    }
    let mut ids = HashSet::new();
    for shopper in &db.shoppers {
        if shopper.id.trim().is_empty() {
            return Some(("broken".to_string(), "Shopper IDs are invalid.".to_string()));
        }
        if !ids.insert(shopper.id.as_str()) {
            return Some((
                "broken".to_string(),
                format!("Shopper ID {} is duplicated.", shopper.id),
            ));
        }
    }
    for shift in &db.shifts {
        if shift.id.trim().is_empty() {
            return Some(("broken".to_string(), "Shift IDs are invalid.".to_string()));
        }
        if !ids.contains(shift.shopper_id.as_str()) {
            return Some((
                "orphan".to_string(),
                format!("Shift {} references a missing shopper.", shift.id),
            ));
        }
    }
    for talk in &db.talks {
        if talk.id.trim().is_empty() {
            return Some(("broken".to_string(), "Talk IDs are invalid.".to_string()));
        }
        if !ids.contains(talk.shopper_id.as_str()) {
            return Some((
                "orphan".to_string(),
                format!("Talk {} references a missing shopper.", talk.id),
            ));
        }
    }
    None
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn shopper(id: &str, name: &str) -> Shopper {
        Shopper {
            id: id.to_string(),
            name: name.to_string(),
            email: String::new(),
            phone: String::new(),
            branch: String::new(),
            stage: OnboardingStage::Applied,
            hire_date: None,
            onboarding: OnboardingChecklist::default(),
            notes: String::new(),
            created_at: "2024-01-01T00:00:00.000Z".to_string(),
            updated_at: "2024-01-01T00:00:00.000Z".to_string(),
        }
    }

    pub fn shift(id: &str, shopper_id: &str, date: &str, status: ShiftStatus) -> Shift {
        Shift {
            id: id.to_string(),
            shopper_id: shopper_id.to_string(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            start: "9:00".to_string(),
            end: "17:00".to_string(),
            status,
            notes: String::new(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    pub fn talk(id: &str, shopper_id: &str, held_on: &str, kind: TalkKind) -> Talk {
        Talk {
            id: id.to_string(),
            shopper_id: shopper_id.to_string(),
            held_on: NaiveDate::parse_from_str(held_on, "%Y-%m-%d").unwrap(),
            kind,
            topic: "Check-in".to_string(),
            notes: String::new(),
            outcome: String::new(),
            follow_up_on: None,
            author: String::new(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }
}
