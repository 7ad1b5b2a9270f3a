use chrono::{Duration, NaiveDate};
use serde::Serialize;
use serde_json::json;

use crate::error::AppError;
use crate::model::{Database, OnboardingStage, Shift, SyncReport, Talk};
use crate::util::{clamp_string, format_hours, js_like_value_string, sanitize_filename, span_minutes};

const TABLE_ORDER: [&str; 4] = ["shoppers", "shifts", "talks", "audit_logs"];
const SHOPPER_COLUMNS: [&str; 11] = [
    "id",
    "name",
    "email",
    "phone",
    "branch",
    "stage",
    "hire_date",
    "onboarding",
    "notes",
    "created_at",
    "updated_at",
];
const SHIFT_COLUMNS: [&str; 9] = [
    "id",
    "shopper",
    "date",
    "start",
    "end",
    "hours",
    "status",
    "notes",
    "updated_at",
];
const TALK_COLUMNS: [&str; 10] = [
    "id",
    "shopper",
    "held_on",
    "kind",
    "topic",
    "notes",
    "outcome",
    "follow_up_on",
    "author",
    "updated_at",
];
const AUDIT_COLUMNS: [&str; 7] = [
    "id",
    "at",
    "table",
    "record_id",
    "action",
    "source",
    "restored_at",
];
const EXPORT_ROW_LIMIT: usize = 50_000;
const RECENT_TALKS: usize = 5;
const UPCOMING_DAYS: i64 = 7;

#[derive(Debug, Serialize, PartialEq)]
pub struct TableInfo {
    pub id: String,
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct TableData {
    pub id: String,
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Value>,
}

fn table_display_name(table_id: &str) -> &'static str {
    match table_id {
        "shoppers" => "Shoppers",
        "shifts" => "Shifts",
        "talks" => "Talks",
        "audit_logs" => "Audit Log",
        _ => "Unknown",
    }
}

fn table_count(db: &Database, table_id: &str) -> usize {
    match table_id {
        "shoppers" => db.shoppers.len(),
        "shifts" => db.shifts.len(),
        "talks" => db.talks.len(),
        "audit_logs" => db.audit_logs.len(),
        _ => 0,
    }
}

pub fn list_tables(db: &Database) -> Vec<TableInfo> {
    TABLE_ORDER
        .iter()
        .map(|table_id| TableInfo {
            id: table_id.to_string(),
            name: table_display_name(table_id).to_string(),
            count: table_count(db, table_id),
        })
        .collect()
}

fn shopper_name(db: &Database, id: &str) -> String {
    db.shopper(id)
        .map(|shopper| shopper.name.clone())
        .unwrap_or_default()
}

fn shopper_rows(db: &Database) -> Vec<serde_json::Value> {
    db.shoppers
        .iter()
        .map(|shopper| {
            let (done, total) = shopper.onboarding.progress();
            json!({
                "__rowId": shopper.id,
                "id": shopper.id,
                "name": shopper.name,
                "email": shopper.email,
                "phone": shopper.phone,
                "branch": shopper.branch,
                "stage": shopper.stage.as_str(),
                "hire_date": shopper.hire_date.map(|d| d.to_string()).unwrap_or_default(),
                "onboarding": format!("{done}/{total}"),
                "notes": shopper.notes,
                "created_at": shopper.created_at,
                "updated_at": shopper.updated_at,
            })
        })
        .collect()
}

fn shift_rows(db: &Database) -> Vec<serde_json::Value> {
    db.shifts
        .iter()
        .map(|shift| {
            let minutes = if shift.status.attended() {
                span_minutes(shift.start.as_str(), shift.end.as_str())
            } else {
                None
            };
            json!({
                "__rowId": shift.id,
                "id": shift.id,
                "shopper": shopper_name(db, shift.shopper_id.as_str()),
                "date": shift.date.to_string(),
                "start": shift.start,
                "end": shift.end,
                "hours": format_hours(minutes),
                "status": shift.status.label(),
                "notes": shift.notes,
                "updated_at": shift.updated_at,
            })
        })
        .collect()
}

fn talk_rows(db: &Database) -> Vec<serde_json::Value> {
    db.talks
        .iter()
        .map(|talk| {
            json!({
                "__rowId": talk.id,
                "id": talk.id,
                "shopper": shopper_name(db, talk.shopper_id.as_str()),
                "held_on": talk.held_on.to_string(),
                "kind": talk.kind.label(),
                "topic": talk.topic,
                "notes": talk.notes,
                "outcome": talk.outcome,
                "follow_up_on": talk.follow_up_on.map(|d| d.to_string()).unwrap_or_default(),
                "author": talk.author,
                "updated_at": talk.updated_at,
            })
        })
        .collect()
}

fn audit_rows(db: &Database) -> Vec<serde_json::Value> {
    db.audit_logs
        .iter()
        .rev()
        .map(|entry| {
            json!({
                "__rowId": entry.id,
                "id": entry.id,
                "at": entry.at,
                "table": entry.table.as_str(),
                "record_id": entry.record_id,
                "action": entry.action,
                "source": entry.source,
                "restored_at": entry.restored_at.clone().unwrap_or_default(),
            })
        })
        .collect()
}

fn columns(names: &[&str]) -> Vec<String> {
    names.iter().map(|v| (*v).to_string()).collect()
}

pub fn get_table(db: &Database, table_id: &str) -> Result<TableData, AppError> {
    let table_id = table_id.trim();
    let (cols, rows) = match table_id {
        "shoppers" => (columns(&SHOPPER_COLUMNS), shopper_rows(db)),
        "shifts" => (columns(&SHIFT_COLUMNS), shift_rows(db)),
        "talks" => (columns(&TALK_COLUMNS), talk_rows(db)),
        "audit_logs" => (columns(&AUDIT_COLUMNS), audit_rows(db)),
        _ => return Err(AppError::not_found("tables", table_id)),
    };
    Ok(TableData {
        id: table_id.to_string(),
        name: table_display_name(table_id).to_string(),
        columns: cols,
        rows,
    })
}

/// Spreadsheet apps evaluate cells starting with these characters.
pub(crate) fn should_neutralize_csv(value: &str) -> bool {
    let trimmed = value.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('\'') {
        return false;
    }
    matches!(
        trimmed.chars().next(),
        Some('=') | Some('+') | Some('-') | Some('@')
    )
}

fn neutralize_csv_formula(value: &str) -> String {
    if should_neutralize_csv(value) {
        format!("'{value}")
    } else {
        value.to_string()
    }
}

fn csv_escape(value: &str) -> String {
    let safe = neutralize_csv_formula(value);
    if safe.contains(',') || safe.contains('"') || safe.contains('\n') || safe.contains('\r') {
        format!("\"{}\"", safe.replace('"', "\"\""))
    } else {
        safe
    }
}

pub fn rows_to_csv(columns: &[String], rows: &[serde_json::Value]) -> String {
    let mut lines: Vec<String> = Vec::new();
    if !columns.is_empty() {
        lines.push(
            columns
                .iter()
                .map(|col| csv_escape(col.as_str()))
                .collect::<Vec<_>>()
                .join(","),
        );
    }
    for row in rows {
        let line = columns
            .iter()
            .map(|column| {
                let value = row.as_object().and_then(|obj| obj.get(column));
                csv_escape(js_like_value_string(value).as_str())
            })
            .collect::<Vec<_>>()
            .join(",");
        lines.push(line);
    }
    lines.join("\n")
}

fn sanitize_export_filename(value: &str) -> String {
    let trimmed = clamp_string(value, 255, true);
    let safe = sanitize_filename(trimmed.as_str(), "shopper-hub-export.csv");
    if safe.to_lowercase().ends_with(".csv") {
        safe
    } else {
        format!("{safe}.csv")
    }
}

fn sanitize_export_columns(columns: &[String]) -> Vec<String> {
    columns
        .iter()
        .map(|entry| clamp_string(entry.as_str(), 80, false))
        .filter(|entry| !entry.is_empty() && entry != "__rowId")
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CsvExport {
    pub filename: String,
    pub content: String,
    pub rows: usize,
}

/// Renders viewer rows as CSV. Without explicit columns, the keys of the
/// first row are used.
pub fn export_csv(filename: &str, columns: &[String], rows: &[serde_json::Value]) -> CsvExport {
    let filename = sanitize_export_filename(filename);
    let mut columns = sanitize_export_columns(columns);
    let rows = &rows[..rows.len().min(EXPORT_ROW_LIMIT)];
    if columns.is_empty() {
        if let Some(first_row) = rows.first().and_then(|row| row.as_object()) {
            columns = first_row
                .keys()
                .filter(|key| key.as_str() != "__rowId")
                .map(|key| clamp_string(key.as_str(), 80, false))
                .filter(|key| !key.is_empty())
                .collect();
        }
    }
    CsvExport {
        filename,
        content: rows_to_csv(columns.as_slice(), rows),
        rows: rows.len(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageCount {
    pub stage: OnboardingStage,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpcomingShift {
    pub shopper_name: String,
    pub shift: Shift,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentTalk {
    pub shopper_name: String,
    pub talk: Talk,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub total_shoppers: usize,
    pub stages: Vec<StageCount>,
    pub upcoming_shifts: Vec<UpcomingShift>,
    pub recent_talks: Vec<RecentTalk>,
    pub last_sync: Option<SyncReport>,
}

pub fn dashboard(db: &Database, today: NaiveDate) -> DashboardSummary {
    let stages = OnboardingStage::ALL
        .into_iter()
        .map(|stage| StageCount {
            stage,
            count: db.shoppers.iter().filter(|s| s.stage == stage).count(),
        })
        .collect();

    let horizon = today + Duration::days(UPCOMING_DAYS);
    let upcoming_shifts = crate::attendance::list(
        db,
        &crate::attendance::ShiftFilter {
            shopper_id: None,
            from: Some(today),
            to: Some(horizon - Duration::days(1)),
        },
    )
    .into_iter()
    .filter(|shift| shift.status == crate::model::ShiftStatus::Scheduled)
    .map(|shift| UpcomingShift {
        shopper_name: shopper_name(db, shift.shopper_id.as_str()),
        shift,
    })
    .collect();

    let recent_talks = crate::talks::list(db, None)
        .into_iter()
        .take(RECENT_TALKS)
        .map(|talk| RecentTalk {
            shopper_name: shopper_name(db, talk.shopper_id.as_str()),
            talk,
        })
        .collect();

    DashboardSummary {
        total_shoppers: db.shoppers.len(),
        stages,
        upcoming_shifts,
        recent_talks,
        last_sync: db.last_sync.clone(),
    }
}
