//! Spreadsheet reconciliation.
//!
//! Rows come from a CSV export or a Sheets API `values` body. Each row is
//! mapped through the fixed column offsets in [`SheetCfg`], matched to an
//! existing shopper by case-insensitive name, and then either patched or
//! inserted. A preview runs the same pass against a scratch copy.
use chrono::NaiveDate;
use serde::Deserialize;

use crate::audit::AuditTrail;
use crate::config::{SheetCfg, SheetField};
use crate::error::AppError;
use crate::export::should_neutralize_csv;
use crate::model::{ChangeSource, Database, OnboardingStage, SyncReport, SyncRowError};
use crate::shoppers::{self, name_key, ShopperInput, ShopperPatch};
use crate::util::{js_like_value_string, now_string, parse_loose_date};

/// Sheet contents as handed over by the frontend.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "format", content = "body", rename_all = "snake_case")]
pub enum SheetSource {
    Csv(String),
    Api(serde_json::Value),
}

impl SheetSource {
    pub fn rows(&self) -> Result<Vec<Vec<String>>, AppError> {
        match self {
            SheetSource::Csv(text) => Ok(parse_csv(text.as_str())),
            SheetSource::Api(body) => parse_api_values(body),
        }
    }
}

/// Drops the `'` that CSV exports put in front of formula-like cells.
fn unneutralize(cell: String) -> String {
    match cell.strip_prefix('\'') {
        Some(rest) if should_neutralize_csv(rest) => rest.to_string(),
        _ => cell,
    }
}

/// RFC 4180-ish reader: quoted fields, doubled quotes, embedded newlines,
/// LF or CRLF line endings.
pub fn parse_csv(text: &str) -> Vec<Vec<String>> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            if ch == '"' {
                if chars.peek() == Some(&'"') {
                    field.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(ch);
            }
            continue;
        }
        match ch {
            '"' if field.is_empty() => in_quotes = true,
            ',' => row.push(unneutralize(std::mem::take(&mut field))),
            '\r' | '\n' => {
                if ch == '\r' && chars.peek() == Some(&'\n') {
                    chars.next();
                }
                row.push(unneutralize(std::mem::take(&mut field)));
                rows.push(std::mem::take(&mut row));
            }
            _ => field.push(ch),
        }
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(unneutralize(field));
        rows.push(row);
    }
    rows
}

/// Reads `{ "values": [[..], ..] }`. The API leaves `values` out for an
/// empty range.
pub fn parse_api_values(body: &serde_json::Value) -> Result<Vec<Vec<String>>, AppError> {
    let Some(values) = body.get("values") else {
        return Ok(Vec::new());
    };
    let rows = values
        .as_array()
        .ok_or_else(|| AppError::invalid("Sheet `values` must be an array of rows."))?;
    rows.iter()
        .map(|row| match row {
            serde_json::Value::Array(cells) => Ok(cells
                .iter()
                .map(|cell| js_like_value_string(Some(cell)))
                .collect()),
            _ => Err(AppError::invalid("Sheet rows must be arrays of cells.")),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
struct SheetRow {
    name: String,
    email: Option<String>,
    phone: Option<String>,
    branch: Option<String>,
    stage: Option<OnboardingStage>,
    hire_date: Option<NaiveDate>,
    notes: Option<String>,
}

fn cell<'a>(cells: &'a [String], offset: Option<usize>) -> Option<&'a str> {
    offset
        .and_then(|idx| cells.get(idx))
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

/// `Ok(None)` means the row has no name and is skipped.
fn map_row(cells: &[String], cfg: &SheetCfg) -> Result<Option<SheetRow>, AppError> {
    let Some(name) = cell(cells, Some(cfg.name)) else {
        return Ok(None);
    };
    let text = |field: SheetField| cell(cells, cfg.column(field)).map(str::to_string);
    let stage = cell(cells, cfg.column(SheetField::Stage))
        .map(str::parse::<OnboardingStage>)
        .transpose()?;
    let hire_date = match cell(cells, cfg.column(SheetField::HireDate)) {
        Some(raw) => Some(
            parse_loose_date(raw)
                .ok_or_else(|| AppError::invalid(format!("Hire date `{raw}` is not a date.")))?,
        ),
        None => None,
    };
    Ok(Some(SheetRow {
        name: name.to_string(),
        email: text(SheetField::Email),
        phone: text(SheetField::Phone),
        branch: text(SheetField::Branch),
        stage,
        hire_date,
        notes: text(SheetField::Notes),
    }))
}

enum RowOutcome {
    Inserted,
    Updated,
    Unchanged,
}

fn apply_row(db: &mut Database, trail: &AuditTrail, row: SheetRow) -> Result<RowOutcome, AppError> {
    let key = name_key(row.name.as_str());
    let existing = db
        .shoppers
        .iter()
        .find(|shopper| name_key(shopper.name.as_str()) == key)
        .map(|shopper| shopper.id.clone());

    match existing {
        Some(id) => {
            let patch = ShopperPatch {
                email: row.email,
                phone: row.phone,
                branch: row.branch,
                stage: row.stage,
                hire_date: row.hire_date,
                notes: row.notes,
                ..ShopperPatch::default()
            };
            let (_, changed) = shoppers::patch_shopper(db, trail, id.as_str(), &patch)?;
            Ok(if changed {
                RowOutcome::Updated
            } else {
                RowOutcome::Unchanged
            })
        }
        None => {
            let input = ShopperInput {
                name: row.name,
                email: row.email.unwrap_or_default(),
                phone: row.phone.unwrap_or_default(),
                branch: row.branch.unwrap_or_default(),
                stage: row.stage,
                hire_date: row.hire_date,
                onboarding: None,
                notes: row.notes.unwrap_or_default(),
            };
            shoppers::create(db, trail, input)?;
            Ok(RowOutcome::Inserted)
        }
    }
}

/// Single pass over the sheet rows. Row problems are collected in the
/// report; they never abort the run.
pub fn reconcile(
    db: &mut Database,
    rows: &[Vec<String>],
    cfg: &SheetCfg,
    trail: &AuditTrail,
    dry_run: bool,
) -> SyncReport {
    let trail = trail.with_source(ChangeSource::SheetSync);
    let mut report = SyncReport {
        ran_at: now_string(),
        dry_run,
        ..SyncReport::default()
    };
    for (idx, cells) in rows.iter().enumerate().skip(cfg.header_rows) {
        if cells.iter().all(|value| value.trim().is_empty()) {
            continue;
        }
        report.rows_read += 1;
        let row_number = idx + 1;
        let outcome = map_row(cells, cfg).and_then(|row| match row {
            Some(row) => apply_row(db, &trail, row).map(Some),
            None => Ok(None),
        });
        match outcome {
            Ok(None) => report.skipped += 1,
            Ok(Some(RowOutcome::Inserted)) => report.inserted += 1,
            Ok(Some(RowOutcome::Updated)) => report.updated += 1,
            Ok(Some(RowOutcome::Unchanged)) => report.unchanged += 1,
            Err(err) => report.errors.push(SyncRowError {
                row: row_number,
                message: err.to_string(),
            }),
        }
    }
    tracing::info!(
        dry_run,
        rows = report.rows_read,
        inserted = report.inserted,
        updated = report.updated,
        errors = report.errors.len(),
        "sheet reconciled"
    );
    report
}

/// Runs against a scratch copy; `db` is left untouched.
pub fn preview(db: &Database, rows: &[Vec<String>], cfg: &SheetCfg, trail: &AuditTrail) -> SyncReport {
    let mut scratch = db.clone();
    reconcile(&mut scratch, rows, cfg, trail, true)
}

/// Reconciles in place and records the report as `last_sync`.
pub fn apply(db: &mut Database, rows: &[Vec<String>], cfg: &SheetCfg, trail: &AuditTrail) -> SyncReport {
    let report = reconcile(db, rows, cfg, trail, false);
    db.last_sync = Some(report.clone());
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::shopper;
    use crate::model::AuditAction;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn trail() -> AuditTrail {
        AuditTrail::new(ChangeSource::Dashboard, 1000)
    }

    const HEADER: &str = "Name,Email,Phone,Branch,Stage,Hire Date,Notes\n";

    #[test]
    fn csv_reader_handles_quotes_and_line_endings() {
        let rows = parse_csv("a,\"b, c\",\"say \"\"hi\"\"\"\r\n\"multi\nline\",,'=SUM(A1)\n'plain\n");
        assert_eq!(
            rows,
            vec![
                vec!["a".to_string(), "b, c".to_string(), "say \"hi\"".to_string()],
                vec!["multi\nline".to_string(), String::new(), "=SUM(A1)".to_string()],
                vec!["'plain".to_string()],
            ]
        );
    }

    #[test]
    fn csv_reader_keeps_last_row_without_newline() {
        assert_eq!(
            parse_csv("\u{feff}x,y"),
            vec![vec!["x".to_string(), "y".to_string()]]
        );
        assert!(parse_csv("").is_empty());
    }

    #[test]
    fn api_values_become_strings() {
        let rows = parse_api_values(&json!({
            "range": "Sheet1!A1:C2",
            "values": [["Name", "Email"], ["Ana", 42, true]],
        }))
        .unwrap();
        assert_eq!(rows[1], vec!["Ana", "42", "true"]);
        assert!(parse_api_values(&json!({})).unwrap().is_empty());
        assert!(parse_api_values(&json!({"values": "nope"})).is_err());
        assert!(parse_api_values(&json!({"values": [1]})).is_err());
    }

    #[test]
    fn sheet_source_is_tagged() {
        let source: SheetSource =
            serde_json::from_value(json!({"format": "csv", "body": "a,b\n"})).unwrap();
        assert_eq!(source.rows().unwrap(), vec![vec!["a", "b"]]);
        let source: SheetSource =
            serde_json::from_value(json!({"format": "api", "body": {"values": [["x"]]}})).unwrap();
        assert_eq!(source.rows().unwrap(), vec![vec!["x"]]);
    }

    #[test]
    fn reconcile_inserts_updates_and_reports() {
        let mut db = Database::default();
        let mut ana = shopper("s1", "Ana Lima");
        ana.email = "ana@old.example".to_string();
        ana.stage = OnboardingStage::Active;
        db.shoppers.push(ana);
        db.shoppers.push(shopper("s2", "Bo"));

        let csv = format!(
            "{HEADER}\
             \x20ana lima ,ana@new.example,,,,,\n\
             BO,,,,,,\n\
             Cy,cy@example.com,555,North,Interviewing,3/7/24,Met at fair\n\
             ,orphan@example.com,,,,,\n\
             ,,,,,,\n\
             Di,,,,hired?,,\n\
             Ed,,,,,13/45/2024,\n"
        );
        let rows = parse_csv(csv.as_str());
        let report = apply(&mut db, &rows, &SheetCfg::default(), &trail());

        assert_eq!(report.rows_read, 6);
        assert_eq!(report.updated, 1);
        assert_eq!(report.unchanged, 1);
        assert_eq!(report.inserted, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(
            report.errors.iter().map(|e| e.row).collect::<Vec<_>>(),
            vec![7, 8]
        );
        assert!(!report.dry_run);
        assert_eq!(db.last_sync.as_ref(), Some(&report));

        let ana = db.shopper("s1").unwrap();
        assert_eq!(ana.name, "Ana Lima");
        assert_eq!(ana.email, "ana@new.example");
        assert_eq!(ana.stage, OnboardingStage::Active);

        let cy = db.shoppers.iter().find(|s| s.name == "Cy").unwrap();
        assert_eq!(cy.stage, OnboardingStage::Interviewing);
        assert_eq!(cy.hire_date, NaiveDate::from_ymd_opt(2024, 3, 7));
        assert_eq!(cy.branch, "North");
        assert_eq!(cy.notes, "Met at fair");

        assert!(db.shoppers.iter().all(|s| s.name != "Di" && s.name != "Ed"));
        let sources: Vec<_> = db.audit_logs.iter().map(|e| (e.action, e.source)).collect();
        assert_eq!(
            sources,
            vec![
                (AuditAction::Update, ChangeSource::SheetSync),
                (AuditAction::Insert, ChangeSource::SheetSync),
            ]
        );
    }

    #[test]
    fn inserted_stage_defaults_to_applied() {
        let mut db = Database::default();
        let rows = parse_csv("Name\nNew Person\n");
        let report = apply(&mut db, &rows, &SheetCfg::default(), &trail());
        assert_eq!(report.inserted, 1);
        assert_eq!(db.shoppers[0].stage, OnboardingStage::Applied);
    }

    #[test]
    fn duplicate_rows_update_the_earlier_insert() {
        let mut db = Database::default();
        let csv = format!("{HEADER}Fay,,,,,,\nfay,fay@example.com,,,,,\nFAY,fay@example.com,,,,,\n");
        let report = apply(&mut db, &parse_csv(csv.as_str()), &SheetCfg::default(), &trail());
        assert_eq!((report.inserted, report.updated, report.unchanged), (1, 1, 1));
        assert_eq!(db.shoppers.len(), 1);
        assert_eq!(db.shoppers[0].email, "fay@example.com");
    }

    #[test]
    fn preview_leaves_database_alone() {
        let mut db = Database::default();
        db.shoppers.push(shopper("s1", "Ana"));
        let before = db.clone();
        let csv = format!("{HEADER}Ana,ana@example.com,,,,,\nBo,,,,,,\n");
        let report = preview(&db, &parse_csv(csv.as_str()), &SheetCfg::default(), &trail());
        assert!(report.dry_run);
        assert_eq!((report.updated, report.inserted), (1, 1));
        assert_eq!(db, before);
    }

    #[test]
    fn custom_offsets_and_ignored_columns() {
        let cfg = SheetCfg {
            header_rows: 0,
            name: 2,
            email: 0,
            ignore: vec![
                "phone".to_string(),
                "branch".to_string(),
                "stage".to_string(),
                "hire_date".to_string(),
                "notes".to_string(),
            ],
            ..SheetCfg::default()
        };
        let mut db = Database::default();
        let rows = parse_csv("gus@example.com,ignored,Gus,whatever\n");
        let report = apply(&mut db, &rows, &cfg, &trail());
        assert_eq!(report.inserted, 1);
        assert_eq!(db.shoppers[0].name, "Gus");
        assert_eq!(db.shoppers[0].email, "gus@example.com");
        assert_eq!(db.shoppers[0].stage, OnboardingStage::Applied);
    }

    #[test]
    fn invalid_email_is_a_row_error() {
        let mut db = Database::default();
        let csv = format!("{HEADER}Hal,not-an-email,,,,,\n");
        let report = apply(&mut db, &parse_csv(csv.as_str()), &SheetCfg::default(), &trail());
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].row, 2);
        assert!(db.shoppers.is_empty());
    }
}
