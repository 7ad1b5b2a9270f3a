#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod access_log;
mod attendance;
mod audit;
mod auth;
mod config;
mod crypto;
mod error;
mod export;
mod model;
mod report;
mod sheet_sync;
mod shoppers;
mod store;
mod talks;
mod telemetry;
mod util;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs;
use std::path::PathBuf;
use tauri::{AppHandle, Manager, State};
use tauri_plugin_clipboard_manager::ClipboardExt;
use tauri_plugin_opener::OpenerExt;

use crate::access_log::{AccessEvent, AccessFilter, AccessRecord};
use crate::attendance::{
    AttendanceReport, AttendanceSummary, PerformanceSummary, ShiftFilter, ShiftInput, ShiftPatch,
};
use crate::audit::{AuditFilter, RestoreOutcome};
use crate::auth::{AuthRecord, AuthStatus};
use crate::config::load_config;
use crate::error::AppError;
use crate::export::{DashboardSummary, TableData, TableInfo};
use crate::model::{validate_db, AuditEntry, Shift, Shopper, SyncReport, Talk};
use crate::report::TalkReportForm;
use crate::sheet_sync::SheetSource;
use crate::shoppers::{DeleteOutcome, ShopperDetail, ShopperFilter, ShopperInput, ShopperPatch};
use crate::store::Store;
use crate::talks::{TalkInput, TalkPatch};
use crate::util::{clamp_string, sanitize_filename, today, write_text_file};

const DATA_DIR_ENV: &str = "SHOPPER_HUB_DATA_DIR";

#[derive(Deserialize)]
struct ClipboardWriteRequest {
    text: String,
}

#[derive(Deserialize)]
struct AuthSetupRequest {
    password: String,
}

#[derive(Deserialize)]
struct AuthVerifyRequest {
    password: String,
}

#[derive(Deserialize)]
struct AuthChangeRequest {
    current: String,
    next: String,
}

#[derive(Deserialize)]
struct DbAuthRequest {
    password: String,
}

#[derive(Deserialize)]
struct RecordRequest {
    password: String,
    id: String,
}

#[derive(Deserialize)]
struct ShoppersListRequest {
    password: String,
    #[serde(default)]
    filter: ShopperFilter,
}

#[derive(Deserialize)]
struct ShopperCreateRequest {
    password: String,
    shopper: ShopperInput,
}

#[derive(Deserialize)]
struct ShopperUpdateRequest {
    password: String,
    id: String,
    patch: ShopperPatch,
}

#[derive(Deserialize)]
struct ShiftsListRequest {
    password: String,
    #[serde(default)]
    filter: ShiftFilter,
}

#[derive(Deserialize)]
struct ShiftAddRequest {
    password: String,
    shift: ShiftInput,
}

#[derive(Deserialize)]
struct ShiftUpdateRequest {
    password: String,
    id: String,
    patch: ShiftPatch,
}

#[derive(Deserialize)]
struct AttendanceRequest {
    password: String,
    shopper_id: String,
    #[serde(default)]
    from: Option<NaiveDate>,
    #[serde(default)]
    to: Option<NaiveDate>,
}

#[derive(Deserialize)]
struct PerformanceRequest {
    password: String,
    shopper_id: String,
}

#[derive(Deserialize)]
struct TalksListRequest {
    password: String,
    #[serde(default)]
    shopper_id: Option<String>,
}

#[derive(Deserialize)]
struct TalkAddRequest {
    password: String,
    talk: TalkInput,
}

#[derive(Deserialize)]
struct TalkUpdateRequest {
    password: String,
    id: String,
    patch: TalkPatch,
}

#[derive(Deserialize)]
struct TalkReportRequest {
    form: TalkReportForm,
}

#[derive(Deserialize)]
struct AuditListRequest {
    password: String,
    #[serde(default)]
    filter: AuditFilter,
}

#[derive(Deserialize)]
struct AuditRestoreRequest {
    password: String,
    entry_id: String,
}

#[derive(Deserialize)]
struct AccessLogListRequest {
    password: String,
    #[serde(default)]
    filter: AccessFilter,
}

#[derive(Deserialize)]
struct SheetSyncRequest {
    password: String,
    source: SheetSource,
}

#[derive(Deserialize)]
struct DbGetTableRequest {
    password: String,
    table_id: String,
}

#[derive(Deserialize)]
struct DbExportCsvRequest {
    password: String,
    filename: String,
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    rows: Vec<serde_json::Value>,
}

#[derive(Serialize)]
struct PickTextFileResult {
    ok: bool,
    canceled: bool,
    name: Option<String>,
    data: Option<String>,
}

#[derive(Serialize)]
struct SaveFileResult {
    ok: bool,
    canceled: bool,
    filename: String,
    path: Option<String>,
}

fn platform_error(err: impl std::fmt::Display) -> AppError {
    AppError::Platform(err.to_string())
}

#[tauri::command]
fn app_version(app: AppHandle) -> String {
    app.package_info().version.to_string()
}

#[tauri::command]
fn clipboard_write(app: AppHandle, payload: ClipboardWriteRequest) -> Result<bool, AppError> {
    app.clipboard()
        .write_text(payload.text)
        .map_err(platform_error)?;
    Ok(true)
}

#[tauri::command]
fn open_sheet(app: AppHandle, store: State<'_, Store>) -> Result<bool, AppError> {
    let Some(url) = store.config().sheet.url.clone() else {
        return Err(AppError::invalid("No spreadsheet URL is configured."));
    };
    app.opener()
        .open_url(url, Option::<String>::None)
        .map_err(|err: tauri_plugin_opener::Error| platform_error(err))?;
    Ok(true)
}

#[tauri::command]
fn pick_text_file() -> Result<PickTextFileResult, AppError> {
    let path = rfd::FileDialog::new()
        .add_filter("Spreadsheet export", &["csv"])
        .add_filter("Sheets API response", &["json"])
        .pick_file();

    let Some(path) = path else {
        return Ok(PickTextFileResult {
            ok: false,
            canceled: true,
            name: None,
            data: None,
        });
    };

    let data = fs::read_to_string(&path)?;
    let name = path
        .file_name()
        .map(|value| value.to_string_lossy().to_string());
    Ok(PickTextFileResult {
        ok: true,
        canceled: false,
        name,
        data: Some(data),
    })
}

fn save_text_file(filename: &str, content: &str) -> Result<SaveFileResult, AppError> {
    let default_name = sanitize_filename(filename, "shopper-hub-export.txt");
    let path = rfd::FileDialog::new()
        .set_file_name(default_name.as_str())
        .save_file();

    let Some(path) = path else {
        return Ok(SaveFileResult {
            ok: false,
            canceled: true,
            filename: default_name,
            path: None,
        });
    };

    write_text_file(path.clone(), content)?;
    Ok(SaveFileResult {
        ok: true,
        canceled: false,
        filename: default_name,
        path: Some(path.to_string_lossy().to_string()),
    })
}

#[tauri::command]
fn auth_status(store: State<'_, Store>) -> Result<AuthStatus, AppError> {
    auth::status(&store)
}

#[tauri::command]
fn auth_setup(store: State<'_, Store>, payload: AuthSetupRequest) -> Result<AuthRecord, AppError> {
    auth::setup(&store, payload.password.as_str())
}

#[tauri::command]
fn auth_verify(store: State<'_, Store>, payload: AuthVerifyRequest) -> Result<bool, AppError> {
    auth::verify(&store, payload.password.as_str())
}

#[tauri::command]
fn auth_change(store: State<'_, Store>, payload: AuthChangeRequest) -> Result<bool, AppError> {
    auth::change(&store, payload.current.as_str(), payload.next.as_str())
}

#[tauri::command]
fn dashboard_get(store: State<'_, Store>, payload: DbAuthRequest) -> Result<DashboardSummary, AppError> {
    let db = store.load(payload.password.as_str())?;
    Ok(export::dashboard(&db, today()))
}

#[tauri::command]
fn shoppers_list(store: State<'_, Store>, payload: ShoppersListRequest) -> Result<Vec<Shopper>, AppError> {
    let db = store.load(payload.password.as_str())?;
    Ok(shoppers::list(&db, &payload.filter))
}

#[tauri::command]
fn shoppers_get(store: State<'_, Store>, payload: RecordRequest) -> Result<ShopperDetail, AppError> {
    let db = store.load(payload.password.as_str())?;
    shoppers::detail(&db, payload.id.as_str(), today())
}

#[tauri::command]
fn shoppers_create(store: State<'_, Store>, payload: ShopperCreateRequest) -> Result<Shopper, AppError> {
    let trail = store.audit_trail();
    store.update(payload.password.as_str(), |db| {
        shoppers::create(db, &trail, payload.shopper)
    })
}

#[tauri::command]
fn shoppers_update(store: State<'_, Store>, payload: ShopperUpdateRequest) -> Result<Shopper, AppError> {
    let trail = store.audit_trail();
    store.update(payload.password.as_str(), |db| {
        shoppers::update(db, &trail, payload.id.as_str(), &payload.patch)
    })
}

#[tauri::command]
fn shoppers_delete(store: State<'_, Store>, payload: RecordRequest) -> Result<DeleteOutcome, AppError> {
    let trail = store.audit_trail();
    store.update(payload.password.as_str(), |db| {
        shoppers::delete(db, &trail, payload.id.as_str())
    })
}

#[tauri::command]
fn shifts_list(store: State<'_, Store>, payload: ShiftsListRequest) -> Result<Vec<Shift>, AppError> {
    let db = store.load(payload.password.as_str())?;
    Ok(attendance::list(&db, &payload.filter))
}

#[tauri::command]
fn shifts_add(store: State<'_, Store>, payload: ShiftAddRequest) -> Result<Shift, AppError> {
    let trail = store.audit_trail();
    store.update(payload.password.as_str(), |db| {
        attendance::add(db, &trail, payload.shift)
    })
}

#[tauri::command]
fn shifts_update(store: State<'_, Store>, payload: ShiftUpdateRequest) -> Result<Shift, AppError> {
    let trail = store.audit_trail();
    store.update(payload.password.as_str(), |db| {
        attendance::update(db, &trail, payload.id.as_str(), &payload.patch)
    })
}

#[tauri::command]
fn shifts_delete(store: State<'_, Store>, payload: RecordRequest) -> Result<String, AppError> {
    let trail = store.audit_trail();
    store.update(payload.password.as_str(), |db| {
        attendance::delete(db, &trail, payload.id.as_str())
    })
}

#[tauri::command]
fn attendance_summary(
    store: State<'_, Store>,
    payload: AttendanceRequest,
) -> Result<AttendanceSummary, AppError> {
    let db = store.load(payload.password.as_str())?;
    attendance::summary(&db, payload.shopper_id.as_str(), payload.from, payload.to)
}

#[tauri::command]
fn performance_get(
    store: State<'_, Store>,
    payload: PerformanceRequest,
) -> Result<PerformanceSummary, AppError> {
    let db = store.load(payload.password.as_str())?;
    attendance::performance(&db, payload.shopper_id.as_str(), today())
}

#[tauri::command]
fn attendance_report(
    store: State<'_, Store>,
    payload: AttendanceRequest,
) -> Result<AttendanceReport, AppError> {
    let db = store.load(payload.password.as_str())?;
    attendance::attendance_report(&db, payload.shopper_id.as_str(), payload.from, payload.to)
}

#[tauri::command]
fn attendance_report_save(
    store: State<'_, Store>,
    payload: AttendanceRequest,
) -> Result<SaveFileResult, AppError> {
    let report = attendance_report(store, payload)?;
    save_text_file(report.filename.as_str(), report.content.as_str())
}

#[tauri::command]
fn talks_list(store: State<'_, Store>, payload: TalksListRequest) -> Result<Vec<Talk>, AppError> {
    let db = store.load(payload.password.as_str())?;
    Ok(talks::list(&db, payload.shopper_id.as_deref()))
}

#[tauri::command]
fn talks_add(store: State<'_, Store>, payload: TalkAddRequest) -> Result<Talk, AppError> {
    let trail = store.audit_trail();
    store.update(payload.password.as_str(), |db| talks::add(db, &trail, payload.talk))
}

#[tauri::command]
fn talks_update(store: State<'_, Store>, payload: TalkUpdateRequest) -> Result<Talk, AppError> {
    let trail = store.audit_trail();
    store.update(payload.password.as_str(), |db| {
        talks::update(db, &trail, payload.id.as_str(), &payload.patch)
    })
}

#[tauri::command]
fn talks_delete(store: State<'_, Store>, payload: RecordRequest) -> Result<String, AppError> {
    let trail = store.audit_trail();
    store.update(payload.password.as_str(), |db| {
        talks::delete(db, &trail, payload.id.as_str())
    })
}

#[tauri::command]
fn talk_report_build(payload: TalkReportRequest) -> String {
    report::build_talk_report(&payload.form)
}

#[tauri::command]
fn talk_report_form(store: State<'_, Store>, payload: RecordRequest) -> Result<TalkReportForm, AppError> {
    let db = store.load(payload.password.as_str())?;
    let talk = db
        .talks
        .iter()
        .find(|talk| talk.id == payload.id)
        .ok_or_else(|| AppError::not_found("talks", payload.id.as_str()))?;
    Ok(report::form_from_talk(talk, db.shopper(talk.shopper_id.as_str())))
}

/// Builds the report and puts it on the clipboard.
#[tauri::command]
fn talk_report_copy(app: AppHandle, payload: TalkReportRequest) -> Result<String, AppError> {
    let text = report::build_talk_report(&payload.form);
    app.clipboard()
        .write_text(text.clone())
        .map_err(platform_error)?;
    Ok(text)
}

#[tauri::command]
fn audit_list(store: State<'_, Store>, payload: AuditListRequest) -> Result<Vec<AuditEntry>, AppError> {
    let db = store.load(payload.password.as_str())?;
    Ok(audit::list(&db, &payload.filter))
}

#[tauri::command]
fn audit_restore(
    store: State<'_, Store>,
    payload: AuditRestoreRequest,
) -> Result<RestoreOutcome, AppError> {
    let trail = store.audit_trail();
    let result = store.update(payload.password.as_str(), |db| {
        audit::restore(db, &trail, payload.entry_id.as_str())
    });
    let detail = match &result {
        Ok(outcome) => format!("{} {}", outcome.table.as_str(), outcome.record_id),
        Err(err) => err.to_string(),
    };
    store
        .access_log()
        .record(AccessEvent::Restore, result.is_ok(), detail.as_str());
    result
}

#[tauri::command]
fn access_log_list(
    store: State<'_, Store>,
    payload: AccessLogListRequest,
) -> Result<Vec<AccessRecord>, AppError> {
    auth::require(&store, payload.password.as_str())?;
    store.access_log().list(&payload.filter)
}

#[tauri::command]
fn sheet_sync_preview(store: State<'_, Store>, payload: SheetSyncRequest) -> Result<SyncReport, AppError> {
    let rows = payload.source.rows()?;
    let db = store.load(payload.password.as_str())?;
    Ok(sheet_sync::preview(
        &db,
        rows.as_slice(),
        &store.config().sheet,
        &store.audit_trail(),
    ))
}

#[tauri::command]
fn sheet_sync_apply(store: State<'_, Store>, payload: SheetSyncRequest) -> Result<SyncReport, AppError> {
    let rows = payload.source.rows()?;
    let trail = store.audit_trail();
    let result = store.update(payload.password.as_str(), |db| {
        Ok(sheet_sync::apply(
            db,
            rows.as_slice(),
            &store.config().sheet,
            &trail,
        ))
    });
    let detail = match &result {
        Ok(report) => format!(
            "inserted {}, updated {}, errors {}",
            report.inserted,
            report.updated,
            report.errors.len()
        ),
        Err(err) => err.to_string(),
    };
    store
        .access_log()
        .record(AccessEvent::Sync, result.is_ok(), detail.as_str());
    result
}

#[tauri::command]
fn db_list_tables(store: State<'_, Store>, payload: DbAuthRequest) -> Result<Vec<TableInfo>, AppError> {
    let db = store.load(payload.password.as_str())?;
    Ok(export::list_tables(&db))
}

#[tauri::command]
fn db_get_table(store: State<'_, Store>, payload: DbGetTableRequest) -> Result<TableData, AppError> {
    let db = store.load(payload.password.as_str())?;
    export::get_table(&db, payload.table_id.as_str())
}

#[tauri::command]
fn db_export_csv(store: State<'_, Store>, payload: DbExportCsvRequest) -> Result<SaveFileResult, AppError> {
    store.load(payload.password.as_str())?;
    let csv = export::export_csv(
        payload.filename.as_str(),
        payload.columns.as_slice(),
        payload.rows.as_slice(),
    );
    let saved = save_text_file(csv.filename.as_str(), csv.content.as_str())?;
    if saved.ok {
        let detail = format!("{} ({} rows)", csv.filename, csv.rows);
        store
            .access_log()
            .record(AccessEvent::Export, true, clamp_string(detail.as_str(), 240, true).as_str());
        tracing::info!(file = %csv.filename, rows = csv.rows, "table exported");
    }
    Ok(saved)
}

#[tauri::command]
fn db_validate_current(store: State<'_, Store>, payload: DbAuthRequest) -> Result<serde_json::Value, AppError> {
    let db = store.load(payload.password.as_str())?;
    Ok(match validate_db(&db) {
        Some((code, message)) => json!({ "ok": false, "code": code, "message": message }),
        None => json!({ "ok": true }),
    })
}

fn storage_root_dir(app: &AppHandle) -> Result<PathBuf, AppError> {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    let base = app.path().app_data_dir().map_err(platform_error)?;
    Ok(base.join("ShopperHub"))
}

fn main() {
    telemetry::init();
    tauri::Builder::default()
        .plugin(tauri_plugin_opener::init())
        .plugin(tauri_plugin_clipboard_manager::init())
        .setup(|app| {
            let root = storage_root_dir(app.handle())?;
            let config = load_config(root.as_path())?;
            let store = Store::open(root, config)?;
            app.manage(store);
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            app_version,
            clipboard_write,
            open_sheet,
            pick_text_file,
            auth_status,
            auth_setup,
            auth_verify,
            auth_change,
            dashboard_get,
            shoppers_list,
            shoppers_get,
            shoppers_create,
            shoppers_update,
            shoppers_delete,
            shifts_list,
            shifts_add,
            shifts_update,
            shifts_delete,
            attendance_summary,
            performance_get,
            attendance_report,
            attendance_report_save,
            talks_list,
            talks_add,
            talks_update,
            talks_delete,
            talk_report_build,
            talk_report_form,
            talk_report_copy,
            audit_list,
            audit_restore,
            access_log_list,
            sheet_sync_preview,
            sheet_sync_apply,
            db_list_tables,
            db_get_table,
            db_export_csv,
            db_validate_current
        ])
        .run(tauri::generate_context!())
        .expect("failed to run Shopper Hub");
}
