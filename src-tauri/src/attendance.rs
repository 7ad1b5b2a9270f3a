//! Shifts, attendance summaries and the performance rating built on them.
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::audit::AuditTrail;
use crate::error::AppError;
use crate::model::{AuditTable, Database, Shift, ShiftStatus, TalkKind};
use crate::util::{
    clamp_multiline, clamp_string, format_hours, new_id, now_string, parse_clock_time,
    sanitize_filename, span_minutes,
};

const WARNING_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ShiftFilter {
    pub shopper_id: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl ShiftFilter {
    pub fn for_shopper(id: &str) -> Self {
        Self {
            shopper_id: Some(id.to_string()),
            ..Self::default()
        }
    }

    fn matches(&self, shift: &Shift) -> bool {
        self.shopper_id
            .as_deref()
            .map_or(true, |id| shift.shopper_id == id)
            && in_range(shift.date, self.from, self.to)
    }
}

fn in_range(date: NaiveDate, from: Option<NaiveDate>, to: Option<NaiveDate>) -> bool {
    from.map_or(true, |from| date >= from) && to.map_or(true, |to| date <= to)
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShiftInput {
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
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ShiftPatch {
    pub date: Option<NaiveDate>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub status: Option<ShiftStatus>,
    pub notes: Option<String>,
}

fn clean_time(value: &str, label: &str) -> Result<String, AppError> {
    let text = clamp_string(value, 20, true);
    if !text.is_empty() && parse_clock_time(text.as_str()).is_none() {
        return Err(AppError::invalid(format!("{label} time `{text}` is not a clock time.")));
    }
    Ok(text)
}

fn start_key(shift: &Shift) -> i64 {
    parse_clock_time(shift.start.as_str()).unwrap_or(i64::MAX)
}

/// Sorted by date, then start time. Shifts without a start sort last
/// within their day.
pub fn list(db: &Database, filter: &ShiftFilter) -> Vec<Shift> {
    let mut out: Vec<Shift> = db
        .shifts
        .iter()
        .filter(|shift| filter.matches(shift))
        .cloned()
        .collect();
    out.sort_by(|a, b| {
        a.date
            .cmp(&b.date)
            .then_with(|| start_key(a).cmp(&start_key(b)))
            .then_with(|| a.id.cmp(&b.id))
    });
    out
}

pub fn add(db: &mut Database, trail: &AuditTrail, input: ShiftInput) -> Result<Shift, AppError> {
    if !db.has_shopper(input.shopper_id.as_str()) {
        return Err(AppError::not_found("shoppers", input.shopper_id.as_str()));
    }
    let now = now_string();
    let shift = Shift {
        id: new_id(),
        shopper_id: input.shopper_id,
        date: input.date,
        start: clean_time(input.start.as_str(), "Start")?,
        end: clean_time(input.end.as_str(), "End")?,
        status: input.status,
        notes: clamp_multiline(input.notes.as_str(), 2000),
        created_at: now.clone(),
        updated_at: now,
    };
    db.shifts.push(shift.clone());
    trail.inserted(db, AuditTable::Shifts, shift.id.as_str(), &shift)?;
    Ok(shift)
}

pub fn update(
    db: &mut Database,
    trail: &AuditTrail,
    id: &str,
    patch: &ShiftPatch,
) -> Result<Shift, AppError> {
    let shift = db
        .shifts
        .iter_mut()
        .find(|shift| shift.id == id)
        .ok_or_else(|| AppError::not_found("shifts", id))?;
    let before = shift.clone();
    let mut next = shift.clone();
    if let Some(date) = patch.date {
        next.date = date;
    }
    if let Some(start) = patch.start.as_deref() {
        next.start = clean_time(start, "Start")?;
    }
    if let Some(end) = patch.end.as_deref() {
        next.end = clean_time(end, "End")?;
    }
    if let Some(status) = patch.status {
        next.status = status;
    }
    if let Some(notes) = patch.notes.as_deref() {
        next.notes = clamp_multiline(notes, 2000);
    }
    if next == before {
        return Ok(before);
    }
    next.updated_at = now_string();
    *shift = next.clone();
    trail.updated(db, AuditTable::Shifts, id, &before, &next)?;
    Ok(next)
}

/// Returns the id of the audit entry that can bring the shift back.
pub fn delete(db: &mut Database, trail: &AuditTrail, id: &str) -> Result<String, AppError> {
    let idx = db
        .shifts
        .iter()
        .position(|shift| shift.id == id)
        .ok_or_else(|| AppError::not_found("shifts", id))?;
    let shift = db.shifts.remove(idx);
    trail.deleted(db, AuditTable::Shifts, id, &shift, Default::default())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSummary {
    pub shopper_id: String,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub scheduled: usize,
    pub worked: usize,
    pub late: usize,
    pub no_show: usize,
    pub called_out: usize,
    pub minutes_worked: i64,
    pub hours_worked: String,
    pub attendance_rate: Option<f64>,
    pub punctuality_rate: Option<f64>,
}

impl AttendanceSummary {
    /// Shifts with a final outcome; scheduled ones are excluded.
    pub fn completed(&self) -> usize {
        self.worked + self.late + self.no_show + self.called_out
    }
}

fn ratio(numerator: usize, denominator: usize) -> Option<f64> {
    if denominator == 0 {
        None
    } else {
        Some(numerator as f64 / denominator as f64)
    }
}

fn tally<'a>(
    shopper_id: &str,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    shifts: impl Iterator<Item = &'a Shift>,
) -> AttendanceSummary {
    let mut out = AttendanceSummary {
        shopper_id: shopper_id.to_string(),
        from,
        to,
        ..AttendanceSummary::default()
    };
    for shift in shifts {
        match shift.status {
            ShiftStatus::Scheduled => out.scheduled += 1,
            ShiftStatus::Worked => out.worked += 1,
            ShiftStatus::Late => out.late += 1,
            ShiftStatus::NoShow => out.no_show += 1,
            ShiftStatus::CalledOut => out.called_out += 1,
        }
        if shift.status.attended() {
            out.minutes_worked +=
                span_minutes(shift.start.as_str(), shift.end.as_str()).unwrap_or(0);
        }
    }
    out.hours_worked = format_hours(Some(out.minutes_worked));
    out.attendance_rate = ratio(out.worked + out.late, out.completed());
    out.punctuality_rate = ratio(out.worked, out.worked + out.late);
    out
}

pub fn summary(
    db: &Database,
    shopper_id: &str,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<AttendanceSummary, AppError> {
    if !db.has_shopper(shopper_id) {
        return Err(AppError::not_found("shoppers", shopper_id));
    }
    let filter = ShiftFilter {
        shopper_id: Some(shopper_id.to_string()),
        from,
        to,
    };
    Ok(tally(
        shopper_id,
        from,
        to,
        db.shifts.iter().filter(|shift| filter.matches(shift)),
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rating {
    New,
    Good,
    Watch,
    AtRisk,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSummary {
    pub attendance: AttendanceSummary,
    pub talks: usize,
    pub last_talk_on: Option<NaiveDate>,
    pub recent_warning: bool,
    pub rating: Rating,
}

fn rate(attendance: &AttendanceSummary, recent_warning: bool) -> Rating {
    let below = |value: Option<f64>, floor: f64| value.is_some_and(|value| value < floor);
    if attendance.no_show >= 2 || below(attendance.attendance_rate, 0.75) || recent_warning {
        return Rating::AtRisk;
    }
    if attendance.completed() == 0 {
        return Rating::New;
    }
    if below(attendance.attendance_rate, 0.9)
        || below(attendance.punctuality_rate, 0.8)
        || attendance.late >= 3
    {
        return Rating::Watch;
    }
    Rating::Good
}

/// All-time attendance plus talk history, rated as of `today`.
pub fn performance(
    db: &Database,
    shopper_id: &str,
    today: NaiveDate,
) -> Result<PerformanceSummary, AppError> {
    let attendance = summary(db, shopper_id, None, None)?;
    let talks: Vec<_> = db
        .talks
        .iter()
        .filter(|talk| talk.shopper_id == shopper_id)
        .collect();
    let window_start = today - Duration::days(WARNING_WINDOW_DAYS);
    let recent_warning = talks.iter().any(|talk| {
        talk.kind == TalkKind::Warning && talk.held_on >= window_start && talk.held_on <= today
    });
    let rating = rate(&attendance, recent_warning);
    Ok(PerformanceSummary {
        talks: talks.len(),
        last_talk_on: talks.iter().map(|talk| talk.held_on).max(),
        recent_warning,
        rating,
        attendance,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceReport {
    pub filename: String,
    pub content: String,
}

fn percent(value: Option<f64>) -> String {
    match value {
        Some(value) => format!("{:.0}%", value * 100.0),
        None => "n/a".to_string(),
    }
}

/// Shifts of one calendar day, in start order.
struct DayBlock<'a> {
    date: NaiveDate,
    shifts: Vec<&'a Shift>,
    minutes: i64,
}

fn shift_minutes(shift: &Shift) -> Option<i64> {
    if shift.status.attended() {
        span_minutes(shift.start.as_str(), shift.end.as_str())
    } else {
        None
    }
}

/// Groups date-sorted shifts into one block per day.
fn day_blocks(shifts: &[Shift]) -> Vec<DayBlock<'_>> {
    let mut blocks: Vec<DayBlock<'_>> = Vec::new();
    for shift in shifts {
        let minutes = shift_minutes(shift).unwrap_or(0);
        match blocks.last_mut() {
            Some(block) if block.date == shift.date => {
                block.shifts.push(shift);
                block.minutes += minutes;
            }
            _ => blocks.push(DayBlock {
                date: shift.date,
                shifts: vec![shift],
                minutes,
            }),
        }
    }
    blocks
}

pub fn attendance_report(
    db: &Database,
    shopper_id: &str,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<AttendanceReport, AppError> {
    let shopper = db
        .shopper(shopper_id)
        .ok_or_else(|| AppError::not_found("shoppers", shopper_id))?;
    let totals = summary(db, shopper_id, from, to)?;
    let shifts = list(
        db,
        &ShiftFilter {
            shopper_id: Some(shopper_id.to_string()),
            from,
            to,
        },
    );

    let period = match (from, to) {
        (Some(from), Some(to)) => format!("{from} to {to}"),
        (Some(from), None) => format!("from {from}"),
        (None, Some(to)) => format!("through {to}"),
        (None, None) => "all dates".to_string(),
    };

    let mut lines: Vec<String> = Vec::new();
    lines.push(format!("# Attendance Summary: {}", shopper.name));
    lines.push(String::new());
    lines.push(format!("Period: {period}"));
    lines.push(String::new());
    lines.push(format!("Generated {}", now_string()));
    lines.push(String::new());
    lines.push(format!("Total Hours: {}", totals.hours_worked));
    lines.push(format!(
        "Worked: {} | Late: {} | No show: {} | Called out: {} | Scheduled: {}",
        totals.worked, totals.late, totals.no_show, totals.called_out, totals.scheduled
    ));
    lines.push(format!(
        "Attendance: {} | Punctuality: {}",
        percent(totals.attendance_rate),
        percent(totals.punctuality_rate)
    ));
    lines.push(String::new());
    if shifts.is_empty() {
        lines.push("_No shifts in this period._".to_string());
        lines.push(String::new());
    }
    for day in day_blocks(&shifts) {
        lines.push(format!("## {} ({})", day.date, day.date.format("%A")));
        lines.push(String::new());
        for shift in &day.shifts {
            lines.push(format!("### {} to {}", shift.start, shift.end));
            lines.push(String::new());
            lines.push(format!("Status: {}", shift.status.label()));
            lines.push(format!("Total: {}", format_hours(shift_minutes(shift))));
            let notes: Vec<String> = shift
                .notes
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(|line| format!("- {line}"))
                .collect();
            if !notes.is_empty() {
                lines.push(String::new());
                lines.push("Notes:".to_string());
                lines.extend(notes);
            }
            lines.push(String::new());
        }
        lines.push(format!("Day Total: {}", format_hours(Some(day.minutes))));
        lines.push(String::new());
    }

    let stem = sanitize_filename(shopper.name.as_str(), "shopper");
    let filename = match (from, to) {
        (Some(from), Some(to)) => format!("Attendance_{stem}_{from}_{to}.md"),
        _ => format!("Attendance_{stem}.md"),
    };
    Ok(AttendanceReport {
        filename,
        content: lines.join("\n"),
    })
}
