use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::attendance::{self, PerformanceSummary};
use crate::audit::AuditTrail;
use crate::error::AppError;
use crate::model::{
    AuditChildren, AuditTable, Database, OnboardingChecklist, OnboardingStage, Shift, Shopper,
    Talk,
};
use crate::util::{clamp_multiline, clamp_string, new_id, now_string};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ShopperFilter {
    pub stage: Option<OnboardingStage>,
    pub branch: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ShopperInput {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub branch: String,
    pub stage: Option<OnboardingStage>,
    pub hire_date: Option<NaiveDate>,
    pub onboarding: Option<OnboardingChecklist>,
    pub notes: String,
}

/// Only fields that are `Some` are applied.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShopperPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub branch: Option<String>,
    pub stage: Option<OnboardingStage>,
    pub hire_date: Option<NaiveDate>,
    pub clear_hire_date: bool,
    pub onboarding: Option<OnboardingChecklist>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingProgress {
    pub done: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShopperDetail {
    pub shopper: Shopper,
    pub progress: OnboardingProgress,
    pub shifts: Vec<Shift>,
    pub talks: Vec<Talk>,
    pub performance: PerformanceSummary,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOutcome {
    pub audit_id: String,
    pub removed_shifts: usize,
    pub removed_talks: usize,
}

fn clean_name(value: &str) -> Result<String, AppError> {
    let name = clamp_string(value, 120, true);
    if name.is_empty() {
        return Err(AppError::invalid("Shopper name is required."));
    }
    Ok(name)
}

fn clean_email(value: &str) -> Result<String, AppError> {
    let email = clamp_string(value, 160, true);
    if !email.is_empty() && !email.contains('@') {
        return Err(AppError::invalid(format!("`{email}` is not an email address.")));
    }
    Ok(email)
}

/// Case-insensitive, whitespace-trimmed name key used for matching.
pub fn name_key(value: &str) -> String {
    value.trim().to_lowercase()
}

pub fn list(db: &Database, filter: &ShopperFilter) -> Vec<Shopper> {
    let search = filter
        .search
        .as_deref()
        .map(name_key)
        .filter(|text| !text.is_empty());
    let branch = filter
        .branch
        .as_deref()
        .map(name_key)
        .filter(|text| !text.is_empty());
    let mut out: Vec<Shopper> = db
        .shoppers
        .iter()
        .filter(|shopper| filter.stage.map_or(true, |stage| shopper.stage == stage))
        .filter(|shopper| {
            branch
                .as_deref()
                .map_or(true, |branch| name_key(shopper.branch.as_str()) == branch)
        })
        .filter(|shopper| {
            search.as_deref().map_or(true, |text| {
                shopper.name.to_lowercase().contains(text)
                    || shopper.email.to_lowercase().contains(text)
            })
        })
        .cloned()
        .collect();
    out.sort_by(|a, b| {
        name_key(a.name.as_str())
            .cmp(&name_key(b.name.as_str()))
            .then_with(|| a.id.cmp(&b.id))
    });
    out
}

pub fn detail(db: &Database, id: &str, today: NaiveDate) -> Result<ShopperDetail, AppError> {
    let shopper = db
        .shopper(id)
        .cloned()
        .ok_or_else(|| AppError::not_found("shoppers", id))?;
    let (done, total) = shopper.onboarding.progress();
    let shifts = attendance::list(db, &attendance::ShiftFilter::for_shopper(id));
    let talks = crate::talks::list(db, Some(id));
    let performance = attendance::performance(db, id, today)?;
    Ok(ShopperDetail {
        shopper,
        progress: OnboardingProgress { done, total },
        shifts,
        talks,
        performance,
    })
}

pub fn create(db: &mut Database, trail: &AuditTrail, input: ShopperInput) -> Result<Shopper, AppError> {
    let now = now_string();
    let shopper = Shopper {
        id: new_id(),
        name: clean_name(input.name.as_str())?,
        email: clean_email(input.email.as_str())?,
        phone: clamp_string(input.phone.as_str(), 40, true),
        branch: clamp_string(input.branch.as_str(), 80, true),
        stage: input.stage.unwrap_or_default(),
        hire_date: input.hire_date,
        onboarding: input.onboarding.unwrap_or_default(),
        notes: clamp_multiline(input.notes.as_str(), 4000),
        created_at: now.clone(),
        updated_at: now,
    };
    db.shoppers.push(shopper.clone());
    trail.inserted(db, AuditTable::Shoppers, shopper.id.as_str(), &shopper)?;
    Ok(shopper)
}

/// Applies `patch` in place and reports whether anything changed.
fn apply_patch(shopper: &mut Shopper, patch: &ShopperPatch) -> Result<bool, AppError> {
    let before = shopper.clone();
    if let Some(name) = patch.name.as_deref() {
        shopper.name = clean_name(name)?;
    }
    if let Some(email) = patch.email.as_deref() {
        shopper.email = clean_email(email)?;
    }
    if let Some(phone) = patch.phone.as_deref() {
        shopper.phone = clamp_string(phone, 40, true);
    }
    if let Some(branch) = patch.branch.as_deref() {
        shopper.branch = clamp_string(branch, 80, true);
    }
    if let Some(stage) = patch.stage {
        shopper.stage = stage;
    }
    if patch.clear_hire_date {
        shopper.hire_date = None;
    } else if let Some(date) = patch.hire_date {
        shopper.hire_date = Some(date);
    }
    if let Some(onboarding) = patch.onboarding {
        shopper.onboarding = onboarding;
    }
    if let Some(notes) = patch.notes.as_deref() {
        shopper.notes = clamp_multiline(notes, 4000);
    }
    Ok(*shopper != before)
}

/// Returns the shopper after the patch and whether it changed. Unchanged
/// shoppers are not audited and keep their `updated_at`.
pub(crate) fn patch_shopper(
    db: &mut Database,
    trail: &AuditTrail,
    id: &str,
    patch: &ShopperPatch,
) -> Result<(Shopper, bool), AppError> {
    let before = db
        .shopper(id)
        .cloned()
        .ok_or_else(|| AppError::not_found("shoppers", id))?;
    let mut after = before.clone();
    if !apply_patch(&mut after, patch)? {
        return Ok((before, false));
    }
    after.updated_at = now_string();
    if let Some(slot) = db.shopper_mut(id) {
        *slot = after.clone();
    }
    trail.updated(db, AuditTable::Shoppers, id, &before, &after)?;
    Ok((after, true))
}

pub fn update(
    db: &mut Database,
    trail: &AuditTrail,
    id: &str,
    patch: &ShopperPatch,
) -> Result<Shopper, AppError> {
    patch_shopper(db, trail, id, patch).map(|(shopper, _)| shopper)
}

/// Removes a shopper together with its shifts and talks. The audit entry
/// keeps all of them so the group can be restored.
pub fn delete(db: &mut Database, trail: &AuditTrail, id: &str) -> Result<DeleteOutcome, AppError> {
    let idx = db
        .shoppers
        .iter()
        .position(|shopper| shopper.id == id)
        .ok_or_else(|| AppError::not_found("shoppers", id))?;
    let shopper = db.shoppers.remove(idx);

    let (removed_shifts, kept_shifts): (Vec<Shift>, Vec<Shift>) = std::mem::take(&mut db.shifts)
        .into_iter()
        .partition(|shift| shift.shopper_id == id);
    db.shifts = kept_shifts;
    let (removed_talks, kept_talks): (Vec<Talk>, Vec<Talk>) = std::mem::take(&mut db.talks)
        .into_iter()
        .partition(|talk| talk.shopper_id == id);
    db.talks = kept_talks;

    let children = AuditChildren {
        shifts: removed_shifts
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<_, _>>()?,
        talks: removed_talks
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<_, _>>()?,
    };
    let audit_id = trail.deleted(db, AuditTable::Shoppers, id, &shopper, children)?;
    tracing::info!(
        shopper = id,
        shifts = removed_shifts.len(),
        talks = removed_talks.len(),
        "shopper deleted"
    );
    Ok(DeleteOutcome {
        audit_id,
        removed_shifts: removed_shifts.len(),
        removed_talks: removed_talks.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit;
    use crate::model::fixtures::{shift, talk};
    use crate::model::{AuditAction, ChangeSource, ShiftStatus, TalkKind};
    use pretty_assertions::assert_eq;

    fn trail() -> AuditTrail {
        AuditTrail::new(ChangeSource::Dashboard, 100)
    }

    fn input(name: &str) -> ShopperInput {
        ShopperInput {
            name: name.to_string(),
            ..ShopperInput::default()
        }
    }

    #[test]
    fn create_trims_and_audits() {
        let mut db = Database::default();
        let shopper = create(
            &mut db,
            &trail(),
            ShopperInput {
                name: "  Ana Lima ".to_string(),
                email: "ana@example.com".to_string(),
                stage: Some(OnboardingStage::Interviewing),
                ..ShopperInput::default()
            },
        )
        .unwrap();
        assert_eq!(shopper.name, "Ana Lima");
        assert_eq!(shopper.stage, OnboardingStage::Interviewing);
        assert_eq!(db.shoppers.len(), 1);
        assert_eq!(db.audit_logs.len(), 1);
        assert_eq!(db.audit_logs[0].action, AuditAction::Insert);
    }

    #[test]
    fn create_rejects_blank_name_and_bad_email() {
        let mut db = Database::default();
        assert!(create(&mut db, &trail(), input("   ")).is_err());
        let bad_email = ShopperInput {
            email: "not-an-email".to_string(),
            ..input("Ana")
        };
        assert!(create(&mut db, &trail(), bad_email).is_err());
        assert!(db.shoppers.is_empty());
        assert!(db.audit_logs.is_empty());
    }

    #[test]
    fn list_filters_and_sorts_by_name() {
        let mut db = Database::default();
        for name in ["zoe", "Bruno", "ana"] {
            create(&mut db, &trail(), input(name)).unwrap();
        }
        let id = db.shoppers[1].id.clone();
        update(
            &mut db,
            &trail(),
            id.as_str(),
            &ShopperPatch {
                stage: Some(OnboardingStage::Active),
                branch: Some("North".to_string()),
                ..ShopperPatch::default()
            },
        )
        .unwrap();

        let names: Vec<String> = list(&db, &ShopperFilter::default())
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["ana", "Bruno", "zoe"]);

        let active = list(
            &db,
            &ShopperFilter {
                stage: Some(OnboardingStage::Active),
                ..ShopperFilter::default()
            },
        );
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "Bruno");

        let north = list(
            &db,
            &ShopperFilter {
                branch: Some(" north ".to_string()),
                ..ShopperFilter::default()
            },
        );
        assert_eq!(north.len(), 1);

        let search = list(
            &db,
            &ShopperFilter {
                search: Some("O".to_string()),
                ..ShopperFilter::default()
            },
        );
        assert_eq!(search.len(), 2);
    }

    #[test]
    fn noop_patch_is_not_audited() {
        let mut db = Database::default();
        let shopper = create(&mut db, &trail(), input("Ana")).unwrap();
        let (same, changed) = patch_shopper(
            &mut db,
            &trail(),
            shopper.id.as_str(),
            &ShopperPatch {
                name: Some(" Ana ".to_string()),
                ..ShopperPatch::default()
            },
        )
        .unwrap();
        assert!(!changed);
        assert_eq!(same, shopper);
        assert_eq!(db.audit_logs.len(), 1);
    }

    #[test]
    fn patch_records_before_and_after() {
        let mut db = Database::default();
        let shopper = create(&mut db, &trail(), input("Ana")).unwrap();
        let updated = update(
            &mut db,
            &trail(),
            shopper.id.as_str(),
            &ShopperPatch {
                hire_date: NaiveDate::from_ymd_opt(2024, 6, 1),
                onboarding: Some(OnboardingChecklist {
                    background_cleared: true,
                    ..OnboardingChecklist::default()
                }),
                ..ShopperPatch::default()
            },
        )
        .unwrap();
        assert_eq!(updated.hire_date, NaiveDate::from_ymd_opt(2024, 6, 1));
        assert!(updated.onboarding.background_cleared);

        let entry = db.audit_logs.last().unwrap();
        assert_eq!(entry.action, AuditAction::Update);
        assert_eq!(entry.before.as_ref().unwrap()["hire_date"], serde_json::Value::Null);
        assert_eq!(entry.after.as_ref().unwrap()["hire_date"], "2024-06-01");

        let cleared = update(
            &mut db,
            &trail(),
            shopper.id.as_str(),
            &ShopperPatch {
                clear_hire_date: true,
                ..ShopperPatch::default()
            },
        )
        .unwrap();
        assert_eq!(cleared.hire_date, None);
    }

    #[test]
    fn patch_cannot_blank_the_name() {
        let mut db = Database::default();
        let shopper = create(&mut db, &trail(), input("Ana")).unwrap();
        let err = update(
            &mut db,
            &trail(),
            shopper.id.as_str(),
            &ShopperPatch {
                name: Some("".to_string()),
                ..ShopperPatch::default()
            },
        );
        assert!(err.is_err());
    }

    #[test]
    fn delete_cascades_and_restores() {
        let mut db = Database::default();
        let ana = create(&mut db, &trail(), input("Ana")).unwrap();
        let bo = create(&mut db, &trail(), input("Bo")).unwrap();
        db.shifts.push(shift("sh1", ana.id.as_str(), "2024-05-01", ShiftStatus::Worked));
        db.shifts.push(shift("sh2", bo.id.as_str(), "2024-05-01", ShiftStatus::Worked));
        db.talks.push(talk("t1", ana.id.as_str(), "2024-05-03", TalkKind::Review));

        let outcome = delete(&mut db, &trail(), ana.id.as_str()).unwrap();
        assert_eq!(outcome.removed_shifts, 1);
        assert_eq!(outcome.removed_talks, 1);
        assert_eq!(db.shoppers.len(), 1);
        assert_eq!(db.shifts.len(), 1);
        assert!(db.talks.is_empty());

        audit::restore(&mut db, &trail(), outcome.audit_id.as_str()).unwrap();
        assert!(db.has_shopper(ana.id.as_str()));
        assert_eq!(db.shifts.len(), 2);
        assert_eq!(db.talks.len(), 1);
    }

    #[test]
    fn detail_bundles_children_and_progress() {
        let mut db = Database::default();
        let ana = create(&mut db, &trail(), input("Ana")).unwrap();
        db.shifts.push(shift("sh1", ana.id.as_str(), "2024-05-01", ShiftStatus::Worked));
        db.talks.push(talk("t1", ana.id.as_str(), "2024-05-03", TalkKind::Review));
        let today = NaiveDate::from_ymd_opt(2024, 5, 10).unwrap();
        let detail = detail(&db, ana.id.as_str(), today).unwrap();
        assert_eq!(detail.shifts.len(), 1);
        assert_eq!(detail.talks.len(), 1);
        assert_eq!(detail.progress.total, 5);
        assert_eq!(detail.performance.talks, 1);
        assert!(super::detail(&db, "missing", today).is_err());
    }
}
