//! Change audit trail and snapshot restore.
//!
//! Every mutation of shoppers, shifts and talks pushes an [`AuditEntry`]
//! holding JSON snapshots of the row before and after the change. Deleting a
//! shopper also captures its shifts and talks so a restore can bring the
//! whole group back.
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::AppError;
use crate::model::{
    AuditAction, AuditChildren, AuditEntry, AuditTable, ChangeSource, Database, Shift, Shopper,
    Talk,
};
use crate::util::{new_id, now_string};

/// Writes audit entries for one logical operation.
#[derive(Debug, Clone, Copy)]
pub struct AuditTrail {
    pub source: ChangeSource,
    pub max_entries: usize,
}

impl AuditTrail {
    pub fn new(source: ChangeSource, max_entries: usize) -> Self {
        Self {
            source,
            max_entries: max_entries.max(1),
        }
    }

    pub fn with_source(self, source: ChangeSource) -> Self {
        Self { source, ..self }
    }

    fn entry(&self, table: AuditTable, record_id: &str, action: AuditAction) -> AuditEntry {
        AuditEntry {
            id: new_id(),
            table,
            record_id: record_id.to_string(),
            action,
            before: None,
            after: None,
            children: AuditChildren::default(),
            source: self.source,
            at: now_string(),
            restored_at: None,
        }
    }

    fn push(&self, db: &mut Database, entry: AuditEntry) -> String {
        let id = entry.id.clone();
        db.audit_logs.push(entry);
        if db.audit_logs.len() > self.max_entries {
            let excess = db.audit_logs.len() - self.max_entries;
            db.audit_logs.drain(..excess);
        }
        id
    }

    pub fn inserted<T: Serialize>(
        &self,
        db: &mut Database,
        table: AuditTable,
        record_id: &str,
        after: &T,
    ) -> Result<String, AppError> {
        let mut entry = self.entry(table, record_id, AuditAction::Insert);
        entry.after = Some(serde_json::to_value(after)?);
        Ok(self.push(db, entry))
    }

    pub fn updated<T: Serialize>(
        &self,
        db: &mut Database,
        table: AuditTable,
        record_id: &str,
        before: &T,
        after: &T,
    ) -> Result<String, AppError> {
        let mut entry = self.entry(table, record_id, AuditAction::Update);
        entry.before = Some(serde_json::to_value(before)?);
        entry.after = Some(serde_json::to_value(after)?);
        Ok(self.push(db, entry))
    }

    pub fn deleted<T: Serialize>(
        &self,
        db: &mut Database,
        table: AuditTable,
        record_id: &str,
        before: &T,
        children: AuditChildren,
    ) -> Result<String, AppError> {
        let mut entry = self.entry(table, record_id, AuditAction::Delete);
        entry.before = Some(serde_json::to_value(before)?);
        entry.children = children;
        Ok(self.push(db, entry))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuditFilter {
    pub table: Option<AuditTable>,
    pub record_id: Option<String>,
    pub action: Option<AuditAction>,
    pub limit: Option<usize>,
}

/// Newest first.
pub fn list(db: &Database, filter: &AuditFilter) -> Vec<AuditEntry> {
    let record_id = filter
        .record_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty());
    db.audit_logs
        .iter()
        .rev()
        .filter(|entry| filter.table.map_or(true, |table| entry.table == table))
        .filter(|entry| record_id.map_or(true, |id| entry.record_id == id))
        .filter(|entry| filter.action.map_or(true, |action| entry.action == action))
        .take(filter.limit.unwrap_or(500).max(1))
        .cloned()
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreOutcome {
    pub table: AuditTable,
    pub record_id: String,
    pub action: AuditAction,
    pub restored_shifts: usize,
    pub restored_talks: usize,
    pub audit_id: String,
}

fn snapshot<T: serde::de::DeserializeOwned>(
    entry: &AuditEntry,
    value: Option<&serde_json::Value>,
) -> Result<T, AppError> {
    let value = value.ok_or_else(|| AppError::NotRestorable(entry.id.clone()))?;
    serde_json::from_value(value.clone())
        .map_err(|err| AppError::invalid(format!("Audit snapshot {} is unreadable: {err}", entry.id)))
}

/// Puts back the state captured by audit entry `entry_id`.
///
/// Deletes are undone by re-inserting the snapshot (plus captured child
/// rows for shoppers); updates by overwriting the current row with the
/// `before` snapshot. Inserts cannot be restored.
pub fn restore(
    db: &mut Database,
    trail: &AuditTrail,
    entry_id: &str,
) -> Result<RestoreOutcome, AppError> {
    let trail = trail.with_source(ChangeSource::Restore);
    let idx = db
        .audit_logs
        .iter()
        .position(|entry| entry.id == entry_id)
        .ok_or_else(|| AppError::not_found("audit", entry_id))?;
    let entry = db.audit_logs[idx].clone();
    if entry.restored_at.is_some() {
        return Err(AppError::AlreadyRestored(entry.id));
    }
    db.audit_logs[idx].restored_at = Some(now_string());

    let mut outcome = RestoreOutcome {
        table: entry.table,
        record_id: entry.record_id.clone(),
        action: entry.action,
        restored_shifts: 0,
        restored_talks: 0,
        audit_id: String::new(),
    };

    outcome.audit_id = match (entry.action, entry.table) {
        (AuditAction::Insert, _) => return Err(AppError::NotRestorable(entry.id)),
        (AuditAction::Delete, AuditTable::Shoppers) => {
            let shopper: Shopper = snapshot(&entry, entry.before.as_ref())?;
            if db.has_shopper(shopper.id.as_str()) {
                return Err(AppError::RecordExists {
                    table: "shoppers",
                    id: shopper.id,
                });
            }
            db.shoppers.push(shopper.clone());

            let shift_ids: HashSet<String> = db.shifts.iter().map(|s| s.id.clone()).collect();
            for value in &entry.children.shifts {
                let shift: Shift = snapshot(&entry, Some(value))?;
                if shift.id.is_empty() || shift_ids.contains(&shift.id) {
                    continue;
                }
                db.shifts.push(shift);
                outcome.restored_shifts += 1;
            }
            let talk_ids: HashSet<String> = db.talks.iter().map(|t| t.id.clone()).collect();
            for value in &entry.children.talks {
                let talk: Talk = snapshot(&entry, Some(value))?;
                if talk.id.is_empty() || talk_ids.contains(&talk.id) {
                    continue;
                }
                db.talks.push(talk);
                outcome.restored_talks += 1;
            }
            trail.inserted(db, AuditTable::Shoppers, shopper.id.as_str(), &shopper)?
        }
        (AuditAction::Delete, AuditTable::Shifts) => {
            let shift: Shift = snapshot(&entry, entry.before.as_ref())?;
            if db.shifts.iter().any(|s| s.id == shift.id) {
                return Err(AppError::RecordExists {
                    table: "shifts",
                    id: shift.id,
                });
            }
            if !db.has_shopper(shift.shopper_id.as_str()) {
                return Err(AppError::ParentMissing(shift.shopper_id));
            }
            db.shifts.push(shift.clone());
            trail.inserted(db, AuditTable::Shifts, shift.id.as_str(), &shift)?
        }
        (AuditAction::Delete, AuditTable::Talks) => {
            let talk: Talk = snapshot(&entry, entry.before.as_ref())?;
            if db.talks.iter().any(|t| t.id == talk.id) {
                return Err(AppError::RecordExists {
                    table: "talks",
                    id: talk.id,
                });
            }
            if !db.has_shopper(talk.shopper_id.as_str()) {
                return Err(AppError::ParentMissing(talk.shopper_id));
            }
            db.talks.push(talk.clone());
            trail.inserted(db, AuditTable::Talks, talk.id.as_str(), &talk)?
        }
        (AuditAction::Update, AuditTable::Shoppers) => {
            let previous: Shopper = snapshot(&entry, entry.before.as_ref())?;
            let current = db
                .shopper_mut(entry.record_id.as_str())
                .ok_or_else(|| AppError::not_found("shoppers", entry.record_id.as_str()))?;
            let replaced = std::mem::replace(current, previous.clone());
            trail.updated(db, AuditTable::Shoppers, previous.id.as_str(), &replaced, &previous)?
        }
        (AuditAction::Update, AuditTable::Shifts) => {
            let previous: Shift = snapshot(&entry, entry.before.as_ref())?;
            if !db.has_shopper(previous.shopper_id.as_str()) {
                return Err(AppError::ParentMissing(previous.shopper_id));
            }
            let current = db
                .shifts
                .iter_mut()
                .find(|s| s.id == entry.record_id)
                .ok_or_else(|| AppError::not_found("shifts", entry.record_id.as_str()))?;
            let replaced = std::mem::replace(current, previous.clone());
            trail.updated(db, AuditTable::Shifts, previous.id.as_str(), &replaced, &previous)?
        }
        (AuditAction::Update, AuditTable::Talks) => {
            let previous: Talk = snapshot(&entry, entry.before.as_ref())?;
            if !db.has_shopper(previous.shopper_id.as_str()) {
                return Err(AppError::ParentMissing(previous.shopper_id));
            }
            let current = db
                .talks
                .iter_mut()
                .find(|t| t.id == entry.record_id)
                .ok_or_else(|| AppError::not_found("talks", entry.record_id.as_str()))?;
            let replaced = std::mem::replace(current, previous.clone());
            trail.updated(db, AuditTable::Talks, previous.id.as_str(), &replaced, &previous)?
        }
    };

    tracing::info!(
        entry = %entry.id,
        table = entry.table.as_str(),
        record = %entry.record_id,
        shifts = outcome.restored_shifts,
        talks = outcome.restored_talks,
        "audit entry restored"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{shift, shopper, talk};
    use crate::model::{ShiftStatus, TalkKind};
    use pretty_assertions::assert_eq;

    fn trail() -> AuditTrail {
        AuditTrail::new(ChangeSource::Dashboard, 100)
    }

    fn seeded() -> Database {
        let mut db = Database::default();
        db.shoppers.push(shopper("s1", "Ana"));
        db.shifts.push(shift("sh1", "s1", "2024-05-01", ShiftStatus::Worked));
        db.talks.push(talk("t1", "s1", "2024-05-02", TalkKind::Coaching));
        db
    }

    fn delete_shopper_with_children(db: &mut Database) -> String {
        let record = db.shoppers.remove(0);
        let children = AuditChildren {
            shifts: db.shifts.drain(..).map(|s| serde_json::to_value(s).unwrap()).collect(),
            talks: db.talks.drain(..).map(|t| serde_json::to_value(t).unwrap()).collect(),
        };
        trail()
            .deleted(db, AuditTable::Shoppers, "s1", &record, children)
            .unwrap()
    }

    #[test]
    fn trail_keeps_only_the_newest_entries() {
        let mut db = Database::default();
        let small = AuditTrail::new(ChangeSource::Dashboard, 2);
        for n in 0..3 {
            let record = shopper(format!("s{n}").as_str(), "X");
            small
                .inserted(&mut db, AuditTable::Shoppers, record.id.as_str(), &record)
                .unwrap();
        }
        let ids: Vec<_> = db.audit_logs.iter().map(|e| e.record_id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s2"]);
    }

    #[test]
    fn restoring_a_deleted_shopper_brings_back_children() {
        let mut db = seeded();
        let entry_id = delete_shopper_with_children(&mut db);
        assert!(db.shoppers.is_empty());

        let outcome = restore(&mut db, &trail(), entry_id.as_str()).unwrap();
        assert_eq!(outcome.restored_shifts, 1);
        assert_eq!(outcome.restored_talks, 1);
        assert_eq!(db, {
            let mut expected = seeded();
            expected.audit_logs = db.audit_logs.clone();
            expected
        });

        let newest = &list(&db, &AuditFilter::default())[0];
        assert_eq!(newest.action, AuditAction::Insert);
        assert_eq!(newest.source, ChangeSource::Restore);
        assert!(db.audit_logs[0].restored_at.is_some());
    }

    #[test]
    fn restore_twice_is_rejected() {
        let mut db = seeded();
        let entry_id = delete_shopper_with_children(&mut db);
        restore(&mut db, &trail(), entry_id.as_str()).unwrap();
        let err = restore(&mut db, &trail(), entry_id.as_str()).unwrap_err();
        assert!(matches!(err, AppError::AlreadyRestored(_)));
    }

    #[test]
    fn restore_skips_children_already_present() {
        let mut db = seeded();
        let entry_id = delete_shopper_with_children(&mut db);
        db.talks.push(talk("t1", "s1", "2024-05-02", TalkKind::Coaching));
        let outcome = restore(&mut db, &trail(), entry_id.as_str()).unwrap();
        assert_eq!(outcome.restored_talks, 0);
        assert_eq!(db.talks.len(), 1);
    }

    #[test]
    fn restore_refuses_when_record_exists_again() {
        let mut db = seeded();
        let entry_id = delete_shopper_with_children(&mut db);
        db.shoppers.push(shopper("s1", "Ana (recreated)"));
        let err = restore(&mut db, &trail(), entry_id.as_str()).unwrap_err();
        assert!(matches!(err, AppError::RecordExists { .. }));
    }

    #[test]
    fn deleted_shift_needs_its_shopper() {
        let mut db = seeded();
        let removed = db.shifts.remove(0);
        let entry_id = trail()
            .deleted(&mut db, AuditTable::Shifts, "sh1", &removed, AuditChildren::default())
            .unwrap();
        db.shoppers.clear();
        let err = restore(&mut db, &trail(), entry_id.as_str()).unwrap_err();
        assert!(matches!(err, AppError::ParentMissing(ref id) if id == "s1"));
    }

    #[test]
    fn update_restore_reverts_to_before_snapshot() {
        let mut db = seeded();
        let before = db.shoppers[0].clone();
        db.shoppers[0].name = "Ana Maria".to_string();
        let after = db.shoppers[0].clone();
        let entry_id = trail()
            .updated(&mut db, AuditTable::Shoppers, "s1", &before, &after)
            .unwrap();

        restore(&mut db, &trail(), entry_id.as_str()).unwrap();
        assert_eq!(db.shoppers[0].name, "Ana");
        let newest = &list(&db, &AuditFilter::default())[0];
        assert_eq!(newest.action, AuditAction::Update);
        assert_eq!(newest.before.as_ref().unwrap()["name"], "Ana Maria");
    }

    #[test]
    fn update_restore_needs_the_record() {
        let mut db = seeded();
        let before = db.talks[0].clone();
        let entry_id = trail()
            .updated(&mut db, AuditTable::Talks, "t1", &before, &before)
            .unwrap();
        db.talks.clear();
        let err = restore(&mut db, &trail(), entry_id.as_str()).unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[test]
    fn inserts_are_not_restorable() {
        let mut db = seeded();
        let record = db.shoppers[0].clone();
        let entry_id = trail()
            .inserted(&mut db, AuditTable::Shoppers, "s1", &record)
            .unwrap();
        let err = restore(&mut db, &trail(), entry_id.as_str()).unwrap_err();
        assert!(matches!(err, AppError::NotRestorable(_)));
    }

    #[test]
    fn list_filters_by_table_record_and_action() {
        let mut db = seeded();
        let s = db.shoppers[0].clone();
        let sh = db.shifts[0].clone();
        trail().inserted(&mut db, AuditTable::Shoppers, "s1", &s).unwrap();
        trail().inserted(&mut db, AuditTable::Shifts, "sh1", &sh).unwrap();
        trail()
            .deleted(&mut db, AuditTable::Shifts, "sh1", &sh, AuditChildren::default())
            .unwrap();

        let shifts = list(
            &db,
            &AuditFilter {
                table: Some(AuditTable::Shifts),
                ..AuditFilter::default()
            },
        );
        assert_eq!(shifts.len(), 2);
        assert_eq!(shifts[0].action, AuditAction::Delete);

        let by_record = list(
            &db,
            &AuditFilter {
                record_id: Some(" s1 ".to_string()),
                ..AuditFilter::default()
            },
        );
        assert_eq!(by_record.len(), 1);

        let deletes = list(
            &db,
            &AuditFilter {
                action: Some(AuditAction::Delete),
                limit: Some(5),
                ..AuditFilter::default()
            },
        );
        assert_eq!(deletes.len(), 1);
    }
}
