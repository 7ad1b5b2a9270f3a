use chrono::NaiveDate;
use serde::Deserialize;

use crate::audit::AuditTrail;
use crate::error::AppError;
use crate::model::{AuditTable, Database, Talk, TalkKind};
use crate::util::{clamp_multiline, clamp_string, new_id, now_string};

#[derive(Debug, Clone, Deserialize)]
pub struct TalkInput {
    pub shopper_id: String,
    pub held_on: NaiveDate,
    #[serde(default)]
    pub kind: TalkKind,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub outcome: String,
    #[serde(default)]
    pub follow_up_on: Option<NaiveDate>,
    #[serde(default)]
    pub author: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TalkPatch {
    pub held_on: Option<NaiveDate>,
    pub kind: Option<TalkKind>,
    pub topic: Option<String>,
    pub notes: Option<String>,
    pub outcome: Option<String>,
    pub follow_up_on: Option<NaiveDate>,
    pub clear_follow_up: bool,
    pub author: Option<String>,
}

fn clean_topic(value: &str) -> Result<String, AppError> {
    let topic = clamp_string(value, 160, true);
    if topic.is_empty() {
        return Err(AppError::invalid("Talk topic is required."));
    }
    Ok(topic)
}

/// Newest first, optionally for one shopper.
pub fn list(db: &Database, shopper_id: Option<&str>) -> Vec<Talk> {
    let mut out: Vec<Talk> = db
        .talks
        .iter()
        .filter(|talk| shopper_id.map_or(true, |id| talk.shopper_id == id))
        .cloned()
        .collect();
    out.sort_by(|a, b| {
        b.held_on
            .cmp(&a.held_on)
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
    out
}

pub fn add(db: &mut Database, trail: &AuditTrail, input: TalkInput) -> Result<Talk, AppError> {
    if !db.has_shopper(input.shopper_id.as_str()) {
        return Err(AppError::not_found("shoppers", input.shopper_id.as_str()));
    }
    let now = now_string();
    let talk = Talk {
        id: new_id(),
        shopper_id: input.shopper_id,
        held_on: input.held_on,
        kind: input.kind,
        topic: clean_topic(input.topic.as_str())?,
        notes: clamp_multiline(input.notes.as_str(), 4000),
        outcome: clamp_multiline(input.outcome.as_str(), 1000),
        follow_up_on: input.follow_up_on,
        author: clamp_string(input.author.as_str(), 120, true),
        created_at: now.clone(),
        updated_at: now,
    };
    db.talks.push(talk.clone());
    trail.inserted(db, AuditTable::Talks, talk.id.as_str(), &talk)?;
    tracing::debug!(talk = %talk.id, kind = talk.kind.label(), "talk logged");
    Ok(talk)
}

pub fn update(
    db: &mut Database,
    trail: &AuditTrail,
    id: &str,
    patch: &TalkPatch,
) -> Result<Talk, AppError> {
    let before = db
        .talks
        .iter()
        .find(|talk| talk.id == id)
        .cloned()
        .ok_or_else(|| AppError::not_found("talks", id))?;
    let mut after = before.clone();
    if let Some(held_on) = patch.held_on {
        after.held_on = held_on;
    }
    if let Some(kind) = patch.kind {
        after.kind = kind;
    }
    if let Some(topic) = patch.topic.as_deref() {
        after.topic = clean_topic(topic)?;
    }
    if let Some(notes) = patch.notes.as_deref() {
        after.notes = clamp_multiline(notes, 4000);
    }
    if let Some(outcome) = patch.outcome.as_deref() {
        after.outcome = clamp_multiline(outcome, 1000);
    }
    if patch.clear_follow_up {
        after.follow_up_on = None;
    } else if let Some(date) = patch.follow_up_on {
        after.follow_up_on = Some(date);
    }
    if let Some(author) = patch.author.as_deref() {
        after.author = clamp_string(author, 120, true);
    }
    if after == before {
        return Ok(before);
    }
    after.updated_at = now_string();
    if let Some(slot) = db.talks.iter_mut().find(|talk| talk.id == id) {
        *slot = after.clone();
    }
    trail.updated(db, AuditTable::Talks, id, &before, &after)?;
    Ok(after)
}

pub fn delete(db: &mut Database, trail: &AuditTrail, id: &str) -> Result<String, AppError> {
    let idx = db
        .talks
        .iter()
        .position(|talk| talk.id == id)
        .ok_or_else(|| AppError::not_found("talks", id))?;
    let talk = db.talks.remove(idx);
    trail.deleted(db, AuditTable::Talks, id, &talk, Default::default())
}
