//! Plain-text talk reports for pasting into a team chat.
use serde::{Deserialize, Serialize};

use crate::model::{Shopper, Talk, TalkKind};
use crate::util::{clamp_multiline, clamp_string};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TalkReportForm {
    pub shopper_name: String,
    pub date: String,
    pub kind: TalkKind,
    pub conducted_by: String,
    pub topic: String,
    pub discussion: String,
    pub outcome: String,
    pub follow_up: String,
}

fn one_line(value: &str, max_len: usize) -> String {
    clamp_multiline(value, max_len)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn bullet_text(line: &str) -> &str {
    line.trim()
        .trim_start_matches(['-', '*', '•'])
        .trim_start()
}

pub fn build_talk_report(form: &TalkReportForm) -> String {
    let name = clamp_string(form.shopper_name.as_str(), 120, true);
    let mut lines = Vec::new();
    if name.is_empty() {
        lines.push(format!("*{} Talk*", form.kind.label()));
    } else {
        lines.push(format!("*{} Talk: {name}*", form.kind.label()));
    }

    let labelled = [
        ("Date", clamp_string(form.date.as_str(), 40, true)),
        ("Conducted by", clamp_string(form.conducted_by.as_str(), 120, true)),
        ("Topic", one_line(form.topic.as_str(), 160)),
    ];
    for (label, value) in labelled {
        if !value.is_empty() {
            lines.push(format!("{label}: {value}"));
        }
    }

    let discussion: Vec<String> = clamp_multiline(form.discussion.as_str(), 4000)
        .lines()
        .map(bullet_text)
        .filter(|line| !line.is_empty())
        .map(|line| format!("- {line}"))
        .collect();
    if !discussion.is_empty() {
        lines.push("Discussion:".to_string());
        lines.extend(discussion);
    }

    let outcome = one_line(form.outcome.as_str(), 1000);
    if !outcome.is_empty() {
        lines.push(format!("Outcome: {outcome}"));
    }
    let follow_up = clamp_string(form.follow_up.as_str(), 160, true);
    if !follow_up.is_empty() {
        lines.push(format!("Follow-up: {follow_up}"));
    }
    lines.join("\n")
}

pub fn form_from_talk(talk: &Talk, shopper: Option<&Shopper>) -> TalkReportForm {
    TalkReportForm {
        shopper_name: shopper.map(|s| s.name.clone()).unwrap_or_default(),
        date: talk.held_on.to_string(),
        kind: talk.kind,
        conducted_by: talk.author.clone(),
        topic: talk.topic.clone(),
        discussion: talk.notes.clone(),
        outcome: talk.outcome.clone(),
        follow_up: talk
            .follow_up_on
            .map(|date| date.to_string())
            .unwrap_or_default(),
    }
}
