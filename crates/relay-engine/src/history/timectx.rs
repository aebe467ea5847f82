//! Time-context injection: elapsed annotations on user turns and a
//! current-time header on the most recent one, formatted in the
//! conversation's configured timezone.

use std::borrow::Cow;

use chrono::{DateTime, Local, NaiveDateTime, Utc};
use chrono_tz::Tz;
use tracing::warn;

use relay_core::messages::{Message, UserContent, UserMessage};

/// Marker that identifies an explicit current-time line in a user turn.
pub const NOW_MARKER: &str = "[Now:";

/// Annotate a user turn only once it is at least this old; fresher turns
/// gain nothing from "(0s ago)" noise.
const MIN_ELAPSED_SECS: i64 = 60;

#[derive(Clone, Debug)]
pub enum LaneTimezone {
    Named { name: String, tz: Tz },
    SystemLocal,
}

/// Wall-clock context for one pipeline run. Holding `now` fixed makes the
/// transform deterministic and re-application a no-op.
#[derive(Clone, Debug)]
pub struct TimeContext {
    pub now: DateTime<Utc>,
    pub timezone: LaneTimezone,
}

impl TimeContext {
    pub fn new(now: DateTime<Utc>, timezone_name: Option<&str>) -> Self {
        let timezone = match timezone_name {
            Some(name) => match name.parse::<Tz>() {
                Ok(tz) => LaneTimezone::Named {
                    name: name.to_string(),
                    tz,
                },
                Err(_) => {
                    warn!(
                        timezone = %name,
                        "invalid timezone for time context, falling back to system local"
                    );
                    LaneTimezone::SystemLocal
                }
            },
            None => LaneTimezone::SystemLocal,
        };
        Self { now, timezone }
    }

    pub fn format_timestamp(&self, timestamp: DateTime<Utc>) -> String {
        match &self.timezone {
            LaneTimezone::Named { name, tz } => {
                let local = timestamp.with_timezone(tz);
                format!(
                    "{} ({}, UTC{})",
                    local.format("%Y-%m-%d %H:%M:%S %Z"),
                    name,
                    local.format("%:z")
                )
            }
            LaneTimezone::SystemLocal => {
                let local = timestamp.with_timezone(&Local);
                format!(
                    "{} (system local, UTC{})",
                    local.format("%Y-%m-%d %H:%M:%S"),
                    local.format("%:z")
                )
            }
        }
    }

    pub fn now_header(&self) -> String {
        format!("[Now: {}]", self.format_timestamp(self.now))
    }

    /// Append an "(X ago)" elapsed annotation to user turns carrying an
    /// envelope timestamp, and prepend the `[Now: …]` header to the most
    /// recent user turn unless one is already present.
    pub fn annotate<'a>(&self, messages: &'a [Message]) -> Cow<'a, [Message]> {
        let last_user_idx = messages.iter().rposition(Message::is_user);
        let mut out: Vec<Message> = Vec::with_capacity(messages.len());
        let mut changed = false;

        for (i, m) in messages.iter().enumerate() {
            let mut msg = m.clone();
            if let Message::User(u) = &mut msg {
                if let Some(ts) = u.received_at {
                    let elapsed = self.now.signed_duration_since(ts);
                    if elapsed.num_seconds() >= MIN_ELAPSED_SECS
                        && !already_annotated(u)
                        && append_elapsed(u, elapsed)
                    {
                        changed = true;
                    }
                }
                if Some(i) == last_user_idx && !contains_now_marker(u) {
                    prepend_header(u, &self.now_header());
                    changed = true;
                }
            }
            out.push(msg);
        }

        if changed {
            Cow::Owned(out)
        } else {
            Cow::Borrowed(messages)
        }
    }
}

fn already_annotated(turn: &UserMessage) -> bool {
    turn.content.iter().rev().any(|c| match c {
        UserContent::Text { text } => text.trim_end().ends_with("ago)"),
        UserContent::Image { .. } => false,
    })
}

fn contains_now_marker(turn: &UserMessage) -> bool {
    turn.content.iter().any(|c| match c {
        UserContent::Text { text } => text.contains(NOW_MARKER),
        UserContent::Image { .. } => false,
    })
}

fn append_elapsed(turn: &mut UserMessage, elapsed: chrono::Duration) -> bool {
    let annotation = format!(" ({} ago)", format_elapsed(elapsed));
    for c in turn.content.iter_mut().rev() {
        if let UserContent::Text { text } = c {
            text.push_str(&annotation);
            return true;
        }
    }
    false
}

fn prepend_header(turn: &mut UserMessage, header: &str) {
    match turn.content.first_mut() {
        Some(UserContent::Text { text }) => {
            *text = format!("{header}\n{text}");
        }
        _ => {
            turn.content.insert(
                0,
                UserContent::Text {
                    text: header.to_string(),
                },
            );
        }
    }
}

pub(crate) fn format_elapsed(elapsed: chrono::Duration) -> String {
    let secs = elapsed.num_seconds().max(0);
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86_400 {
        format!("{}h", secs / 3600)
    } else {
        format!("{}d", secs / 86_400)
    }
}

/// Best-effort offsets for common timezone abbreviations. Ambiguous across
/// regions (CST, IST, ...), so the result is advisory annotation input
/// only, never an authoritative timestamp.
const ABBREV_OFFSETS_MINUTES: &[(&str, i32)] = &[
    ("UTC", 0),
    ("GMT", 0),
    ("PST", -8 * 60),
    ("PDT", -7 * 60),
    ("MST", -7 * 60),
    ("MDT", -6 * 60),
    ("CST", -6 * 60),
    ("CDT", -5 * 60),
    ("EST", -5 * 60),
    ("EDT", -4 * 60),
    ("BST", 60),
    ("CET", 60),
    ("CEST", 2 * 60),
    ("IST", 5 * 60 + 30),
    ("JST", 9 * 60),
    ("AEST", 10 * 60),
    ("AEDT", 11 * 60),
];

/// Parse an envelope timestamp string: RFC 3339 first, then RFC 2822, then
/// `YYYY-MM-DD HH:MM:SS <ABBREV>` via the abbreviation table.
pub fn parse_envelope_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }

    let (rest, abbrev) = s.rsplit_once(' ')?;
    let minutes = ABBREV_OFFSETS_MINUTES
        .iter()
        .find(|(a, _)| a.eq_ignore_ascii_case(abbrev))
        .map(|(_, m)| *m)?;
    let naive = NaiveDateTime::parse_from_str(rest.trim(), "%Y-%m-%d %H:%M:%S").ok()?;
    let offset = chrono::FixedOffset::east_opt(minutes * 60)?;
    naive
        .and_local_timezone(offset)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}
