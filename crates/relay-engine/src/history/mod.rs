//! History transform pipeline.
//!
//! Pure, order-preserving transforms over the message list handed to a
//! run. Every transform returns `Cow::Borrowed` when it made no change, so
//! callers can cheaply skip downstream work; re-applying a transform to
//! its own output is always a no-op.

pub mod limit;
pub mod seed;
pub mod strip;
pub mod timectx;

pub use limit::limit_turns;
pub use seed::{carry_over, seed_turn, SEED_FOOTER, SEED_HEADER};
pub use strip::strip_tool_history;
pub use timectx::{parse_envelope_timestamp, LaneTimezone, TimeContext};

use std::borrow::Cow;

use relay_core::messages::Message;
use relay_core::session::SessionKey;

/// Configuration for the standard pipeline.
#[derive(Clone, Debug, Default)]
pub struct HistoryConfig {
    /// Keep only the last N user turns; `None` keeps everything.
    pub max_user_turns: Option<usize>,
    /// Strip tool history from direct-message lanes.
    pub strip_tool_history_in_dms: bool,
    /// IANA timezone name for time annotations.
    pub timezone: Option<String>,
}

/// Run the standard pipeline: turn limiting, tool-history stripping
/// (DM lanes only, config-gated), then time-context injection.
pub fn prepare<'a>(
    messages: &'a [Message],
    key: &SessionKey,
    config: &HistoryConfig,
    time: &TimeContext,
) -> Cow<'a, [Message]> {
    let mut current = limit_turns(messages, config.max_user_turns);

    if config.strip_tool_history_in_dms && key.is_direct() {
        current = step(current, strip_tool_history);
    }

    step(current, |m: &[Message]| time.annotate(m))
}

/// Apply one transform to a possibly-already-owned list, preserving the
/// borrowed-means-unchanged contract end to end.
fn step<'a, F>(current: Cow<'a, [Message]>, f: F) -> Cow<'a, [Message]>
where
    F: for<'b> Fn(&'b [Message]) -> Cow<'b, [Message]>,
{
    match current {
        Cow::Borrowed(slice) => f(slice),
        Cow::Owned(vec) => {
            let changed = match f(&vec) {
                Cow::Owned(out) => Some(out),
                Cow::Borrowed(_) => None,
            };
            match changed {
                Some(out) => Cow::Owned(out),
                None => Cow::Owned(vec),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn dm_key() -> SessionKey {
        SessionKey::direct("telegram", "12345")
    }

    #[test]
    fn prepare_noop_returns_borrowed() {
        let messages = vec![Message::user_text("hi"), Message::assistant_text("hello")];
        let config = HistoryConfig::default();
        let time = TimeContext::new(Utc::now(), None);

        // A userless time annotation still touches the last user turn with
        // a [Now: …] header, so use a history whose last turn is assistant.
        let out = prepare(&messages[1..], &dm_key(), &config, &time);
        assert!(matches!(out, Cow::Borrowed(_)));
    }

    #[test]
    fn prepare_composes_limit_and_strip() {
        let messages = vec![
            Message::user_text("one"),
            Message::assistant_text("a"),
            Message::user_text("two"),
            Message::Assistant(relay_core::messages::AssistantMessage {
                content: vec![relay_core::messages::AssistantContent::ToolCall {
                    id: "call_1".into(),
                    name: "fetch".into(),
                    arguments: serde_json::json!({}),
                }],
            }),
            Message::ToolResult(relay_core::messages::ToolResultMessage {
                tool_call_id: "call_1".into(),
                content: vec![],
            }),
            Message::user_text("three"),
        ];
        let config = HistoryConfig {
            max_user_turns: Some(2),
            strip_tool_history_in_dms: true,
            timezone: None,
        };
        let time = TimeContext::new(Utc::now(), None);

        let out = prepare(&messages, &dm_key(), &config, &time);
        // "one" dropped by the limiter; the tool turn dropped by the
        // stripper; the tool-call assistant turn reduced to an empty text
        // block; the last user turn gains a [Now: …] header.
        let out = out.into_owned();
        assert_eq!(out.len(), 3);
        assert!(matches!(&out[0], Message::User(u) if u.text_content() == "two"));
        assert!(!out.iter().any(Message::is_tool_result));
    }

    #[test]
    fn strip_skipped_for_group_lanes() {
        let messages = vec![
            Message::user_text("hi"),
            Message::ToolResult(relay_core::messages::ToolResultMessage {
                tool_call_id: "call_1".into(),
                content: vec![],
            }),
            Message::assistant_text("done"),
        ];
        let config = HistoryConfig {
            max_user_turns: None,
            strip_tool_history_in_dms: true,
            timezone: None,
        };
        let time = TimeContext::new(Utc::now(), None);

        let key = SessionKey::group("telegram", "chat");
        let out = prepare(&messages, &key, &config, &time);
        assert!(out.iter().any(Message::is_tool_result));
    }
}
