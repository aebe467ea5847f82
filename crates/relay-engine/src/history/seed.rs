//! Cross-session seeding: carry conversational context from an old
//! transcript into a freshly started one as a single synthetic user turn.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use relay_core::messages::Message;
use relay_core::session::SessionKey;
use relay_store::{SessionLockManager, StoreError, TranscriptStore};

pub const SEED_HEADER: &str = "[Previous session context]";
pub const SEED_FOOTER: &str = "[End of previous context]";

/// Build the synthetic leading turn from an old transcript: the last
/// `keep_turns` user/assistant text-only turns, skipping tool turns, slash
/// commands, and turns already carrying provenance markers (seeding a
/// seeded session must not nest markers). Returns `None` when nothing
/// survives the filters.
pub fn seed_turn(old: &[Message], keep_turns: usize) -> Option<Message> {
    if keep_turns == 0 {
        return None;
    }

    let mut lines: Vec<String> = Vec::new();
    for m in old {
        match m {
            Message::User(u) => {
                if u.is_slash_command() {
                    continue;
                }
                let text = u.text_content();
                let text = text.trim();
                if text.is_empty() || text.contains(SEED_HEADER) || text.contains(SEED_FOOTER) {
                    continue;
                }
                lines.push(format!("User: {text}"));
            }
            Message::Assistant(a) => {
                if a.has_tool_calls() || a.has_thinking() {
                    continue;
                }
                let text = a.text_content();
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }
                lines.push(format!("Assistant: {text}"));
            }
            Message::ToolResult(_) => continue,
        }
    }

    if lines.is_empty() {
        return None;
    }
    let start = lines.len().saturating_sub(keep_turns);
    let body = lines[start..].join("\n");
    Some(Message::user_text(format!("{SEED_HEADER}\n{body}\n{SEED_FOOTER}")))
}

/// Seed a new session file from an old one. The synthetic turn is written
/// through the session write lock as the new transcript's first entry; a
/// transcript that already has content is left alone.
pub async fn carry_over(
    store: &TranscriptStore,
    locks: &Arc<SessionLockManager>,
    old_key: &SessionKey,
    new_key: &SessionKey,
    keep_turns: usize,
    lock_timeout: Duration,
    lock_stale_after: Duration,
) -> Result<bool, StoreError> {
    let old = store.read(old_key)?;
    let Some(seed) = seed_turn(&old, keep_turns) else {
        debug!(old_key = %old_key, "nothing to carry over");
        return Ok(false);
    };

    let new_path = store.path_for(new_key);
    let guard = locks.acquire(&new_path, lock_timeout, lock_stale_after).await?;

    let existing = store.read(new_key)?;
    if !existing.is_empty() {
        drop(guard);
        debug!(new_key = %new_key, "new session already has content, skipping seed");
        return Ok(false);
    }

    store.write_all(new_key, &[seed])?;
    drop(guard);

    info!(old_key = %old_key, new_key = %new_key, keep_turns, "seeded new session from previous transcript");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::messages::{AssistantContent, AssistantMessage, ToolResultMessage};
    use tempfile::tempdir;

    fn old_conversation() -> Vec<Message> {
        vec![
            Message::user_text("remind me tomorrow"),
            Message::Assistant(AssistantMessage {
                content: vec![AssistantContent::ToolCall {
                    id: "call_1".into(),
                    name: "create_reminder".into(),
                    arguments: serde_json::json!({}),
                }],
            }),
            Message::ToolResult(ToolResultMessage {
                tool_call_id: "call_1".into(),
                content: vec![],
            }),
            Message::assistant_text("done, scheduled for 9am"),
            Message::user_text("/status"),
            Message::user_text("thanks!"),
        ]
    }

    #[test]
    fn seed_turn_keeps_text_only_tail() {
        let seed = seed_turn(&old_conversation(), 10).unwrap();
        let Message::User(u) = &seed else {
            panic!("expected user turn");
        };
        let text = u.text_content();
        assert!(text.starts_with(SEED_HEADER));
        assert!(text.ends_with(SEED_FOOTER));
        assert!(text.contains("User: remind me tomorrow"));
        assert!(text.contains("Assistant: done, scheduled for 9am"));
        assert!(text.contains("User: thanks!"));
        // Tool turns and slash commands never leak into the seed.
        assert!(!text.contains("/status"));
        assert!(!text.contains("create_reminder"));
    }

    #[test]
    fn seed_turn_truncates_to_last_k() {
        let seed = seed_turn(&old_conversation(), 1).unwrap();
        let Message::User(u) = &seed else {
            panic!("expected user turn");
        };
        let text = u.text_content();
        assert!(text.contains("User: thanks!"));
        assert!(!text.contains("remind me tomorrow"));
    }

    #[test]
    fn seed_turn_empty_inputs() {
        assert!(seed_turn(&[], 5).is_none());
        assert!(seed_turn(&old_conversation(), 0).is_none());

        let tool_only = vec![Message::ToolResult(ToolResultMessage {
            tool_call_id: "call_1".into(),
            content: vec![],
        })];
        assert!(seed_turn(&tool_only, 5).is_none());
    }

    #[test]
    fn seeding_a_seeded_transcript_does_not_nest() {
        let seeded = vec![
            seed_turn(&old_conversation(), 10).unwrap(),
            Message::user_text("new question"),
            Message::assistant_text("new answer"),
        ];
        let second = seed_turn(&seeded, 10).unwrap();
        let Message::User(u) = &second else {
            panic!("expected user turn");
        };
        let text = u.text_content();
        // Exactly one header/footer pair: the old seed turn was skipped.
        assert_eq!(text.matches(SEED_HEADER).count(), 1);
        assert_eq!(text.matches(SEED_FOOTER).count(), 1);
        assert!(text.contains("User: new question"));
        assert!(!text.contains("thanks!"));
    }

    #[tokio::test]
    async fn carry_over_writes_leading_turn() {
        let dir = tempdir().unwrap();
        let store = TranscriptStore::new(dir.path()).unwrap();
        let locks = Arc::new(SessionLockManager::new());

        let old_key = SessionKey::direct("telegram", "old");
        let new_key = SessionKey::direct("telegram", "new");
        store.write_all(&old_key, &old_conversation()).unwrap();

        let seeded = carry_over(
            &store,
            &locks,
            &old_key,
            &new_key,
            5,
            Duration::from_secs(1),
            Duration::from_secs(60),
        )
        .await
        .unwrap();
        assert!(seeded);

        let new = store.read(&new_key).unwrap();
        assert_eq!(new.len(), 1);
        let Message::User(u) = &new[0] else {
            panic!("expected user turn");
        };
        assert!(u.text_content().starts_with(SEED_HEADER));

        // Lock released after the write.
        assert_eq!(locks.held_count(), 0);
    }

    #[tokio::test]
    async fn carry_over_skips_nonempty_target() {
        let dir = tempdir().unwrap();
        let store = TranscriptStore::new(dir.path()).unwrap();
        let locks = Arc::new(SessionLockManager::new());

        let old_key = SessionKey::direct("telegram", "old");
        let new_key = SessionKey::direct("telegram", "new");
        store.write_all(&old_key, &old_conversation()).unwrap();
        store.write_all(&new_key, &[Message::user_text("already here")]).unwrap();

        let seeded = carry_over(
            &store,
            &locks,
            &old_key,
            &new_key,
            5,
            Duration::from_secs(1),
            Duration::from_secs(60),
        )
        .await
        .unwrap();
        assert!(!seeded);

        let new = store.read(&new_key).unwrap();
        assert_eq!(new, vec![Message::user_text("already here")]);
    }

    #[tokio::test]
    async fn carry_over_empty_source_is_noop() {
        let dir = tempdir().unwrap();
        let store = TranscriptStore::new(dir.path()).unwrap();
        let locks = Arc::new(SessionLockManager::new());

        let seeded = carry_over(
            &store,
            &locks,
            &SessionKey::direct("telegram", "missing"),
            &SessionKey::direct("telegram", "new"),
            5,
            Duration::from_secs(1),
            Duration::from_secs(60),
        )
        .await
        .unwrap();
        assert!(!seeded);
    }
}
