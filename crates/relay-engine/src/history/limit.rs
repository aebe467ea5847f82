use std::borrow::Cow;

use relay_core::messages::Message;

/// Keep only the last `max_user_turns` user turns and everything after the
/// earliest kept user turn. Unset limit, a zero limit, or a conversation
/// already within the limit returns the input unchanged by reference.
pub fn limit_turns(messages: &[Message], max_user_turns: Option<usize>) -> Cow<'_, [Message]> {
    let Some(limit) = max_user_turns else {
        return Cow::Borrowed(messages);
    };
    if limit == 0 {
        return Cow::Borrowed(messages);
    }

    let user_indices: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.is_user())
        .map(|(i, _)| i)
        .collect();

    if user_indices.len() <= limit {
        return Cow::Borrowed(messages);
    }

    let start = user_indices[user_indices.len() - limit];
    Cow::Owned(messages[start..].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation() -> Vec<Message> {
        vec![
            Message::user_text("one"),
            Message::assistant_text("re: one"),
            Message::user_text("two"),
            Message::assistant_text("re: two"),
            Message::user_text("three"),
            Message::assistant_text("re: three"),
        ]
    }

    #[test]
    fn unset_limit_is_noop_by_reference() {
        let messages = conversation();
        let out = limit_turns(&messages, None);
        assert!(matches!(out, Cow::Borrowed(_)));
    }

    #[test]
    fn short_conversation_is_noop_by_reference() {
        let messages = conversation();
        let out = limit_turns(&messages, Some(3));
        assert!(matches!(out, Cow::Borrowed(_)));
        let out = limit_turns(&messages, Some(10));
        assert!(matches!(out, Cow::Borrowed(_)));
    }

    #[test]
    fn keeps_last_n_user_turns_and_tail() {
        let messages = conversation();
        let out = limit_turns(&messages, Some(2));
        let out = out.into_owned();
        assert_eq!(out.len(), 4);
        assert!(matches!(&out[0], Message::User(u) if u.text_content() == "two"));
        assert!(matches!(&out[3], Message::Assistant(a) if a.text_content() == "re: three"));
    }

    #[test]
    fn keeps_everything_after_earliest_kept_user_turn() {
        // Tool turns between kept user turns survive untouched.
        let messages = vec![
            Message::user_text("old"),
            Message::user_text("recent"),
            Message::ToolResult(relay_core::messages::ToolResultMessage {
                tool_call_id: "call_1".into(),
                content: vec![],
            }),
            Message::assistant_text("done"),
        ];
        let out = limit_turns(&messages, Some(1)).into_owned();
        assert_eq!(out.len(), 3);
        assert!(out[1].is_tool_result());
    }

    #[test]
    fn zero_limit_is_noop() {
        let messages = conversation();
        let out = limit_turns(&messages, Some(0));
        assert!(matches!(out, Cow::Borrowed(_)));
    }

    #[test]
    fn reapplication_is_noop() {
        let messages = conversation();
        let once = limit_turns(&messages, Some(2)).into_owned();
        let twice = limit_turns(&once, Some(2));
        assert!(matches!(twice, Cow::Borrowed(_)));
    }

    #[test]
    fn empty_input_is_noop() {
        let out = limit_turns(&[], Some(2));
        assert!(matches!(out, Cow::Borrowed(_)));
    }
}
