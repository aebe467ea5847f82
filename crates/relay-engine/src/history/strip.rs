use std::borrow::Cow;

use relay_core::messages::Message;

/// Remove tool history from the message list: tool-result turns are
/// dropped and tool-call/thinking blocks are stripped from assistant
/// turns. An assistant turn that would end up contentless gets one empty
/// text block instead of disappearing.
pub fn strip_tool_history(messages: &[Message]) -> Cow<'_, [Message]> {
    let needs_change = messages.iter().any(|m| match m {
        Message::ToolResult(_) => true,
        Message::Assistant(a) => a.has_tool_calls() || a.has_thinking(),
        Message::User(_) => false,
    });
    if !needs_change {
        return Cow::Borrowed(messages);
    }

    let out = messages
        .iter()
        .filter_map(|m| match m {
            Message::ToolResult(_) => None,
            Message::Assistant(a) if a.has_tool_calls() || a.has_thinking() => {
                Some(Message::Assistant(a.text_only()))
            }
            other => Some(other.clone()),
        })
        .collect();
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::messages::{AssistantContent, AssistantMessage, ToolResultMessage};

    fn tool_heavy_conversation() -> Vec<Message> {
        vec![
            Message::user_text("look this up"),
            Message::Assistant(AssistantMessage {
                content: vec![
                    AssistantContent::Thinking { text: "let me check".into() },
                    AssistantContent::Text { text: "checking".into() },
                    AssistantContent::ToolCall {
                        id: "call_1".into(),
                        name: "web_fetch".into(),
                        arguments: serde_json::json!({"url": "https://example.com"}),
                    },
                ],
            }),
            Message::ToolResult(ToolResultMessage {
                tool_call_id: "call_1".into(),
                content: vec![],
            }),
            Message::assistant_text("here is what I found"),
        ]
    }

    #[test]
    fn clean_history_is_noop_by_reference() {
        let messages = vec![Message::user_text("hi"), Message::assistant_text("hello")];
        let out = strip_tool_history(&messages);
        assert!(matches!(out, Cow::Borrowed(_)));
    }

    #[test]
    fn tool_results_removed_and_blocks_stripped() {
        let messages = tool_heavy_conversation();
        let out = strip_tool_history(&messages).into_owned();

        assert_eq!(out.len(), 3);
        assert!(!out.iter().any(Message::is_tool_result));
        match &out[1] {
            Message::Assistant(a) => {
                assert!(!a.has_tool_calls());
                assert!(!a.has_thinking());
                assert_eq!(a.text_content(), "checking");
            }
            other => panic!("expected assistant turn, got {other:?}"),
        }
    }

    #[test]
    fn contentless_assistant_turn_gets_empty_text_block() {
        let messages = vec![Message::Assistant(AssistantMessage {
            content: vec![AssistantContent::ToolCall {
                id: "call_1".into(),
                name: "bash".into(),
                arguments: serde_json::json!({}),
            }],
        })];
        let out = strip_tool_history(&messages).into_owned();
        assert_eq!(out.len(), 1);
        match &out[0] {
            Message::Assistant(a) => {
                assert_eq!(a.content, vec![AssistantContent::Text { text: String::new() }]);
            }
            other => panic!("expected assistant turn, got {other:?}"),
        }
    }

    #[test]
    fn turn_order_preserved() {
        let messages = tool_heavy_conversation();
        let out = strip_tool_history(&messages).into_owned();
        assert!(out[0].is_user());
        assert!(matches!(&out[2], Message::Assistant(a) if a.text_content() == "here is what I found"));
    }

    #[test]
    fn reapplication_is_noop() {
        let messages = tool_heavy_conversation();
        let once = strip_tool_history(&messages).into_owned();
        let twice = strip_tool_history(&once);
        assert!(matches!(twice, Cow::Borrowed(_)));
    }
}
