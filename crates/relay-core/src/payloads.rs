use serde::{Deserialize, Serialize};

use crate::ids::RunId;

/// One deliverable unit handed back to the channel layer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_urls: Option<Vec<String>>,
}

impl ReplyPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn media(url: impl Into<String>) -> Self {
        Self {
            media_url: Some(url.into()),
            ..Self::default()
        }
    }
}

/// Completed run: ordered payloads plus execution metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub payloads: Vec<ReplyPayload>,
    pub meta: RunMeta,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMeta {
    pub run_id: RunId,
    /// True when the run executed on the local fallback path rather than
    /// the remote gateway.
    pub fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl RunResult {
    pub fn from_text(run_id: RunId, text: impl Into<String>) -> Self {
        Self {
            payloads: vec![ReplyPayload::text(text)],
            meta: RunMeta {
                run_id,
                fallback: false,
                duration_ms: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_text_constructor() {
        let p = ReplyPayload::text("hello");
        assert_eq!(p.text.as_deref(), Some("hello"));
        assert!(p.media_url.is_none());
    }

    #[test]
    fn payload_wire_casing() {
        let p = ReplyPayload {
            text: None,
            media_url: Some("https://example.com/a.png".into()),
            media_urls: Some(vec!["https://example.com/b.png".into()]),
        };
        let json = serde_json::to_value(&p).unwrap();
        assert!(json.get("mediaUrl").is_some());
        assert!(json.get("mediaUrls").is_some());
        assert!(json.get("media_url").is_none());
    }

    #[test]
    fn none_fields_omitted() {
        let p = ReplyPayload::text("hi");
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, r#"{"text":"hi"}"#);
    }

    #[test]
    fn run_result_roundtrip() {
        let result = RunResult::from_text(RunId::from_raw("run_1"), "done");
        let json = serde_json::to_string(&result).unwrap();
        let parsed: RunResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, result);
        assert!(!parsed.meta.fallback);
    }
}
