//! RPC envelope for the remote execution gateway.

use serde::{Deserialize, Serialize};

use relay_core::ids::{IdempotencyKey, RunId};
use relay_core::messages::Message;
use relay_core::payloads::RunResult;
use relay_core::session::SessionKey;

pub const METHOD_AGENT_RUN: &str = "agent.run";

/// Prepared agent-run parameters: the prompt, the already-transformed
/// history, and the session lane the run is bound to (absent for detached
/// parallel forks).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunParams {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_key: Option<SessionKey>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<Message>,
}

impl RunParams {
    pub fn for_lane(key: SessionKey, prompt: impl Into<String>, history: Vec<Message>) -> Self {
        Self {
            prompt: prompt.into(),
            session_key: Some(key),
            history,
        }
    }

    /// Parameters for a detached run with no lane affinity.
    pub fn detached(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            session_key: None,
            history: Vec::new(),
        }
    }
}

/// One request over the gateway boundary. The idempotency key is supplied
/// by the caller so a retried request after a transient disconnect is
/// safely replayable on the remote side.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayRequest {
    pub method: String,
    pub params: serde_json::Value,
    pub idempotency_key: IdempotencyKey,
    pub timeout_ms: u64,
}

impl GatewayRequest {
    pub fn agent_run(
        params: &RunParams,
        idempotency_key: IdempotencyKey,
        timeout_ms: u64,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            method: METHOD_AGENT_RUN.to_string(),
            params: serde_json::to_value(params)?,
            idempotency_key,
            timeout_ms,
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayResponse {
    pub run_id: RunId,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<RunResult>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Ok,
    Error,
    Timeout,
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::payloads::ReplyPayload;

    #[test]
    fn request_wire_casing() {
        let params = RunParams::for_lane(
            SessionKey::direct("telegram", "12345"),
            "hello",
            vec![Message::user_text("earlier")],
        );
        let req = GatewayRequest::agent_run(&params, IdempotencyKey::from_raw("idem_1"), 30_000)
            .unwrap();
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["method"], "agent.run");
        assert_eq!(json["idempotencyKey"], "idem_1");
        assert_eq!(json["timeoutMs"], 30_000);
        assert_eq!(json["params"]["sessionKey"], "telegram:dm:12345");
    }

    #[test]
    fn detached_params_omit_lane() {
        let params = RunParams::detached("fork");
        let json = serde_json::to_value(&params).unwrap();
        assert!(json.get("sessionKey").is_none());
        assert!(json.get("history").is_none());
    }

    #[test]
    fn response_roundtrip() {
        let resp = GatewayResponse {
            run_id: RunId::from_raw("run_1"),
            status: RunStatus::Ok,
            result: Some(RunResult {
                payloads: vec![ReplyPayload::text("done")],
                meta: relay_core::payloads::RunMeta {
                    run_id: RunId::from_raw("run_1"),
                    fallback: false,
                    duration_ms: Some(12),
                },
            }),
        };
        let json = serde_json::to_string(&resp).unwrap();
        let parsed: GatewayResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.status, RunStatus::Ok);
        assert_eq!(parsed.result.unwrap().payloads.len(), 1);
    }

    #[test]
    fn status_serialization() {
        assert_eq!(serde_json::to_string(&RunStatus::Ok).unwrap(), r#""ok""#);
        assert_eq!(serde_json::to_string(&RunStatus::Error).unwrap(), r#""error""#);
        assert_eq!(serde_json::to_string(&RunStatus::Timeout).unwrap(), r#""timeout""#);
    }
}
