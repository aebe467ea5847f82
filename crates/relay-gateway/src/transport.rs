use async_trait::async_trait;

use relay_core::errors::DispatchError;

use crate::protocol::{GatewayRequest, GatewayResponse};

/// Wire boundary to the remote execution gateway.
#[async_trait]
pub trait GatewayTransport: Send + Sync {
    async fn submit(&self, request: &GatewayRequest) -> Result<GatewayResponse, DispatchError>;
}

/// HTTP transport: POSTs the JSON envelope to the gateway endpoint.
pub struct HttpGatewayClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpGatewayClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    /// Map a reqwest error onto the dispatch taxonomy. The transient set is
    /// deliberately narrow: connect timeouts and abnormally closed
    /// connections. Everything else is final.
    fn classify(e: reqwest::Error) -> DispatchError {
        if e.is_timeout() {
            DispatchError::ConnectTimeout(e.to_string())
        } else if e.is_connect() {
            DispatchError::ConnectionClosed(e.to_string())
        } else {
            DispatchError::Protocol(e.to_string())
        }
    }
}

#[async_trait]
impl GatewayTransport for HttpGatewayClient {
    async fn submit(&self, request: &GatewayRequest) -> Result<GatewayResponse, DispatchError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(Self::classify)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::RemoteStatus {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<GatewayResponse>()
            .await
            .map_err(|e| DispatchError::Protocol(e.to_string()))
    }
}
