use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::connector::{
    ConnectionContext, ConnectionProbe, ConnectorError, FetchQuery, FetchResult, ProviderConnector,
    PushCommand, PushOutcome,
};
use crate::domain::entity::credentials::CredentialBundle;
use crate::domain::entity::provider_config::ProviderConfig;

/// GatewayConnector は型付きのコネクタ要求を JSON でプロバイダゲートウェイへ転送する実装。
/// 実際のスクレイピング・CRM API プロトコルはゲートウェイ側が担う。
pub struct GatewayConnector {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct GatewayRequest<'a, T: Serialize> {
    account_id: uuid::Uuid,
    credentials: &'a CredentialBundle,
    config: &'a ProviderConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    request: Option<T>,
}

impl GatewayConnector {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let parsed = url::Url::parse(base_url)?;
        if !matches!(parsed.scheme(), "http" | "https") {
            anyhow::bail!("gateway base_url must be http(s): {}", base_url);
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn call<T: Serialize + Send, R: DeserializeOwned>(
        &self,
        ctx: &ConnectionContext,
        operation: &str,
        request: Option<T>,
    ) -> Result<R, ConnectorError> {
        let url = format!(
            "{}/v1/{}/{}",
            self.base_url,
            ctx.provider.as_str().to_lowercase(),
            operation
        );
        let body = GatewayRequest {
            account_id: ctx.account_id,
            credentials: &ctx.credentials,
            config: &ctx.config,
            request,
        };
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ConnectorError::Timeout(format!("gateway request timed out: {e}"))
                } else {
                    ConnectorError::Provider(format!("gateway request failed: {e}"))
                }
            })?;

        let status = resp.status();
        if status.is_success() {
            return resp
                .json::<R>()
                .await
                .map_err(|e| ConnectorError::InvalidResponse(e.to_string()));
        }

        let text = resp.text().await.unwrap_or_default();
        tracing::warn!(
            account_id = %ctx.account_id,
            operation = operation,
            status = %status,
            "provider gateway returned an error"
        );
        Err(match status.as_u16() {
            401 | 403 => ConnectorError::Unauthorized(text),
            408 | 504 => ConnectorError::Timeout(format!("gateway timeout: {text}")),
            501 => ConnectorError::Unsupported(text),
            _ => ConnectorError::Provider(format!("gateway returned {status}: {text}")),
        })
    }
}

#[async_trait]
impl ProviderConnector for GatewayConnector {
    async fn test_connection(
        &self,
        ctx: &ConnectionContext,
    ) -> Result<ConnectionProbe, ConnectorError> {
        self.call::<(), _>(ctx, "test", None).await
    }

    async fn fetch(
        &self,
        ctx: &ConnectionContext,
        query: FetchQuery,
    ) -> Result<FetchResult, ConnectorError> {
        self.call(ctx, "fetch", Some(query)).await
    }

    async fn push(
        &self,
        ctx: &ConnectionContext,
        command: PushCommand,
    ) -> Result<PushOutcome, ConnectorError> {
        self.call(ctx, "push", Some(command)).await
    }
}
