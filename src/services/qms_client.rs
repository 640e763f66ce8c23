//! Forwards decoded usage updates to the QMS accounting endpoint

use async_trait::async_trait;
use url::Url;

use crate::config::QmsConfig;
use crate::error::{AdapterError, Result};
use crate::models::{QmsUsageRequest, UsageUpdate};
use crate::services::amqp_consumer::UpdateHandler;

const UPDATE_TYPE_SET: &str = "SET";

/// QMS update handler
///
/// Reshapes each `UsageUpdate` into the QMS request body and POSTs it to the
/// usage endpoint. When forwarding is disabled the update is logged and
/// dropped. Failures never propagate to the consumer; they are logged here.
pub struct QmsForwarder {
    client: reqwest::Client,
    endpoint: Option<Url>,
    enabled: bool,
    user_domain: String,
}

impl QmsForwarder {
    pub fn new(config: &QmsConfig) -> Result<Self> {
        let endpoint = if config.enabled {
            let mut url = Url::parse(&config.base_url)?;
            url.set_path(&config.usage_path);
            Some(url)
        } else {
            None
        };

        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
            enabled: config.enabled,
            user_domain: config.user_domain.clone(),
        })
    }

    /// Build the outbound request body from a decoded update
    ///
    /// Parses the string-encoded usage value and strips the configured user
    /// domain suffix (e.g. `@example.org`) from the username.
    fn build_request(&self, update: &UsageUpdate) -> Result<QmsUsageRequest> {
        let usage_value: f64 = update.value.parse().map_err(|_| {
            AdapterError::InvalidValue(format!(
                "{:?} for attribute {} is not numeric",
                update.value, update.attribute
            ))
        })?;

        let suffix = format!("@{}", self.user_domain);
        let username = update
            .username
            .strip_suffix(&suffix)
            .unwrap_or(&update.username)
            .to_string();

        Ok(QmsUsageRequest {
            username,
            resource_name: update.attribute.clone(),
            usage_value,
            update_type: UPDATE_TYPE_SET.to_string(),
        })
    }

    async fn forward(&self, update: &UsageUpdate) -> Result<()> {
        // Endpoint presence is checked at construction when enabled.
        let endpoint = self
            .endpoint
            .as_ref()
            .ok_or_else(|| AdapterError::Config("QMS endpoint is not configured".to_string()))?;

        let body = self.build_request(update)?;

        let response = self
            .client
            .post(endpoint.clone())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let response_body = response.text().await.unwrap_or_default();
        tracing::info!(
            url = %endpoint,
            status = status.as_u16(),
            response = %response_body,
            "forwarded usage update to QMS"
        );

        Ok(())
    }
}

#[async_trait]
impl UpdateHandler for QmsForwarder {
    async fn handle(&self, update: &UsageUpdate) {
        if !self.enabled {
            tracing::info!(
                attribute = %update.attribute,
                value = %update.value,
                unit = %update.unit,
                username = %update.username,
                "QMS forwarding disabled, logging update only"
            );
            return;
        }

        if let Err(e) = self.forward(update).await {
            tracing::error!(
                error = %e,
                attribute = %update.attribute,
                username = %update.username,
                "failed to forward usage update to QMS"
            );
        }
    }
}
