use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use reqwest::{Client, Url};

use super::crypto::{self, VapidKeys};
use super::{PushError, PushTransport, SendOptions, SendReceipt};
use crate::config::PushConfig;
use crate::model::Subscription;

/// Web Push (RFC 8030) delivery over HTTP: aes128gcm-encrypted body, VAPID
/// authorization, TTL/Urgency hints, and status-code classification.
pub struct WebPushClient {
    client: Client,
    keys: VapidKeys,
    subject: String,
}

impl WebPushClient {
    /// Fails fast when key material is absent or unusable, so a
    /// misconfigured deployment errors once at startup instead of on every
    /// send.
    pub fn new(config: &PushConfig) -> Result<Self, PushError> {
        if config.vapid_private_key.trim().is_empty() {
            return Err(PushError::Configuration(
                "VAPID keys are not set; run `hydromate init` and fill in [push]".into(),
            ));
        }
        let keys = VapidKeys::from_base64(&config.vapid_private_key)
            .map_err(|e| PushError::Configuration(e.to_string()))?;
        Ok(Self {
            client: Client::new(),
            keys,
            subject: config.subject.clone(),
        })
    }

    /// The key browsers pass as `applicationServerKey` when subscribing.
    pub fn public_key(&self) -> &str {
        self.keys.public_key()
    }
}

#[async_trait::async_trait]
impl PushTransport for WebPushClient {
    async fn send(
        &self,
        subscription: &Subscription,
        payload: &str,
        options: &SendOptions,
    ) -> Result<SendReceipt, PushError> {
        let endpoint = Url::parse(&subscription.endpoint)
            .map_err(|e| PushError::InvalidSubscription(format!("endpoint: {e}")))?;
        let p256dh = URL_SAFE_NO_PAD
            .decode(&subscription.keys.p256dh)
            .map_err(|e| PushError::InvalidSubscription(format!("p256dh: {e}")))?;
        let auth = URL_SAFE_NO_PAD
            .decode(&subscription.keys.auth)
            .map_err(|e| PushError::InvalidSubscription(format!("auth: {e}")))?;

        let body = crypto::encrypt_aes128gcm(&p256dh, &auth, payload.as_bytes())
            .map_err(|e| PushError::InvalidSubscription(e.to_string()))?;
        let authorization = self
            .keys
            .authorization(&endpoint, &self.subject)
            .map_err(|e| PushError::Configuration(e.to_string()))?;

        let response = self
            .client
            .post(endpoint)
            .header("Authorization", authorization)
            .header("Content-Encoding", "aes128gcm")
            .header("Content-Type", "application/octet-stream")
            .header("TTL", options.ttl_seconds.to_string())
            .header("Urgency", options.urgency.as_str())
            .body(body)
            .send()
            .await?;

        let status = response.status();
        match status.as_u16() {
            200..=299 => Ok(SendReceipt {
                status: status.as_u16(),
            }),
            404 | 410 => Err(PushError::EndpointGone {
                status: status.as_u16(),
            }),
            429 => Err(PushError::RateLimited),
            s if status.is_server_error() => Err(PushError::Server { status: s }),
            s => Err(PushError::Rejected {
                status: s,
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }
}
