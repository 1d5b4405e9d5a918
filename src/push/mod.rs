pub mod crypto;
pub mod webpush;

use serde::{Deserialize, Serialize};

use crate::model::Subscription;

// --- Send options ---

/// Web Push `Urgency` header values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Urgency {
    VeryLow,
    Low,
    #[default]
    Normal,
    High,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::VeryLow => "very-low",
            Urgency::Low => "low",
            Urgency::Normal => "normal",
            Urgency::High => "high",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SendOptions {
    /// How long the push service may hold the message. Reminders are cheap;
    /// an undelivered one is dropped, not retried.
    pub ttl_seconds: u32,
    pub urgency: Urgency,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            ttl_seconds: 300,
            urgency: Urgency::Normal,
        }
    }
}

// --- Errors ---

/// Transport failures, split so the dispatcher can log permanent and
/// transient outcomes differently. Classification never drives deactivation
/// directly; the failure-count threshold does.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// VAPID key material missing or unusable. Raised when the transport is
    /// built, before any send is attempted.
    #[error("push transport is not configured: {0}")]
    Configuration(String),

    /// The stored subscription cannot be used (undecodable key material,
    /// unparseable endpoint). Permanent.
    #[error("subscription is unusable: {0}")]
    InvalidSubscription(String),

    /// The push service says this endpoint no longer exists. Permanent.
    #[error("endpoint is gone (HTTP {status})")]
    EndpointGone { status: u16 },

    /// The push service rejected the message. Permanent.
    #[error("push service rejected the message (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    /// Rate limited; a later tick may succeed. Transient.
    #[error("push service rate limited the sender")]
    RateLimited,

    /// Push-service-side failure. Transient.
    #[error("push service error (HTTP {status})")]
    Server { status: u16 },

    /// Network-level failure. Transient.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl PushError {
    /// Whether a retry on a later tick could plausibly succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            PushError::Configuration(_)
                | PushError::InvalidSubscription(_)
                | PushError::EndpointGone { .. }
                | PushError::Rejected { .. }
        )
    }
}

// --- Transport boundary ---

#[derive(Debug, Clone, Copy)]
pub struct SendReceipt {
    /// Status reported by the push service (usually 201).
    pub status: u16,
}

/// The delivery primitive the dispatcher fans out over. One implementation
/// speaks real Web Push; tests substitute scripted ones.
#[async_trait::async_trait]
pub trait PushTransport: Send + Sync {
    async fn send(
        &self,
        subscription: &Subscription,
        payload: &str,
        options: &SendOptions,
    ) -> Result<SendReceipt, PushError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urgency_header_values() {
        assert_eq!(Urgency::VeryLow.as_str(), "very-low");
        assert_eq!(Urgency::Normal.as_str(), "normal");
        let parsed: Urgency = serde_json::from_str("\"very-low\"").unwrap();
        assert_eq!(parsed, Urgency::VeryLow);
    }

    #[test]
    fn test_permanence_classification() {
        assert!(
            PushError::EndpointGone { status: 410 }.is_permanent()
        );
        assert!(
            PushError::Rejected {
                status: 400,
                message: String::new()
            }
            .is_permanent()
        );
        assert!(!PushError::RateLimited.is_permanent());
        assert!(!PushError::Server { status: 502 }.is_permanent());
    }
}
