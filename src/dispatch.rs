use anyhow::{Context, Result};
use futures::future::join_all;
use serde::Serialize;
use uuid::Uuid;

use crate::model::Subscription;
use crate::notify::ReminderPayload;
use crate::push::{PushError, PushTransport, SendOptions, SendReceipt};
use crate::store::FileStore;

/// What happened to one subscription during a fan-out.
#[derive(Debug)]
pub struct DeliveryOutcome {
    pub subscription_id: Uuid,
    pub endpoint: String,
    pub result: Result<SendReceipt, PushError>,
    /// Whether this failure tripped the deactivation threshold.
    pub deactivated: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchSummary {
    pub sent: usize,
    pub failed: usize,
    pub deactivated: usize,
}

impl DispatchSummary {
    pub fn from_outcomes(outcomes: &[DeliveryOutcome]) -> Self {
        let mut summary = Self::default();
        for outcome in outcomes {
            match outcome.result {
                Ok(_) => summary.sent += 1,
                Err(_) => summary.failed += 1,
            }
            if outcome.deactivated {
                summary.deactivated += 1;
            }
        }
        summary
    }
}

/// Send `payload` to every subscription concurrently and independently.
///
/// Settle-all semantics: every subscription yields exactly one outcome and
/// no delivery failure escapes as an error; the only failure this function
/// can return is payload encoding. Bookkeeping runs after settlement:
/// success resets the failure counter, failure increments it and may
/// deactivate.
pub async fn dispatch(
    store: &FileStore,
    transport: &dyn PushTransport,
    subscriptions: &[Subscription],
    payload: &ReminderPayload,
    options: &SendOptions,
) -> Result<Vec<DeliveryOutcome>> {
    let payload_json =
        serde_json::to_string(payload).context("Failed to encode notification payload")?;

    let sends = subscriptions.iter().map(|sub| {
        let payload_json = payload_json.as_str();
        async move { (sub, transport.send(sub, payload_json, options).await) }
    });
    let settled = join_all(sends).await;

    let mut outcomes = Vec::with_capacity(settled.len());
    for (sub, result) in settled {
        let deactivated = match &result {
            Ok(receipt) => {
                if let Err(e) = store.mark_success(sub.id) {
                    tracing::error!("Failed to record delivery success for {}: {e}", sub.id);
                }
                tracing::debug!("Delivered to {} (HTTP {})", sub.endpoint, receipt.status);
                false
            }
            Err(err) => {
                // Classification informs logging; deactivation is driven by
                // the failure count alone.
                if err.is_permanent() {
                    tracing::warn!("Permanent delivery failure for {}: {err}", sub.endpoint);
                } else {
                    tracing::debug!("Transient delivery failure for {}: {err}", sub.endpoint);
                }
                match store.mark_failure(sub.id, &err.to_string()) {
                    Ok(deactivated) => deactivated,
                    Err(e) => {
                        tracing::error!("Failed to record delivery failure for {}: {e}", sub.id);
                        false
                    }
                }
            }
        };
        outcomes.push(DeliveryOutcome {
            subscription_id: sub.id,
            endpoint: sub.endpoint.clone(),
            result,
            deactivated,
        });
    }
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_subscription_keys;
    use chrono_tz::Tz;

    /// Fails any endpoint containing "broken", succeeds otherwise.
    struct ScriptedTransport;

    #[async_trait::async_trait]
    impl PushTransport for ScriptedTransport {
        async fn send(
            &self,
            subscription: &Subscription,
            _payload: &str,
            _options: &SendOptions,
        ) -> Result<SendReceipt, PushError> {
            if subscription.endpoint.contains("broken") {
                Err(PushError::Server { status: 503 })
            } else {
                Ok(SendReceipt { status: 201 })
            }
        }
    }

    fn store_with_subs(endpoints: &[&str]) -> (tempfile::TempDir, FileStore, Vec<Subscription>) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path(), Tz::UTC).unwrap();
        let user = store.create_user("noa").unwrap();
        let subs = endpoints
            .iter()
            .map(|e| {
                store
                    .upsert_subscription(user.id, e, test_subscription_keys())
                    .unwrap()
            })
            .collect();
        (dir, store, subs)
    }

    #[tokio::test]
    async fn test_one_failure_does_not_poison_the_fanout() {
        let (_dir, store, subs) = store_with_subs(&[
            "https://push.example/ok/1",
            "https://push.example/broken/2",
            "https://push.example/ok/3",
        ]);

        let outcomes = dispatch(
            &store,
            &ScriptedTransport,
            &subs,
            &ReminderPayload::reminder(),
            &SendOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(outcomes.len(), 3, "every subscription settles");
        let summary = DispatchSummary::from_outcomes(&outcomes);
        assert_eq!(summary.sent, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.deactivated, 0);

        for outcome in &outcomes {
            let on_file = &store.subscriptions_for(subs[0].owner_id);
            let record = on_file
                .iter()
                .find(|s| s.id == outcome.subscription_id)
                .unwrap();
            if outcome.endpoint.contains("broken") {
                assert_eq!(record.failed_attempts, 1);
                assert!(record.last_error.is_some());
            } else {
                assert_eq!(record.failed_attempts, 0);
                assert!(record.last_notification_sent.is_some());
            }
        }
    }

    #[tokio::test]
    async fn test_fifth_failure_deactivates_through_dispatch() {
        let (_dir, store, subs) = store_with_subs(&["https://push.example/broken/1"]);
        for _ in 0..4 {
            store.mark_failure(subs[0].id, "warm-up").unwrap();
        }

        let outcomes = dispatch(
            &store,
            &ScriptedTransport,
            &subs,
            &ReminderPayload::reminder(),
            &SendOptions::default(),
        )
        .await
        .unwrap();

        assert!(outcomes[0].deactivated);
        assert_eq!(DispatchSummary::from_outcomes(&outcomes).deactivated, 1);
        assert!(!store.subscriptions_for(subs[0].owner_id)[0].is_active);
    }

    #[tokio::test]
    async fn test_dispatch_with_no_subscriptions_is_a_noop() {
        let (_dir, store, _) = store_with_subs(&[]);
        let outcomes = dispatch(
            &store,
            &ScriptedTransport,
            &[],
            &ReminderPayload::reminder(),
            &SendOptions::default(),
        )
        .await
        .unwrap();
        assert!(outcomes.is_empty());
    }
}
