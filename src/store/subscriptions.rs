use anyhow::Result;
use chrono::Utc;
use uuid::Uuid;

use super::{DEACTIVATE_THRESHOLD, FAILURE_CEILING, FileStore};
use crate::model::{ReminderPrefs, Subscription, SubscriptionKeys};

impl FileStore {
    /// Register (or refresh) a push subscription.
    ///
    /// Same owner + endpoint updates the record in place and revives it;
    /// re-registering is the browser's way of saying the channel works
    /// again. An endpoint previously claimed by a *different* user (shared
    /// browser profile) replaces the old registration outright.
    pub fn upsert_subscription(
        &self,
        owner_id: Uuid,
        endpoint: &str,
        keys: SubscriptionKeys,
    ) -> Result<Subscription> {
        let candidate = Subscription::new(owner_id, endpoint, keys)?;
        let mut subs = self.subscriptions.lock().expect("subscription lock poisoned");

        if let Some(existing) = subs
            .values_mut()
            .find(|s| s.owner_id == owner_id && s.endpoint == candidate.endpoint)
        {
            existing.keys = candidate.keys;
            existing.is_active = true;
            existing.failed_attempts = 0;
            existing.last_error = None;
            let updated = existing.clone();
            self.write_json(&self.subscription_path(&updated), &updated)?;
            return Ok(updated);
        }

        if let Some(previous) = subs
            .values()
            .find(|s| s.endpoint == candidate.endpoint)
            .cloned()
        {
            tracing::info!(
                "Endpoint moved from user {} to {}; replacing registration",
                previous.owner_id,
                owner_id
            );
            subs.remove(&previous.id);
            let _ = std::fs::remove_file(self.subscription_path(&previous));
        }

        self.write_json(&self.subscription_path(&candidate), &candidate)?;
        subs.insert(candidate.id, candidate.clone());
        Ok(candidate)
    }

    /// Explicit unsubscribe. Returns whether a record was removed.
    pub fn remove_subscription(&self, owner_id: Uuid, endpoint: &str) -> Result<bool> {
        let mut subs = self.subscriptions.lock().expect("subscription lock poisoned");
        let Some(id) = subs
            .values()
            .find(|s| s.owner_id == owner_id && s.endpoint == endpoint)
            .map(|s| s.id)
        else {
            return Ok(false);
        };
        let removed = subs.remove(&id).expect("just looked up");
        let _ = std::fs::remove_file(self.subscription_path(&removed));
        Ok(true)
    }

    /// Everything the scheduler considers on a tick: active subscriptions
    /// under the hard-failure ceiling, joined with their owner's
    /// preferences. Orphaned subscriptions are skipped, not errors.
    pub fn list_active_with_prefs(&self) -> Vec<(Subscription, ReminderPrefs)> {
        let users = self.users.lock().expect("user lock poisoned");
        let subs = self.subscriptions.lock().expect("subscription lock poisoned");
        subs.values()
            .filter(|s| s.is_active && s.failed_attempts < FAILURE_CEILING)
            .filter_map(|s| match users.get(&s.owner_id) {
                Some(owner) => Some((s.clone(), owner.prefs.clone())),
                None => {
                    tracing::warn!("Subscription {} has no owner record; skipping", s.id);
                    None
                }
            })
            .collect()
    }

    pub fn subscriptions_for(&self, owner_id: Uuid) -> Vec<Subscription> {
        self.subscriptions
            .lock()
            .expect("subscription lock poisoned")
            .values()
            .filter(|s| s.owner_id == owner_id)
            .cloned()
            .collect()
    }

    /// A delivery succeeded: reset the failure bookkeeping whatever its
    /// prior state.
    pub fn mark_success(&self, id: Uuid) -> Result<()> {
        let mut subs = self.subscriptions.lock().expect("subscription lock poisoned");
        let sub = subs
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("unknown subscription {id}"))?;
        sub.failed_attempts = 0;
        sub.last_error = None;
        sub.last_notification_sent = Some(Utc::now());
        sub.is_active = true;
        let snapshot = sub.clone();
        self.write_json(&self.subscription_path(&snapshot), &snapshot)
    }

    /// A delivery failed: count it, remember why, and deactivate once the
    /// count reaches the threshold. Returns whether this call deactivated
    /// the subscription.
    pub fn mark_failure(&self, id: Uuid, error: &str) -> Result<bool> {
        let mut subs = self.subscriptions.lock().expect("subscription lock poisoned");
        let sub = subs
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("unknown subscription {id}"))?;
        sub.failed_attempts = sub.failed_attempts.saturating_add(1);
        sub.last_error = Some(error.to_string());
        let deactivated = sub.is_active && sub.failed_attempts >= DEACTIVATE_THRESHOLD;
        if deactivated {
            sub.is_active = false;
            tracing::warn!(
                "Deactivating subscription {id} after {} failures: {error}",
                sub.failed_attempts
            );
        }
        let snapshot = sub.clone();
        self.write_json(&self.subscription_path(&snapshot), &snapshot)?;
        Ok(deactivated)
    }

    /// Maintenance sweep: drop subscriptions over the hard-failure ceiling,
    /// and deactivated ones idle past the retention window.
    pub fn delete_stale(&self, older_than_days: i64, failure_ceiling: u32) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::days(older_than_days);
        let mut subs = self.subscriptions.lock().expect("subscription lock poisoned");
        let stale: Vec<Subscription> = subs
            .values()
            .filter(|s| {
                s.failed_attempts >= failure_ceiling
                    || (!s.is_active && s.last_activity() < cutoff)
            })
            .cloned()
            .collect();
        for sub in &stale {
            subs.remove(&sub.id);
            let _ = std::fs::remove_file(self.subscription_path(sub));
        }
        Ok(stale.len())
    }
}
