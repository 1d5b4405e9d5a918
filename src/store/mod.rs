pub mod subscriptions;
pub mod users;
pub mod water;

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono_tz::Tz;
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::model::{Subscription, User};

/// Consecutive failures after which a subscription stops receiving sends.
pub const DEACTIVATE_THRESHOLD: u32 = 5;
/// Failures after which daily cleanup may hard-delete the record.
pub const FAILURE_CEILING: u32 = 10;
/// Days a deactivated subscription is retained before cleanup removes it.
pub const RETENTION_DAYS: i64 = 30;

/// Durable user/subscription/water-log storage: JSON records on disk,
/// loaded into memory at startup, written back atomically per record.
pub struct FileStore {
    base_dir: PathBuf,
    default_zone: Tz,
    users: Mutex<HashMap<Uuid, User>>,
    subscriptions: Mutex<HashMap<Uuid, Subscription>>,
}

impl FileStore {
    pub fn new(base_dir: impl Into<PathBuf>, default_zone: Tz) -> Result<Self> {
        let base_dir = base_dir.into();
        for dir in ["users", "subscriptions", "water"] {
            std::fs::create_dir_all(base_dir.join(dir))
                .with_context(|| format!("Failed to create store dir: {dir}"))?;
        }

        let users = load_dir::<User>(&base_dir.join("users"))?
            .into_iter()
            .map(|u| (u.id, u))
            .collect();
        let subscriptions = load_dir::<Subscription>(&base_dir.join("subscriptions"))?
            .into_iter()
            .map(|s| (s.id, s))
            .collect();

        Ok(Self {
            base_dir,
            default_zone,
            users: Mutex::new(users),
            subscriptions: Mutex::new(subscriptions),
        })
    }

    pub fn default_zone(&self) -> Tz {
        self.default_zone
    }

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(value)?;
        std::fs::write(&tmp, &json)
            .with_context(|| format!("Failed to write record: {}", tmp.display()))?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn user_path(&self, id: Uuid) -> PathBuf {
        self.base_dir.join(format!("users/{id}.json"))
    }

    fn subscription_path(&self, sub: &Subscription) -> PathBuf {
        let name = record_filename(&sub.owner_id.to_string(), &sub.endpoint);
        self.base_dir.join(format!("subscriptions/{name}.json"))
    }
}

fn load_dir<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut records = Vec::new();
    for entry in std::fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        if path.extension().is_some_and(|e| e == "json") {
            let content = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<T>(&content) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!("Skipping unreadable record {}: {e}", path.display());
                }
            }
        }
    }
    Ok(records)
}

/// Endpoints are long opaque URLs; hash them into stable filenames.
fn record_filename(owner: &str, endpoint: &str) -> String {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    owner.hash(&mut hasher);
    endpoint.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_subscription_keys;

    #[test]
    fn test_record_filename_distinguishes_owner_and_endpoint() {
        let a = record_filename("user-a", "https://push.example/1");
        let b = record_filename("user-b", "https://push.example/1");
        let c = record_filename("user-a", "https://push.example/2");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, record_filename("user-a", "https://push.example/1"));
    }

    #[test]
    fn test_store_reloads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let user_id;
        {
            let store = FileStore::new(dir.path(), Tz::UTC).unwrap();
            let user = store.create_user("mika").unwrap();
            user_id = user.id;
            store
                .upsert_subscription(user.id, "https://push.example/ch/9", test_subscription_keys())
                .unwrap();
        }
        let store = FileStore::new(dir.path(), Tz::UTC).unwrap();
        assert!(store.get_user(user_id).is_some());
        assert_eq!(store.list_active_with_prefs().len(), 1);
    }
}
