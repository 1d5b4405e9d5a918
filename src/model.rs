use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Reminder preferences ---

/// How often a user wants to be reminded. Wire names are camelCase to match
/// what the browser clients send.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Frequency {
    /// Development-only cadence. Assignable only to allowlisted accounts;
    /// falls back to hourly on the production ticker.
    EveryMinuteTest,
    Every30Min,
    #[default]
    EveryHour,
    Every2Hours,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderPrefs {
    #[serde(default = "default_true")]
    pub notifications_enabled: bool,
    /// First local hour (inclusive) at which reminders may fire.
    #[serde(default = "default_window_start")]
    pub window_start_hour: u8,
    /// Last local hour (inclusive). A value of 0 means "through 23:59",
    /// not "until midnight of the same day".
    #[serde(default = "default_window_end")]
    pub window_end_hour: u8,
    #[serde(default)]
    pub frequency: Frequency,
    /// IANA zone for resolving this user's wall clock. Falls back to the
    /// deployment zone when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<Tz>,
}

impl Default for ReminderPrefs {
    fn default() -> Self {
        Self {
            notifications_enabled: true,
            window_start_hour: default_window_start(),
            window_end_hour: default_window_end(),
            frequency: Frequency::default(),
            timezone: None,
        }
    }
}

impl ReminderPrefs {
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.window_start_hour <= 23,
            "windowStartHour must be in 0..=23, got {}",
            self.window_start_hour
        );
        anyhow::ensure!(
            self.window_end_hour <= 23,
            "windowEndHour must be in 0..=23, got {}",
            self.window_end_hour
        );
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_window_start() -> u8 {
    8
}

fn default_window_end() -> u8 {
    22
}

// --- User ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub prefs: ReminderPrefs,
    #[serde(default = "default_daily_goal")]
    pub daily_goal_ml: u32,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            prefs: ReminderPrefs::default(),
            daily_goal_ml: default_daily_goal(),
            created_at: Utc::now(),
        }
    }
}

fn default_daily_goal() -> u32 {
    2000
}

// --- Push subscription ---

/// Encryption key material from `PushSubscription.getKey()` in the browser,
/// URL-safe base64 without padding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

impl SubscriptionKeys {
    /// Both keys are mandatory and checked at write time so malformed
    /// records never enter the store.
    pub fn validate(&self) -> Result<()> {
        let point = URL_SAFE_NO_PAD
            .decode(&self.p256dh)
            .context("p256dh key is not URL-safe base64")?;
        p256::PublicKey::from_sec1_bytes(&point)
            .map_err(|_| anyhow::anyhow!("p256dh key is not a valid P-256 point"))?;
        let auth = URL_SAFE_NO_PAD
            .decode(&self.auth)
            .context("auth secret is not URL-safe base64")?;
        anyhow::ensure!(
            auth.len() == 16,
            "auth secret must be 16 bytes, got {}",
            auth.len()
        );
        Ok(())
    }
}

/// One browser/device registration for push delivery. A user may hold
/// several of these, one per device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: Uuid,
    pub owner_id: Uuid,
    /// Opaque push-service URL; unique together with `owner_id`.
    pub endpoint: String,
    pub keys: SubscriptionKeys,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub failed_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_notification_sent: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    pub fn new(owner_id: Uuid, endpoint: impl Into<String>, keys: SubscriptionKeys) -> Result<Self> {
        let endpoint = endpoint.into();
        validate_endpoint(&endpoint)?;
        keys.validate()?;
        Ok(Self {
            id: Uuid::new_v4(),
            owner_id,
            endpoint,
            keys,
            is_active: true,
            failed_attempts: 0,
            last_notification_sent: None,
            last_error: None,
            created_at: Utc::now(),
        })
    }

    /// Timestamp used by cleanup to judge staleness.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_notification_sent.unwrap_or(self.created_at)
    }
}

fn validate_endpoint(endpoint: &str) -> Result<()> {
    let url = reqwest::Url::parse(endpoint)
        .with_context(|| format!("endpoint is not a valid URL: {endpoint}"))?;
    anyhow::ensure!(
        matches!(url.scheme(), "http" | "https"),
        "endpoint must be an http(s) URL, got scheme '{}'",
        url.scheme()
    );
    anyhow::ensure!(url.host_str().is_some(), "endpoint URL has no host");
    Ok(())
}

// --- Water log ---

pub const MAX_WATER_ENTRY_ML: u32 = 5000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaterEntry {
    pub id: Uuid,
    pub amount_ml: u32,
    pub logged_at: DateTime<Utc>,
}

impl WaterEntry {
    pub fn new(amount_ml: u32) -> Result<Self> {
        anyhow::ensure!(
            amount_ml >= 1 && amount_ml <= MAX_WATER_ENTRY_ML,
            "amountMl must be in 1..={MAX_WATER_ENTRY_ML}, got {amount_ml}"
        );
        Ok(Self {
            id: Uuid::new_v4(),
            amount_ml,
            logged_at: Utc::now(),
        })
    }
}

/// A valid uncompressed P-256 point (the curve generator) and a 16-byte auth
/// secret, URL-safe base64 like real browser key material.
#[cfg(test)]
pub(crate) fn test_subscription_keys() -> SubscriptionKeys {
    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    let mut point = vec![0x04u8];
    point.extend_from_slice(&hex(
        "6b17d1f2e12c4247f8bce6e563a440f277037d812deb33a0f4a13945d898c296",
    ));
    point.extend_from_slice(&hex(
        "4fe342e2fe1a7f9b8ee7eb4a7c0f9e162bce33576b315ececbb6406837bf51f5",
    ));
    SubscriptionKeys {
        p256dh: URL_SAFE_NO_PAD.encode(&point),
        auth: URL_SAFE_NO_PAD.encode([7u8; 16]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_keys() -> SubscriptionKeys {
        test_subscription_keys()
    }

    #[test]
    fn test_frequency_wire_names() {
        assert_eq!(
            serde_json::to_string(&Frequency::EveryMinuteTest).unwrap(),
            "\"everyMinuteTest\""
        );
        assert_eq!(
            serde_json::to_string(&Frequency::Every30Min).unwrap(),
            "\"every30Min\""
        );
        assert_eq!(
            serde_json::to_string(&Frequency::EveryHour).unwrap(),
            "\"everyHour\""
        );
        assert_eq!(
            serde_json::to_string(&Frequency::Every2Hours).unwrap(),
            "\"every2Hours\""
        );
    }

    #[test]
    fn test_prefs_defaults() {
        let prefs: ReminderPrefs = serde_json::from_str("{}").unwrap();
        assert!(prefs.notifications_enabled);
        assert_eq!(prefs.frequency, Frequency::EveryHour);
        assert_eq!(prefs.window_start_hour, 8);
        assert_eq!(prefs.window_end_hour, 22);
        assert!(prefs.timezone.is_none());
    }

    #[test]
    fn test_prefs_hour_bounds() {
        let mut prefs = ReminderPrefs::default();
        prefs.window_start_hour = 24;
        assert!(prefs.validate().is_err());
        prefs.window_start_hour = 23;
        prefs.window_end_hour = 99;
        assert!(prefs.validate().is_err());
        prefs.window_end_hour = 0;
        assert!(prefs.validate().is_ok());
    }

    #[test]
    fn test_subscription_rejects_bad_endpoint() {
        let owner = Uuid::new_v4();
        assert!(Subscription::new(owner, "not a url", valid_keys()).is_err());
        assert!(Subscription::new(owner, "ftp://push.example/x", valid_keys()).is_err());
        assert!(Subscription::new(owner, "https://push.example/ch/1", valid_keys()).is_ok());
    }

    #[test]
    fn test_subscription_rejects_bad_keys() {
        let owner = Uuid::new_v4();
        let mut keys = valid_keys();
        keys.auth = URL_SAFE_NO_PAD.encode([1u8; 4]);
        assert!(Subscription::new(owner, "https://push.example/ch/1", keys).is_err());

        let mut keys = valid_keys();
        keys.p256dh = "!!!not-base64!!!".into();
        assert!(Subscription::new(owner, "https://push.example/ch/1", keys).is_err());

        let mut keys = valid_keys();
        keys.p256dh = URL_SAFE_NO_PAD.encode([0u8; 65]);
        assert!(
            Subscription::new(owner, "https://push.example/ch/1", keys).is_err(),
            "all-zero bytes are not a curve point"
        );
    }

    #[test]
    fn test_water_entry_bounds() {
        assert!(WaterEntry::new(0).is_err());
        assert!(WaterEntry::new(MAX_WATER_ENTRY_ML + 1).is_err());
        assert!(WaterEntry::new(250).is_ok());
    }
}
