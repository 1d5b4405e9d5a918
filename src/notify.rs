use chrono::Utc;
use serde::{Deserialize, Serialize};

pub const REMINDER_TAG: &str = "hydration-reminder";
pub const TEST_REMINDER_TAG: &str = "test-hydration-reminder";

// --- Click actions ---

/// What a notification click means. The service worker switches on the wire
/// id rather than comparing ad-hoc strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationAction {
    LogWater,
    Snooze,
    Default,
    TestAcknowledge,
}

/// One button rendered on the notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionButton {
    pub action: NotificationAction,
    pub title: String,
}

// --- Payload ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadData {
    /// Where a click without a button lands.
    pub url: String,
    pub action: NotificationAction,
    /// Milliseconds since epoch, for client-side staleness checks.
    pub timestamp: i64,
    pub is_test: bool,
}

/// The canonical notification shape handed to the push transport. Built per
/// send, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderPayload {
    pub title: String,
    pub body: String,
    /// Groups and de-duplicates notifications client-side; the test tag
    /// also signals "this is a diagnostic" by substring.
    pub tag: String,
    pub require_interaction: bool,
    pub silent: bool,
    pub data: PayloadData,
    pub actions: Vec<ActionButton>,
}

impl ReminderPayload {
    /// The real hydration reminder.
    pub fn reminder() -> Self {
        Self {
            title: "Time to hydrate".into(),
            body: "Have a glass of water and log it.".into(),
            tag: REMINDER_TAG.into(),
            require_interaction: false,
            silent: false,
            data: PayloadData {
                url: "/".into(),
                action: NotificationAction::Default,
                timestamp: Utc::now().timestamp_millis(),
                is_test: false,
            },
            actions: default_actions(),
        }
    }

    /// Diagnostic reminder. Same structure and action set as the real one so
    /// delivery and click handling exercise identical code paths;
    /// `require_interaction` forces an explicit click during manual testing.
    pub fn test_reminder() -> Self {
        Self {
            title: "Test reminder".into(),
            body: "Delivery check: tap to acknowledge.".into(),
            tag: TEST_REMINDER_TAG.into(),
            require_interaction: true,
            silent: false,
            data: PayloadData {
                url: "/".into(),
                action: NotificationAction::TestAcknowledge,
                timestamp: Utc::now().timestamp_millis(),
                is_test: true,
            },
            actions: default_actions(),
        }
    }
}

fn default_actions() -> Vec<ActionButton> {
    vec![
        ActionButton {
            action: NotificationAction::LogWater,
            title: "Log water".into(),
        },
        ActionButton {
            action: NotificationAction::Snooze,
            title: "Snooze".into(),
        },
    ]
}
