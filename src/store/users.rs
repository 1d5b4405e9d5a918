use anyhow::Result;
use chrono_tz::Tz;
use uuid::Uuid;

use super::FileStore;
use crate::model::{ReminderPrefs, User};

impl FileStore {
    pub fn create_user(&self, name: &str) -> Result<User> {
        anyhow::ensure!(!name.trim().is_empty(), "user name must not be empty");
        let user = User::new(name.trim());
        let mut users = self.users.lock().expect("user lock poisoned");
        self.write_json(&self.user_path(user.id), &user)?;
        users.insert(user.id, user.clone());
        Ok(user)
    }

    pub fn get_user(&self, id: Uuid) -> Option<User> {
        self.users.lock().expect("user lock poisoned").get(&id).cloned()
    }

    /// Replace a user's reminder preferences. Validation happens here so an
    /// out-of-range window never reaches the evaluator.
    pub fn update_prefs(&self, id: Uuid, prefs: ReminderPrefs) -> Result<User> {
        prefs.validate()?;
        let mut users = self.users.lock().expect("user lock poisoned");
        let user = users
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("unknown user {id}"))?;
        user.prefs = prefs;
        let updated = user.clone();
        self.write_json(&self.user_path(id), &updated)?;
        Ok(updated)
    }

    pub fn set_daily_goal(&self, id: Uuid, daily_goal_ml: u32) -> Result<User> {
        anyhow::ensure!(daily_goal_ml > 0, "dailyGoalMl must be positive");
        let mut users = self.users.lock().expect("user lock poisoned");
        let user = users
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("unknown user {id}"))?;
        user.daily_goal_ml = daily_goal_ml;
        let updated = user.clone();
        self.write_json(&self.user_path(id), &updated)?;
        Ok(updated)
    }

    /// The zone this user's wall clock and day boundaries resolve in.
    pub fn user_zone(&self, user: &User) -> Tz {
        user.prefs.timezone.unwrap_or(self.default_zone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Frequency;

    fn store() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path(), Tz::UTC).unwrap();
        (dir, store)
    }

    #[test]
    fn test_create_and_fetch_user() {
        let (_dir, store) = store();
        let user = store.create_user("noa").unwrap();
        let fetched = store.get_user(user.id).unwrap();
        assert_eq!(fetched.name, "noa");
        assert_eq!(fetched.prefs.frequency, Frequency::EveryHour);
        assert!(store.create_user("   ").is_err());
    }

    #[test]
    fn test_update_prefs_validates_window() {
        let (_dir, store) = store();
        let user = store.create_user("noa").unwrap();

        let mut prefs = ReminderPrefs::default();
        prefs.window_start_hour = 25;
        assert!(store.update_prefs(user.id, prefs).is_err());

        let mut prefs = ReminderPrefs::default();
        prefs.frequency = Frequency::Every2Hours;
        prefs.timezone = Some(Tz::Asia__Tokyo);
        let updated = store.update_prefs(user.id, prefs).unwrap();
        assert_eq!(updated.prefs.frequency, Frequency::Every2Hours);
        assert_eq!(store.user_zone(&updated), Tz::Asia__Tokyo);
    }

    #[test]
    fn test_user_zone_falls_back_to_deployment_zone() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path(), Tz::Europe__Berlin).unwrap();
        let user = store.create_user("noa").unwrap();
        assert_eq!(store.user_zone(&user), Tz::Europe__Berlin);
    }
}
