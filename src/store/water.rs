use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use uuid::Uuid;

use super::FileStore;
use crate::model::WaterEntry;

/// One day's aggregate for the intake chart.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayTotal {
    pub date: NaiveDate,
    pub total_ml: u32,
    pub entries: usize,
    pub goal_met: bool,
}

impl FileStore {
    /// Record an intake and return the entry together with the running
    /// total for that user's current local day.
    pub fn append_water(&self, user_id: Uuid, amount_ml: u32) -> Result<(WaterEntry, u32)> {
        let user = self
            .get_user(user_id)
            .ok_or_else(|| anyhow::anyhow!("unknown user {user_id}"))?;
        let entry = WaterEntry::new(amount_ml)?;

        let zone = self.user_zone(&user);
        let date = entry.logged_at.with_timezone(&zone).date_naive();
        let path = self.water_path(user_id, date);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut entries = self.read_day(user_id, date)?;
        entries.push(entry.clone());
        self.write_json(&path, &entries)?;

        let total = entries.iter().map(|e| e.amount_ml).sum();
        Ok((entry, total))
    }

    /// Per-day totals for the most recent `days` local days, oldest first.
    /// Days without entries are included with a zero total so charts get a
    /// dense series.
    pub fn daily_totals(&self, user_id: Uuid, days: u32) -> Result<Vec<DayTotal>> {
        let user = self
            .get_user(user_id)
            .ok_or_else(|| anyhow::anyhow!("unknown user {user_id}"))?;
        let zone = self.user_zone(&user);
        let today = chrono::Utc::now().with_timezone(&zone).date_naive();

        let mut totals = Vec::with_capacity(days as usize);
        for offset in (0..i64::from(days)).rev() {
            let date = today - chrono::Duration::days(offset);
            let entries = self.read_day(user_id, date)?;
            let total_ml = entries.iter().map(|e| e.amount_ml).sum();
            totals.push(DayTotal {
                date,
                total_ml,
                entries: entries.len(),
                goal_met: total_ml >= user.daily_goal_ml,
            });
        }
        Ok(totals)
    }

    fn read_day(&self, user_id: Uuid, date: NaiveDate) -> Result<Vec<WaterEntry>> {
        let path = self.water_path(user_id, date);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read water log: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Corrupt water log: {}", path.display()))
    }

    fn water_path(&self, user_id: Uuid, date: NaiveDate) -> PathBuf {
        self.base_dir
            .join(format!("water/{user_id}/{}.json", date.format("%Y-%m-%d")))
    }
}
