use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;

use crate::adjust::Level;
use crate::syllabus::DayPlan;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// The part of a user that is safe to send to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicUser {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyPlan {
    pub id: i64,
    pub user_id: i64,
    pub subject: String,
    pub level: Level,
    pub days: u32,
    pub hours_per_day: f64,
    pub plan: Vec<DayPlan>,
    pub completion_percentage: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow> for StudyPlan {
    fn from_row(row: &'r sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        let level: String = row.try_get("level")?;
        let level = level.parse::<Level>().map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

        let plan_data: String = row.try_get("plan_data")?;
        let plan: Vec<DayPlan> = serde_json::from_str(&plan_data).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

        let days: i64 = row.try_get("days")?;

        Ok(StudyPlan {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            subject: row.try_get("subject")?,
            level,
            days: days as u32,
            hours_per_day: row.try_get("hours_per_day")?,
            plan,
            completion_percentage: row.try_get("completion_percentage")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl StudyPlan {
    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            id: self.id,
            subject: self.subject.clone(),
            level: self.level,
            days: self.days,
            hours_per_day: self.hours_per_day,
            completion_percentage: self.completion_percentage,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// Sets the completion flag of `topic` on `day` and refreshes that day's standing.
    pub fn mark_topic(&mut self, day: u32, topic: &str, completed: bool) -> Option<DayPlan> {
        let entry = self.plan.iter_mut().find(|d| d.day == day)?;
        let sub = entry.subtopics.iter_mut().find(|s| s.name == topic)?;
        sub.completed = completed;
        entry.refresh_progress();
        Some(entry.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSummary {
    pub id: i64,
    pub subject: String,
    pub level: Level,
    pub days: u32,
    pub hours_per_day: f64,
    pub completion_percentage: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-topic completion and accumulated time, keyed by (plan, day, topic).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProgressEntry {
    pub id: i64,
    pub plan_id: i64,
    pub day: i64,
    pub topic: String,
    pub completed: bool,
    pub time_spent: i64, // seconds
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Note {
    pub id: i64,
    pub plan_id: i64,
    pub topic: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct StudySession {
    pub id: i64,
    pub plan_id: i64,
    pub topic: String,
    pub duration: i64, // seconds
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserStats {
    pub total_plans: i64,
    pub total_topics: i64,
    pub completed_topics: i64,
    pub total_time_spent: i64,
    pub total_sessions: i64,
    pub total_session_time: i64,
    pub average_completion: f64,
}

/// Share of completed topics across every day of a plan, 0..=100 with one decimal.
pub fn plan_completion(days: &[DayPlan]) -> f64 {
    let total: usize = days.iter().map(|d| d.subtopics.len()).sum();
    if total == 0 {
        return 0.0;
    }
    let completed: usize = days
        .iter()
        .map(|d| d.subtopics.iter().filter(|s| s.completed).count())
        .sum();
    crate::adjust::round1(completed as f64 * 100.0 / total as f64)
}
