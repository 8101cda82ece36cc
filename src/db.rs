use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    ConnectOptions, Pool, Sqlite, SqliteConnection,
};
use std::str::FromStr;
use std::time::Duration;

use crate::adjust::{build_day_summary, AdjustPolicy, Level, ProgressResult};
use crate::models::{plan_completion, Note, ProgressEntry, StudyPlan, StudySession, User, UserStats};
use crate::syllabus::DayPlan;

#[derive(Debug, Clone)]
pub struct NewPlan<'a> {
    pub user_id: i64,
    pub subject: &'a str,
    pub level: Level,
    pub days: u32,
    pub hours_per_day: f64,
    pub plan: &'a [DayPlan],
}

#[derive(Debug, Clone)]
pub struct ProgressUpdate<'a> {
    pub day: u32,
    pub topic: &'a str,
    pub completed: bool,
    pub time_spent: i64,
}

/// True when `err` comes from a UNIQUE constraint, e.g. a username taken by a concurrent registration.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.downcast_ref::<sqlx::Error>()
        .and_then(|e| e.as_database_error())
        .is_some_and(|e| e.is_unique_violation())
}

#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

impl Db {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");

        let mut options = SqliteConnectOptions::from_str(database_url)?
            .foreign_keys(true)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .log_statements(log::LevelFilter::Trace);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // Every connection to `:memory:` is its own database, so keep exactly one.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options.connect_with(options).await?;

        let db = Db { pool };
        db.migrate().await?;

        Ok(db)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                created_at DATETIME NOT NULL
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS auth_tokens (
                token TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                created_at DATETIME NOT NULL,
                expires_at DATETIME NOT NULL
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS study_plans (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                subject TEXT NOT NULL,
                level TEXT NOT NULL,
                days INTEGER NOT NULL,
                hours_per_day REAL NOT NULL,
                plan_data TEXT NOT NULL,
                completion_percentage REAL NOT NULL DEFAULT 0,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS user_progress (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                plan_id INTEGER NOT NULL REFERENCES study_plans(id) ON DELETE CASCADE,
                day INTEGER NOT NULL,
                topic TEXT NOT NULL,
                completed BOOLEAN NOT NULL DEFAULT 0,
                time_spent INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME NOT NULL,
                UNIQUE (plan_id, day, topic)
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS study_notes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                plan_id INTEGER NOT NULL REFERENCES study_plans(id) ON DELETE CASCADE,
                topic TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at DATETIME NOT NULL
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS study_sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                plan_id INTEGER NOT NULL REFERENCES study_plans(id) ON DELETE CASCADE,
                topic TEXT NOT NULL,
                duration INTEGER NOT NULL,
                completed_at DATETIME NOT NULL
            );
            "#,
            "CREATE INDEX IF NOT EXISTS idx_study_plans_user ON study_plans(user_id);",
            "CREATE INDEX IF NOT EXISTS idx_auth_tokens_user ON auth_tokens(user_id);",
        ];

        for sql in statements {
            sqlx::query(sql).execute(&self.pool).await?;
        }

        Ok(())
    }

    // --- Users & tokens ---

    pub async fn create_user(&self, username: &str, email: &str, password_hash: &str) -> anyhow::Result<User> {
        let res = sqlx::query("INSERT INTO users (username, email, password_hash, created_at) VALUES (?, ?, ?, ?)")
            .bind(username)
            .bind(email)
            .bind(password_hash)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(res.last_insert_rowid())
            .fetch_one(&self.pool)
            .await?;
        Ok(user)
    }

    pub async fn find_user_by_username(&self, username: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    /// True when either the username or the email is already registered.
    pub async fn user_exists(&self, username: &str, email: &str) -> anyhow::Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM users WHERE username = ? OR email = ?")
            .bind(username)
            .bind(email)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    /// Stores a new token and drops every token that has already expired.
    pub async fn insert_token(&self, token: &str, user_id: i64, expires_at: DateTime<Utc>) -> anyhow::Result<()> {
        let purged = sqlx::query("DELETE FROM auth_tokens WHERE expires_at <= ?")
            .bind(Utc::now())
            .execute(&self.pool)
            .await?
            .rows_affected();
        if purged > 0 {
            log::debug!("purged {} expired tokens", purged);
        }

        sqlx::query("INSERT INTO auth_tokens (token, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)")
            .bind(token)
            .bind(user_id)
            .bind(Utc::now())
            .bind(expires_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Resolves a bearer token to its user. Expired tokens are removed and yield `None`.
    pub async fn user_for_token(&self, token: &str, now: DateTime<Utc>) -> anyhow::Result<Option<User>> {
        let expires_at: Option<DateTime<Utc>> = sqlx::query_scalar("SELECT expires_at FROM auth_tokens WHERE token = ?")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;

        match expires_at {
            None => Ok(None),
            Some(expires_at) if expires_at <= now => {
                self.delete_token(token).await?;
                Ok(None)
            }
            Some(_) => {
                let user = sqlx::query_as::<_, User>(
                    "SELECT users.* FROM users JOIN auth_tokens ON auth_tokens.user_id = users.id WHERE auth_tokens.token = ?",
                )
                .bind(token)
                .fetch_optional(&self.pool)
                .await?;
                Ok(user)
            }
        }
    }

    pub async fn delete_token(&self, token: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM auth_tokens WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // --- Plans ---

    pub async fn create_plan(&self, new: NewPlan<'_>) -> anyhow::Result<StudyPlan> {
        let now = Utc::now();
        let plan_data = serde_json::to_string(new.plan)?;

        let res = sqlx::query(
            r#"
            INSERT INTO study_plans (user_id, subject, level, days, hours_per_day, plan_data, completion_percentage, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(new.user_id)
        .bind(new.subject)
        .bind(new.level.as_str())
        .bind(i64::from(new.days))
        .bind(new.hours_per_day)
        .bind(plan_data)
        .bind(plan_completion(new.plan))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let plan = sqlx::query_as::<_, StudyPlan>("SELECT * FROM study_plans WHERE id = ?")
            .bind(res.last_insert_rowid())
            .fetch_one(&self.pool)
            .await?;
        Ok(plan)
    }

    pub async fn list_plans(&self, user_id: i64) -> anyhow::Result<Vec<StudyPlan>> {
        let plans = sqlx::query_as::<_, StudyPlan>("SELECT * FROM study_plans WHERE user_id = ? ORDER BY created_at DESC, id DESC")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(plans)
    }

    pub async fn get_plan(&self, user_id: i64, plan_id: i64) -> anyhow::Result<Option<StudyPlan>> {
        let plan = sqlx::query_as::<_, StudyPlan>("SELECT * FROM study_plans WHERE id = ? AND user_id = ?")
            .bind(plan_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(plan)
    }

    pub async fn delete_plan(&self, user_id: i64, plan_id: i64) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM study_plans WHERE id = ? AND user_id = ?")
            .bind(plan_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    // --- Progress ---

    /// Opens a write transaction on a plan and loads it.
    ///
    /// The row is touched before it is read so the SQLite write lock is held
    /// from the first statement on; concurrent writers wait on the busy
    /// timeout instead of failing on a stale snapshot.
    async fn lock_plan(conn: &mut SqliteConnection, user_id: i64, plan_id: i64) -> anyhow::Result<Option<StudyPlan>> {
        let touched = sqlx::query("UPDATE study_plans SET updated_at = ? WHERE id = ? AND user_id = ?")
            .bind(Utc::now())
            .bind(plan_id)
            .bind(user_id)
            .execute(&mut *conn)
            .await?
            .rows_affected();
        if touched == 0 {
            return Ok(None);
        }

        let plan = sqlx::query_as::<_, StudyPlan>("SELECT * FROM study_plans WHERE id = ?")
            .bind(plan_id)
            .fetch_one(&mut *conn)
            .await?;
        Ok(Some(plan))
    }

    async fn save_plan_days(conn: &mut SqliteConnection, plan: &StudyPlan) -> anyhow::Result<()> {
        sqlx::query("UPDATE study_plans SET plan_data = ?, completion_percentage = ?, updated_at = ? WHERE id = ?")
            .bind(serde_json::to_string(&plan.plan)?)
            .bind(plan_completion(&plan.plan))
            .bind(Utc::now())
            .bind(plan.id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Marks a topic on one day of a plan and records time spent on it.
    ///
    /// The plan's stored days and the progress row are written in one
    /// transaction. Returns the updated day, or `None` when the plan, day or
    /// topic does not exist for this user.
    pub async fn record_progress(&self, user_id: i64, plan_id: i64, update: ProgressUpdate<'_>) -> anyhow::Result<Option<DayPlan>> {
        let mut tx = self.pool.begin().await?;

        let Some(mut plan) = Self::lock_plan(&mut *tx, user_id, plan_id).await? else {
            return Ok(None);
        };
        let Some(day) = plan.mark_topic(update.day, update.topic, update.completed) else {
            return Ok(None);
        };
        Self::save_plan_days(&mut *tx, &plan).await?;

        sqlx::query(
            r#"
            INSERT INTO user_progress (plan_id, day, topic, completed, time_spent, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (plan_id, day, topic) DO UPDATE SET
                completed = excluded.completed,
                time_spent = user_progress.time_spent + excluded.time_spent
            "#,
        )
        .bind(plan_id)
        .bind(i64::from(update.day))
        .bind(update.topic)
        .bind(update.completed)
        .bind(update.time_spent)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(day))
    }

    /// Smart-adjusts one stored day with `policy` and saves it, in one transaction.
    /// `None` when the plan or the day does not exist for this user.
    pub async fn adjust_plan_day(&self, user_id: i64, plan_id: i64, day: u32, policy: AdjustPolicy) -> anyhow::Result<Option<ProgressResult>> {
        let mut tx = self.pool.begin().await?;

        let Some(mut plan) = Self::lock_plan(&mut *tx, user_id, plan_id).await? else {
            return Ok(None);
        };
        let Some(entry) = plan.plan.iter_mut().find(|d| d.day == day) else {
            return Ok(None);
        };
        let summary = build_day_summary(entry.level, &entry.subtopics, policy);
        entry.apply_summary(summary.clone());

        Self::save_plan_days(&mut *tx, &plan).await?;
        tx.commit().await?;

        Ok(Some(summary))
    }

    pub async fn list_progress(&self, plan_id: i64) -> anyhow::Result<Vec<ProgressEntry>> {
        let rows = sqlx::query_as::<_, ProgressEntry>("SELECT * FROM user_progress WHERE plan_id = ? ORDER BY day, id")
            .bind(plan_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    // --- Notes ---

    pub async fn add_note(&self, plan_id: i64, topic: &str, content: &str) -> anyhow::Result<Note> {
        let res = sqlx::query("INSERT INTO study_notes (plan_id, topic, content, created_at) VALUES (?, ?, ?, ?)")
            .bind(plan_id)
            .bind(topic)
            .bind(content)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        let note = sqlx::query_as::<_, Note>("SELECT * FROM study_notes WHERE id = ?")
            .bind(res.last_insert_rowid())
            .fetch_one(&self.pool)
            .await?;
        Ok(note)
    }

    pub async fn list_notes(&self, plan_id: i64) -> anyhow::Result<Vec<Note>> {
        let notes = sqlx::query_as::<_, Note>("SELECT * FROM study_notes WHERE plan_id = ? ORDER BY created_at DESC, id DESC")
            .bind(plan_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(notes)
    }

    pub async fn delete_note(&self, plan_id: i64, note_id: i64) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM study_notes WHERE id = ? AND plan_id = ?")
            .bind(note_id)
            .bind(plan_id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    // --- Sessions ---

    pub async fn add_session(&self, plan_id: i64, topic: &str, duration: i64) -> anyhow::Result<StudySession> {
        let res = sqlx::query("INSERT INTO study_sessions (plan_id, topic, duration, completed_at) VALUES (?, ?, ?, ?)")
            .bind(plan_id)
            .bind(topic)
            .bind(duration)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        let session = sqlx::query_as::<_, StudySession>("SELECT * FROM study_sessions WHERE id = ?")
            .bind(res.last_insert_rowid())
            .fetch_one(&self.pool)
            .await?;
        Ok(session)
    }

    pub async fn list_sessions(&self, plan_id: i64) -> anyhow::Result<Vec<StudySession>> {
        let sessions = sqlx::query_as::<_, StudySession>("SELECT * FROM study_sessions WHERE plan_id = ? ORDER BY completed_at DESC, id DESC")
            .bind(plan_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(sessions)
    }

    // --- Stats ---

    pub async fn user_stats(&self, user_id: i64) -> anyhow::Result<UserStats> {
        let plans = self.list_plans(user_id).await?;

        let mut stats = UserStats {
            total_plans: plans.len() as i64,
            ..UserStats::default()
        };
        for plan in &plans {
            for day in &plan.plan {
                stats.total_topics += day.subtopics.len() as i64;
                stats.completed_topics += day.subtopics.iter().filter(|s| s.completed).count() as i64;
            }
        }
        if !plans.is_empty() {
            let sum: f64 = plans.iter().map(|p| p.completion_percentage).sum();
            stats.average_completion = crate::adjust::round1(sum / plans.len() as f64);
        }

        stats.total_time_spent = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(user_progress.time_spent), 0) FROM user_progress
            JOIN study_plans ON study_plans.id = user_progress.plan_id
            WHERE study_plans.user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        let (sessions, session_time): (i64, i64) = sqlx::query_as(
            r#"
            SELECT count(*), COALESCE(SUM(study_sessions.duration), 0) FROM study_sessions
            JOIN study_plans ON study_plans.id = study_sessions.plan_id
            WHERE study_plans.user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        stats.total_sessions = sessions;
        stats.total_session_time = session_time;

        Ok(stats)
    }
}

#[cfg(test)]
#[path = "db_tests.rs"]
mod tests;
