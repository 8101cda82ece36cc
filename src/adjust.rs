//! Hour adjustment for a single study day.
//!
//! Everything here is pure: callers hand in a day's topics and get a new,
//! adjusted copy back. Nothing is read from or written to the store.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum AdjustError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("unknown level: {0}")]
    UnknownLevel(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Level {
    Beginner,
    Intermediate,
    Advanced,
}

impl Level {
    pub const ALL: [Level; 3] = [Level::Beginner, Level::Intermediate, Level::Advanced];

    pub fn as_str(self) -> &'static str {
        match self {
            Level::Beginner => "Beginner",
            Level::Intermediate => "Intermediate",
            Level::Advanced => "Advanced",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = AdjustError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Beginner" => Ok(Level::Beginner),
            "Intermediate" => Ok(Level::Intermediate),
            "Advanced" => Ok(Level::Advanced),
            other => Err(AdjustError::UnknownLevel(other.to_string())),
        }
    }
}

impl TryFrom<String> for Level {
    type Error = AdjustError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Level> for String {
    fn from(level: Level) -> Self {
        level.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Behind,
    #[serde(rename = "On Track", alias = "OnTrack")]
    OnTrack,
    Ahead,
}

impl Status {
    pub fn label(self) -> &'static str {
        match self {
            Status::Behind => "Behind",
            Status::OnTrack => "On Track",
            Status::Ahead => "Ahead",
        }
    }
}

/// What happens to unfinished topics once a day is already `Ahead`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AdjustPolicy {
    /// Always add hours, using the smaller per-level step once past the threshold.
    #[default]
    Additive,
    /// Like `Additive`, but an `Ahead` day sheds half an hour per topic (never below 0.5).
    Taper,
}

impl FromStr for AdjustPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "additive" => Ok(AdjustPolicy::Additive),
            "taper" => Ok(AdjustPolicy::Taper),
            other => Err(format!("unknown adjust policy '{}' (expected additive or taper)", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicRecord {
    pub name: String,
    pub hours: f64,
    pub completed: bool,
}

impl TopicRecord {
    pub fn new(name: impl Into<String>, hours: f64) -> Self {
        Self {
            name: name.into(),
            hours,
            completed: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressResult {
    #[serde(rename = "progress")]
    pub progress_percent: u8,
    pub status: Status,
    pub subtopics: Vec<TopicRecord>,
}

/// A validated smart-adjust request.
#[derive(Debug, Clone, PartialEq)]
pub struct DayRequest {
    pub level: Level,
    pub subtopics: Vec<TopicRecord>,
}

impl DayRequest {
    /// Validates a raw `{ level, subtopics }` payload.
    pub fn from_json(value: &Value) -> Result<Self, AdjustError> {
        let level = value
            .get("level")
            .ok_or_else(|| AdjustError::InvalidInput("missing field `level`".into()))?
            .as_str()
            .ok_or_else(|| AdjustError::InvalidInput("`level` must be a string".into()))?
            .parse::<Level>()?;

        let entries = value
            .get("subtopics")
            .ok_or_else(|| AdjustError::InvalidInput("missing field `subtopics`".into()))?
            .as_array()
            .ok_or_else(|| AdjustError::InvalidInput("`subtopics` must be an array".into()))?;

        let subtopics = entries
            .iter()
            .enumerate()
            .map(|(i, entry)| parse_topic(i, entry))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { level, subtopics })
    }
}

fn parse_topic(index: usize, entry: &Value) -> Result<TopicRecord, AdjustError> {
    let topic: TopicRecord = serde_json::from_value(entry.clone())
        .map_err(|e| AdjustError::InvalidInput(format!("subtopic {}: {}", index, e)))?;
    validate_hours(topic.hours)
        .map_err(|msg| AdjustError::InvalidInput(format!("subtopic {}: {}", index, msg)))?;
    Ok(topic)
}

/// Upper bound for a topic's hours: a full year of study.
pub const MAX_TOPIC_HOURS: f64 = 24.0 * 365.0;

pub fn validate_hours(hours: f64) -> Result<(), &'static str> {
    if !hours.is_finite() {
        return Err("hours must be a finite number");
    }
    if hours < 0.0 {
        return Err("hours must not be negative");
    }
    if hours > MAX_TOPIC_HOURS {
        return Err("hours must not exceed 8760");
    }
    Ok(())
}

/// Percentage of completed topics, rounded half-to-even. Empty days are 0.
pub fn compute_progress(subtopics: &[TopicRecord]) -> u8 {
    let total = subtopics.len() as u64;
    if total == 0 {
        return 0;
    }
    let completed = subtopics.iter().filter(|s| s.completed).count() as u64;

    let scaled = completed * 100;
    let mut percent = scaled / total;
    let twice_rem = (scaled % total) * 2;
    if twice_rem > total || (twice_rem == total && percent % 2 == 1) {
        percent += 1;
    }
    percent as u8
}

pub fn classify_status(progress_percent: u8) -> Status {
    match progress_percent {
        0..=49 => Status::Behind,
        50..=79 => Status::OnTrack,
        _ => Status::Ahead,
    }
}

/// Returns a copy of `subtopics` with every unfinished topic's hours moved
/// according to `level` and the day's completion ratio.
///
/// The ratio is taken once from the incoming snapshot; all topics are judged
/// against that same value.
pub fn adjust_hours(level: Level, subtopics: &[TopicRecord], policy: AdjustPolicy) -> Vec<TopicRecord> {
    let progress = compute_progress(subtopics);
    let ahead = classify_status(progress) == Status::Ahead;

    subtopics
        .iter()
        .map(|sub| {
            if sub.completed {
                return sub.clone();
            }
            let hours = match policy {
                AdjustPolicy::Taper if ahead => (sub.hours - 0.5).max(0.5),
                _ => sub.hours + step_for(level, progress),
            };
            TopicRecord {
                hours: round1(hours),
                ..sub.clone()
            }
        })
        .collect()
}

fn step_for(level: Level, progress: u8) -> f64 {
    match level {
        Level::Beginner => {
            if progress < 50 { 1.0 } else { 0.5 }
        }
        Level::Intermediate => {
            if progress < 60 { 1.5 } else { 0.5 }
        }
        Level::Advanced => {
            if progress < 70 { 2.0 } else { 1.0 }
        }
    }
}

/// Adjusts a day and reports where it stands afterwards.
///
/// Adjustment never flips a completion flag, so the reported progress is the
/// same value `adjust_hours` worked from.
pub fn build_day_summary(level: Level, subtopics: &[TopicRecord], policy: AdjustPolicy) -> ProgressResult {
    let adjusted = adjust_hours(level, subtopics, policy);
    let progress_percent = compute_progress(&adjusted);
    ProgressResult {
        progress_percent,
        status: classify_status(progress_percent),
        subtopics: adjusted,
    }
}

pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
#[path = "adjust_tests.rs"]
mod tests;
