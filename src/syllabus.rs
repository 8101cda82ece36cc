use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::adjust::{classify_status, compute_progress, round1, validate_hours, Level, ProgressResult, Status, TopicRecord};

pub const MAX_PLAN_DAYS: u32 = 365;

pub struct TopicSeed {
    pub name: &'static str,
    pub base_hours: f64,
}

pub struct SubjectSyllabus {
    pub subject: &'static str,
    pub beginner: &'static [TopicSeed],
    pub intermediate: &'static [TopicSeed],
    pub advanced: &'static [TopicSeed],
}

impl SubjectSyllabus {
    pub fn topics(&self, level: Level) -> &'static [TopicSeed] {
        match level {
            Level::Beginner => self.beginner,
            Level::Intermediate => self.intermediate,
            Level::Advanced => self.advanced,
        }
    }
}

const fn seed(name: &'static str, base_hours: f64) -> TopicSeed {
    TopicSeed { name, base_hours }
}

pub const SYLLABUS: &[SubjectSyllabus] = &[
    SubjectSyllabus {
        subject: "DSA",
        beginner: &[seed("Arrays Basics", 1.5), seed("Time Complexity", 0.5), seed("Simple Problems", 1.0)],
        intermediate: &[seed("Sliding Window", 1.5), seed("Binary Search", 1.0), seed("Recursion", 1.0)],
        advanced: &[seed("Dynamic Programming", 2.0), seed("Graphs", 1.5), seed("Optimization Techniques", 1.0)],
    },
    SubjectSyllabus {
        subject: "ML",
        beginner: &[seed("What is ML?", 1.0), seed("Supervised Learning", 1.5), seed("Linear Regression", 1.0)],
        intermediate: &[seed("Feature Engineering", 1.5), seed("Classification Models", 1.5), seed("Model Evaluation", 1.0)],
        advanced: &[seed("Ensemble Methods", 2.0), seed("Hyperparameter Tuning", 1.5), seed("Model Deployment Basics", 1.0)],
    },
    SubjectSyllabus {
        subject: "Python",
        beginner: &[seed("Syntax & Variables", 1.0), seed("Loops & Conditions", 1.0), seed("Functions", 1.0)],
        intermediate: &[seed("OOP Concepts", 1.5), seed("File Handling", 1.0), seed("Modules & Packages", 1.0)],
        advanced: &[seed("Decorators", 1.5), seed("Generators", 1.0), seed("Performance Optimization", 1.0)],
    },
    SubjectSyllabus {
        subject: "AI",
        beginner: &[seed("AI Overview", 1.0), seed("Search Algorithms", 1.5), seed("Knowledge Representation", 1.0)],
        intermediate: &[seed("Neural Networks", 1.5), seed("Backpropagation", 1.5), seed("Activation Functions", 1.0)],
        advanced: &[seed("Deep Architectures", 2.0), seed("Transformers Intro", 1.5), seed("Ethics in AI", 1.0)],
    },
];

#[derive(Debug, Error, PartialEq)]
pub enum PlanError {
    #[error("Invalid subject")]
    InvalidSubject(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// One day of a study plan, as stored in `study_plans.plan_data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayPlan {
    pub day: u32,
    pub topic: String,
    pub level: Level,
    pub hours: f64,
    pub progress: u8,
    pub status: Status,
    pub subtopics: Vec<TopicRecord>,
}

impl DayPlan {
    pub fn refresh_progress(&mut self) {
        self.progress = compute_progress(&self.subtopics);
        self.status = classify_status(self.progress);
    }

    /// Takes over an adjusted day; the day's total follows the new topic hours.
    pub fn apply_summary(&mut self, summary: ProgressResult) {
        self.hours = round1(summary.subtopics.iter().map(|s| s.hours).sum());
        self.progress = summary.progress_percent;
        self.status = summary.status;
        self.subtopics = summary.subtopics;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SubjectInfo {
    pub subject: &'static str,
    pub levels: Vec<LevelTopics>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LevelTopics {
    pub level: Level,
    pub topics: Vec<&'static str>,
}

pub fn find_subject(subject: &str) -> Option<&'static SubjectSyllabus> {
    SYLLABUS.iter().find(|s| s.subject == subject)
}

pub fn subjects() -> Vec<SubjectInfo> {
    SYLLABUS
        .iter()
        .map(|s| SubjectInfo {
            subject: s.subject,
            levels: Level::ALL
                .iter()
                .map(|&level| LevelTopics {
                    level,
                    topics: s.topics(level).iter().map(|t| t.name).collect(),
                })
                .collect(),
        })
        .collect()
}

/// Builds `days` identical days covering every topic of the subject/level.
///
/// Each topic gets its base estimate, or an even share of the daily budget
/// when that is smaller.
pub fn generate_plan(subject: &str, level: Level, days: u32, hours_per_day: f64) -> Result<Vec<DayPlan>, PlanError> {
    let syllabus = find_subject(subject).ok_or_else(|| PlanError::InvalidSubject(subject.to_string()))?;

    if days == 0 || days > MAX_PLAN_DAYS {
        return Err(PlanError::InvalidInput(format!("days must be between 1 and {}", MAX_PLAN_DAYS)));
    }
    validate_hours(hours_per_day).map_err(|msg| PlanError::InvalidInput(msg.to_string()))?;
    if hours_per_day == 0.0 || hours_per_day > 24.0 {
        return Err(PlanError::InvalidInput("hours must be greater than 0 and at most 24".into()));
    }

    let topics = syllabus.topics(level);
    let share = hours_per_day / topics.len() as f64;

    let plan = (1..=days)
        .map(|day| {
            let mut total_hours = 0.0;
            let subtopics = topics
                .iter()
                .map(|t| {
                    let hours = t.base_hours.min(share);
                    total_hours += hours;
                    TopicRecord::new(t.name, round1(hours))
                })
                .collect();

            DayPlan {
                day,
                topic: subject.to_string(),
                level,
                hours: round1(total_hours),
                progress: 0,
                status: Status::Behind,
                subtopics,
            }
        })
        .collect();

    Ok(plan)
}

/// Suggested daily study time: whatever is available, capped per level.
pub fn recommended_daily_hours(level: Level, available_hours: f64) -> f64 {
    let cap = match level {
        Level::Beginner => 2.0,
        Level::Intermediate => 3.0,
        Level::Advanced => 4.0,
    };
    available_hours.min(cap)
}
