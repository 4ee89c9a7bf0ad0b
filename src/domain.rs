//! Domain models: plan entries, generated daily content, quiz questions and difficulty tiers,
//! plus the names of the persisted keys.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Persisted key names. Local and remote records use the same logical names.
pub mod keys {
  pub const MONTHS: &str = "months";
  pub const PLAN: &str = "plan";
  pub const START_DATE: &str = "startDate";
  pub const QUIZ_SCORES: &str = "quizScores";
  pub const QUIZ_PROGRESS: &str = "quizProgress";
  pub const NEXT_DIFFICULTY: &str = "nextDifficulty";
  // Guest-only keys written before the generic key/value scheme.
  pub const LEGACY_PREP_MONTHS: &str = "prepMonths";
  pub const LEGACY_GUEST_PLAN: &str = "guestPlan";

  /// Cache key of the generated content for study day `n`.
  pub fn day(n: usize) -> String {
    format!("day_{n}")
  }
}

/// One day of the schedule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayEntry {
  pub day: String,
  pub topics: Vec<String>,
}

pub type Plan = Vec<DayEntry>;

/// Numbers shown on the plan-summary screen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
  pub months: u32,
  pub total_days: usize,
  pub prep_days: usize,
  pub revision_days: usize,
}

/// Generated study material for one day.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyContent {
  pub title: String,
  pub content: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Difficulty {
  Easy,
  #[default]
  Medium,
  Hard,
}

impl Difficulty {
  /// Tier for the next day's quiz given today's result.
  pub fn from_score(score: usize, total: usize) -> Self {
    if total == 0 {
      return Difficulty::Medium;
    }
    let pct = score as f64 * 100.0 / total as f64;
    if pct < 60.0 {
      Difficulty::Easy
    } else if pct < 80.0 {
      Difficulty::Medium
    } else {
      Difficulty::Hard
    }
  }
}

impl fmt::Display for Difficulty {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Difficulty::Easy => "Easy",
      Difficulty::Medium => "Medium",
      Difficulty::Hard => "Hard",
    };
    f.write_str(s)
  }
}

/// A multiple-choice question as generated by the model, with running counters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuizQuestion {
  pub q: String,
  pub options: Vec<String>,
  /// The correct option, verbatim.
  pub a: String,
  #[serde(default)] pub explanation: String,
  #[serde(default)] pub difficulty: String,
  #[serde(default)] pub attempts: u32,
  #[serde(default)] pub correct: u32,
}

impl QuizQuestion {
  pub fn accuracy(&self) -> f64 {
    if self.attempts == 0 { 0.0 } else { self.correct as f64 / self.attempts as f64 }
  }

  /// Mastered questions leave the retry pool.
  pub fn is_mastered(&self) -> bool {
    self.attempts > 0 && self.accuracy() >= 0.8
  }
}
