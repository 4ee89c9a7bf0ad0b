//! Schedule generation: months → day-by-day topic plan.
//!
//! The preparation phase walks the topic list with a running index and doubles
//! up on even days. The revision phase picks `topic[d % N]` from its own day
//! counter instead of continuing the running index.

use thiserror::Error;
use tracing::{debug, instrument};

use crate::domain::{DayEntry, Plan, PlanSummary};

const DAYS_PER_MONTH: usize = 30;
const PREP_RATIO: f64 = 0.8;
/// Upper bound on accepted input; keeps a single request from allocating an unbounded plan.
pub const MAX_MONTHS: u32 = 120;

/// General-awareness topics. The first seven are the SSC CGL focus set.
pub const ALL_TOPICS: [&str; 9] = [
  "Current Affairs (National/International, Schemes, Awards)",
  "History (Ancient, Medieval, Modern)",
  "Geography (Physical, India & World)",
  "Polity & Constitution",
  "Economy (Basics, Budget, RBI)",
  "General Science (Biology, Physics, Chemistry)",
  "Static GK (Days, Organizations, Culture)",
  "Banking/Financial Awareness (for banking exams)",
  "Environmental & Social Issues",
];

const SSC_FOCUS_COUNT: usize = 7;

pub fn default_topics() -> Vec<String> {
  ALL_TOPICS[..SSC_FOCUS_COUNT].iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
  #[error("Please enter a valid number of months (1 or more).")]
  InvalidMonths(String),
  #[error("Plans are limited to {} months.", MAX_MONTHS)]
  TooManyMonths(u32),
}

/// Parse user input for the month count. Rejects empty, non-numeric and non-positive values.
pub fn parse_months(input: &str) -> Result<u32, PlanError> {
  let trimmed = input.trim();
  match trimmed.parse::<i64>() {
    Ok(m) if m > MAX_MONTHS as i64 => Err(PlanError::TooManyMonths(m.min(u32::MAX as i64) as u32)),
    Ok(m) if m >= 1 => Ok(m as u32),
    _ => Err(PlanError::InvalidMonths(trimmed.to_string())),
  }
}

pub fn summarize(months: u32) -> PlanSummary {
  let total_days = months as usize * DAYS_PER_MONTH;
  let prep_days = (total_days as f64 * PREP_RATIO).floor() as usize;
  PlanSummary { months, total_days, prep_days, revision_days: total_days - prep_days }
}

/// Build the full plan. `topics` must be non-empty.
#[instrument(level = "debug", skip(topics), fields(topic_count = topics.len()))]
pub fn generate_plan(months: u32, topics: &[String]) -> Plan {
  let summary = summarize(months);
  let n = topics.len();
  if n == 0 {
    return Vec::new();
  }

  let mut plan = Vec::with_capacity(summary.total_days);
  let mut index = 0usize;

  for day in 1..=summary.prep_days {
    let mut day_topics = vec![topics[index % n].clone()];
    if day % 2 == 0 {
      day_topics.push(topics[(index + 1) % n].clone());
    }
    plan.push(DayEntry { day: format!("Day {day} (Prep)"), topics: day_topics });
    index += 1;
  }

  for day in 1..=summary.revision_days {
    plan.push(DayEntry {
      day: format!("Day {} (Revision)", summary.prep_days + day),
      topics: vec![topics[day % n].clone()],
    });
  }

  debug!(target: "planner", months, prep = summary.prep_days, revision = summary.revision_days, "Plan generated");
  plan
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn lengths_follow_the_80_20_split() {
    let topics = default_topics();
    for m in 1..=12u32 {
      let s = summarize(m);
      let plan = generate_plan(m, &topics);
      assert_eq!(plan.len(), m as usize * 30);
      assert_eq!(s.prep_days, (m as f64 * 30.0 * 0.8).floor() as usize);
      assert_eq!(s.prep_days + s.revision_days, s.total_days);
    }
  }

  #[test]
  fn one_month_layout() {
    let topics = default_topics();
    let s = summarize(1);
    assert_eq!((s.total_days, s.prep_days, s.revision_days), (30, 24, 6));

    let plan = generate_plan(1, &topics);
    assert_eq!(plan[0].day, "Day 1 (Prep)");
    assert_eq!(plan[0].topics, vec![topics[0].clone()]);
    assert_eq!(plan[1].topics, vec![topics[1].clone(), topics[2].clone()]);
    assert_eq!(plan[24].day, "Day 25 (Revision)");
    // Revision restarts from its own counter.
    assert_eq!(plan[24].topics, vec![topics[1].clone()]);
    assert!(plan[24..].iter().all(|d| d.topics.len() == 1));
  }

  #[test]
  fn indices_wrap_around_the_topic_set() {
    let topics = vec!["A".to_string(), "B".to_string(), "C".to_string()];
    let plan = generate_plan(2, &topics);
    assert_eq!(plan[3].topics, vec!["A".to_string(), "B".to_string()]);
    assert!(plan.iter().all(|d| !d.topics.is_empty() && d.topics.len() <= 2));
  }

  #[test]
  fn generation_is_deterministic() {
    let topics = default_topics();
    assert_eq!(generate_plan(3, &topics), generate_plan(3, &topics));
  }

  #[test]
  fn rejects_bad_month_input() {
    // Whole numbers only: no trailing text and no fractions.
    for bad in ["0", "-3", "abc", "", "  ", "2abc", "2.5"] {
      assert!(parse_months(bad).is_err(), "{bad:?} should be rejected");
    }
    assert_eq!(parse_months(" 4 "), Ok(4));
    assert_eq!(parse_months("121"), Err(PlanError::TooManyMonths(121)));
    assert_eq!(
      parse_months("abc").unwrap_err().to_string(),
      "Please enter a valid number of months (1 or more)."
    );
  }
}
