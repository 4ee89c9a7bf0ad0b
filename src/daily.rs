//! Daily flow: which study day it is, and that day's generated notes.

use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::config::CachePolicy;
use crate::content::{ContentClient, FlowError};
use crate::domain::{keys, DailyContent, DayEntry, Plan};
use crate::store::{Persistence, SaveStatus};

/// Calendar date whose content is unlocked at `now`. The new day starts at `unlock_hour`, not midnight.
pub fn study_date(now: NaiveDateTime, unlock_hour: u32) -> NaiveDate {
  let date = now.date();
  if now.hour() < unlock_hour {
    date - Duration::days(1)
  } else {
    date
  }
}

/// 1-based day number: the start date itself is day 1.
pub fn current_day(start: NaiveDate, today: NaiveDate) -> i64 {
  (today - start).num_days() + 1
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DayStatus<'a> {
  NotStarted,
  Day { number: usize, entry: &'a DayEntry },
  Complete,
}

pub fn day_status(plan: &Plan, start: NaiveDate, today: NaiveDate) -> DayStatus<'_> {
  let n = current_day(start, today);
  if n < 1 {
    return DayStatus::NotStarted;
  }
  let number = n as usize;
  match plan.get(number - 1) {
    Some(entry) => DayStatus::Day { number, entry },
    None => DayStatus::Complete,
  }
}

/// Cached notes, tagged with the topics they were written for so that a
/// regenerated plan does not serve notes for a different day's topics.
#[derive(Serialize, Deserialize)]
struct CachedDay {
  #[serde(flatten)]
  content: DailyContent,
  #[serde(default)]
  topics: Vec<String>,
}

/// Notes for study day `number`, reusing `day_<n>` when the policy allows and
/// the cached entry covers the same topics. Also returns how the cache write went.
#[instrument(level = "info", skip(client, store, entry))]
pub async fn content_for_day(
  client: &ContentClient,
  store: &Persistence,
  policy: CachePolicy,
  number: usize,
  entry: &DayEntry,
) -> Result<(DailyContent, SaveStatus), FlowError> {
  let key = keys::day(number);
  if policy == CachePolicy::CacheFirst {
    match store.load_as::<CachedDay>(&key).await {
      Some(cached) if cached.topics == entry.topics => {
        debug!(target: "planner", %key, "Serving cached day content");
        return Ok((cached.content, SaveStatus::Saved));
      }
      Some(_) => debug!(target: "planner", %key, "Cached day content is for other topics"),
      None => {}
    }
  }

  let content = client.daily_content(&entry.topics).await?;
  let cached = CachedDay { content, topics: entry.topics.clone() };
  let status = store.save_as(&key, &cached).await;
  info!(target: "planner", %key, title = %cached.content.title, ?status, "Generated day content");
  Ok((cached.content, status))
}
