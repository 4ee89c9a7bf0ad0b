//! Quiz flow: assemble a quiz (retry pool first, generated questions after),
//! grade a submission, and persist scores, the retry pool and the next difficulty.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, instrument};

use crate::content::{ContentClient, FlowError};
use crate::domain::{keys, Difficulty, QuizQuestion};
use crate::store::{Persistence, SaveStatus};

/// topic → questions still being retried.
pub type QuizProgress = HashMap<String, Vec<QuizQuestion>>;
/// ISO date → score.
pub type QuizScores = BTreeMap<String, usize>;

#[derive(Clone, Debug, Serialize)]
pub struct AnswerResult {
  pub q: String,
  pub selected: Option<String>,
  pub answer: String,
  pub correct: bool,
  pub explanation: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct QuizOutcome {
  pub score: usize,
  pub total: usize,
  pub next_difficulty: Difficulty,
  pub results: Vec<AnswerResult>,
  #[serde(skip)]
  pub save_status: SaveStatus,
}

/// Grade by exact match against the recorded answer and bump each question's counters.
/// Missing selections count as wrong.
pub fn grade(questions: &mut [QuizQuestion], selections: &[Option<String>]) -> (usize, Vec<AnswerResult>) {
  let mut score = 0;
  let mut results = Vec::with_capacity(questions.len());
  for (i, q) in questions.iter_mut().enumerate() {
    let selected = selections.get(i).cloned().flatten();
    let correct = selected.as_deref() == Some(q.a.as_str());
    q.attempts += 1;
    if correct {
      q.correct += 1;
      score += 1;
    }
    results.push(AnswerResult {
      q: q.q.clone(),
      selected,
      answer: q.a.clone(),
      correct,
      explanation: q.explanation.clone(),
    });
  }
  (score, results)
}

/// Merge freshly answered questions into a topic's pool. Questions are matched by text;
/// anything at or above 80% running accuracy leaves the pool.
pub fn fold_retry_pool(mut pool: Vec<QuizQuestion>, answered: &[QuizQuestion]) -> Vec<QuizQuestion> {
  for q in answered {
    pool.retain(|p| p.q != q.q);
    if !q.is_mastered() {
      pool.push(q.clone());
    }
  }
  pool
}

/// Retry questions fill at most half the quiz (rounded up).
fn retry_share(quiz_size: usize) -> usize {
  quiz_size.div_ceil(2)
}

/// Build today's quiz for `topic`.
#[instrument(level = "info", skip(client, store))]
pub async fn prepare_quiz(
  client: &ContentClient,
  store: &Persistence,
  topic: &str,
  quiz_size: usize,
) -> Result<Vec<QuizQuestion>, FlowError> {
  let difficulty = store.load_as::<Difficulty>(keys::NEXT_DIFFICULTY).await.unwrap_or_default();
  let progress = store.load_as::<QuizProgress>(keys::QUIZ_PROGRESS).await.unwrap_or_default();

  let mut quiz: Vec<QuizQuestion> = progress
    .get(topic)
    .map(|pool| pool.iter().take(retry_share(quiz_size)).cloned().collect())
    .unwrap_or_default();
  let retried = quiz.len();

  let needed = quiz_size.saturating_sub(retried);
  if needed > 0 {
    let fresh = client.quiz_questions(topic, needed, difficulty, &quiz).await?;
    quiz.extend(fresh);
  }
  info!(target: "quiz", %topic, %difficulty, retried, total = quiz.len(), "Quiz prepared");
  Ok(quiz)
}

/// Grade a submission for `date` and persist the results.
#[instrument(level = "info", skip(store, questions, selections), fields(total = questions.len()))]
pub async fn submit_quiz(
  store: &Persistence,
  topic: &str,
  date: NaiveDate,
  mut questions: Vec<QuizQuestion>,
  selections: &[Option<String>],
) -> QuizOutcome {
  let (score, results) = grade(&mut questions, selections);
  let total = questions.len();
  let next_difficulty = Difficulty::from_score(score, total);

  let mut scores = store.load_as::<QuizScores>(keys::QUIZ_SCORES).await.unwrap_or_default();
  scores.insert(date.format("%Y-%m-%d").to_string(), score);

  let mut progress = store.load_as::<QuizProgress>(keys::QUIZ_PROGRESS).await.unwrap_or_default();
  let pool = progress.remove(topic).unwrap_or_default();
  progress.insert(topic.to_string(), fold_retry_pool(pool, &questions));

  let statuses = [
    store.save_as(keys::QUIZ_SCORES, &scores).await,
    store.save_as(keys::QUIZ_PROGRESS, &progress).await,
    store.save_as(keys::NEXT_DIFFICULTY, &next_difficulty).await,
  ];
  let save_status = statuses.into_iter().find(|s| *s != SaveStatus::Saved).unwrap_or(SaveStatus::Saved);

  info!(target: "quiz", %topic, score, total, %next_difficulty, "Quiz graded");
  QuizOutcome { score, total, next_difficulty, results, save_status }
}
