//! Chat-completion client for daily notes and quiz questions.
//!
//! Requests go through a `ChatUpstream`: either the in-process proxy upstream or a
//! remote proxy deployment. Calls log model name, latency and response sizes, not contents.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::config::{ContentSettings, Prompts};
use crate::domain::{DailyContent, Difficulty, QuizQuestion};
use crate::relay::{ChatUpstream, RelayError};
use crate::util::{fill_template, strip_code_fences, trunc_for_log};

#[derive(Debug, Error)]
pub enum FlowError {
  #[error(transparent)]
  Relay(#[from] RelayError),
  #[error("upstream HTTP {status}: {message}")]
  Upstream { status: u16, message: String },
  #[error("generated content was malformed: {0}")]
  MalformedContent(String),
}

#[derive(Clone)]
pub struct ContentClient {
  upstream: Arc<dyn ChatUpstream>,
  prompts: Prompts,
  model: String,
  temperature: f32,
}

impl ContentClient {
  pub fn new(upstream: Arc<dyn ChatUpstream>, prompts: Prompts, settings: &ContentSettings) -> Self {
    Self { upstream, prompts, model: settings.model.clone(), temperature: settings.temperature }
  }

  #[instrument(level = "info", skip(self, system, user), fields(model = %self.model))]
  async fn chat_text(&self, system: &str, user: &str) -> Result<String, FlowError> {
    let req = ChatCompletionRequest {
      messages: vec![
        ChatMessageReq { role: "system".into(), content: system.into() },
        ChatMessageReq { role: "user".into(), content: user.into() },
      ],
      model: self.model.clone(),
      temperature: self.temperature,
      stream: false,
    };
    let payload = serde_json::to_vec(&req).map_err(|e| FlowError::MalformedContent(e.to_string()))?;

    let start = Instant::now();
    let reply = self.upstream.forward(Bytes::from(payload)).await?;
    let elapsed = start.elapsed();

    if !reply.is_success() {
      let body = String::from_utf8_lossy(&reply.body).to_string();
      let message = extract_api_error(&body).unwrap_or_else(|| trunc_for_log(&body, 200));
      error!(?elapsed, status = reply.status, %message, "Model call rejected");
      return Err(FlowError::Upstream { status: reply.status, message });
    }

    let body: ChatCompletionResponse =
      serde_json::from_slice(&reply.body).map_err(|e| FlowError::MalformedContent(e.to_string()))?;
    if let Some(usage) = &body.usage {
      info!(prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "Model usage");
    }
    let text = body
      .choices
      .first()
      .and_then(|c| c.message.content.clone())
      .unwrap_or_default()
      .trim()
      .to_string();
    info!(?elapsed, text_len = text.len(), "Model response received");
    Ok(text)
  }

  async fn chat_json<T: for<'a> Deserialize<'a>>(&self, system: &str, user: &str) -> Result<T, FlowError> {
    let text = self.chat_text(system, user).await?;
    serde_json::from_str::<T>(strip_code_fences(&text)).map_err(|e| {
      warn!(error = %e, preview = %trunc_for_log(&text, 120), "Model reply is not the expected JSON");
      FlowError::MalformedContent(e.to_string())
    })
  }

  /// Study notes covering the day's topics.
  #[instrument(level = "info", skip(self, topics), fields(topic_count = topics.len()))]
  pub async fn daily_content(&self, topics: &[String]) -> Result<DailyContent, FlowError> {
    let user = fill_template(&self.prompts.daily_user_template, &[("topics", &topics.join(" + "))]);
    let content: DailyContent = self.chat_json(&self.prompts.daily_system, &user).await?;
    if content.title.trim().is_empty() && content.content.trim().is_empty() {
      return Err(FlowError::MalformedContent("empty title and content".into()));
    }
    Ok(content)
  }

  /// Up to `count` new questions for `topic`. Items without four options or whose
  /// answer is not one of them are discarded.
  #[instrument(level = "info", skip(self, missed), fields(missed = missed.len()))]
  pub async fn quiz_questions(
    &self,
    topic: &str,
    count: usize,
    difficulty: Difficulty,
    missed: &[QuizQuestion],
  ) -> Result<Vec<QuizQuestion>, FlowError> {
    let retry = if missed.is_empty() {
      String::new()
    } else {
      let list = missed.iter().map(|q| format!("\"{}\"", q.q)).collect::<Vec<_>>().join("; ");
      format!("The student recently missed: {list}. Cover the facts behind these without repeating them verbatim. ")
    };
    let user = fill_template(
      &self.prompts.quiz_user_template,
      &[
        ("count", &count.to_string()),
        ("topic", topic),
        ("difficulty", &difficulty.to_string()),
        ("retry", &retry),
      ],
    );

    let raw: Vec<QuizQuestion> = self.chat_json(&self.prompts.quiz_system, &user).await?;
    let total = raw.len();
    let questions: Vec<QuizQuestion> = raw
      .into_iter()
      .filter(|q| q.options.len() == 4 && q.options.contains(&q.a))
      .map(|q| QuizQuestion { attempts: 0, correct: 0, ..q })
      .take(count)
      .collect();
    if questions.is_empty() {
      return Err(FlowError::MalformedContent(format!("none of {total} questions were usable")));
    }
    if questions.len() < total.min(count) {
      warn!(kept = questions.len(), total, "Dropped malformed quiz questions");
    }
    Ok(questions)
  }
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  messages: Vec<ChatMessageReq>,
  model: String,
  temperature: f32,
  stream: bool,
}
#[derive(Serialize)]
struct ChatMessageReq { role: String, content: String }

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)] usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice { message: ChatMessageResp }
#[derive(Deserialize)]
struct ChatMessageResp { content: Option<String> }
#[derive(Deserialize)]
struct Usage {
  #[serde(default)] prompt_tokens: Option<u32>,
  #[serde(default)] completion_tokens: Option<u32>,
  #[serde(default)] total_tokens: Option<u32>,
}

/// Pull a readable message out of an API error body. Handles both
/// `{"error":{"message":...}}` and `{"error":"..."}` shapes.
fn extract_api_error(body: &str) -> Option<String> {
  let v: serde_json::Value = serde_json::from_str(body).ok()?;
  let err = v.get("error")?;
  err.get("message").and_then(|m| m.as_str()).or_else(|| err.as_str()).map(str::to_string)
}


#[cfg(test)]
mod tests {
  use super::testing::ScriptedUpstream;
  use super::*;

  fn client(upstream: Arc<ScriptedUpstream>) -> ContentClient {
    ContentClient::new(upstream, Prompts::default(), &ContentSettings::default())
  }

  #[tokio::test]
  async fn daily_content_parses_fenced_json_and_sends_chat_payload() {
    let up = Arc::new(ScriptedUpstream::new(vec![ScriptedUpstream::completion(
      "```json\n{\"title\":\"Polity basics\",\"content\":\"Preamble...\"}\n```",
    )]));
    let c = client(up.clone());
    let out = c.daily_content(&["Polity & Constitution".into()]).await.unwrap();
    assert_eq!(out.title, "Polity basics");

    let sent = up.requests.lock().unwrap()[0].clone();
    assert_eq!(sent["stream"], false);
    assert_eq!(sent["model"], "grok-3-mini");
    assert!(sent["messages"][1]["content"].as_str().unwrap().contains("Polity & Constitution"));
  }

  #[tokio::test]
  async fn non_json_reply_is_malformed_not_a_panic() {
    let up = Arc::new(ScriptedUpstream::new(vec![ScriptedUpstream::completion("Sure! Here are your notes.")]));
    let err = client(up).daily_content(&["History".into()]).await.unwrap_err();
    assert!(matches!(err, FlowError::MalformedContent(_)));
  }

  #[tokio::test]
  async fn upstream_rejection_carries_status_and_message() {
    let up = Arc::new(ScriptedUpstream::new(vec![Ok((
      429,
      r#"{"error":{"message":"rate limited"}}"#.to_string(),
    ))]));
    match client(up).daily_content(&["History".into()]).await {
      Err(FlowError::Upstream { status, message }) => {
        assert_eq!(status, 429);
        assert_eq!(message, "rate limited");
      }
      other => panic!("unexpected: {other:?}"),
    }
  }

  #[tokio::test]
  async fn quiz_questions_drop_unusable_items() {
    let reply = serde_json::json!([
      { "q": "Article 21 protects?", "options": ["Life", "Trade", "Speech", "Religion"], "a": "Life", "explanation": "Right to life", "difficulty": "Easy", "attempts": 9 },
      { "q": "Broken", "options": ["A", "B"], "a": "A" },
      { "q": "Answer not listed", "options": ["A", "B", "C", "D"], "a": "E" }
    ])
    .to_string();
    let up = Arc::new(ScriptedUpstream::new(vec![ScriptedUpstream::completion(&reply)]));
    let qs = client(up).quiz_questions("Polity", 5, Difficulty::Easy, &[]).await.unwrap();
    assert_eq!(qs.len(), 1);
    assert_eq!(qs[0].attempts, 0);
  }
}
