//! Configuration: environment settings plus an optional TOML file
//! (topic list, content-generation options, prompts).
//!
//! See `PlannerConfig`, `ContentSettings` and `Prompts` for the expected schema.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info, warn};

use crate::planner::default_topics;

pub const DEFAULT_GROK_API_URL: &str = "https://api.x.ai/v1/chat/completions";
pub const DEFAULT_SESSION_IDLE: Duration = Duration::from_secs(24 * 60 * 60);

/// Process-level settings read from the environment.
#[derive(Clone, Debug)]
pub struct Settings {
  pub port: u16,
  pub grok_api_key: Option<String>,
  pub grok_api_url: String,
  /// When set, daily/quiz generation goes through this proxy instead of the in-process upstream.
  pub content_proxy_url: Option<String>,
  pub data_dir: PathBuf,
  /// Sessions untouched for this long are dropped from memory; guest records stay on disk.
  pub session_idle: Duration,
}

impl Settings {
  pub fn from_env() -> Self {
    let port = std::env::var("PORT").ok().and_then(|p| p.parse::<u16>().ok()).unwrap_or(3000);
    let grok_api_key = std::env::var("GROK_API_KEY").ok().filter(|k| !k.is_empty());
    let grok_api_url = std::env::var("GROK_API_URL").unwrap_or_else(|_| DEFAULT_GROK_API_URL.into());
    let content_proxy_url = std::env::var("CONTENT_PROXY_URL").ok().filter(|u| !u.is_empty());
    let data_dir = std::env::var("DATA_DIR").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("./data"));
    let session_idle = std::env::var("SESSION_IDLE_SECS")
      .ok()
      .and_then(|s| s.parse::<u64>().ok())
      .filter(|s| *s > 0)
      .map(Duration::from_secs)
      .unwrap_or(DEFAULT_SESSION_IDLE);
    Self { port, grok_api_key, grok_api_url, content_proxy_url, data_dir, session_idle }
  }

  /// Directory holding one JSON record per guest device.
  pub fn local_dir(&self) -> PathBuf {
    self.data_dir.join("local")
  }
}

#[derive(Clone, Debug, Deserialize)]
pub struct PlannerConfig {
  #[serde(default = "default_topics")]
  pub topics: Vec<String>,
  #[serde(default)]
  pub content: ContentSettings,
  #[serde(default)]
  pub prompts: Prompts,
}

impl Default for PlannerConfig {
  fn default() -> Self {
    Self { topics: default_topics(), content: ContentSettings::default(), prompts: Prompts::default() }
  }
}

impl PlannerConfig {
  fn normalize(&mut self) {
    self.topics.retain(|t| !t.trim().is_empty());
    if self.topics.is_empty() {
      warn!(target: "ssc_planner", "Configured topic list is empty; using defaults");
      self.topics = default_topics();
    }
    if self.content.quiz_size == 0 {
      self.content.quiz_size = DEFAULT_QUIZ_SIZE;
    }
    if self.content.unlock_hour > 23 {
      self.content.unlock_hour = DEFAULT_UNLOCK_HOUR;
    }
  }
}

/// Whether generated day content is reused once stored.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
  #[default]
  CacheFirst,
  AlwaysRefresh,
}

const DEFAULT_QUIZ_SIZE: usize = 5;
const DEFAULT_UNLOCK_HOUR: u32 = 6;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ContentSettings {
  pub model: String,
  pub temperature: f32,
  pub cache_policy: CachePolicy,
  pub quiz_size: usize,
  /// Local hour at which the next study day unlocks.
  pub unlock_hour: u32,
}

impl Default for ContentSettings {
  fn default() -> Self {
    Self {
      model: "grok-3-mini".into(),
      temperature: 0.7,
      cache_policy: CachePolicy::CacheFirst,
      quiz_size: DEFAULT_QUIZ_SIZE,
      unlock_hour: DEFAULT_UNLOCK_HOUR,
    }
  }
}

/// Prompts sent through the content proxy. Override them in TOML to tune tone/structure.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub daily_system: String,
  pub daily_user_template: String,
  pub quiz_system: String,
  pub quiz_user_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      daily_system: "You are an SSC CGL general awareness tutor. Respond ONLY with strict JSON.".into(),
      daily_user_template: "Write today's study notes for SSC CGL covering: {topics}. Focus on facts that are frequently asked in the exam. Return JSON with fields: title (string), content (string, may use short paragraphs and bullet points).".into(),
      quiz_system: "You are an SSC CGL question setter. Respond ONLY with strict JSON.".into(),
      quiz_user_template: "Create {count} multiple-choice questions on {topic} at {difficulty} difficulty in SSC CGL style. {retry}Return a JSON array; each item has fields: q (string), options (array of exactly 4 strings), a (the correct option, copied exactly from options), explanation (string), difficulty (string).".into(),
    }
  }
}

/// Load `PlannerConfig` from PLANNER_CONFIG_PATH. Missing variable, IO or parse errors fall back to defaults.
pub fn load_planner_config_from_env() -> PlannerConfig {
  let Ok(path) = std::env::var("PLANNER_CONFIG_PATH") else {
    return PlannerConfig::default();
  };
  let mut cfg = match std::fs::read_to_string(&path) {
    Ok(s) => match toml::from_str::<PlannerConfig>(&s) {
      Ok(cfg) => {
        info!(target: "ssc_planner", %path, topics = cfg.topics.len(), "Loaded planner config (TOML)");
        cfg
      }
      Err(e) => {
        error!(target: "ssc_planner", %path, error = %e, "Failed to parse TOML config");
        PlannerConfig::default()
      }
    },
    Err(e) => {
      error!(target: "ssc_planner", %path, error = %e, "Failed to read TOML config file");
      PlannerConfig::default()
    }
  };
  cfg.normalize();
  cfg
}
