//! Public protocol structs for the HTTP API (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Plan, PlanSummary};
use crate::quiz::QuizOutcome;
use crate::session::Screen;

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
}

#[derive(Serialize)]
pub struct ErrorOut {
    pub error: &'static str,
}

/// Everything the frontend needs to render a session.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub session_id: Uuid,
    pub state: &'static str,
    pub email: Option<String>,
    pub screens: Vec<Screen>,
    pub summary: Option<PlanSummary>,
    pub plan: Option<Plan>,
    pub start_date: Option<String>,
    /// Inline message for the visible screen (validation or auth feedback).
    pub message: Option<String>,
    /// Non-blocking warning, e.g. the remote store was unreachable.
    pub warning: Option<String>,
}

#[derive(Deserialize)]
pub struct CredentialsIn {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// `months` is taken as typed by the user: a number or a string.
#[derive(Deserialize)]
pub struct MonthsIn {
    #[serde(default)]
    pub months: serde_json::Value,
}

impl MonthsIn {
    pub fn as_input(&self) -> String {
        match &self.months {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DailyOut {
    NotStarted,
    Complete {
        message: String,
    },
    Day {
        number: usize,
        label: String,
        topics: Vec<String>,
        title: String,
        /// Study notes, or a placeholder when `error` is set.
        content: String,
        error: bool,
    },
}

/// Quiz question as shown to the user; the answer stays on the server.
#[derive(Debug, Serialize)]
pub struct QuestionOut {
    pub q: String,
    pub options: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct QuizOut {
    pub topic: String,
    pub questions: Vec<QuestionOut>,
    pub error: Option<String>,
}

#[derive(Deserialize)]
pub struct QuizSubmitIn {
    #[serde(default)]
    pub selections: Vec<Option<String>>,
}

#[derive(Debug, Serialize)]
pub struct QuizResultOut {
    #[serde(flatten)]
    pub outcome: QuizOutcome,
    pub warning: Option<String>,
}
