//! Email/password identity with push-style auth-state notifications.
//!
//! `IdentityProvider` owns the accounts. Each client session gets an `AuthClient`
//! whose current user is published on a `watch` channel; the session controller
//! subscribes once and reacts to every change.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tracing::{info, instrument};
use uuid::Uuid;

const MIN_PASSWORD_LEN: usize = 6;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct User {
  pub uid: String,
  pub email: String,
}

#[derive(Debug, Error)]
pub enum AuthError {
  #[error("Please enter email and password")]
  MissingCredentials,
  /// Raw provider text, e.g. `Identity: Wrong password (auth/wrong-password).`
  #[error("{0}")]
  Provider(String),
}

impl AuthError {
  fn provider(message: &str, code: &str) -> Self {
    AuthError::Provider(format!("Identity: {message} (auth/{code})."))
  }

  /// Text suitable for the auth screen.
  pub fn user_message(&self) -> String {
    match self {
      AuthError::MissingCredentials => self.to_string(),
      AuthError::Provider(raw) => clean_provider_message(raw),
    }
  }
}

/// Strip vendor prefixes and `(auth/...)` error codes from provider text.
pub fn clean_provider_message(raw: &str) -> String {
  let mut s = raw.trim();
  for prefix in ["Firebase: ", "Identity: "] {
    if let Some(rest) = s.strip_prefix(prefix) {
      s = rest;
    }
  }
  let mut out = s.to_string();
  while let Some(start) = out.find("(auth/") {
    let end = out[start..].find(')').map(|i| start + i + 1).unwrap_or(out.len());
    out.replace_range(start..end, "");
  }
  let out = out.trim().trim_end_matches('.').trim();
  out.to_string()
}

struct Account {
  uid: String,
  password: String,
}

/// In-process account registry for development.
/// Passwords are held in memory only for the life of the process.
#[derive(Default)]
pub struct IdentityProvider {
  accounts: RwLock<HashMap<String, Account>>,
}

impl IdentityProvider {
  pub fn new() -> Self {
    Self::default()
  }

  /// A fresh per-session client, initially signed out.
  pub fn client(self: &Arc<Self>) -> AuthClient {
    let (tx, _rx) = watch::channel(None);
    AuthClient { provider: self.clone(), tx }
  }

  #[instrument(level = "info", skip(self, password))]
  async fn create_account(&self, email: &str, password: &str) -> Result<User, AuthError> {
    validate_email(email)?;
    if password.len() < MIN_PASSWORD_LEN {
      return Err(AuthError::provider("Password should be at least 6 characters", "weak-password"));
    }
    let mut accounts = self.accounts.write().await;
    if accounts.contains_key(email) {
      return Err(AuthError::provider("Email already in use", "email-already-in-use"));
    }
    let uid = Uuid::new_v4().to_string();
    accounts.insert(email.to_string(), Account { uid: uid.clone(), password: password.to_string() });
    info!(target: "session", %uid, "Account created");
    Ok(User { uid, email: email.to_string() })
  }

  async fn verify(&self, email: &str, password: &str) -> Result<User, AuthError> {
    validate_email(email)?;
    let accounts = self.accounts.read().await;
    match accounts.get(email) {
      None => Err(AuthError::provider("No account for this email", "user-not-found")),
      Some(a) if a.password != password => Err(AuthError::provider("Wrong password", "wrong-password")),
      Some(a) => Ok(User { uid: a.uid.clone(), email: email.to_string() }),
    }
  }
}

fn validate_email(email: &str) -> Result<(), AuthError> {
  let ok = email
    .split_once('@')
    .map(|(local, domain)| !local.is_empty() && domain.contains('.'))
    .unwrap_or(false);
  if ok { Ok(()) } else { Err(AuthError::provider("Invalid email", "invalid-email")) }
}

/// One client's view of the identity provider.
pub struct AuthClient {
  provider: Arc<IdentityProvider>,
  tx: watch::Sender<Option<User>>,
}

impl AuthClient {
  /// Register for auth-state changes. The current state counts as unseen.
  pub fn subscribe(&self) -> watch::Receiver<Option<User>> {
    let mut rx = self.tx.subscribe();
    rx.mark_changed();
    rx
  }

  #[allow(dead_code)]
  pub fn current_user(&self) -> Option<User> {
    self.tx.borrow().clone()
  }

  /// Create an account; the new user is signed in on success.
  pub async fn sign_up(&self, email: &str, password: &str) -> Result<User, AuthError> {
    let (email, password) = credentials(email, password)?;
    let user = self.provider.create_account(email, password).await?;
    self.tx.send_replace(Some(user.clone()));
    Ok(user)
  }

  pub async fn sign_in(&self, email: &str, password: &str) -> Result<User, AuthError> {
    let (email, password) = credentials(email, password)?;
    let user = self.provider.verify(email, password).await?;
    self.tx.send_replace(Some(user.clone()));
    Ok(user)
  }

  pub fn sign_out(&self) {
    self.tx.send_replace(None);
  }
}

fn credentials<'a>(email: &'a str, password: &'a str) -> Result<(&'a str, &'a str), AuthError> {
  let email = email.trim();
  if email.is_empty() || password.is_empty() {
    return Err(AuthError::MissingCredentials);
  }
  Ok((email, password))
}
