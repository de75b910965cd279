use std::fmt::Display;
use std::fmt::Formatter;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// A user facing problem reported back to the surrounding build.
///
/// The bundler never fails on configuration problems, it reports them as diagnostics and keeps
/// going with defaults.
#[derive(Clone, Debug, Default, Deserialize, Eq, Error, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
  /// A summary user-facing message
  pub message: String,

  /// Indicates where this diagnostic was emitted from
  pub origin: Option<String>,

  /// Hints for the user
  pub hints: Option<Vec<String>>,
}

impl Display for Diagnostic {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.message)
  }
}

impl Diagnostic {
  pub fn new(origin: impl Into<String>, message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
      origin: Some(origin.into()),
      hints: None,
    }
  }

  pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
    self.hints.get_or_insert_with(Vec::new).push(hint.into());
    self
  }
}
