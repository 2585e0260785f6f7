use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;

/// Which part of the app a mutation belongs to. Selects the replay handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
  Weather,
  Recommendation,
  Schedule,
  Preference,
}

impl MutationKind {
  pub const ALL: [MutationKind; 4] = [
    MutationKind::Weather,
    MutationKind::Recommendation,
    MutationKind::Schedule,
    MutationKind::Preference,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      MutationKind::Weather => "weather",
      MutationKind::Recommendation => "recommendation",
      MutationKind::Schedule => "schedule",
      MutationKind::Preference => "preference",
    }
  }
}

impl fmt::Display for MutationKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for MutationKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    MutationKind::ALL
      .into_iter()
      .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
      .ok_or_else(|| format!("unknown mutation kind '{}'", s))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationOperation {
  Create,
  Update,
  Delete,
}

impl MutationOperation {
  pub fn as_str(&self) -> &'static str {
    match self {
      MutationOperation::Create => "create",
      MutationOperation::Update => "update",
      MutationOperation::Delete => "delete",
    }
  }
}

impl fmt::Display for MutationOperation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for MutationOperation {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "create" => Ok(MutationOperation::Create),
      "update" => Ok(MutationOperation::Update),
      "delete" => Ok(MutationOperation::Delete),
      _ => Err(format!("unknown mutation operation '{}'", s)),
    }
  }
}

/// A mutation made while offline, waiting to be replayed.
///
/// The payload must carry everything needed to replay it; the queue outlives
/// the process that wrote it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMutation {
  pub id: String,
  pub kind: MutationKind,
  pub operation: MutationOperation,
  pub payload: JsonValue,
  pub enqueued_at: DateTime<Utc>,
  pub retry_count: u32,
  pub max_retries: u32,
  /// Reason the most recent replay attempt failed
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_error: Option<String>,
}

/// Outcome of recording a failed replay attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryVerdict {
  /// Still queued; will be attempted again on the next run
  Retry { retry_count: u32 },
  /// Out of attempts (or unknown); no longer queued
  GiveUp,
  /// The failure could not be written; the item is still queued unchanged
  Unrecorded,
}

impl RetryVerdict {
  /// Whether the item is still queued for another attempt.
  pub fn should_retry(&self) -> bool {
    !matches!(self, RetryVerdict::GiveUp)
  }
}
