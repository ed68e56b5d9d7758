// Approval and classification types shared with front ends

use serde::{Deserialize, Serialize};

/// Answer given to an approval prompt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
  /// Run this one call.
  Approved,
  /// Run this call and every matching call for the rest of the session.
  ApprovedForSession,
  /// Refuse this one call.
  Denied,
  /// Refuse this call and every matching call for the rest of the session.
  DeniedForSession,
}

impl ReviewDecision {
  pub fn is_approved(&self) -> bool {
    matches!(
      self,
      ReviewDecision::Approved | ReviewDecision::ApprovedForSession
    )
  }
}

/// Whether a tool changes state outside the conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MutabilityClass {
  ReadOnly,
  Mutating,
}
