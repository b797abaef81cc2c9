//! Lifecycle state of a meeting record and the partial order over it.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Discrete stage of a meeting record's processing.
///
/// The chain `Discovered < TranscriptPending < TranscriptFetched <
/// SummarizationPending < Completed` only moves forward. `Failed` sits off the
/// chain: any non-terminal state may fail, and only an explicit replay leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Discovered,
    TranscriptPending,
    TranscriptFetched,
    SummarizationPending,
    Completed,
    Failed,
}

impl LifecycleState {
    pub const ALL: [LifecycleState; 6] = [
        Self::Discovered,
        Self::TranscriptPending,
        Self::TranscriptFetched,
        Self::SummarizationPending,
        Self::Completed,
        Self::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::TranscriptPending => "transcript_pending",
            Self::TranscriptFetched => "transcript_fetched",
            Self::SummarizationPending => "summarization_pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "discovered" => Ok(Self::Discovered),
            "transcript_pending" => Ok(Self::TranscriptPending),
            "transcript_fetched" => Ok(Self::TranscriptFetched),
            "summarization_pending" => Ok(Self::SummarizationPending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => bail!("Invalid lifecycle state: {}", s),
        }
    }

    /// Position on the forward chain; `None` for `Failed`.
    pub fn chain_position(&self) -> Option<u8> {
        match self {
            Self::Discovered => Some(0),
            Self::TranscriptPending => Some(1),
            Self::TranscriptFetched => Some(2),
            Self::SummarizationPending => Some(3),
            Self::Completed => Some(4),
            Self::Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// True for states at or past `TranscriptFetched` on the chain.
    pub fn holds_transcript(&self) -> bool {
        self.chain_position().is_some_and(|pos| pos >= 2)
    }

    /// Whether `self -> next` is a legal write.
    ///
    /// `Failed -> TranscriptPending` is the replay path and nothing else leaves
    /// `Failed`.
    pub fn can_transition_to(&self, next: LifecycleState) -> bool {
        match (self, next) {
            (Self::Failed, Self::TranscriptPending) => true,
            (Self::Failed, _) | (Self::Completed, _) => false,
            (_, Self::Failed) => true,
            (from, to) => matches!(
                (from.chain_position(), to.chain_position()),
                (Some(a), Some(b)) if b > a
            ),
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What is known about the meeting itself having taken place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeetingOutcome {
    Unknown,
    Success,
    Failure,
}

impl MeetingOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "unknown" => Ok(Self::Unknown),
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            _ => bail!("Invalid meeting outcome: {}", s),
        }
    }
}
