use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::analysis::{FetchedDocument, Finding};
use crate::error::TransitionError;

/// Per-item stage. Only ever moves forward:
/// Pending → Fetching → Analyzing → {Success, Error}, and Fetching → Error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Fetching,
    Analyzing,
    Success,
    Error,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Fetching => "fetching",
            ItemStatus::Analyzing => "analyzing",
            ItemStatus::Success => "success",
            ItemStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Success | ItemStatus::Error)
    }

    pub fn can_transition_to(&self, next: ItemStatus) -> bool {
        use ItemStatus::*;
        matches!(
            (self, next),
            (Pending, Fetching)
                | (Fetching, Analyzing)
                | (Fetching, Error)
                | (Analyzing, Success)
                | (Analyzing, Error)
        )
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ItemStatus::Pending),
            "fetching" => Ok(ItemStatus::Fetching),
            "analyzing" => Ok(ItemStatus::Analyzing),
            "success" => Ok(ItemStatus::Success),
            "error" => Ok(ItemStatus::Error),
            other => Err(format!("unknown item status '{}'", other)),
        }
    }
}

/// One document moving through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingItem {
    pub url: String,
    pub status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(skip)]
    pub raw_content: Option<String>,
}

impl ProcessingItem {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status: ItemStatus::Pending,
            error_reason: None,
            title: None,
            venue: None,
            findings: Vec::new(),
            raw_content: None,
        }
    }

    fn transition(&mut self, next: ItemStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn start_fetch(&mut self) -> Result<(), TransitionError> {
        self.transition(ItemStatus::Fetching)
    }

    /// Stores the fetched document, cutting its content to `max_content_len`
    /// bytes, and moves on to analysis.
    pub fn start_analysis(
        &mut self,
        document: FetchedDocument,
        max_content_len: usize,
    ) -> Result<(), TransitionError> {
        self.transition(ItemStatus::Analyzing)?;
        self.title = Some(document.title);
        self.venue = document.venue;
        self.raw_content = Some(truncate_at_char_boundary(
            document.raw_content,
            max_content_len,
        ));
        Ok(())
    }

    pub fn succeed(&mut self, findings: Vec<Finding>) -> Result<(), TransitionError> {
        self.transition(ItemStatus::Success)?;
        self.findings = findings.into_iter().map(Finding::normalized).collect();
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(ItemStatus::Error)?;
        self.error_reason = Some(reason.into());
        Ok(())
    }
}

pub(crate) fn truncate_at_char_boundary(mut s: String, max_len: usize) -> String {
    if s.len() <= max_len {
        return s;
    }
    let mut cut = max_len;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
    s
}
