//! Collaborators that turn a URL into findings.
//!
//! The pipeline only sees the [`Fetcher`] and [`Extractor`] traits; the
//! HTTP fetcher here is a convenience implementation and the extractor is
//! always supplied by the caller.

pub mod http;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, FetchError};

pub use http::HttpFetcher;

/// What a fetcher returns for one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedDocument {
    pub title: String,
    pub venue: Option<String>,
    pub raw_content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingCategory {
    Data,
    Compute,
    Evaluation,
    Methodology,
}

impl fmt::Display for FindingCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FindingCategory::Data => "data",
            FindingCategory::Compute => "compute",
            FindingCategory::Evaluation => "evaluation",
            FindingCategory::Methodology => "methodology",
        };
        f.write_str(name)
    }
}

/// An unsolved-problem statement extracted from a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub problem_statement: String,
    pub category: FindingCategory,
    /// Always within `[0, 1]`.
    pub confidence: f64,
}

impl Finding {
    pub fn new(
        problem_statement: impl Into<String>,
        category: FindingCategory,
        confidence: f64,
    ) -> Self {
        Self {
            problem_statement: problem_statement.into(),
            category,
            confidence: clamp_confidence(confidence),
        }
    }

    /// Returns the finding with its confidence forced into `[0, 1]`.
    pub fn normalized(mut self) -> Self {
        self.confidence = clamp_confidence(self.confidence);
        self
    }
}

fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedDocument, FetchError>;
}

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, raw_content: &str) -> Result<Vec<Finding>, AnalysisError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_is_clamped() {
        assert_eq!(Finding::new("a", FindingCategory::Data, 1.7).confidence, 1.0);
        assert_eq!(Finding::new("b", FindingCategory::Compute, -0.2).confidence, 0.0);
        assert_eq!(Finding::new("c", FindingCategory::Evaluation, 0.42).confidence, 0.42);
        assert_eq!(Finding::new("d", FindingCategory::Methodology, f64::NAN).confidence, 0.0);
    }

    #[test]
    fn test_normalized_fixes_raw_values() {
        let raw = Finding {
            problem_statement: "No public benchmark".to_string(),
            category: FindingCategory::Evaluation,
            confidence: 3.0,
        };
        assert_eq!(raw.normalized().confidence, 1.0);
    }

    #[test]
    fn test_finding_json_shape() {
        let finding = Finding::new("Scaling beyond 1B params", FindingCategory::Compute, 0.8);
        let json = serde_json::to_value(&finding).unwrap();
        assert_eq!(json["problemStatement"], "Scaling beyond 1B params");
        assert_eq!(json["category"], "compute");
    }
}
