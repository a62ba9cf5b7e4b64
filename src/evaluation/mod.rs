pub mod config_service;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{PotemkinError, Result};

pub use config_service::ConfigServiceClient;

/// Verdict a compliance rule assigned to a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplianceType {
    Compliant,
    NonCompliant,
    NotApplicable,
    InsufficientData,
}

impl ComplianceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplianceType::Compliant => "COMPLIANT",
            ComplianceType::NonCompliant => "NON_COMPLIANT",
            ComplianceType::NotApplicable => "NOT_APPLICABLE",
            ComplianceType::InsufficientData => "INSUFFICIENT_DATA",
        }
    }
}

impl fmt::Display for ComplianceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComplianceType {
    type Err = PotemkinError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "COMPLIANT" => Ok(ComplianceType::Compliant),
            "NON_COMPLIANT" => Ok(ComplianceType::NonCompliant),
            "NOT_APPLICABLE" => Ok(ComplianceType::NotApplicable),
            "INSUFFICIENT_DATA" => Ok(ComplianceType::InsufficientData),
            other => Err(PotemkinError::Backend(format!(
                "unknown compliance type: {other}"
            ))),
        }
    }
}

/// One evaluation result reported by the rule engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub resource_id: String,
    pub compliance_type: ComplianceType,
    pub rule_name: String,
    pub recorded_at: Option<DateTime<Utc>>,
}

impl EvaluationRecord {
    pub fn new(resource_id: &str, compliance_type: ComplianceType, rule_name: &str) -> Self {
        Self {
            resource_id: resource_id.to_string(),
            compliance_type,
            rule_name: rule_name.to_string(),
            recorded_at: None,
        }
    }

    pub fn recorded_at(mut self, at: DateTime<Utc>) -> Self {
        self.recorded_at = Some(at);
        self
    }
}

/// Expected status per resource id
pub type ExpectationSet = BTreeMap<String, ComplianceType>;

/// Access to a compliance rule engine.
///
/// Each call is a single best-effort round trip. Transport failures surface
/// as [`PotemkinError::BackendUnavailable`] and are left for the poll loop
/// to retry.
pub trait EvaluationClient: Send + Sync {
    /// Evaluation records for `rule_name`, oldest first, optionally limited
    /// to `resource_ids`
    fn list_evaluations<'a>(
        &'a self,
        rule_name: &'a str,
        resource_ids: Option<&'a [String]>,
    ) -> BoxFuture<'a, Result<Vec<EvaluationRecord>>>;

    /// Ask the engine to re-evaluate `rule_name` now. Safe to repeat.
    fn trigger_evaluation<'a>(&'a self, rule_name: &'a str) -> BoxFuture<'a, Result<()>>;
}
