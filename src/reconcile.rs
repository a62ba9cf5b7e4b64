//! Matching expected compliance verdicts against observed evaluation records.
//!
//! Everything here is pure: the same inputs always give the same
//! [`Reconciliation`], so it can be recomputed on every poll iteration.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::evaluation::{ComplianceType, EvaluationRecord, ExpectationSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Mismatch {
    pub expected: ComplianceType,
    pub observed: ComplianceType,
}

/// Expectations not yet met by the observed records
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    pub mismatched: BTreeMap<String, Mismatch>,
    pub missing: BTreeSet<String>,
}

impl Reconciliation {
    pub fn is_satisfied(&self) -> bool {
        self.mismatched.is_empty() && self.missing.is_empty()
    }

    pub fn outstanding(&self) -> usize {
        self.mismatched.len() + self.missing.len()
    }
}

/// Compare `expected` against `observed`, which must be ordered oldest
/// first. Only the latest record per resource counts.
pub fn reconcile(expected: &ExpectationSet, observed: &[EvaluationRecord]) -> Reconciliation {
    let latest = latest_by_resource(observed);
    let mut reconciliation = Reconciliation::default();

    for (resource_id, expected_type) in expected {
        match latest.get(resource_id.as_str()) {
            None => {
                reconciliation.missing.insert(resource_id.clone());
            }
            Some(record) if record.compliance_type != *expected_type => {
                reconciliation.mismatched.insert(
                    resource_id.clone(),
                    Mismatch {
                        expected: *expected_type,
                        observed: record.compliance_type,
                    },
                );
            }
            Some(_) => {}
        }
    }

    reconciliation
}

/// True when none of `resource_ids` has any record in `observed`
pub fn all_absent(observed: &[EvaluationRecord], resource_ids: &[String]) -> bool {
    still_present(observed, resource_ids).is_empty()
}

/// The subset of `resource_ids` that still has records, in input order
pub fn still_present(observed: &[EvaluationRecord], resource_ids: &[String]) -> Vec<String> {
    let seen: HashSet<&str> = observed.iter().map(|r| r.resource_id.as_str()).collect();
    let mut reported = HashSet::new();

    resource_ids
        .iter()
        .filter(|id| seen.contains(id.as_str()) && reported.insert(id.as_str()))
        .cloned()
        .collect()
}

fn latest_by_resource(observed: &[EvaluationRecord]) -> HashMap<&str, &EvaluationRecord> {
    let mut latest = HashMap::new();
    for record in observed {
        latest.insert(record.resource_id.as_str(), record);
    }
    latest
}
