//! Integration tests for fixtures and compliance waits.
//!
//! These run entirely against the in-memory doubles from
//! `potemkin::test_harness` and a fake `terraform` script, so no AWS account
//! or Docker daemon is needed:
//!
//! ```bash
//! cargo test --features test-harness
//! ```
//!
//! - **lifecycle**: provision, run and teardown through `Fixture` and `stack_test!`
//! - **compliance_wait**: fixtures combined with the compliance wait helpers
//! - **terraform_backend**: the Terraform backend driving a scripted binary

pub mod compliance_wait;
pub mod lifecycle;
pub mod terraform_backend;

use potemkin::{ComplianceType, EvaluationRecord};

pub const RULE: &str = "eip-attached";

pub fn record(resource_id: &str, compliance_type: ComplianceType) -> EvaluationRecord {
    EvaluationRecord::new(resource_id, compliance_type, RULE)
}
