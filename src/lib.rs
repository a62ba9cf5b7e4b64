pub mod aws;
pub mod config;
pub mod error;
pub mod evaluation;
pub mod lifecycle;
pub mod naming;
pub mod poll;
pub mod provision;
pub mod reconcile;
pub mod wait;

#[cfg(any(test, feature = "test-harness"))]
pub mod test_harness;

pub use config::{load_config, PotemkinConfig};
pub use error::{PotemkinError, Result};
pub use evaluation::{
    ComplianceType, ConfigServiceClient, EvaluationClient, EvaluationRecord, ExpectationSet,
};
pub use lifecycle::{Fixture, FixtureOptions, LifecycleState, StackContext};
pub use poll::{wait_until, Backoff, PollOutcome, PollPolicy, Probe};
pub use provision::{Backend, BackendKind, ProvisioningBackend, StackHandle};
pub use reconcile::{reconcile, Reconciliation};
pub use wait::{
    evaluate_and_wait_for_resource, wait_for_absent_resources, wait_for_compliance_results,
    wait_for_resource,
};

// Compliance polling defaults
pub const DEFAULT_POLL_TIMEOUT_SECS: u64 = 1000;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 20;

// CloudFormation defaults
pub const DEFAULT_STACK_NAME_STEM: &str = "potemkin-";
pub const DEFAULT_CFN_STACK_TIMEOUT_MINUTES: i32 = 5;
pub const DEFAULT_CFN_POLL_INTERVAL_SECS: u64 = 17;
pub const DEFAULT_CFN_POLL_MAX_ATTEMPTS: u32 = 15;

/// Route `log` output through the test harness capture. Safe to call from
/// every test.
pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Declare a `#[tokio::test]` that runs `$body` against the stack of
/// `$fixture` and fails on any provisioning, test or teardown error.
///
/// ```ignore
/// stack_test!(eip_is_flagged, Fixture::cloudformation(options), |stack| {
///     let allocation = stack.output("AllocationId")?;
///     Ok(())
/// });
/// ```
#[macro_export]
macro_rules! stack_test {
    ($test_name:ident, $fixture:expr, |$stack:ident| $body:expr) => {
        #[tokio::test]
        async fn $test_name() {
            $crate::init_test_logging();
            let fixture = $fixture;
            if let Err(e) = fixture.run(|$stack| async move { $body }).await {
                panic!("{} failed: {e}", stringify!($test_name));
            }
        }
    };
}
