//! Fixtures combined with the compliance wait helpers, on paused tokio time.

use potemkin::test_harness::{RecordingBackend, ScriptedEvaluationClient};
use potemkin::ComplianceType::{Compliant, NonCompliant};
use potemkin::{
    evaluate_and_wait_for_resource, wait_for_absent_resources, wait_for_compliance_results,
    ExpectationSet, Fixture, FixtureOptions, PollPolicy, PotemkinError,
};
use std::time::Duration;
use tokio::time::Instant;

use super::{record, RULE};

fn expectations(pairs: &[(&str, potemkin::ComplianceType)]) -> ExpectationSet {
    pairs
        .iter()
        .map(|(id, kind)| (id.to_string(), *kind))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_stack_resource_is_evaluated_inside_fixture() {
    let backend = RecordingBackend::new().with_output("AllocationId", "eipalloc-1");
    let fixture = Fixture::new(
        backend.clone(),
        FixtureOptions::new("tests/templates/eip.yml").stack_name_stem("eip-test"),
    );
    let client = ScriptedEvaluationClient::new()
        .then_records(vec![])
        .then_unavailable()
        .then_records(vec![record("eipalloc-1", NonCompliant)]);
    let client = &client;

    let verdict = fixture
        .run(|stack| async move {
            let allocation = stack.output("AllocationId")?;
            let record = evaluate_and_wait_for_resource(
                client,
                allocation,
                RULE,
                &PollPolicy::default(),
            )
            .await?;
            Ok(record.compliance_type)
        })
        .await
        .unwrap();

    assert_eq!(verdict, NonCompliant);
    assert_eq!(client.trigger_calls(), 1);
    assert_eq!(client.list_calls(), 3);
    assert_eq!(backend.destroy_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_expectations_met_after_results_settle() {
    let client = ScriptedEvaluationClient::new()
        .then_records(vec![record("eip-1", Compliant)])
        .then_records(vec![record("eip-1", Compliant), record("eip-2", NonCompliant)])
        .then_records(vec![
            record("eip-1", Compliant),
            record("eip-2", NonCompliant),
            record("eip-1", NonCompliant),
        ]);
    let expected = expectations(&[("eip-1", NonCompliant), ("eip-2", NonCompliant)]);
    let start = Instant::now();

    let satisfied =
        wait_for_compliance_results(&client, RULE, &expected, &PollPolicy::default(), false)
            .await
            .unwrap();

    assert!(satisfied);
    assert_eq!(client.list_calls(), 3);
    assert_eq!(start.elapsed(), Duration::from_secs(40));
}

#[tokio::test(start_paused = true)]
async fn test_unmet_expectations_time_out_with_false() {
    let client = ScriptedEvaluationClient::new().then_records(vec![record("eip-1", Compliant)]);
    let expected = expectations(&[("eip-1", NonCompliant)]);
    let start = Instant::now();

    let satisfied =
        wait_for_compliance_results(&client, RULE, &expected, &PollPolicy::default(), true)
            .await
            .unwrap();

    assert!(!satisfied);
    // probes at 0, 20, ..., 1000 seconds
    assert_eq!(client.list_calls(), 51);
    assert_eq!(start.elapsed(), Duration::from_secs(1000));
}

#[tokio::test(start_paused = true)]
async fn test_unsupported_trigger_is_not_fatal() {
    let client = ScriptedEvaluationClient::new()
        .trigger_fails_with(|rule| PotemkinError::UnsupportedTrigger(rule.to_string()))
        .then_records(vec![record("eip-1", NonCompliant)]);
    let expected = expectations(&[("eip-1", NonCompliant)]);

    let satisfied =
        wait_for_compliance_results(&client, RULE, &expected, &PollPolicy::default(), true)
            .await
            .unwrap();

    assert!(satisfied);
    assert_eq!(client.trigger_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_resources_disappear_after_teardown() {
    let backend = RecordingBackend::new().with_output("AllocationId", "eipalloc-1");
    let fixture = Fixture::new(backend, FixtureOptions::new("tests/templates/eip.yml"));

    let allocation = fixture
        .run(|stack| async move { Ok(stack.output("AllocationId")?.to_string()) })
        .await
        .unwrap();

    let client = ScriptedEvaluationClient::new()
        .then_records(vec![record("eipalloc-1", NonCompliant)])
        .then_records(vec![record("eipalloc-9", Compliant)]);
    let policy = PollPolicy::new(Duration::from_secs(120), Duration::from_secs(10));

    let lingering = wait_for_absent_resources(&client, RULE, &[allocation], &policy)
        .await
        .unwrap();

    assert!(lingering.is_empty());
    assert_eq!(client.list_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_lingering_resources_are_reported() {
    let client = ScriptedEvaluationClient::new().then_records(vec![
        record("eip-1", NonCompliant),
        record("eip-2", Compliant),
    ]);
    let ids = vec!["eip-2".to_string(), "eip-3".to_string()];
    let policy = PollPolicy::new(Duration::from_secs(30), Duration::from_secs(10)).max_attempts(2);

    let lingering = wait_for_absent_resources(&client, RULE, &ids, &policy)
        .await
        .unwrap();

    assert_eq!(lingering, vec!["eip-2".to_string()]);
    assert_eq!(client.list_calls(), 2);
}
