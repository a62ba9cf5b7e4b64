//! Fixture lifecycle against the recording backend.

use potemkin::test_harness::RecordingBackend;
use potemkin::{stack_test, Fixture, FixtureOptions, PotemkinError};
use std::sync::atomic::{AtomicUsize, Ordering};

fn eip_fixture(backend: RecordingBackend) -> Fixture<RecordingBackend> {
    Fixture::new(
        backend,
        FixtureOptions::new("tests/templates/eip.yml").stack_name_stem("eip-test"),
    )
}

stack_test!(
    stack_test_hands_outputs_to_the_body,
    eip_fixture(RecordingBackend::new().with_output("AllocationId", "eipalloc-0abc")),
    |stack| {
        assert!(stack.stack_name.starts_with("eip-test"));
        assert_eq!(stack.output("AllocationId")?, "eipalloc-0abc");
        Ok(())
    }
);

#[tokio::test]
async fn test_each_run_provisions_a_fresh_stack() {
    potemkin::init_test_logging();
    let backend = RecordingBackend::new();
    let fixture = eip_fixture(backend.clone());

    fixture.run(|_| async { Ok(()) }).await.unwrap();
    fixture.run(|_| async { Ok(()) }).await.unwrap();

    let destroys = backend.destroy_calls();
    assert_eq!(backend.provision_calls().len(), 2);
    assert_eq!(destroys.len(), 2);
    assert!(destroys
        .iter()
        .all(|call| call.handle.name.starts_with("eip-test")));
}

#[tokio::test]
async fn test_parameters_reach_the_backend() {
    let backend = RecordingBackend::new();
    let fixture = Fixture::new(
        backend.clone(),
        FixtureOptions::new("tests/templates/aes256_bucket.yml")
            .parameter("BucketName", "potemkin-bucket-1")
            .aws_profile("sandbox"),
    );

    fixture.run(|_| async { Ok(()) }).await.unwrap();

    let request = &backend.provision_calls()[0];
    assert_eq!(request.parameters["BucketName"], "potemkin-bucket-1");
    assert_eq!(request.profile.as_deref(), Some("sandbox"));
    assert_eq!(
        backend.destroy_calls()[0].handle.parameters["BucketName"],
        "potemkin-bucket-1"
    );
}

#[tokio::test]
async fn test_missing_output_fails_the_test_and_tears_down() {
    let backend = RecordingBackend::new();
    let fixture = eip_fixture(backend.clone());

    let result = fixture
        .run(|stack| async move {
            stack.output("AllocationId")?;
            Ok(())
        })
        .await;

    match result {
        Err(PotemkinError::TestFailed { error, teardown }) => {
            assert!(error.to_string().contains("AllocationId"));
            assert!(teardown.is_none());
        }
        other => panic!("expected TestFailed, got {other:?}"),
    }
    assert_eq!(backend.destroy_count(), 1);
}

#[tokio::test]
async fn test_body_runs_exactly_once() {
    let backend = RecordingBackend::new();
    let fixture = eip_fixture(backend.clone());
    let runs = AtomicUsize::new(0);

    let _ = fixture
        .run(|_| async {
            runs.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(anyhow::anyhow!("non-compliant resource reported compliant"))
        })
        .await;

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(backend.destroy_count(), 1);
}

#[tokio::test]
async fn test_kept_stack_after_failure_is_not_destroyed() {
    let backend = RecordingBackend::new().failing_destroy();
    let fixture = Fixture::new(
        backend.clone(),
        FixtureOptions::new("tests/templates/eip.yml").teardown_on_failure(false),
    );

    let result = fixture
        .run(|_| async { Err::<(), _>(anyhow::anyhow!("inspect me")) })
        .await;

    assert!(matches!(
        result,
        Err(PotemkinError::TestFailed { teardown: None, .. })
    ));
    assert_eq!(backend.destroy_count(), 0);
}
