//! Terraform backend driving a scripted stand-in for the `terraform` binary.

#![cfg(unix)]

use potemkin::provision::{ProvisionRequest, TerraformBackend};
use potemkin::{Fixture, FixtureOptions, PotemkinError, ProvisioningBackend};
use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use tempfile::TempDir;

const OUTPUT_JSON: &str = r#"{"bucket_name":{"sensitive":false,"type":"string","value":"potemkin-bucket"},"bucket_count":{"sensitive":false,"type":"number","value":2}}"#;

/// A `terraform` shell script that logs every invocation as
/// `<args>|<AWS_PROFILE>|<cwd>` and optionally fails one subcommand
struct FakeTerraform {
    _dir: TempDir,
    binary: PathBuf,
    log: PathBuf,
    root: PathBuf,
}

impl FakeTerraform {
    fn new() -> Self {
        Self::build(None)
    }

    fn failing(subcommand: &str) -> Self {
        Self::build(Some(subcommand))
    }

    fn build(fail_on: Option<&str>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("terraform");
        let log = dir.path().join("invocations.log");
        let root = dir.path().join("s3_bucket");
        std::fs::create_dir(&root).unwrap();

        let failure = fail_on
            .map(|sub| format!("if [ \"$1\" = \"{sub}\" ]; then echo \"{sub} exploded\" >&2; exit 1; fi\n"))
            .unwrap_or_default();
        let script = format!(
            "#!/bin/sh\n\
             echo \"$*|${{AWS_PROFILE:-}}|$(pwd)\" >> '{log}'\n\
             {failure}\
             if [ \"$1\" = \"output\" ]; then echo '{OUTPUT_JSON}'; fi\n\
             exit 0\n",
            log = log.display(),
        );
        std::fs::write(&binary, script).unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();

        Self {
            _dir: dir,
            binary,
            log,
            root,
        }
    }

    fn backend(&self) -> TerraformBackend {
        TerraformBackend::new(&self.binary)
    }

    fn invocations(&self) -> Vec<(String, String, String)> {
        std::fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .map(|line| {
                let mut parts = line.splitn(3, '|');
                let mut next = || parts.next().unwrap_or_default().to_string();
                (next(), next(), next())
            })
            .collect()
    }

    fn commands(&self) -> Vec<String> {
        self.invocations().into_iter().map(|(args, _, _)| args).collect()
    }

    fn request(&self) -> ProvisionRequest {
        ProvisionRequest {
            template_ref: self.root.clone(),
            name_stem: None,
            parameters: BTreeMap::from([("bucket_name".to_string(), "potemkin-bucket".to_string())]),
            profile: Some("sandbox".to_string()),
        }
    }
}

#[tokio::test]
async fn test_provision_runs_init_apply_and_output() {
    let fake = FakeTerraform::new();

    let handle = fake.backend().provision(&fake.request()).await.unwrap();

    assert_eq!(
        fake.commands(),
        vec![
            "init -input=false",
            "apply -auto-approve -input=false -var bucket_name=potemkin-bucket",
            "output -json",
        ]
    );
    assert_eq!(handle.identifier, fake.root.display().to_string());
    assert_eq!(handle.name, "s3_bucket");
    assert_eq!(handle.outputs["bucket_name"], "potemkin-bucket");
    assert_eq!(handle.outputs["bucket_count"], "2");

    for (_, profile, cwd) in fake.invocations() {
        assert_eq!(profile, "sandbox");
        assert!(cwd.ends_with("s3_bucket"), "ran in {cwd}");
    }
}

#[tokio::test]
async fn test_destroy_passes_the_same_variables() {
    let fake = FakeTerraform::new();
    let backend = fake.backend();
    let handle = backend.provision(&fake.request()).await.unwrap();

    backend.destroy(&handle, None).await.unwrap();

    let invocations = fake.invocations();
    let (args, profile, _) = invocations.last().unwrap();
    assert_eq!(
        args,
        "destroy -auto-approve -input=false -var bucket_name=potemkin-bucket"
    );
    assert_eq!(profile, "");
}

#[tokio::test]
async fn test_failed_init_has_nothing_to_clean_up() {
    let fake = FakeTerraform::failing("init");

    match fake.backend().provision(&fake.request()).await {
        Err(PotemkinError::Provisioning {
            message, partial, ..
        }) => {
            assert!(message.contains("init exploded"));
            assert!(partial.is_none());
        }
        other => panic!("expected provisioning error, got {other:?}"),
    }
    assert_eq!(fake.commands(), vec!["init -input=false"]);
}

#[tokio::test]
async fn test_failed_apply_is_destroyed_by_the_fixture() {
    let fake = FakeTerraform::failing("apply");
    let fixture = Fixture::new(
        fake.backend(),
        FixtureOptions::new(&fake.root).parameter("bucket_name", "potemkin-bucket"),
    );

    let result = fixture.run(|_| async { Ok(()) }).await;

    match result {
        Err(PotemkinError::Provisioning {
            partial: Some(partial),
            ..
        }) => assert_eq!(partial.identifier, fake.root.display().to_string()),
        other => panic!("expected provisioning error with partial handle, got {other:?}"),
    }
    let commands = fake.commands();
    assert_eq!(commands.len(), 3);
    assert!(commands[2].starts_with("destroy -auto-approve"));
}

#[tokio::test]
async fn test_fixture_tears_down_terraform_root() {
    let fake = FakeTerraform::new();
    let fixture = Fixture::new(
        fake.backend(),
        FixtureOptions::new(&fake.root).stack_name_stem("tf-bucket-"),
    );

    let bucket = fixture
        .run(|stack| async move {
            assert!(stack.stack_name.starts_with("tf-bucket-"));
            Ok(stack.output("bucket_name")?.to_string())
        })
        .await
        .unwrap();

    assert_eq!(bucket, "potemkin-bucket");
    assert_eq!(
        fake.commands(),
        vec![
            "init -input=false",
            "apply -auto-approve -input=false",
            "output -json",
            "destroy -auto-approve -input=false",
        ]
    );
}
