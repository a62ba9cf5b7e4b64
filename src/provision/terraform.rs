//! Terraform root modules as test fixtures.
//!
//! Every step shells out to the `terraform` binary with the root directory as
//! its working directory. The process working directory is never changed.

use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use super::{resolve_template_path, ProvisionRequest, ProvisioningBackend, StackHandle};
use crate::config::PotemkinConfig;
use crate::error::{PotemkinError, Result};
use crate::naming::unique_stack_name;

#[derive(Debug, Clone)]
pub struct TerraformBackend {
    binary: PathBuf,
    profile: Option<String>,
}

impl TerraformBackend {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            profile: None,
        }
    }

    pub fn from_config(config: &PotemkinConfig) -> Self {
        Self {
            binary: PathBuf::from(&config.terraform.binary),
            profile: config.aws_profile.clone(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Run one terraform subcommand in `root` and return its stdout
    async fn terraform(
        &self,
        root: &Path,
        args: &[String],
        profile: Option<&str>,
    ) -> std::result::Result<String, String> {
        let mut command = Command::new(&self.binary);
        command.args(args).current_dir(root);
        if let Some(profile) = profile.or(self.profile.as_deref()) {
            command.env("AWS_PROFILE", profile);
        }

        let rendered = args.join(" ");
        log::debug!("Running terraform {rendered} in {}", root.display());

        let output = command
            .output()
            .await
            .map_err(|e| format!("cannot run {}: {e}", self.binary.display()))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            log::info!("terraform {rendered} succeeded");
            Ok(stdout)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(format!(
                "terraform {rendered} exited with {}\nstdout: {stdout}\nstderr: {stderr}",
                output.status
            ))
        }
    }

    async fn apply(&self, request: &ProvisionRequest) -> Result<StackHandle> {
        let root = resolve_template_path(&request.template_ref)?;
        let name = match &request.name_stem {
            Some(stem) => unique_stack_name(stem),
            None => root_name(&root),
        };
        let profile = request.profile.as_deref();

        self.terraform(&root, &args(&["init", "-input=false"]), profile)
            .await
            .map_err(|e| PotemkinError::provisioning(&name, e))?;

        // From here on the state may hold resources that need a destroy
        let mut handle = StackHandle {
            identifier: root.display().to_string(),
            name: name.clone(),
            template_ref: request.template_ref.clone(),
            parameters: request.parameters.clone(),
            outputs: BTreeMap::new(),
        };

        let mut apply_args = args(&["apply", "-auto-approve", "-input=false"]);
        apply_args.extend(var_args(&request.parameters));
        if let Err(e) = self.terraform(&root, &apply_args, profile).await {
            return Err(PotemkinError::provisioning(&name, e).with_partial(handle));
        }

        let outputs = match self.terraform(&root, &args(&["output", "-json"]), profile).await {
            Ok(stdout) => flatten_outputs(&stdout).map_err(|e| {
                PotemkinError::provisioning(&name, format!("unreadable terraform output: {e}"))
            }),
            Err(e) => Err(PotemkinError::provisioning(&name, e)),
        };
        match outputs {
            Ok(outputs) => {
                handle.outputs = outputs;
                Ok(handle)
            }
            Err(e) => Err(e.with_partial(handle)),
        }
    }

    async fn run_destroy(&self, handle: &StackHandle, profile: Option<&str>) -> Result<()> {
        let root = PathBuf::from(&handle.identifier);
        let mut destroy_args = args(&["destroy", "-auto-approve", "-input=false"]);
        destroy_args.extend(var_args(&handle.parameters));

        self.terraform(&root, &destroy_args, profile)
            .await
            .map(|_| ())
            .map_err(|e| PotemkinError::provisioning(&handle.name, e))
    }
}

impl ProvisioningBackend for TerraformBackend {
    fn kind(&self) -> &'static str {
        "terraform"
    }

    fn provision<'a>(&'a self, request: &'a ProvisionRequest) -> BoxFuture<'a, Result<StackHandle>> {
        Box::pin(self.apply(request))
    }

    fn destroy<'a>(
        &'a self,
        handle: &'a StackHandle,
        profile: Option<&'a str>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.run_destroy(handle, profile))
    }
}

fn args(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn root_name(root: &Path) -> String {
    root.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| root.display().to_string())
}

/// `-var key=value` pairs for apply and destroy
pub fn var_args(parameters: &BTreeMap<String, String>) -> Vec<String> {
    parameters
        .iter()
        .flat_map(|(key, value)| ["-var".to_string(), format!("{key}={value}")])
        .collect()
}

/// Flatten `terraform output -json` into `name -> value`. String values are
/// kept verbatim; anything else is rendered as JSON text.
pub fn flatten_outputs(raw: &str) -> Result<BTreeMap<String, String>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(BTreeMap::new());
    }

    let parsed: BTreeMap<String, Value> = serde_json::from_str(trimmed)?;
    Ok(parsed
        .into_iter()
        .map(|(name, output)| {
            let value = match output.get("value") {
                Some(Value::String(text)) => text.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            };
            (name, value)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_args() {
        let parameters = BTreeMap::from([
            ("region".to_string(), "us-east-1".to_string()),
            ("bucket_name".to_string(), "potemkin-test".to_string()),
        ]);

        assert_eq!(
            var_args(&parameters),
            vec![
                "-var",
                "bucket_name=potemkin-test",
                "-var",
                "region=us-east-1"
            ]
        );
        assert!(var_args(&BTreeMap::new()).is_empty());
    }

    #[test]
    fn test_flatten_outputs() {
        let raw = r#"{
            "bucket_name": {"sensitive": false, "type": "string", "value": "potemkin-test"},
            "instance_count": {"sensitive": false, "type": "number", "value": 3},
            "subnet_ids": {"sensitive": false, "type": ["list", "string"], "value": ["a", "b"]}
        }"#;

        let outputs = flatten_outputs(raw).unwrap();

        assert_eq!(outputs["bucket_name"], "potemkin-test");
        assert_eq!(outputs["instance_count"], "3");
        assert_eq!(outputs["subnet_ids"], r#"["a","b"]"#);
    }

    #[test]
    fn test_flatten_outputs_empty_and_invalid() {
        assert!(flatten_outputs("").unwrap().is_empty());
        assert!(flatten_outputs("{}\n").unwrap().is_empty());
        assert!(matches!(
            flatten_outputs("not json"),
            Err(PotemkinError::Serialization(_))
        ));
    }

    #[test]
    fn test_root_name_uses_directory() {
        assert_eq!(root_name(Path::new("/work/tf/s3_bucket")), "s3_bucket");
    }

    #[test]
    fn test_backend_from_config() {
        let mut config = PotemkinConfig::default();
        config.terraform.binary = "/opt/terraform".to_string();
        let backend = TerraformBackend::from_config(&config);
        assert_eq!(backend.binary(), Path::new("/opt/terraform"));
        assert_eq!(backend.kind(), "terraform");
    }

    #[tokio::test]
    async fn test_missing_binary_fails_provisioning() {
        let root = tempfile::tempdir().unwrap();
        let backend = TerraformBackend::new("/nonexistent/terraform");
        let request = ProvisionRequest {
            template_ref: root.path().to_path_buf(),
            name_stem: None,
            parameters: BTreeMap::new(),
            profile: None,
        };

        match backend.provision(&request).await {
            Err(PotemkinError::Provisioning { message, partial, .. }) => {
                assert!(message.contains("cannot run"));
                assert!(partial.is_none());
            }
            other => panic!("expected provisioning error, got {other:?}"),
        }
    }
}
