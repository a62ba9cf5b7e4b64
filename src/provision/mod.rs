pub mod cloudformation;
pub mod terraform;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::PotemkinConfig;
use crate::error::Result;

pub use cloudformation::CloudFormationBackend;
pub use terraform::TerraformBackend;

/// Everything a backend needs to bring up one set of resources
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionRequest {
    pub template_ref: PathBuf,
    pub name_stem: Option<String>,
    pub parameters: BTreeMap<String, String>,
    pub profile: Option<String>,
}

/// Resources created by one provision call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackHandle {
    /// Backend-specific id used for teardown (stack ARN, Terraform root)
    pub identifier: String,
    /// Human readable name handed to the test body
    pub name: String,
    pub template_ref: PathBuf,
    pub parameters: BTreeMap<String, String>,
    pub outputs: BTreeMap<String, String>,
}

/// Creates and destroys infrastructure from a template
pub trait ProvisioningBackend: Send + Sync {
    /// Short name used in log lines
    fn kind(&self) -> &'static str;

    fn provision<'a>(&'a self, request: &'a ProvisionRequest) -> BoxFuture<'a, Result<StackHandle>>;

    fn destroy<'a>(
        &'a self,
        handle: &'a StackHandle,
        profile: Option<&'a str>,
    ) -> BoxFuture<'a, Result<()>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Cloudformation,
    Terraform,
}

impl std::str::FromStr for BackendKind {
    type Err = crate::error::PotemkinError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cloudformation" | "cfn" => Ok(BackendKind::Cloudformation),
            "terraform" | "tf" => Ok(BackendKind::Terraform),
            other => Err(crate::error::PotemkinError::InvalidConfig(format!(
                "unknown backend: {other}"
            ))),
        }
    }
}

/// Backend chosen from configuration
#[derive(Debug, Clone)]
pub enum Backend {
    CloudFormation(CloudFormationBackend),
    Terraform(TerraformBackend),
}

impl Backend {
    pub fn from_config(config: &PotemkinConfig) -> Self {
        match config.backend {
            BackendKind::Cloudformation => {
                Backend::CloudFormation(CloudFormationBackend::from_config(config))
            }
            BackendKind::Terraform => Backend::Terraform(TerraformBackend::from_config(config)),
        }
    }

    fn inner(&self) -> &dyn ProvisioningBackend {
        match self {
            Backend::CloudFormation(backend) => backend,
            Backend::Terraform(backend) => backend,
        }
    }
}

impl ProvisioningBackend for Backend {
    fn kind(&self) -> &'static str {
        self.inner().kind()
    }

    fn provision<'a>(&'a self, request: &'a ProvisionRequest) -> BoxFuture<'a, Result<StackHandle>> {
        self.inner().provision(request)
    }

    fn destroy<'a>(
        &'a self,
        handle: &'a StackHandle,
        profile: Option<&'a str>,
    ) -> BoxFuture<'a, Result<()>> {
        self.inner().destroy(handle, profile)
    }
}

/// Template paths are relative to the working directory of the test run
pub fn resolve_template_path(template_ref: &Path) -> Result<PathBuf> {
    if template_ref.is_absolute() {
        return Ok(template_ref.to_path_buf());
    }
    Ok(std::env::current_dir()?.join(template_ref))
}
