//! CloudFormation stacks as test fixtures.
//!
//! A stack is created from a template file with a time-stamped name, waited
//! on through [`wait_until`] until `CREATE_COMPLETE`, and deleted again once
//! the test is over.

use aws_config::SdkConfig;
use aws_sdk_cloudformation::error::ProvideErrorMetadata;
use aws_sdk_cloudformation::types::{Capability, OnFailure, Output, Parameter, Stack};
use aws_sdk_cloudformation::Client;
use futures::future::BoxFuture;
use std::collections::BTreeMap;

use super::{resolve_template_path, ProvisionRequest, ProvisioningBackend, StackHandle};
use crate::aws::{classify_sdk_error, load_sdk_config};
use crate::config::{CloudFormationSettings, PotemkinConfig};
use crate::error::{PotemkinError, Result};
use crate::naming::unique_stack_name;
use crate::poll::{wait_until, PollError, Probe};
use crate::DEFAULT_STACK_NAME_STEM;

/// Where a stack is in the create or delete it is waiting on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackPhase {
    Create,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackProgress {
    InProgress,
    Complete,
    Failed,
}

/// Map a raw `StackStatus` onto the progress of `phase`
pub fn classify_status(phase: StackPhase, status: &str) -> StackProgress {
    match phase {
        StackPhase::Create => match status {
            "CREATE_COMPLETE" => StackProgress::Complete,
            "CREATE_IN_PROGRESS" | "REVIEW_IN_PROGRESS" => StackProgress::InProgress,
            _ => StackProgress::Failed,
        },
        StackPhase::Delete => match status {
            "DELETE_COMPLETE" => StackProgress::Complete,
            "DELETE_FAILED" => StackProgress::Failed,
            // DescribeStacks may lag behind the DeleteStack call
            _ => StackProgress::InProgress,
        },
    }
}

#[derive(Debug, Clone)]
pub struct CloudFormationBackend {
    settings: CloudFormationSettings,
    profile: Option<String>,
    region: Option<String>,
    endpoint_url: Option<String>,
    sdk_config: Option<SdkConfig>,
}

impl CloudFormationBackend {
    pub fn new(settings: CloudFormationSettings) -> Self {
        Self {
            settings,
            profile: None,
            region: None,
            endpoint_url: None,
            sdk_config: None,
        }
    }

    pub fn from_config(config: &PotemkinConfig) -> Self {
        Self {
            settings: config.cloudformation.clone(),
            profile: config.aws_profile.clone(),
            region: config.region.clone(),
            endpoint_url: config.endpoint_url.clone(),
            sdk_config: None,
        }
    }

    /// Use fixed SDK settings instead of loading them per call
    pub fn with_sdk_config(mut self, sdk_config: SdkConfig) -> Self {
        self.sdk_config = Some(sdk_config);
        self
    }

    async fn client(&self, profile: Option<&str>) -> Client {
        if let Some(sdk_config) = &self.sdk_config {
            return Client::new(sdk_config);
        }
        let sdk_config = load_sdk_config(
            profile.or(self.profile.as_deref()),
            self.region.as_deref(),
            self.endpoint_url.as_deref(),
        )
        .await;
        Client::new(&sdk_config)
    }

    async fn create(&self, request: &ProvisionRequest) -> Result<StackHandle> {
        let stack_name =
            unique_stack_name(request.name_stem.as_deref().unwrap_or(DEFAULT_STACK_NAME_STEM));
        let template_path = resolve_template_path(&request.template_ref)?;
        let template_body = tokio::fs::read_to_string(&template_path)
            .await
            .map_err(|e| {
                PotemkinError::provisioning(
                    &stack_name,
                    format!("cannot read template {}: {e}", template_path.display()),
                )
            })?;

        let client = self.client(request.profile.as_deref()).await;
        log::info!(
            "Creating stack {stack_name} from {}",
            request.template_ref.display()
        );

        let created = client
            .create_stack()
            .stack_name(&stack_name)
            .template_body(template_body)
            .set_parameters(Some(convert_parameters(&request.parameters)))
            .timeout_in_minutes(self.settings.stack_timeout_minutes)
            .capabilities(Capability::CapabilityNamedIam)
            .capabilities(Capability::CapabilityAutoExpand)
            .on_failure(OnFailure::DoNothing)
            .send()
            .await
            .map_err(|e| {
                let cause = classify_sdk_error(e, "CreateStack");
                PotemkinError::provisioning(&stack_name, cause.to_string())
            })?;

        let mut handle = StackHandle {
            identifier: created.stack_id().unwrap_or(&stack_name).to_string(),
            name: stack_name.clone(),
            template_ref: request.template_ref.clone(),
            parameters: request.parameters.clone(),
            outputs: BTreeMap::new(),
        };

        let policy = self.settings.poll_policy();
        let outcome = wait_until(&policy, || {
            probe_stack(&client, &handle.identifier, StackPhase::Create)
        })
        .await;

        match outcome {
            Ok(probe) => match probe.into_done() {
                Some(stack) => {
                    handle.outputs = stack_outputs(stack.outputs());
                    log::info!(
                        "Stack {stack_name} ready with {} output(s)",
                        handle.outputs.len()
                    );
                    Ok(handle)
                }
                None => Err(PotemkinError::provisioning(
                    &stack_name,
                    "stack disappeared while being created",
                )
                .with_partial(handle)),
            },
            Err(PollError::Probe(e @ PotemkinError::Provisioning { .. })) => {
                Err(e.with_partial(handle))
            }
            Err(e) => {
                Err(PotemkinError::provisioning(&stack_name, e.to_string()).with_partial(handle))
            }
        }
    }

    async fn delete(&self, handle: &StackHandle, profile: Option<&str>) -> Result<()> {
        let client = self.client(profile).await;
        log::info!("Deleting stack {}", handle.name);

        client
            .delete_stack()
            .stack_name(&handle.identifier)
            .send()
            .await
            .map_err(|e| {
                let cause = classify_sdk_error(e, "DeleteStack");
                PotemkinError::provisioning(&handle.name, cause.to_string())
            })?;

        let policy = self.settings.poll_policy();
        wait_until(&policy, || {
            probe_stack(&client, &handle.identifier, StackPhase::Delete)
        })
        .await
        .map_err(|e| match e {
            PollError::Probe(e @ PotemkinError::Provisioning { .. }) => e,
            other => PotemkinError::provisioning(&handle.name, other.to_string()),
        })?;

        log::info!("Stack {} deleted", handle.name);
        Ok(())
    }
}

impl ProvisioningBackend for CloudFormationBackend {
    fn kind(&self) -> &'static str {
        "cloudformation"
    }

    fn provision<'a>(&'a self, request: &'a ProvisionRequest) -> BoxFuture<'a, Result<StackHandle>> {
        Box::pin(self.create(request))
    }

    fn destroy<'a>(
        &'a self,
        handle: &'a StackHandle,
        profile: Option<&'a str>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.delete(handle, profile))
    }
}

async fn describe_stack(client: &Client, stack: &str) -> Result<Option<Stack>> {
    match client.describe_stacks().stack_name(stack).send().await {
        Ok(output) => Ok(output.stacks().first().cloned()),
        Err(e) => {
            let missing = e
                .as_service_error()
                .is_some_and(|err| is_missing_stack(err.code(), err.message()));
            if missing {
                Ok(None)
            } else {
                Err(classify_sdk_error(e, "DescribeStacks"))
            }
        }
    }
}

async fn probe_stack(
    client: &Client,
    stack: &str,
    phase: StackPhase,
) -> Result<Probe<Stack, String>> {
    let Some(described) = describe_stack(client, stack).await? else {
        return Ok(match phase {
            StackPhase::Create => Probe::NotDone("not visible yet".to_string()),
            StackPhase::Delete => Probe::Absent,
        });
    };

    let status = described
        .stack_status()
        .map(|status| status.as_str().to_string())
        .unwrap_or_default();

    match classify_status(phase, &status) {
        StackProgress::Complete => Ok(Probe::Done(described)),
        StackProgress::InProgress => Ok(Probe::NotDone(status)),
        StackProgress::Failed => {
            let reason = described.stack_status_reason().unwrap_or("no reason given");
            let name = described.stack_name().unwrap_or(stack);
            Err(PotemkinError::provisioning(name, format!("{status}: {reason}")))
        }
    }
}

/// DescribeStacks reports unknown stacks as a `ValidationError`
fn is_missing_stack(code: Option<&str>, message: Option<&str>) -> bool {
    code == Some("ValidationError") && message.is_some_and(|m| m.contains("does not exist"))
}

pub fn convert_parameters(parameters: &BTreeMap<String, String>) -> Vec<Parameter> {
    parameters
        .iter()
        .map(|(key, value)| {
            Parameter::builder()
                .parameter_key(key)
                .parameter_value(value)
                .build()
        })
        .collect()
}

/// Flatten stack outputs into `OutputKey -> OutputValue`
pub fn stack_outputs(outputs: &[Output]) -> BTreeMap<String, String> {
    outputs
        .iter()
        .filter_map(|output| {
            Some((
                output.output_key()?.to_string(),
                output.output_value().unwrap_or_default().to_string(),
            ))
        })
        .collect()
}
