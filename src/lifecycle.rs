//! Provision, test, tear down.
//!
//! A [`Fixture`] brings up a stack through a [`ProvisioningBackend`], hands a
//! [`StackContext`] to the test body and destroys the stack afterwards, no
//! matter whether the body returned an error or panicked.

use futures::FutureExt;
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;

use crate::config::PotemkinConfig;
use crate::error::{PotemkinError, Result};
use crate::provision::{
    Backend, CloudFormationBackend, ProvisionRequest, ProvisioningBackend, StackHandle,
    TerraformBackend,
};

#[derive(Debug, Clone, PartialEq)]
pub struct FixtureOptions {
    /// CloudFormation template file or Terraform root directory, relative to
    /// the working directory
    pub template_ref: PathBuf,
    pub stack_name_stem: Option<String>,
    pub parameters: BTreeMap<String, String>,
    pub aws_profile: Option<String>,
    pub teardown: bool,
    /// Only consulted when the test failed; `false` keeps the resources for
    /// inspection
    pub teardown_on_failure: bool,
}

impl FixtureOptions {
    pub fn new(template_ref: impl Into<PathBuf>) -> Self {
        Self {
            template_ref: template_ref.into(),
            stack_name_stem: None,
            parameters: BTreeMap::new(),
            aws_profile: None,
            teardown: true,
            teardown_on_failure: true,
        }
    }

    pub fn stack_name_stem(mut self, stem: &str) -> Self {
        self.stack_name_stem = Some(stem.to_string());
        self
    }

    pub fn parameter(mut self, key: &str, value: &str) -> Self {
        self.parameters.insert(key.to_string(), value.to_string());
        self
    }

    pub fn aws_profile(mut self, profile: &str) -> Self {
        self.aws_profile = Some(profile.to_string());
        self
    }

    pub fn teardown(mut self, teardown: bool) -> Self {
        self.teardown = teardown;
        self
    }

    pub fn teardown_on_failure(mut self, teardown_on_failure: bool) -> Self {
        self.teardown_on_failure = teardown_on_failure;
        self
    }

    fn request(&self) -> ProvisionRequest {
        ProvisionRequest {
            template_ref: self.template_ref.clone(),
            name_stem: self.stack_name_stem.clone(),
            parameters: self.parameters.clone(),
            profile: self.aws_profile.clone(),
        }
    }

    fn should_tear_down(&self, passed: bool) -> bool {
        self.teardown && (passed || self.teardown_on_failure)
    }
}

/// Where a fixture run currently is.
///
/// A failing run passes through `Failed` on its way to `TearingDown` and
/// ends in `Done` once the destroy succeeded. It stays in `Failed` only
/// when teardown was switched off or the destroy itself failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unprovisioned,
    Provisioning,
    Ready,
    RunningTest,
    TearingDown,
    Done,
    Failed,
}

impl LifecycleState {
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Unprovisioned, Provisioning)
                | (Provisioning, Ready)
                | (Provisioning, Failed)
                | (Ready, RunningTest)
                | (RunningTest, TearingDown)
                | (RunningTest, Done)
                | (RunningTest, Failed)
                | (TearingDown, Done)
                | (TearingDown, Failed)
                | (Failed, TearingDown)
        )
    }

    /// Terminal state of a run, given whether the test passed and how the
    /// destroy went (`None` when it was skipped)
    pub fn settled(passed: bool, teardown: Option<&Result<()>>) -> LifecycleState {
        match teardown {
            Some(Ok(())) => LifecycleState::Done,
            Some(Err(_)) => LifecycleState::Failed,
            None if passed => LifecycleState::Done,
            None => LifecycleState::Failed,
        }
    }
}

struct Transitions {
    label: String,
    state: LifecycleState,
}

impl Transitions {
    fn new(label: String) -> Self {
        Self {
            label,
            state: LifecycleState::Unprovisioned,
        }
    }

    fn advance(&mut self, next: LifecycleState) {
        if self.state == next {
            return;
        }
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {:?} -> {next:?}",
            self.state
        );
        log::debug!("Fixture {}: {:?} -> {next:?}", self.label, self.state);
        self.state = next;
    }
}

/// What the test body gets to see of the provisioned stack
#[derive(Debug, Clone, PartialEq)]
pub struct StackContext {
    pub stack_name: String,
    pub stack_id: String,
    pub outputs: BTreeMap<String, String>,
}

impl StackContext {
    pub fn output(&self, key: &str) -> Result<&str> {
        self.outputs
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| PotemkinError::MissingOutput(key.to_string()))
    }
}

impl From<&StackHandle> for StackContext {
    fn from(handle: &StackHandle) -> Self {
        Self {
            stack_name: handle.name.clone(),
            stack_id: handle.identifier.clone(),
            outputs: handle.outputs.clone(),
        }
    }
}

pub struct Fixture<B> {
    backend: B,
    options: FixtureOptions,
}

impl Fixture<CloudFormationBackend> {
    /// CloudFormation fixture with default settings and ambient credentials
    pub fn cloudformation(options: FixtureOptions) -> Self {
        let backend = CloudFormationBackend::from_config(&PotemkinConfig::default());
        Self::new(backend, options)
    }
}

impl Fixture<TerraformBackend> {
    /// Terraform fixture using the `terraform` binary on `PATH`
    pub fn terraform(options: FixtureOptions) -> Self {
        let backend = TerraformBackend::from_config(&PotemkinConfig::default());
        Self::new(backend, options)
    }
}

impl Fixture<Backend> {
    /// Backend, profile and teardown come from `config`; the profile in
    /// `options` wins when both are set
    pub fn from_config(config: &PotemkinConfig, mut options: FixtureOptions) -> Self {
        if options.aws_profile.is_none() {
            options.aws_profile = config.aws_profile.clone();
        }
        options.teardown &= config.teardown;
        Self::new(Backend::from_config(config), options)
    }
}

impl<B: ProvisioningBackend> Fixture<B> {
    pub fn new(backend: B, options: FixtureOptions) -> Self {
        Self { backend, options }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn options(&self) -> &FixtureOptions {
        &self.options
    }

    /// Provision, run `test` against the stack, then tear it down.
    ///
    /// A failing test is reported as [`PotemkinError::TestFailed`] with any
    /// teardown error attached; a panicking test is resumed after teardown.
    /// A teardown failure after a passing test is reported as
    /// [`PotemkinError::Teardown`].
    pub async fn run<F, Fut, T>(&self, test: F) -> Result<T>
    where
        F: FnOnce(StackContext) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let mut transitions = Transitions::new(self.options.template_ref.display().to_string());
        let profile = self.options.aws_profile.as_deref();

        transitions.advance(LifecycleState::Provisioning);
        log::info!(
            "Provisioning {} with {}",
            self.options.template_ref.display(),
            self.backend.kind()
        );
        let handle = match self.backend.provision(&self.options.request()).await {
            Ok(handle) => handle,
            Err(e) => {
                transitions.advance(LifecycleState::Failed);
                self.clean_up_partial(&e, &mut transitions).await;
                return Err(e);
            }
        };

        transitions.label = handle.name.clone();
        transitions.advance(LifecycleState::Ready);
        log::info!("Stack {} ready", handle.name);

        let context = StackContext::from(&handle);
        transitions.advance(LifecycleState::RunningTest);
        let outcome = AssertUnwindSafe(async move { test(context).await })
            .catch_unwind()
            .await;

        let passed = matches!(outcome, Ok(Ok(_)));
        if !passed {
            transitions.advance(LifecycleState::Failed);
        }

        let teardown = if self.options.should_tear_down(passed) {
            transitions.advance(LifecycleState::TearingDown);
            let destroyed = self.backend.destroy(&handle, profile).await;
            match &destroyed {
                Ok(()) => log::info!("Stack {} torn down", handle.name),
                Err(e) => log::error!("Teardown of {} failed: {e}", handle.name),
            }
            Some(destroyed)
        } else {
            log::warn!("Leaving stack {} in place", handle.name);
            None
        };

        transitions.advance(LifecycleState::settled(passed, teardown.as_ref()));
        let teardown_error = teardown.and_then(Result::err);

        match outcome {
            Ok(Ok(value)) => match teardown_error {
                None => Ok(value),
                Some(error) => Err(PotemkinError::Teardown {
                    stack: handle.name,
                    error: Box::new(error),
                }),
            },
            Ok(Err(error)) => {
                log::error!("Test against stack {} failed: {error:#}", handle.name);
                Err(PotemkinError::TestFailed {
                    error,
                    teardown: teardown_error.map(Box::new),
                })
            }
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// One best-effort destroy of whatever a failed provision left behind
    async fn clean_up_partial(&self, error: &PotemkinError, transitions: &mut Transitions) {
        let PotemkinError::Provisioning {
            partial: Some(partial),
            ..
        } = error
        else {
            return;
        };

        if !self.options.should_tear_down(false) {
            log::warn!("Leaving partially created stack {} in place", partial.name);
            return;
        }

        transitions.advance(LifecycleState::TearingDown);
        log::warn!("Destroying partially created stack {}", partial.name);
        let destroyed = self
            .backend
            .destroy(partial, self.options.aws_profile.as_deref())
            .await;
        if let Err(e) = &destroyed {
            log::error!("Cleanup of partial stack {} failed: {e}", partial.name);
        }
        transitions.advance(LifecycleState::settled(false, Some(&destroyed)));
    }
}
