//! In-memory stand-ins for the cloud services, for tests that exercise the
//! fixture lifecycle and the compliance wait helpers without AWS.

use futures::future::BoxFuture;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{PotemkinError, Result};
use crate::evaluation::{EvaluationClient, EvaluationRecord};
use crate::naming::unique_stack_name;
use crate::provision::{ProvisionRequest, ProvisioningBackend, StackHandle};
use crate::DEFAULT_STACK_NAME_STEM;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // a panicking test must not poison the recordings of the next assertion
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProvisionFailure {
    /// Nothing was created
    BeforeCreate,
    /// Resources exist; the error carries a partial handle
    AfterCreate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DestroyCall {
    pub handle: StackHandle,
    pub profile: Option<String>,
}

#[derive(Debug, Default)]
struct Recorded {
    provisions: Vec<ProvisionRequest>,
    destroys: Vec<DestroyCall>,
}

/// Backend that hands out fake stacks and records every call. Clones share
/// their recordings, so keep one clone for assertions.
#[derive(Debug, Clone, Default)]
pub struct RecordingBackend {
    recorded: Arc<Mutex<Recorded>>,
    outputs: BTreeMap<String, String>,
    provision_failure: Option<ProvisionFailure>,
    fail_destroy: bool,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, key: &str, value: &str) -> Self {
        self.outputs.insert(key.to_string(), value.to_string());
        self
    }

    /// Provisioning fails before anything exists
    pub fn failing_provision(mut self) -> Self {
        self.provision_failure = Some(ProvisionFailure::BeforeCreate);
        self
    }

    /// Provisioning fails after resources were created
    pub fn failing_after_create(mut self) -> Self {
        self.provision_failure = Some(ProvisionFailure::AfterCreate);
        self
    }

    pub fn failing_destroy(mut self) -> Self {
        self.fail_destroy = true;
        self
    }

    pub fn provision_calls(&self) -> Vec<ProvisionRequest> {
        lock(&self.recorded).provisions.clone()
    }

    pub fn destroy_calls(&self) -> Vec<DestroyCall> {
        lock(&self.recorded).destroys.clone()
    }

    pub fn destroy_count(&self) -> usize {
        lock(&self.recorded).destroys.len()
    }
}

impl ProvisioningBackend for RecordingBackend {
    fn kind(&self) -> &'static str {
        "recording"
    }

    fn provision<'a>(&'a self, request: &'a ProvisionRequest) -> BoxFuture<'a, Result<StackHandle>> {
        Box::pin(async move {
            lock(&self.recorded).provisions.push(request.clone());

            let name =
                unique_stack_name(request.name_stem.as_deref().unwrap_or(DEFAULT_STACK_NAME_STEM));
            let handle = StackHandle {
                identifier: format!("recorded/{name}"),
                name: name.clone(),
                template_ref: request.template_ref.clone(),
                parameters: request.parameters.clone(),
                outputs: self.outputs.clone(),
            };

            match self.provision_failure {
                None => Ok(handle),
                Some(ProvisionFailure::BeforeCreate) => {
                    Err(PotemkinError::provisioning(&name, "template rejected"))
                }
                Some(ProvisionFailure::AfterCreate) => {
                    Err(PotemkinError::provisioning(&name, "CREATE_FAILED").with_partial(handle))
                }
            }
        })
    }

    fn destroy<'a>(
        &'a self,
        handle: &'a StackHandle,
        profile: Option<&'a str>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            lock(&self.recorded).destroys.push(DestroyCall {
                handle: handle.clone(),
                profile: profile.map(str::to_string),
            });

            if self.fail_destroy {
                Err(PotemkinError::provisioning(&handle.name, "DELETE_FAILED"))
            } else {
                Ok(())
            }
        })
    }
}

enum Step {
    Records(Vec<EvaluationRecord>),
    Unavailable,
}

type TriggerFailure = Box<dyn Fn(&str) -> PotemkinError + Send + Sync>;

/// Evaluation client that replays a script of list responses. Once the
/// script runs out the last step repeats; an empty script lists nothing.
#[derive(Default)]
pub struct ScriptedEvaluationClient {
    steps: Mutex<VecDeque<Step>>,
    last: Mutex<Option<Step>>,
    trigger_failure: Option<TriggerFailure>,
    list_calls: AtomicUsize,
    trigger_calls: AtomicUsize,
}

impl ScriptedEvaluationClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_records(self, records: Vec<EvaluationRecord>) -> Self {
        lock(&self.steps).push_back(Step::Records(records));
        self
    }

    /// One list call fails with a transient error
    pub fn then_unavailable(self) -> Self {
        lock(&self.steps).push_back(Step::Unavailable);
        self
    }

    pub fn trigger_fails_with<F>(mut self, failure: F) -> Self
    where
        F: Fn(&str) -> PotemkinError + Send + Sync + 'static,
    {
        self.trigger_failure = Some(Box::new(failure));
        self
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn trigger_calls(&self) -> usize {
        self.trigger_calls.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Result<Vec<EvaluationRecord>> {
        let mut last = lock(&self.last);
        if let Some(step) = lock(&self.steps).pop_front() {
            *last = Some(step);
        }

        match &*last {
            None => Ok(Vec::new()),
            Some(Step::Records(records)) => Ok(records.clone()),
            Some(Step::Unavailable) => Err(PotemkinError::BackendUnavailable(
                "scripted outage".to_string(),
            )),
        }
    }
}

impl EvaluationClient for ScriptedEvaluationClient {
    fn list_evaluations<'a>(
        &'a self,
        _rule_name: &'a str,
        resource_ids: Option<&'a [String]>,
    ) -> BoxFuture<'a, Result<Vec<EvaluationRecord>>> {
        Box::pin(async move {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            let records = self.next_step()?;
            Ok(records
                .into_iter()
                .filter(|record| resource_ids.map_or(true, |ids| ids.contains(&record.resource_id)))
                .collect())
        })
    }

    fn trigger_evaluation<'a>(&'a self, rule_name: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.trigger_calls.fetch_add(1, Ordering::SeqCst);
            match &self.trigger_failure {
                Some(failure) => Err(failure(rule_name)),
                None => Ok(()),
            }
        })
    }
}
