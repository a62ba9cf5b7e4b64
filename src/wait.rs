//! Waiting on compliance results after provisioning.
//!
//! Evaluation times reported by the rule engine are not a reliable signal
//! that a freshly created resource has been inspected, so these helpers poll
//! until the resource itself shows up in (or disappears from) the results.
//! Make sure the rule and the resource are related: a resource the rule never
//! evaluates will simply poll until the policy times out.

use crate::error::{PotemkinError, Result};
use crate::evaluation::{EvaluationClient, EvaluationRecord, ExpectationSet};
use crate::poll::{wait_until, PollError, PollOutcome, PollPolicy, Probe};
use crate::reconcile::{reconcile, still_present, Reconciliation};

/// Poll until `rule_name` has reported on `resource_id` and return the most
/// recent record. Use this for change-triggered rules.
pub async fn wait_for_resource<C>(
    client: &C,
    resource_id: &str,
    rule_name: &str,
    policy: &PollPolicy,
) -> Result<EvaluationRecord>
where
    C: EvaluationClient + ?Sized,
{
    log::info!("Waiting for rule {rule_name} to evaluate {resource_id}");
    let outcome = wait_until(policy, || probe_resource(client, rule_name, resource_id)).await?;

    match outcome {
        PollOutcome::Done(record) => {
            log::info!(
                "Rule {rule_name} reported {} for {resource_id}",
                record.compliance_type
            );
            Ok(record)
        }
        PollOutcome::Absent => Err(PotemkinError::Backend(format!(
            "{resource_id} reported absent while waiting for an evaluation"
        ))),
    }
}

/// Like [`wait_for_resource`], but kicks off an on-demand evaluation first.
/// Use this for periodic rules.
pub async fn evaluate_and_wait_for_resource<C>(
    client: &C,
    resource_id: &str,
    rule_name: &str,
    policy: &PollPolicy,
) -> Result<EvaluationRecord>
where
    C: EvaluationClient + ?Sized,
{
    trigger_or_continue(client, rule_name).await?;
    wait_for_resource(client, resource_id, rule_name, policy).await
}

/// Poll until every expectation holds. Returns `false` when the policy runs
/// out first; the outstanding expectations are logged.
pub async fn wait_for_compliance_results<C>(
    client: &C,
    rule_name: &str,
    expected: &ExpectationSet,
    policy: &PollPolicy,
    evaluate: bool,
) -> Result<bool>
where
    C: EvaluationClient + ?Sized,
{
    if evaluate {
        trigger_or_continue(client, rule_name).await?;
    }

    log::info!(
        "Waiting for rule {rule_name} to report on {} resource(s)",
        expected.len()
    );
    let resource_ids: Vec<String> = expected.keys().cloned().collect();
    let result = wait_until(policy, || {
        probe_expectations(client, rule_name, expected, &resource_ids)
    })
    .await;

    match result {
        Ok(_) => {
            log::info!("All expectations for rule {rule_name} satisfied");
            Ok(true)
        }
        Err(PollError::Timeout {
            attempts,
            last_state,
            ..
        }) => {
            let last_state: Reconciliation = last_state.unwrap_or_default();
            log::warn!(
                "Rule {rule_name} still has {} outstanding expectation(s) after {attempts} attempts: mismatched={:?} missing={:?}",
                last_state.outstanding(),
                last_state.mismatched,
                last_state.missing
            );
            Ok(false)
        }
        Err(PollError::Probe(e)) => Err(e),
    }
}

/// Poll until none of `resource_ids` appears in the results of `rule_name`.
///
/// Returns the ids that were still reported when the policy ran out, or an
/// empty list once all are gone. Lagging cleanup is not treated as an error.
pub async fn wait_for_absent_resources<C>(
    client: &C,
    rule_name: &str,
    resource_ids: &[String],
    policy: &PollPolicy,
) -> Result<Vec<String>>
where
    C: EvaluationClient + ?Sized,
{
    let result = wait_until(policy, || probe_absence(client, rule_name, resource_ids)).await;

    match result {
        Ok(_) => {
            log::info!("Rule {rule_name} no longer reports any of {resource_ids:?}");
            Ok(Vec::new())
        }
        Err(PollError::Timeout {
            last_state: Some(present),
            ..
        }) => {
            log::warn!("Rule {rule_name} still reports {present:?}");
            Ok(present)
        }
        // every probe failed transiently, so nothing is known to be gone
        Err(PollError::Timeout {
            last_state: None, ..
        }) => Ok(resource_ids.to_vec()),
        Err(PollError::Probe(e)) => Err(e),
    }
}

async fn probe_resource<C>(
    client: &C,
    rule_name: &str,
    resource_id: &str,
) -> Result<Probe<EvaluationRecord, String>>
where
    C: EvaluationClient + ?Sized,
{
    let filter = [resource_id.to_string()];
    let records = client.list_evaluations(rule_name, Some(&filter[..])).await?;

    Ok(records
        .into_iter()
        .filter(|record| record.resource_id == resource_id)
        .next_back()
        .map_or_else(
            || Probe::NotDone(format!("{resource_id} not evaluated yet")),
            Probe::Done,
        ))
}

async fn probe_expectations<C>(
    client: &C,
    rule_name: &str,
    expected: &ExpectationSet,
    resource_ids: &[String],
) -> Result<Probe<(), Reconciliation>>
where
    C: EvaluationClient + ?Sized,
{
    let records = client.list_evaluations(rule_name, Some(resource_ids)).await?;
    let reconciliation = reconcile(expected, &records);

    if reconciliation.is_satisfied() {
        Ok(Probe::Done(()))
    } else {
        Ok(Probe::NotDone(reconciliation))
    }
}

async fn probe_absence<C>(
    client: &C,
    rule_name: &str,
    resource_ids: &[String],
) -> Result<Probe<(), Vec<String>>>
where
    C: EvaluationClient + ?Sized,
{
    let records = client.list_evaluations(rule_name, Some(resource_ids)).await?;
    let present = still_present(&records, resource_ids);

    if present.is_empty() {
        Ok(Probe::Absent)
    } else {
        Ok(Probe::NotDone(present))
    }
}

async fn trigger_or_continue<C>(client: &C, rule_name: &str) -> Result<()>
where
    C: EvaluationClient + ?Sized,
{
    match client.trigger_evaluation(rule_name).await {
        Ok(()) => Ok(()),
        Err(PotemkinError::UnsupportedTrigger(rule)) => {
            log::warn!("Rule {rule} cannot be evaluated on demand, polling anyway");
            Ok(())
        }
        Err(e) if e.is_transient() => {
            log::warn!("Could not trigger evaluation of {rule_name}, polling anyway: {e}");
            Ok(())
        }
        Err(e) => Err(e),
    }
}
