use aws_config::SdkConfig;
use aws_sdk_config::types::{ComplianceType as AwsComplianceType, EvaluationResult};
use aws_sdk_config::Client;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

use super::{ComplianceType, EvaluationClient, EvaluationRecord};
use crate::aws::{classify_sdk_error, load_sdk_config};
use crate::error::{PotemkinError, Result};

/// [`EvaluationClient`] backed by the AWS Config service
#[derive(Debug, Clone)]
pub struct ConfigServiceClient {
    client: Client,
}

impl ConfigServiceClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn from_conf(sdk_config: &SdkConfig) -> Self {
        Self::new(Client::new(sdk_config))
    }

    /// Build a client from the environment, optionally pinned to a named
    /// profile and region
    pub async fn from_env(profile: Option<&str>, region: Option<&str>) -> Self {
        Self::from_conf(&load_sdk_config(profile, region, None).await)
    }

    pub async fn from_config(config: &crate::config::PotemkinConfig) -> Self {
        let sdk_config = load_sdk_config(
            config.aws_profile.as_deref(),
            config.region.as_deref(),
            config.endpoint_url.as_deref(),
        )
        .await;
        Self::from_conf(&sdk_config)
    }

    async fn all_rule_results(&self, rule_name: &str) -> Result<Vec<EvaluationResult>> {
        let mut results = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            // INSUFFICIENT_DATA is not accepted as a filter value
            let page = self
                .client
                .get_compliance_details_by_config_rule()
                .config_rule_name(rule_name)
                .compliance_types(AwsComplianceType::NonCompliant)
                .compliance_types(AwsComplianceType::Compliant)
                .compliance_types(AwsComplianceType::NotApplicable)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| classify_sdk_error(e, "GetComplianceDetailsByConfigRule"))?;

            results.extend(page.evaluation_results().iter().cloned());

            match page.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        log::debug!("Rule {rule_name} returned {} evaluation result(s)", results.len());
        Ok(results)
    }

    async fn start_evaluation(&self, rule_name: &str) -> Result<()> {
        let outcome = self
            .client
            .start_config_rules_evaluation()
            .config_rule_names(rule_name)
            .send()
            .await;

        let error = match outcome {
            Ok(_) => {
                log::info!("Started on-demand evaluation of rule {rule_name}");
                return Ok(());
            }
            Err(e) => e,
        };

        if let Some(service_error) = error.as_service_error() {
            if service_error.is_limit_exceeded_exception() {
                log::warn!("Evaluation of {rule_name} throttled, waiting for results anyway");
                return Ok(());
            }
            if service_error.is_resource_in_use_exception() {
                log::info!("Evaluation of {rule_name} already running");
                return Ok(());
            }
            if service_error.is_invalid_parameter_value_exception() {
                return Err(PotemkinError::UnsupportedTrigger(rule_name.to_string()));
            }
        }

        Err(classify_sdk_error(error, "StartConfigRulesEvaluation"))
    }
}

impl EvaluationClient for ConfigServiceClient {
    fn list_evaluations<'a>(
        &'a self,
        rule_name: &'a str,
        resource_ids: Option<&'a [String]>,
    ) -> BoxFuture<'a, Result<Vec<EvaluationRecord>>> {
        Box::pin(async move {
            let results = self.all_rule_results(rule_name).await?;
            let mut records: Vec<EvaluationRecord> = results
                .iter()
                .filter_map(|result| to_record(result, rule_name))
                .filter(|record| {
                    resource_ids.map_or(true, |ids| ids.contains(&record.resource_id))
                })
                .collect();

            records.sort_by_key(|record| record.recorded_at);
            Ok(records)
        })
    }

    fn trigger_evaluation<'a>(&'a self, rule_name: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.start_evaluation(rule_name))
    }
}

fn to_record(result: &EvaluationResult, rule_name: &str) -> Option<EvaluationRecord> {
    let qualifier = result
        .evaluation_result_identifier()
        .and_then(|identifier| identifier.evaluation_result_qualifier())?;
    let resource_id = qualifier.resource_id()?;

    let compliance_type = match result
        .compliance_type()
        .map(|kind| kind.as_str().parse::<ComplianceType>())
    {
        Some(Ok(kind)) => kind,
        Some(Err(e)) => {
            log::warn!("Skipping evaluation of {resource_id}: {e}");
            return None;
        }
        None => ComplianceType::InsufficientData,
    };

    let recorded_at = result
        .result_recorded_time()
        .and_then(|time| DateTime::<Utc>::from_timestamp(time.secs(), time.subsec_nanos()));

    Some(EvaluationRecord {
        resource_id: resource_id.to_string(),
        compliance_type,
        rule_name: qualifier.config_rule_name().unwrap_or(rule_name).to_string(),
        recorded_at,
    })
}
