//! Shared AWS SDK plumbing for the Config and CloudFormation clients.

use aws_config::{BehaviorVersion, Region, SdkConfig};
// the error types are the same smithy types for every service crate
use aws_sdk_config::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};

use crate::error::PotemkinError;

const THROTTLING_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "TooManyRequestsException",
    "RequestLimitExceeded",
];

/// Load SDK settings from the environment with optional overrides
pub async fn load_sdk_config(
    profile: Option<&str>,
    region: Option<&str>,
    endpoint_url: Option<&str>,
) -> SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(profile) = profile {
        loader = loader.profile_name(profile);
    }
    if let Some(region) = region {
        loader = loader.region(Region::new(region.to_string()));
    }
    if let Some(endpoint_url) = endpoint_url {
        loader = loader.endpoint_url(endpoint_url);
    }
    loader.load().await
}

/// Map an SDK failure onto the crate taxonomy: transport problems and
/// throttling are transient, everything else is a hard backend error
pub fn classify_sdk_error<E, R>(error: SdkError<E, R>, operation: &str) -> PotemkinError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match &error {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) | SdkError::ResponseError(_) => {
            PotemkinError::BackendUnavailable(format!(
                "{operation}: {}",
                DisplayErrorContext(&error)
            ))
        }
        SdkError::ServiceError(service) => {
            let code = service.err().code().unwrap_or("Unknown");
            let message = service.err().message().unwrap_or_default();
            if is_throttling(code) {
                PotemkinError::BackendUnavailable(format!("{operation}: {code}: {message}"))
            } else {
                PotemkinError::Backend(format!("{operation}: {code}: {message}"))
            }
        }
        _ => PotemkinError::Backend(format!("{operation}: {}", DisplayErrorContext(&error))),
    }
}

pub fn is_throttling(code: &str) -> bool {
    THROTTLING_CODES.contains(&code)
}
