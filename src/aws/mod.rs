//! AWS SNS/SQS adapters.
//!
//! `SqsQueueService` and `SnsTopicService` implement the collaborator ports on
//! top of the AWS SDK. Both share one SDK configuration built from `AwsConfig`.

mod sns;
mod sqs;

pub use sns::SnsTopicService;
pub use sqs::SqsQueueService;

use std::sync::Arc;

use aws_config::BehaviorVersion;
use aws_sdk_sqs::error::{DisplayErrorContext, SdkError};
use tracing::info;

use crate::config::AwsConfig;
use crate::interfaces::ServiceError;

/// Load the shared SDK configuration.
///
/// Region and endpoint come from `config` when set, otherwise from the SDK's
/// default provider chain.
pub async fn load_sdk_config(config: &AwsConfig) -> aws_config::SdkConfig {
    let mut builder = aws_config::defaults(BehaviorVersion::latest());

    if let Some(ref region) = config.region {
        builder = builder.region(aws_config::Region::new(region.clone()));
    }

    if let Some(ref endpoint) = config.endpoint_url {
        builder = builder.endpoint_url(endpoint);
    }

    builder.load().await
}

/// Connect queue and topic services for `config`.
pub async fn connect(
    config: &AwsConfig,
) -> Result<(Arc<SqsQueueService>, Arc<SnsTopicService>), ServiceError> {
    let sdk_config = load_sdk_config(config).await;
    let region = sdk_config
        .region()
        .map(|region| region.to_string())
        .ok_or_else(|| ServiceError::Rejected("no AWS region configured".to_string()))?;

    info!(
        region = %region,
        endpoint = ?config.endpoint_url,
        "Connected to AWS SNS/SQS"
    );

    let queues = SqsQueueService::new(aws_sdk_sqs::Client::new(&sdk_config), region);
    let topics = SnsTopicService::new(aws_sdk_sns::Client::new(&sdk_config));
    Ok((Arc::new(queues), Arc::new(topics)))
}

/// Map an SDK failure: service responses are rejections, everything else
/// (dispatch, timeout, response parsing) means the service was unreachable.
pub(crate) fn service_error<E, R>(action: &str, error: SdkError<E, R>) -> ServiceError
where
    E: std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    let message = format!("{action}: {}", DisplayErrorContext(&error));
    match error {
        SdkError::ServiceError(_) => ServiceError::Rejected(message),
        _ => ServiceError::Unavailable(message),
    }
}
