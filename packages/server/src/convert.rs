use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use common::ConversionJob;
use mq::{Mq, MqError};

/// Hands a freshly uploaded native CAD file to the external converter.
///
/// Best-effort by contract: the upload has already committed as successful by
/// the time a job is dispatched, so failures are logged and dropped, never
/// surfaced to the uploader. Retry policy, if any, lives in the converter.
#[async_trait]
pub trait ConversionTrigger: Send + Sync {
    async fn request_conversion(&self, job: ConversionJob) -> Result<(), MqError>;
}

/// Publishes conversion jobs to the converter's queue.
pub struct QueueConversionTrigger {
    mq: Arc<Mq>,
    queue_name: String,
}

impl QueueConversionTrigger {
    pub fn new(mq: Arc<Mq>, queue_name: impl Into<String>) -> Self {
        Self {
            mq,
            queue_name: queue_name.into(),
        }
    }
}

#[async_trait]
impl ConversionTrigger for QueueConversionTrigger {
    async fn request_conversion(&self, job: ConversionJob) -> Result<(), MqError> {
        self.mq
            .publish(&self.queue_name, None, &job, None)
            .await
            .map_err(MqError::from)?;
        Ok(())
    }
}

/// Drops conversion jobs. Used when the MQ is disabled.
pub struct DisabledConversionTrigger;

#[async_trait]
impl ConversionTrigger for DisabledConversionTrigger {
    async fn request_conversion(&self, job: ConversionJob) -> Result<(), MqError> {
        debug!(cad_file = %job.cad_file, "conversion disabled, dropping job");
        Ok(())
    }
}

/// Dispatch a conversion job on a detached task. The upload response never
/// waits on (or learns about) the outcome.
pub fn spawn_conversion(trigger: Arc<dyn ConversionTrigger>, job: ConversionJob) {
    tokio::spawn(async move {
        let cad_file = job.cad_file.clone();
        if let Err(e) = trigger.request_conversion(job).await {
            error!(cad_file = %cad_file, error = %e, "CAD conversion could not be scheduled");
        }
    });
}
