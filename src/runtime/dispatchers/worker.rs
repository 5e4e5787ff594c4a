//! Activity work items.

use crate::error::{FailureDetails, WorkflowError};
use crate::identity::TaskIdentifier;
use crate::protocol::{ActivityRequest, ActivityResponse};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::Instant;
use tracing::{debug, warn};

use super::super::{ActivityContext, Worker, panic_message};

pub(crate) const ACTIVITY_NOT_FOUND: &str = "ActivityNotFoundException";

impl Worker {
    /// Execute one activity and build its response.
    pub async fn process_activity(&self, request: ActivityRequest) -> ActivityResponse {
        let ActivityRequest {
            name,
            task_id,
            orchestration_instance_id,
            input,
        } = request;
        let instance_id = orchestration_instance_id.unwrap_or_default();
        let identifier = TaskIdentifier::new(name.as_str());

        let Some(handler) = self.registry.try_create_activity(&identifier, self.services.as_ref()) else {
            warn!(
                target: "replayflow::activity",
                instance_id = %instance_id,
                activity_name = %name,
                task_id,
                "activity not registered"
            );
            self.metrics.record_activity_not_found();
            return ActivityResponse::failed(
                instance_id,
                task_id,
                FailureDetails::new(ACTIVITY_NOT_FOUND, format!("Activity '{name}' not found"), ""),
            );
        };

        let ctx = ActivityContext::new(identifier, instance_id.clone(), task_id, self.serializer.clone());
        let started = Instant::now();
        let result = match AssertUnwindSafe(handler.invoke(ctx, input.unwrap_or_default()))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(payload) => Err(WorkflowError::application("Panic", panic_message(payload.as_ref()))),
        };
        let duration_ms = super::duration_ms(started.elapsed());

        match result {
            Ok(output) => {
                self.metrics.record_activity_success();
                debug!(
                    target: "replayflow::activity",
                    instance_id = %instance_id,
                    activity_name = %name,
                    task_id,
                    outcome = "success",
                    duration_ms,
                    "activity completed"
                );
                ActivityResponse::completed(instance_id, task_id, output)
            }
            Err(err) => {
                self.metrics.record_activity_app_error();
                warn!(
                    target: "replayflow::activity",
                    instance_id = %instance_id,
                    activity_name = %name,
                    task_id,
                    outcome = "app_error",
                    error_type = %err.error_type(),
                    error = %err,
                    duration_ms,
                    "activity failed"
                );
                ActivityResponse::failed(instance_id, task_id, err.to_failure_details())
            }
        }
    }
}
