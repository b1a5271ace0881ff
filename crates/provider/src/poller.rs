//! Async task poller
//!
//! Long-running control plane operations answer with an audit id. The
//! poller re-reads the task status at a fixed interval until it reports
//! completion, bounded by a deadline and the handle's cancellation token.

use std::time::Duration;
use tracing::{debug, info, warn};

use driftless_common::{Error, Result, TaskStatus};

use crate::client::{Api, Params};

const TASK_STATUS_PATH: &str = "/cloudapi/tasks/get";

/// Polls one task to its terminal state
pub struct TaskPoller<'a> {
    api: &'a Api,
    interval: Duration,
    deadline: Duration,
}

impl<'a> TaskPoller<'a> {
    pub fn new(api: &'a Api) -> Self {
        let polling = api.polling();
        Self {
            api,
            interval: polling.interval(),
            deadline: polling.deadline(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Wait for the task and return its completed status.
    ///
    /// A completed task with a non-empty error is [`Error::AsyncTask`].
    pub async fn wait(&self, audit_id: &str) -> Result<TaskStatus> {
        match tokio::time::timeout(self.deadline, self.poll_until_complete(audit_id)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("Task {} still running after {:?}", audit_id, self.deadline);
                Err(Error::Timeout {
                    operation: format!("task {}", audit_id),
                    seconds: self.deadline.as_secs(),
                })
            }
        }
    }

    /// Wait for a task whose result is the id of a new object.
    pub async fn wait_for_id(&self, audit_id: &str) -> Result<u64> {
        let status = self.wait(audit_id).await?;
        status.result_id().ok_or_else(|| Error::AsyncTask {
            audit_id: audit_id.to_string(),
            message: format!("task completed without an id result: {}", status.result),
        })
    }

    async fn poll_until_complete(&self, audit_id: &str) -> Result<TaskStatus> {
        let mut polls = 0u32;
        loop {
            let status: TaskStatus = self
                .api
                .get(TASK_STATUS_PATH, Params::new().with("auditId", audit_id))
                .await?;
            polls += 1;
            debug!(
                "Task {} poll #{}: stage={} completed={}",
                audit_id, polls, status.stage, status.completed
            );

            if status.completed {
                if !status.error.is_empty() {
                    return Err(Error::AsyncTask {
                        audit_id: audit_id.to_string(),
                        message: status.error,
                    });
                }
                info!("Task {} completed after {} polls", audit_id, polls);
                return Ok(status);
            }

            tokio::select! {
                _ = self.api.cancellation().cancelled() => {
                    return Err(Error::Cancelled {
                        operation: format!("task {}", audit_id),
                    });
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeApi, Reply};
    use serde_json::json;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn pending() -> Reply {
        Reply::json(json!({"stage": "running", "completed": false, "error": "", "result": 0}))
    }

    fn done(error: &str, result: u64) -> Reply {
        Reply::json(json!({"stage": "done", "completed": true, "error": error, "result": result}))
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_four_polls() {
        let fake = Arc::new(FakeApi::new());
        fake.sequence(
            TASK_STATUS_PATH,
            vec![pending(), pending(), pending(), done("", 42)],
        );
        let api = fake.api();

        let status = api.poller().wait("audit-1").await.unwrap();

        assert_eq!(status.result_id(), Some(42));
        assert_eq!(fake.count(TASK_STATUS_PATH), 4);
        assert_eq!(
            fake.calls_to(TASK_STATUS_PATH)[0].get("auditId"),
            Some("audit-1")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_error_after_two_polls() {
        let fake = Arc::new(FakeApi::new());
        fake.sequence(TASK_STATUS_PATH, vec![pending(), done("boom", 0)]);
        let api = fake.api();

        let err = api.poller().wait("audit-2").await.unwrap_err();

        assert!(matches!(err, Error::AsyncTask { ref message, .. } if message == "boom"));
        assert!(err.is_remote());
        assert_eq!(fake.count(TASK_STATUS_PATH), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_bounds_a_stuck_task() {
        let fake = Arc::new(FakeApi::new());
        fake.sequence(TASK_STATUS_PATH, vec![pending()]);
        let api = fake.api();

        let err = api
            .poller()
            .with_interval(Duration::from_secs(10))
            .with_deadline(Duration::from_secs(35))
            .wait("audit-3")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Timeout { seconds: 35, .. }));
        // polls at t = 0, 10, 20, 30
        assert_eq!(fake.count(TASK_STATUS_PATH), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_polling() {
        let fake = Arc::new(FakeApi::new());
        fake.sequence(TASK_STATUS_PATH, vec![pending()]);
        let token = CancellationToken::new();
        let api = fake.api().with_cancellation(token.clone());

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(15)).await;
            token.cancel();
        });

        let err = api.poller().wait("audit-4").await.unwrap_err();

        assert!(matches!(err, Error::Cancelled { .. }));
        assert_eq!(fake.count(TASK_STATUS_PATH), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_id_result() {
        let fake = Arc::new(FakeApi::new());
        fake.sequence(
            TASK_STATUS_PATH,
            vec![Reply::json(
                json!({"stage": "done", "completed": true, "error": "", "result": null}),
            )],
        );
        let api = fake.api();

        let err = api.poller().wait_for_id("audit-5").await.unwrap_err();
        assert!(matches!(err, Error::AsyncTask { .. }));
    }
}
