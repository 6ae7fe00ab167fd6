use std::future::Future;
use std::sync::Arc;

use common::error::AppError;
use tracing::{debug, error};

use crate::pipeline::SourcePipeline;

/// Run work after the response is sent. The future must own everything it
/// needs (a fresh composition clone, never request-borrowed state); it is
/// not cancelled when the originating request ends or times out. There is
/// no retry here: idempotency is the callee's responsibility.
pub fn spawn_detached<F>(task_name: &str, future: F)
where
    F: Future<Output = Result<(), AppError>> + Send + 'static,
{
    let task_name = task_name.to_string();
    tokio::spawn(async move {
        match future.await {
            Ok(()) => debug!(task = %task_name, "background task completed"),
            Err(err) => error!(task = %task_name, error = %err, "background task failed"),
        }
    });
}

/// Dispatch processing for one uploaded source.
pub fn spawn_source_processing(pipeline: Arc<SourcePipeline>, source_id: String) {
    spawn_detached("process-source", async move {
        pipeline.process_source(&source_id).await
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn detached_task_runs_to_completion() {
        let (tx, rx) = oneshot::channel();

        spawn_detached("test-task", async move {
            let _ = tx.send(());
            Ok(())
        });

        tokio::time::timeout(Duration::from_secs(1), rx)
            .await
            .expect("task should run")
            .expect("sender kept alive");
    }

    #[tokio::test]
    async fn failures_are_swallowed_and_logged() {
        let (tx, rx) = oneshot::channel();

        spawn_detached("failing-task", async move {
            let _ = tx.send(());
            Err(AppError::InternalError("boom".into()))
        });

        // The dispatcher neither panics nor propagates the error.
        tokio::time::timeout(Duration::from_secs(1), rx)
            .await
            .expect("task should run")
            .expect("sender kept alive");
    }

    #[tokio::test]
    async fn caller_does_not_wait_for_the_task() {
        let (tx, rx) = oneshot::channel::<()>();

        spawn_detached("slow-task", async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = tx.send(());
            Ok(())
        });

        // Returns immediately; the work completes later on its own.
        assert!(
            tokio::time::timeout(Duration::from_millis(5), rx).await.is_err(),
            "task must still be running after dispatch"
        );
    }
}
