use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::judge::Judge;
use crate::queue::JobQueue;
use crate::routes::ExecMessage;

/// Pops execution requests and runs them on the blocking pool, one at a time
///
/// The number of workers bounds how many isolated environments the service
/// keeps alive across concurrent requests.
pub async fn worker(
    id: usize,
    judge: Arc<Judge>,
    queue: Arc<JobQueue>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    log::info!("Worker {id} initialized");

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                log::info!("Worker {id} received shutdown signal, stopping");
                break;
            }

            message = queue.pop() => {
                let ExecMessage { job, responder } = message;
                log::info!("Worker {id} got {} job in {}", job.kind(), job.language());

                // Give back control to the runtime until the sandbox is done
                let judge = Arc::clone(&judge);
                let result_handle = tokio::task::spawn_blocking(move || job.run(&judge));

                match result_handle.await {
                    Ok(response) => {
                        if responder.send(response).is_err() {
                            log::warn!("Worker {id} finished a job whose requester is gone");
                        } else {
                            log::debug!("Worker {id} sent a result back to the server");
                        }
                    }
                    Err(e) => {
                        log::error!("Job panicked on worker {id}: {e:?}");
                    }
                }
            }
        };
    }

    log::info!("Worker {id} has shut down gracefully");
    Ok(())
}
