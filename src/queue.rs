use std::collections::VecDeque;

use tokio::sync::{Mutex, Notify};

use crate::routes::ExecMessage;

pub struct JobQueue {
    queue: Mutex<VecDeque<ExecMessage>>,
    notify: Notify,
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    pub async fn push(&self, message: ExecMessage) {
        self.queue.lock().await.push_back(message);
        self.notify.notify_one();
    }

    pub async fn pop(&self) -> ExecMessage {
        loop {
            if let Some(message) = self.queue.lock().await.pop_front() {
                return message;
            }
            self.notify.notified().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::ExecJob;
    use tokio::sync::oneshot;

    fn message(code: &str) -> ExecMessage {
        let (responder, _) = oneshot::channel();
        ExecMessage {
            job: ExecJob::Single {
                language: "python".to_string(),
                code: code.to_string(),
                stdin: String::new(),
            },
            responder,
        }
    }

    fn code_of(message: ExecMessage) -> String {
        match message.job {
            ExecJob::Single { code, .. } | ExecJob::Batch { code, .. } => code,
        }
    }

    #[tokio::test]
    async fn test_jobs_are_popped_in_order() {
        let queue = JobQueue::new();
        assert!(queue.is_empty().await);

        queue.push(message("first")).await;
        queue.push(message("second")).await;
        assert_eq!(queue.len().await, 2);

        assert_eq!(code_of(queue.pop().await), "first");
        assert_eq!(code_of(queue.pop().await), "second");
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = std::sync::Arc::new(JobQueue::new());
        let popper = tokio::spawn({
            let queue = queue.clone();
            async move { code_of(queue.pop().await) }
        });

        tokio::task::yield_now().await;
        queue.push(message("late")).await;
        assert_eq!(popper.await.unwrap(), "late");
    }
}
