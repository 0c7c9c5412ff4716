// Bounded slots shared by every case of one judging run

use crate::error::{JudgeError, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

#[derive(Debug, Clone)]
pub struct WorkerPool {
    sem: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// A pool with `parallelism` slots; zero is treated as one
    pub fn new(parallelism: usize) -> Self {
        let size = parallelism.max(1);
        Self {
            sem: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `fut` while holding one slot
    ///
    /// The slot is released when the future finishes, whatever it returns.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let _permit = self
            .sem
            .acquire()
            .await
            .map_err(|e| JudgeError::system("Worker pool closed", vec![e.to_string()]))?;
        fut.await
    }
}
