use std::thread::{self, JoinHandle};
use tokio::sync::{mpsc, oneshot};

use crate::error::{CapError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A named worker thread that runs submitted jobs one at a time, in order.
///
/// Encoders own one each so that every call into their compression session
/// happens on a single serial context without blocking the async runtime.
pub struct SerialQueue {
    name: String,
    tx: Option<mpsc::UnboundedSender<Job>>,
    handle: Option<JoinHandle<()>>,
}

impl SerialQueue {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                while let Some(job) = rx.blocking_recv() {
                    job();
                }
            })
            .map_err(|e| CapError::Setup(format!("spawn {} failed: {}", name, e)))?;

        Ok(Self {
            name,
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueues `job` behind everything already submitted. Returns false if
    /// the worker has gone away.
    pub fn dispatch(&self, job: impl FnOnce() + Send + 'static) -> bool {
        match &self.tx {
            Some(tx) => tx.send(Box::new(job)).is_ok(),
            None => false,
        }
    }

    /// Resolves once every job submitted before this call has run.
    pub async fn drained(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.dispatch(move || {
            let _ = done_tx.send(());
        }) {
            let _ = done_rx.await;
        }
    }
}

impl Drop for SerialQueue {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            // A job holding the last reference drops us from the worker itself.
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                log::error!("{} worker panicked", self.name);
            }
        }
    }
}
