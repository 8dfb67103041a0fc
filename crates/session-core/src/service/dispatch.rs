//! Background operation queues
//!
//! Each queue runs its tasks one at a time in submission order on its own
//! tokio task, so a slow task only delays tasks of the same queue.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::errors::{Result, SessionError};
use crate::session::session::panic_message;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

pub struct DispatchQueue {
    name: &'static str,
    sender: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DispatchQueue {
    /// Start a queue and its worker task
    pub fn new(name: &'static str) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
        let worker = tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                if let Err(panic) = AssertUnwindSafe(job).catch_unwind().await {
                    error!("Task of queue {} panicked: {}", name, panic_message(panic.as_ref()));
                }
            }
            debug!("Queue {} drained", name);
        });
        Self {
            name,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Queue `task` behind the ones already submitted
    pub fn submit<F>(&self, task: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let sender = self.sender.lock();
        let sender = sender
            .as_ref()
            .ok_or_else(|| SessionError::invalid_state(format!("queue {} is shut down", self.name)))?;
        sender
            .send(Box::pin(task))
            .map_err(|_| SessionError::invalid_state(format!("queue {} worker stopped", self.name)))
    }

    /// Stop accepting tasks and wait for the queued ones to finish
    pub async fn shutdown(&self) {
        self.sender.lock().take();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!("Queue {} worker failed: {}", self.name, e);
            }
        }
    }
}

/// The three queues of the SIP service
pub struct DispatchQueues {
    pub messaging: DispatchQueue,
    pub streaming: DispatchQueue,
    pub instant_message: DispatchQueue,
}

impl DispatchQueues {
    pub fn new() -> Self {
        Self {
            messaging: DispatchQueue::new("messaging"),
            streaming: DispatchQueue::new("streaming"),
            instant_message: DispatchQueue::new("instant-message"),
        }
    }

    pub async fn shutdown(&self) {
        self.messaging.shutdown().await;
        self.streaming.shutdown().await;
        self.instant_message.shutdown().await;
    }
}
