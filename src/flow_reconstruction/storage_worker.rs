use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, warn};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::error_handling::types::StorageError;
use crate::storage::Storage;

use super::types::{HttpFlow, HttpMessage};

/// One flush cycle's worth of cached flow data.
#[derive(Debug, Default)]
pub struct FlushBatch {
    pub flows: Vec<HttpFlow>,
    pub packets: Vec<HttpMessage>,
}

impl FlushBatch {
    pub fn is_empty(&self) -> bool {
        self.flows.is_empty() && self.packets.is_empty()
    }
}

/// Fixed pool of storage writers draining a shared batch queue. Each write
/// is retried with a linearly growing backoff; a batch entry that still
/// fails after the last attempt is dropped with an error log.
pub struct StorageWorkerPool {
    tx: mpsc::Sender<FlushBatch>,
    handles: Vec<JoinHandle<()>>,
}

impl StorageWorkerPool {
    pub fn new(
        workers: usize,
        storage: Arc<dyn Storage>,
        max_attempts: u32,
        backoff: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<FlushBatch>(64);
        let rx = Arc::new(Mutex::new(rx));
        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let rx = rx.clone();
            let storage = storage.clone();
            handles.push(tokio::spawn(async move {
                Self::worker_loop(id, rx, storage, max_attempts, backoff).await;
            }));
        }
        Self { tx, handles }
    }

    pub async fn submit(&self, batch: FlushBatch) {
        if batch.is_empty() {
            return;
        }
        if self.tx.send(batch).await.is_err() {
            error!("Storage worker queue closed, dropping batch");
        }
    }

    /// Closes the queue and waits for the workers to drain it.
    pub async fn shutdown(self) {
        drop(self.tx);
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("Storage worker panicked: {}", e);
            }
        }
    }

    async fn worker_loop(
        id: usize,
        rx: Arc<Mutex<mpsc::Receiver<FlushBatch>>>,
        storage: Arc<dyn Storage>,
        max_attempts: u32,
        backoff: Duration,
    ) {
        loop {
            // Hold the receiver lock only while waiting for the next batch.
            let batch = {
                let mut rx = rx.lock().await;
                rx.recv().await
            };
            let Some(batch) = batch else { break };
            debug!(
                "Worker {} storing {} flow(s), {} packet(s)",
                id,
                batch.flows.len(),
                batch.packets.len()
            );
            for flow in &batch.flows {
                store_with_retry(max_attempts, backoff, "flow", || {
                    storage.insert_http_flow(flow)
                })
                .await;
            }
            for packet in &batch.packets {
                store_with_retry(max_attempts, backoff, "packet", || {
                    storage.insert_http_packet(packet)
                })
                .await;
            }
        }
        debug!("Worker {} stopped", id);
    }
}

async fn store_with_retry<F>(max_attempts: u32, backoff: Duration, what: &str, mut op: F)
where
    F: FnMut() -> Result<(), StorageError>,
{
    for attempt in 1..=max_attempts {
        match op() {
            Ok(()) => return,
            Err(e) if attempt == max_attempts => {
                error!(
                    "Dropping {} after {} failed attempt(s): {}",
                    what, max_attempts, e
                );
            }
            Err(e) => {
                warn!(
                    "Storing {} failed (attempt {}/{}): {}",
                    what, attempt, max_attempts, e
                );
                tokio::time::sleep(backoff * attempt).await;
            }
        }
    }
}
