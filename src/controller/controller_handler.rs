use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::capture::Capturer;
use crate::configuration::Config;
use crate::decode::types::DecodedRecord;
use crate::decode::PacketDecoder;
use crate::error_handling::types::ControllerError;
use crate::flow_reconstruction::{FlowReconstructor, StorageWorkerPool, TcpBusSource};
use crate::session_management::SessionAggregator;
use crate::storage::{FileStorage, Storage};

/// Owns the whole pipeline: capture thread, decode task, session monitor,
/// bus consumer and storage worker pool, plus the ordered shutdown between
/// them.
pub struct Controller {
    config: Config,
    storage: Arc<dyn Storage>,
    /// Identifies this capture run in the logs.
    run_id: Uuid,
}

impl Controller {
    pub fn new(config: Config) -> Result<Self, ControllerError> {
        config.validate().map_err(ControllerError::ConfigurationError)?;
        let storage =
            FileStorage::new(&config.storage.path).map_err(ControllerError::StorageError)?;
        Ok(Self {
            config,
            storage: Arc::new(storage),
            run_id: Uuid::new_v4(),
        })
    }

    /// Construction seam for tests and alternative backends.
    pub fn with_storage(config: Config, storage: Arc<dyn Storage>) -> Result<Self, ControllerError> {
        config.validate().map_err(ControllerError::ConfigurationError)?;
        Ok(Self {
            config,
            storage,
            run_id: Uuid::new_v4(),
        })
    }

    /// Runs the pipeline until `stop` observes `true`, then tears it down in
    /// dependency order so every cached record reaches storage.
    pub async fn run(&self, mut stop: watch::Receiver<bool>) -> Result<(), ControllerError> {
        let device_ip = self
            .config
            .device_ip()
            .map_err(ControllerError::ConfigurationError)?;
        let proxy_ip = self
            .config
            .proxy_ip()
            .map_err(ControllerError::ConfigurationError)?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // Capture -> decode handoff.
        let (frame_tx, mut frame_rx) =
            mpsc::channel(self.config.capture.frame_queue_size.max(1));
        let capturer = Capturer::new(self.config.capture.clone());
        let capture_handle = capturer.spawn(frame_tx);

        let aggregator = Arc::new(SessionAggregator::new(
            self.config.app_uid,
            self.storage.clone(),
            self.config.session.min_sessions_before_flush,
            Duration::from_secs(self.config.session.flush_timeout_secs),
        ));

        let decoder = PacketDecoder::new(self.config.app_uid, device_ip, proxy_ip);
        let decode_task = {
            let aggregator = aggregator.clone();
            let storage = self.storage.clone();
            tokio::spawn(async move {
                while let Some(frame) = frame_rx.recv().await {
                    match decoder.decode(&frame) {
                        Some(DecodedRecord::Dns(dns)) => {
                            if let Err(e) = storage.insert_dns_record(&dns) {
                                error!("Failed to persist DNS record: {}", e);
                            }
                        }
                        Some(record) => aggregator.observe(&record),
                        None => {}
                    }
                }
                info!("Decode loop drained");
            })
        };

        let monitor_task = tokio::spawn(aggregator.clone().run_monitor(
            shutdown_rx.clone(),
            Duration::from_secs(self.config.session.monitor_interval_secs),
        ));

        // Bus -> flow reconstruction -> worker pool.
        let pool = Arc::new(StorageWorkerPool::new(
            self.config.flow.storage_workers,
            self.storage.clone(),
            self.config.flow.retry_max_attempts,
            Duration::from_millis(self.config.flow.retry_backoff_ms),
        ));
        let reconstructor = Arc::new(FlowReconstructor::new(
            self.config.app_uid,
            self.config.flow.soft_flush_count,
            self.config.flow.hard_cache_capacity,
            Duration::from_secs(self.config.flow.flush_interval_secs),
        ));
        let bus = Box::new(TcpBusSource::new(self.config.flow.bus_endpoint.clone()));
        let reconstruct_task =
            tokio::spawn(reconstructor.run(bus, pool.clone(), shutdown_rx.clone()));

        info!(
            "Pipeline running for app_uid {} (run {})",
            self.config.app_uid, self.run_id
        );

        while !*stop.borrow() {
            if stop.changed().await.is_err() {
                break;
            }
        }
        info!("Stop requested, shutting down pipeline");

        // The capture thread owns the frame sender; once it exits the decode
        // loop drains naturally and runs to completion.
        capturer.stop();
        let _ = tokio::task::spawn_blocking(move || capture_handle.join()).await;
        if let Err(e) = decode_task.await {
            error!("Decode task failed: {}", e);
        }

        // Final flushes happen inside the monitor and reconstructor loops.
        let _ = shutdown_tx.send(true);
        if let Err(e) = monitor_task.await {
            error!("Session monitor failed: {}", e);
        }
        if let Err(e) = reconstruct_task.await {
            error!("Flow reconstructor failed: {}", e);
        }

        match Arc::try_unwrap(pool) {
            Ok(pool) => pool.shutdown().await,
            Err(_) => error!("Storage worker pool still referenced at shutdown"),
        }

        info!("Pipeline stopped (run {})", self.run_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[test]
    fn test_invalid_config_rejected_at_construction() {
        let mut config = Config::default();
        config.capture.device_ip = "not-an-ip".to_string();
        let result = Controller::with_storage(config, Arc::new(MemoryStorage::new()));
        assert!(matches!(
            result,
            Err(ControllerError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_valid_config_accepted() {
        let controller =
            Controller::with_storage(Config::default(), Arc::new(MemoryStorage::new()));
        assert!(controller.is_ok());
    }
}
