use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use log::{debug, error, info, trace, warn};
use tokio::sync::mpsc::Sender;

use crate::configuration::types::CaptureConfig;
use crate::error_handling::types::CaptureError;

use super::types::RawFrame;

/// Live packet source feeding the decode stage.
///
/// The pcap read loop blocks inside the capture library on a dedicated OS
/// thread; frames are handed to the tokio side of the pipeline through a
/// bounded channel. [`stop`] flips the running flag, and the handle's read
/// timeout guarantees the loop observes it within a bounded time even when
/// no further frames arrive.
///
/// A filter expression that fails to compile downgrades to capturing
/// everything with a warning; only a device that cannot be opened is fatal,
/// and then only to the capture thread.
///
/// [`stop`]: Capturer::stop
pub struct Capturer {
    config: CaptureConfig,
    running: Arc<AtomicBool>,
}

impl Capturer {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Builds the default BPF predicate for the configured device under test,
    /// e.g. `host 192.168.31.172 and not (host a or host b)`.
    ///
    /// Returns `None` when no device address is configured, in which case
    /// capture runs unfiltered.
    pub fn filter_expression(config: &CaptureConfig) -> Option<String> {
        if config.device_ip.is_empty() || config.device_ip == "0.0.0.0" {
            return None;
        }
        let mut expr = format!("host {}", config.device_ip);
        if !config.excluded_hosts.is_empty() {
            let excluded = config
                .excluded_hosts
                .iter()
                .map(|h| format!("host {}", h))
                .collect::<Vec<_>>()
                .join(" or ");
            expr.push_str(&format!(" and not ({})", excluded));
        }
        Some(expr)
    }

    /// Starts the capture thread. The thread owns the sending half of the
    /// frame channel; when it exits, the channel closes and the decode loop
    /// drains to completion.
    pub fn spawn(&self, sink: Sender<RawFrame>) -> thread::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let config = self.config.clone();

        thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || {
                if let Err(e) = Self::run(&config, &running, sink) {
                    error!("Capture thread terminated: {}", e);
                }
            })
            .expect("failed to spawn capture thread")
    }

    /// Requests the read loop to exit. Returns once the flag is set; the
    /// caller joins the thread handle to wait for the actual exit.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn run(
        config: &CaptureConfig,
        running: &AtomicBool,
        sink: Sender<RawFrame>,
    ) -> Result<(), CaptureError> {
        let mut handle = pcap::Capture::from_device(config.device.as_str())
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?
            .promisc(true)
            .snaplen(config.snaplen)
            .timeout(config.read_timeout_ms)
            .open()
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;

        match Self::filter_expression(config) {
            Some(expr) => match handle.filter(&expr, true) {
                Ok(()) => info!("Capture filter set: {}", expr),
                Err(e) => warn!(
                    "Capture filter {:?} failed to compile ({}), capturing everything",
                    expr, e
                ),
            },
            None => info!("No device address configured, capturing everything"),
        }

        info!("Capture loop started on {}", config.device);

        while running.load(Ordering::SeqCst) {
            match handle.next_packet() {
                Ok(packet) => {
                    if packet.header.caplen == 0 {
                        continue;
                    }
                    trace!("Captured {} byte(s)", packet.header.caplen);
                    let frame = RawFrame {
                        ts_sec: packet.header.ts.tv_sec as i64,
                        ts_usec: packet.header.ts.tv_usec as i64,
                        data: packet.data.to_vec(),
                    };
                    if sink.blocking_send(frame).is_err() {
                        debug!("Frame channel closed, stopping capture loop");
                        return Err(CaptureError::ChannelClosed);
                    }
                }
                // The handle's read timeout expired with nothing captured;
                // loop around so the running flag is re-checked.
                Err(pcap::Error::TimeoutExpired) => continue,
                Err(e) => {
                    error!("Capture read failed: {}", e);
                    break;
                }
            }
        }

        info!("Capture loop exited");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_expression_with_exclusions() {
        let config = CaptureConfig {
            device_ip: "192.168.31.172".to_string(),
            excluded_hosts: vec![
                "192.168.98.200".to_string(),
                "192.168.98.185".to_string(),
            ],
            ..CaptureConfig::default()
        };
        assert_eq!(
            Capturer::filter_expression(&config).unwrap(),
            "host 192.168.31.172 and not (host 192.168.98.200 or host 192.168.98.185)"
        );
    }

    #[test]
    fn test_filter_expression_without_exclusions() {
        let config = CaptureConfig {
            device_ip: "10.0.0.5".to_string(),
            ..CaptureConfig::default()
        };
        assert_eq!(
            Capturer::filter_expression(&config).unwrap(),
            "host 10.0.0.5"
        );
    }

    #[test]
    fn test_no_filter_when_device_ip_unset() {
        let config = CaptureConfig::default();
        assert!(Capturer::filter_expression(&config).is_none());
    }
}
