use serde::Deserialize;
use std::path::PathBuf;

/// Settings for the live capture source.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Network interface the pcap handle is opened on.
    pub device: String,

    /// Address of the device under test. Frames to or from this address are
    /// rewritten to `proxy_ip` before records or session keys are built.
    pub device_ip: String,

    /// Proxy-facing address substituted for `device_ip` in emitted records.
    pub proxy_ip: String,

    /// Hosts excluded from the default BPF filter expression (typically the
    /// capture box itself and the proxy).
    pub excluded_hosts: Vec<String>,

    /// Snapshot length passed to the capture handle.
    pub snaplen: i32,

    /// Read timeout on the capture handle, in milliseconds. This bounds how
    /// long `stop()` takes to be observed by the blocking read loop.
    pub read_timeout_ms: i32,

    /// Bound of the frame hand-off channel between capture and decode.
    pub frame_queue_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: "any".to_string(),
            device_ip: "0.0.0.0".to_string(),
            proxy_ip: "0.0.0.0".to_string(),
            excluded_hosts: Vec::new(),
            snaplen: 65535,
            read_timeout_ms: 100,
            frame_queue_size: 1024,
        }
    }
}

/// Flush policy for the live session table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Live session count at which a flush is requested.
    pub min_sessions_before_flush: usize,

    /// Seconds since the last flush after which a flush is requested
    /// regardless of session count.
    pub flush_timeout_secs: u64,

    /// How often the monitor loop re-evaluates the flush policy.
    pub monitor_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            min_sessions_before_flush: 50,
            flush_timeout_secs: 30,
            monitor_interval_secs: 1,
        }
    }
}

/// Settings for the bus-fed HTTP flow reconstruction path.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Endpoint of the proxy's publish side, `host:port`.
    pub bus_endpoint: String,

    /// Packet cache size at which a flush is requested.
    pub soft_flush_count: usize,

    /// Packet cache ceiling at which a flush is forced immediately.
    pub hard_cache_capacity: usize,

    /// Wall-clock seconds between time-based flushes.
    pub flush_interval_secs: u64,

    /// Number of storage worker tasks draining flush batches.
    pub storage_workers: usize,

    /// Attempts per storage call before the item is dropped.
    pub retry_max_attempts: u32,

    /// Base backoff between retries; grows linearly with the attempt number.
    pub retry_backoff_ms: u64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            bus_endpoint: "127.0.0.1:5555".to_string(),
            soft_flush_count: 64,
            hard_cache_capacity: 512,
            flush_interval_secs: 10,
            storage_workers: 2,
            retry_max_attempts: 3,
            retry_backoff_ms: 200,
        }
    }
}

/// Where the file-backed storage collaborator writes its tables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("trafscope-data"),
        }
    }
}
