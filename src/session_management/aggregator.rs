use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, error, info};
use tokio::sync::{watch, Notify};

use crate::decode::types::DecodedRecord;
use crate::storage::Storage;

use super::types::{SessionKey, SessionRecord};

/// Aggregates decoded packets into per-tuple sessions and flushes the table
/// to storage once either the size or the age threshold is reached.
pub struct SessionAggregator {
    app_uid: i64,
    storage: Arc<dyn Storage>,
    sessions: Mutex<HashMap<SessionKey, SessionRecord>>,
    last_flush: Mutex<Instant>,
    // At most one flush cycle runs at a time; a second request is a no-op.
    flush_in_progress: AtomicBool,
    min_sessions_before_flush: usize,
    flush_timeout: Duration,
    flush_notify: Notify,
}

impl SessionAggregator {
    pub fn new(
        app_uid: i64,
        storage: Arc<dyn Storage>,
        min_sessions_before_flush: usize,
        flush_timeout: Duration,
    ) -> Self {
        Self {
            app_uid,
            storage,
            sessions: Mutex::new(HashMap::new()),
            last_flush: Mutex::new(Instant::now()),
            flush_in_progress: AtomicBool::new(false),
            min_sessions_before_flush,
            flush_timeout,
            flush_notify: Notify::new(),
        }
    }

    /// Folds one decoded record into the session table. DNS records carry
    /// their own storage path and do not create sessions.
    pub fn observe(&self, record: &DecodedRecord) {
        let meta = match record {
            DecodedRecord::Tcp(r) => &r.meta,
            DecodedRecord::Udp(r) => &r.meta,
            DecodedRecord::Dns(_) => return,
        };
        let key = SessionKey::from_meta(meta, record.protocol());

        let should_flush = {
            let mut sessions = self.sessions.lock().unwrap();
            match sessions.get_mut(&key) {
                Some(existing) => existing.absorb(meta),
                None => {
                    let record = SessionRecord::new(self.app_uid, &key, meta);
                    sessions.insert(key, record);
                }
            }
            sessions.len() >= self.min_sessions_before_flush
        };
        if should_flush {
            self.flush_notify.notify_one();
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    fn should_flush(&self) -> bool {
        let count = self.session_count();
        if count == 0 {
            return false;
        }
        count >= self.min_sessions_before_flush
            || self.last_flush.lock().unwrap().elapsed() >= self.flush_timeout
    }

    /// Flushes the session table to storage. Returns `true` if this call
    /// performed the flush, `false` if another flush was already running.
    /// Records that fail to persist are logged and dropped; a failing
    /// backend must not wedge the capture path.
    pub fn flush(&self) -> bool {
        if self
            .flush_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Flush already in progress, skipping");
            return false;
        }

        // Snapshot and clear under the lock; writes happen outside it so new
        // packets keep accumulating into a fresh table.
        let snapshot: Vec<SessionRecord> = {
            let mut sessions = self.sessions.lock().unwrap();
            *self.last_flush.lock().unwrap() = Instant::now();
            sessions.drain().map(|(_, v)| v).collect()
        };

        if !snapshot.is_empty() {
            info!("Flushing {} session(s)", snapshot.len());
            for session in &snapshot {
                if let Err(e) = self.storage.insert_or_update_session(session) {
                    error!("Failed to persist session {}: {}", session.session_id, e);
                }
            }
        }

        self.flush_in_progress.store(false, Ordering::Release);
        true
    }

    /// Periodic flush driver. Wakes on the interval tick, on a size-threshold
    /// notification from `observe`, or on shutdown; performs a final flush
    /// before exiting.
    pub async fn run_monitor(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
        interval: Duration,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.should_flush() {
                        self.flush();
                    }
                }
                _ = self.flush_notify.notified() => {
                    if self.should_flush() {
                        self.flush();
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        self.flush();
        debug!("Session monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::types::{PacketMeta, TcpFlags, TcpRecord};
    use crate::error_handling::types::StorageError;
    use crate::flow_reconstruction::types::{HttpFlow, HttpMessage};
    use crate::storage::MemoryStorage;
    use std::net::IpAddr;
    use std::sync::atomic::AtomicUsize;

    fn tcp_record(src: &str, sport: u16, dst: &str, dport: u16) -> DecodedRecord {
        DecodedRecord::Tcp(TcpRecord {
            meta: PacketMeta {
                timestamp: "2024-01-01 00:00:00.000000".to_string(),
                src_ip: src.parse::<IpAddr>().unwrap(),
                src_port: sport,
                dst_ip: dst.parse::<IpAddr>().unwrap(),
                dst_port: dport,
                packet_len: 60,
            },
            sequence: 1,
            ack: 0,
            flags: TcpFlags(TcpFlags::ACK),
            header_hex: String::new(),
            payload_hex: String::new(),
        })
    }

    #[test]
    fn test_one_entry_per_tuple() {
        let storage = Arc::new(MemoryStorage::new());
        let agg = SessionAggregator::new(1, storage.clone(), 50, Duration::from_secs(30));
        for _ in 0..5 {
            agg.observe(&tcp_record("10.0.0.5", 1234, "93.1.1.1", 443));
        }
        agg.observe(&tcp_record("93.1.1.1", 443, "10.0.0.5", 1234));
        assert_eq!(agg.session_count(), 2);

        assert!(agg.flush());
        assert_eq!(agg.session_count(), 0);
        let sessions = storage.sessions();
        let forward = sessions
            .iter()
            .find(|s| s.session_id == "10.0.0.5:1234-93.1.1.1:443-TCP")
            .unwrap();
        assert_eq!(forward.packet_count, 5);
        assert_eq!(forward.byte_count, 300);
    }

    #[test]
    fn test_dns_records_do_not_create_sessions() {
        use crate::decode::types::DnsRecord;
        let agg = SessionAggregator::new(
            1,
            Arc::new(MemoryStorage::new()),
            50,
            Duration::from_secs(30),
        );
        agg.observe(&DecodedRecord::Dns(DnsRecord {
            app_uid: 1,
            meta: PacketMeta {
                timestamp: "2024-01-01 00:00:00.000000".to_string(),
                src_ip: "10.0.0.5".parse().unwrap(),
                src_port: 33333,
                dst_ip: "8.8.8.8".parse().unwrap(),
                dst_port: 53,
                packet_len: 64,
            },
            transaction_id: 1,
            qdcount: 1,
            ancount: 0,
            queries: "1 1 example.com.".to_string(),
        }));
        assert_eq!(agg.session_count(), 0);
    }

    /// Storage that blocks inside the first write until released, so two
    /// flush attempts can be forced to overlap.
    struct BlockingStorage {
        calls: AtomicUsize,
        gate: std::sync::Mutex<()>,
    }

    impl Storage for BlockingStorage {
        fn insert_or_update_session(&self, _: &SessionRecord) -> Result<(), StorageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let _guard = self.gate.lock().unwrap();
            Ok(())
        }
        fn insert_dns_record(
            &self,
            _: &crate::decode::types::DnsRecord,
        ) -> Result<(), StorageError> {
            Ok(())
        }
        fn insert_http_flow(&self, _: &HttpFlow) -> Result<(), StorageError> {
            Ok(())
        }
        fn insert_http_packet(&self, _: &HttpMessage) -> Result<(), StorageError> {
            Ok(())
        }
    }

    #[test]
    fn test_concurrent_flush_runs_once() {
        let _ = env_logger::builder().is_test(true).try_init();
        let storage = Arc::new(BlockingStorage {
            calls: AtomicUsize::new(0),
            gate: std::sync::Mutex::new(()),
        });
        let agg = Arc::new(SessionAggregator::new(
            1,
            storage.clone(),
            50,
            Duration::from_secs(30),
        ));
        agg.observe(&tcp_record("10.0.0.5", 1234, "93.1.1.1", 443));

        // Hold the gate so the first flush blocks mid-write.
        let gate = storage.gate.lock().unwrap();
        let first = {
            let agg = agg.clone();
            std::thread::spawn(move || agg.flush())
        };
        while storage.calls.load(Ordering::SeqCst) == 0 {
            std::thread::yield_now();
        }
        // Second flush while the first is in flight must be refused.
        assert!(!agg.flush());
        drop(gate);
        assert!(first.join().unwrap());
        assert_eq!(storage.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_timeout_drives_flush_even_below_threshold() {
        let agg = SessionAggregator::new(
            1,
            Arc::new(MemoryStorage::new()),
            50,
            Duration::from_millis(0),
        );
        agg.observe(&tcp_record("10.0.0.5", 1234, "93.1.1.1", 443));
        assert!(agg.should_flush());
    }

    #[test]
    fn test_empty_table_never_flush_worthy() {
        let agg = SessionAggregator::new(
            1,
            Arc::new(MemoryStorage::new()),
            1,
            Duration::from_millis(0),
        );
        assert!(!agg.should_flush());
    }
}
