use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{debug, error, info};
use serde::Serialize;
use serde_json::Value;

use crate::decode::types::DnsRecord;
use crate::error_handling::types::StorageError;
use crate::flow_reconstruction::types::{HttpFlow, HttpMessage};
use crate::session_management::types::SessionRecord;

use super::storage_trait::Storage;

/// File-backed storage: one JSON file per session under `sessions/`, and
/// append-only JSON Lines files for DNS records, flows and packets.
pub struct FileStorage {
    base_path: PathBuf,
    // Serializes session read-modify-write cycles.
    session_lock: Mutex<()>,
    append_lock: Mutex<()>,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self, StorageError> {
        let base_path = base_path.as_ref().to_path_buf();
        let sessions_dir = base_path.join("sessions");
        fs::create_dir_all(&sessions_dir).map_err(|e| {
            error!(
                "Failed to create sessions dir {}: {}",
                sessions_dir.display(),
                e
            );
            StorageError::WriteFailed
        })?;
        info!("FileStorage initialized at {}", base_path.display());

        Ok(Self {
            base_path,
            session_lock: Mutex::new(()),
            append_lock: Mutex::new(()),
        })
    }

    /// Construct FileStorage using env var TRAFSCOPE_STORAGE_DIR if set,
    /// otherwise the current directory.
    pub fn new_default() -> Result<Self, StorageError> {
        if let Ok(dir) = std::env::var("TRAFSCOPE_STORAGE_DIR") {
            info!("Using FileStorage from TRAFSCOPE_STORAGE_DIR: {}", dir);
            return Self::new(PathBuf::from(dir));
        }
        let cwd = std::env::current_dir().map_err(|e| {
            error!("Failed to get current dir: {}", e);
            StorageError::ReadFailed
        })?;
        info!("Using FileStorage at current directory: {}", cwd.display());
        Self::new(cwd)
    }

    fn sessions_dir(&self) -> PathBuf {
        self.base_path.join("sessions")
    }

    fn session_file_path(&self, session_id: &str) -> PathBuf {
        // Session ids contain ':' which some filesystems reject.
        let name = session_id.replace([':', '/'], "_");
        self.sessions_dir().join(format!("{}.json", name))
    }

    fn append_jsonl<T: Serialize>(&self, file: &str, record: &T) -> Result<(), StorageError> {
        let path = self.base_path.join(file);
        let line = serde_json::to_string(record).map_err(|e| {
            error!("Failed to serialize record for {}: {}", path.display(), e);
            StorageError::WriteFailed
        })?;
        let _guard = self.append_lock.lock().unwrap();
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                error!("Open append failed {}: {}", path.display(), e);
                StorageError::WriteFailed
            })?;
        writeln!(f, "{}", line).map_err(|e| {
            error!("Write failed {}: {}", path.display(), e);
            StorageError::WriteFailed
        })?;
        debug!("Appended record to {}", path.display());
        Ok(())
    }
}

impl Storage for FileStorage {
    fn insert_or_update_session(&self, session: &SessionRecord) -> Result<(), StorageError> {
        let path = self.session_file_path(&session.session_id);
        let _guard = self.session_lock.lock().unwrap();

        let mut merged = serde_json::to_value(session).map_err(|e| {
            error!("Failed to serialize session {}: {}", session.session_id, e);
            StorageError::WriteFailed
        })?;

        if path.exists() {
            let mut content = String::new();
            File::open(&path)
                .and_then(|mut f| f.read_to_string(&mut content))
                .map_err(|e| {
                    error!("Failed to read session file {}: {}", path.display(), e);
                    StorageError::ReadFailed
                })?;
            if let Ok(existing) = serde_json::from_str::<Value>(&content) {
                let prev_packets = existing
                    .get("packet_count")
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                let prev_bytes = existing
                    .get("byte_count")
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                merged["packet_count"] =
                    Value::from(prev_packets + session.packet_count);
                merged["byte_count"] = Value::from(prev_bytes + session.byte_count);
                // First-seen timestamp wins.
                if let Some(ts) = existing.get("timestamp").cloned() {
                    merged["timestamp"] = ts;
                }
            }
        }

        let mut f = File::create(&path).map_err(|e| {
            error!("Failed to create session file {}: {}", path.display(), e);
            StorageError::WriteFailed
        })?;
        let body = serde_json::to_string_pretty(&merged).map_err(|e| {
            error!("Failed to serialize session {}: {}", session.session_id, e);
            StorageError::WriteFailed
        })?;
        f.write_all(body.as_bytes()).map_err(|e| {
            error!("Failed to write session file {}: {}", path.display(), e);
            StorageError::WriteFailed
        })?;
        debug!("Saved session {} to {}", session.session_id, path.display());
        Ok(())
    }

    fn insert_dns_record(&self, record: &DnsRecord) -> Result<(), StorageError> {
        self.append_jsonl("dns.jsonl", record)
    }

    fn insert_http_flow(&self, flow: &HttpFlow) -> Result<(), StorageError> {
        self.append_jsonl("flows.jsonl", flow)
    }

    fn insert_http_packet(&self, packet: &HttpMessage) -> Result<(), StorageError> {
        self.append_jsonl("packets.jsonl", packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serial_test::serial;
    use tempfile::TempDir;

    fn session(id: &str, packets: u64, bytes: u64) -> SessionRecord {
        SessionRecord {
            app_uid: 1,
            timestamp: "2024-01-01 00:00:00.000000".to_string(),
            session_id: id.to_string(),
            protocol: "TCP".to_string(),
            src_ip: "10.0.0.5".to_string(),
            src_port: 1234,
            dst_ip: "93.1.1.1".to_string(),
            dst_port: 443,
            packet_count: packets,
            byte_count: bytes,
            last_update: Utc::now(),
        }
    }

    #[test]
    fn test_session_upsert_merges_counters() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        let id = "10.0.0.5:1234-93.1.1.1:443-TCP";
        storage.insert_or_update_session(&session(id, 3, 180)).unwrap();
        storage.insert_or_update_session(&session(id, 2, 120)).unwrap();

        let path = storage.session_file_path(id);
        let content = fs::read_to_string(path).unwrap();
        let v: Value = serde_json::from_str(&content).unwrap();
        assert_eq!(v["packet_count"], 5);
        assert_eq!(v["byte_count"], 300);
        assert_eq!(v["session_id"], id);
    }

    #[test]
    fn test_dns_records_append_as_jsonl() {
        use crate::decode::types::PacketMeta;
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        for txid in [1u16, 2] {
            storage
                .insert_dns_record(&DnsRecord {
                    app_uid: 1,
                    meta: PacketMeta {
                        timestamp: "2024-01-01 00:00:00.000000".to_string(),
                        src_ip: "10.0.0.5".parse().unwrap(),
                        src_port: 33333,
                        dst_ip: "8.8.8.8".parse().unwrap(),
                        dst_port: 53,
                        packet_len: 64,
                    },
                    transaction_id: txid,
                    qdcount: 1,
                    ancount: 0,
                    queries: "1 1 example.com.".to_string(),
                })
                .unwrap();
        }
        let content = fs::read_to_string(dir.path().join("dns.jsonl")).unwrap();
        assert_eq!(content.lines().count(), 2);
        let first: Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(first["queries"], "1 1 example.com.");
    }

    #[test]
    #[serial]
    fn test_new_default_honors_env_var() {
        let dir = TempDir::new().unwrap();
        std::env::set_var("TRAFSCOPE_STORAGE_DIR", dir.path());
        let storage = FileStorage::new_default().unwrap();
        assert!(dir.path().join("sessions").is_dir());
        storage
            .insert_or_update_session(&session("a:1-b:2-TCP", 1, 60))
            .unwrap();
        std::env::remove_var("TRAFSCOPE_STORAGE_DIR");
    }
}
