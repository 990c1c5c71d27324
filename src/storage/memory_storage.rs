use std::collections::HashMap;
use std::sync::Mutex;

use crate::decode::types::DnsRecord;
use crate::error_handling::types::StorageError;
use crate::flow_reconstruction::types::{HttpFlow, HttpMessage};
use crate::session_management::types::SessionRecord;

use super::storage_trait::Storage;

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, SessionRecord>,
    dns: Vec<DnsRecord>,
    flows: Vec<HttpFlow>,
    packets: Vec<HttpMessage>,
}

/// In-memory storage, used by tests and as a sink when no durable backend
/// is configured.
#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sessions(&self) -> Vec<SessionRecord> {
        self.inner.lock().unwrap().sessions.values().cloned().collect()
    }

    pub fn dns_records(&self) -> Vec<DnsRecord> {
        self.inner.lock().unwrap().dns.clone()
    }

    pub fn flows(&self) -> Vec<HttpFlow> {
        self.inner.lock().unwrap().flows.clone()
    }

    pub fn packets(&self) -> Vec<HttpMessage> {
        self.inner.lock().unwrap().packets.clone()
    }
}

impl Storage for MemoryStorage {
    fn insert_or_update_session(&self, session: &SessionRecord) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.sessions.get_mut(&session.session_id) {
            Some(existing) => {
                existing.packet_count += session.packet_count;
                existing.byte_count += session.byte_count;
                existing.last_update = session.last_update;
            }
            None => {
                inner
                    .sessions
                    .insert(session.session_id.clone(), session.clone());
            }
        }
        Ok(())
    }

    fn insert_dns_record(&self, record: &DnsRecord) -> Result<(), StorageError> {
        self.inner.lock().unwrap().dns.push(record.clone());
        Ok(())
    }

    fn insert_http_flow(&self, flow: &HttpFlow) -> Result<(), StorageError> {
        self.inner.lock().unwrap().flows.push(flow.clone());
        Ok(())
    }

    fn insert_http_packet(&self, packet: &HttpMessage) -> Result<(), StorageError> {
        self.inner.lock().unwrap().packets.push(packet.clone());
        Ok(())
    }
}
