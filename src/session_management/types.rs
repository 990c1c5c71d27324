use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::IpAddr;

use crate::decode::types::PacketMeta;

/// Identity of a session: the exact 4-tuple plus protocol, direction
/// included. `a -> b` and `b -> a` are distinct sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub src_ip: IpAddr,
    pub src_port: u16,
    pub dst_ip: IpAddr,
    pub dst_port: u16,
    pub protocol: String,
}

impl SessionKey {
    pub fn from_meta(meta: &PacketMeta, protocol: &str) -> Self {
        Self {
            src_ip: meta.src_ip,
            src_port: meta.src_port,
            dst_ip: meta.dst_ip,
            dst_port: meta.dst_port,
            protocol: protocol.to_string(),
        }
    }

    /// Storage identifier, `"src:sport-dst:dport-PROTO"`.
    pub fn session_id(&self) -> String {
        format!(
            "{}:{}-{}:{}-{}",
            self.src_ip, self.src_port, self.dst_ip, self.dst_port, self.protocol
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    pub app_uid: i64,
    /// Timestamp of the first packet observed for this tuple.
    pub timestamp: String,
    pub session_id: String,
    pub protocol: String,
    pub src_ip: String,
    pub src_port: u16,
    pub dst_ip: String,
    pub dst_port: u16,
    pub packet_count: u64,
    pub byte_count: u64,
    #[serde(skip)]
    pub last_update: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(app_uid: i64, key: &SessionKey, meta: &PacketMeta) -> Self {
        Self {
            app_uid,
            timestamp: meta.timestamp.clone(),
            session_id: key.session_id(),
            protocol: key.protocol.clone(),
            src_ip: key.src_ip.to_string(),
            src_port: key.src_port,
            dst_ip: key.dst_ip.to_string(),
            dst_port: key.dst_port,
            packet_count: 1,
            byte_count: meta.packet_len as u64,
            last_update: Utc::now(),
        }
    }

    pub fn absorb(&mut self, meta: &PacketMeta) {
        self.packet_count += 1;
        self.byte_count += meta.packet_len as u64;
        self.last_update = Utc::now();
    }
}
