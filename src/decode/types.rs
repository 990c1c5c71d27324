use serde::Serialize;
use std::net::IpAddr;

/// Fields shared by every decoded record.
#[derive(Debug, Clone, Serialize)]
pub struct PacketMeta {
    /// Capture timestamp, storage column format.
    pub timestamp: String,
    pub src_ip: IpAddr,
    pub src_port: u16,
    pub dst_ip: IpAddr,
    pub dst_port: u16,
    /// Total packet length past the Ethernet header.
    pub packet_len: usize,
}

/// TCP flag bits, decoded independently: any combination may be set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpFlags(pub u8);

impl TcpFlags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const PSH: u8 = 0x08;
    pub const ACK: u8 = 0x10;
    pub const URG: u8 = 0x20;

    pub fn has(self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    /// Symbolic rendering, e.g. `"SYN ACK"`.
    pub fn symbolic(self) -> String {
        let mut names = Vec::new();
        if self.has(Self::FIN) {
            names.push("FIN");
        }
        if self.has(Self::SYN) {
            names.push("SYN");
        }
        if self.has(Self::RST) {
            names.push("RST");
        }
        if self.has(Self::PSH) {
            names.push("PSH");
        }
        if self.has(Self::ACK) {
            names.push("ACK");
        }
        if self.has(Self::URG) {
            names.push("URG");
        }
        names.join(" ")
    }
}

/// TCP record. Feeds the session table only; the hex serializations are
/// available but not persisted from this path.
#[derive(Debug, Clone)]
pub struct TcpRecord {
    pub meta: PacketMeta,
    pub sequence: u32,
    pub ack: u32,
    pub flags: TcpFlags,
    /// IP header + TCP header, hex encoded.
    pub header_hex: String,
    /// Bytes past the TCP header, hex encoded.
    pub payload_hex: String,
}

/// Generic (non-DNS) UDP record. Updates the session table; not persisted.
#[derive(Debug, Clone)]
pub struct UdpRecord {
    pub meta: PacketMeta,
    pub header_hex: String,
    pub payload_hex: String,
}

/// DNS-over-UDP record, the only decode-path record forwarded to storage.
#[derive(Debug, Clone, Serialize)]
pub struct DnsRecord {
    pub app_uid: i64,
    #[serde(flatten)]
    pub meta: PacketMeta,
    pub transaction_id: u16,
    pub qdcount: u16,
    pub ancount: u16,
    /// First question, rendered `"<type> <class> <name>."`.
    pub queries: String,
}

/// A fully validated record produced by the decoder. Invariant: never built
/// from partially-read memory; every header bound was checked against the
/// frame length before construction.
#[derive(Debug, Clone)]
pub enum DecodedRecord {
    Tcp(TcpRecord),
    Udp(UdpRecord),
    Dns(DnsRecord),
}

impl DecodedRecord {
    pub fn meta(&self) -> &PacketMeta {
        match self {
            DecodedRecord::Tcp(r) => &r.meta,
            DecodedRecord::Udp(r) => &r.meta,
            DecodedRecord::Dns(r) => &r.meta,
        }
    }

    pub fn protocol(&self) -> &'static str {
        match self {
            DecodedRecord::Tcp(_) => "TCP",
            DecodedRecord::Udp(_) | DecodedRecord::Dns(_) => "UDP",
        }
    }
}

pub fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_are_independent_bits() {
        let flags = TcpFlags(TcpFlags::SYN | TcpFlags::ACK);
        assert!(flags.has(TcpFlags::SYN));
        assert!(flags.has(TcpFlags::ACK));
        assert!(!flags.has(TcpFlags::FIN));
        assert_eq!(flags.symbolic(), "SYN ACK");
    }

    #[test]
    fn test_hex_rendering() {
        assert_eq!(to_hex(&[0x00, 0xff, 0x1a]), "00ff1a");
        assert_eq!(to_hex(&[]), "");
    }
}
