use log::debug;
use std::net::IpAddr;

use crate::capture::types::RawFrame;
use crate::error_handling::types::DecodeError;

use super::cursor::ByteCursor;
use super::types::{to_hex, DecodedRecord, DnsRecord, PacketMeta, TcpFlags, TcpRecord, UdpRecord};

const ETHER_HEADER_LEN: usize = 14;
const ETHERTYPE_IPV4: u16 = 0x0800;
const IPV4_MIN_HEADER_LEN: usize = 20;
const IPPROTO_TCP: u8 = 6;
const IPPROTO_UDP: u8 = 17;
const TCP_MIN_HEADER_LEN: usize = 20;
const UDP_HEADER_LEN: usize = 8;
const DNS_HEADER_LEN: usize = 12;
const DNS_PORT: u16 = 53;

/// Walks the Ethernet/IPv4/transport header chain of a raw frame and produces
/// a normalized record, or nothing for malformed and uninteresting frames.
///
/// All header bounds are validated through [`ByteCursor`] before a record is
/// constructed; lengths derived from 4-bit nibbles are multiplied by 4 and
/// re-validated against the frame. Frames that fail any check are dropped at
/// this boundary with a debug log, never surfaced as errors.
pub struct PacketDecoder {
    app_uid: i64,
    /// Address of the device under test as seen at the capture vantage point.
    device_ip: IpAddr,
    /// Logical client address expected by storage consumers; substituted for
    /// `device_ip` in emitted records.
    proxy_ip: IpAddr,
}

impl PacketDecoder {
    pub fn new(app_uid: i64, device_ip: IpAddr, proxy_ip: IpAddr) -> Self {
        Self {
            app_uid,
            device_ip,
            proxy_ip,
        }
    }

    pub fn decode(&self, frame: &RawFrame) -> Option<DecodedRecord> {
        match self.decode_frame(frame) {
            Ok(record) => record,
            Err(e) => {
                debug!("Dropping frame ({} byte(s)): {}", frame.data.len(), e);
                None
            }
        }
    }

    fn decode_frame(&self, frame: &RawFrame) -> Result<Option<DecodedRecord>, DecodeError> {
        let data = frame.data.as_slice();
        let mut cur = ByteCursor::new(data);

        // Ethernet: skip MAC addresses, read the ethertype.
        cur.skip(12)?;
        let ethertype = cur.read_u16_be()?;
        if ethertype != ETHERTYPE_IPV4 {
            return Ok(None);
        }

        // IPv4 fixed part.
        let ip_start = cur.position();
        let ver_ihl = cur.read_u8()?;
        let ip_header_len = ((ver_ihl & 0x0f) as usize) * 4;
        if ip_header_len < IPV4_MIN_HEADER_LEN {
            return Err(DecodeError::Malformed("IP header length below minimum"));
        }
        cur.skip(8)?; // tos, total length, identification, flags/fragment, ttl
        let protocol = cur.read_u8()?;
        cur.skip(2)?; // checksum
        let src_ip = IpAddr::from(cur.read_u32_be()?.to_be_bytes());
        let dst_ip = IpAddr::from(cur.read_u32_be()?.to_be_bytes());
        // Variable part: re-validate the nibble-derived length against the frame.
        cur.skip(ip_header_len - (cur.position() - ip_start))?;

        let (src_ip, dst_ip) = self.substitute_endpoints(src_ip, dst_ip);
        let packet_len = data.len() - ETHER_HEADER_LEN;
        let timestamp = frame.format_timestamp();

        match protocol {
            IPPROTO_TCP => self
                .decode_tcp(&mut cur, data, ip_start, timestamp, src_ip, dst_ip, packet_len)
                .map(Some),
            IPPROTO_UDP => self.decode_udp(
                &mut cur, data, ip_start, ip_header_len, timestamp, src_ip, dst_ip, packet_len,
            ),
            _ => Ok(None),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn decode_tcp(
        &self,
        cur: &mut ByteCursor<'_>,
        data: &[u8],
        ip_start: usize,
        timestamp: String,
        src_ip: IpAddr,
        dst_ip: IpAddr,
        packet_len: usize,
    ) -> Result<DecodedRecord, DecodeError> {
        let tcp_start = cur.position();
        let src_port = cur.read_u16_be()?;
        let dst_port = cur.read_u16_be()?;
        let sequence = cur.read_u32_be()?;
        let ack = cur.read_u32_be()?;
        let data_offset = cur.read_u8()?;
        let tcp_header_len = ((data_offset >> 4) as usize) * 4;
        if tcp_header_len < TCP_MIN_HEADER_LEN {
            return Err(DecodeError::Malformed("TCP data offset below minimum"));
        }
        let flags = TcpFlags(cur.read_u8()?);
        cur.skip(6)?; // window, checksum, urgent pointer
        cur.skip(tcp_header_len - TCP_MIN_HEADER_LEN)?; // options

        let header_hex = to_hex(&data[ip_start..tcp_start + tcp_header_len]);
        let payload_hex = to_hex(cur.read_bytes(cur.remaining())?);

        Ok(DecodedRecord::Tcp(TcpRecord {
            meta: PacketMeta {
                timestamp,
                src_ip,
                src_port,
                dst_ip,
                dst_port,
                packet_len,
            },
            sequence,
            ack,
            flags,
            header_hex,
            payload_hex,
        }))
    }

    #[allow(clippy::too_many_arguments)]
    fn decode_udp(
        &self,
        cur: &mut ByteCursor<'_>,
        data: &[u8],
        ip_start: usize,
        ip_header_len: usize,
        timestamp: String,
        src_ip: IpAddr,
        dst_ip: IpAddr,
        packet_len: usize,
    ) -> Result<Option<DecodedRecord>, DecodeError> {
        let src_port = cur.read_u16_be()?;
        let dst_port = cur.read_u16_be()?;
        cur.skip(4)?; // length, checksum

        let meta = PacketMeta {
            timestamp,
            src_ip,
            src_port,
            dst_ip,
            dst_port,
            packet_len,
        };

        if src_port == DNS_PORT || dst_port == DNS_PORT {
            return self.decode_dns(cur, meta).map(Some);
        }

        // Generic UDP is decoded but, by policy, only DNS-over-UDP is
        // persisted from the capture path.
        let header_hex = to_hex(&data[ip_start..ip_start + ip_header_len + UDP_HEADER_LEN]);
        let payload_hex = to_hex(cur.read_bytes(cur.remaining())?);

        Ok(Some(DecodedRecord::Udp(UdpRecord {
            meta,
            header_hex,
            payload_hex,
        })))
    }

    fn decode_dns(
        &self,
        cur: &mut ByteCursor<'_>,
        meta: PacketMeta,
    ) -> Result<DecodedRecord, DecodeError> {
        if cur.remaining() < DNS_HEADER_LEN {
            return Err(DecodeError::Truncated {
                needed: DNS_HEADER_LEN,
                available: cur.remaining(),
            });
        }
        let transaction_id = cur.read_u16_be()?;
        cur.skip(2)?; // flags
        let qdcount = cur.read_u16_be()?;
        let ancount = cur.read_u16_be()?;
        cur.skip(4)?; // nscount, arcount

        let mut queries = String::new();
        if qdcount > 0 {
            let mut name = String::new();
            loop {
                let label_len = cur.read_u8()? as usize;
                if label_len == 0 {
                    break;
                }
                let label = cur.read_bytes(label_len)?;
                name.push_str(&String::from_utf8_lossy(label));
                name.push('.');
            }
            if name.is_empty() {
                // Truncated or malformed input shows up as a nameless question.
                return Err(DecodeError::Malformed("empty DNS query name"));
            }
            let qtype = cur.read_u16_be()?;
            let qclass = cur.read_u16_be()?;
            queries = format!("{} {} {}", qtype, qclass, name);
        }

        Ok(DecodedRecord::Dns(DnsRecord {
            app_uid: self.app_uid,
            meta,
            transaction_id,
            qdcount,
            ancount,
            queries,
        }))
    }

    fn substitute_endpoints(&self, src_ip: IpAddr, dst_ip: IpAddr) -> (IpAddr, IpAddr) {
        let src = if src_ip == self.device_ip {
            self.proxy_ip
        } else {
            src_ip
        };
        let dst = if dst_ip == self.device_ip {
            self.proxy_ip
        } else {
            dst_ip
        };
        (src, dst)
    }
}
