pub mod cursor;
pub mod decoder;
pub mod types;

pub use decoder::PacketDecoder;
pub use types::{DecodedRecord, DnsRecord, PacketMeta, TcpFlags, TcpRecord, UdpRecord};
