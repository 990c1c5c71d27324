use crate::decode::types::DnsRecord;
use crate::error_handling::types::StorageError;
use crate::flow_reconstruction::types::{HttpFlow, HttpMessage};
use crate::session_management::types::SessionRecord;

/// Persistence seam for everything the pipeline emits. Implementations must
/// be safe to call from multiple tasks; methods are synchronous and are
/// expected to be cheap enough to run on the caller's thread.
pub trait Storage: Send + Sync {
    /// Persists a session, merging counters if the session id already exists.
    fn insert_or_update_session(&self, session: &SessionRecord) -> Result<(), StorageError>;

    fn insert_dns_record(&self, record: &DnsRecord) -> Result<(), StorageError>;

    fn insert_http_flow(&self, flow: &HttpFlow) -> Result<(), StorageError>;

    fn insert_http_packet(&self, packet: &HttpMessage) -> Result<(), StorageError>;
}
