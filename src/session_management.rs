pub mod aggregator;
pub mod types;

pub use aggregator::SessionAggregator;
pub use types::{SessionKey, SessionRecord};
