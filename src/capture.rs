pub mod capturer;
pub mod types;

pub use capturer::Capturer;
pub use types::RawFrame;
