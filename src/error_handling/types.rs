use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    BadIpFormatting(String),
    BadThreshold(String),
    NotInRange(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::BadIpFormatting(e) => write!(f, "IP formatting error: {}", e),
            ConfigError::BadThreshold(e) => write!(f, "Threshold error: {}", e),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

#[derive(Debug)]
pub enum CaptureError {
    DeviceUnavailable(String),
    FilterRejected(String),
    ChannelClosed,
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::DeviceUnavailable(e) => write!(f, "Capture device unavailable: {}", e),
            CaptureError::FilterRejected(e) => write!(f, "Capture filter rejected: {}", e),
            CaptureError::ChannelClosed => write!(f, "Frame channel closed"),
        }
    }
}

impl std::error::Error for CaptureError {}

/// Decode failures stay local to the decode boundary: the owning thread logs
/// them at debug level and drops the frame, it never propagates them.
#[derive(Debug, PartialEq, Eq)]
pub enum DecodeError {
    Truncated { needed: usize, available: usize },
    Malformed(&'static str),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Truncated { needed, available } => {
                write!(
                    f,
                    "Truncated frame: needed {} byte(s), {} available",
                    needed, available
                )
            }
            DecodeError::Malformed(e) => write!(f, "Malformed frame: {}", e),
        }
    }
}

impl std::error::Error for DecodeError {}

#[derive(Debug)]
pub enum BusError {
    ConnectFailed(std::io::Error),
    ReadFailed(std::io::Error),
    Disconnected,
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::ConnectFailed(e) => write!(f, "Bus connect failed: {}", e),
            BusError::ReadFailed(e) => write!(f, "Bus read failed: {}", e),
            BusError::Disconnected => write!(f, "Bus disconnected"),
        }
    }
}

impl std::error::Error for BusError {}

/// A bus message that cannot be turned into an event. The message is dropped
/// with a warning and the consuming loop continues.
#[derive(Debug)]
pub enum ParseError {
    InvalidJson(String),
    MissingFlowId,
    BadDirection(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::InvalidJson(e) => write!(f, "Invalid JSON: {}", e),
            ParseError::MissingFlowId => write!(f, "Missing or empty flow_id"),
            ParseError::BadDirection(d) => write!(f, "Unknown direction: {:?}", d),
        }
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug)]
pub enum StorageError {
    ConnectionFailed,
    WriteFailed,
    ReadFailed,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ConnectionFailed => write!(f, "Storage connection failed"),
            StorageError::WriteFailed => write!(f, "Storage write failed"),
            StorageError::ReadFailed => write!(f, "Storage read failed"),
        }
    }
}

impl std::error::Error for StorageError {}

#[derive(Debug)]
pub enum ControllerError {
    ConfigurationError(ConfigError),
    CaptureError(CaptureError),
    BusError(BusError),
    StorageError(StorageError),
    InitializationFailed(String),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::ConfigurationError(e) => write!(f, "Configuration error: {}", e),
            ControllerError::CaptureError(e) => write!(f, "Capture error: {}", e),
            ControllerError::BusError(e) => write!(f, "Bus error: {}", e),
            ControllerError::StorageError(e) => write!(f, "Storage error: {}", e),
            ControllerError::InitializationFailed(e) => write!(f, "Initialization failed: {}", e),
        }
    }
}

impl std::error::Error for ControllerError {}
