use chrono::{DateTime, TimeZone, Utc};

/// One captured frame as handed off from the capture thread to the decoder.
///
/// Owned by the channel between the two stages and dropped as soon as decode
/// has run; nothing downstream holds raw frame bytes.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Capture timestamp, seconds part.
    pub ts_sec: i64,
    /// Capture timestamp, microseconds part.
    pub ts_usec: i64,
    /// Captured bytes, starting at the Ethernet header.
    pub data: Vec<u8>,
}

impl RawFrame {
    pub fn timestamp(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.ts_sec, (self.ts_usec as u32).saturating_mul(1000))
            .single()
            .unwrap_or_else(Utc::now)
    }

    /// Renders the capture timestamp in the storage column format,
    /// e.g. `2024-05-02 10:31:07.004213`.
    pub fn format_timestamp(&self) -> String {
        self.timestamp().format("%Y-%m-%d %H:%M:%S%.6f").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_timestamp_keeps_microseconds() {
        let frame = RawFrame {
            ts_sec: 1_700_000_000,
            ts_usec: 4_213,
            data: Vec::new(),
        };
        let rendered = frame.format_timestamp();
        assert!(rendered.ends_with(".004213"), "got {}", rendered);
    }

    #[test]
    fn test_out_of_range_timestamp_does_not_panic() {
        let frame = RawFrame {
            ts_sec: i64::MAX,
            ts_usec: 0,
            data: Vec::new(),
        };
        let _ = frame.format_timestamp();
    }
}
