use serde::Serialize;
use serde_json::Value;

use crate::error_handling::types::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Request,
    Response,
}

/// One logical HTTP exchange, keyed by `flow_id`.
#[derive(Debug, Clone, Serialize)]
pub struct HttpFlow {
    pub flow_id: String,
    pub app_uid: i64,
    pub protocol: String,
    pub top_protocol: String,
    pub src_ip: String,
    pub src_port: u16,
    pub dst_ip: String,
    pub dst_port: u16,
    pub http_version: String,
    pub host: String,
    pub url: String,
    pub method: String,
    pub status: i64,
    pub content_type: String,
    pub start_time: String,
}

/// One direction of an HTTP exchange as published on the bus.
#[derive(Debug, Clone, Serialize)]
pub struct HttpMessage {
    pub flow_id: String,
    pub direction: Direction,
    pub headers: Value,
    pub body: String,
    pub content_type: String,
    pub length: i64,
    pub timestamp: String,
    pub top_protocol: String,
}

/// A packet event plus the flow-level fields it may contribute to the
/// flow entry it belongs to.
#[derive(Debug, Clone)]
pub struct PacketEvent {
    pub message: HttpMessage,
    pub method: Option<String>,
    pub url: Option<String>,
    pub status_code: Option<i64>,
}

#[derive(Debug, Clone)]
pub enum BusEvent {
    FlowInfo(HttpFlow),
    Packet(PacketEvent),
}

fn str_field(v: &Value, key: &str) -> String {
    v.get(key).and_then(Value::as_str).unwrap_or("").to_string()
}

fn int_field(v: &Value, key: &str) -> i64 {
    v.get(key).and_then(Value::as_i64).unwrap_or(0)
}

fn port_field(v: &Value, key: &str) -> u16 {
    // Out-of-range ports from a misbehaving publisher become 0, not a
    // wrapped value.
    u16::try_from(int_field(v, key)).unwrap_or(0)
}

impl BusEvent {
    /// Parses one bus message. Messages without a `flow_id` cannot be
    /// correlated and are rejected; missing descriptive fields default to
    /// empty rather than failing the whole message.
    pub fn from_json(raw: &str) -> Result<BusEvent, ParseError> {
        let v: Value =
            serde_json::from_str(raw).map_err(|e| ParseError::InvalidJson(e.to_string()))?;

        let flow_id = str_field(&v, "flow_id");
        if flow_id.is_empty() {
            return Err(ParseError::MissingFlowId);
        }

        if v.get("type").and_then(Value::as_str) == Some("flow_info") {
            return Ok(BusEvent::FlowInfo(HttpFlow {
                flow_id,
                app_uid: int_field(&v, "app_uid"),
                protocol: str_field(&v, "protocol"),
                top_protocol: str_field(&v, "top_protocol"),
                src_ip: str_field(&v, "src_ip"),
                src_port: port_field(&v, "src_port"),
                dst_ip: str_field(&v, "dst_ip"),
                dst_port: port_field(&v, "dst_port"),
                http_version: str_field(&v, "http_version"),
                host: str_field(&v, "host"),
                url: str_field(&v, "url"),
                method: str_field(&v, "method"),
                status: int_field(&v, "status"),
                content_type: str_field(&v, "content_type"),
                start_time: str_field(&v, "start_time"),
            }));
        }

        let direction = match v.get("direction").and_then(Value::as_str) {
            Some("request") => Direction::Request,
            Some("response") => Direction::Response,
            other => return Err(ParseError::BadDirection(other.unwrap_or("").to_string())),
        };

        // The publisher carries the body under `info`; accept `body` too.
        let body = match v.get("info").and_then(Value::as_str) {
            Some(info) => info.to_string(),
            None => str_field(&v, "body"),
        };
        let message = HttpMessage {
            flow_id,
            direction,
            headers: v.get("headers").cloned().unwrap_or(Value::Null),
            body,
            content_type: str_field(&v, "content_type"),
            length: int_field(&v, "length"),
            timestamp: str_field(&v, "timestamp"),
            top_protocol: str_field(&v, "top_protocol"),
        };
        let method = v
            .get("method")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .map(str::to_string);
        let url = v
            .get("url")
            .and_then(Value::as_str)
            .filter(|u| !u.is_empty())
            .map(str::to_string);
        let status_code = v.get("status_code").and_then(Value::as_i64);

        Ok(BusEvent::Packet(PacketEvent {
            message,
            method,
            url,
            status_code,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_info_parses() {
        let raw = r#"{"type":"flow_info","flow_id":"f-1","protocol":"TCP",
            "top_protocol":"HTTP","src_ip":"10.0.0.5","src_port":1234,
            "dst_ip":"93.1.1.1","dst_port":80,"http_version":"HTTP/1.1",
            "host":"example.com","url":"/index.html","method":"GET",
            "status":200,"content_type":"text/html","start_time":"2024-01-01T00:00:00Z"}"#;
        match BusEvent::from_json(raw).unwrap() {
            BusEvent::FlowInfo(flow) => {
                assert_eq!(flow.flow_id, "f-1");
                assert_eq!(flow.method, "GET");
                assert_eq!(flow.status, 200);
                assert_eq!(flow.dst_port, 80);
            }
            other => panic!("expected flow_info, got {:?}", other),
        }
    }

    #[test]
    fn test_packet_parses_with_defaults() {
        let raw = r#"{"flow_id":"f-2","direction":"response","status_code":404}"#;
        match BusEvent::from_json(raw).unwrap() {
            BusEvent::Packet(pkt) => {
                assert_eq!(pkt.message.direction, Direction::Response);
                assert_eq!(pkt.status_code, Some(404));
                assert!(pkt.method.is_none());
                assert_eq!(pkt.message.body, "");
            }
            other => panic!("expected packet, got {:?}", other),
        }

        // The body travels in the `info` field.
        let raw = r#"{"flow_id":"f-9","direction":"request","info":"hello=world"}"#;
        match BusEvent::from_json(raw).unwrap() {
            BusEvent::Packet(pkt) => assert_eq!(pkt.message.body, "hello=world"),
            other => panic!("expected packet, got {:?}", other),
        }
    }

    #[test]
    fn test_out_of_range_port_becomes_zero() {
        let raw = r#"{"type":"flow_info","flow_id":"f-5","src_port":70000,"dst_port":-1}"#;
        match BusEvent::from_json(raw).unwrap() {
            BusEvent::FlowInfo(flow) => {
                assert_eq!(flow.src_port, 0);
                assert_eq!(flow.dst_port, 0);
            }
            other => panic!("expected flow_info, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_flow_id_rejected() {
        let raw = r#"{"direction":"request","method":"GET"}"#;
        assert!(matches!(
            BusEvent::from_json(raw),
            Err(ParseError::MissingFlowId)
        ));
        let raw = r#"{"flow_id":"","direction":"request"}"#;
        assert!(matches!(
            BusEvent::from_json(raw),
            Err(ParseError::MissingFlowId)
        ));
    }

    #[test]
    fn test_bad_direction_rejected() {
        let raw = r#"{"flow_id":"f-3","direction":"sideways"}"#;
        assert!(matches!(
            BusEvent::from_json(raw),
            Err(ParseError::BadDirection(_))
        ));
    }

    #[test]
    fn test_invalid_json_rejected() {
        assert!(matches!(
            BusEvent::from_json("not json"),
            Err(ParseError::InvalidJson(_))
        ));
    }
}
