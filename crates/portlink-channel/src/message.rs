//! Wire message model.
//!
//! Every message is a two-element array `[header, body]`. Headers are
//! positional arrays opened by a short type code; bodies are argument or
//! result arrays. The types here are named-field sum types that encode to
//! exactly that positional shape.

use serde_json::{json, Value};

use crate::error::{ChannelError, Result};

/// Reserved JSON-RPC 2.0 §5.1 error codes.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// Request message kinds with their wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// One-shot call expecting a correlated reply (`"pr"`).
    PromiseRequest,
    /// Cancellation of a promise request (`"pa"`).
    PromiseAbort,
    /// Fire-and-forget call registering a persistent listener (`"sr"`).
    SignalRequest,
    /// Deregistration of a signal listener (`"sa"`).
    SignalAbort,
}

impl RequestKind {
    pub fn code(self) -> &'static str {
        match self {
            RequestKind::PromiseRequest => "pr",
            RequestKind::PromiseAbort => "pa",
            RequestKind::SignalRequest => "sr",
            RequestKind::SignalAbort => "sa",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "pr" => Some(RequestKind::PromiseRequest),
            "pa" => Some(RequestKind::PromiseAbort),
            "sr" => Some(RequestKind::SignalRequest),
            "sa" => Some(RequestKind::SignalAbort),
            _ => None,
        }
    }
}

/// Response message kinds with their wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseKind {
    /// Successful reply (`"rs"`).
    ReturnSuccess,
    /// Failed reply carrying an error object (`"rf"`).
    ReturnFail,
    /// Successful port-transfer acknowledgement (`"ps"`).
    PortSuccess,
    /// Failed port-transfer acknowledgement (`"pf"`).
    PortFail,
}

impl ResponseKind {
    pub fn code(self) -> &'static str {
        match self {
            ResponseKind::ReturnSuccess => "rs",
            ResponseKind::ReturnFail => "rf",
            ResponseKind::PortSuccess => "ps",
            ResponseKind::PortFail => "pf",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "rs" => Some(ResponseKind::ReturnSuccess),
            "rf" => Some(ResponseKind::ReturnFail),
            "ps" => Some(ResponseKind::PortSuccess),
            "pf" => Some(ResponseKind::PortFail),
            _ => None,
        }
    }

    pub fn is_failure(self) -> bool {
        matches!(self, ResponseKind::ReturnFail | ResponseKind::PortFail)
    }
}

/// Header of a request message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeader {
    pub kind: RequestKind,
    pub seq_id: String,
    pub path: String,
    pub method: String,
    pub channel: Option<String>,
}

/// Header of a response message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeader {
    pub kind: ResponseKind,
    pub seq_id: String,
}

/// Either side of the wire conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Header {
    Request(RequestHeader),
    Response(ResponseHeader),
}

impl Header {
    pub fn seq_id(&self) -> &str {
        match self {
            Header::Request(h) => &h.seq_id,
            Header::Response(h) => &h.seq_id,
        }
    }
}

/// A complete wire message: `[header, body]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub header: Header,
    pub body: Vec<Value>,
}

impl Message {
    pub fn request(header: RequestHeader, body: Vec<Value>) -> Self {
        Self {
            header: Header::Request(header),
            body,
        }
    }

    pub fn response(kind: ResponseKind, seq_id: impl Into<String>, body: Vec<Value>) -> Self {
        Self {
            header: Header::Response(ResponseHeader {
                kind,
                seq_id: seq_id.into(),
            }),
            body,
        }
    }

    /// Encode to the positional wire value.
    pub fn to_value(&self) -> Value {
        let header = match &self.header {
            Header::Request(h) => {
                let mut fields = vec![
                    Value::String(h.kind.code().to_string()),
                    Value::String(h.seq_id.clone()),
                    Value::String(h.path.clone()),
                    Value::String(h.method.clone()),
                ];
                if let Some(channel) = &h.channel {
                    fields.push(Value::String(channel.clone()));
                }
                Value::Array(fields)
            }
            Header::Response(h) => json!([h.kind.code(), h.seq_id]),
        };
        Value::Array(vec![header, Value::Array(self.body.clone())])
    }

    /// Decode from the positional wire value.
    pub fn from_value(value: &Value) -> Result<Self> {
        let parts = value
            .as_array()
            .ok_or_else(|| ChannelError::Malformed("message is not an array".to_string()))?;
        if parts.len() != 2 {
            return Err(ChannelError::Malformed(format!(
                "expected [header, body], got {} elements",
                parts.len()
            )));
        }

        let header_fields = parts[0]
            .as_array()
            .ok_or_else(|| ChannelError::Malformed("header is not an array".to_string()))?;
        let code = header_fields
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| ChannelError::Malformed("missing header type code".to_string()))?;

        let header = if let Some(kind) = RequestKind::from_code(code) {
            Header::Request(RequestHeader {
                kind,
                seq_id: header_str(header_fields, 1, "seq_id")?,
                path: header_str(header_fields, 2, "path")?,
                method: header_str(header_fields, 3, "method")?,
                channel: header_fields.get(4).and_then(Value::as_str).map(String::from),
            })
        } else if let Some(kind) = ResponseKind::from_code(code) {
            Header::Response(ResponseHeader {
                kind,
                seq_id: header_str(header_fields, 1, "seq_id")?,
            })
        } else {
            return Err(ChannelError::Malformed(format!(
                "unknown header type code '{code}'"
            )));
        };

        let body = parts[1]
            .as_array()
            .cloned()
            .ok_or_else(|| ChannelError::Malformed("body is not an array".to_string()))?;

        Ok(Self { header, body })
    }
}

fn header_str(fields: &[Value], index: usize, name: &str) -> Result<String> {
    fields
        .get(index)
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| ChannelError::Malformed(format!("missing header field '{name}'")))
}

/// Error object carried in failure response bodies, JSON-RPC 2.0 flavored.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("remote error {code}: {message}")]
pub struct RemoteError {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

impl RemoteError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            codes::METHOD_NOT_FOUND,
            format!("method not found: {method}"),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL_ERROR, message)
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(codes::INVALID_PARAMS, message)
    }

    /// Encode as `{ jsonrpc, id, error: { code, message, data? } }`.
    pub fn to_value(&self, id: &str) -> Value {
        let mut error = json!({
            "code": self.code,
            "message": self.message,
        });
        if let Some(data) = &self.data {
            error["data"] = data.clone();
        }
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": error,
        })
    }

    /// Decode from a failure body element, tolerating unexpected shapes.
    pub fn from_value(value: Option<&Value>) -> Self {
        let Some(value) = value else {
            return Self::internal("empty error body");
        };

        if let Some(error) = value.get("error") {
            let code = error
                .get("code")
                .and_then(Value::as_i64)
                .unwrap_or(codes::INTERNAL_ERROR);
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown remote error")
                .to_string();
            let data = error.get("data").cloned();
            return Self {
                code,
                message,
                data,
            };
        }

        Self::internal(value.to_string())
    }
}

/// True for names shaped `on` + uppercase letter, e.g. `onData`.
pub fn is_event_method(name: &str) -> bool {
    name.strip_prefix("on")
        .and_then(|rest| rest.chars().next())
        .is_some_and(|c| c.is_ascii_uppercase())
}

/// True for capability-negotiation names carrying the `Options` suffix.
pub fn is_options_method(name: &str) -> bool {
    name.len() > "Options".len() && name.ends_with("Options")
}

/// True for the port-transfer call convention.
pub fn is_port_transfer_method(name: &str) -> bool {
    name == "assignPassingPort"
}
