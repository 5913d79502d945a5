use std::fmt;

use uuid::Uuid;

/// Discriminant of an [`RpcMessage`], as written in the first body byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Request = 0,
    Response = 1,
    KeepAlive = 2,
}

impl MessageType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Request),
            1 => Ok(Self::Response),
            2 => Ok(Self::KeepAlive),
            other => Err(other),
        }
    }
}

/// Correlation identifier linking a request to its response.
///
/// On the wire the id is written in the mixed-endian GUID layout
/// (`Uuid::to_bytes_le`), so peers that produce ids from a standard GUID
/// type read the same value back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Create a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn nil() -> Self {
        Self(Uuid::nil())
    }

    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn to_wire_bytes(&self) -> [u8; 16] {
        self.0.to_bytes_le()
    }

    pub fn from_wire_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes_le(bytes))
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Callee-side failure carried back to the caller in place of a value.
///
/// Only the error text crosses the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFault {
    pub error_text: String,
}

impl RemoteFault {
    pub fn new(error_text: impl Into<String>) -> Self {
        Self {
            error_text: error_text.into(),
        }
    }
}

impl fmt::Display for RemoteFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.error_text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub service_name: String,
    pub method_name: String,
    pub message_id: MessageId,
    /// One serialized buffer per call argument, in declaration order.
    pub args: Vec<Vec<u8>>,
}

impl Request {
    pub fn new(
        service_name: impl Into<String>,
        method_name: impl Into<String>,
        message_id: MessageId,
        args: Vec<Vec<u8>>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            method_name: method_name.into(),
            message_id,
            args,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub service_name: String,
    pub method_name: String,
    pub message_id: MessageId,
    /// Serialized return value; `None` for a call that returned nothing.
    pub payload: Option<Vec<u8>>,
    pub fault: Option<RemoteFault>,
}

impl Response {
    /// Successful reply to `request`, echoing its target and id.
    pub fn success(request: &Request, payload: Option<Vec<u8>>) -> Self {
        Self {
            service_name: request.service_name.clone(),
            method_name: request.method_name.clone(),
            message_id: request.message_id,
            payload,
            fault: None,
        }
    }

    /// Fault reply to `request`; carries no payload.
    pub fn fault(request: &Request, error_text: impl Into<String>) -> Self {
        Self {
            service_name: request.service_name.clone(),
            method_name: request.method_name.clone(),
            message_id: request.message_id,
            payload: None,
            fault: Some(RemoteFault::new(error_text)),
        }
    }

    pub fn is_fault(&self) -> bool {
        self.fault.is_some()
    }
}

/// One unit on the wire.
///
/// Request arguments and response payload/fault live in separate variants,
/// so a message can never carry both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcMessage {
    Request(Request),
    Response(Response),
    KeepAlive,
}

impl RpcMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            RpcMessage::Request(_) => MessageType::Request,
            RpcMessage::Response(_) => MessageType::Response,
            RpcMessage::KeepAlive => MessageType::KeepAlive,
        }
    }

    /// Correlation id, `None` for keep-alives.
    pub fn message_id(&self) -> Option<MessageId> {
        match self {
            RpcMessage::Request(request) => Some(request.message_id),
            RpcMessage::Response(response) => Some(response.message_id),
            RpcMessage::KeepAlive => None,
        }
    }

    pub fn is_keep_alive(&self) -> bool {
        matches!(self, RpcMessage::KeepAlive)
    }
}

impl From<Request> for RpcMessage {
    fn from(request: Request) -> Self {
        RpcMessage::Request(request)
    }
}

impl From<Response> for RpcMessage {
    fn from(response: Response) -> Self {
        RpcMessage::Response(response)
    }
}
