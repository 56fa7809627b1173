use crate::protocol::catalog::{Catalog, DestinationSyncMode};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    ConnectionStatus,
    ConnectorSpec,
    Log,
    Record,
    Catalog,
    Control,
    Tracking,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::ConnectionStatus => "connection_status",
            MessageType::ConnectorSpec => "connector_spec",
            MessageType::Log => "log",
            MessageType::Record => "record",
            MessageType::Catalog => "catalog",
            MessageType::Control => "control",
            MessageType::Tracking => "tracking",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatusType {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub status: ConnectionStatusType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ConnectionStatus {
    pub fn succeeded() -> Self {
        Self {
            status: ConnectionStatusType::Succeeded,
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: ConnectionStatusType::Failed,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorSpecification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation_url: Option<String>,
    /// JSON schema of the connection spec blob.
    pub connection_specification: Value,
    #[serde(default)]
    pub supports_normalization: bool,
    #[serde(default)]
    pub supports_dbt: bool,
    #[serde(default)]
    pub supported_destination_sync_modes: Vec<DestinationSyncMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    pub fn is_error(&self) -> bool {
        matches!(self, LogLevel::Error | LogLevel::Fatal)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMessage {
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

impl LogMessage {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            name: None,
            stack_trace: None,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, message)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Build an error log from a failed client call, keeping the source chain
    /// in `stack_trace`.
    pub fn from_error(name: &str, err: &Error) -> Self {
        let mut chain = Vec::new();
        let mut source = std::error::Error::source(err);
        while let Some(s) = source {
            chain.push(s.to_string());
            source = s.source();
        }
        Self {
            level: LogLevel::Error,
            message: err.to_string(),
            name: Some(name.to_string()),
            stack_trace: (!chain.is_empty()).then(|| chain.join("\ncaused by: ")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMessage {
    pub data: Map<String, Value>,
    pub emitted_at: DateTime<Utc>,
}

impl RecordMessage {
    pub fn new(data: Map<String, Value>) -> Self {
        Self {
            data,
            emitted_at: Utc::now(),
        }
    }

    /// Build a record from a JSON value; non-object values are rejected.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(data) => Ok(Self::new(data)),
            other => Err(Error::InvalidInput(format!(
                "record data must be a JSON object, got {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlType {
    FullRefresh,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    #[serde(rename = "type")]
    pub control_type: ControlType,
    pub status: ConnectionStatusType,
    pub emitted_at: DateTime<Utc>,
    #[serde(default)]
    pub meta: Value,
}

impl ControlMessage {
    pub fn full_refresh(status: ConnectionStatusType, meta: Value) -> Self {
        Self {
            control_type: ControlType::FullRefresh,
            status,
            emitted_at: Utc::now(),
            meta,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == ConnectionStatusType::Succeeded
    }
}

/// Per-write outcome reported by destinations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackingMessage {
    #[serde(default)]
    pub success: u64,
    #[serde(default)]
    pub failed: u64,
    #[serde(default)]
    pub meta: Value,
    #[serde(default)]
    pub logs: Vec<LogMessage>,
}

impl TrackingMessage {
    pub fn succeeded(count: u64) -> Self {
        Self {
            success: count,
            ..Default::default()
        }
    }

    pub fn failed(count: u64, log: LogMessage) -> Self {
        Self {
            failed: count,
            logs: vec![log],
            ..Default::default()
        }
    }

    /// The first error-level log, if any.
    pub fn first_error(&self) -> Option<&LogMessage> {
        self.logs.iter().find(|l| l.level.is_error())
    }

    pub fn merge(&mut self, other: TrackingMessage) {
        self.success += other.success;
        self.failed += other.failed;
        self.logs.extend(other.logs);
    }
}

/// Tagged envelope for everything a connector client produces.
///
/// On the wire: `{"type": "<tag>", "<tag>": {...}}`. Exactly one payload field
/// may be populated and it must match the tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireMessage", into = "WireMessage")]
pub enum ProtocolMessage {
    ConnectionStatus(ConnectionStatus),
    ConnectorSpec(ConnectorSpecification),
    Log(LogMessage),
    Record(RecordMessage),
    Catalog(Catalog),
    Control(ControlMessage),
    Tracking(TrackingMessage),
}

impl ProtocolMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            ProtocolMessage::ConnectionStatus(_) => MessageType::ConnectionStatus,
            ProtocolMessage::ConnectorSpec(_) => MessageType::ConnectorSpec,
            ProtocolMessage::Log(_) => MessageType::Log,
            ProtocolMessage::Record(_) => MessageType::Record,
            ProtocolMessage::Catalog(_) => MessageType::Catalog,
            ProtocolMessage::Control(_) => MessageType::Control,
            ProtocolMessage::Tracking(_) => MessageType::Tracking,
        }
    }

    /// Returns the log payload when this is an error-level log message.
    pub fn as_error_log(&self) -> Option<&LogMessage> {
        match self {
            ProtocolMessage::Log(log) if log.level.is_error() => Some(log),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::json("encode protocol message", e))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::InvalidInput(format!("protocol message: {e}")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(rename = "type")]
    message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    connection_status: Option<ConnectionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    connector_spec: Option<ConnectorSpecification>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    log: Option<LogMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    record: Option<RecordMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    catalog: Option<Catalog>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    control: Option<ControlMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tracking: Option<TrackingMessage>,
}

impl WireMessage {
    fn empty(message_type: MessageType) -> Self {
        Self {
            message_type,
            connection_status: None,
            connector_spec: None,
            log: None,
            record: None,
            catalog: None,
            control: None,
            tracking: None,
        }
    }

    fn populated(&self) -> Vec<MessageType> {
        let mut out = Vec::new();
        if self.connection_status.is_some() {
            out.push(MessageType::ConnectionStatus);
        }
        if self.connector_spec.is_some() {
            out.push(MessageType::ConnectorSpec);
        }
        if self.log.is_some() {
            out.push(MessageType::Log);
        }
        if self.record.is_some() {
            out.push(MessageType::Record);
        }
        if self.catalog.is_some() {
            out.push(MessageType::Catalog);
        }
        if self.control.is_some() {
            out.push(MessageType::Control);
        }
        if self.tracking.is_some() {
            out.push(MessageType::Tracking);
        }
        out
    }
}

impl TryFrom<WireMessage> for ProtocolMessage {
    type Error = Error;

    fn try_from(wire: WireMessage) -> Result<Self> {
        let populated = wire.populated();
        if populated != [wire.message_type] {
            let found: Vec<&str> = populated.iter().map(MessageType::as_str).collect();
            return Err(Error::InvalidInput(format!(
                "message of type {} must carry exactly the {} payload, found [{}]",
                wire.message_type.as_str(),
                wire.message_type.as_str(),
                found.join(", ")
            )));
        }

        let missing = || Error::InvalidInput("payload missing".to_string());
        Ok(match wire.message_type {
            MessageType::ConnectionStatus => {
                ProtocolMessage::ConnectionStatus(wire.connection_status.ok_or_else(missing)?)
            }
            MessageType::ConnectorSpec => {
                ProtocolMessage::ConnectorSpec(wire.connector_spec.ok_or_else(missing)?)
            }
            MessageType::Log => ProtocolMessage::Log(wire.log.ok_or_else(missing)?),
            MessageType::Record => ProtocolMessage::Record(wire.record.ok_or_else(missing)?),
            MessageType::Catalog => ProtocolMessage::Catalog(wire.catalog.ok_or_else(missing)?),
            MessageType::Control => ProtocolMessage::Control(wire.control.ok_or_else(missing)?),
            MessageType::Tracking => ProtocolMessage::Tracking(wire.tracking.ok_or_else(missing)?),
        })
    }
}

impl From<ProtocolMessage> for WireMessage {
    fn from(message: ProtocolMessage) -> Self {
        let mut wire = WireMessage::empty(message.message_type());
        match message {
            ProtocolMessage::ConnectionStatus(m) => wire.connection_status = Some(m),
            ProtocolMessage::ConnectorSpec(m) => wire.connector_spec = Some(m),
            ProtocolMessage::Log(m) => wire.log = Some(m),
            ProtocolMessage::Record(m) => wire.record = Some(m),
            ProtocolMessage::Catalog(m) => wire.catalog = Some(m),
            ProtocolMessage::Control(m) => wire.control = Some(m),
            ProtocolMessage::Tracking(m) => wire.tracking = Some(m),
        }
        wire
    }
}
