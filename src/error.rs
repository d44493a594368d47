//! Error types for collection, notification and delivery

use std::fmt;
use std::time::Duration;

/// Why a single device could not be collected during a poll cycle
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionError {
    /// The configured port is not a valid UDP port
    InvalidPort(String),

    /// The configured SNMP version is neither v2c nor v3
    UnsupportedVersion(String),

    /// Session setup with the device failed
    Connect(String),

    /// The GET request failed or was answered with an error
    Query(String),

    /// The device did not finish within the per-task timeout
    Timeout(Duration),

    /// The collection task panicked or was cancelled
    Aborted(String),
}

impl fmt::Display for CollectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionError::InvalidPort(port) => write!(f, "invalid snmp port {port:?}"),
            CollectionError::UnsupportedVersion(version) => {
                write!(f, "snmp version {version:?} not supported")
            }
            CollectionError::Connect(msg) => write!(f, "connect failed: {msg}"),
            CollectionError::Query(msg) => write!(f, "get failed: {msg}"),
            CollectionError::Timeout(timeout) => {
                write!(f, "no response within {}s", timeout.as_secs_f32())
            }
            CollectionError::Aborted(msg) => write!(f, "collection task aborted: {msg}"),
        }
    }
}

impl std::error::Error for CollectionError {}

/// Failure while receiving a single inbound notification
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationError {
    /// The packet could not be decoded or authenticated; only this packet is lost
    Decode(String),

    /// The underlying socket failed; the receive loop cannot continue
    Transport(String),
}

impl fmt::Display for NotificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationError::Decode(msg) => write!(f, "failed to decode notification: {msg}"),
            NotificationError::Transport(msg) => write!(f, "notification transport error: {msg}"),
        }
    }
}

impl std::error::Error for NotificationError {}

/// The notification listener could not be started
#[derive(Debug, Clone, PartialEq)]
pub enum ListenerError {
    /// A principal could not be added to the credentials table
    Principal { name: String, reason: String },

    /// Binding the UDP socket failed
    Bind(String),
}

impl fmt::Display for ListenerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerError::Principal { name, reason } => {
                write!(f, "failed to register trap user {name}: {reason}")
            }
            ListenerError::Bind(msg) => write!(f, "failed to bind trap listener: {msg}"),
        }
    }
}

impl std::error::Error for ListenerError {}

/// A delivery to the event collector did not succeed
#[derive(Debug)]
pub enum DeliveryError {
    /// The endpoint URL uses neither http nor https
    UnsupportedScheme(String),

    /// The endpoint URL could not be parsed
    InvalidUrl(String),

    /// The envelope could not be serialized
    Serialization(serde_json::Error),

    /// The request never produced a response (connect, TLS, timeout, ...)
    Request(reqwest::Error),

    /// The collector answered with a status outside 200-299
    Status { status: u16, body: String },
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryError::UnsupportedScheme(scheme) => {
                write!(f, "url scheme not supported: {scheme}")
            }
            DeliveryError::InvalidUrl(msg) => write!(f, "error parsing URL: {msg}"),
            DeliveryError::Serialization(err) => write!(f, "creating json data failed: {err}"),
            DeliveryError::Request(err) => write!(f, "HTTP request failed: {err}"),
            DeliveryError::Status { status, body } => {
                write!(f, "POST request failed with status {status} and message: {body}")
            }
        }
    }
}

impl std::error::Error for DeliveryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DeliveryError::Serialization(err) => Some(err),
            DeliveryError::Request(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for DeliveryError {
    fn from(err: serde_json::Error) -> Self {
        DeliveryError::Serialization(err)
    }
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        DeliveryError::Request(err)
    }
}
