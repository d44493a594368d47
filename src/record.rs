//! Uniform record shape shared by polled data and notifications
//!
//! The SNMP adapters hand over [`VarBinding`]s in a protocol-agnostic form. The
//! functions in this module turn them into [`Record`]s, the only shape that is
//! ever forwarded to the event collector.

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;

use serde::Serialize;

/// A value as decoded from the wire
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    Integer(i64),
    /// Counter32, Gauge32 and Counter64
    Unsigned(u64),
    TimeTicks(u32),
    OctetString(Vec<u8>),
    ObjectIdentifier(String),
    IpAddress(Ipv4Addr),
    Null,
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
    /// Any wire type without a dedicated variant, already rendered as text
    Other(String),
}

impl WireValue {
    /// The agent answered, but has no value for the requested object.
    pub fn is_absent(&self) -> bool {
        matches!(
            self,
            WireValue::NoSuchObject | WireValue::NoSuchInstance | WireValue::EndOfMibView
        )
    }
}

impl fmt::Display for WireValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireValue::Integer(value) => write!(f, "{value}"),
            WireValue::Unsigned(value) => write!(f, "{value}"),
            WireValue::TimeTicks(value) => write!(f, "{value}"),
            WireValue::OctetString(bytes) => write!(f, "{}", String::from_utf8_lossy(bytes)),
            WireValue::ObjectIdentifier(oid) => write!(f, "{oid}"),
            WireValue::IpAddress(addr) => write!(f, "{addr}"),
            WireValue::Null => write!(f, "null"),
            WireValue::NoSuchObject => write!(f, "noSuchObject"),
            WireValue::NoSuchInstance => write!(f, "noSuchInstance"),
            WireValue::EndOfMibView => write!(f, "endOfMibView"),
            WireValue::Other(text) => write!(f, "{text}"),
        }
    }
}

/// One OID/value pair returned by a device or carried in a notification
#[derive(Debug, Clone, PartialEq)]
pub struct VarBinding {
    pub oid: String,
    pub value: WireValue,
}

impl VarBinding {
    pub fn new(oid: impl Into<String>, value: WireValue) -> Self {
        Self {
            oid: oid.into(),
            value,
        }
    }
}

/// JSON scalar stored in a record
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    Integer(i64),
    Unsigned(u64),
    Text(String),
    Null,
}

impl Scalar {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Keep numbers numeric; everything else becomes text.
    fn from_wire(value: &WireValue) -> Scalar {
        match value {
            WireValue::Integer(value) => Scalar::Integer(*value),
            WireValue::Unsigned(value) => Scalar::Unsigned(*value),
            WireValue::TimeTicks(value) => Scalar::Unsigned(u64::from(*value)),
            WireValue::OctetString(bytes) => Scalar::Text(octets_to_text(bytes)),
            WireValue::Null => Scalar::Null,
            other => Scalar::Text(other.to_string()),
        }
    }
}

/// Printable strings stay readable, binary strings (MAC addresses, ...) become hex.
fn octets_to_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) if !text.chars().any(|c| c.is_control() && !c.is_whitespace()) => {
            text.to_string()
        }
        _ => bytes
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect::<Vec<_>>()
            .join(":"),
    }
}

/// A normalized event, serialized as `{"ip", "name", "values"}`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub ip: String,
    pub name: String,
    pub values: BTreeMap<String, Scalar>,
}

/// Device answers drop the leading dot some tools write in front of an OID.
pub fn canonical_oid(oid: &str) -> &str {
    oid.trim().trim_start_matches('.')
}

/// Convert the answer of one device into a record.
///
/// Only configured OIDs end up in `values`, keyed by their label. Objects the
/// device reports as absent are left out.
pub fn normalize_poll(
    ip: &str,
    name: &str,
    bindings: &[VarBinding],
    labels: &BTreeMap<String, String>,
) -> Record {
    let labels: BTreeMap<&str, &str> = labels
        .iter()
        .map(|(oid, label)| (canonical_oid(oid), label.as_str()))
        .collect();

    let values = bindings
        .iter()
        .filter(|binding| !binding.value.is_absent())
        .filter_map(|binding| {
            labels
                .get(canonical_oid(&binding.oid))
                .map(|label| (label.to_string(), Scalar::from_wire(&binding.value)))
        })
        .collect();

    Record {
        ip: ip.to_string(),
        name: name.to_string(),
        values,
    }
}

/// Convert an inbound notification into a record.
///
/// Only the last variable binding is used as payload; producers put the
/// message there by convention.
pub fn normalize_notification(ip: &str, name: &str, bindings: &[VarBinding]) -> Record {
    let mut values = BTreeMap::new();

    if let Some(payload) = bindings.last() {
        values.insert("oid".to_string(), Scalar::Text(payload.oid.clone()));
        values.insert("value".to_string(), Scalar::Text(render_payload(&payload.value)));
    }

    Record {
        ip: ip.to_string(),
        name: name.to_string(),
        values,
    }
}

fn render_payload(value: &WireValue) -> String {
    match value {
        WireValue::OctetString(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        WireValue::ObjectIdentifier(oid) => oid.clone(),
        other => other.to_string(),
    }
}
