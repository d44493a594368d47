//! SNMP access behind narrow capability traits
//!
//! The poll orchestrator and the notification listener only know
//! [`SnmpConnector`], [`SnmpSession`] and [`NotificationSource`]. The
//! implementations at the bottom of this module adapt them to `async-snmp`;
//! tests plug in fakes.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use async_snmp::notification::oids;
use async_snmp::{Auth, Notification, NotificationReceiver, Oid, UdpClient, Value, VarBind};
use async_trait::async_trait;
use tracing::{debug, trace};

use crate::config::{AuthProtocol, DeviceDescriptor, Principal, PrivProtocol};
use crate::error::{CollectionError, ListenerError, NotificationError};
use crate::record::{VarBinding, WireValue, canonical_oid};

/// Minimum USM passphrase length (RFC 3414, section 11.2)
const MIN_PASSPHRASE_LEN: usize = 8;

/// How a session authenticates against a device
#[derive(Debug, Clone, PartialEq)]
pub enum SnmpSecurity {
    /// SNMPv2c
    Community(String),

    /// SNMPv3 user-based security model
    Usm {
        user: String,
        auth: Option<(AuthProtocol, String)>,
        privacy: Option<(PrivProtocol, String)>,
    },
}

/// Everything needed to open a session with one device
#[derive(Debug, Clone, PartialEq)]
pub struct SessionParams {
    /// `host:port`
    pub target: String,
    pub security: SnmpSecurity,
}

impl SessionParams {
    /// Resolve the version specific session settings of a device.
    pub fn from_descriptor(device: &DeviceDescriptor) -> Result<Self, CollectionError> {
        let port: u16 = device
            .port
            .trim()
            .parse()
            .map_err(|_| CollectionError::InvalidPort(device.port.clone()))?;

        let security = match device.version.trim() {
            "2" | "2c" => SnmpSecurity::Community(device.community.clone()),
            "3" => {
                let auth = (!device.auth_passphrase.is_empty())
                    .then(|| (device.auth_protocol, device.auth_passphrase.clone()));
                // privacy without authentication is not a valid security level
                let privacy = (auth.is_some() && !device.priv_passphrase.is_empty())
                    .then(|| (device.priv_protocol, device.priv_passphrase.clone()));

                SnmpSecurity::Usm {
                    user: device.user.clone(),
                    auth,
                    privacy,
                }
            }
            other => return Err(CollectionError::UnsupportedVersion(other.to_string())),
        };

        let target = match device.ip.parse::<IpAddr>() {
            Ok(addr) => SocketAddr::new(addr, port).to_string(),
            Err(_) => format!("{}:{port}", device.ip),
        };

        Ok(Self { target, security })
    }
}

/// Opens request/response sessions with devices
#[async_trait]
pub trait SnmpConnector: Send + Sync {
    async fn connect(
        &self,
        params: &SessionParams,
        timeout: Duration,
    ) -> Result<Box<dyn SnmpSession>, CollectionError>;
}

/// An open session with a single device
#[async_trait]
pub trait SnmpSession: Send + Sync {
    /// Fetch all `oids` in one batched GET.
    async fn get(&self, oids: &[String]) -> Result<Vec<VarBinding>, CollectionError>;
}

/// A decoded notification together with the address it came from
#[derive(Debug, Clone, PartialEq)]
pub struct InboundNotification {
    pub peer: SocketAddr,
    pub bindings: Vec<VarBinding>,
}

/// Long-lived stream of inbound notifications
#[async_trait]
pub trait NotificationSource: Send {
    async fn recv(&mut self) -> Result<InboundNotification, NotificationError>;
}

/// Check a principal before it is added to the credentials table.
pub fn validate_principal(principal: &Principal) -> Result<(), ListenerError> {
    let reject = |reason: &str| {
        Err(ListenerError::Principal {
            name: principal.name.clone(),
            reason: reason.to_string(),
        })
    };

    if principal.name.is_empty() {
        return reject("empty user name");
    }
    if principal.auth_passphrase.is_empty() && !principal.priv_passphrase.is_empty() {
        return reject("privacy requires authentication");
    }
    if !principal.auth_passphrase.is_empty() && principal.auth_passphrase.len() < MIN_PASSPHRASE_LEN
    {
        return reject("authentication passphrase is shorter than 8 characters");
    }
    if !principal.priv_passphrase.is_empty() && principal.priv_passphrase.len() < MIN_PASSPHRASE_LEN
    {
        return reject("privacy passphrase is shorter than 8 characters");
    }

    Ok(())
}

fn auth_protocol(protocol: AuthProtocol) -> async_snmp::AuthProtocol {
    match protocol {
        AuthProtocol::Md5 => async_snmp::AuthProtocol::Md5,
        AuthProtocol::Sha => async_snmp::AuthProtocol::Sha1,
        AuthProtocol::Sha224 => async_snmp::AuthProtocol::Sha224,
        AuthProtocol::Sha256 => async_snmp::AuthProtocol::Sha256,
        AuthProtocol::Sha384 => async_snmp::AuthProtocol::Sha384,
        AuthProtocol::Sha512 => async_snmp::AuthProtocol::Sha512,
    }
}

fn priv_protocol(protocol: PrivProtocol) -> async_snmp::PrivProtocol {
    match protocol {
        PrivProtocol::Des => async_snmp::PrivProtocol::Des,
        PrivProtocol::Aes => async_snmp::PrivProtocol::Aes128,
        PrivProtocol::Aes192 => async_snmp::PrivProtocol::Aes192,
        PrivProtocol::Aes256 => async_snmp::PrivProtocol::Aes256,
    }
}

fn wire_value(value: &Value) -> WireValue {
    match value {
        Value::Integer(value) => WireValue::Integer(i64::from(*value)),
        Value::Counter32(value) | Value::Gauge32(value) => WireValue::Unsigned(u64::from(*value)),
        Value::Counter64(value) => WireValue::Unsigned(*value),
        Value::TimeTicks(value) => WireValue::TimeTicks(*value),
        Value::OctetString(bytes) => WireValue::OctetString(bytes.to_vec()),
        Value::ObjectIdentifier(oid) => WireValue::ObjectIdentifier(oid.to_string()),
        Value::IpAddress(octets) => WireValue::IpAddress(Ipv4Addr::from(*octets)),
        Value::Null => WireValue::Null,
        Value::NoSuchObject => WireValue::NoSuchObject,
        Value::NoSuchInstance => WireValue::NoSuchInstance,
        Value::EndOfMibView => WireValue::EndOfMibView,
        other => WireValue::Other(format!("{other:?}")),
    }
}

fn binding(varbind: &VarBind) -> VarBinding {
    VarBinding::new(varbind.oid.to_string(), wire_value(&varbind.value))
}

/// [`SnmpConnector`] backed by `async-snmp` UDP clients
#[derive(Debug, Clone, Default)]
pub struct AsyncSnmpConnector;

#[async_trait]
impl SnmpConnector for AsyncSnmpConnector {
    async fn connect(
        &self,
        params: &SessionParams,
        timeout: Duration,
    ) -> Result<Box<dyn SnmpSession>, CollectionError> {
        let auth: Auth = match &params.security {
            SnmpSecurity::Community(community) => Auth::v2c(community.as_str()),
            SnmpSecurity::Usm {
                user,
                auth,
                privacy,
            } => {
                let mut usm = Auth::usm(user.as_str());
                if let Some((protocol, passphrase)) = auth {
                    usm = usm.auth(auth_protocol(*protocol), passphrase.as_str());
                }
                if let Some((protocol, passphrase)) = privacy {
                    usm = usm.privacy(priv_protocol(*protocol), passphrase.as_str());
                }
                usm.into()
            }
        };

        trace!(target = %params.target, "connecting");

        let client = async_snmp::Client::builder(params.target.as_str(), auth)
            .timeout(timeout)
            .connect()
            .await
            .map_err(|e| CollectionError::Connect(e.to_string()))?;

        Ok(Box::new(AsyncSnmpSession { client }))
    }
}

struct AsyncSnmpSession {
    client: UdpClient,
}

#[async_trait]
impl SnmpSession for AsyncSnmpSession {
    async fn get(&self, oids: &[String]) -> Result<Vec<VarBinding>, CollectionError> {
        let oids = oids
            .iter()
            .map(|oid| {
                Oid::parse(canonical_oid(oid))
                    .map_err(|e| CollectionError::Query(format!("invalid oid {oid}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let varbinds = self
            .client
            .get_many(&oids)
            .await
            .map_err(|e| CollectionError::Query(e.to_string()))?;

        Ok(varbinds.iter().map(binding).collect())
    }
}

/// [`NotificationSource`] backed by an `async-snmp` notification receiver
pub struct AsyncSnmpNotifications {
    receiver: NotificationReceiver,
}

impl std::fmt::Debug for AsyncSnmpNotifications {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncSnmpNotifications").finish_non_exhaustive()
    }
}

impl AsyncSnmpNotifications {
    /// Bind the UDP socket and register every principal.
    ///
    /// SNMPv1 and v2c notifications are accepted regardless of the table;
    /// SNMPv3 notifications must come from one of `principals`.
    pub async fn bind(addr: SocketAddr, principals: &[Principal]) -> Result<Self, ListenerError> {
        let mut builder = NotificationReceiver::builder().bind(addr.to_string());

        for principal in principals {
            validate_principal(principal)?;
            debug!(user = %principal.name, "registering trap user");

            let auth = (!principal.auth_passphrase.is_empty()).then(|| {
                (
                    auth_protocol(principal.auth_protocol),
                    principal.auth_passphrase.clone(),
                )
            });
            let privacy = (!principal.priv_passphrase.is_empty()).then(|| {
                (
                    priv_protocol(principal.priv_protocol),
                    principal.priv_passphrase.clone(),
                )
            });

            builder = builder.usm_user(principal.name.clone(), move |user| {
                let user = match &auth {
                    Some((protocol, passphrase)) => user.auth(*protocol, passphrase.as_bytes()),
                    None => user,
                };
                match &privacy {
                    Some((protocol, passphrase)) => user.privacy(*protocol, passphrase.as_bytes()),
                    None => user,
                }
            });
        }

        let receiver = builder
            .build()
            .await
            .map_err(|e| ListenerError::Bind(e.to_string()))?;

        Ok(Self { receiver })
    }

    /// Address the socket is actually bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.receiver.local_addr()
    }
}

/// Socket level failures end the receive loop, anything else only loses the packet.
fn classify(err: Box<async_snmp::Error>) -> NotificationError {
    if matches!(*err, async_snmp::Error::Network { .. }) {
        NotificationError::Transport(err.to_string())
    } else {
        NotificationError::Decode(err.to_string())
    }
}

/// All bindings as they were on the wire.
///
/// The receiver splits sysUpTime.0 and snmpTrapOID.0 off v2c and v3
/// notifications; they are put back in front so the last binding stays the
/// payload even when a notification carries nothing else.
fn notification_bindings(notification: &Notification) -> Vec<VarBinding> {
    let mut bindings = Vec::with_capacity(notification.varbinds().len() + 2);

    if !matches!(notification, Notification::TrapV1 { .. }) {
        bindings.push(VarBinding::new(
            oids::sys_uptime().to_string(),
            WireValue::TimeTicks(notification.uptime()),
        ));
        bindings.push(VarBinding::new(
            oids::snmp_trap_oid().to_string(),
            WireValue::ObjectIdentifier(notification.trap_oid().to_string()),
        ));
    }

    bindings.extend(notification.varbinds().iter().map(binding));
    bindings
}

#[async_trait]
impl NotificationSource for AsyncSnmpNotifications {
    async fn recv(&mut self) -> Result<InboundNotification, NotificationError> {
        let (notification, peer) = self.receiver.recv().await.map_err(classify)?;

        Ok(InboundNotification {
            peer,
            bindings: notification_bindings(&notification),
        })
    }
}
