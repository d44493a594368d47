use std::collections::BTreeMap;
use std::fmt::Display;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::{Deserialize, Deserializer, de};
use tracing::trace;

/// Connection settings for the Splunk HTTP Event Collector
#[derive(Debug, Clone, Deserialize)]
pub struct SplunkConfig {
    pub splunk_hec_url: String,
    pub splunk_hec_token: String,
    #[serde(default)]
    pub splunk_index: Option<String>,
    #[serde(default)]
    pub splunk_sourcetype: Option<String>,

    /// Verify the HEC certificate on https endpoints
    #[serde(default, deserialize_with = "flexible_bool")]
    pub tls_verify: bool,

    /// Request timeout in seconds for a single delivery
    #[serde(default = "default_delivery_timeout", deserialize_with = "flexible_number")]
    pub timeout: u64,
}

impl SplunkConfig {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrapConfig {
    #[serde(default, deserialize_with = "flexible_bool")]
    pub enabled: bool,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: IpAddr,
    #[serde(default = "default_trap_port", deserialize_with = "flexible_number")]
    pub trap_port: u16,

    /// Principals accepted for SNMPv3 notifications
    #[serde(default)]
    pub users: Vec<TrapUserConfig>,

    // Single-principal form used by older configuration documents.
    #[serde(default)]
    pub trap_user: Option<String>,
    #[serde(default)]
    pub trap_auth_protocol: Option<String>,
    #[serde(default)]
    pub trap_auth_passphrase: Option<String>,
    #[serde(default)]
    pub trap_priv_protocol: Option<String>,
    #[serde(default)]
    pub trap_priv_passphrase: Option<String>,
}

impl Default for TrapConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: default_listen_addr(),
            trap_port: default_trap_port(),
            users: vec![],
            trap_user: None,
            trap_auth_protocol: None,
            trap_auth_passphrase: None,
            trap_priv_protocol: None,
            trap_priv_passphrase: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrapUserConfig {
    pub user: String,
    #[serde(default)]
    pub auth_protocol: Option<String>,
    #[serde(default)]
    pub auth_passphrase: Option<String>,
    #[serde(default)]
    pub priv_protocol: Option<String>,
    #[serde(default)]
    pub priv_passphrase: Option<String>,
}

impl TrapConfig {
    /// Build the credentials table used to decode inbound SNMPv3 notifications.
    ///
    /// Traps default to SHA authentication and DES privacy when no protocol is given.
    pub fn principals(&self) -> anyhow::Result<Vec<Principal>> {
        let mut principals = vec![];

        if let Some(user) = non_empty(&self.trap_user) {
            principals.push(Principal::resolve(
                user,
                &self.trap_auth_protocol,
                &self.trap_auth_passphrase,
                &self.trap_priv_protocol,
                &self.trap_priv_passphrase,
                PrivProtocol::Des,
            )?);
        }

        for user in &self.users {
            if user.user.trim().is_empty() {
                bail!("trap user entries need a non-empty user name");
            }
            principals.push(Principal::resolve(
                &user.user,
                &user.auth_protocol,
                &user.auth_passphrase,
                &user.priv_protocol,
                &user.priv_passphrase,
                PrivProtocol::Des,
            )?);
        }

        Ok(principals)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    #[serde(default, deserialize_with = "flexible_bool")]
    pub enabled: bool,

    /// Seconds between two poll cycles
    #[serde(default = "default_interval", deserialize_with = "flexible_number")]
    pub interval: u64,

    /// Seconds a single device may take before it counts as failed
    #[serde(default = "default_poll_timeout", deserialize_with = "flexible_number")]
    pub timeout: u64,

    /// Upper bound for devices queried at the same time
    #[serde(default = "default_max_concurrency", deserialize_with = "flexible_number")]
    pub max_concurrency: usize,

    /// Send a delivery even when every device of a cycle failed
    #[serde(default, deserialize_with = "flexible_bool")]
    pub deliver_empty: bool,

    /// Credentials applied to every device that does not override them
    #[serde(flatten)]
    pub defaults: SnmpCredentialsConfig,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: default_interval(),
            timeout: default_poll_timeout(),
            max_concurrency: default_max_concurrency(),
            deliver_empty: false,
            defaults: SnmpCredentialsConfig::default(),
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// SNMP access settings as they appear in the document, either as poll-wide
/// defaults or as per-device overrides. Empty strings count as unset.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SnmpCredentialsConfig {
    #[serde(default, deserialize_with = "flexible_text")]
    pub snmp_port: Option<String>,
    #[serde(default, deserialize_with = "flexible_text")]
    pub snmp_version: Option<String>,
    #[serde(default)]
    pub snmp_community: Option<String>,
    #[serde(default)]
    pub snmp_user: Option<String>,
    #[serde(default)]
    pub snmp_auth_protocol: Option<String>,
    #[serde(default)]
    pub snmp_auth_passphrase: Option<String>,
    #[serde(default)]
    pub snmp_priv_protocol: Option<String>,
    #[serde(default)]
    pub snmp_priv_passphrase: Option<String>,
}

impl SnmpCredentialsConfig {
    /// Fill every unset field from `defaults`.
    pub fn or(&self, defaults: &SnmpCredentialsConfig) -> SnmpCredentialsConfig {
        fn pick(own: &Option<String>, fallback: &Option<String>) -> Option<String> {
            non_empty(own).or(non_empty(fallback)).map(str::to_string)
        }

        SnmpCredentialsConfig {
            snmp_port: pick(&self.snmp_port, &defaults.snmp_port),
            snmp_version: pick(&self.snmp_version, &defaults.snmp_version),
            snmp_community: pick(&self.snmp_community, &defaults.snmp_community),
            snmp_user: pick(&self.snmp_user, &defaults.snmp_user),
            snmp_auth_protocol: pick(&self.snmp_auth_protocol, &defaults.snmp_auth_protocol),
            snmp_auth_passphrase: pick(&self.snmp_auth_passphrase, &defaults.snmp_auth_passphrase),
            snmp_priv_protocol: pick(&self.snmp_priv_protocol, &defaults.snmp_priv_protocol),
            snmp_priv_passphrase: pick(&self.snmp_priv_passphrase, &defaults.snmp_priv_passphrase),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    pub ip: String,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub credentials: SnmpCredentialsConfig,
    /// OID -> label
    #[serde(default)]
    pub oids: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub splunk: SplunkConfig,
    #[serde(default, rename = "snmp_trap")]
    pub trap: TrapConfig,
    #[serde(default, rename = "snmp_poll")]
    pub poll: PollConfig,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.splunk.splunk_hec_url.trim().is_empty() {
            bail!("Splunk HEC URL is not set");
        }
        reqwest::Url::parse(&self.splunk.splunk_hec_url)
            .with_context(|| format!("invalid Splunk HEC URL {}", self.splunk.splunk_hec_url))?;
        if self.splunk.splunk_hec_token.trim().is_empty() {
            bail!("Splunk HEC token is not set");
        }

        if !self.poll.enabled && !self.trap.enabled {
            bail!("neither device polling nor the trap receiver is enabled");
        }

        if self.poll.enabled {
            if self.poll.interval == 0 {
                bail!("poll interval must be greater than zero");
            }
            if self.poll.max_concurrency == 0 {
                bail!("poll max_concurrency must be greater than zero");
            }
            for device in &self.devices {
                if device.ip.trim().is_empty() {
                    bail!("device {:?} has no ip address", device.name);
                }
                if device.oids.is_empty() {
                    bail!("device {} ({}) has no oids configured", device.name, device.ip);
                }
            }

            // Surfaces unknown protocol names at startup instead of on first use.
            self.device_descriptors()?;
        }

        if self.trap.enabled {
            self.trap.principals()?;
        }

        Ok(())
    }

    /// Apply the poll-wide defaults to every device.
    pub fn device_descriptors(&self) -> anyhow::Result<Vec<Arc<DeviceDescriptor>>> {
        self.devices
            .iter()
            .map(|device| DeviceDescriptor::resolve(device, &self.poll.defaults).map(Arc::new))
            .collect()
    }

    /// Display names of the configured devices keyed by address.
    pub fn device_names(&self) -> BTreeMap<String, String> {
        self.devices
            .iter()
            .filter(|device| !device.name.is_empty())
            .map(|device| (device.ip.clone(), device.name.clone()))
            .collect()
    }
}

/// Fully resolved, immutable view of one monitored device.
///
/// `port` and `version` stay textual: an unusable value fails only the
/// collection task for this device, not the whole configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDescriptor {
    pub ip: String,
    pub name: String,
    pub port: String,
    pub version: String,
    pub community: String,
    pub user: String,
    pub auth_protocol: AuthProtocol,
    pub auth_passphrase: String,
    pub priv_protocol: PrivProtocol,
    pub priv_passphrase: String,
    /// OID -> label
    pub oids: BTreeMap<String, String>,
}

impl DeviceDescriptor {
    pub fn resolve(
        device: &DeviceConfig,
        defaults: &SnmpCredentialsConfig,
    ) -> anyhow::Result<DeviceDescriptor> {
        let credentials = device.credentials.or(defaults);
        let name = if device.name.is_empty() {
            device.ip.clone()
        } else {
            device.name.clone()
        };

        let auth_protocol = parse_protocol(&credentials.snmp_auth_protocol, AuthProtocol::Sha)
            .with_context(|| format!("device {name} ({})", device.ip))?;
        let priv_protocol = parse_protocol(&credentials.snmp_priv_protocol, PrivProtocol::Aes)
            .with_context(|| format!("device {name} ({})", device.ip))?;

        Ok(DeviceDescriptor {
            ip: device.ip.clone(),
            name,
            port: credentials
                .snmp_port
                .unwrap_or_else(|| DEFAULT_SNMP_PORT.to_string()),
            version: credentials.snmp_version.unwrap_or_default(),
            community: credentials.snmp_community.unwrap_or_default(),
            user: credentials.snmp_user.unwrap_or_default(),
            auth_protocol,
            auth_passphrase: credentials.snmp_auth_passphrase.unwrap_or_default(),
            priv_protocol,
            priv_passphrase: credentials.snmp_priv_passphrase.unwrap_or_default(),
            oids: device.oids.clone(),
        })
    }
}

/// One entry of the notification credentials table
#[derive(Debug, Clone, PartialEq)]
pub struct Principal {
    pub name: String,
    pub auth_protocol: AuthProtocol,
    pub auth_passphrase: String,
    pub priv_protocol: PrivProtocol,
    pub priv_passphrase: String,
}

impl Principal {
    fn resolve(
        name: &str,
        auth_protocol: &Option<String>,
        auth_passphrase: &Option<String>,
        priv_protocol: &Option<String>,
        priv_passphrase: &Option<String>,
        default_priv: PrivProtocol,
    ) -> anyhow::Result<Principal> {
        Ok(Principal {
            name: name.to_string(),
            auth_protocol: parse_protocol(auth_protocol, AuthProtocol::Sha)
                .with_context(|| format!("trap user {name}"))?,
            auth_passphrase: auth_passphrase.clone().unwrap_or_default(),
            priv_protocol: parse_protocol(priv_protocol, default_priv)
                .with_context(|| format!("trap user {name}"))?,
            priv_passphrase: priv_passphrase.clone().unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthProtocol {
    Md5,
    Sha,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl FromStr for AuthProtocol {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "").as_str() {
            "md5" => Ok(AuthProtocol::Md5),
            "sha" | "sha1" => Ok(AuthProtocol::Sha),
            "sha224" => Ok(AuthProtocol::Sha224),
            "sha256" => Ok(AuthProtocol::Sha256),
            "sha384" => Ok(AuthProtocol::Sha384),
            "sha512" => Ok(AuthProtocol::Sha512),
            other => bail!("unsupported authentication protocol {other:?}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivProtocol {
    Des,
    Aes,
    Aes192,
    Aes256,
}

impl FromStr for PrivProtocol {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "").as_str() {
            "des" => Ok(PrivProtocol::Des),
            "aes" | "aes128" => Ok(PrivProtocol::Aes),
            "aes192" => Ok(PrivProtocol::Aes192),
            "aes256" => Ok(PrivProtocol::Aes256),
            other => bail!("unsupported privacy protocol {other:?}"),
        }
    }
}

fn parse_protocol<T>(value: &Option<String>, default: T) -> anyhow::Result<T>
where
    T: FromStr<Err = anyhow::Error>,
{
    match non_empty(value) {
        Some(value) => value.parse(),
        None => Ok(default),
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

const DEFAULT_SNMP_PORT: &str = "161";

fn default_listen_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_trap_port() -> u16 {
    162
}

fn default_interval() -> u64 {
    60
}

fn default_poll_timeout() -> u64 {
    5
}

fn default_max_concurrency() -> usize {
    64
}

fn default_delivery_timeout() -> u64 {
    30
}

// Older documents write every scalar as a string ("true", "60", "161").

fn flexible_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flexible {
        Bool(bool),
        Text(String),
    }

    match Flexible::deserialize(deserializer)? {
        Flexible::Bool(value) => Ok(value),
        Flexible::Text(value) => Ok(value.trim().eq_ignore_ascii_case("true")),
    }
}

fn flexible_number<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + FromStr,
    T::Err: Display,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flexible<T> {
        Number(T),
        Text(String),
    }

    match Flexible::<T>::deserialize(deserializer)? {
        Flexible::Number(value) => Ok(value),
        Flexible::Text(value) => value.trim().parse().map_err(de::Error::custom),
    }
}

fn flexible_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flexible {
        Number(u64),
        Text(String),
    }

    Ok(match Option::<Flexible>::deserialize(deserializer)? {
        Some(Flexible::Number(value)) => Some(value.to_string()),
        Some(Flexible::Text(value)) => Some(value),
        None => None,
    })
}

pub fn parse_config(content: &str) -> anyhow::Result<Config> {
    let config: Config =
        serde_json::from_str(content).context("Invalid configuration file provided!")?;
    config.validate()?;
    trace!("loaded config: {config:?}");
    Ok(config)
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {path}"))?;
    parse_config(&file_content)
}
