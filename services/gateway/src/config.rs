//! Site configuration and broker credentials
//!
//! The JSON site file is loaded through figment with `MODQTT_` environment
//! overrides, then validated into a `SiteConfig`. Broker credentials come from
//! `MQTT_BROKER_*` environment variables. Any defect here is fatal at startup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Json},
    value::Value,
    Figment,
};
use serde::{Deserialize, Deserializer};
use tracing::{debug, warn};

use crate::error::{GatewayError, Result};
use crate::modbus::ModbusSettings;
use crate::mqtt::MqttSettings;

/// Environment prefix for site configuration overrides
pub const CONFIG_ENV_PREFIX: &str = "MODQTT_";

/// Environment prefix of the broker credentials
pub const CREDENTIALS_ENV_PREFIX: &str = "MQTT_BROKER_";

/// Ports that do not trigger a warning
pub const WELL_KNOWN_PORTS: [u16; 4] = [502, 503, 1883, 8883];

const LOCALHOST_SPELLINGS: &[&str] = &[
    "localhost",
    "Localhost",
    "LocalHost",
    "LOCALHOST",
    "Local Host",
    "LOCAL HOST",
    "local host",
];

fn default_keep_alive() -> u64 {
    30
}

fn default_ack_timeout() -> f64 {
    30.0
}

/// Site configuration file as written
#[derive(Debug, Clone, Deserialize)]
pub struct RawSiteConfig {
    pub modbus_server_ip: String,
    pub modbus_server_port: i64,
    pub modbus_server_id: i64,
    pub modbus_poll_interval_seconds: f64,
    pub modbus_server_timeout_seconds: f64,
    pub mqtt_broker_port: i64,
    #[serde(deserialize_with = "string_like")]
    pub mqtt_client_id: String,
    pub mqtt_broker_tls: bool,
    #[serde(default)]
    pub mqtt_force_deadband: bool,
    #[serde(default = "default_keep_alive")]
    pub mqtt_keep_alive_seconds: u64,
    #[serde(default = "default_ack_timeout")]
    pub mqtt_ack_timeout_seconds: f64,
    #[serde(default)]
    pub mqtt_ca_cert_path: Option<PathBuf>,
}

/// Validated site configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SiteConfig {
    pub modbus_host: String,
    pub modbus_port: u16,
    pub modbus_slave_id: u8,
    pub poll_interval: Duration,
    pub modbus_timeout: Duration,
    pub mqtt_port: u16,
    pub mqtt_client_id: String,
    pub mqtt_tls: bool,
    pub force_deadband: bool,
    pub keep_alive: Duration,
    pub ack_timeout: Duration,
    pub ca_cert_path: Option<PathBuf>,
}

impl SiteConfig {
    /// Load and validate the site file at `path`
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_prefixed(path, CONFIG_ENV_PREFIX)
    }

    /// Load with overrides taken from `env_prefix` variables
    pub fn load_prefixed(path: &Path, env_prefix: &str) -> Result<Self> {
        let raw: RawSiteConfig = common::config_loader::load_json_config(path, env_prefix)?;
        require_file_string(path, "mqtt_client_id")?;
        debug!("Site configuration read from {}", path.display());
        Self::from_raw(raw)
    }

    pub fn from_raw(raw: RawSiteConfig) -> Result<Self> {
        let modbus_host = normalize_host(&raw.modbus_server_ip).ok_or_else(|| {
            GatewayError::config(format!(
                "modbus_server_ip {:?} is not localhost, an IPv4 address or a hostname",
                raw.modbus_server_ip
            ))
        })?;
        let modbus_port = validate_port("modbus_server_port", raw.modbus_server_port)?;
        let mqtt_port = validate_port("mqtt_broker_port", raw.mqtt_broker_port)?;

        let modbus_slave_id = u8::try_from(raw.modbus_server_id).map_err(|_| {
            GatewayError::config(format!(
                "modbus_server_id {} is outside 0..=255",
                raw.modbus_server_id
            ))
        })?;

        let poll_interval =
            positive_seconds("modbus_poll_interval_seconds", raw.modbus_poll_interval_seconds)?;
        let modbus_timeout =
            positive_seconds("modbus_server_timeout_seconds", raw.modbus_server_timeout_seconds)?;
        let ack_timeout = positive_seconds("mqtt_ack_timeout_seconds", raw.mqtt_ack_timeout_seconds)?;

        let mqtt_client_id = raw.mqtt_client_id.trim().to_string();
        if mqtt_client_id.is_empty() {
            return Err(GatewayError::config("mqtt_client_id must not be empty"));
        }

        Ok(Self {
            modbus_host,
            modbus_port,
            modbus_slave_id,
            poll_interval,
            modbus_timeout,
            mqtt_port,
            mqtt_client_id,
            mqtt_tls: raw.mqtt_broker_tls,
            force_deadband: raw.mqtt_force_deadband,
            keep_alive: Duration::from_secs(raw.mqtt_keep_alive_seconds),
            ack_timeout,
            ca_cert_path: raw.mqtt_ca_cert_path,
        })
    }

    pub fn modbus_settings(&self) -> ModbusSettings {
        ModbusSettings {
            host: self.modbus_host.clone(),
            port: self.modbus_port,
            slave_id: self.modbus_slave_id,
            timeout: self.modbus_timeout,
        }
    }

    pub fn mqtt_settings(&self, credentials: &BrokerCredentials) -> Result<MqttSettings> {
        Ok(MqttSettings {
            host: credentials.broker_host()?,
            port: self.mqtt_port,
            client_id: self.mqtt_client_id.clone(),
            username: credentials.username.clone(),
            password: credentials.password.clone(),
            tls: self.mqtt_tls,
            ca_cert_path: self.ca_cert_path.clone(),
            keep_alive: self.keep_alive,
            ack_timeout: self.ack_timeout,
        })
    }
}

fn validate_port(field: &str, port: i64) -> Result<u16> {
    let port = u16::try_from(port)
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| GatewayError::config(format!("{} {} is outside 1..=65535", field, port)))?;
    if !WELL_KNOWN_PORTS.contains(&port) {
        warn!(
            "{} {} is not one of the usual ports {:?}",
            field, port, WELL_KNOWN_PORTS
        );
    }
    Ok(port)
}

fn positive_seconds(field: &str, seconds: f64) -> Result<Duration> {
    if seconds.is_finite() && seconds > 0.0 {
        Ok(Duration::from_secs_f64(seconds))
    } else {
        Err(GatewayError::config(format!(
            "{} must be greater than 0, got {}",
            field, seconds
        )))
    }
}

fn is_ipv4(host: &str) -> bool {
    let octets: Vec<&str> = host.split('.').collect();
    octets.len() == 4
        && octets.iter().all(|octet| {
            !octet.is_empty()
                && octet.len() <= 3
                && octet.bytes().all(|b| b.is_ascii_digit())
                && octet.parse::<u16>().is_ok_and(|v| v <= 255)
        })
}

fn is_hostname(host: &str) -> bool {
    if host.is_empty() || host.len() > 253 {
        return false;
    }
    let labels: Vec<&str> = host.split('.').collect();
    // Dotted digits are an address attempt, not a name
    if labels
        .iter()
        .all(|label| label.bytes().all(|b| b.is_ascii_digit()))
    {
        return false;
    }
    labels.iter().all(|label| {
        (1..=63).contains(&label.len())
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
    })
}

/// Validate a device host, returning the spelling to connect to
pub fn normalize_host(raw: &str) -> Option<String> {
    let host = raw.trim();
    if LOCALHOST_SPELLINGS.contains(&host) {
        return Some("localhost".to_string());
    }
    (is_ipv4(host) || is_hostname(host)).then(|| host.to_string())
}

/// `field` must be a JSON string in the file itself; only environment
/// overrides may spell it as a bare number
fn require_file_string(path: &Path, field: &str) -> Result<()> {
    match Figment::from(Json::file(path)).find_value(field) {
        Ok(Value::String(..)) | Err(_) => Ok(()),
        Ok(_) => Err(GatewayError::config(format!(
            "{} in {} must be a string",
            field,
            path.display()
        ))),
    }
}

// Environment values like "1234" arrive as numbers
fn string_like<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Str(String),
        Int(i64),
        Uint(u64),
        Float(f64),
        Bool(bool),
    }

    Ok(match Scalar::deserialize(deserializer)? {
        Scalar::Str(s) => s,
        Scalar::Int(v) => v.to_string(),
        Scalar::Uint(v) => v.to_string(),
        Scalar::Float(v) => v.to_string(),
        Scalar::Bool(v) => v.to_string(),
    })
}

fn optional_string_like<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    string_like(deserializer).map(Some)
}

#[derive(Debug, Default, Deserialize)]
struct RawCredentials {
    #[serde(default, deserialize_with = "optional_string_like")]
    url: Option<String>,
    #[serde(default, deserialize_with = "optional_string_like")]
    creds_username: Option<String>,
    #[serde(default, deserialize_with = "optional_string_like")]
    creds_password: Option<String>,
}

/// Broker address and login
#[derive(Clone, PartialEq)]
pub struct BrokerCredentials {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for BrokerCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerCredentials")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

impl BrokerCredentials {
    /// Read `MQTT_BROKER_URL`, `MQTT_BROKER_CREDS_USERNAME` and `MQTT_BROKER_CREDS_PASSWORD`
    pub fn from_env() -> Result<Self> {
        Self::from_env_prefixed(CREDENTIALS_ENV_PREFIX)
    }

    pub fn from_env_prefixed(prefix: &str) -> Result<Self> {
        let raw: RawCredentials = Figment::new()
            .merge(Env::prefixed(prefix))
            .extract()
            .map_err(|e| GatewayError::config(format!("Broker credentials: {}", e)))?;

        let blank_to_none = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        let url = blank_to_none(raw.url).ok_or_else(|| {
            GatewayError::config(format!("{}URL is not set", prefix))
        })?;

        Ok(Self {
            url: url.trim().to_string(),
            username: blank_to_none(raw.creds_username),
            password: blank_to_none(raw.creds_password),
        })
    }

    /// Host part of the broker URL; the scheme is optional
    pub fn broker_host(&self) -> Result<String> {
        broker_host(&self.url)
    }
}

pub fn broker_host(url: &str) -> Result<String> {
    let url = url.trim();
    if url.contains("://") {
        let parsed = url::Url::parse(url)
            .map_err(|e| GatewayError::config(format!("Invalid broker URL {:?}: {}", url, e)))?;
        return parsed
            .host_str()
            .map(str::to_string)
            .ok_or_else(|| GatewayError::config(format!("Broker URL {:?} has no host", url)));
    }

    let host = url.trim_end_matches('/');
    if host.is_empty() {
        return Err(GatewayError::config("Broker URL is empty"));
    }
    Ok(host.to_string())
}
