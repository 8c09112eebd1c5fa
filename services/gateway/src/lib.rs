//! Modbus TCP to MQTT gateway
//!
//! Polls the registers described by a CSV template from one Modbus TCP device and
//! republishes the decoded values to one MQTT broker, per-tag, by exception,
//! on a fixed interval or when a limit is crossed.
//!
//! # Architecture
//!
//! - `template`: template rows → call groups, decode descriptors, publish policies
//! - `poll`: call groups → one decoded record per cycle
//! - `filter`: decoded record → publish decisions, per-tag state
//! - `gateway`: the cycle driver tying the above to the transports
//! - `modbus` / `mqtt`: transport traits and their `tokio-modbus` / `rumqttc` implementations
//! - `config` / `bootstrap`: site file, credentials, command line

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod filter;
pub mod gateway;
pub mod modbus;
pub mod mqtt;
pub mod payload;
pub mod poll;
pub mod template;

pub use error::{GatewayError, Result};
pub use gateway::{CycleReport, Gateway, GatewayOptions};
