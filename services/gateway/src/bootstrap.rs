//! Service Bootstrap and Initialization
//!
//! This module handles service initialization including:
//! - Command-line arguments
//! - Logging configuration
//! - Loading site configuration, credentials and template
//!
//! Uses common bootstrap utilities for shared functionality

use std::path::PathBuf;

use clap::Parser;
use tracing::{debug, info, warn};

use crate::config::{BrokerCredentials, SiteConfig};
use crate::error::Result;
use crate::gateway::GatewayOptions;
use crate::template::{self, CompiledTemplate};
use errors::{ModqttError, ModqttResult};

// Re-export common bootstrap functionality
pub use common::bootstrap_args::ServiceArgs;

/// Command-line arguments for modqtt-gw
#[derive(Parser, Debug, Clone)]
#[command(
    name = "modqtt-gw",
    version = env!("CARGO_PKG_VERSION"),
    about = "Modbus TCP to MQTT gateway",
    long_about = None
)]
pub struct Args {
    /// Site configuration file (.json): Modbus server and broker session settings
    #[arg(short = 'c', long)]
    pub config: PathBuf,

    /// Register template file (.csv): registers to poll, tag names, scaling, publish policy
    #[arg(short = 't', long)]
    pub template: PathBuf,

    /// Only publish fixed-interval tags whose value moved past the deadband
    #[arg(long)]
    pub force_deadband: bool,

    /// KEY=VALUE file seeding unset MQTT_BROKER_* variables
    #[arg(long, default_value = "config/.env")]
    pub env_file: PathBuf,

    #[command(flatten)]
    pub service: ServiceArgs,
}

/// Everything needed to start the gateway
#[derive(Debug)]
pub struct Startup {
    pub site: SiteConfig,
    pub credentials: BrokerCredentials,
    pub template: CompiledTemplate,
}

impl Startup {
    pub fn gateway_options(&self, args: &Args) -> GatewayOptions {
        GatewayOptions {
            poll_interval: self.site.poll_interval,
            ack_timeout: self.site.ack_timeout,
            force_deadband: args.force_deadband || self.site.force_deadband,
            quiet: args.service.quiet,
        }
    }
}

/// Initialize logging system with command-line arguments
///
/// Log directory priority:
/// 1. MODQTT_LOG_DIR environment variable
/// 2. --log-dir
/// 3. Console only
pub fn initialize_logging(args: &ServiceArgs) -> ModqttResult<()> {
    let log_config = common::logging::LogConfig {
        level: args.parse_log_level(),
        log_dir: common::logging::resolve_log_dir(args.log_dir.as_deref()),
        ansi: !args.no_color,
        ..Default::default()
    };

    common::logging::init_with_config(log_config)
        .map_err(|e| ModqttError::Configuration(format!("Failed to init logging: {}", e)))
}

/// Load env file, site configuration, credentials and template, in that order
pub fn load(args: &Args) -> Result<Startup> {
    match common::env_file::load_env_file(&args.env_file) {
        Ok(0) => {},
        Ok(count) => debug!("{} variable(s) seeded from {}", count, args.env_file.display()),
        Err(e) => warn!("Env file {} ignored: {}", args.env_file.display(), e),
    }

    let site = SiteConfig::load(&args.config)?;
    let credentials = BrokerCredentials::from_env()?;
    // Resolve now so a malformed URL fails before any connection
    credentials.broker_host()?;
    let template = template::load_template(&args.template)?;

    Ok(Startup {
        site,
        credentials,
        template,
    })
}

/// Log the compiled plan
pub fn log_plan(startup: &Startup) {
    let site = &startup.site;
    info!(
        "Modbus server: {}:{} unit {}, poll every {:?}, timeout {:?}",
        site.modbus_host,
        site.modbus_port,
        site.modbus_slave_id,
        site.poll_interval,
        site.modbus_timeout
    );
    info!(
        "MQTT broker: {}:{} as {:?}{}",
        startup
            .credentials
            .broker_host()
            .unwrap_or_else(|_| startup.credentials.url.clone()),
        site.mqtt_port,
        site.mqtt_client_id,
        if site.mqtt_tls { " (TLS)" } else { "" }
    );

    let template = &startup.template;
    for (fc, groups) in &template.call_groups {
        for group in groups {
            info!(
                "  {} start {} count {}",
                fc, group.start_address, group.register_count
            );
        }
    }
    info!(
        "Template: {} value(s), {} published tag(s), {} request(s) per cycle, {} warning(s)",
        template.descriptor_count(),
        template.policies.len(),
        template.request_count(),
        template.warnings.len()
    );
    for (tag, policy) in &template.policies {
        debug!(
            "  {} -> {} qos {} retain {} {} deadband {}",
            tag,
            policy.topic,
            policy.qos.level(),
            policy.retain,
            policy.mode,
            policy.deadband
        );
    }
}
