//! Modbus TCP to MQTT gateway (`modqtt-gw`)

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use errors::ModqttResult;
use modqtt_gw::{
    bootstrap::{self, Args},
    modbus::TcpModbusTransport,
    mqtt::MqttBroker,
    Gateway,
};

#[tokio::main]
async fn main() -> ModqttResult<()> {
    let args = Args::parse();
    bootstrap::initialize_logging(&args.service)?;

    let startup = match bootstrap::load(&args) {
        Ok(startup) => startup,
        Err(e) => {
            error!("Startup failed: {}", e);
            return Err(e.into());
        },
    };
    bootstrap::log_plan(&startup);

    // Validation mode: validate and exit
    if args.service.validate {
        info!("Validation completed successfully");
        return Ok(());
    }

    let options = startup.gateway_options(&args);
    let mqtt_settings = startup.site.mqtt_settings(&startup.credentials)?;

    let mut modbus = TcpModbusTransport::new(startup.site.modbus_settings());
    if let Err(e) = modbus.connect().await {
        // Reads retry the connection every cycle
        error!("Initial Modbus connection failed: {}", e);
    }
    let broker = MqttBroker::connect(&mqtt_settings).await?;

    let shutdown = CancellationToken::new();
    let signal_task = common::spawn_signal_listener(shutdown.clone());

    let mut gateway = Gateway::new(startup.template, modbus, broker, options);
    gateway.run(shutdown.clone()).await?;

    common::stop_signal_listener(&shutdown, signal_task).await;
    info!("Gateway stopped");
    Ok(())
}
