//! Modbus TCP transport
//!
//! The poll engine only sees the `ModbusTransport` trait. `TcpModbusTransport`
//! implements it on `tokio-modbus`, connecting lazily and reconnecting on the
//! next read after any transport failure.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::error::Elapsed;
use tokio_modbus::client::{tcp, Client, Context, Reader};
use tokio_modbus::Slave;
use tracing::{debug, info, warn};

use crate::error::{GatewayError, Result};

/// Read side of a Modbus device
#[async_trait]
pub trait ModbusTransport: Send {
    /// FC01
    async fn read_coils(&mut self, start: u16, count: u16) -> Result<Vec<bool>>;

    /// FC02
    async fn read_discrete_inputs(&mut self, start: u16, count: u16) -> Result<Vec<bool>>;

    /// FC03
    async fn read_holding_registers(&mut self, start: u16, count: u16) -> Result<Vec<u16>>;

    /// FC04
    async fn read_input_registers(&mut self, start: u16, count: u16) -> Result<Vec<u16>>;

    /// Close the device connection; reads afterwards may reconnect
    async fn disconnect(&mut self) -> Result<()>;
}

/// Device endpoint and request timeout
#[derive(Debug, Clone, PartialEq)]
pub struct ModbusSettings {
    pub host: String,
    pub port: u16,
    pub slave_id: u8,
    pub timeout: Duration,
}

impl ModbusSettings {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// `tokio-modbus` TCP client with lazy (re)connect
pub struct TcpModbusTransport {
    settings: ModbusSettings,
    ctx: Option<Context>,
}

impl TcpModbusTransport {
    pub fn new(settings: ModbusSettings) -> Self {
        Self {
            settings,
            ctx: None,
        }
    }

    pub fn settings(&self) -> &ModbusSettings {
        &self.settings
    }

    pub fn is_connected(&self) -> bool {
        self.ctx.is_some()
    }

    /// Connect now instead of on the first read
    pub async fn connect(&mut self) -> Result<()> {
        if self.ctx.is_none() {
            self.ctx = Some(open(&self.settings).await?);
        }
        Ok(())
    }

    async fn context(&mut self) -> Result<&mut Context> {
        if self.ctx.is_none() {
            self.ctx = Some(open(&self.settings).await?);
        }
        self.ctx.as_mut().ok_or_else(GatewayError::not_connected)
    }

    /// Map a request outcome; any transport-level failure drops the connection
    fn settle<T>(
        &mut self,
        op: &str,
        start: u16,
        count: u16,
        outcome: std::result::Result<tokio_modbus::Result<T>, Elapsed>,
    ) -> Result<T> {
        match outcome {
            Ok(Ok(Ok(data))) => Ok(data),
            Ok(Ok(Err(exception))) => Err(GatewayError::modbus(format!(
                "{} {}+{}: exception {:?}",
                op, start, count, exception
            ))),
            Ok(Err(e)) => {
                self.ctx = None;
                Err(GatewayError::connection(format!(
                    "{} {}+{}: {}",
                    op, start, count, e
                )))
            },
            Err(_) => {
                self.ctx = None;
                Err(GatewayError::timeout(format!(
                    "{} {}+{} timed out after {:?}",
                    op, start, count, self.settings.timeout
                )))
            },
        }
    }
}

async fn resolve(settings: &ModbusSettings) -> Result<SocketAddr> {
    let endpoint = settings.endpoint();
    let mut addrs = tokio::net::lookup_host(endpoint.as_str())
        .await
        .map_err(|e| GatewayError::connection(format!("Resolve {}: {}", endpoint, e)))?;
    addrs
        .next()
        .ok_or_else(|| GatewayError::connection(format!("No address for {}", endpoint)))
}

/// Must not borrow the transport: `Context` is `Send` but not `Sync`
async fn open(settings: &ModbusSettings) -> Result<Context> {
    let addr = resolve(settings).await?;
    let slave = Slave(settings.slave_id);

    let ctx = tokio::time::timeout(settings.timeout, tcp::connect_slave(addr, slave))
        .await
        .map_err(|_| {
            GatewayError::timeout(format!(
                "Connect {} timed out after {:?}",
                addr, settings.timeout
            ))
        })?
        .map_err(|e| GatewayError::connection(format!("Connect {}: {}", addr, e)))?;

    info!("Modbus connected: {} (unit {})", addr, settings.slave_id);
    Ok(ctx)
}

#[async_trait]
impl ModbusTransport for TcpModbusTransport {
    async fn read_coils(&mut self, start: u16, count: u16) -> Result<Vec<bool>> {
        let timeout = self.settings.timeout;
        let ctx = self.context().await?;
        let outcome = tokio::time::timeout(timeout, ctx.read_coils(start, count)).await;
        self.settle("read_coils", start, count, outcome)
    }

    async fn read_discrete_inputs(&mut self, start: u16, count: u16) -> Result<Vec<bool>> {
        let timeout = self.settings.timeout;
        let ctx = self.context().await?;
        let outcome = tokio::time::timeout(timeout, ctx.read_discrete_inputs(start, count)).await;
        self.settle("read_discrete_inputs", start, count, outcome)
    }

    async fn read_holding_registers(&mut self, start: u16, count: u16) -> Result<Vec<u16>> {
        let timeout = self.settings.timeout;
        let ctx = self.context().await?;
        let outcome =
            tokio::time::timeout(timeout, ctx.read_holding_registers(start, count)).await;
        self.settle("read_holding_registers", start, count, outcome)
    }

    async fn read_input_registers(&mut self, start: u16, count: u16) -> Result<Vec<u16>> {
        let timeout = self.settings.timeout;
        let ctx = self.context().await?;
        let outcome = tokio::time::timeout(timeout, ctx.read_input_registers(start, count)).await;
        self.settle("read_input_registers", start, count, outcome)
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut ctx) = self.ctx.take() {
            if let Err(e) = ctx.disconnect().await {
                debug!("Modbus disconnect: {:?}", e);
            }
            info!("Modbus disconnected: {}", self.settings.endpoint());
        } else {
            warn!("Modbus disconnect requested while not connected");
        }
        Ok(())
    }
}
