//! Gateway loop
//!
//! One sequential worker: poll the device, run the publish filter, publish every
//! decision, then sleep until the next tick. The first cycle that publishes waits
//! (bounded) for the broker to acknowledge the full initial state.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::filter::PublishFilter;
use crate::modbus::ModbusTransport;
use crate::mqtt::BrokerClient;
use crate::payload;
use crate::poll::PollEngine;
use crate::template::{CompiledTemplate, PublishPolicy};

/// Loop timing and output switches
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub poll_interval: Duration,
    pub ack_timeout: Duration,
    pub force_deadband: bool,
    /// Suppress the per-cycle record dump
    pub quiet: bool,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            ack_timeout: Duration::from_secs(30),
            force_deadband: false,
            quiet: false,
        }
    }
}

/// Outcome of one poll cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub tags_decoded: usize,
    pub published: usize,
    pub publish_failures: usize,
    /// Result of the initial acknowledgement wait; `None` on later cycles
    pub initial_acknowledged: Option<bool>,
}

pub struct Gateway<M, B> {
    engine: PollEngine,
    filter: PublishFilter,
    policies: BTreeMap<String, PublishPolicy>,
    modbus: M,
    broker: B,
    options: GatewayOptions,
    cycles: u64,
    initial_published: bool,
}

impl<M, B> Gateway<M, B>
where
    M: ModbusTransport,
    B: BrokerClient,
{
    pub fn new(template: CompiledTemplate, modbus: M, broker: B, options: GatewayOptions) -> Self {
        Self {
            engine: PollEngine::new(&template),
            filter: PublishFilter::new(options.force_deadband),
            policies: template.policies,
            modbus,
            broker,
            options,
            cycles: 0,
            initial_published: false,
        }
    }

    pub fn filter(&self) -> &PublishFilter {
        &self.filter
    }

    pub fn modbus(&self) -> &M {
        &self.modbus
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Poll, filter and publish once
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        let record = self.engine.poll(&mut self.modbus).await?;
        self.cycles += 1;

        if !self.options.quiet {
            info!("Cycle {} record: {}", self.cycles, record.summary());
        }

        let decisions = self.filter.evaluate(&record, &self.policies);
        let mut report = CycleReport {
            tags_decoded: record.len(),
            ..Default::default()
        };

        for decision in &decisions {
            let Some(policy) = self.policies.get(&decision.tag) else {
                continue;
            };

            let encoded = match payload::encode(policy.payload, decision.value, &record) {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!("Encode {} failed: {}", decision.tag, e);
                    report.publish_failures += 1;
                    continue;
                },
            };

            match self
                .broker
                .publish(&policy.topic, encoded, policy.qos, policy.retain)
                .await
            {
                Ok(()) => {
                    debug!(
                        "Published {} = {} ({})",
                        policy.topic, decision.value, decision.reason
                    );
                    report.published += 1;
                },
                Err(e) => {
                    warn!("Publish {} failed: {}", policy.topic, e);
                    report.publish_failures += 1;
                },
            }
        }

        if !self.initial_published && report.published > 0 {
            self.initial_published = true;
            let tracker = self.broker.tracker();
            let acknowledged = tracker
                .wait_for_acknowledgements(self.options.ack_timeout)
                .await;
            if acknowledged {
                info!(
                    "Initial state delivered: {} message(s) acknowledged",
                    tracker.acknowledged()
                );
            } else {
                warn!(
                    "Initial state: {} of {} message(s) unacknowledged after {:?}",
                    tracker.pending(),
                    tracker.published(),
                    self.options.ack_timeout
                );
            }
            report.initial_acknowledged = Some(acknowledged);
        }

        debug!(
            "Cycle {}: {} decoded, {} published, {} failed",
            self.cycles, report.tags_decoded, report.published, report.publish_failures
        );
        Ok(report)
    }

    /// Run until `shutdown` is cancelled, then close both connections
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        let mut ticker = tokio::time::interval(self.options.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Gateway running: {} request(s) every {:?}",
            self.engine.request_count(),
            self.options.poll_interval
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Gateway stopping");
                    break;
                },
                _ = ticker.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!("Poll cycle failed: {}", e);
                    }
                },
            }
        }

        self.close().await;
        Ok(())
    }

    /// Disconnect the device and the broker
    pub async fn close(&mut self) {
        if let Err(e) = self.modbus.disconnect().await {
            warn!("Modbus disconnect: {}", e);
        }
        if let Err(e) = self.broker.disconnect().await {
            warn!("MQTT disconnect: {}", e);
        }
    }
}
