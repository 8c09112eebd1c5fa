//! MQTT broker session
//!
//! `MqttBroker` wraps a `rumqttc` client whose event loop runs in its own task.
//! The event loop counts delivery acknowledgements into a `DeliveryTracker` shared
//! with the cycle driver, which can wait (bounded) for outstanding deliveries.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, Event, MqttOptions, Outgoing, Packet, QoS, TlsConfiguration, Transport,
};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{GatewayError, Result};
use crate::template::QosLevel;

/// Broker side of the gateway
#[async_trait]
pub trait BrokerClient: Send {
    /// Queue one message for delivery
    async fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        qos: QosLevel,
        retain: bool,
    ) -> Result<()>;

    /// Delivery acknowledgement counters of this session
    fn tracker(&self) -> &DeliveryTracker;

    async fn disconnect(&mut self) -> Result<()>;
}

#[derive(Debug, Default)]
struct TrackerInner {
    published: AtomicU64,
    acknowledged: AtomicU64,
    notify: Notify,
}

/// Published vs. acknowledged message counters
///
/// Cloned handles share the same counters.
#[derive(Debug, Clone, Default)]
pub struct DeliveryTracker {
    inner: Arc<TrackerInner>,
}

impl DeliveryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_published(&self) {
        self.inner.published.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_acknowledged(&self) {
        self.inner.acknowledged.fetch_add(1, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn published(&self) -> u64 {
        self.inner.published.load(Ordering::SeqCst)
    }

    pub fn acknowledged(&self) -> u64 {
        self.inner.acknowledged.load(Ordering::SeqCst)
    }

    pub fn pending(&self) -> u64 {
        self.published().saturating_sub(self.acknowledged())
    }

    pub fn all_acknowledged(&self) -> bool {
        self.acknowledged() >= self.published()
    }

    /// Wait until every publish so far is acknowledged; `false` on timeout
    pub async fn wait_for_acknowledgements(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.inner.notify.notified();
                if self.all_acknowledged() {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }
}

/// Broker session parameters
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: bool,
    pub ca_cert_path: Option<PathBuf>,
    pub keep_alive: Duration,
    pub ack_timeout: Duration,
}

pub fn to_qos(level: QosLevel) -> QoS {
    match level {
        QosLevel::AtMostOnce => QoS::AtMostOnce,
        QosLevel::AtLeastOnce => QoS::AtLeastOnce,
        QosLevel::ExactlyOnce => QoS::ExactlyOnce,
    }
}

fn build_options(settings: &MqttSettings) -> Result<MqttOptions> {
    let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
    options.set_keep_alive(settings.keep_alive);
    options.set_clean_session(true);

    if let Some(username) = &settings.username {
        options.set_credentials(username, settings.password.as_deref().unwrap_or_default());
    }

    if settings.tls {
        let transport = match &settings.ca_cert_path {
            Some(path) => {
                let ca = std::fs::read(path).map_err(|e| {
                    GatewayError::config(format!("CA certificate {}: {}", path.display(), e))
                })?;
                Transport::Tls(TlsConfiguration::Simple {
                    ca,
                    alpn: None,
                    client_auth: None,
                })
            },
            None => Transport::tls_with_default_config(),
        };
        options.set_transport(transport);
    }

    Ok(options)
}

/// `rumqttc` session with delivery tracking
pub struct MqttBroker {
    client: AsyncClient,
    tracker: DeliveryTracker,
    event_task: JoinHandle<()>,
    endpoint: String,
}

impl MqttBroker {
    /// Open the session and wait for the broker's CONNACK
    pub async fn connect(settings: &MqttSettings) -> Result<Self> {
        let endpoint = format!("{}:{}", settings.host, settings.port);
        let options = build_options(settings)?;
        let (client, mut eventloop) = AsyncClient::new(options, 10);

        let tracker = DeliveryTracker::new();
        let task_tracker = tracker.clone();
        let (connected_tx, mut connected_rx) = watch::channel(false);

        // Start event loop in background; rumqttc reconnects on the next poll after an error
        let event_task = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        debug!("MQTT ConnAck: {:?}", ack.code);
                        let _ = connected_tx.send(true);
                    },
                    Ok(Event::Incoming(Packet::PubAck(_)))
                    | Ok(Event::Incoming(Packet::PubComp(_))) => {
                        task_tracker.record_acknowledged();
                    },
                    // QoS 0 has no acknowledgement; pkid 0 marks it written
                    Ok(Event::Outgoing(Outgoing::Publish(0))) => {
                        task_tracker.record_acknowledged();
                    },
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        debug!("MQTT event loop stopped after disconnect");
                        break;
                    },
                    Ok(_) => {},
                    Err(e) => {
                        let _ = connected_tx.send(false);
                        warn!("MQTT event loop error: {}", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    },
                }
            }
        });

        let connected =
            tokio::time::timeout(settings.ack_timeout, connected_rx.wait_for(|up| *up)).await;
        if !matches!(connected, Ok(Ok(_))) {
            event_task.abort();
            return Err(GatewayError::connection(format!(
                "MQTT broker {} did not accept the session within {:?}",
                endpoint, settings.ack_timeout
            )));
        }

        info!(
            "MQTT connected: {} as {:?}{}",
            endpoint,
            settings.client_id,
            if settings.tls { " (TLS)" } else { "" }
        );

        Ok(Self {
            client,
            tracker,
            event_task,
            endpoint,
        })
    }
}

#[async_trait]
impl BrokerClient for MqttBroker {
    async fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        qos: QosLevel,
        retain: bool,
    ) -> Result<()> {
        self.client
            .publish(topic, to_qos(qos), retain, payload)
            .await?;
        self.tracker.record_published();
        Ok(())
    }

    fn tracker(&self) -> &DeliveryTracker {
        &self.tracker
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Err(e) = self.client.disconnect().await {
            debug!("MQTT disconnect request failed: {}", e);
        }
        if tokio::time::timeout(Duration::from_secs(2), &mut self.event_task)
            .await
            .is_err()
        {
            self.event_task.abort();
        }
        info!("MQTT disconnected: {}", self.endpoint);
        Ok(())
    }
}
