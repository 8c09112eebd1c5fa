//! Full poll → filter → publish cycles against in-memory transports

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use modqtt_gw::modbus::ModbusTransport;
use modqtt_gw::mqtt::{BrokerClient, DeliveryTracker};
use modqtt_gw::template::{self, CompiledTemplate, QosLevel, TagDefinition};
use modqtt_gw::{Gateway, GatewayError, GatewayOptions, Result};

// ============================================================================
// Mock device
// ============================================================================

#[derive(Clone, Default)]
struct MockDevice {
    holding: Arc<Mutex<HashMap<u16, u16>>>,
    coils: Arc<Mutex<HashMap<u16, bool>>>,
    offline: Arc<AtomicBool>,
    reads: Arc<AtomicUsize>,
    disconnected: Arc<AtomicBool>,
}

impl MockDevice {
    fn set_register(&self, address: u16, value: u16) {
        self.holding.lock().unwrap().insert(address, value);
    }

    fn set_coil(&self, address: u16, value: bool) {
        self.coils.lock().unwrap().insert(address, value);
    }

    fn check_online(&self) -> Result<()> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            Err(GatewayError::connection("device offline"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ModbusTransport for MockDevice {
    async fn read_coils(&mut self, start: u16, count: u16) -> Result<Vec<bool>> {
        self.check_online()?;
        let coils = self.coils.lock().unwrap();
        Ok((start..start + count)
            .map(|a| coils.get(&a).copied().unwrap_or(false))
            .collect())
    }

    async fn read_discrete_inputs(&mut self, _start: u16, count: u16) -> Result<Vec<bool>> {
        self.check_online()?;
        Ok(vec![false; usize::from(count)])
    }

    async fn read_holding_registers(&mut self, start: u16, count: u16) -> Result<Vec<u16>> {
        self.check_online()?;
        let holding = self.holding.lock().unwrap();
        Ok((start..start + count)
            .map(|a| holding.get(&a).copied().unwrap_or(0))
            .collect())
    }

    async fn read_input_registers(&mut self, _start: u16, count: u16) -> Result<Vec<u16>> {
        self.check_online()?;
        Ok(vec![0; usize::from(count)])
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.disconnected.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Mock broker
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
struct Message {
    topic: String,
    payload: String,
    qos: QosLevel,
    retain: bool,
}

#[derive(Clone)]
struct MockBroker {
    messages: Arc<Mutex<Vec<Message>>>,
    tracker: DeliveryTracker,
    acknowledge: bool,
    reject_topic: Option<String>,
    disconnected: Arc<AtomicBool>,
}

impl MockBroker {
    fn new() -> Self {
        Self {
            messages: Arc::default(),
            tracker: DeliveryTracker::new(),
            acknowledge: true,
            reject_topic: None,
            disconnected: Arc::default(),
        }
    }

    fn take(&self) -> Vec<Message> {
        std::mem::take(&mut *self.messages.lock().unwrap())
    }
}

#[async_trait]
impl BrokerClient for MockBroker {
    async fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        qos: QosLevel,
        retain: bool,
    ) -> Result<()> {
        if self.reject_topic.as_deref() == Some(topic) {
            return Err(GatewayError::mqtt("request channel closed"));
        }
        self.messages.lock().unwrap().push(Message {
            topic: topic.to_string(),
            payload: String::from_utf8(payload).unwrap(),
            qos,
            retain,
        });
        self.tracker.record_published();
        if self.acknowledge {
            self.tracker.record_acknowledged();
        }
        Ok(())
    }

    fn tracker(&self) -> &DeliveryTracker {
        &self.tracker
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.disconnected.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn row(address: &str, data_type: &str, tag_name: &str) -> TagDefinition {
    TagDefinition {
        address: Some(address.to_string()),
        read_type: Some("HR".to_string()),
        data_type: Some(data_type.to_string()),
        tag_name: Some(tag_name.to_string()),
        ..Default::default()
    }
}

fn options() -> GatewayOptions {
    GatewayOptions {
        poll_interval: Duration::from_millis(20),
        ack_timeout: Duration::from_millis(100),
        force_deadband: false,
        quiet: true,
    }
}

fn gateway(
    template: CompiledTemplate,
    device: &MockDevice,
    broker: &MockBroker,
) -> Gateway<MockDevice, MockBroker> {
    Gateway::new(template, device.clone(), broker.clone(), options())
}

fn topics(messages: &[Message]) -> Vec<&str> {
    messages.iter().map(|m| m.topic.as_str()).collect()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_first_cycle_publishes_every_tag_once() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "address,read_type,data_type,tag_name,scaling_coeff,mqtt_topic,mqtt_payload,mqtt_qos,mqtt_retain"
    )
    .unwrap();
    writeln!(file, "0,HR,uint16,pump_speed,,plant,,1,false").unwrap();
    writeln!(file, "1,HR,sint16,temperature,0.1,plant,json,,").unwrap();
    writeln!(file, "2,HR,packedbool,status,,plant,,,").unwrap();
    writeln!(file, "5,coil,coil,running,,,,,").unwrap();
    let template = template::load_template(file.path()).unwrap();

    let device = MockDevice::default();
    device.set_register(0, 1450);
    device.set_register(1, 215);
    device.set_register(2, 0b101);
    device.set_coil(5, true);
    let broker = MockBroker::new();

    let mut gw = gateway(template, &device, &broker);
    let report = gw.run_cycle().await.unwrap();

    // 2 scalars + 17 packedbool tags + 1 coil
    assert_eq!(report.tags_decoded, 20);
    assert_eq!(report.published, 20);
    assert_eq!(report.publish_failures, 0);
    assert_eq!(report.initial_acknowledged, Some(true));

    let messages = broker.take();
    assert_eq!(messages.len(), 20);
    let mut seen = topics(&messages);
    seen.sort_unstable();
    seen.dedup();
    assert_eq!(seen.len(), 20);

    let speed = messages
        .iter()
        .find(|m| m.topic == "plant/pump_speed")
        .unwrap();
    assert_eq!(speed.payload, "1450");
    assert_eq!(speed.qos, QosLevel::AtLeastOnce);
    assert!(!speed.retain);

    let temperature = messages
        .iter()
        .find(|m| m.topic == "plant/temperature")
        .unwrap();
    let json: serde_json::Value = serde_json::from_str(&temperature.payload).unwrap();
    assert!((json["value"].as_f64().unwrap() - 21.5).abs() < 1e-9);
    assert!(json["timestamp_utc"].as_str().unwrap().ends_with("+0000"));

    let find = |topic: &str| {
        messages
            .iter()
            .find(|m| m.topic == topic)
            .map(|m| m.payload.clone())
    };
    assert_eq!(find("plant/status_uint16_value").as_deref(), Some("5"));
    assert_eq!(find("plant/status_bit0").as_deref(), Some("1"));
    assert_eq!(find("plant/status_bit1").as_deref(), Some("0"));
    assert_eq!(find("plant/status_bit2").as_deref(), Some("1"));
    assert_eq!(find("running").as_deref(), Some("1"));
}

#[tokio::test]
async fn test_unchanged_values_are_not_republished() {
    let mut speed = row("0", "uint16", "speed");
    speed.mqtt_deadband = Some("5".into());
    let template = template::compile(&[speed]);

    let device = MockDevice::default();
    device.set_register(0, 100);
    let broker = MockBroker::new();
    let mut gw = gateway(template, &device, &broker);

    assert_eq!(gw.run_cycle().await.unwrap().published, 1);
    broker.take();

    device.set_register(0, 105);
    let report = gw.run_cycle().await.unwrap();
    assert_eq!(report.published, 0);
    assert_eq!(report.initial_acknowledged, None);

    device.set_register(0, 106);
    assert_eq!(gw.run_cycle().await.unwrap().published, 1);
    let messages = broker.take();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].payload, "106");
}

#[tokio::test]
async fn test_limit_alarm_and_recovery() {
    let mut level = row("0", "uint16", "tank_level");
    level.mqtt_low = Some("10".into());
    level.mqtt_deadband = Some("0.5".into());
    let template = template::compile(&[level]);

    let device = MockDevice::default();
    device.set_register(0, 50);
    let broker = MockBroker::new();
    let mut gw = gateway(template, &device, &broker);
    gw.run_cycle().await.unwrap();

    device.set_register(0, 9);
    assert_eq!(gw.run_cycle().await.unwrap().published, 1);
    assert!(gw.filter().state("tank_level").unwrap().limit_flag);

    device.set_register(0, 11);
    assert_eq!(gw.run_cycle().await.unwrap().published, 1);
    assert!(!gw.filter().state("tank_level").unwrap().limit_flag);

    assert_eq!(gw.run_cycle().await.unwrap().published, 0);

    let payloads: Vec<String> = broker.take().into_iter().map(|m| m.payload).collect();
    assert_eq!(payloads, vec!["50", "9", "11"]);
}

#[tokio::test]
async fn test_device_failure_skips_cycle() {
    let template = template::compile(&[row("0", "uint16", "a"), row("1", "uint16", "b")]);
    let device = MockDevice::default();
    let broker = MockBroker::new();
    let mut gw = gateway(template, &device, &broker);

    device.offline.store(true, Ordering::SeqCst);
    let err = gw.run_cycle().await.unwrap_err();
    assert!(err.needs_reconnect());
    assert!(broker.take().is_empty());
    assert_eq!(gw.cycles(), 0);

    device.offline.store(false, Ordering::SeqCst);
    let report = gw.run_cycle().await.unwrap();
    assert_eq!(report.published, 2);
    assert_eq!(report.initial_acknowledged, Some(true));
}

#[tokio::test]
async fn test_unacknowledged_initial_state_is_reported() {
    let template = template::compile(&[row("0", "uint16", "a")]);
    let device = MockDevice::default();
    let mut broker = MockBroker::new();
    broker.acknowledge = false;
    let mut gw = gateway(template, &device, &broker);

    let report = gw.run_cycle().await.unwrap();
    assert_eq!(report.initial_acknowledged, Some(false));
    assert_eq!(broker.tracker.pending(), 1);
}

#[tokio::test]
async fn test_failed_publish_is_counted_and_state_kept() {
    let template = template::compile(&[row("0", "uint16", "a"), row("1", "uint16", "b")]);
    let device = MockDevice::default();
    let mut broker = MockBroker::new();
    broker.reject_topic = Some("b".to_string());
    let mut gw = gateway(template, &device, &broker);

    let report = gw.run_cycle().await.unwrap();
    assert_eq!(report.published, 1);
    assert_eq!(report.publish_failures, 1);
    assert!(gw.filter().state("b").is_some());

    // Unchanged value: the failed tag is not retried
    let report = gw.run_cycle().await.unwrap();
    assert_eq!(report.published + report.publish_failures, 0);
}

#[tokio::test]
async fn test_run_until_cancelled_then_disconnects() {
    let template = template::compile(&[row("0", "uint16", "a")]);
    let device = MockDevice::default();
    let broker = MockBroker::new();
    let mut gw = gateway(template, &device, &broker);

    // Failing cycles must not stop the loop
    device.offline.store(true, Ordering::SeqCst);

    let shutdown = CancellationToken::new();
    let canceller = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        canceller.cancel();
    });

    tokio::time::timeout(Duration::from_secs(5), gw.run(shutdown))
        .await
        .expect("gateway should stop after cancellation")
        .unwrap();

    assert!(device.reads.load(Ordering::SeqCst) >= 2);
    assert!(device.disconnected.load(Ordering::SeqCst));
    assert!(broker.disconnected.load(Ordering::SeqCst));
}
