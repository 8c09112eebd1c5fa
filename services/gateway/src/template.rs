//! Register template compilation
//!
//! Turns the rows of a template CSV into the read plan used by the poll engine:
//! batched call groups per function code, decode descriptors keyed by start address,
//! and one publish policy per published tag. Row defects never abort compilation;
//! they are recorded as warnings and the row is defaulted or skipped.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{GatewayError, Result};

/// Maximum registers per FC03/FC04 request
pub const MODBUS_MAX_READ_REGISTERS: u16 = 125;

/// Maximum bits per FC01/FC02 request
pub const MODBUS_MAX_READ_COILS: u16 = 2000;

/// Number of bits published for a `packedbool` register
pub const PACKED_BOOL_BITS: u8 = 16;

// ============================================================================
// Function codes
// ============================================================================

/// Modbus read function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FunctionCode {
    ReadCoils,
    ReadDiscreteInputs,
    ReadHoldingRegisters,
    ReadInputRegisters,
}

impl FunctionCode {
    pub const ALL: [FunctionCode; 4] = [
        FunctionCode::ReadCoils,
        FunctionCode::ReadDiscreteInputs,
        FunctionCode::ReadHoldingRegisters,
        FunctionCode::ReadInputRegisters,
    ];

    /// Numeric Modbus function code
    pub fn code(&self) -> u8 {
        match self {
            FunctionCode::ReadCoils => 0x01,
            FunctionCode::ReadDiscreteInputs => 0x02,
            FunctionCode::ReadHoldingRegisters => 0x03,
            FunctionCode::ReadInputRegisters => 0x04,
        }
    }

    /// Accepted `read_type` spellings
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            FunctionCode::ReadCoils => &[
                "1", "01", "FC01", "coil", "Coil", "coils", "Coils", "RC", "Coil-FC01",
            ],
            FunctionCode::ReadDiscreteInputs => &[
                "2", "02", "FC02", "discrete", "Discrete", "di", "DI", "RDI", "DI-FC02",
            ],
            FunctionCode::ReadHoldingRegisters => &[
                "3", "03", "FC03", "holding", "Holding", "HR", "RHR", "HR-FC03",
            ],
            FunctionCode::ReadInputRegisters => &[
                "4",
                "04",
                "FC04",
                "input register",
                "input registers",
                "Input Register",
                "Input Registers",
                "IR",
                "RIR",
                "IR-FC04",
            ],
        }
    }

    /// Exact lookup of a `read_type` value after trimming surrounding whitespace
    pub fn from_read_type(read_type: &str) -> Option<Self> {
        let read_type = read_type.trim();
        Self::ALL
            .into_iter()
            .find(|fc| fc.aliases().contains(&read_type))
    }

    /// Coils and discrete inputs are read as bits
    pub fn is_bit_access(&self) -> bool {
        matches!(
            self,
            FunctionCode::ReadCoils | FunctionCode::ReadDiscreteInputs
        )
    }

    /// Largest quantity a single request may ask for
    pub fn max_quantity(&self) -> u16 {
        if self.is_bit_access() {
            MODBUS_MAX_READ_COILS
        } else {
            MODBUS_MAX_READ_REGISTERS
        }
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FC{:02}", self.code())
    }
}

// ============================================================================
// Data types
// ============================================================================

/// Register data type of a template row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Uint16,
    Sint16,
    Ruint16,
    Rsint16,
    Float32,
    Rfloat32ByteSwap,
    Rfloat32WordSwap,
    Rfloat32ByteWordSwap,
    Float64,
    PackedBool,
    Di,
    Coil,
}

impl DataType {
    pub const ALL: [DataType; 12] = [
        DataType::Uint16,
        DataType::Sint16,
        DataType::Ruint16,
        DataType::Rsint16,
        DataType::Float32,
        DataType::Rfloat32ByteSwap,
        DataType::Rfloat32WordSwap,
        DataType::Rfloat32ByteWordSwap,
        DataType::Float64,
        DataType::PackedBool,
        DataType::Di,
        DataType::Coil,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Uint16 => "uint16",
            DataType::Sint16 => "sint16",
            DataType::Ruint16 => "ruint16",
            DataType::Rsint16 => "rsint16",
            DataType::Float32 => "float32",
            DataType::Rfloat32ByteSwap => "rfloat32_byte_swap",
            DataType::Rfloat32WordSwap => "rfloat32_word_swap",
            DataType::Rfloat32ByteWordSwap => "rfloat32_byte_word_swap",
            DataType::Float64 => "float64",
            DataType::PackedBool => "packedbool",
            DataType::Di => "di",
            DataType::Coil => "coil",
        }
    }

    /// Exact, case-sensitive lookup after trimming
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        let s = s.trim();
        Self::ALL.into_iter().find(|dt| dt.as_str() == s)
    }

    /// Number of consecutive registers a value occupies
    pub fn register_count(&self) -> u16 {
        match self {
            DataType::Float32
            | DataType::Rfloat32ByteSwap
            | DataType::Rfloat32WordSwap
            | DataType::Rfloat32ByteWordSwap => 2,
            DataType::Float64 => 4,
            _ => 1,
        }
    }

    /// Discrete (0/1) values never use a deadband
    pub fn is_discrete(&self) -> bool {
        matches!(self, DataType::Di | DataType::Coil)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Publish policy
// ============================================================================

/// Broker payload encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadFormat {
    #[default]
    Text,
    Json,
}

/// Broker delivery guarantee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QosLevel {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QosLevel {
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(QosLevel::AtMostOnce),
            1 => Some(QosLevel::AtLeastOnce),
            2 => Some(QosLevel::ExactlyOnce),
            _ => None,
        }
    }

    pub fn level(&self) -> u8 {
        match self {
            QosLevel::AtMostOnce => 0,
            QosLevel::AtLeastOnce => 1,
            QosLevel::ExactlyOnce => 2,
        }
    }
}

/// When an unchanged-but-valid value is forwarded
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum PublishMode {
    /// Report by exception: publish when the value moves more than the deadband
    #[default]
    Rbe,
    /// Publish once the given number of seconds has elapsed since the last publish
    Interval(f64),
}

impl fmt::Display for PublishMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishMode::Rbe => f.write_str("rbe"),
            PublishMode::Interval(secs) => write!(f, "every {}s", secs),
        }
    }
}

/// Per-tag publication settings
#[derive(Debug, Clone, PartialEq)]
pub struct PublishPolicy {
    pub topic: String,
    pub payload: PayloadFormat,
    pub qos: QosLevel,
    pub retain: bool,
    pub mode: PublishMode,
    pub deadband: f64,
    pub low: Option<f64>,
    pub high: Option<f64>,
}

impl PublishPolicy {
    /// Copy of this policy published under another topic
    pub fn derived(&self, topic: String) -> Self {
        Self {
            topic,
            ..self.clone()
        }
    }
}

// ============================================================================
// Decode descriptors and call groups
// ============================================================================

/// Linear scaling `raw * coefficient + offset`
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Scaling {
    pub coefficient: Option<f64>,
    pub offset: Option<f64>,
}

impl Scaling {
    /// `None` when neither part is configured; a missing part takes its identity value
    pub fn apply(&self, raw: f64) -> Option<f64> {
        match (self.coefficient, self.offset) {
            (None, None) => None,
            (coefficient, offset) => Some(raw * coefficient.unwrap_or(1.0) + offset.unwrap_or(0.0)),
        }
    }

    pub fn is_identity(&self) -> bool {
        self.coefficient.is_none() && self.offset.is_none()
    }
}

/// How to decode the value starting at one address
#[derive(Debug, Clone, PartialEq)]
pub struct AddressDescriptor {
    pub register_count: u16,
    pub data_type: DataType,
    pub tag_name: String,
    pub scaling: Scaling,
}

/// One batched read request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallGroup {
    pub start_address: u16,
    pub register_count: u16,
}

impl CallGroup {
    /// One past the last address covered
    pub fn end_address(&self) -> u32 {
        u32::from(self.start_address) + u32::from(self.register_count)
    }
}

/// Merge claimed addresses into maximal contiguous runs
///
/// Input order and duplicates do not matter.
pub fn merge_call_groups(addresses: impl IntoIterator<Item = u16>) -> Vec<CallGroup> {
    let sorted: BTreeSet<u16> = addresses.into_iter().collect();
    let mut groups: Vec<CallGroup> = Vec::new();

    for address in sorted {
        match groups.last_mut() {
            Some(group)
                if group.end_address() == u32::from(address) && group.register_count < u16::MAX =>
            {
                group.register_count += 1;
            },
            _ => groups.push(CallGroup {
                start_address: address,
                register_count: 1,
            }),
        }
    }
    groups
}

/// Split groups larger than `max` so that every chunk starts where a value starts
pub fn split_call_groups(
    groups: &[CallGroup],
    value_starts: &BTreeMap<u16, AddressDescriptor>,
    max: u16,
) -> Vec<CallGroup> {
    let max = u32::from(max.max(1));
    let mut chunks = Vec::with_capacity(groups.len());

    for group in groups {
        let end = group.end_address();
        let mut cursor = u32::from(group.start_address);

        while end - cursor > max {
            let limit = cursor + max;
            // limit < end <= 65536, so both bounds fit in u16
            let cut = value_starts
                .range((cursor + 1) as u16..=limit as u16)
                .next_back()
                .map(|(address, _)| u32::from(*address))
                .unwrap_or(limit);
            chunks.push(CallGroup {
                start_address: cursor as u16,
                register_count: (cut - cursor) as u16,
            });
            cursor = cut;
        }
        chunks.push(CallGroup {
            start_address: cursor as u16,
            register_count: (end - cursor) as u16,
        });
    }
    chunks
}

// ============================================================================
// Template rows
// ============================================================================

/// One row of the template CSV; every column is optional
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TagDefinition {
    pub address: Option<String>,
    pub read_type: Option<String>,
    pub data_type: Option<String>,
    pub tag_name: Option<String>,
    pub scaling_coeff: Option<String>,
    pub scaling_offset: Option<String>,
    pub mqtt_topic: Option<String>,
    pub mqtt_payload: Option<String>,
    pub mqtt_qos: Option<String>,
    pub mqtt_retain: Option<String>,
    pub mqtt_publish: Option<String>,
    pub mqtt_deadband: Option<String>,
    pub mqtt_low: Option<String>,
    pub mqtt_high: Option<String>,
}

/// Trimmed non-empty cell content
fn cell(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// A defect found in one template row
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateWarning {
    /// 1-based data row (header excluded)
    pub row: usize,
    pub message: String,
}

impl fmt::Display for TemplateWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}: {}", self.row, self.message)
    }
}

const PAYLOAD_TEXT: &[&str] = &["plaintext", "Plaintext", "PLAINTEXT", "text", "Text", "TEXT"];
const PAYLOAD_JSON: &[&str] = &["json", "Json", "JSON"];
const RETAIN_TRUE: &[&str] = &["TRUE", "true", "True"];
const RETAIN_FALSE: &[&str] = &["FALSE", "false", "False"];
const PUBLISH_RBE: &[&str] = &[
    "rbe",
    "RBE",
    "Rbe",
    "exception",
    "report by exception",
    "report-by-exception",
    "Report-by-exception",
    "Report by exception",
];

// ============================================================================
// Compiler
// ============================================================================

/// Result of compiling a template
#[derive(Debug, Clone, Default)]
pub struct CompiledTemplate {
    pub call_groups: BTreeMap<FunctionCode, Vec<CallGroup>>,
    pub descriptors: BTreeMap<FunctionCode, BTreeMap<u16, AddressDescriptor>>,
    pub policies: BTreeMap<String, PublishPolicy>,
    pub warnings: Vec<TemplateWarning>,
}

impl CompiledTemplate {
    /// Total number of device requests per poll cycle
    pub fn request_count(&self) -> usize {
        self.call_groups.values().map(Vec::len).sum()
    }

    /// Number of decode descriptors across all function codes
    pub fn descriptor_count(&self) -> usize {
        self.descriptors.values().map(BTreeMap::len).sum()
    }
}

/// Incremental template compiler
#[derive(Debug, Default)]
pub struct TemplateCompiler {
    descriptors: BTreeMap<FunctionCode, BTreeMap<u16, AddressDescriptor>>,
    claimed: BTreeMap<FunctionCode, BTreeSet<u16>>,
    policies: BTreeMap<String, PublishPolicy>,
    warnings: Vec<TemplateWarning>,
}

impl TemplateCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    fn warn(&mut self, row: usize, message: impl Into<String>) {
        self.warnings.push(TemplateWarning {
            row,
            message: message.into(),
        });
    }

    /// Add one template row; `row` is the 1-based data row used in warnings
    pub fn push(&mut self, row: usize, def: &TagDefinition) {
        let Some(raw_address) = cell(&def.address) else {
            self.warn(row, "no address provided, row skipped");
            return;
        };
        let Some(read_type) = cell(&def.read_type) else {
            self.warn(
                row,
                format!("no read_type provided for address {}, row skipped", raw_address),
            );
            return;
        };

        let data_type = match cell(&def.data_type) {
            None => {
                self.warn(
                    row,
                    "no data_type provided, assuming sint16 (logged values may be inaccurate)",
                );
                DataType::Sint16
            },
            Some(raw) => match DataType::from_str(raw) {
                Some(dt) => dt,
                None => {
                    self.warn(
                        row,
                        format!("unsupported data_type {:?}, row skipped", raw),
                    );
                    return;
                },
            },
        };

        let tag_name = match cell(&def.tag_name) {
            Some(name) => name.to_string(),
            None => {
                let generated = format!(
                    "{}_address_{}_data_type_{}",
                    read_type, raw_address, data_type
                );
                self.warn(row, format!("no tag_name provided, using {:?}", generated));
                generated
            },
        };

        let policy = self.parse_policy(row, def, data_type, &tag_name);
        let scaling = Scaling {
            coefficient: self.parse_scaling(row, "scaling_coeff", &def.scaling_coeff),
            offset: self.parse_scaling(row, "scaling_offset", &def.scaling_offset),
        };

        let Some(fc) = FunctionCode::from_read_type(read_type) else {
            self.warn(
                row,
                format!("unknown read_type {:?}, row skipped", read_type),
            );
            return;
        };

        let width = data_type.register_count();
        let start = match raw_address.parse::<i64>() {
            Ok(address) if (0..=i64::from(u16::MAX) - i64::from(width) + 1).contains(&address) => {
                address as u16
            },
            Ok(address) => {
                self.warn(
                    row,
                    format!(
                        "address {} with {} register(s) does not fit in 0..=65535, row skipped",
                        address, width
                    ),
                );
                return;
            },
            Err(_) => {
                self.warn(
                    row,
                    format!("address {:?} is not an integer, row skipped", raw_address),
                );
                return;
            },
        };

        let previous = self.descriptors.entry(fc).or_default().insert(
            start,
            AddressDescriptor {
                register_count: width,
                data_type,
                tag_name: tag_name.clone(),
                scaling,
            },
        );
        if let Some(previous) = previous {
            self.warn(
                row,
                format!(
                    "{} address {} already defined by {:?}, replaced by {:?}",
                    fc, start, previous.tag_name, tag_name
                ),
            );
        }
        self.claimed
            .entry(fc)
            .or_default()
            .extend((0..width).map(|offset| start + offset));

        if data_type == DataType::PackedBool && fc.is_bit_access() {
            self.warn(
                row,
                format!(
                    "packedbool on {} reads a single bit, published as {:?}",
                    fc, tag_name
                ),
            );
            self.policies.insert(tag_name, policy);
        } else if data_type == DataType::PackedBool {
            self.policies.insert(
                format!("{}_uint16_value", tag_name),
                policy.derived(format!("{}_uint16_value", policy.topic)),
            );
            for bit in 0..PACKED_BOOL_BITS {
                self.policies.insert(
                    format!("{}_bit{}", tag_name, bit),
                    policy.derived(format!("{}_bit{}", policy.topic, bit)),
                );
            }
        } else {
            self.policies.insert(tag_name, policy);
        }
    }

    fn parse_scaling(&mut self, row: usize, field: &str, value: &Option<String>) -> Option<f64> {
        let raw = cell(value)?;
        match raw.parse::<f64>() {
            Ok(v) if v.is_nan() => None,
            Ok(v) => Some(v),
            Err(_) => {
                self.warn(row, format!("{} {:?} is not a number, ignored", field, raw));
                None
            },
        }
    }

    fn parse_policy(
        &mut self,
        row: usize,
        def: &TagDefinition,
        data_type: DataType,
        tag_name: &str,
    ) -> PublishPolicy {
        let topic = match cell(&def.mqtt_topic) {
            Some(prefix) => format!("{}/{}", prefix, tag_name),
            None => tag_name.to_string(),
        };

        let payload = match cell(&def.mqtt_payload) {
            None => PayloadFormat::Text,
            Some(raw) if PAYLOAD_TEXT.contains(&raw) => PayloadFormat::Text,
            Some(raw) if PAYLOAD_JSON.contains(&raw) => PayloadFormat::Json,
            Some(raw) => {
                self.warn(row, format!("unsupported mqtt_payload {:?}, using text", raw));
                PayloadFormat::Text
            },
        };

        let qos = match cell(&def.mqtt_qos) {
            None => QosLevel::AtMostOnce,
            Some(raw) => match raw.parse::<u8>().ok().and_then(QosLevel::from_level) {
                Some(qos) => qos,
                None => {
                    self.warn(row, format!("unsupported mqtt_qos {:?}, using 0", raw));
                    QosLevel::AtMostOnce
                },
            },
        };

        let retain = match cell(&def.mqtt_retain) {
            None => true,
            Some(raw) if RETAIN_TRUE.contains(&raw) => true,
            Some(raw) if RETAIN_FALSE.contains(&raw) => false,
            Some(raw) => {
                self.warn(row, format!("unsupported mqtt_retain {:?}, using true", raw));
                true
            },
        };

        let mode = match cell(&def.mqtt_publish) {
            None => PublishMode::Rbe,
            Some(raw) if PUBLISH_RBE.contains(&raw) => PublishMode::Rbe,
            Some(raw) => match raw.parse::<f64>() {
                Ok(secs) if secs.is_finite() && secs >= 0.0 => PublishMode::Interval(secs),
                _ => {
                    self.warn(
                        row,
                        format!("unsupported mqtt_publish {:?}, using rbe", raw),
                    );
                    PublishMode::Rbe
                },
            },
        };

        let deadband = match cell(&def.mqtt_deadband) {
            None => 0.0,
            Some(_) if data_type.is_discrete() => 0.0,
            Some(_) if matches!(mode, PublishMode::Interval(_)) => 0.0,
            Some(raw) => match raw.parse::<f64>() {
                Ok(db) if db >= 0.0 => db,
                _ => {
                    self.warn(
                        row,
                        format!("unsupported mqtt_deadband {:?}, using 0", raw),
                    );
                    0.0
                },
            },
        };

        let low = self.parse_limit(row, "mqtt_low", &def.mqtt_low);
        let high = self.parse_limit(row, "mqtt_high", &def.mqtt_high);

        PublishPolicy {
            topic,
            payload,
            qos,
            retain,
            mode,
            deadband,
            low,
            high,
        }
    }

    fn parse_limit(&mut self, row: usize, field: &str, value: &Option<String>) -> Option<f64> {
        let raw = cell(value)?;
        match raw.parse::<f64>() {
            Ok(limit) if !limit.is_nan() => Some(limit),
            _ => {
                self.warn(row, format!("unsupported {} {:?}, no limit", field, raw));
                None
            },
        }
    }

    /// Merge claimed addresses into call groups and hand out the compiled plan
    pub fn finish(self) -> CompiledTemplate {
        let mut call_groups = BTreeMap::new();
        for (fc, addresses) in &self.claimed {
            let merged = merge_call_groups(addresses.iter().copied());
            let empty = BTreeMap::new();
            let starts = self.descriptors.get(fc).unwrap_or(&empty);
            let groups = split_call_groups(&merged, starts, fc.max_quantity());
            debug!(
                "{}: {} address(es) in {} request(s)",
                fc,
                addresses.len(),
                groups.len()
            );
            call_groups.insert(*fc, groups);
        }

        CompiledTemplate {
            call_groups,
            descriptors: self.descriptors,
            policies: self.policies,
            warnings: self.warnings,
        }
    }
}

/// Compile template rows in order
pub fn compile(rows: &[TagDefinition]) -> CompiledTemplate {
    let mut compiler = TemplateCompiler::new();
    for (index, row) in rows.iter().enumerate() {
        compiler.push(index + 1, row);
    }
    compiler.finish()
}

/// Read and compile a template CSV file
///
/// Only an unreadable file is an error; malformed rows become warnings.
pub fn load_template(path: &Path) -> Result<CompiledTemplate> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .flexible(true)
        .from_path(path)
        .map_err(|e| GatewayError::template(format!("{}: {}", path.display(), e)))?;

    let mut compiler = TemplateCompiler::new();
    for (index, record) in reader.deserialize::<TagDefinition>().enumerate() {
        match record {
            Ok(def) => compiler.push(index + 1, &def),
            Err(e) => compiler.warn(index + 1, format!("unreadable row skipped: {}", e)),
        }
    }
    let compiled = compiler.finish();

    for warning in &compiled.warnings {
        warn!("Template {}: {}", path.display(), warning);
    }
    info!(
        "Template {}: {} tag(s), {} request(s) per cycle",
        path.display(),
        compiled.policies.len(),
        compiled.request_count()
    );
    Ok(compiled)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::io::Write;

    fn row(address: &str, read_type: &str, data_type: &str, tag_name: &str) -> TagDefinition {
        TagDefinition {
            address: Some(address.to_string()),
            read_type: Some(read_type.to_string()),
            data_type: Some(data_type.to_string()),
            tag_name: Some(tag_name.to_string()),
            ..Default::default()
        }
    }

    fn groups(pairs: &[(u16, u16)]) -> Vec<CallGroup> {
        pairs
            .iter()
            .map(|&(start_address, register_count)| CallGroup {
                start_address,
                register_count,
            })
            .collect()
    }

    #[test]
    fn test_merge_call_groups_example() {
        assert_eq!(
            merge_call_groups([1, 2, 3, 7, 8, 10]),
            groups(&[(1, 3), (7, 2), (10, 1)])
        );
    }

    #[test]
    fn test_merge_is_order_independent() {
        let forward = merge_call_groups([1, 2, 3, 7, 8, 10]);
        let shuffled = merge_call_groups([10, 3, 7, 1, 8, 2, 3, 10]);
        assert_eq!(forward, shuffled);
        assert!(merge_call_groups(Vec::<u16>::new()).is_empty());
    }

    #[test]
    fn test_read_type_exact_match() {
        assert_eq!(
            FunctionCode::from_read_type("HR"),
            Some(FunctionCode::ReadHoldingRegisters)
        );
        assert_eq!(
            FunctionCode::from_read_type("  Input Registers "),
            Some(FunctionCode::ReadInputRegisters)
        );
        assert_eq!(
            FunctionCode::from_read_type("Coil-FC01"),
            Some(FunctionCode::ReadCoils)
        );
        assert_eq!(
            FunctionCode::from_read_type("DI"),
            Some(FunctionCode::ReadDiscreteInputs)
        );
        // Substrings and case variants outside the table are rejected
        assert_eq!(FunctionCode::from_read_type("HR-FC03x"), None);
        assert_eq!(FunctionCode::from_read_type("hr"), None);
        assert_eq!(FunctionCode::from_read_type("holding registers"), None);
    }

    #[test]
    fn test_data_type_widths() {
        assert_eq!(DataType::from_str("float32").unwrap().register_count(), 2);
        assert_eq!(DataType::from_str("float64").unwrap().register_count(), 4);
        assert_eq!(
            DataType::from_str("rfloat32_byte_word_swap")
                .unwrap()
                .register_count(),
            2
        );
        assert_eq!(DataType::from_str("packedbool").unwrap().register_count(), 1);
        assert_eq!(DataType::from_str("Float32"), None);
        assert!(DataType::Coil.is_discrete());
    }

    #[test]
    fn test_compile_builds_groups_and_descriptors() {
        let compiled = compile(&[
            row("0", "HR", "uint16", "a"),
            row("1", "HR", "float32", "b"),
            row("3", "HR", "sint16", "c"),
            row("10", "HR", "float64", "d"),
            row("5", "coil", "coil", "e"),
        ]);

        assert!(compiled.warnings.is_empty());
        assert_eq!(
            compiled.call_groups[&FunctionCode::ReadHoldingRegisters],
            groups(&[(0, 4), (10, 4)])
        );
        assert_eq!(
            compiled.call_groups[&FunctionCode::ReadCoils],
            groups(&[(5, 1)])
        );
        let hr = &compiled.descriptors[&FunctionCode::ReadHoldingRegisters];
        assert_eq!(hr.len(), 4);
        assert_eq!(hr[&1].data_type, DataType::Float32);
        assert!(!hr.contains_key(&2));
        assert_eq!(compiled.request_count(), 3);
    }

    #[test]
    fn test_missing_fields_are_defaulted_or_skipped() {
        let compiled = compile(&[
            TagDefinition {
                read_type: Some("HR".into()),
                ..Default::default()
            },
            TagDefinition {
                address: Some("4".into()),
                ..Default::default()
            },
            TagDefinition {
                address: Some("7".into()),
                read_type: Some("HR".into()),
                ..Default::default()
            },
            row("8", "HR", "int32", "bad_type"),
            row("9", "FC05", "uint16", "bad_fc"),
            row("abc", "HR", "uint16", "bad_address"),
        ]);

        let policies: Vec<_> = compiled.policies.keys().cloned().collect();
        assert_eq!(policies, vec!["HR_address_7_data_type_sint16".to_string()]);
        let hr = &compiled.descriptors[&FunctionCode::ReadHoldingRegisters];
        assert_eq!(hr[&7].data_type, DataType::Sint16);
        // address, read_type, data_type default, tag_name default, data_type, fc, address
        assert_eq!(compiled.warnings.len(), 7);
        assert_eq!(compiled.warnings[0].row, 1);
    }

    #[test]
    fn test_address_span_must_fit() {
        let compiled = compile(&[
            row("65535", "HR", "uint16", "last"),
            row("65534", "IR", "float32", "pair_at_end"),
            row("65535", "IR", "float32", "overflow"),
            row("-1", "HR", "uint16", "negative"),
        ]);
        assert!(compiled.policies.contains_key("last"));
        assert!(compiled.policies.contains_key("pair_at_end"));
        assert!(!compiled.policies.contains_key("overflow"));
        assert!(!compiled.policies.contains_key("negative"));
        assert_eq!(compiled.warnings.len(), 2);
    }

    #[test]
    fn test_address_collision_last_write_wins() {
        let compiled = compile(&[
            row("20", "HR", "float32", "first"),
            row("20", "HR", "uint16", "second"),
        ]);
        let hr = &compiled.descriptors[&FunctionCode::ReadHoldingRegisters];
        assert_eq!(hr[&20].tag_name, "second");
        assert_eq!(hr[&20].register_count, 1);
        // Both claims stay in the read plan
        assert_eq!(
            compiled.call_groups[&FunctionCode::ReadHoldingRegisters],
            groups(&[(20, 2)])
        );
        assert_eq!(compiled.warnings.len(), 1);
    }

    #[test]
    fn test_policy_defaults() {
        let compiled = compile(&[row("0", "HR", "uint16", "t")]);
        let policy = &compiled.policies["t"];
        assert_eq!(policy.topic, "t");
        assert_eq!(policy.payload, PayloadFormat::Text);
        assert_eq!(policy.qos, QosLevel::AtMostOnce);
        assert!(policy.retain);
        assert_eq!(policy.mode, PublishMode::Rbe);
        assert_eq!(policy.deadband, 0.0);
        assert_eq!(policy.low, None);
        assert_eq!(policy.high, None);
    }

    #[test]
    fn test_policy_parsing() {
        let mut def = row("0", "HR", "float32", "temp");
        def.mqtt_topic = Some("site/boiler".into());
        def.mqtt_payload = Some("JSON".into());
        def.mqtt_qos = Some("2".into());
        def.mqtt_retain = Some("False".into());
        def.mqtt_publish = Some("report-by-exception".into());
        def.mqtt_deadband = Some("0.5".into());
        def.mqtt_low = Some("-10".into());
        def.mqtt_high = Some("95.5".into());

        let compiled = compile(&[def]);
        assert!(compiled.warnings.is_empty());
        let policy = &compiled.policies["temp"];
        assert_eq!(policy.topic, "site/boiler/temp");
        assert_eq!(policy.payload, PayloadFormat::Json);
        assert_eq!(policy.qos, QosLevel::ExactlyOnce);
        assert!(!policy.retain);
        assert_eq!(policy.deadband, 0.5);
        assert_eq!(policy.low, Some(-10.0));
        assert_eq!(policy.high, Some(95.5));
    }

    #[test]
    fn test_invalid_policy_values_fall_back() {
        let mut def = row("0", "HR", "uint16", "t");
        def.mqtt_payload = Some("xml".into());
        def.mqtt_qos = Some("3".into());
        def.mqtt_retain = Some("yes".into());
        def.mqtt_publish = Some("-5".into());
        def.mqtt_deadband = Some("wide".into());
        def.mqtt_low = Some("low".into());

        let compiled = compile(&[def]);
        let policy = &compiled.policies["t"];
        assert_eq!(policy.payload, PayloadFormat::Text);
        assert_eq!(policy.qos, QosLevel::AtMostOnce);
        assert!(policy.retain);
        assert_eq!(policy.mode, PublishMode::Rbe);
        assert_eq!(policy.deadband, 0.0);
        assert_eq!(policy.low, None);
        assert_eq!(compiled.warnings.len(), 6);
    }

    #[test]
    fn test_deadband_forced_to_zero() {
        let mut interval = row("0", "HR", "uint16", "interval");
        interval.mqtt_publish = Some("60".into());
        interval.mqtt_deadband = Some("5".into());

        let mut discrete = row("0", "DI", "di", "discrete");
        discrete.mqtt_deadband = Some("5".into());

        let compiled = compile(&[interval, discrete]);
        assert_eq!(compiled.policies["interval"].mode, PublishMode::Interval(60.0));
        assert_eq!(compiled.policies["interval"].deadband, 0.0);
        assert_eq!(compiled.policies["discrete"].deadband, 0.0);
        assert!(compiled.warnings.is_empty());
    }

    #[test]
    fn test_packedbool_derives_policies() {
        let mut def = row("40", "HR", "packedbool", "status");
        def.mqtt_topic = Some("plant".into());
        def.mqtt_qos = Some("1".into());

        let compiled = compile(&[def]);
        assert_eq!(compiled.policies.len(), 17);
        assert!(!compiled.policies.contains_key("status"));
        assert_eq!(
            compiled.policies["status_uint16_value"].topic,
            "plant/status_uint16_value"
        );
        assert_eq!(compiled.policies["status_bit15"].topic, "plant/status_bit15");
        assert_eq!(compiled.policies["status_bit0"].qos, QosLevel::AtLeastOnce);
    }

    #[test]
    fn test_packedbool_on_coil_publishes_parent_tag() {
        let compiled = compile(&[row("8", "coil", "packedbool", "alarms")]);
        assert_eq!(compiled.policies.len(), 1);
        assert_eq!(compiled.policies["alarms"].topic, "alarms");
        assert_eq!(compiled.warnings.len(), 1);
        assert!(compiled.warnings[0].message.contains("single bit"));
        assert!(compiled.descriptors[&FunctionCode::ReadCoils].contains_key(&8));
    }

    #[test]
    fn test_scaling_parsing_and_apply() {
        let mut def = row("0", "HR", "uint16", "scaled");
        def.scaling_coeff = Some("0.1".into());
        let mut nan = row("1", "HR", "uint16", "nan_scaled");
        nan.scaling_coeff = Some("nan".into());
        nan.scaling_offset = Some("NaN".into());

        let compiled = compile(&[def, nan]);
        let hr = &compiled.descriptors[&FunctionCode::ReadHoldingRegisters];
        assert_eq!(hr[&0].scaling.coefficient, Some(0.1));
        assert_eq!(hr[&0].scaling.offset, None);
        assert!(hr[&1].scaling.is_identity());

        let offset_only = Scaling {
            coefficient: None,
            offset: Some(-40.0),
        };
        assert_eq!(offset_only.apply(100.0), Some(60.0));
        assert_eq!(Scaling::default().apply(100.0), None);
    }

    #[test]
    fn test_split_long_register_groups() {
        // 70 float32 values: 140 contiguous registers
        let rows: Vec<_> = (0..70u16)
            .map(|i| row(&(i * 2).to_string(), "IR", "float32", &format!("f{}", i)))
            .collect();
        let compiled = compile(&rows);
        let ir = &compiled.call_groups[&FunctionCode::ReadInputRegisters];

        // Largest even cut at or below 125 keeps every float in one request
        assert_eq!(ir, &groups(&[(0, 124), (124, 16)]));
        for group in ir {
            assert!(group.register_count <= MODBUS_MAX_READ_REGISTERS);
        }
    }

    #[test]
    fn test_split_long_coil_groups() {
        let rows: Vec<_> = (0..2500u16)
            .map(|i| row(&i.to_string(), "coil", "coil", &format!("c{}", i)))
            .collect();
        let compiled = compile(&rows);
        assert_eq!(
            compiled.call_groups[&FunctionCode::ReadCoils],
            groups(&[(0, 2000), (2000, 500)])
        );
    }

    #[test]
    fn test_load_template_from_csv() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "address,read_type,data_type,tag_name,mqtt_topic,mqtt_qos").unwrap();
        writeln!(file, "0,HR,uint16,pump_speed,plant,1").unwrap();
        writeln!(file, "1,HR,float32,flow,,").unwrap();
        writeln!(file, ",HR,uint16,no_address,,").unwrap();

        let compiled = load_template(file.path()).unwrap();
        assert_eq!(compiled.policies.len(), 2);
        assert_eq!(compiled.policies["pump_speed"].topic, "plant/pump_speed");
        assert_eq!(compiled.policies["pump_speed"].qos, QosLevel::AtLeastOnce);
        assert_eq!(compiled.policies["flow"].topic, "flow");
        assert_eq!(compiled.warnings.len(), 1);
        assert_eq!(compiled.warnings[0].row, 3);
    }

    #[test]
    fn test_load_template_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_template(&dir.path().join("missing.csv")).unwrap_err();
        assert!(matches!(err, GatewayError::TemplateError(_)));
    }
}
