//! Poll engine
//!
//! Issues one device read per call group and decodes the returned words into a
//! flat tag → value record for the cycle.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Local, Utc};
use modqtt_comlink::bytes::{
    reg_to_i16, reg_to_u16, regs_array, regs_to_f32, regs_to_f64, unpack_bits,
};
use modqtt_comlink::{ByteOrder, CodecError};
use serde::Serialize;
use tracing::{debug, error};

use crate::error::Result;
use crate::modbus::ModbusTransport;
use crate::template::{AddressDescriptor, CallGroup, CompiledTemplate, DataType, FunctionCode};

/// Decoded value of one tag
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TagValue {
    Int(i64),
    Float(f64),
}

impl TagValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            TagValue::Int(v) => *v as f64,
            TagValue::Float(v) => *v,
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Int(v) => write!(f, "{}", v),
            // Debug keeps the fractional part of whole floats: 25.0, not 25
            TagValue::Float(v) => write!(f, "{:?}", v),
        }
    }
}

/// Values read in one poll cycle
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRecord {
    pub timestamp_utc: DateTime<Utc>,
    pub timestamp_local: DateTime<Local>,
    pub values: BTreeMap<String, TagValue>,
}

impl DecodedRecord {
    pub fn new(timestamp_utc: DateTime<Utc>) -> Self {
        Self {
            timestamp_utc,
            timestamp_local: timestamp_utc.with_timezone(&Local),
            values: BTreeMap::new(),
        }
    }

    /// Later inserts replace earlier ones for the same tag
    pub fn insert(&mut self, tag: impl Into<String>, value: TagValue) {
        self.values.insert(tag.into(), value);
    }

    pub fn get(&self, tag: &str) -> Option<TagValue> {
        self.values.get(tag).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Single-line JSON rendering of the values for the cycle log
    pub fn summary(&self) -> String {
        serde_json::to_string(&self.values).unwrap_or_else(|e| format!("<unprintable: {}>", e))
    }
}

/// Reads call groups and decodes them against the template descriptors
#[derive(Debug, Clone, Default)]
pub struct PollEngine {
    call_groups: BTreeMap<FunctionCode, Vec<CallGroup>>,
    descriptors: BTreeMap<FunctionCode, BTreeMap<u16, AddressDescriptor>>,
}

impl PollEngine {
    pub fn new(template: &CompiledTemplate) -> Self {
        Self {
            call_groups: template.call_groups.clone(),
            descriptors: template.descriptors.clone(),
        }
    }

    pub fn request_count(&self) -> usize {
        self.call_groups.values().map(Vec::len).sum()
    }

    /// Run every request of the plan; any transport failure aborts the whole record
    pub async fn poll<M>(&self, transport: &mut M) -> Result<DecodedRecord>
    where
        M: ModbusTransport + ?Sized,
    {
        let mut record = DecodedRecord::new(Utc::now());

        for (fc, groups) in &self.call_groups {
            for group in groups {
                let (start, count) = (group.start_address, group.register_count);
                match fc {
                    FunctionCode::ReadCoils => {
                        let bits = transport.read_coils(start, count).await?;
                        self.decode_bits(*fc, group, &bits, &mut record);
                    },
                    FunctionCode::ReadDiscreteInputs => {
                        let bits = transport.read_discrete_inputs(start, count).await?;
                        self.decode_bits(*fc, group, &bits, &mut record);
                    },
                    FunctionCode::ReadHoldingRegisters => {
                        let words = transport.read_holding_registers(start, count).await?;
                        self.decode_registers(*fc, group, &words, &mut record);
                    },
                    FunctionCode::ReadInputRegisters => {
                        let words = transport.read_input_registers(start, count).await?;
                        self.decode_registers(*fc, group, &words, &mut record);
                    },
                }
            }
        }

        Ok(record)
    }

    /// One value per address for FC01/FC02 responses
    pub fn decode_bits(
        &self,
        fc: FunctionCode,
        group: &CallGroup,
        bits: &[bool],
        record: &mut DecodedRecord,
    ) {
        let Some(descriptors) = self.descriptors.get(&fc) else {
            return;
        };

        for (offset, bit) in bits
            .iter()
            .take(usize::from(group.register_count))
            .enumerate()
        {
            let address = u32::from(group.start_address) + offset as u32;
            let Some(desc) = u16::try_from(address)
                .ok()
                .and_then(|a| descriptors.get(&a))
            else {
                debug!("{} address {}: no tag starts here", fc, address);
                continue;
            };
            // Bits are published as read; scaling only applies to register values
            record.insert(desc.tag_name.clone(), TagValue::Int(i64::from(*bit)));
        }
    }

    /// Walk FC03/FC04 words, consuming each value's width at its start address
    pub fn decode_registers(
        &self,
        fc: FunctionCode,
        group: &CallGroup,
        words: &[u16],
        record: &mut DecodedRecord,
    ) {
        let Some(descriptors) = self.descriptors.get(&fc) else {
            return;
        };

        let mut offset = 0usize;
        while offset < words.len() {
            let address = u32::from(group.start_address) + offset as u32;
            let Some(desc) = u16::try_from(address)
                .ok()
                .and_then(|a| descriptors.get(&a))
            else {
                debug!("{} address {}: continuation word, skipped", fc, address);
                offset += 1;
                continue;
            };

            if let Err(e) = decode_value(desc, &words[offset..], record) {
                error!(
                    "{} address {} ({}): {}, tag skipped",
                    fc, address, desc.tag_name, e
                );
            }
            offset += usize::from(desc.register_count.max(1));
        }
    }
}

fn scaled(desc: &AddressDescriptor, raw: TagValue) -> TagValue {
    match desc.scaling.apply(raw.as_f64()) {
        Some(value) => TagValue::Float(value),
        None => raw,
    }
}

/// Errors raised while decoding a register value
#[derive(Debug)]
enum DecodeFailure {
    Codec(CodecError),
    Discrete(DataType),
}

impl fmt::Display for DecodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeFailure::Codec(e) => write!(f, "{}", e),
            DecodeFailure::Discrete(dt) => {
                write!(f, "data type {} cannot be decoded from registers", dt)
            },
        }
    }
}

impl From<CodecError> for DecodeFailure {
    fn from(err: CodecError) -> Self {
        DecodeFailure::Codec(err)
    }
}

fn decode_value(
    desc: &AddressDescriptor,
    words: &[u16],
    record: &mut DecodedRecord,
) -> std::result::Result<(), DecodeFailure> {
    let float32 = |order: ByteOrder| -> std::result::Result<TagValue, CodecError> {
        Ok(TagValue::Float(f64::from(regs_to_f32(
            regs_array::<2>(words)?,
            order,
        ))))
    };

    let raw = match desc.data_type {
        DataType::Uint16 => TagValue::Int(i64::from(reg_to_u16(regs_array::<1>(words)?[0], false))),
        DataType::Sint16 => TagValue::Int(i64::from(reg_to_i16(regs_array::<1>(words)?[0], false))),
        DataType::Ruint16 => TagValue::Int(i64::from(reg_to_u16(regs_array::<1>(words)?[0], true))),
        DataType::Rsint16 => TagValue::Int(i64::from(reg_to_i16(regs_array::<1>(words)?[0], true))),
        DataType::Float32 => float32(ByteOrder::BigEndian)?,
        DataType::Rfloat32ByteSwap => float32(ByteOrder::LittleEndianSwap)?,
        DataType::Rfloat32WordSwap => float32(ByteOrder::BigEndianSwap)?,
        DataType::Rfloat32ByteWordSwap => float32(ByteOrder::LittleEndian)?,
        DataType::Float64 => TagValue::Float(regs_to_f64(regs_array::<4>(words)?)),
        DataType::PackedBool => {
            let [word] = regs_array::<1>(words)?;
            record.insert(
                format!("{}_uint16_value", desc.tag_name),
                TagValue::Int(i64::from(word)),
            );
            for (bit, set) in unpack_bits(word).into_iter().enumerate() {
                record.insert(
                    format!("{}_bit{}", desc.tag_name, bit),
                    TagValue::Int(i64::from(set)),
                );
            }
            return Ok(());
        },
        DataType::Di | DataType::Coil => return Err(DecodeFailure::Discrete(desc.data_type)),
    };

    record.insert(desc.tag_name.clone(), scaled(desc, raw));
    Ok(())
}
