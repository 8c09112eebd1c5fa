//! Publish filter
//!
//! Keeps the last published value, time and limit flag of every tag and decides,
//! per cycle, which decoded values are forwarded to the broker.
//!
//! Decision order for a tag that has been published before:
//!
//! 1. low limit configured and `value <= low`: publish, limit flag set
//! 2. high limit configured and `value >= high`: publish, limit flag set
//! 3. limit flag set: publish the recovery, limit flag cleared
//! 4. report by exception: publish when `|value - last| > deadband`
//! 5. fixed interval: publish once the whole seconds since the last publish reach
//!    the interval (and, with force-deadband, the value also moved past the deadband)

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::poll::{DecodedRecord, TagValue};
use crate::template::{PublishMode, PublishPolicy};

/// What was last sent for a tag
#[derive(Debug, Clone, PartialEq)]
pub struct PublishState {
    pub last_value: TagValue,
    pub last_timestamp: DateTime<Utc>,
    pub limit_flag: bool,
}

/// Why a value was forwarded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishReason {
    Initial,
    LowLimit,
    HighLimit,
    Recovery,
    Deadband,
    Interval,
}

impl fmt::Display for PublishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PublishReason::Initial => "initial",
            PublishReason::LowLimit => "low limit",
            PublishReason::HighLimit => "high limit",
            PublishReason::Recovery => "recovery",
            PublishReason::Deadband => "deadband",
            PublishReason::Interval => "interval",
        };
        f.write_str(name)
    }
}

/// A value the gateway must publish
#[derive(Debug, Clone, PartialEq)]
pub struct PublishDecision {
    pub tag: String,
    pub value: TagValue,
    pub reason: PublishReason,
}

fn outside_limits(value: f64, policy: &PublishPolicy) -> bool {
    policy.low.is_some_and(|low| value <= low) || policy.high.is_some_and(|high| value >= high)
}

/// Per-tag publish state owned by one gateway
#[derive(Debug, Default)]
pub struct PublishFilter {
    force_deadband: bool,
    states: HashMap<String, PublishState>,
}

impl PublishFilter {
    pub fn new(force_deadband: bool) -> Self {
        Self {
            force_deadband,
            states: HashMap::new(),
        }
    }

    pub fn force_deadband(&self) -> bool {
        self.force_deadband
    }

    pub fn state(&self, tag: &str) -> Option<&PublishState> {
        self.states.get(tag)
    }

    pub fn tracked_tags(&self) -> usize {
        self.states.len()
    }

    /// Decide every tag of the record, stamping publishes with the record's UTC time
    pub fn evaluate(
        &mut self,
        record: &DecodedRecord,
        policies: &BTreeMap<String, PublishPolicy>,
    ) -> Vec<PublishDecision> {
        let now = record.timestamp_utc;
        let mut decisions = Vec::new();

        for (tag, value) in &record.values {
            let Some(policy) = policies.get(tag) else {
                debug!("No publish policy for {}, not published", tag);
                continue;
            };
            if let Some(reason) = self.decide(tag, *value, policy, now) {
                decisions.push(PublishDecision {
                    tag: tag.clone(),
                    value: *value,
                    reason,
                });
            }
        }
        decisions
    }

    /// Decide one tag and record the publish when there is one
    pub fn decide(
        &mut self,
        tag: &str,
        value: TagValue,
        policy: &PublishPolicy,
        now: DateTime<Utc>,
    ) -> Option<PublishReason> {
        let current = value.as_f64();

        let Some(state) = self.states.get_mut(tag) else {
            self.states.insert(
                tag.to_string(),
                PublishState {
                    last_value: value,
                    last_timestamp: now,
                    limit_flag: outside_limits(current, policy),
                },
            );
            return Some(PublishReason::Initial);
        };

        let moved = (current - state.last_value.as_f64()).abs() > policy.deadband;

        let (reason, limit_flag) = if policy.low.is_some_and(|low| current <= low) {
            (PublishReason::LowLimit, true)
        } else if policy.high.is_some_and(|high| current >= high) {
            (PublishReason::HighLimit, true)
        } else if state.limit_flag {
            (PublishReason::Recovery, false)
        } else {
            match policy.mode {
                PublishMode::Rbe if moved => (PublishReason::Deadband, false),
                PublishMode::Rbe => return None,
                PublishMode::Interval(interval) => {
                    let elapsed = now.timestamp() - state.last_timestamp.timestamp();
                    if elapsed as f64 >= interval && (!self.force_deadband || moved) {
                        (PublishReason::Interval, false)
                    } else {
                        return None;
                    }
                },
            }
        };

        *state = PublishState {
            last_value: value,
            last_timestamp: now,
            limit_flag,
        };
        Some(reason)
    }
}
