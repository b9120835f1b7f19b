//! Channel state and update validation.
//!
//! A channel carries three numeric readings. Providers push partial updates
//! ("deltas") that are validated against the field whitelist, merged into the
//! channel state, and fanned out unchanged to consumers.

use crate::errors::RelayError;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

/// Whitelisted state fields, in validation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateField {
    Solar,
    Battery,
    Consumption,
}

impl StateField {
    /// All fields, in the order they are validated.
    pub const ALL: [StateField; 3] = [
        StateField::Solar,
        StateField::Battery,
        StateField::Consumption,
    ];

    /// Wire name of the field.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            StateField::Solar => "solar",
            StateField::Battery => "battery",
            StateField::Consumption => "consumption",
        }
    }

    /// Look up a field by its wire name.
    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.as_str() == key)
    }
}

impl fmt::Display for StateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated partial update. Every present value is a finite number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StateDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solar: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumption: Option<f64>,
}

impl StateDelta {
    /// Returns true if the delta carries no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.solar.is_none() && self.battery.is_none() && self.consumption.is_none()
    }

    fn set(&mut self, field: StateField, value: f64) {
        match field {
            StateField::Solar => self.solar = Some(value),
            StateField::Battery => self.battery = Some(value),
            StateField::Consumption => self.consumption = Some(value),
        }
    }
}

/// Full channel state. Fields stay absent until a provider first sets them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ChannelState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solar: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumption: Option<f64>,
}

impl ChannelState {
    /// Shallow merge: fields present in the delta overwrite, others are kept.
    pub fn merge(&mut self, delta: &StateDelta) {
        if let Some(solar) = delta.solar {
            self.solar = Some(solar);
        }
        if let Some(battery) = delta.battery {
            self.battery = Some(battery);
        }
        if let Some(consumption) = delta.consumption {
            self.consumption = Some(consumption);
        }
    }
}

/// Validates raw update payloads against the field whitelist.
#[derive(Debug, Clone, Copy, Default)]
pub struct StateValidator;

impl StateValidator {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Validate a raw update payload.
    ///
    /// Values are checked first (solar, battery, consumption), then keys.
    /// The first failure wins; nothing is mutated either way.
    ///
    /// # Errors
    ///
    /// - `RelayError::InvalidValue` - a known field holds anything other than a finite number
    /// - `RelayError::InvalidField` - the payload has a key outside the whitelist
    pub fn validate(&self, payload: &Map<String, Value>) -> Result<StateDelta, RelayError> {
        let mut delta = StateDelta::default();

        for field in StateField::ALL {
            if let Some(raw) = payload.get(field.as_str()) {
                let value = raw
                    .as_f64()
                    .filter(|v| v.is_finite())
                    .ok_or(RelayError::InvalidValue { field })?;
                delta.set(field, value);
            }
        }

        if let Some(key) = payload
            .keys()
            .find(|key| StateField::from_key(key).is_none())
        {
            return Err(RelayError::InvalidField { key: key.clone() });
        }

        Ok(delta)
    }
}
