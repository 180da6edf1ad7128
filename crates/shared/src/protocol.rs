use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::{
    domain::{Device, DeviceId, OwnerId, SessionId},
    error::ApiError,
};

pub const TEMPERATURE_RANGE: RangeInclusive<f64> = 20.0..=30.0;
pub const HUMIDITY_RANGE: RangeInclusive<f64> = 40.0..=60.0;
pub const WATER_LEVEL_RANGE: RangeInclusive<u8> = 1..=10;
pub const INSECT_COUNT_RANGE: RangeInclusive<u8> = 0..=10;

/// One synthetic sample for a single device. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetryReading {
    pub temperature: f64,
    pub humidity: f64,
    pub water_level: u8,
    pub insect_count: u8,
}

impl TelemetryReading {
    pub fn is_within_bounds(&self) -> bool {
        TEMPERATURE_RANGE.contains(&self.temperature)
            && HUMIDITY_RANGE.contains(&self.humidity)
            && WATER_LEVEL_RANGE.contains(&self.water_level)
            && INSECT_COUNT_RANGE.contains(&self.insect_count)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientRequest {
    AddDevice { name: String, kind: String },
    ToggleChaos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    DeviceCreated {
        device_id: DeviceId,
        name: String,
        kind: String,
    },
    TelemetryUpdate {
        device_id: DeviceId,
        reading: TelemetryReading,
    },
    ChaosToggled {
        chaos_enabled: bool,
    },
    ActionError(ApiError),
}

impl ServerEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::DeviceCreated { .. } => "device_created",
            Self::TelemetryUpdate { .. } => "telemetry_update",
            Self::ChaosToggled { .. } => "chaos_toggled",
            Self::ActionError(_) => "action_error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session_id: SessionId,
    pub chaos_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsRequest {
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerResponse {
    pub owner_id: OwnerId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChaosResponse {
    pub chaos_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardResponse {
    pub owner_id: OwnerId,
    pub chaos_enabled: bool,
    pub devices: Vec<Device>,
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
