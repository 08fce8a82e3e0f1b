//! Container telemetry types and the significant-change filter.
//!
//! The filter is a write-suppression optimization for the ledger. It never
//! touches the claim slot.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Default absolute percent delta that counts as significant.
pub const DEFAULT_SIGNIFICANT_DELTA: u8 = 5;

/// One of the two fill-level monitored containers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerId {
    #[serde(rename = "contePlastico")]
    Plastic,
    #[serde(rename = "conteAluminio")]
    Aluminum,
}

impl ContainerId {
    /// Identifier used on the wire and as the ledger key.
    pub fn as_wire(self) -> &'static str {
        match self {
            ContainerId::Plastic => "contePlastico",
            ContainerId::Aluminum => "conteAluminio",
        }
    }

    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "contePlastico" => Some(ContainerId::Plastic),
            "conteAluminio" => Some(ContainerId::Aluminum),
            _ => None,
        }
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FillState {
    #[serde(rename = "Vacío")]
    Empty,
    #[serde(rename = "Medio")]
    Half,
    #[serde(rename = "Lleno")]
    Full,
}

impl FillState {
    pub fn as_wire(self) -> &'static str {
        match self {
            FillState::Empty => "Vacío",
            FillState::Half => "Medio",
            FillState::Full => "Lleno",
        }
    }

    /// Accepts the sensor firmware's names and their English equivalents.
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "Vacío" | "Vacio" | "Empty" => Some(FillState::Empty),
            "Medio" | "Half" => Some(FillState::Half),
            "Lleno" | "Full" => Some(FillState::Full),
            _ => None,
        }
    }
}

impl fmt::Display for FillState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// A validated fill-level report.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub target: ContainerId,
    pub percent: u8,
    pub state: FillState,
    pub distance_cm: f64,
    pub device_id: String,
    pub ts: i64,
}

/// Last successfully written status for one container.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContainerStatus {
    pub percent: u8,
    pub state: FillState,
}

pub struct SignificantChangeFilter {
    last: HashMap<ContainerId, ContainerStatus>,
    min_delta: u8,
}

impl Default for SignificantChangeFilter {
    fn default() -> Self {
        Self::new(DEFAULT_SIGNIFICANT_DELTA)
    }
}

impl SignificantChangeFilter {
    pub fn new(min_delta: u8) -> Self {
        Self {
            last: HashMap::new(),
            min_delta,
        }
    }

    pub fn is_significant(&self, container: ContainerId, percent: u8, state: FillState) -> bool {
        match self.last.get(&container) {
            None => true,
            Some(last) => last.state != state || last.percent.abs_diff(percent) >= self.min_delta,
        }
    }

    /// Remember a status after it was written to the ledger.
    pub fn record(&mut self, container: ContainerId, percent: u8, state: FillState) {
        self.last
            .insert(container, ContainerStatus { percent, state });
    }

    pub fn last(&self, container: ContainerId) -> Option<ContainerStatus> {
        self.last.get(&container).copied()
    }
}
