//! Bench connection state.
//!
//! The aggregate answer to "what is plugged in right now". It holds no
//! transport or protocol handles (callers that need both state and handles
//! pass them separately), and it is published by whole-value assignment, so
//! readers on other threads never observe a partial update.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub mod detect;

pub use detect::{DetectedEndpoint, DetectionResult, DetectionRunner};

/// The four instrument roles of the bench.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquipmentKind {
    Multimeter,
    Generator,
    PowerSupply,
    Oscilloscope,
}

impl EquipmentKind {
    pub const ALL: [EquipmentKind; 4] = [
        EquipmentKind::Multimeter,
        EquipmentKind::Generator,
        EquipmentKind::PowerSupply,
        EquipmentKind::Oscilloscope,
    ];
}

impl fmt::Display for EquipmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EquipmentKind::Multimeter => "multimeter",
            EquipmentKind::Generator => "generator",
            EquipmentKind::PowerSupply => "power_supply",
            EquipmentKind::Oscilloscope => "oscilloscope",
        };
        f.write_str(name)
    }
}

/// Connection snapshot of one instrument role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentState {
    pub connected: bool,
    pub port_or_device: Option<String>,
    pub model_or_label: Option<String>,
    pub detected: bool,
}

/// Mapping from every [`EquipmentKind`] to its [`EquipmentState`].
///
/// Every kind is always present (default-constructed as disconnected), and
/// the mutation API keeps `connected ⇒ port_or_device present` true by
/// construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchConnectionState {
    states: HashMap<EquipmentKind, EquipmentState>,
}

impl Default for BenchConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

impl BenchConnectionState {
    pub fn new() -> Self {
        let states = EquipmentKind::ALL
            .into_iter()
            .map(|kind| (kind, EquipmentState::default()))
            .collect();
        Self { states }
    }

    pub fn state(&self, kind: EquipmentKind) -> &EquipmentState {
        // Every kind is inserted at construction.
        &self.states[&kind]
    }

    fn state_mut(&mut self, kind: EquipmentKind) -> &mut EquipmentState {
        self.states.entry(kind).or_default()
    }

    /// Mark a kind connected on the given port or device.
    pub fn set_connected(&mut self, kind: EquipmentKind, port_or_device: &str, model: Option<&str>) {
        let state = self.state_mut(kind);
        state.connected = true;
        state.port_or_device = Some(port_or_device.to_string());
        if model.is_some() {
            state.model_or_label = model.map(str::to_string);
        }
    }

    /// Mark a kind disconnected; the last-known port is kept for display.
    pub fn set_disconnected(&mut self, kind: EquipmentKind) {
        self.state_mut(kind).connected = false;
    }

    /// Fold an autodetection result in: found kinds become `detected` with
    /// their endpoint recorded, without being marked connected.
    pub fn update_from_detection(&mut self, result: &DetectionResult) {
        for kind in EquipmentKind::ALL {
            if let Some(endpoint) = result.endpoint(kind) {
                let state = self.state_mut(kind);
                state.detected = true;
                state.port_or_device = Some(endpoint.address());
                if let Some(label) = endpoint.label() {
                    state.model_or_label = Some(label.to_string());
                }
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (EquipmentKind, &EquipmentState)> {
        EquipmentKind::ALL.into_iter().map(|kind| (kind, self.state(kind)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_present_from_the_start() {
        let state = BenchConnectionState::new();
        for kind in EquipmentKind::ALL {
            assert!(!state.state(kind).connected);
            assert!(state.state(kind).port_or_device.is_none());
        }
    }

    #[test]
    fn connected_implies_port_present() {
        let mut state = BenchConnectionState::new();
        state.set_connected(EquipmentKind::Generator, "COM4", None);
        let generator = state.state(EquipmentKind::Generator);
        assert!(generator.connected);
        assert_eq!(generator.port_or_device.as_deref(), Some("COM4"));

        state.set_disconnected(EquipmentKind::Generator);
        assert!(!state.state(EquipmentKind::Generator).connected);
    }
}
