// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The external object-publication surface.
//!
//! The agent materializes entities, sensors, effecters and FRU record sets
//! into object paths and hands them to a [`Publisher`]; what that means
//! (D-Bus, Redfish, a test recorder) is the embedder's business. The
//! sensor-polling pause hooks live here too since the polling machinery
//! sits behind the same surface.

use pldm_messages::pdr::Entity;
use pldm_messages::Tid;
use slog::info;
use slog::Logger;

/// Firmware activation outcome reflected to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationState {
    Activating,
    Active,
    Failed,
}

/// A materialized sensor: exactly one per id within a device.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorDescriptor {
    pub id: u16,
    pub entity: Entity,
    pub name: String,
    pub path: String,
    pub kind: SensorKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SensorKind {
    Numeric { base_unit: u8, unit_modifier: i8, resolution: f32, offset: f32 },
    State { state_set_id: u16, possible_states: Vec<u16> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct EffecterDescriptor {
    pub id: u16,
    pub entity: Entity,
    pub name: String,
    pub path: String,
    pub kind: EffecterKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EffecterKind {
    Numeric { base_unit: u8, unit_modifier: i8, resolution: f32, offset: f32 },
    State { state_set_id: u16, possible_states: Vec<u16> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FruRecordSetDescriptor {
    pub record_set_id: u16,
    pub entity: Entity,
    pub path: String,
}

pub trait Publisher: Send + Sync {
    fn register_device(&self, tid: Tid, name: &str);
    fn register_entity(&self, tid: Tid, path: &str, entity: Entity);
    fn register_sensor(&self, tid: Tid, sensor: &SensorDescriptor);
    fn register_effecter(&self, tid: Tid, effecter: &EffecterDescriptor);
    fn register_fru_record_set(&self, tid: Tid, fru: &FruRecordSetDescriptor);
    fn remove_device(&self, tid: Tid);

    fn update_progress(&self, percent: u8);
    fn set_activation(&self, state: ActivationState);

    /// Platform-subsystem hooks: sensor polling is paused for the duration
    /// of device init and firmware update.
    fn pause_sensor_polling(&self);
    fn resume_sensor_polling(&self);
}

/// Publisher that just narrates registrations into the log. Used by the
/// daemon until a real surface is wired up, and handy in tests.
pub struct LogPublisher {
    log: Logger,
}

impl LogPublisher {
    pub fn new(log: Logger) -> Self {
        Self { log }
    }
}

impl Publisher for LogPublisher {
    fn register_device(&self, tid: Tid, name: &str) {
        info!(self.log, "device registered"; "tid" => tid, "name" => name);
    }

    fn register_entity(&self, tid: Tid, path: &str, _entity: Entity) {
        info!(self.log, "entity registered"; "tid" => tid, "path" => path);
    }

    fn register_sensor(&self, tid: Tid, sensor: &SensorDescriptor) {
        info!(
            self.log, "sensor registered";
            "tid" => tid,
            "id" => sensor.id,
            "path" => &sensor.path,
        );
    }

    fn register_effecter(&self, tid: Tid, effecter: &EffecterDescriptor) {
        info!(
            self.log, "effecter registered";
            "tid" => tid,
            "id" => effecter.id,
            "path" => &effecter.path,
        );
    }

    fn register_fru_record_set(&self, tid: Tid, fru: &FruRecordSetDescriptor) {
        info!(
            self.log, "FRU record set registered";
            "tid" => tid,
            "rsi" => fru.record_set_id,
            "path" => &fru.path,
        );
    }

    fn remove_device(&self, tid: Tid) {
        info!(self.log, "device removed"; "tid" => tid);
    }

    fn update_progress(&self, percent: u8) {
        info!(self.log, "update progress"; "percent" => percent);
    }

    fn set_activation(&self, state: ActivationState) {
        info!(self.log, "activation state"; "state" => ?state);
    }

    fn pause_sensor_polling(&self) {
        info!(self.log, "sensor polling paused");
    }

    fn resume_sensor_polling(&self) {
        info!(self.log, "sensor polling resumed");
    }
}
