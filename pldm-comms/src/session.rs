// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Top-level coordinator.
//!
//! Device arrivals are initialized in order (base, then platform/PDR, then
//! firmware-update inventory) and torn down in reverse. Initialization and
//! update sessions all run on the controller's single task, so inits are
//! naturally serialized and at most one update session is active; events
//! arriving mid-session queue up behind it.

use fxhash::FxHashMap;
use pldm_messages::Eid;
use pldm_messages::PldmType;
use pldm_messages::Tid;
use slog::error;
use slog::info;
use slog::warn;
use slog::Logger;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::base;
use crate::base::DeviceInfo;
use crate::error::SessionError;
use crate::fwup;
use crate::fwup::update::UpdateSession;
use crate::fwup::FwInventory;
use crate::package::FirmwarePackage;
use crate::pdr::PdrManager;
use crate::publish::ActivationState;
use crate::publish::Publisher;
use crate::transport::TransportEvent;
use crate::SharedLink;

pub struct ManagedDevice {
    pub info: DeviceInfo,
    pub pdr: Option<PdrManager>,
    pub fw_inventory: Option<FwInventory>,
}

pub struct SessionController {
    link: SharedLink,
    publisher: Arc<dyn Publisher>,
    devices: FxHashMap<Tid, ManagedDevice>,
    update_in_progress: bool,
    log: Logger,
}

impl SessionController {
    pub fn new(
        link: SharedLink,
        publisher: Arc<dyn Publisher>,
        log: Logger,
    ) -> Self {
        Self {
            link,
            publisher,
            devices: FxHashMap::default(),
            update_in_progress: false,
            log,
        }
    }

    pub fn link(&self) -> &SharedLink {
        &self.link
    }

    pub fn device(&self, tid: Tid) -> Option<&ManagedDevice> {
        self.devices.get(&tid)
    }

    pub fn device_tids(&self) -> Vec<Tid> {
        self.devices.keys().copied().collect()
    }

    pub fn update_in_progress(&self) -> bool {
        self.update_in_progress
    }

    pub async fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::DeviceAdded(eid) => {
                self.publisher.pause_sensor_polling();
                self.device_added(eid).await;
                self.publisher.resume_sensor_polling();
            }
            TransportEvent::DeviceRemoved(eid) => {
                match self.link.mapped_tid(eid) {
                    Some(tid) => self.remove_device(tid),
                    None => {
                        warn!(
                            self.log, "removal event for unmapped EID";
                            "eid" => eid,
                        );
                    }
                }
            }
        }
    }

    async fn device_added(&mut self, eid: Eid) {
        if self.link.mapped_tid(eid).is_some() {
            warn!(self.log, "EID already initialized"; "eid" => eid);
            return;
        }
        let Some(tid) = base::allocate_tid(&self.link) else {
            error!(self.log, "TID space exhausted"; "eid" => eid);
            return;
        };
        info!(self.log, "initializing device"; "eid" => eid, "tid" => tid);

        let info = match base::base_init(&self.link, eid, tid, &self.log).await
        {
            Ok(info) => info,
            Err(err) => {
                error!(
                    self.log, "base init failed";
                    "eid" => eid,
                    "err" => %err,
                );
                return;
            }
        };

        let pdr = if info.supports_type(PldmType::Platform) {
            match PdrManager::initialize(
                &self.link,
                tid,
                &self.publisher,
                self.log.new(slog::o!("tid" => tid)),
            )
            .await
            {
                Ok(manager) => Some(manager),
                Err(err) => {
                    error!(
                        self.log, "platform init failed";
                        "tid" => tid,
                        "err" => %err,
                    );
                    None
                }
            }
        } else {
            None
        };

        let fw_inventory = if info.supports_type(PldmType::FirmwareUpdate) {
            match fwup::inventory_init(&self.link, tid, &self.log).await {
                Ok(inventory) => Some(inventory),
                Err(err) => {
                    error!(
                        self.log, "firmware update init failed";
                        "tid" => tid,
                        "err" => %err,
                    );
                    None
                }
            }
        } else {
            None
        };

        self.devices.insert(tid, ManagedDevice { info, pdr, fw_inventory });
    }

    /// Tear down a device in reverse init order.
    pub fn remove_device(&mut self, tid: Tid) {
        let Some(mut device) = self.devices.remove(&tid) else {
            warn!(self.log, "remove for unknown device"; "tid" => tid);
            return;
        };
        info!(self.log, "deleting device"; "tid" => tid);
        device.fw_inventory.take();
        if device.pdr.take().is_some() {
            self.publisher.remove_device(tid);
        }
        self.link.unmap_device(tid);
    }

    pub fn shutdown(&mut self) {
        for tid in self.device_tids() {
            self.remove_device(tid);
        }
    }

    /// Run a firmware update across every matched device, serially.
    ///
    /// Per-device failures are independent; the aggregate outcome lands on
    /// the Activation property. Sensor polling stays paused for the whole
    /// session.
    pub async fn run_update(
        &mut self,
        package: Arc<dyn FirmwarePackage>,
    ) -> Result<(), SessionError> {
        if self.update_in_progress {
            return Err(SessionError::AlreadyRunning);
        }
        self.update_in_progress = true;
        self.publisher.pause_sensor_polling();

        let matched = fwup::match_termini(
            package.as_ref(),
            self.devices.iter().filter_map(|(tid, device)| {
                device.fw_inventory.as_ref().map(|inv| (*tid, inv))
            }),
        );
        if matched.is_empty() {
            warn!(self.log, "no device matches the update package");
        }

        let mut all_ok = true;
        let mut max_activation_secs = 0u16;
        for &(record_index, tid) in &matched {
            let mut session = UpdateSession::new(
                self.link.clone(),
                tid,
                record_index,
                Arc::clone(&package),
                Arc::clone(&self.publisher),
                &self.log,
            );
            match session.run().await {
                Ok(outcome) => {
                    max_activation_secs = max_activation_secs
                        .max(outcome.estimated_activation_secs);
                }
                Err(err) => {
                    error!(
                        self.log, "update session failed";
                        "tid" => tid,
                        "err" => %err,
                    );
                    all_ok = false;
                    session.terminate().await;
                }
            }
        }

        if !matched.is_empty() {
            // Give every successfully updated device its self-contained
            // activation window, then make the transport look again.
            sleep(Duration::from_secs(u64::from(max_activation_secs))).await;
            for &(_, tid) in &matched {
                self.link.trigger_rediscovery(tid).await;
            }
        }

        self.publisher.resume_sensor_polling();
        self.publisher.set_activation(if all_ok {
            ActivationState::Active
        } else {
            ActivationState::Failed
        });
        self.update_in_progress = false;
        Ok(())
    }
}
