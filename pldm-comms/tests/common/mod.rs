// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scripted device plumbing shared by the scenario tests.
//!
//! `ChannelTransport` implements the raw transport over in-process
//! channels: agent requests are delivered to a device task which replies
//! through a oneshot, agent one-way responses are delivered through an
//! mpsc, and the device task injects its own requests by calling
//! `SharedLink::handle_inbound` directly.

// Each scenario file compiles its own copy of this module and uses a
// different subset of it.
#![allow(dead_code)]

use async_trait::async_trait;
use pldm_messages::Eid;
use pldm_messages::Tid;
use pldm_comms::error::CommunicationError;
use pldm_comms::package::DeviceRecord;
use pldm_comms::package::FirmwarePackage;
use pldm_comms::package::PackageComponent;
use pldm_comms::publish::ActivationState;
use pldm_comms::publish::EffecterDescriptor;
use pldm_comms::publish::FruRecordSetDescriptor;
use pldm_comms::publish::Publisher;
use pldm_comms::publish::SensorDescriptor;
use pldm_comms::transport::RawTransport;
use pldm_comms::transport::MESSAGE_TYPE_PLDM;
use pldm_comms::SharedLink;
use pldm_messages::pdr::Entity;
use slog::Logger;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::time::timeout;

pub const EID: Eid = 0x08;
pub const TID: Tid = 0x01;

/// An agent request awaiting a device reply.
pub struct Outgoing {
    pub eid: Eid,
    /// Request payload including the message-type prefix byte.
    pub payload: Vec<u8>,
    pub reply: oneshot::Sender<Vec<u8>>,
}

#[derive(Default)]
pub struct TransportCounters {
    pub reserves: usize,
    pub releases: usize,
    pub rediscoveries: usize,
    pub last_hold: Option<Duration>,
}

pub struct ChannelTransport {
    requests: mpsc::UnboundedSender<Outgoing>,
    responses: mpsc::UnboundedSender<Vec<u8>>,
    pub counters: Mutex<TransportCounters>,
}

impl ChannelTransport {
    /// Returns the transport plus the device-side receivers for agent
    /// requests and one-way agent responses.
    pub fn new() -> (
        Arc<Self>,
        mpsc::UnboundedReceiver<Outgoing>,
        mpsc::UnboundedReceiver<Vec<u8>>,
    ) {
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (resp_tx, resp_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            requests: req_tx,
            responses: resp_tx,
            counters: Mutex::new(TransportCounters::default()),
        });
        (transport, req_rx, resp_rx)
    }
}

#[async_trait]
impl RawTransport for ChannelTransport {
    async fn send_receive(
        &self,
        eid: Eid,
        payload: Vec<u8>,
        timeout_duration: Duration,
    ) -> Result<Vec<u8>, CommunicationError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(Outgoing { eid, payload, reply: reply_tx })
            .map_err(|_| CommunicationError::Refused)?;
        match timeout(timeout_duration, reply_rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(CommunicationError::Refused),
            Err(_) => Err(CommunicationError::Timeout),
        }
    }

    async fn send(
        &self,
        _eid: Eid,
        _msg_tag: u8,
        _tag_owner: bool,
        payload: Vec<u8>,
    ) -> Result<(), CommunicationError> {
        self.responses.send(payload).map_err(|_| CommunicationError::Refused)
    }

    async fn reserve(
        &self,
        _eid: Eid,
        hold: Duration,
    ) -> Result<(), CommunicationError> {
        let mut counters = self.counters.lock().unwrap();
        counters.reserves += 1;
        counters.last_hold = Some(hold);
        Ok(())
    }

    async fn release(&self, _eid: Eid) -> Result<(), CommunicationError> {
        self.counters.lock().unwrap().releases += 1;
        Ok(())
    }

    fn device_location(&self, _eid: Eid) -> Option<String> {
        None
    }

    async fn trigger_rediscovery(&self, _eid: Eid) {
        self.counters.lock().unwrap().rediscoveries += 1;
    }
}

/// Push a device-initiated request at the agent and await the one-way
/// response. Retries the injection when the agent had not registered its
/// expectation yet (the link drops unexpected packets by design).
pub async fn device_request(
    link: &SharedLink,
    responses: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    request: &[u8],
) -> Option<Vec<u8>> {
    for _ in 0..50 {
        let mut framed = vec![MESSAGE_TYPE_PLDM];
        framed.extend_from_slice(request);
        link.handle_inbound(EID, 0, true, &framed);
        match timeout(Duration::from_millis(200), responses.recv()).await {
            Ok(Some(mut response)) => {
                assert_eq!(response.remove(0), MESSAGE_TYPE_PLDM);
                return Some(response);
            }
            Ok(None) => return None,
            Err(_) => continue,
        }
    }
    None
}

/// Firmware package fixture implementing the accessor trait directly.
pub struct TestPackage {
    pub records: Vec<DeviceRecord>,
    pub component_table: Vec<PackageComponent>,
    pub blob: Vec<u8>,
}

impl TestPackage {
    /// One device record applicable to `images.len()` components; the blob
    /// is the images laid end to end.
    pub fn new<T: AsRef<[u8]>>(images: &[T]) -> Self {
        let mut blob = Vec::new();
        let mut component_table = Vec::new();
        for (index, image) in images.iter().enumerate() {
            let image = image.as_ref();
            component_table.push(PackageComponent {
                classification: 0x000A,
                identifier: index as u16,
                comparison_stamp: 1,
                options: 0,
                activation_method: 0,
                offset: blob.len() as u32,
                size: image.len() as u32,
                version_type: 0x01,
                version: format!("comp{index}-v1"),
            });
            blob.extend_from_slice(image);
        }
        let records = vec![DeviceRecord {
            option_flags: 0,
            image_set_version_type: 0x01,
            image_set_version: "set-v1".to_string(),
            applicable_components: (1u64 << images.len()) - 1,
            descriptors: Vec::new(),
            package_data: Vec::new(),
        }];
        Self { records, component_table, blob }
    }

    pub fn with_package_data(mut self, data: &[u8]) -> Self {
        self.records[0].package_data = data.to_vec();
        self
    }
}

impl FirmwarePackage for TestPackage {
    fn package_version(&self) -> &str {
        "test-package"
    }

    fn device_records(&self) -> &[DeviceRecord] {
        &self.records
    }

    fn components(&self) -> &[PackageComponent] {
        &self.component_table
    }

    fn read(
        &self,
        offset: u64,
        length: usize,
    ) -> Result<Vec<u8>, pldm_comms::error::UpdateError> {
        let start = offset as usize;
        self.blob
            .get(start..start + length)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| {
                pldm_comms::error::UpdateError::PackageRead(
                    "range outside blob".to_string(),
                )
            })
    }
}

/// Publisher that records everything it is told.
#[derive(Default)]
pub struct RecordingPublisher {
    pub progress: Mutex<Vec<u8>>,
    pub activation: Mutex<Vec<ActivationState>>,
    pub devices: Mutex<Vec<(Tid, String)>>,
    pub entities: Mutex<Vec<(Tid, String, Entity)>>,
    pub sensors: Mutex<Vec<SensorDescriptor>>,
    pub effecters: Mutex<Vec<EffecterDescriptor>>,
    pub fru_record_sets: Mutex<Vec<FruRecordSetDescriptor>>,
    pub polling_pauses: Mutex<usize>,
}

impl Publisher for RecordingPublisher {
    fn register_device(&self, tid: Tid, name: &str) {
        self.devices.lock().unwrap().push((tid, name.to_string()));
    }

    fn register_entity(&self, tid: Tid, path: &str, entity: Entity) {
        self.entities.lock().unwrap().push((tid, path.to_string(), entity));
    }

    fn register_sensor(&self, _tid: Tid, sensor: &SensorDescriptor) {
        self.sensors.lock().unwrap().push(sensor.clone());
    }

    fn register_effecter(&self, _tid: Tid, effecter: &EffecterDescriptor) {
        self.effecters.lock().unwrap().push(effecter.clone());
    }

    fn register_fru_record_set(&self, _tid: Tid, fru: &FruRecordSetDescriptor) {
        self.fru_record_sets.lock().unwrap().push(fru.clone());
    }

    fn remove_device(&self, _tid: Tid) {}

    fn update_progress(&self, percent: u8) {
        self.progress.lock().unwrap().push(percent);
    }

    fn set_activation(&self, state: ActivationState) {
        self.activation.lock().unwrap().push(state);
    }

    fn pause_sensor_polling(&self) {
        *self.polling_pauses.lock().unwrap() += 1;
    }

    fn resume_sensor_polling(&self) {}
}

pub fn test_log() -> Logger {
    Logger::root(slog::Discard, slog::o!())
}

/// A link with the test device already mapped.
pub fn linked_transport() -> (
    SharedLink,
    Arc<ChannelTransport>,
    mpsc::UnboundedReceiver<Outgoing>,
    mpsc::UnboundedReceiver<Vec<u8>>,
) {
    let (transport, req_rx, resp_rx) = ChannelTransport::new();
    let link =
        SharedLink::new(Arc::clone(&transport) as Arc<dyn RawTransport>, test_log());
    link.map_device(TID, EID).unwrap();
    (link, transport, req_rx, resp_rx)
}
