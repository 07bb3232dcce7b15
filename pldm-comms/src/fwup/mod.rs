// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Firmware update: per-device inventory, package-to-device matching, and
//! the update orchestrator in [`update`].

pub mod update;

use pldm_messages::completion;
use pldm_messages::fwup;
use pldm_messages::fwup::Descriptor;
use pldm_messages::fwup::FirmwareParameters;
use pldm_messages::Tid;
use slog::info;
use slog::Logger;

use crate::error::CommunicationError;
use crate::error::ProtocolError;
use crate::error::UpdateError;
use crate::package::FirmwarePackage;
use crate::SharedLink;
use crate::COMMAND_RETRIES;
use crate::COMMAND_TIMEOUT;

/// What firmware-update init learns about a device, used later to match
/// package device-id records against termini.
#[derive(Debug, Clone)]
pub struct FwInventory {
    pub descriptors: Vec<Descriptor>,
    pub parameters: FirmwareParameters,
}

/// Run QueryDeviceIdentifiers and GetFirmwareParameters against `tid`.
pub async fn inventory_init(
    link: &SharedLink,
    tid: Tid,
    log: &Logger,
) -> Result<FwInventory, UpdateError> {
    let req =
        fwup::encode_query_device_identifiers_req(link.next_instance_id(tid));
    let resp = link
        .send_request(tid, req, COMMAND_TIMEOUT, COMMAND_RETRIES)
        .await
        .map_err(UpdateError::Communication)?;
    let (cc, descriptors) = fwup::decode_query_device_identifiers_resp(&resp)
        .map_err(CommunicationError::Decode)?;
    if cc != completion::SUCCESS {
        return Err(ProtocolError::CompletionCode(cc).into());
    }

    let req =
        fwup::encode_get_firmware_parameters_req(link.next_instance_id(tid));
    let resp = link
        .send_request(tid, req, COMMAND_TIMEOUT, COMMAND_RETRIES)
        .await
        .map_err(UpdateError::Communication)?;
    let parameters = fwup::decode_get_firmware_parameters_resp(&resp)
        .map_err(CommunicationError::Decode)?;
    if parameters.completion_code != completion::SUCCESS {
        return Err(
            ProtocolError::CompletionCode(parameters.completion_code).into()
        );
    }

    info!(
        log, "firmware inventory complete";
        "tid" => tid,
        "descriptors" => descriptors.len(),
        "components" => parameters.components.len(),
    );
    Ok(FwInventory { descriptors, parameters })
}

/// Match package device-id records to known termini: a record applies to a
/// device when every descriptor in the record appears in the device's
/// descriptor set. Returns `(device record index, tid)` pairs.
pub fn match_termini<'a>(
    package: &dyn FirmwarePackage,
    devices: impl Iterator<Item = (Tid, &'a FwInventory)>,
) -> Vec<(usize, Tid)> {
    let mut matched = Vec::new();
    for (tid, inventory) in devices {
        for (index, record) in package.device_records().iter().enumerate() {
            let applies = !record.descriptors.is_empty()
                && record
                    .descriptors
                    .iter()
                    .all(|d| inventory.descriptors.contains(d));
            if applies {
                matched.push((index, tid));
                break;
            }
        }
    }
    matched
}
