// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Base discovery: TID assignment and capability enumeration, run once per
//! endpoint when the transport reports it.

use fxhash::FxHashMap;
use pldm_messages::base;
use pldm_messages::base::CommandBitmap;
use pldm_messages::completion;
use pldm_messages::Eid;
use pldm_messages::PldmType;
use pldm_messages::Tid;
use pldm_messages::TransferOp;
use pldm_messages::Ver32;
use slog::info;
use slog::warn;
use slog::Logger;

use crate::error::CommunicationError;
use crate::SharedLink;
use crate::COMMAND_RETRIES;
use crate::COMMAND_TIMEOUT;

/// [PLDM type -> [version -> command bitmap]], cached per device. Subsystem
/// init is gated on the advertised types.
pub type CommandSupportTable = FxHashMap<u8, FxHashMap<Ver32, CommandBitmap>>;

/// Everything base init learns about a device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub tid: Tid,
    pub eid: Eid,
    pub command_table: CommandSupportTable,
}

impl DeviceInfo {
    pub fn supports_type(&self, pldm_type: PldmType) -> bool {
        self.command_table.contains_key(&(pldm_type as u8))
    }
}

/// Allocate a TID, assign it to the endpoint, and enumerate its
/// capabilities.
///
/// `tid` must come from [`allocate_tid`]; the endpoint is addressed
/// directly by EID because no binding exists until SetTID succeeds. Any
/// failure after the binding is created removes it again, so a device that
/// accepts SetTID and then goes quiet does not leave a stale TID behind.
pub async fn base_init(
    link: &SharedLink,
    eid: Eid,
    tid: Tid,
    log: &Logger,
) -> Result<DeviceInfo, CommunicationError> {
    let req = base::encode_set_tid_req(link.next_instance_id(tid), tid);
    let resp = link
        .send_request_to_eid(eid, req, COMMAND_TIMEOUT, COMMAND_RETRIES)
        .await?;
    let cc = base::decode_set_tid_resp(&resp)?;
    if cc != completion::SUCCESS {
        warn!(log, "SetTID failed"; "eid" => eid, "cc" => cc);
        return Err(CommunicationError::Malformed { reason: "SetTID refused" });
    }
    link.map_device(tid, eid)?;

    let command_table = match enumerate_capabilities(link, tid, log).await {
        Ok(command_table) => command_table,
        Err(err) => {
            link.unmap_device(tid);
            return Err(err);
        }
    };

    info!(
        log, "base init complete";
        "tid" => tid,
        "eid" => eid,
        "types" => command_table.len(),
    );
    Ok(DeviceInfo { tid, eid, command_table })
}

async fn enumerate_capabilities(
    link: &SharedLink,
    tid: Tid,
    log: &Logger,
) -> Result<CommandSupportTable, CommunicationError> {
    let req = base::encode_get_types_req(link.next_instance_id(tid));
    let resp =
        link.send_request(tid, req, COMMAND_TIMEOUT, COMMAND_RETRIES).await?;
    let (cc, types) = base::decode_get_types_resp(&resp)?;
    if cc != completion::SUCCESS {
        return Err(CommunicationError::Malformed {
            reason: "GetPLDMTypes refused",
        });
    }

    let mut command_table = CommandSupportTable::default();
    for pldm_type in types {
        match enumerate_type(link, tid, pldm_type).await {
            Ok((version, bitmap)) => {
                command_table
                    .entry(pldm_type as u8)
                    .or_default()
                    .insert(version, bitmap);
            }
            Err(err) => {
                warn!(
                    log, "capability enumeration failed for type";
                    "tid" => tid,
                    "pldm_type" => pldm_type as u8,
                    "err" => %err,
                );
            }
        }
    }
    if command_table.is_empty() {
        return Err(CommunicationError::Malformed {
            reason: "no usable PLDM types",
        });
    }
    Ok(command_table)
}

async fn enumerate_type(
    link: &SharedLink,
    tid: Tid,
    pldm_type: PldmType,
) -> Result<(Ver32, CommandBitmap), CommunicationError> {
    let req = base::encode_get_version_req(
        link.next_instance_id(tid),
        pldm_type,
        0,
        TransferOp::GetFirstPart,
    );
    let resp =
        link.send_request(tid, req, COMMAND_TIMEOUT, COMMAND_RETRIES).await?;
    let version_resp = base::decode_get_version_resp(&resp)?;
    if version_resp.completion_code != completion::SUCCESS {
        return Err(CommunicationError::Malformed {
            reason: "GetPLDMVersion refused",
        });
    }

    let req = base::encode_get_commands_req(
        link.next_instance_id(tid),
        pldm_type,
        version_resp.version,
    );
    let resp =
        link.send_request(tid, req, COMMAND_TIMEOUT, COMMAND_RETRIES).await?;
    let (cc, bitmap) = base::decode_get_commands_resp(&resp)?;
    if cc != completion::SUCCESS {
        return Err(CommunicationError::Malformed {
            reason: "GetPLDMCommands refused",
        });
    }
    Ok((version_resp.version, bitmap))
}

/// Lowest free TID in 1..=0xFE, skipping every TID currently mapped.
/// `None` when the whole space is in use.
pub fn allocate_tid(link: &SharedLink) -> Option<Tid> {
    let used = link.mapped_tids();
    (1..=0xFE).find(|tid| !used.contains(tid))
}
