// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Base discovery commands (DSP0240): TID assignment and capability
//! enumeration.

use crate::completion;
use crate::wire::Reader;
use crate::wire::Writer;
use crate::DecodeError;
use crate::Header;
use crate::PldmType;
use crate::Tid;
use crate::Ver32;

pub const CMD_SET_TID: u8 = 0x01;
pub const CMD_GET_TID: u8 = 0x02;
pub const CMD_GET_PLDM_VERSION: u8 = 0x03;
pub const CMD_GET_PLDM_TYPES: u8 = 0x04;
pub const CMD_GET_PLDM_COMMANDS: u8 = 0x05;

/// Per-(type, version) command support bitmap: bit `N*8 + M` of byte `N`
/// set means command `N*8 + M` is supported.
pub type CommandBitmap = [u8; 32];

fn request(instance_id: u8, command: u8) -> Writer {
    let mut out = Vec::new();
    Header::request(instance_id, PldmType::Base, command).encode(&mut out);
    Writer::from_vec(out)
}

fn response_body(payload: &[u8]) -> Result<(u8, Reader<'_>), DecodeError> {
    let (cc, body) = crate::split_response(payload)?;
    Ok((cc, Reader::new(body)))
}

pub fn encode_get_tid_req(instance_id: u8) -> Vec<u8> {
    request(instance_id, CMD_GET_TID).into_vec()
}

pub fn decode_get_tid_resp(payload: &[u8]) -> Result<(u8, Tid), DecodeError> {
    let (cc, mut r) = response_body(payload)?;
    if cc != completion::SUCCESS {
        return Ok((cc, 0));
    }
    let tid = r.get_u8()?;
    Ok((cc, tid))
}

pub fn encode_set_tid_req(instance_id: u8, tid: Tid) -> Vec<u8> {
    let mut w = request(instance_id, CMD_SET_TID);
    w.put_u8(tid);
    w.into_vec()
}

pub fn decode_set_tid_resp(payload: &[u8]) -> Result<u8, DecodeError> {
    let (cc, _) = crate::split_response(payload)?;
    Ok(cc)
}

pub fn encode_get_types_req(instance_id: u8) -> Vec<u8> {
    request(instance_id, CMD_GET_PLDM_TYPES).into_vec()
}

/// Returns the set of PLDM types advertised in the 8-byte type bitmap.
pub fn decode_get_types_resp(
    payload: &[u8],
) -> Result<(u8, Vec<PldmType>), DecodeError> {
    let (cc, mut r) = response_body(payload)?;
    if cc != completion::SUCCESS {
        return Ok((cc, Vec::new()));
    }
    let bitmap = r.get_bytes(8)?;
    let mut types = Vec::new();
    for bit in 0..64u8 {
        if bitmap[usize::from(bit / 8)] & (1 << (bit % 8)) != 0 {
            if let Some(pldm_type) = PldmType::from_u8(bit) {
                types.push(pldm_type);
            }
        }
    }
    Ok((cc, types))
}

pub fn encode_get_version_req(
    instance_id: u8,
    pldm_type: PldmType,
    transfer_handle: u32,
    transfer_op: crate::TransferOp,
) -> Vec<u8> {
    let mut w = request(instance_id, CMD_GET_PLDM_VERSION);
    w.put_u32(transfer_handle);
    w.put_u8(transfer_op as u8);
    w.put_u8(pldm_type as u8);
    w.into_vec()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetVersionResponse {
    pub completion_code: u8,
    pub next_transfer_handle: u32,
    pub transfer_flag: crate::TransferFlag,
    pub version: Ver32,
}

pub fn decode_get_version_resp(
    payload: &[u8],
) -> Result<GetVersionResponse, DecodeError> {
    let (cc, mut r) = response_body(payload)?;
    if cc != completion::SUCCESS {
        return Ok(GetVersionResponse {
            completion_code: cc,
            next_transfer_handle: 0,
            transfer_flag: crate::TransferFlag::StartAndEnd,
            version: Ver32::default(),
        });
    }
    let next_transfer_handle = r.get_u32()?;
    let transfer_flag = crate::TransferFlag::from_u8(r.get_u8()?)?;
    let version = Ver32::read(&mut r)?;
    Ok(GetVersionResponse {
        completion_code: cc,
        next_transfer_handle,
        transfer_flag,
        version,
    })
}

pub fn encode_get_commands_req(
    instance_id: u8,
    pldm_type: PldmType,
    version: Ver32,
) -> Vec<u8> {
    let mut w = request(instance_id, CMD_GET_PLDM_COMMANDS);
    w.put_u8(pldm_type as u8);
    version.write(&mut w);
    w.into_vec()
}

pub fn decode_get_commands_resp(
    payload: &[u8],
) -> Result<(u8, CommandBitmap), DecodeError> {
    let (cc, mut r) = response_body(payload)?;
    let mut bitmap = [0u8; 32];
    if cc != completion::SUCCESS {
        return Ok((cc, bitmap));
    }
    bitmap.copy_from_slice(r.get_bytes(32)?);
    Ok((cc, bitmap))
}

/// True if `command` is set in the support bitmap.
pub fn command_supported(bitmap: &CommandBitmap, command: u8) -> bool {
    bitmap[usize::from(command / 8)] & (1 << (command % 8)) != 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TransferFlag;
    use crate::TransferOp;

    #[test]
    fn get_tid_round_trip() {
        let req = encode_get_tid_req(3);
        assert_eq!(req, vec![0x83, 0x00, CMD_GET_TID]);

        let resp = [0x03, 0x00, CMD_GET_TID, 0x00, 0x0B];
        assert_eq!(decode_get_tid_resp(&resp).unwrap(), (0x00, 0x0B));
    }

    #[test]
    fn set_tid_request_body() {
        let req = encode_set_tid_req(1, 0x2A);
        assert_eq!(req, vec![0x81, 0x00, CMD_SET_TID, 0x2A]);
    }

    #[test]
    fn types_bitmap_decodes_supported_types() {
        // Bits 0 (base), 2 (platform), 4 (fru), and 5 (firmware update).
        let resp = [
            0x02, 0x00, CMD_GET_PLDM_TYPES, 0x00, //
            0b0011_0101, 0, 0, 0, 0, 0, 0, 0,
        ];
        let (cc, types) = decode_get_types_resp(&resp).unwrap();
        assert_eq!(cc, 0);
        assert_eq!(
            types,
            vec![
                PldmType::Base,
                PldmType::Platform,
                PldmType::Fru,
                PldmType::FirmwareUpdate,
            ]
        );
    }

    #[test]
    fn version_response() {
        let req = encode_get_version_req(
            0,
            PldmType::FirmwareUpdate,
            0,
            TransferOp::GetFirstPart,
        );
        assert_eq!(&req[3..], &[0, 0, 0, 0, 0x01, 0x05]);

        let resp = [
            0x00, 0x00, CMD_GET_PLDM_VERSION, 0x00, // header + cc
            0x00, 0x00, 0x00, 0x00, // next handle
            0x05, // start-and-end
            0x00, 0x00, 0x01, 0xF1, // ver32, little-endian: f1.1.0.0
        ];
        let decoded = decode_get_version_resp(&resp).unwrap();
        assert_eq!(decoded.transfer_flag, TransferFlag::StartAndEnd);
        assert_eq!(
            decoded.version,
            Ver32 { major: 0xF1, minor: 0x01, update: 0x00, alpha: 0x00 }
        );
    }

    #[test]
    fn command_bitmap_lookup() {
        let mut bitmap = [0u8; 32];
        bitmap[2] = 0b0000_0001; // command 16
        assert!(command_supported(&bitmap, 16));
        assert!(!command_supported(&bitmap, 17));
    }
}
