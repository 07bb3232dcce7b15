// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Platform monitoring commands used for descriptor-record retrieval
//! (DSP0248): GetPDRRepositoryInfo and the multi-part GetPDR transfer.

use crate::completion;
use crate::wire::Reader;
use crate::wire::Writer;
use crate::DecodeError;
use crate::Header;
use crate::PldmType;
use crate::TransferFlag;
use crate::TransferOp;

pub const CMD_GET_PDR_REPOSITORY_INFO: u8 = 0x50;
pub const CMD_GET_PDR: u8 = 0x51;

/// Repository state reported by GetPDRRepositoryInfo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RepositoryState {
    Available = 0x00,
    UpdateInProgress = 0x01,
    Failed = 0x02,
}

impl RepositoryState {
    pub fn from_u8(raw: u8) -> Result<Self, DecodeError> {
        match raw {
            0x00 => Ok(RepositoryState::Available),
            0x01 => Ok(RepositoryState::UpdateInProgress),
            0x02 => Ok(RepositoryState::Failed),
            _ => Err(DecodeError::InvalidField {
                field: "repository_state",
                value: u32::from(raw),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryInfo {
    pub state: RepositoryState,
    pub record_count: u32,
    pub repository_size: u32,
    pub largest_record_size: u32,
    pub data_transfer_handle_timeout: u8,
}

pub fn encode_repository_info_req(instance_id: u8) -> Vec<u8> {
    let mut out = Vec::new();
    Header::request(instance_id, PldmType::Platform, CMD_GET_PDR_REPOSITORY_INFO)
        .encode(&mut out);
    out
}

pub fn decode_repository_info_resp(
    payload: &[u8],
) -> Result<(u8, Option<RepositoryInfo>), DecodeError> {
    let (cc, body) = crate::split_response(payload)?;
    if cc != completion::SUCCESS {
        return Ok((cc, None));
    }
    let mut r = Reader::new(body);
    let state = RepositoryState::from_u8(r.get_u8()?)?;
    // Two 13-byte timestamps we have no use for.
    r.get_bytes(13)?;
    r.get_bytes(13)?;
    let record_count = r.get_u32()?;
    let repository_size = r.get_u32()?;
    let largest_record_size = r.get_u32()?;
    let data_transfer_handle_timeout = r.get_u8()?;
    Ok((
        cc,
        Some(RepositoryInfo {
            state,
            record_count,
            repository_size,
            largest_record_size,
            data_transfer_handle_timeout,
        }),
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetPdrRequest {
    pub record_handle: u32,
    pub data_transfer_handle: u32,
    pub transfer_op: TransferOp,
    pub request_count: u16,
    pub record_change_number: u16,
}

pub fn encode_get_pdr_req(instance_id: u8, req: &GetPdrRequest) -> Vec<u8> {
    let mut out = Vec::new();
    Header::request(instance_id, PldmType::Platform, CMD_GET_PDR)
        .encode(&mut out);
    let mut w = Writer::from_vec(out);
    w.put_u32(req.record_handle);
    w.put_u32(req.data_transfer_handle);
    w.put_u8(req.transfer_op as u8);
    w.put_u16(req.request_count);
    w.put_u16(req.record_change_number);
    w.into_vec()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetPdrResponse {
    pub completion_code: u8,
    pub next_record_handle: u32,
    pub next_data_transfer_handle: u32,
    pub transfer_flag: TransferFlag,
    pub record_data: Vec<u8>,
    /// CRC-8 over the reassembled record; present only on `End` segments.
    pub transfer_crc: Option<u8>,
}

pub fn decode_get_pdr_resp(payload: &[u8]) -> Result<GetPdrResponse, DecodeError> {
    let (cc, body) = crate::split_response(payload)?;
    if cc != completion::SUCCESS {
        return Ok(GetPdrResponse {
            completion_code: cc,
            next_record_handle: 0,
            next_data_transfer_handle: 0,
            transfer_flag: TransferFlag::StartAndEnd,
            record_data: Vec::new(),
            transfer_crc: None,
        });
    }
    let mut r = Reader::new(body);
    let next_record_handle = r.get_u32()?;
    let next_data_transfer_handle = r.get_u32()?;
    let transfer_flag = TransferFlag::from_u8(r.get_u8()?)?;
    let response_count = r.get_u16()?;
    let record_data = r.get_bytes(usize::from(response_count))?.to_vec();
    let transfer_crc = if transfer_flag == TransferFlag::End {
        Some(r.get_u8()?)
    } else {
        None
    };
    Ok(GetPdrResponse {
        completion_code: cc,
        next_record_handle,
        next_data_transfer_handle,
        transfer_flag,
        record_data,
        transfer_crc,
    })
}

/// Encode a GetPDR response. Used by the scripted device in tests.
pub fn encode_get_pdr_resp(instance_id: u8, resp: &GetPdrResponse) -> Vec<u8> {
    let mut out = Vec::new();
    Header::response(instance_id, PldmType::Platform, CMD_GET_PDR)
        .encode(&mut out);
    let mut w = Writer::from_vec(out);
    w.put_u8(resp.completion_code);
    w.put_u32(resp.next_record_handle);
    w.put_u32(resp.next_data_transfer_handle);
    w.put_u8(resp.transfer_flag as u8);
    w.put_u16(resp.record_data.len() as u16);
    w.put_bytes(&resp.record_data);
    if let Some(crc) = resp.transfer_crc {
        w.put_u8(crc);
    }
    w.into_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_info_decodes() {
        let mut resp = vec![0x02, 0x02, CMD_GET_PDR_REPOSITORY_INFO, 0x00];
        resp.push(0x00); // available
        resp.extend_from_slice(&[0u8; 26]); // timestamps
        resp.extend_from_slice(&7u32.to_le_bytes());
        resp.extend_from_slice(&512u32.to_le_bytes());
        resp.extend_from_slice(&128u32.to_le_bytes());
        resp.push(0x05);

        let (cc, info) = decode_repository_info_resp(&resp).unwrap();
        let info = info.unwrap();
        assert_eq!(cc, 0);
        assert_eq!(info.state, RepositoryState::Available);
        assert_eq!(info.record_count, 7);
        assert_eq!(info.largest_record_size, 128);
    }

    #[test]
    fn get_pdr_round_trip() {
        let resp = GetPdrResponse {
            completion_code: 0,
            next_record_handle: 9,
            next_data_transfer_handle: 0x44,
            transfer_flag: TransferFlag::End,
            record_data: vec![1, 2, 3, 4],
            transfer_crc: Some(0x5A),
        };
        let encoded = encode_get_pdr_resp(7, &resp);
        let decoded = decode_get_pdr_resp(&encoded).unwrap();
        assert_eq!(decoded, resp);
    }

    #[test]
    fn crc_only_present_on_end() {
        let resp = GetPdrResponse {
            completion_code: 0,
            next_record_handle: 0,
            next_data_transfer_handle: 1,
            transfer_flag: TransferFlag::Start,
            record_data: vec![0xAA; 8],
            transfer_crc: None,
        };
        let encoded = encode_get_pdr_resp(0, &resp);
        let decoded = decode_get_pdr_resp(&encoded).unwrap();
        assert_eq!(decoded.transfer_crc, None);
    }
}
