// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Firmware-update commands (DSP0267).
//!
//! The update agent acts as requester for RequestUpdate, GetDeviceMetaData,
//! PassComponentTable, UpdateComponent, ActivateFirmware, GetStatus and the
//! cancel commands, and as responder for the device-initiated
//! GetPackageData, GetMetaData, RequestFirmwareData, TransferComplete,
//! VerifyComplete and ApplyComplete. Both directions are encoded and decoded
//! here; the device-side encoders double as the scripted firmware device in
//! tests.

use crate::completion;
use crate::wire::Reader;
use crate::wire::Writer;
use crate::DecodeError;
use crate::EncodeError;
use crate::Header;
use crate::PldmType;
use crate::TransferFlag;
use crate::TransferOp;

pub const CMD_QUERY_DEVICE_IDENTIFIERS: u8 = 0x01;
pub const CMD_GET_FIRMWARE_PARAMETERS: u8 = 0x02;
pub const CMD_REQUEST_UPDATE: u8 = 0x10;
pub const CMD_GET_PACKAGE_DATA: u8 = 0x11;
pub const CMD_GET_DEVICE_META_DATA: u8 = 0x12;
pub const CMD_PASS_COMPONENT_TABLE: u8 = 0x13;
pub const CMD_UPDATE_COMPONENT: u8 = 0x14;
pub const CMD_REQUEST_FIRMWARE_DATA: u8 = 0x15;
pub const CMD_TRANSFER_COMPLETE: u8 = 0x16;
pub const CMD_VERIFY_COMPLETE: u8 = 0x17;
pub const CMD_APPLY_COMPLETE: u8 = 0x18;
pub const CMD_GET_META_DATA: u8 = 0x19;
pub const CMD_ACTIVATE_FIRMWARE: u8 = 0x1A;
pub const CMD_GET_STATUS: u8 = 0x1B;
pub const CMD_CANCEL_UPDATE_COMPONENT: u8 = 0x1C;
pub const CMD_CANCEL_UPDATE: u8 = 0x1D;

pub const TRANSFER_RESULT_SUCCESS: u8 = 0x00;
pub const VERIFY_RESULT_SUCCESS: u8 = 0x00;
pub const APPLY_RESULT_SUCCESS: u8 = 0x00;
pub const APPLY_RESULT_SUCCESS_WITH_ACTIVATION_METHOD: u8 = 0x01;

/// ComponentCompatibilityResponse: 0 means the component can be updated.
pub const COMPONENT_CAN_BE_UPDATED: u8 = 0x00;

/// Maximum length of a version string on the wire.
pub const MAX_VERSION_STRING_LEN: usize = 255;

fn request(instance_id: u8, command: u8) -> Writer {
    let mut out = Vec::new();
    Header::request(instance_id, PldmType::FirmwareUpdate, command)
        .encode(&mut out);
    Writer::from_vec(out)
}

fn response(instance_id: u8, command: u8) -> Writer {
    let mut out = Vec::new();
    Header::response(instance_id, PldmType::FirmwareUpdate, command)
        .encode(&mut out);
    Writer::from_vec(out)
}

fn put_version_string(w: &mut Writer, s: &str) -> Result<(), EncodeError> {
    if s.len() > MAX_VERSION_STRING_LEN {
        return Err(EncodeError::FieldTooLong { len: s.len() });
    }
    w.put_bytes(s.as_bytes());
    Ok(())
}

// ---------------------------------------------------------------------------
// RequestUpdate

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestUpdateRequest {
    pub max_transfer_size: u32,
    pub component_count: u16,
    pub max_outstanding_transfers: u8,
    pub package_data_len: u16,
    pub version_string_type: u8,
    pub version_string: String,
}

pub fn encode_request_update_req(
    instance_id: u8,
    req: &RequestUpdateRequest,
) -> Result<Vec<u8>, EncodeError> {
    let mut w = request(instance_id, CMD_REQUEST_UPDATE);
    w.put_u32(req.max_transfer_size);
    w.put_u16(req.component_count);
    w.put_u8(req.max_outstanding_transfers);
    w.put_u16(req.package_data_len);
    w.put_u8(req.version_string_type);
    w.put_u8(req.version_string.len() as u8);
    put_version_string(&mut w, &req.version_string)?;
    Ok(w.into_vec())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestUpdateResponse {
    pub completion_code: u8,
    pub fd_meta_data_len: u16,
    pub fd_will_send_pkg_data: bool,
}

pub fn decode_request_update_resp(
    payload: &[u8],
) -> Result<RequestUpdateResponse, DecodeError> {
    let (cc, body) = crate::split_response(payload)?;
    if cc != completion::SUCCESS {
        return Ok(RequestUpdateResponse {
            completion_code: cc,
            fd_meta_data_len: 0,
            fd_will_send_pkg_data: false,
        });
    }
    let mut r = Reader::new(body);
    let fd_meta_data_len = r.get_u16()?;
    let fd_will_send_pkg_data = r.get_u8()? == 0x01;
    Ok(RequestUpdateResponse {
        completion_code: cc,
        fd_meta_data_len,
        fd_will_send_pkg_data,
    })
}

// ---------------------------------------------------------------------------
// GetPackageData / GetMetaData / GetDeviceMetaData
//
// All three share the {data_transfer_handle, transfer_operation_flag}
// request and the {next_handle, transfer_flag, portion} response shape; the
// direction differs.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataTransferRequest {
    pub data_transfer_handle: u32,
    pub transfer_op: TransferOp,
}

pub fn encode_data_transfer_req(
    instance_id: u8,
    command: u8,
    req: &DataTransferRequest,
) -> Vec<u8> {
    let mut w = request(instance_id, command);
    w.put_u32(req.data_transfer_handle);
    w.put_u8(req.transfer_op as u8);
    w.into_vec()
}

/// Decode the body of a device-initiated GetPackageData/GetMetaData request
/// (header already stripped by the caller).
pub fn decode_data_transfer_req(
    body: &[u8],
) -> Result<DataTransferRequest, DecodeError> {
    let mut r = Reader::new(body);
    let data_transfer_handle = r.get_u32()?;
    let transfer_op = TransferOp::from_u8(r.get_u8()?)?;
    Ok(DataTransferRequest { data_transfer_handle, transfer_op })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataTransferResponse {
    pub completion_code: u8,
    pub next_data_transfer_handle: u32,
    pub transfer_flag: TransferFlag,
    pub portion: Vec<u8>,
}

pub fn encode_data_transfer_resp(
    instance_id: u8,
    command: u8,
    resp: &DataTransferResponse,
) -> Vec<u8> {
    let mut w = response(instance_id, command);
    w.put_u8(resp.completion_code);
    w.put_u32(resp.next_data_transfer_handle);
    w.put_u8(resp.transfer_flag as u8);
    w.put_bytes(&resp.portion);
    w.into_vec()
}

pub fn decode_data_transfer_resp(
    payload: &[u8],
) -> Result<DataTransferResponse, DecodeError> {
    let (cc, body) = crate::split_response(payload)?;
    if cc != completion::SUCCESS {
        return Ok(DataTransferResponse {
            completion_code: cc,
            next_data_transfer_handle: 0,
            transfer_flag: TransferFlag::StartAndEnd,
            portion: Vec::new(),
        });
    }
    let mut r = Reader::new(body);
    let next_data_transfer_handle = r.get_u32()?;
    let transfer_flag = TransferFlag::from_u8(r.get_u8()?)?;
    let portion = r.rest().to_vec();
    Ok(DataTransferResponse {
        completion_code: cc,
        next_data_transfer_handle,
        transfer_flag,
        portion,
    })
}

// ---------------------------------------------------------------------------
// PassComponentTable

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassComponentTableRequest {
    pub transfer_flag: TransferFlag,
    pub classification: u16,
    pub identifier: u16,
    pub classification_index: u8,
    pub comparison_stamp: u32,
    pub version_string_type: u8,
    pub version_string: String,
}

pub fn encode_pass_component_table_req(
    instance_id: u8,
    req: &PassComponentTableRequest,
) -> Result<Vec<u8>, EncodeError> {
    let mut w = request(instance_id, CMD_PASS_COMPONENT_TABLE);
    w.put_u8(req.transfer_flag as u8);
    w.put_u16(req.classification);
    w.put_u16(req.identifier);
    w.put_u8(req.classification_index);
    w.put_u32(req.comparison_stamp);
    w.put_u8(req.version_string_type);
    w.put_u8(req.version_string.len() as u8);
    put_version_string(&mut w, &req.version_string)?;
    Ok(w.into_vec())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentResponse {
    pub completion_code: u8,
    pub response: u8,
    pub response_code: u8,
}

pub fn decode_pass_component_table_resp(
    payload: &[u8],
) -> Result<ComponentResponse, DecodeError> {
    let (cc, body) = crate::split_response(payload)?;
    if cc != completion::SUCCESS {
        return Ok(ComponentResponse {
            completion_code: cc,
            response: 0,
            response_code: 0,
        });
    }
    let mut r = Reader::new(body);
    let response = r.get_u8()?;
    let response_code = r.get_u8()?;
    Ok(ComponentResponse { completion_code: cc, response, response_code })
}

// ---------------------------------------------------------------------------
// UpdateComponent

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateComponentRequest {
    pub classification: u16,
    pub identifier: u16,
    pub classification_index: u8,
    pub comparison_stamp: u32,
    pub image_size: u32,
    pub update_option_flags: u32,
    pub version_string_type: u8,
    pub version_string: String,
}

pub fn encode_update_component_req(
    instance_id: u8,
    req: &UpdateComponentRequest,
) -> Result<Vec<u8>, EncodeError> {
    let mut w = request(instance_id, CMD_UPDATE_COMPONENT);
    w.put_u16(req.classification);
    w.put_u16(req.identifier);
    w.put_u8(req.classification_index);
    w.put_u32(req.comparison_stamp);
    w.put_u32(req.image_size);
    w.put_u32(req.update_option_flags);
    w.put_u8(req.version_string_type);
    w.put_u8(req.version_string.len() as u8);
    put_version_string(&mut w, &req.version_string)?;
    Ok(w.into_vec())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateComponentResponse {
    pub completion_code: u8,
    pub compatibility_response: u8,
    pub compatibility_response_code: u8,
    pub update_option_flags_enabled: u32,
    pub time_before_request_fw_data: u16,
}

pub fn decode_update_component_resp(
    payload: &[u8],
) -> Result<UpdateComponentResponse, DecodeError> {
    let (cc, body) = crate::split_response(payload)?;
    if cc != completion::SUCCESS {
        return Ok(UpdateComponentResponse {
            completion_code: cc,
            compatibility_response: 0,
            compatibility_response_code: 0,
            update_option_flags_enabled: 0,
            time_before_request_fw_data: 0,
        });
    }
    let mut r = Reader::new(body);
    let compatibility_response = r.get_u8()?;
    let compatibility_response_code = r.get_u8()?;
    let update_option_flags_enabled = r.get_u32()?;
    let time_before_request_fw_data = r.get_u16()?;
    Ok(UpdateComponentResponse {
        completion_code: cc,
        compatibility_response,
        compatibility_response_code,
        update_option_flags_enabled,
        time_before_request_fw_data,
    })
}

// ---------------------------------------------------------------------------
// RequestFirmwareData (device-initiated)

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareDataRequest {
    pub offset: u32,
    pub length: u32,
}

pub fn decode_firmware_data_req(
    body: &[u8],
) -> Result<FirmwareDataRequest, DecodeError> {
    let mut r = Reader::new(body);
    let offset = r.get_u32()?;
    let length = r.get_u32()?;
    Ok(FirmwareDataRequest { offset, length })
}

pub fn encode_firmware_data_req(
    instance_id: u8,
    req: &FirmwareDataRequest,
) -> Vec<u8> {
    let mut w = request(instance_id, CMD_REQUEST_FIRMWARE_DATA);
    w.put_u32(req.offset);
    w.put_u32(req.length);
    w.into_vec()
}

pub fn encode_firmware_data_resp(
    instance_id: u8,
    completion_code: u8,
    data: &[u8],
) -> Vec<u8> {
    let mut w = response(instance_id, CMD_REQUEST_FIRMWARE_DATA);
    w.put_u8(completion_code);
    w.put_bytes(data);
    w.into_vec()
}

pub fn decode_firmware_data_resp(
    payload: &[u8],
) -> Result<(u8, Vec<u8>), DecodeError> {
    let (cc, body) = crate::split_response(payload)?;
    Ok((cc, body.to_vec()))
}

// ---------------------------------------------------------------------------
// TransferComplete / VerifyComplete / ApplyComplete (device-initiated)

pub fn decode_transfer_complete_req(body: &[u8]) -> Result<u8, DecodeError> {
    let mut r = Reader::new(body);
    r.get_u8()
}

pub fn encode_transfer_complete_req(
    instance_id: u8,
    transfer_result: u8,
) -> Vec<u8> {
    let mut w = request(instance_id, CMD_TRANSFER_COMPLETE);
    w.put_u8(transfer_result);
    w.into_vec()
}

pub fn decode_verify_complete_req(body: &[u8]) -> Result<u8, DecodeError> {
    let mut r = Reader::new(body);
    r.get_u8()
}

pub fn encode_verify_complete_req(
    instance_id: u8,
    verify_result: u8,
) -> Vec<u8> {
    let mut w = request(instance_id, CMD_VERIFY_COMPLETE);
    w.put_u8(verify_result);
    w.into_vec()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyCompleteRequest {
    pub apply_result: u8,
    pub activation_methods_modification: u16,
}

pub fn decode_apply_complete_req(
    body: &[u8],
) -> Result<ApplyCompleteRequest, DecodeError> {
    let mut r = Reader::new(body);
    let apply_result = r.get_u8()?;
    let activation_methods_modification = r.get_u16()?;
    Ok(ApplyCompleteRequest { apply_result, activation_methods_modification })
}

pub fn encode_apply_complete_req(
    instance_id: u8,
    req: &ApplyCompleteRequest,
) -> Vec<u8> {
    let mut w = request(instance_id, CMD_APPLY_COMPLETE);
    w.put_u8(req.apply_result);
    w.put_u16(req.activation_methods_modification);
    w.into_vec()
}

// ---------------------------------------------------------------------------
// ActivateFirmware

pub fn encode_activate_firmware_req(
    instance_id: u8,
    self_contained_activation: bool,
) -> Vec<u8> {
    let mut w = request(instance_id, CMD_ACTIVATE_FIRMWARE);
    w.put_u8(u8::from(self_contained_activation));
    w.into_vec()
}

/// Returns `(completion_code, estimated activation time in seconds)`.
pub fn decode_activate_firmware_resp(
    payload: &[u8],
) -> Result<(u8, u16), DecodeError> {
    let (cc, body) = crate::split_response(payload)?;
    if cc != completion::SUCCESS {
        return Ok((cc, 0));
    }
    let mut r = Reader::new(body);
    let estimated_time = r.get_u16()?;
    Ok((cc, estimated_time))
}

// ---------------------------------------------------------------------------
// GetStatus

pub fn encode_get_status_req(instance_id: u8) -> Vec<u8> {
    request(instance_id, CMD_GET_STATUS).into_vec()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusResponse {
    pub completion_code: u8,
    pub current_state: u8,
    pub previous_state: u8,
    pub aux_state: u8,
    pub aux_state_status: u8,
    pub progress_percent: u8,
    pub reason_code: u8,
    pub update_option_flags_enabled: u32,
}

pub fn decode_get_status_resp(
    payload: &[u8],
) -> Result<StatusResponse, DecodeError> {
    let (cc, body) = crate::split_response(payload)?;
    let mut resp = StatusResponse {
        completion_code: cc,
        current_state: 0,
        previous_state: 0,
        aux_state: 0,
        aux_state_status: 0,
        progress_percent: 0,
        reason_code: 0,
        update_option_flags_enabled: 0,
    };
    if cc != completion::SUCCESS {
        return Ok(resp);
    }
    let mut r = Reader::new(body);
    resp.current_state = r.get_u8()?;
    resp.previous_state = r.get_u8()?;
    resp.aux_state = r.get_u8()?;
    resp.aux_state_status = r.get_u8()?;
    resp.progress_percent = r.get_u8()?;
    resp.reason_code = r.get_u8()?;
    resp.update_option_flags_enabled = r.get_u32()?;
    Ok(resp)
}

// ---------------------------------------------------------------------------
// CancelUpdateComponent / CancelUpdate

pub fn encode_cancel_update_component_req(instance_id: u8) -> Vec<u8> {
    request(instance_id, CMD_CANCEL_UPDATE_COMPONENT).into_vec()
}

pub fn decode_cancel_update_component_resp(
    payload: &[u8],
) -> Result<u8, DecodeError> {
    let (cc, _) = crate::split_response(payload)?;
    Ok(cc)
}

pub fn encode_cancel_update_req(instance_id: u8) -> Vec<u8> {
    request(instance_id, CMD_CANCEL_UPDATE).into_vec()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelUpdateResponse {
    pub completion_code: u8,
    pub non_functioning_component_indication: bool,
    pub non_functioning_component_bitmap: u64,
}

pub fn decode_cancel_update_resp(
    payload: &[u8],
) -> Result<CancelUpdateResponse, DecodeError> {
    let (cc, body) = crate::split_response(payload)?;
    if cc != completion::SUCCESS {
        return Ok(CancelUpdateResponse {
            completion_code: cc,
            non_functioning_component_indication: false,
            non_functioning_component_bitmap: 0,
        });
    }
    let mut r = Reader::new(body);
    let indication = r.get_u8()? == 0x01;
    let bitmap = r.get_u64()?;
    Ok(CancelUpdateResponse {
        completion_code: cc,
        non_functioning_component_indication: indication,
        non_functioning_component_bitmap: bitmap,
    })
}

// ---------------------------------------------------------------------------
// QueryDeviceIdentifiers

pub fn encode_query_device_identifiers_req(instance_id: u8) -> Vec<u8> {
    request(instance_id, CMD_QUERY_DEVICE_IDENTIFIERS).into_vec()
}

/// A single firmware-device descriptor: a type tag and opaque value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Descriptor {
    pub descriptor_type: u16,
    pub data: Vec<u8>,
}

pub fn decode_query_device_identifiers_resp(
    payload: &[u8],
) -> Result<(u8, Vec<Descriptor>), DecodeError> {
    let (cc, body) = crate::split_response(payload)?;
    if cc != completion::SUCCESS {
        return Ok((cc, Vec::new()));
    }
    let mut r = Reader::new(body);
    let total_len = r.get_u32()? as usize;
    let descriptor_count = r.get_u8()?;
    let mut descriptors = Vec::with_capacity(usize::from(descriptor_count));
    let mut consumed = 0usize;
    for _ in 0..descriptor_count {
        let descriptor_type = r.get_u16()?;
        let len = usize::from(r.get_u16()?);
        let data = r.get_bytes(len)?.to_vec();
        consumed += 4 + len;
        descriptors.push(Descriptor { descriptor_type, data });
    }
    if consumed != total_len {
        return Err(DecodeError::InvalidField {
            field: "device_identifiers_length",
            value: total_len as u32,
        });
    }
    Ok((cc, descriptors))
}

pub fn encode_query_device_identifiers_resp(
    instance_id: u8,
    descriptors: &[Descriptor],
) -> Vec<u8> {
    let mut w = response(instance_id, CMD_QUERY_DEVICE_IDENTIFIERS);
    w.put_u8(completion::SUCCESS);
    let total: usize =
        descriptors.iter().map(|d| 4 + d.data.len()).sum();
    w.put_u32(total as u32);
    w.put_u8(descriptors.len() as u8);
    for d in descriptors {
        w.put_u16(d.descriptor_type);
        w.put_u16(d.data.len() as u16);
        w.put_bytes(&d.data);
    }
    w.into_vec()
}

// ---------------------------------------------------------------------------
// GetFirmwareParameters

pub fn encode_get_firmware_parameters_req(instance_id: u8) -> Vec<u8> {
    request(instance_id, CMD_GET_FIRMWARE_PARAMETERS).into_vec()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentParameters {
    pub classification: u16,
    pub identifier: u16,
    pub classification_index: u8,
    pub active_comparison_stamp: u32,
    pub active_version: String,
    pub pending_comparison_stamp: u32,
    pub pending_version: String,
    pub activation_methods: u16,
    pub capabilities_during_update: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareParameters {
    pub completion_code: u8,
    pub capabilities_during_update: u32,
    pub active_image_set_version: String,
    pub pending_image_set_version: String,
    pub components: Vec<ComponentParameters>,
}

fn version_string(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).trim_end_matches('\0').to_string()
}

pub fn decode_get_firmware_parameters_resp(
    payload: &[u8],
) -> Result<FirmwareParameters, DecodeError> {
    let (cc, body) = crate::split_response(payload)?;
    if cc != completion::SUCCESS {
        return Ok(FirmwareParameters {
            completion_code: cc,
            capabilities_during_update: 0,
            active_image_set_version: String::new(),
            pending_image_set_version: String::new(),
            components: Vec::new(),
        });
    }
    let mut r = Reader::new(body);
    let capabilities_during_update = r.get_u32()?;
    let component_count = r.get_u16()?;
    let _active_ver_type = r.get_u8()?;
    let active_ver_len = usize::from(r.get_u8()?);
    let _pending_ver_type = r.get_u8()?;
    let pending_ver_len = usize::from(r.get_u8()?);
    let active_image_set_version = version_string(r.get_bytes(active_ver_len)?);
    let pending_image_set_version =
        version_string(r.get_bytes(pending_ver_len)?);

    let mut components = Vec::with_capacity(usize::from(component_count));
    for _ in 0..component_count {
        let classification = r.get_u16()?;
        let identifier = r.get_u16()?;
        let classification_index = r.get_u8()?;
        let active_comparison_stamp = r.get_u32()?;
        let _active_ver_type = r.get_u8()?;
        let active_len = usize::from(r.get_u8()?);
        let _active_release_date = r.get_bytes(8)?;
        let pending_comparison_stamp = r.get_u32()?;
        let _pending_ver_type = r.get_u8()?;
        let pending_len = usize::from(r.get_u8()?);
        let _pending_release_date = r.get_bytes(8)?;
        let activation_methods = r.get_u16()?;
        let capabilities_during_update = r.get_u32()?;
        let active_version = version_string(r.get_bytes(active_len)?);
        let pending_version = version_string(r.get_bytes(pending_len)?);
        components.push(ComponentParameters {
            classification,
            identifier,
            classification_index,
            active_comparison_stamp,
            active_version,
            pending_comparison_stamp,
            pending_version,
            activation_methods,
            capabilities_during_update,
        });
    }
    Ok(FirmwareParameters {
        completion_code: cc,
        capabilities_during_update,
        active_image_set_version,
        pending_image_set_version,
        components,
    })
}

pub fn encode_get_firmware_parameters_resp(
    instance_id: u8,
    params: &FirmwareParameters,
) -> Vec<u8> {
    let mut w = response(instance_id, CMD_GET_FIRMWARE_PARAMETERS);
    w.put_u8(completion::SUCCESS);
    w.put_u32(params.capabilities_during_update);
    w.put_u16(params.components.len() as u16);
    w.put_u8(0x01); // ASCII
    w.put_u8(params.active_image_set_version.len() as u8);
    w.put_u8(0x01);
    w.put_u8(params.pending_image_set_version.len() as u8);
    w.put_bytes(params.active_image_set_version.as_bytes());
    w.put_bytes(params.pending_image_set_version.as_bytes());
    for c in &params.components {
        w.put_u16(c.classification);
        w.put_u16(c.identifier);
        w.put_u8(c.classification_index);
        w.put_u32(c.active_comparison_stamp);
        w.put_u8(0x01);
        w.put_u8(c.active_version.len() as u8);
        w.put_bytes(&[0u8; 8]);
        w.put_u32(c.pending_comparison_stamp);
        w.put_u8(0x01);
        w.put_u8(c.pending_version.len() as u8);
        w.put_bytes(&[0u8; 8]);
        w.put_u16(c.activation_methods);
        w.put_u32(c.capabilities_during_update);
        w.put_bytes(c.active_version.as_bytes());
        w.put_bytes(c.pending_version.as_bytes());
    }
    w.into_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_update_round_trip_fields() {
        let req = RequestUpdateRequest {
            max_transfer_size: 32,
            component_count: 2,
            max_outstanding_transfers: 1,
            package_data_len: 0x40,
            version_string_type: 0x01,
            version_string: "v1.2.3".to_string(),
        };
        let encoded = encode_request_update_req(7, &req).unwrap();
        // header, then max transfer size LE.
        assert_eq!(&encoded[3..7], &[32, 0, 0, 0]);
        assert_eq!(encoded[12], 0x01); // string type
        assert_eq!(encoded[13], 6); // string length
        assert_eq!(&encoded[14..], b"v1.2.3");

        let resp = [
            0x07, 0x05, CMD_REQUEST_UPDATE, 0x00, // header + cc
            0x10, 0x00, // meta data len
            0x01, // will send package data
        ];
        let decoded = decode_request_update_resp(&resp).unwrap();
        assert_eq!(decoded.fd_meta_data_len, 0x10);
        assert!(decoded.fd_will_send_pkg_data);
    }

    #[test]
    fn retry_request_update_surfaces_code() {
        let resp = [0x07, 0x05, CMD_REQUEST_UPDATE, completion::RETRY_REQUEST_UPDATE];
        let decoded = decode_request_update_resp(&resp).unwrap();
        assert_eq!(decoded.completion_code, completion::RETRY_REQUEST_UPDATE);
    }

    #[test]
    fn data_transfer_round_trip() {
        let resp = DataTransferResponse {
            completion_code: 0,
            next_data_transfer_handle: 2,
            transfer_flag: TransferFlag::Middle,
            portion: vec![9; 32],
        };
        let encoded = encode_data_transfer_resp(1, CMD_GET_PACKAGE_DATA, &resp);
        let decoded = decode_data_transfer_resp(&encoded).unwrap();
        assert_eq!(decoded, resp);

        let req = DataTransferRequest {
            data_transfer_handle: 5,
            transfer_op: TransferOp::GetNextPart,
        };
        let encoded =
            encode_data_transfer_req(1, CMD_GET_DEVICE_META_DATA, &req);
        let decoded = decode_data_transfer_req(&encoded[3..]).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn firmware_data_request_round_trip() {
        let req = FirmwareDataRequest { offset: 96, length: 32 };
        let encoded = encode_firmware_data_req(4, &req);
        assert_eq!(decode_firmware_data_req(&encoded[3..]).unwrap(), req);
    }

    #[test]
    fn apply_complete_round_trip() {
        let req = ApplyCompleteRequest {
            apply_result: APPLY_RESULT_SUCCESS_WITH_ACTIVATION_METHOD,
            activation_methods_modification: 0x0002,
        };
        let encoded = encode_apply_complete_req(2, &req);
        assert_eq!(decode_apply_complete_req(&encoded[3..]).unwrap(), req);
    }

    #[test]
    fn activate_firmware_resp() {
        let resp = [
            0x01, 0x05, CMD_ACTIVATE_FIRMWARE, 0x00, //
            0x05, 0x00,
        ];
        assert_eq!(decode_activate_firmware_resp(&resp).unwrap(), (0, 5));
    }

    #[test]
    fn cancel_update_resp() {
        let mut resp = vec![0x01, 0x05, CMD_CANCEL_UPDATE, 0x00, 0x01];
        resp.extend_from_slice(&0x0000_0000_0000_0003u64.to_le_bytes());
        let decoded = decode_cancel_update_resp(&resp).unwrap();
        assert!(decoded.non_functioning_component_indication);
        assert_eq!(decoded.non_functioning_component_bitmap, 3);
    }

    #[test]
    fn query_device_identifiers_round_trip() {
        let descriptors = vec![
            Descriptor { descriptor_type: 0x0000, data: vec![0x57, 0x01] },
            Descriptor { descriptor_type: 0x0102, data: vec![1, 2, 3, 4] },
        ];
        let encoded = encode_query_device_identifiers_resp(0, &descriptors);
        let (cc, decoded) =
            decode_query_device_identifiers_resp(&encoded).unwrap();
        assert_eq!(cc, 0);
        assert_eq!(decoded, descriptors);
    }

    #[test]
    fn firmware_parameters_round_trip() {
        let params = FirmwareParameters {
            completion_code: 0,
            capabilities_during_update: 0,
            active_image_set_version: "set-v1".to_string(),
            pending_image_set_version: String::new(),
            components: vec![ComponentParameters {
                classification: 0x000A,
                identifier: 0x0001,
                classification_index: 0,
                active_comparison_stamp: 7,
                active_version: "c0-v1".to_string(),
                pending_comparison_stamp: 0,
                pending_version: String::new(),
                activation_methods: 0x0001,
                capabilities_during_update: 0,
            }],
        };
        let encoded = encode_get_firmware_parameters_resp(0, &params);
        let decoded = decode_get_firmware_parameters_resp(&encoded).unwrap();
        assert_eq!(decoded, params);
    }
}
