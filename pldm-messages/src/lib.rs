// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wire-level definitions for the PLDM protocol as used by the management
//! agent: the common message header, the command sets for base discovery,
//! platform descriptor retrieval, and firmware update, and the typed parse
//! of platform descriptor records.
//!
//! Everything in this crate is pure: encoding produces `Vec<u8>` payloads,
//! decoding consumes `&[u8]` slices. All multi-byte integers are
//! little-endian on the wire; UTF-16 auxiliary names are the one big-endian
//! exception and are handled in [`pdr`].

pub mod base;
pub mod fwup;
pub mod pdr;
pub mod platform;
pub mod wire;

use thiserror::Error;

use crate::wire::Reader;
use crate::wire::Writer;

/// Logical device id assigned by the agent. 0x00 and 0xFF are reserved.
pub type Tid = u8;

/// Transport endpoint id.
pub type Eid = u8;

pub const TID_RESERVED_LOW: Tid = 0x00;
pub const TID_RESERVED_HIGH: Tid = 0xFF;

/// Instance ids are a 5-bit rolling counter.
pub const INSTANCE_ID_MASK: u8 = 0x1F;

/// PLDM type is the low 6 bits of the second header byte.
pub const PLDM_TYPE_MASK: u8 = 0x3F;

/// Header (3 bytes) plus the completion code every response starts with.
pub const MIN_RESPONSE_LEN: usize = HEADER_LEN + 1;

/// Size of the common PLDM message header.
pub const HEADER_LEN: usize = 3;

/// Minimum transfer size every firmware device must support (DSP0267).
pub const BASELINE_TRANSFER_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("message shorter than the {0}-byte minimum")]
    TooShort(usize),
    #[error("buffer exhausted while reading field")]
    Truncated,
    #[error("invalid value {value:#x} for {field}")]
    InvalidField { field: &'static str, value: u32 },
    #[error("trailing bytes after message body")]
    TrailingBytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("variable-length field of {len} bytes exceeds the wire limit")]
    FieldTooLong { len: usize },
}

/// Direction/kind of a PLDM message, from the Rq and D bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Response,
    Reserved,
    Request,
    AsyncRequestNotify,
}

impl From<u8> for MessageType {
    fn from(rq_d: u8) -> Self {
        match rq_d & 0b11 {
            0 => MessageType::Response,
            1 => MessageType::Reserved,
            2 => MessageType::Request,
            _ => MessageType::AsyncRequestNotify,
        }
    }
}

/// PLDM protocol types carried in the header (DSP0245).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PldmType {
    Base = 0x00,
    Smbios = 0x01,
    Platform = 0x02,
    Bios = 0x03,
    Fru = 0x04,
    FirmwareUpdate = 0x05,
    Rde = 0x06,
    Oem = 0x3F,
}

impl PldmType {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw & PLDM_TYPE_MASK {
            0x00 => Some(PldmType::Base),
            0x01 => Some(PldmType::Smbios),
            0x02 => Some(PldmType::Platform),
            0x03 => Some(PldmType::Bios),
            0x04 => Some(PldmType::Fru),
            0x05 => Some(PldmType::FirmwareUpdate),
            0x06 => Some(PldmType::Rde),
            0x3F => Some(PldmType::Oem),
            _ => None,
        }
    }
}

/// The common 3-byte PLDM message header.
///
/// Byte 0: Rq | D | reserved | instance id (5 bits). Byte 1: header version
/// (2 bits, always 0) | PLDM type (6 bits). Byte 2: command code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub message_type: MessageType,
    pub instance_id: u8,
    pub pldm_type: u8,
    pub command: u8,
}

impl Header {
    pub fn request(instance_id: u8, pldm_type: PldmType, command: u8) -> Self {
        Self {
            message_type: MessageType::Request,
            instance_id: instance_id & INSTANCE_ID_MASK,
            pldm_type: pldm_type as u8,
            command,
        }
    }

    pub fn response(instance_id: u8, pldm_type: PldmType, command: u8) -> Self {
        Self {
            message_type: MessageType::Response,
            instance_id: instance_id & INSTANCE_ID_MASK,
            pldm_type: pldm_type as u8,
            command,
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        let rq_d: u8 = match self.message_type {
            MessageType::Response => 0,
            MessageType::Reserved => 1,
            MessageType::Request => 2,
            MessageType::AsyncRequestNotify => 3,
        };
        out.push((rq_d << 6) | (self.instance_id & INSTANCE_ID_MASK));
        out.push(self.pldm_type & PLDM_TYPE_MASK);
        out.push(self.command);
    }

    pub fn decode(buf: &[u8]) -> Result<(Self, &[u8]), DecodeError> {
        if buf.len() < HEADER_LEN {
            return Err(DecodeError::TooShort(HEADER_LEN));
        }
        let header = Self {
            message_type: MessageType::from(buf[0] >> 6),
            instance_id: buf[0] & INSTANCE_ID_MASK,
            pldm_type: buf[1] & PLDM_TYPE_MASK,
            command: buf[2],
        };
        Ok((header, &buf[HEADER_LEN..]))
    }
}

/// One-byte protocol status carried in every response (DSP0240 plus the
/// firmware-update codes from DSP0267).
pub mod completion {
    pub const SUCCESS: u8 = 0x00;
    pub const ERROR: u8 = 0x01;
    pub const ERROR_INVALID_DATA: u8 = 0x02;
    pub const ERROR_INVALID_LENGTH: u8 = 0x03;
    pub const ERROR_NOT_READY: u8 = 0x04;
    pub const ERROR_UNSUPPORTED_CMD: u8 = 0x05;
    pub const ERROR_INVALID_PLDM_TYPE: u8 = 0x20;

    pub const NOT_IN_UPDATE_MODE: u8 = 0x80;
    pub const ALREADY_IN_UPDATE_MODE: u8 = 0x81;
    pub const DATA_OUT_OF_RANGE: u8 = 0x82;
    pub const INVALID_TRANSFER_LENGTH: u8 = 0x83;
    pub const INVALID_STATE_FOR_COMMAND: u8 = 0x84;
    pub const INCOMPLETE_UPDATE: u8 = 0x85;
    pub const BUSY_IN_BACKGROUND: u8 = 0x86;
    pub const CANCEL_PENDING: u8 = 0x87;
    pub const COMMAND_NOT_EXPECTED: u8 = 0x88;
    pub const RETRY_REQUEST_FW_DATA: u8 = 0x89;
    pub const UNABLE_TO_INITIATE_UPDATE: u8 = 0x8A;
    pub const ACTIVATION_NOT_REQUIRED: u8 = 0x8B;
    pub const NO_DEVICE_METADATA: u8 = 0x8D;
    pub const RETRY_REQUEST_UPDATE: u8 = 0x8E;
    pub const NO_PACKAGE_DATA: u8 = 0x8F;
    pub const INVALID_TRANSFER_HANDLE: u8 = 0x90;
    pub const INVALID_TRANSFER_OPERATION_FLAG: u8 = 0x91;
}

/// Position of a segment within a multi-part transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransferFlag {
    Start = 0x01,
    Middle = 0x02,
    End = 0x04,
    StartAndEnd = 0x05,
}

impl TransferFlag {
    pub fn from_u8(raw: u8) -> Result<Self, DecodeError> {
        match raw {
            0x01 => Ok(TransferFlag::Start),
            0x02 => Ok(TransferFlag::Middle),
            0x04 => Ok(TransferFlag::End),
            0x05 => Ok(TransferFlag::StartAndEnd),
            _ => Err(DecodeError::InvalidField {
                field: "transfer_flag",
                value: u32::from(raw),
            }),
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, TransferFlag::End | TransferFlag::StartAndEnd)
    }
}

/// Operation requested for a multi-part transfer segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransferOp {
    GetNextPart = 0x00,
    GetFirstPart = 0x01,
}

impl TransferOp {
    pub fn from_u8(raw: u8) -> Result<Self, DecodeError> {
        match raw {
            0x00 => Ok(TransferOp::GetNextPart),
            0x01 => Ok(TransferOp::GetFirstPart),
            _ => Err(DecodeError::InvalidField {
                field: "transfer_operation_flag",
                value: u32::from(raw),
            }),
        }
    }
}

/// Compute the transfer flag for the segment at `offset` of `length` bytes
/// out of `total`.
///
/// The degenerate empty transfer (`offset == 0`, `total == 0`) reports
/// `StartAndEnd` so a zero-length payload still terminates cleanly.
pub fn transfer_flag(offset: usize, length: usize, total: usize) -> TransferFlag {
    if offset + length < total {
        if offset == 0 {
            TransferFlag::Start
        } else {
            TransferFlag::Middle
        }
    } else if offset == 0 {
        TransferFlag::StartAndEnd
    } else {
        TransferFlag::End
    }
}

/// PLDM version number (DSP0240 ver32 encoding).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Ver32 {
    pub major: u8,
    pub minor: u8,
    pub update: u8,
    pub alpha: u8,
}

impl Ver32 {
    pub fn write(&self, w: &mut Writer) {
        w.put_u8(self.alpha);
        w.put_u8(self.update);
        w.put_u8(self.minor);
        w.put_u8(self.major);
    }

    pub fn read(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let alpha = r.get_u8()?;
        let update = r.get_u8()?;
        let minor = r.get_u8()?;
        let major = r.get_u8()?;
        Ok(Self { major, minor, update, alpha })
    }
}

/// Encode a response consisting of a header and a bare completion code.
pub fn encode_cc_only_response(
    instance_id: u8,
    pldm_type: PldmType,
    command: u8,
    completion_code: u8,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(MIN_RESPONSE_LEN);
    Header::response(instance_id, pldm_type, command).encode(&mut out);
    out.push(completion_code);
    out
}

/// Split a response into its completion code and body, enforcing the
/// 4-byte minimum.
pub fn split_response(payload: &[u8]) -> Result<(u8, &[u8]), DecodeError> {
    if payload.len() < MIN_RESPONSE_LEN {
        return Err(DecodeError::TooShort(MIN_RESPONSE_LEN));
    }
    Ok((payload[HEADER_LEN], &payload[MIN_RESPONSE_LEN..]))
}
