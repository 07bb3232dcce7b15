// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use pldm_messages::DecodeError;
use pldm_messages::EncodeError;
use pldm_messages::Tid;
use slog_error_chain::SlogInlineError;
use thiserror::Error;

/// Failures of the request/response path through the transport adapter.
#[derive(Debug, Clone, Error, SlogInlineError)]
pub enum CommunicationError {
    #[error("TID {0} is not mapped to a transport endpoint")]
    NoRoute(Tid),
    #[error("timed out waiting for a response")]
    Timeout,
    #[error("malformed response: {reason}")]
    Malformed { reason: &'static str },
    #[error("transport refused the send")]
    Refused,
    #[error("bandwidth reserved for TID {tid}, PLDM type {pldm_type:#04x}")]
    ReservationConflict { tid: Tid, pldm_type: u8 },
    #[error("RPC failed (gave up after {0} attempts)")]
    ExhaustedNumAttempts(usize),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("failed to decode response")]
    Decode(#[from] DecodeError),
    #[error("failed to encode request")]
    Encode(#[from] EncodeError),
}

/// Protocol-level outcomes reported by the remote device.
#[derive(Debug, Clone, Copy, Error, SlogInlineError)]
pub enum ProtocolError {
    #[error("device returned completion code {0:#04x}")]
    CompletionCode(u8),
    #[error("command not expected in the current state")]
    CommandNotExpected,
    #[error("device asked to retry RequestUpdate")]
    RetryRequestUpdate,
    #[error("firmware transfer failed with result {0:#04x}")]
    TransferResult(u8),
    #[error("firmware verify failed with result {0:#04x}")]
    VerifyResult(u8),
    #[error("firmware apply failed with result {0:#04x}")]
    ApplyResult(u8),
}

/// Failures while building or interpreting the descriptor repository.
#[derive(Debug, Error, SlogInlineError)]
pub enum PdrError {
    #[error("repository is not in the Available state")]
    RepoUnavailable,
    #[error("repository declares no records")]
    Empty,
    #[error(
        "record {record_handle:#x} exceeds the declared largest record size"
    )]
    OverSize { record_handle: u32 },
    #[error("record {record_handle:#x} failed its CRC check")]
    CrcMismatch { record_handle: u32 },
    #[error("repository is inconsistent: {reason}")]
    Inconsistent { reason: &'static str },
    #[error("no entity association for the record")]
    MissingAssociation,
    #[error("communication failed")]
    Communication(#[from] CommunicationError),
}

/// Failures of a firmware-update session.
#[derive(Debug, Error, SlogInlineError)]
pub enum UpdateError {
    #[error("communication failed")]
    Communication(#[from] CommunicationError),
    #[error("protocol failure")]
    Protocol(#[from] ProtocolError),
    #[error("package read failed: {0}")]
    PackageRead(String),
    #[error("package property unavailable: {0}")]
    PackageProperty(&'static str),
    #[error("no component was applied")]
    Incomplete,
}

#[derive(Debug, Error, SlogInlineError)]
pub enum SessionError {
    #[error("another update session is already running")]
    AlreadyRunning,
    #[error("session aborted")]
    Aborted,
    #[error("update failed")]
    Update(#[from] UpdateError),
}
