// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Core of the PLDM manageability agent: the shared transport adapter, base
//! discovery, the descriptor-record (PDR) manager, the firmware-update
//! orchestrator, and the session controller that ties them together.
//!
//! The crate is transport- and surface-agnostic: the raw packet transport
//! and the external object-publication surface are traits
//! ([`transport::RawTransport`], [`publish::Publisher`]) supplied by the
//! embedding process.

pub mod base;
pub mod error;
pub mod fwup;
pub mod package;
pub mod pdr;
pub mod publish;
pub mod session;
pub mod shared_link;
pub mod transport;

pub use shared_link::SharedLink;

use std::time::Duration;

/// Per-request response timeout.
pub const COMMAND_TIMEOUT: Duration = Duration::from_millis(100);

/// Retries for a single request/response exchange.
pub const COMMAND_RETRIES: usize = 3;

/// Idle timeout between firmware-device commands (TransferComplete,
/// VerifyComplete, ApplyComplete, GetPackageData, GetMetaData).
pub const FD_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Idle timeout while serving RequestFirmwareData.
pub const REQUEST_FIRMWARE_DATA_IDLE_TIMEOUT: Duration =
    Duration::from_secs(90);

/// Delay before retrying RequestUpdate after a RETRY_REQUEST_UPDATE
/// completion code.
pub const RETRY_REQUEST_UPDATE_DELAY: Duration = Duration::from_secs(5);

/// Pacing delay between successive firmware-update commands.
pub const INTER_COMMAND_DELAY: Duration = Duration::from_millis(500);
