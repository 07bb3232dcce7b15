// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The raw packet transport underneath the agent.
//!
//! The agent does not own the transport: send/receive, bandwidth
//! reservation, and endpoint discovery are provided by the embedding
//! process through [`RawTransport`]. [`crate::SharedLink`] layers the
//! PLDM-specific framing, validation, retry, and dispatch policy on top.

use async_trait::async_trait;
use pldm_messages::Eid;
use std::time::Duration;

use crate::error::CommunicationError;

/// Message-type prefix byte identifying PLDM traffic on the transport.
pub const MESSAGE_TYPE_PLDM: u8 = 0x01;

/// Endpoint lifecycle notifications delivered to the session controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    DeviceAdded(Eid),
    DeviceRemoved(Eid),
}

/// Datagram transport toward one or more endpoints.
///
/// Implementations deliver unsolicited inbound packets by calling
/// [`crate::SharedLink::handle_inbound`]; nothing here blocks on receive.
#[async_trait]
pub trait RawTransport: Send + Sync {
    /// Send `payload` to `eid` and await the matching datagram response.
    async fn send_receive(
        &self,
        eid: Eid,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, CommunicationError>;

    /// Fire-and-forget send, tagged for request/response routing on the
    /// transport.
    async fn send(
        &self,
        eid: Eid,
        msg_tag: u8,
        tag_owner: bool,
        payload: Vec<u8>,
    ) -> Result<(), CommunicationError>;

    /// Claim exclusive transport bandwidth toward `eid` for `hold`.
    async fn reserve(
        &self,
        eid: Eid,
        hold: Duration,
    ) -> Result<(), CommunicationError>;

    /// Release a previously claimed reservation.
    async fn release(&self, eid: Eid) -> Result<(), CommunicationError>;

    /// Human-readable location of the endpoint, when the transport knows
    /// one (used for device naming).
    fn device_location(&self, eid: Eid) -> Option<String>;

    /// Ask the transport to re-discover `eid` (used after firmware
    /// activation).
    async fn trigger_rediscovery(&self, eid: Eid);
}
