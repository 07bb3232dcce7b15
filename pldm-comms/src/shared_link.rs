// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `SharedLink` wraps the raw transport and is the single object every
//! subsystem talks through. It owns the TID↔EID map, the per-TID rolling
//! instance-id counters, the bandwidth-reservation flag, and the dispatch
//! of device-initiated requests to whichever subsystem is expecting them.
//!
//! Request/response validation and retry policy live here so the PDR
//! manager and the update orchestrator never see a torn or mismatched
//! response.

use fxhash::FxHashMap;
use pldm_messages::Eid;
use pldm_messages::Header;
use pldm_messages::MessageType;
use pldm_messages::Tid;
use pldm_messages::INSTANCE_ID_MASK;
use pldm_messages::MIN_RESPONSE_LEN;
use pldm_messages::PLDM_TYPE_MASK;
use slog::debug;
use slog::info;
use slog::warn;
use slog::Logger;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;

use crate::error::CommunicationError;
use crate::transport::RawTransport;
use crate::transport::MESSAGE_TYPE_PLDM;

/// Hard cap on per-request retries, whatever the caller asks for.
const MAX_RETRIES: usize = 5;

/// A device-initiated request delivered through the rendezvous slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRequest {
    pub tid: Tid,
    pub msg_tag: u8,
    pub instance_id: u8,
    pub command: u8,
    /// Request body with the PLDM header stripped.
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
struct Reservation {
    tid: Tid,
    pldm_type: u8,
}

struct Expectation {
    commands: Vec<u8>,
    tx: oneshot::Sender<InboundRequest>,
}

#[derive(Default)]
struct LinkState {
    tid_map: FxHashMap<Tid, Eid>,
    instance_ids: FxHashMap<Tid, u8>,
    reservation: Option<Reservation>,
    expectations: FxHashMap<Tid, Expectation>,
}

#[derive(Clone)]
pub struct SharedLink {
    raw: Arc<dyn RawTransport>,
    state: Arc<Mutex<LinkState>>,
    log: Logger,
}

impl SharedLink {
    pub fn new(raw: Arc<dyn RawTransport>, log: Logger) -> Self {
        Self { raw, state: Arc::new(Mutex::new(LinkState::default())), log }
    }

    pub fn log(&self) -> &Logger {
        &self.log
    }

    /// Bind `tid` to `eid`. Fails if the endpoint is already bound to
    /// another TID.
    pub fn map_device(&self, tid: Tid, eid: Eid) -> Result<(), CommunicationError> {
        let mut state = self.state.lock().unwrap();
        if state.tid_map.values().any(|&mapped| mapped == eid) {
            warn!(
                self.log, "EID already mapped to another TID";
                "eid" => eid,
                "tid" => tid,
            );
            return Err(CommunicationError::Refused);
        }
        state.tid_map.insert(tid, eid);
        info!(self.log, "mapped device"; "tid" => tid, "eid" => eid);
        Ok(())
    }

    pub fn unmap_device(&self, tid: Tid) {
        let mut state = self.state.lock().unwrap();
        if state.tid_map.remove(&tid).is_some() {
            info!(self.log, "removed device mapping"; "tid" => tid);
        }
        state.instance_ids.remove(&tid);
        state.expectations.remove(&tid);
    }

    pub fn mapped_eid(&self, tid: Tid) -> Option<Eid> {
        self.state.lock().unwrap().tid_map.get(&tid).copied()
    }

    pub fn mapped_tid(&self, eid: Eid) -> Option<Tid> {
        let state = self.state.lock().unwrap();
        state
            .tid_map
            .iter()
            .find(|(_, &mapped)| mapped == eid)
            .map(|(&tid, _)| tid)
    }

    pub fn mapped_tids(&self) -> Vec<Tid> {
        self.state.lock().unwrap().tid_map.keys().copied().collect()
    }

    /// Next rolling 5-bit instance id for `tid`.
    pub fn next_instance_id(&self, tid: Tid) -> u8 {
        let mut state = self.state.lock().unwrap();
        let id = state.instance_ids.entry(tid).or_insert(0);
        *id = (*id + 1) & INSTANCE_ID_MASK;
        *id
    }

    pub fn device_location(&self, tid: Tid) -> Option<String> {
        let eid = self.mapped_eid(tid)?;
        self.raw.device_location(eid)
    }

    pub async fn trigger_rediscovery(&self, tid: Tid) {
        if let Some(eid) = self.mapped_eid(tid) {
            self.raw.trigger_rediscovery(eid).await;
        }
    }

    fn reservation_conflict(&self, tid: Tid, pldm_type: u8) -> Option<CommunicationError> {
        let state = self.state.lock().unwrap();
        match state.reservation {
            Some(holder)
                if holder.tid != tid || holder.pldm_type != pldm_type =>
            {
                Some(CommunicationError::ReservationConflict {
                    tid: holder.tid,
                    pldm_type: holder.pldm_type,
                })
            }
            _ => None,
        }
    }

    /// Claim the link for exclusive use by `(tid, pldm_type)` for `hold`.
    pub async fn reserve(
        &self,
        tid: Tid,
        pldm_type: u8,
        hold: Duration,
    ) -> Result<(), CommunicationError> {
        if let Some(err) = self.reservation_conflict(tid, pldm_type) {
            return Err(err);
        }
        let eid =
            self.mapped_eid(tid).ok_or(CommunicationError::NoRoute(tid))?;
        self.raw.reserve(eid, hold).await?;
        self.state.lock().unwrap().reservation =
            Some(Reservation { tid, pldm_type });
        debug!(
            self.log, "bandwidth reserved";
            "tid" => tid,
            "hold_secs" => hold.as_secs(),
        );
        Ok(())
    }

    /// Release a reservation held by `(tid, pldm_type)`.
    pub async fn release(
        &self,
        tid: Tid,
        pldm_type: u8,
    ) -> Result<(), CommunicationError> {
        {
            let state = self.state.lock().unwrap();
            match state.reservation {
                Some(holder)
                    if holder.tid == tid && holder.pldm_type == pldm_type => {}
                _ => return Err(CommunicationError::Refused),
            }
        }
        let eid =
            self.mapped_eid(tid).ok_or(CommunicationError::NoRoute(tid))?;
        self.raw.release(eid).await?;
        self.state.lock().unwrap().reservation = None;
        debug!(self.log, "bandwidth released"; "tid" => tid);
        Ok(())
    }

    /// Send a request to `tid` and await the validated response.
    ///
    /// The response must carry the PLDM message-type prefix, be at least
    /// header-plus-completion-code long, have the response bit set, and
    /// echo the request's instance id; anything else consumes one of the
    /// (at most five) attempts.
    pub async fn send_request(
        &self,
        tid: Tid,
        payload: Vec<u8>,
        timeout: Duration,
        retries: usize,
    ) -> Result<Vec<u8>, CommunicationError> {
        let pldm_type = payload
            .get(1)
            .map(|&b| b & PLDM_TYPE_MASK)
            .ok_or(CommunicationError::Malformed { reason: "empty request" })?;
        if let Some(err) = self.reservation_conflict(tid, pldm_type) {
            info!(
                self.log, "send refused, bandwidth reserved elsewhere";
                "tid" => tid,
            );
            return Err(err);
        }
        let instance_id = payload[0] & INSTANCE_ID_MASK;

        let mut framed = Vec::with_capacity(payload.len() + 1);
        framed.push(MESSAGE_TYPE_PLDM);
        framed.extend_from_slice(&payload);

        let retries = retries.min(MAX_RETRIES).max(1);
        for attempt in 1..=retries {
            // A device removal rewrites the map mid-retry; resolve late so
            // the loop aborts instead of sending into the void.
            let eid = match self.mapped_eid(tid) {
                Some(eid) => eid,
                None => return Err(CommunicationError::NoRoute(tid)),
            };

            let response = match self
                .raw
                .send_receive(eid, framed.clone(), timeout)
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    debug!(
                        self.log, "request attempt failed";
                        "tid" => tid,
                        "attempt" => attempt,
                        "err" => %err,
                    );
                    continue;
                }
            };

            match Self::validate_response(&response, instance_id) {
                Ok(stripped) => return Ok(stripped),
                Err(reason) => {
                    warn!(
                        self.log, "discarding invalid response";
                        "tid" => tid,
                        "attempt" => attempt,
                        "reason" => reason,
                    );
                    continue;
                }
            }
        }
        Err(CommunicationError::ExhaustedNumAttempts(retries))
    }

    /// `send_request` for an endpoint that has no TID binding yet (base
    /// discovery). `tid` is only used for instance-id bookkeeping.
    pub async fn send_request_to_eid(
        &self,
        eid: Eid,
        payload: Vec<u8>,
        timeout: Duration,
        retries: usize,
    ) -> Result<Vec<u8>, CommunicationError> {
        let instance_id = payload
            .first()
            .map(|&b| b & INSTANCE_ID_MASK)
            .ok_or(CommunicationError::Malformed { reason: "empty request" })?;

        let mut framed = Vec::with_capacity(payload.len() + 1);
        framed.push(MESSAGE_TYPE_PLDM);
        framed.extend_from_slice(&payload);

        let retries = retries.min(MAX_RETRIES).max(1);
        for _ in 1..=retries {
            let response = match self
                .raw
                .send_receive(eid, framed.clone(), timeout)
                .await
            {
                Ok(response) => response,
                Err(_) => continue,
            };
            if let Ok(stripped) = Self::validate_response(&response, instance_id)
            {
                return Ok(stripped);
            }
        }
        Err(CommunicationError::ExhaustedNumAttempts(retries))
    }

    fn validate_response(
        response: &[u8],
        instance_id: u8,
    ) -> Result<Vec<u8>, &'static str> {
        let (&prefix, stripped) =
            response.split_first().ok_or("empty response")?;
        if prefix != MESSAGE_TYPE_PLDM {
            return Err("not a PLDM message");
        }
        if stripped.len() < MIN_RESPONSE_LEN {
            return Err("response shorter than minimum");
        }
        let (header, _) = Header::decode(stripped).map_err(|_| "bad header")?;
        if header.message_type != MessageType::Response {
            return Err("response bit not set");
        }
        if header.instance_id != instance_id {
            return Err("instance id mismatch");
        }
        Ok(stripped.to_vec())
    }

    /// One-way send, used for responses to device-initiated requests. The
    /// tag-owner bit is cleared: we are answering the device's tag.
    pub async fn send_response(
        &self,
        tid: Tid,
        msg_tag: u8,
        payload: Vec<u8>,
        retries: usize,
    ) -> Result<(), CommunicationError> {
        let pldm_type = payload
            .get(1)
            .map(|&b| b & PLDM_TYPE_MASK)
            .ok_or(CommunicationError::Malformed { reason: "empty response" })?;
        if let Some(err) = self.reservation_conflict(tid, pldm_type) {
            return Err(err);
        }
        let eid =
            self.mapped_eid(tid).ok_or(CommunicationError::NoRoute(tid))?;

        let mut framed = Vec::with_capacity(payload.len() + 1);
        framed.push(MESSAGE_TYPE_PLDM);
        framed.extend_from_slice(&payload);

        let retries = retries.min(MAX_RETRIES).max(1);
        let mut last_err = CommunicationError::Refused;
        for _ in 0..retries {
            match self.raw.send(eid, msg_tag, false, framed.clone()).await {
                Ok(()) => return Ok(()),
                Err(err) => last_err = err,
            }
        }
        Err(last_err)
    }

    /// Wait up to `idle_timeout` for a device-initiated request from `tid`
    /// carrying one of `commands`.
    ///
    /// This is the single-slot rendezvous the orchestrator parks on while
    /// acting as a responder: the inbound dispatch fills the slot (and
    /// thereby cancels the timer), or the timer fires and the registration
    /// is withdrawn.
    pub async fn wait_device_request(
        &self,
        tid: Tid,
        commands: &[u8],
        idle_timeout: Duration,
    ) -> Result<InboundRequest, CommunicationError> {
        let rx = {
            let (tx, rx) = oneshot::channel();
            let mut state = self.state.lock().unwrap();
            if state
                .expectations
                .insert(tid, Expectation { commands: commands.to_vec(), tx })
                .is_some()
            {
                warn!(
                    self.log, "replacing existing request expectation";
                    "tid" => tid,
                );
            }
            rx
        };

        match timeout(idle_timeout, rx).await {
            Ok(Ok(request)) => Ok(request),
            // Sender dropped: the expectation was replaced or the device
            // was unmapped.
            Ok(Err(_)) => Err(CommunicationError::NoRoute(tid)),
            Err(_) => {
                self.state.lock().unwrap().expectations.remove(&tid);
                Err(CommunicationError::Timeout)
            }
        }
    }

    /// Entry point for unsolicited packets from the raw transport.
    ///
    /// Packets without the tag-owner bit, from unmapped endpoints, or not
    /// matching a registered `(tid, command)` expectation are dropped.
    pub fn handle_inbound(
        &self,
        eid: Eid,
        msg_tag: u8,
        tag_owner: bool,
        payload: &[u8],
    ) {
        if !tag_owner {
            warn!(
                self.log,
                "dropping packet without tag-owner bit";
                "eid" => eid,
            );
            return;
        }
        let Some((&prefix, stripped)) = payload.split_first() else {
            return;
        };
        if prefix != MESSAGE_TYPE_PLDM {
            return;
        }
        let Some(tid) = self.mapped_tid(eid) else {
            warn!(
                self.log,
                "dropping packet from EID with no mapped TID";
                "eid" => eid,
            );
            return;
        };
        let Ok((header, body)) = Header::decode(stripped) else {
            warn!(self.log, "dropping runt inbound packet"; "tid" => tid);
            return;
        };

        let mut state = self.state.lock().unwrap();
        let matched = match state.expectations.get(&tid) {
            Some(expectation) => expectation.commands.contains(&header.command),
            None => false,
        };
        if !matched {
            drop(state);
            info!(
                self.log, "dropping unexpected device request";
                "tid" => tid,
                "command" => header.command,
            );
            return;
        }
        let expectation = state.expectations.remove(&tid).unwrap();
        drop(state);

        let request = InboundRequest {
            tid,
            msg_tag,
            instance_id: header.instance_id,
            command: header.command,
            body: body.to_vec(),
        };
        if expectation.tx.send(request).is_err() {
            debug!(
                self.log, "expectation receiver gone before delivery";
                "tid" => tid,
            );
        }
    }
}
