// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! AF_MCTP datagram transport.
//!
//! The kernel carries the message type and tag in the socket address, so
//! this implementation maps the link's one-byte message-type prefix onto
//! `smctp_type` on send and restores it on receive. A receive pump task
//! dispatches tag-owner packets (device-initiated requests) into the
//! shared link and completes the per-endpoint response slot otherwise.

use async_trait::async_trait;
use fxhash::FxHashMap;
use pldm_comms::error::CommunicationError;
use pldm_comms::transport::RawTransport;
use pldm_comms::SharedLink;
use pldm_messages::Eid;
use slog::error;
use slog::warn;
use slog::Logger;
use std::io;
use std::mem;
use std::os::unix::io::AsRawFd;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use tokio::sync::oneshot;
use tokio::time::timeout;

// Not yet in the libc crate.
const AF_MCTP: libc::sa_family_t = 45;
const MCTP_NET_ANY: u32 = 0x00;
const MCTP_TAG_OWNER: u8 = 0x08;

const MAX_PACKET: usize = 4096;

#[repr(C)]
#[allow(non_camel_case_types)]
struct sockaddr_mctp {
    smctp_family: libc::sa_family_t,
    __smctp_pad0: u16,
    smctp_network: u32,
    smctp_addr: u8,
    smctp_type: u8,
    smctp_tag: u8,
    __smctp_pad1: u8,
}

struct MctpAddr(sockaddr_mctp);

impl MctpAddr {
    fn new(eid: u8, msg_type: u8, tag: u8) -> Self {
        Self(sockaddr_mctp {
            smctp_family: AF_MCTP,
            __smctp_pad0: 0,
            smctp_network: MCTP_NET_ANY,
            smctp_addr: eid,
            smctp_type: msg_type,
            smctp_tag: tag,
            __smctp_pad1: 0,
        })
    }

    fn zero() -> Self {
        Self::new(0, 0, 0)
    }
}

struct MctpSocket(RawFd);

impl Drop for MctpSocket {
    fn drop(&mut self) {
        unsafe { libc::close(self.0) };
    }
}

impl AsRawFd for MctpSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

impl MctpSocket {
    fn new() -> io::Result<Self> {
        let fd = unsafe {
            libc::socket(
                AF_MCTP.into(),
                libc::SOCK_DGRAM | libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
                0,
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self(fd))
    }

    fn send_to(&self, buf: &[u8], addr: &MctpAddr) -> io::Result<usize> {
        let rc = unsafe {
            libc::sendto(
                self.0,
                buf.as_ptr() as *const libc::c_void,
                buf.len(),
                0,
                &addr.0 as *const sockaddr_mctp as *const libc::sockaddr,
                mem::size_of::<sockaddr_mctp>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(rc as usize)
        }
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, MctpAddr)> {
        let mut addr = MctpAddr::zero();
        let mut addr_len =
            mem::size_of::<sockaddr_mctp>() as libc::socklen_t;
        let rc = unsafe {
            libc::recvfrom(
                self.0,
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                0,
                &mut addr.0 as *mut sockaddr_mctp as *mut libc::sockaddr,
                &mut addr_len,
            )
        };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok((rc as usize, addr))
        }
    }
}

pub struct MctpTransport {
    socket: Arc<AsyncFd<MctpSocket>>,
    pending: Mutex<FxHashMap<Eid, oneshot::Sender<Vec<u8>>>>,
    log: Logger,
}

impl MctpTransport {
    pub fn new(log: Logger) -> io::Result<Arc<Self>> {
        let socket = Arc::new(AsyncFd::with_interest(
            MctpSocket::new()?,
            Interest::READABLE,
        )?);
        Ok(Arc::new(Self {
            socket,
            pending: Mutex::new(FxHashMap::default()),
            log,
        }))
    }

    /// Spawn the receive pump. Unsolicited (tag-owner) packets go to the
    /// link's inbound dispatch; everything else completes the pending
    /// response slot for its source endpoint.
    pub fn spawn_receiver(self: &Arc<Self>, link: SharedLink) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut buf = [0u8; MAX_PACKET];
            loop {
                let mut guard = match this.socket.readable().await {
                    Ok(guard) => guard,
                    Err(err) => {
                        error!(this.log, "MCTP socket broken"; "err" => %err);
                        return;
                    }
                };
                let result =
                    guard.try_io(|fd| fd.get_ref().recv_from(&mut buf));
                let (len, addr) = match result {
                    Ok(Ok(received)) => received,
                    Ok(Err(err)) => {
                        warn!(this.log, "MCTP recv failed"; "err" => %err);
                        continue;
                    }
                    Err(_would_block) => continue,
                };

                let addr = addr.0;
                let mut payload = Vec::with_capacity(len + 1);
                payload.push(addr.smctp_type);
                payload.extend_from_slice(&buf[..len]);

                if addr.smctp_tag & MCTP_TAG_OWNER != 0 {
                    link.handle_inbound(
                        addr.smctp_addr,
                        addr.smctp_tag & 0x07,
                        true,
                        &payload,
                    );
                    continue;
                }

                let waiter =
                    this.pending.lock().unwrap().remove(&addr.smctp_addr);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(payload);
                    }
                    None => {
                        warn!(
                            this.log, "ignoring unexpected MCTP response";
                            "eid" => addr.smctp_addr,
                        );
                    }
                }
            }
        });
    }

    fn send_framed(
        &self,
        eid: Eid,
        tag: u8,
        payload: &[u8],
    ) -> Result<(), CommunicationError> {
        // The link's message-type prefix byte travels in the sockaddr.
        let (&msg_type, body) = payload
            .split_first()
            .ok_or(CommunicationError::Malformed { reason: "empty packet" })?;
        let addr = MctpAddr::new(eid, msg_type, tag);
        self.socket
            .get_ref()
            .send_to(body, &addr)
            .map_err(|err| CommunicationError::Transport(err.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl RawTransport for MctpTransport {
    async fn send_receive(
        &self,
        eid: Eid,
        payload: Vec<u8>,
        timeout_duration: Duration,
    ) -> Result<Vec<u8>, CommunicationError> {
        let rx = {
            let (tx, rx) = oneshot::channel();
            self.pending.lock().unwrap().insert(eid, tx);
            rx
        };
        self.send_framed(eid, MCTP_TAG_OWNER, &payload)?;
        match timeout(timeout_duration, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(CommunicationError::Refused),
            Err(_) => {
                self.pending.lock().unwrap().remove(&eid);
                Err(CommunicationError::Timeout)
            }
        }
    }

    async fn send(
        &self,
        eid: Eid,
        msg_tag: u8,
        tag_owner: bool,
        payload: Vec<u8>,
    ) -> Result<(), CommunicationError> {
        let tag =
            (msg_tag & 0x07) | if tag_owner { MCTP_TAG_OWNER } else { 0 };
        self.send_framed(eid, tag, &payload)
    }

    async fn reserve(
        &self,
        _eid: Eid,
        _hold: Duration,
    ) -> Result<(), CommunicationError> {
        // AF_MCTP offers no bandwidth claim; the exclusivity policy is
        // enforced in the shared link.
        Ok(())
    }

    async fn release(&self, _eid: Eid) -> Result<(), CommunicationError> {
        Ok(())
    }

    fn device_location(&self, _eid: Eid) -> Option<String> {
        None
    }

    async fn trigger_rediscovery(&self, eid: Eid) {
        warn!(
            self.log, "rediscovery requested; re-enumerate the endpoint";
            "eid" => eid,
        );
    }
}
