// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The firmware-update orchestrator: one session per (device, package
//! device-id record), driving the update state machine to completion.
//!
//! The agent alternates roles over the session: requester for
//! RequestUpdate, GetDeviceMetaData, PassComponentTable, UpdateComponent,
//! ActivateFirmware and the cancels; responder for the device-initiated
//! GetPackageData, GetMetaData, RequestFirmwareData, TransferComplete,
//! VerifyComplete and ApplyComplete. Device-initiated commands arrive
//! through the shared link's `(tid, expected command)` rendezvous.

use pldm_messages::completion;
use pldm_messages::encode_cc_only_response;
use pldm_messages::fwup;
use pldm_messages::fwup::DataTransferRequest;
use pldm_messages::fwup::DataTransferResponse;
use pldm_messages::fwup::PassComponentTableRequest;
use pldm_messages::fwup::RequestUpdateRequest;
use pldm_messages::fwup::UpdateComponentRequest;
use pldm_messages::transfer_flag;
use pldm_messages::PldmType;
use pldm_messages::Tid;
use pldm_messages::TransferFlag;
use pldm_messages::TransferOp;
use pldm_messages::BASELINE_TRANSFER_SIZE;
use slog::debug;
use slog::info;
use slog::warn;
use slog::Logger;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use uuid::Uuid;

use crate::error::CommunicationError;
use crate::error::ProtocolError;
use crate::error::UpdateError;
use crate::package::FirmwarePackage;
use crate::publish::Publisher;
use crate::shared_link::InboundRequest;
use crate::SharedLink;
use crate::COMMAND_RETRIES;
use crate::COMMAND_TIMEOUT;
use crate::FD_COMMAND_TIMEOUT;
use crate::INTER_COMMAND_DELAY;
use crate::REQUEST_FIRMWARE_DATA_IDLE_TIMEOUT;
use crate::RETRY_REQUEST_UPDATE_DELAY;

/// RequestUpdate attempts (the device may answer RETRY_REQUEST_UPDATE).
const REQUEST_UPDATE_ATTEMPTS: usize = 3;

/// GetDeviceMetaData response ceiling.
const DEVICE_META_DATA_RESPONSE_LIMIT: usize = 100;

/// Observed transfer rate used to size the bandwidth reservation.
const RESERVATION_BYTES_PER_SEC: u64 = 2730;

/// The reservation is renewed this long before it would lapse.
const RESERVATION_RENEWAL_MARGIN: Duration = Duration::from_secs(5);

/// Firmware-device state, advanced only along the transitions of the
/// update protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdState {
    Idle,
    LearnComponents,
    ReadyXfer,
    Download,
    Verify,
    Apply,
    Activate,
}

/// Result of a completed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// Device estimate for self-contained activation, in seconds.
    pub estimated_activation_secs: u16,
}

struct ReservationRenewal {
    task: JoinHandle<()>,
}

impl Drop for ReservationRenewal {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct UpdateSession {
    link: SharedLink,
    tid: Tid,
    device_record_index: usize,
    package: Arc<dyn FirmwarePackage>,
    publisher: Arc<dyn Publisher>,
    log: Logger,
    id: Uuid,
    state: FdState,
    update_mode: bool,
    fd_meta_data_len: u16,
    fd_will_send_pkg_data: bool,
    device_meta_data: Vec<u8>,
    applicable_components: u64,
    pass_component_count: u16,
    component_applied: bool,
    reservation: Option<ReservationRenewal>,
}

impl UpdateSession {
    pub fn new(
        link: SharedLink,
        tid: Tid,
        device_record_index: usize,
        package: Arc<dyn FirmwarePackage>,
        publisher: Arc<dyn Publisher>,
        log: &Logger,
    ) -> Self {
        let id = Uuid::new_v4();
        let log = log.new(slog::o!("update_id" => id.to_string(), "tid" => tid));
        Self {
            link,
            tid,
            device_record_index,
            package,
            publisher,
            log,
            id,
            state: FdState::Idle,
            update_mode: false,
            fd_meta_data_len: 0,
            fd_will_send_pkg_data: false,
            device_meta_data: Vec::new(),
            applicable_components: 0,
            pass_component_count: 0,
            component_applied: false,
            reservation: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> FdState {
        self.state
    }

    fn set_state(&mut self, state: FdState) {
        debug!(self.log, "firmware device state change"; "state" => ?state);
        self.state = state;
    }

    fn component_count(&self) -> usize {
        self.package.components().len()
    }

    fn is_applicable(&self, component: usize) -> bool {
        component < 64 && (self.applicable_components >> component) & 1 == 1
    }

    fn applicable_count(&self) -> u16 {
        self.applicable_components.count_ones() as u16
    }

    /// Drive the whole session. On error the caller is expected to invoke
    /// [`Self::terminate`].
    pub async fn run(&mut self) -> Result<UpdateOutcome, UpdateError> {
        let record = self
            .package
            .device_records()
            .get(self.device_record_index)
            .ok_or(UpdateError::PackageProperty("device id record"))?
            .clone();
        self.applicable_components = record.applicable_components;

        self.request_update(&record).await?;
        info!(self.log, "RequestUpdate accepted, entering update mode");
        self.update_mode = true;
        self.set_state(FdState::LearnComponents);
        sleep(INTER_COMMAND_DELAY).await;

        self.acquire_bandwidth().await;

        if self.fd_will_send_pkg_data {
            self.send_package_data(&record.package_data).await?;
        }
        if self.fd_meta_data_len > 0 {
            self.get_device_meta_data().await?;
        }
        self.pass_component_table().await?;
        self.set_state(FdState::ReadyXfer);

        for component in 0..self.component_count() {
            if !self.is_applicable(component) {
                debug!(
                    self.log, "component not applicable, skipping";
                    "component" => component,
                );
                self.report_component_progress(component);
                continue;
            }
            if let Err(err) = self.update_one_component(component).await {
                warn!(
                    self.log, "component update failed";
                    "component" => component,
                    "err" => %err,
                );
                continue;
            }
            self.component_applied = true;
            self.report_component_progress(component);
        }

        // The device may come back for its metadata once components are
        // applied.
        if self.fd_meta_data_len > 0 && !self.device_meta_data.is_empty() {
            let meta = std::mem::take(&mut self.device_meta_data);
            if let Err(err) = self.send_meta_data(&meta).await {
                warn!(self.log, "SendMetaData failed"; "err" => %err);
                self.device_meta_data = meta;
                return Err(err);
            }
        }

        self.release_bandwidth().await;

        if !self.component_applied {
            return Err(UpdateError::Incomplete);
        }

        let estimated = self.activate_firmware().await?;
        info!(
            self.log, "firmware update completed";
            "estimated_activation_secs" => estimated,
        );
        Ok(UpdateOutcome { estimated_activation_secs: estimated })
    }

    /// Orderly unwind after a failed phase: CancelUpdate (harmless outside
    /// Idle/Activate) and bandwidth release.
    pub async fn terminate(&mut self) {
        warn!(self.log, "terminating firmware update session");
        if let Err(err) = self.cancel_update().await {
            warn!(self.log, "CancelUpdate failed"; "err" => %err);
        }
        self.release_bandwidth().await;
    }

    // -- Phase A ------------------------------------------------------------

    async fn request_update(
        &mut self,
        record: &crate::package::DeviceRecord,
    ) -> Result<(), UpdateError> {
        let request = RequestUpdateRequest {
            max_transfer_size: BASELINE_TRANSFER_SIZE as u32,
            component_count: self.applicable_count(),
            max_outstanding_transfers: 1,
            package_data_len: record.package_data.len() as u16,
            version_string_type: record.image_set_version_type,
            version_string: record.image_set_version.clone(),
        };

        let mut attempts = 0;
        loop {
            attempts += 1;
            let payload = fwup::encode_request_update_req(
                self.link.next_instance_id(self.tid),
                &request,
            )
            .map_err(CommunicationError::Encode)?;
            let resp = self
                .link
                .send_request(self.tid, payload, COMMAND_TIMEOUT, COMMAND_RETRIES)
                .await
                .map_err(UpdateError::Communication)?;
            let decoded = fwup::decode_request_update_resp(&resp)
                .map_err(CommunicationError::Decode)?;

            match decoded.completion_code {
                completion::SUCCESS => {
                    self.fd_meta_data_len = decoded.fd_meta_data_len;
                    self.fd_will_send_pkg_data = decoded.fd_will_send_pkg_data;
                    return Ok(());
                }
                completion::RETRY_REQUEST_UPDATE
                    if attempts < REQUEST_UPDATE_ATTEMPTS =>
                {
                    info!(
                        self.log,
                        "device cannot enter update mode yet, retrying";
                        "attempt" => attempts,
                    );
                    sleep(RETRY_REQUEST_UPDATE_DELAY).await;
                }
                completion::RETRY_REQUEST_UPDATE => {
                    return Err(ProtocolError::RetryRequestUpdate.into());
                }
                cc => return Err(ProtocolError::CompletionCode(cc).into()),
            }
        }
    }

    // -- Bandwidth reservation ----------------------------------------------

    fn reservation_hold(&self) -> Duration {
        let size = self.package.updatable_image_size();
        Duration::from_secs((1 + size / RESERVATION_BYTES_PER_SEC) * 3)
    }

    /// Reserve the link for the update and schedule renewals at
    /// `hold - 5s`. Failure to reserve is logged but not fatal; the update
    /// proceeds unreserved.
    async fn acquire_bandwidth(&mut self) {
        let hold = self.reservation_hold();
        let pldm_type = PldmType::FirmwareUpdate as u8;
        if let Err(err) = self.link.reserve(self.tid, pldm_type, hold).await {
            warn!(self.log, "bandwidth reservation failed"; "err" => %err);
            return;
        }
        let link = self.link.clone();
        let tid = self.tid;
        let log = self.log.clone();
        // Renew shortly before the hold lapses. Holds shorter than the
        // margin renew at expiry instead of spinning.
        let interval = if hold > RESERVATION_RENEWAL_MARGIN {
            hold - RESERVATION_RENEWAL_MARGIN
        } else {
            hold
        };
        let task = tokio::spawn(async move {
            loop {
                sleep(interval).await;
                match link.reserve(tid, pldm_type, hold).await {
                    Ok(()) => {
                        debug!(log, "bandwidth reservation renewed");
                    }
                    Err(err) => {
                        warn!(
                            log, "bandwidth renewal failed";
                            "err" => %err,
                        );
                        break;
                    }
                }
            }
        });
        self.reservation = Some(ReservationRenewal { task });
    }

    async fn release_bandwidth(&mut self) {
        if self.reservation.take().is_none() {
            return;
        }
        let pldm_type = PldmType::FirmwareUpdate as u8;
        if let Err(err) = self.link.release(self.tid, pldm_type).await {
            warn!(self.log, "bandwidth release failed"; "err" => %err);
        }
    }

    // -- Phases B and F: serving data to the device -------------------------

    async fn send_package_data(&mut self, data: &[u8]) -> Result<(), UpdateError> {
        if data.is_empty() {
            warn!(self.log, "device wants package data but the record has none");
            return Err(UpdateError::PackageProperty("package data"));
        }
        info!(self.log, "serving package data"; "len" => data.len());
        self.serve_data(fwup::CMD_GET_PACKAGE_DATA, data).await
    }

    async fn send_meta_data(&mut self, data: &[u8]) -> Result<(), UpdateError> {
        info!(self.log, "serving device metadata back"; "len" => data.len());
        self.serve_data(fwup::CMD_GET_META_DATA, data).await
    }

    /// Serve `data` in baseline-sized segments against device-issued
    /// GetPackageData/GetMetaData requests.
    ///
    /// A GetFirstPart at any point restarts from offset zero; for
    /// GetNextPart the data-transfer handle names the segment index.
    /// Duplicate handles are answered again; completion is reached when
    /// every distinct segment has been requested at least once.
    async fn serve_data(
        &mut self,
        command: u8,
        data: &[u8],
    ) -> Result<(), UpdateError> {
        let unique_segments = data.len().div_ceil(BASELINE_TRANSFER_SIZE);
        let mut received: BTreeSet<u32> = BTreeSet::new();

        for _ in 0..request_ceiling(data.len()) {
            let inbound = self
                .link
                .wait_device_request(self.tid, &[command], FD_COMMAND_TIMEOUT)
                .await
                .map_err(UpdateError::Communication)?;

            let request = match fwup::decode_data_transfer_req(&inbound.body) {
                Ok(request) => request,
                Err(err) => {
                    warn!(self.log, "bad data transfer request"; "err" => %err);
                    self.reply_cc(
                        &inbound,
                        command,
                        completion::ERROR_INVALID_DATA,
                    )
                    .await;
                    return Err(UpdateError::Communication(err.into()));
                }
            };

            let (segment, offset) = match request.transfer_op {
                TransferOp::GetFirstPart => (0u32, 0usize),
                TransferOp::GetNextPart => (
                    request.data_transfer_handle,
                    request.data_transfer_handle as usize
                        * BASELINE_TRANSFER_SIZE,
                ),
            };

            let mut length = BASELINE_TRANSFER_SIZE;
            if offset + length > data.len() {
                if offset >= data.len() {
                    self.reply_cc(
                        &inbound,
                        command,
                        completion::DATA_OUT_OF_RANGE,
                    )
                    .await;
                    return Err(ProtocolError::CompletionCode(
                        completion::DATA_OUT_OF_RANGE,
                    )
                    .into());
                }
                length = data.len() - offset;
            }

            let response = DataTransferResponse {
                completion_code: completion::SUCCESS,
                next_data_transfer_handle: segment + 1,
                transfer_flag: transfer_flag(offset, length, data.len()),
                portion: data[offset..offset + length].to_vec(),
            };
            let payload = fwup::encode_data_transfer_resp(
                inbound.instance_id,
                command,
                &response,
            );
            self.link
                .send_response(self.tid, inbound.msg_tag, payload, COMMAND_RETRIES)
                .await
                .map_err(UpdateError::Communication)?;

            received.insert(segment);
            if received.len() == unique_segments {
                info!(self.log, "data transfer to device complete");
                return Ok(());
            }
        }
        warn!(self.log, "data transfer request ceiling exceeded");
        Err(CommunicationError::ExhaustedNumAttempts(request_ceiling(
            data.len(),
        ))
        .into())
    }

    // -- Phase C ------------------------------------------------------------

    async fn get_device_meta_data(&mut self) -> Result<(), UpdateError> {
        let mut request = DataTransferRequest {
            data_transfer_handle: 0,
            transfer_op: TransferOp::GetFirstPart,
        };
        let mut acc = Vec::with_capacity(usize::from(self.fd_meta_data_len));

        for _ in 0..DEVICE_META_DATA_RESPONSE_LIMIT {
            let payload = fwup::encode_data_transfer_req(
                self.link.next_instance_id(self.tid),
                fwup::CMD_GET_DEVICE_META_DATA,
                &request,
            );
            let resp = self
                .link
                .send_request(self.tid, payload, COMMAND_TIMEOUT, COMMAND_RETRIES)
                .await
                .map_err(UpdateError::Communication)?;
            let decoded = fwup::decode_data_transfer_resp(&resp)
                .map_err(CommunicationError::Decode)?;
            if decoded.completion_code != completion::SUCCESS {
                return Err(ProtocolError::CompletionCode(
                    decoded.completion_code,
                )
                .into());
            }
            acc.extend_from_slice(&decoded.portion);
            if decoded.transfer_flag.is_final() {
                debug!(
                    self.log, "GetDeviceMetaData complete";
                    "bytes" => acc.len(),
                );
                self.device_meta_data = acc;
                return Ok(());
            }
            request.data_transfer_handle = decoded.next_data_transfer_handle;
            request.transfer_op = TransferOp::GetNextPart;
        }
        warn!(self.log, "GetDeviceMetaData response ceiling exceeded");
        Err(CommunicationError::ExhaustedNumAttempts(
            DEVICE_META_DATA_RESPONSE_LIMIT,
        )
        .into())
    }

    // -- Phase D ------------------------------------------------------------

    async fn pass_component_table(&mut self) -> Result<(), UpdateError> {
        let mut accepted = 0u16;
        for component in 0..self.component_count() {
            if !self.is_applicable(component) {
                debug!(
                    self.log,
                    "component not applicable, skipping PassComponentTable";
                    "component" => component,
                );
                continue;
            }
            let entry = self.package.components()[component].clone();
            let request = PassComponentTableRequest {
                transfer_flag: self.next_pass_component_flag(),
                classification: entry.classification,
                identifier: entry.identifier,
                classification_index: 0,
                comparison_stamp: entry.comparison_stamp,
                version_string_type: entry.version_type,
                version_string: entry.version.clone(),
            };
            let payload = fwup::encode_pass_component_table_req(
                self.link.next_instance_id(self.tid),
                &request,
            )
            .map_err(CommunicationError::Encode)?;
            let resp = match self
                .link
                .send_request(self.tid, payload, COMMAND_TIMEOUT, COMMAND_RETRIES)
                .await
            {
                Ok(resp) => resp,
                Err(err) => {
                    warn!(
                        self.log, "PassComponentTable send failed";
                        "component" => component,
                        "err" => %err,
                    );
                    continue;
                }
            };
            let decoded = fwup::decode_pass_component_table_resp(&resp)
                .map_err(CommunicationError::Decode)?;
            if decoded.completion_code != completion::SUCCESS {
                warn!(
                    self.log, "PassComponentTable refused";
                    "component" => component,
                    "cc" => decoded.completion_code,
                );
                continue;
            }
            accepted += 1;
            sleep(INTER_COMMAND_DELAY).await;
        }
        if accepted == 0 {
            warn!(self.log, "no component accepted by the device");
            return Err(UpdateError::Incomplete);
        }
        info!(self.log, "PassComponentTable complete"; "accepted" => accepted);
        Ok(())
    }

    /// Transfer-flag discipline across PassComponentTable iterations:
    /// single applicable component → StartAndEnd; otherwise Start, then
    /// Middle, then End on the last one.
    fn next_pass_component_flag(&mut self) -> TransferFlag {
        let total = self.applicable_count();
        let flag = if total <= 1 {
            TransferFlag::StartAndEnd
        } else if self.pass_component_count == 0 {
            TransferFlag::Start
        } else if self.pass_component_count + 1 < total {
            TransferFlag::Middle
        } else {
            TransferFlag::End
        };
        self.pass_component_count += 1;
        flag
    }

    // -- Phase E ------------------------------------------------------------

    async fn update_one_component(
        &mut self,
        component: usize,
    ) -> Result<(), UpdateError> {
        let decoded = self.update_component(component).await?;
        if decoded.compatibility_response != fwup::COMPONENT_CAN_BE_UPDATED {
            warn!(
                self.log, "device declined component update";
                "component" => component,
                "response_code" => decoded.compatibility_response_code,
            );
            return Err(ProtocolError::CompletionCode(
                decoded.compatibility_response_code,
            )
            .into());
        }
        info!(self.log, "UpdateComponent accepted"; "component" => component);
        self.set_state(FdState::Download);

        let transfer_complete = match self.serve_firmware_data(component).await
        {
            Ok(inbound) => inbound,
            Err(err) => {
                self.cancel_update_component().await;
                return Err(err);
            }
        };

        if let Err(err) = self.process_transfer_complete(&transfer_complete).await
        {
            self.cancel_update_component().await;
            return Err(err);
        }
        info!(self.log, "TransferComplete"; "component" => component);
        self.set_state(FdState::Verify);

        let inbound = match self
            .link
            .wait_device_request(
                self.tid,
                &[fwup::CMD_VERIFY_COMPLETE],
                FD_COMMAND_TIMEOUT,
            )
            .await
        {
            Ok(inbound) => inbound,
            Err(err) => {
                warn!(self.log, "timed out waiting for VerifyComplete");
                return Err(UpdateError::Communication(err));
            }
        };
        if let Err(err) = self.process_verify_complete(&inbound).await {
            self.cancel_update_component().await;
            return Err(err);
        }
        info!(self.log, "VerifyComplete"; "component" => component);
        self.set_state(FdState::Apply);

        let inbound = match self
            .link
            .wait_device_request(
                self.tid,
                &[fwup::CMD_APPLY_COMPLETE],
                FD_COMMAND_TIMEOUT,
            )
            .await
        {
            Ok(inbound) => inbound,
            Err(err) => {
                warn!(self.log, "timed out waiting for ApplyComplete");
                return Err(UpdateError::Communication(err));
            }
        };
        self.process_apply_complete(&inbound).await?;
        info!(self.log, "ApplyComplete"; "component" => component);
        self.set_state(FdState::ReadyXfer);
        Ok(())
    }

    async fn update_component(
        &mut self,
        component: usize,
    ) -> Result<fwup::UpdateComponentResponse, UpdateError> {
        if !self.update_mode || self.state != FdState::ReadyXfer {
            return Err(ProtocolError::CommandNotExpected.into());
        }
        let entry = self.package.components()[component].clone();
        let request = UpdateComponentRequest {
            classification: entry.classification,
            identifier: entry.identifier,
            classification_index: 0,
            comparison_stamp: entry.comparison_stamp,
            image_size: entry.size,
            update_option_flags: 0,
            version_string_type: entry.version_type,
            version_string: entry.version.clone(),
        };
        let payload = fwup::encode_update_component_req(
            self.link.next_instance_id(self.tid),
            &request,
        )
        .map_err(CommunicationError::Encode)?;
        let resp = self
            .link
            .send_request(self.tid, payload, COMMAND_TIMEOUT, COMMAND_RETRIES)
            .await
            .map_err(UpdateError::Communication)?;
        let decoded = fwup::decode_update_component_resp(&resp)
            .map_err(CommunicationError::Decode)?;
        if decoded.completion_code != completion::SUCCESS {
            return Err(
                ProtocolError::CompletionCode(decoded.completion_code).into()
            );
        }
        Ok(decoded)
    }

    /// Serve device-issued RequestFirmwareData until the device declares
    /// TransferComplete (returned to the caller), the idle timeout lapses,
    /// or the request ceiling is hit.
    async fn serve_firmware_data(
        &mut self,
        component: usize,
    ) -> Result<InboundRequest, UpdateError> {
        let entry = self.package.components()[component].clone();
        let size = entry.size as usize;
        let mut reported_progress = 0u8;

        for _ in 0..request_ceiling(size) {
            let inbound = self
                .link
                .wait_device_request(
                    self.tid,
                    &[
                        fwup::CMD_REQUEST_FIRMWARE_DATA,
                        fwup::CMD_TRANSFER_COMPLETE,
                    ],
                    REQUEST_FIRMWARE_DATA_IDLE_TIMEOUT,
                )
                .await
                .map_err(UpdateError::Communication)?;

            // The device ends the download phase with TransferComplete.
            if inbound.command == fwup::CMD_TRANSFER_COMPLETE {
                info!(self.log, "TransferComplete received during download");
                return Ok(inbound);
            }

            let request = match fwup::decode_firmware_data_req(&inbound.body) {
                Ok(request) => request,
                Err(err) => {
                    warn!(
                        self.log, "bad RequestFirmwareData";
                        "err" => %err,
                    );
                    self.reply_cc(
                        &inbound,
                        fwup::CMD_REQUEST_FIRMWARE_DATA,
                        completion::ERROR_INVALID_DATA,
                    )
                    .await;
                    continue;
                }
            };

            let offset = request.offset as usize;
            let mut length = request.length as usize;
            if offset + length > size {
                if offset >= size {
                    self.reply_cc(
                        &inbound,
                        fwup::CMD_REQUEST_FIRMWARE_DATA,
                        completion::DATA_OUT_OF_RANGE,
                    )
                    .await;
                    continue;
                }
                length = size - offset;
            }

            let data = match self
                .package
                .read(u64::from(entry.offset) + request.offset as u64, length)
            {
                Ok(data) => data,
                Err(err) => {
                    warn!(self.log, "package read failed"; "err" => %err);
                    self.reply_cc(
                        &inbound,
                        fwup::CMD_REQUEST_FIRMWARE_DATA,
                        completion::ERROR,
                    )
                    .await;
                    continue;
                }
            };

            let payload = fwup::encode_firmware_data_resp(
                inbound.instance_id,
                completion::SUCCESS,
                &data,
            );
            self.link
                .send_response(self.tid, inbound.msg_tag, payload, COMMAND_RETRIES)
                .await
                .map_err(UpdateError::Communication)?;

            let progress = (((offset + length) * 100) / size) as u8;
            if progress.saturating_sub(reported_progress) >= 25 {
                reported_progress = progress;
                info!(
                    self.log, "firmware transfer progress";
                    "component" => component,
                    "percent" => progress,
                );
                self.publisher.update_progress(progress);
            }
        }
        warn!(self.log, "RequestFirmwareData ceiling exceeded");
        Err(CommunicationError::ExhaustedNumAttempts(request_ceiling(size))
            .into())
    }

    async fn process_transfer_complete(
        &mut self,
        inbound: &InboundRequest,
    ) -> Result<(), UpdateError> {
        if !self.update_mode || self.state != FdState::Download {
            self.reply_cc(
                inbound,
                fwup::CMD_TRANSFER_COMPLETE,
                completion::COMMAND_NOT_EXPECTED,
            )
            .await;
            return Err(ProtocolError::CommandNotExpected.into());
        }
        let result = match fwup::decode_transfer_complete_req(&inbound.body) {
            Ok(result) => result,
            Err(err) => {
                self.reply_cc(
                    inbound,
                    fwup::CMD_TRANSFER_COMPLETE,
                    completion::ERROR_INVALID_DATA,
                )
                .await;
                return Err(UpdateError::Communication(err.into()));
            }
        };
        if result != fwup::TRANSFER_RESULT_SUCCESS {
            warn!(self.log, "transfer failed"; "result" => result);
            self.reply_cc(
                inbound,
                fwup::CMD_TRANSFER_COMPLETE,
                completion::ERROR_INVALID_DATA,
            )
            .await;
            return Err(ProtocolError::TransferResult(result).into());
        }
        self.reply_cc(inbound, fwup::CMD_TRANSFER_COMPLETE, completion::SUCCESS)
            .await;
        Ok(())
    }

    async fn process_verify_complete(
        &mut self,
        inbound: &InboundRequest,
    ) -> Result<(), UpdateError> {
        if !self.update_mode || self.state != FdState::Verify {
            self.reply_cc(
                inbound,
                fwup::CMD_VERIFY_COMPLETE,
                completion::COMMAND_NOT_EXPECTED,
            )
            .await;
            return Err(ProtocolError::CommandNotExpected.into());
        }
        let result = match fwup::decode_verify_complete_req(&inbound.body) {
            Ok(result) => result,
            Err(err) => {
                self.reply_cc(
                    inbound,
                    fwup::CMD_VERIFY_COMPLETE,
                    completion::ERROR_INVALID_DATA,
                )
                .await;
                return Err(UpdateError::Communication(err.into()));
            }
        };
        if result != fwup::VERIFY_RESULT_SUCCESS {
            warn!(self.log, "verify failed"; "result" => result);
            self.reply_cc(
                inbound,
                fwup::CMD_VERIFY_COMPLETE,
                completion::ERROR_INVALID_DATA,
            )
            .await;
            return Err(ProtocolError::VerifyResult(result).into());
        }
        self.reply_cc(inbound, fwup::CMD_VERIFY_COMPLETE, completion::SUCCESS)
            .await;
        Ok(())
    }

    async fn process_apply_complete(
        &mut self,
        inbound: &InboundRequest,
    ) -> Result<(), UpdateError> {
        if !self.update_mode || self.state != FdState::Apply {
            self.reply_cc(
                inbound,
                fwup::CMD_APPLY_COMPLETE,
                completion::COMMAND_NOT_EXPECTED,
            )
            .await;
            return Err(ProtocolError::CommandNotExpected.into());
        }
        let request = match fwup::decode_apply_complete_req(&inbound.body) {
            Ok(request) => request,
            Err(err) => {
                self.reply_cc(
                    inbound,
                    fwup::CMD_APPLY_COMPLETE,
                    completion::ERROR_INVALID_DATA,
                )
                .await;
                return Err(UpdateError::Communication(err.into()));
            }
        };
        let ok = matches!(
            request.apply_result,
            fwup::APPLY_RESULT_SUCCESS
                | fwup::APPLY_RESULT_SUCCESS_WITH_ACTIVATION_METHOD
        );
        if !ok {
            warn!(self.log, "apply failed"; "result" => request.apply_result);
            self.reply_cc(
                inbound,
                fwup::CMD_APPLY_COMPLETE,
                completion::ERROR_INVALID_DATA,
            )
            .await;
            return Err(ProtocolError::ApplyResult(request.apply_result).into());
        }
        self.reply_cc(inbound, fwup::CMD_APPLY_COMPLETE, completion::SUCCESS)
            .await;
        Ok(())
    }

    fn report_component_progress(&self, component: usize) {
        let total = self.component_count().max(1);
        let percent = (((component + 1) * 100) / total) as u8;
        self.publisher.update_progress(percent);
    }

    // -- Phase G ------------------------------------------------------------

    async fn activate_firmware(&mut self) -> Result<u16, UpdateError> {
        if !self.update_mode || self.state != FdState::ReadyXfer {
            return Err(ProtocolError::CommandNotExpected.into());
        }
        let payload = fwup::encode_activate_firmware_req(
            self.link.next_instance_id(self.tid),
            true,
        );
        let resp = self
            .link
            .send_request(self.tid, payload, COMMAND_TIMEOUT, COMMAND_RETRIES)
            .await
            .map_err(UpdateError::Communication)?;
        let (cc, estimated) = fwup::decode_activate_firmware_resp(&resp)
            .map_err(CommunicationError::Decode)?;
        if cc != completion::SUCCESS {
            return Err(ProtocolError::CompletionCode(cc).into());
        }
        self.set_state(FdState::Activate);
        Ok(estimated)
    }

    // -- Cancels ------------------------------------------------------------

    /// CancelUpdateComponent, legal from Download/Verify/Apply; returns the
    /// session to ReadyXfer.
    async fn cancel_update_component(&mut self) {
        if !self.update_mode
            || !matches!(
                self.state,
                FdState::Download | FdState::Verify | FdState::Apply
            )
        {
            return;
        }
        let payload = fwup::encode_cancel_update_component_req(
            self.link.next_instance_id(self.tid),
        );
        let result = self
            .link
            .send_request(self.tid, payload, COMMAND_TIMEOUT, COMMAND_RETRIES)
            .await
            .map_err(UpdateError::Communication)
            .and_then(|resp| {
                let cc = fwup::decode_cancel_update_component_resp(&resp)
                    .map_err(CommunicationError::Decode)?;
                if cc != completion::SUCCESS {
                    return Err(ProtocolError::CompletionCode(cc).into());
                }
                Ok(())
            });
        match result {
            Ok(()) => self.set_state(FdState::ReadyXfer),
            Err(err) => {
                warn!(self.log, "CancelUpdateComponent failed"; "err" => %err);
            }
        }
    }

    /// CancelUpdate, legal from any state except Idle and Activate;
    /// returns the session to Idle.
    async fn cancel_update(&mut self) -> Result<(), UpdateError> {
        if !self.update_mode
            || matches!(self.state, FdState::Idle | FdState::Activate)
        {
            return Ok(());
        }
        let payload = fwup::encode_cancel_update_req(
            self.link.next_instance_id(self.tid),
        );
        let resp = self
            .link
            .send_request(self.tid, payload, COMMAND_TIMEOUT, COMMAND_RETRIES)
            .await
            .map_err(UpdateError::Communication)?;
        let decoded = fwup::decode_cancel_update_resp(&resp)
            .map_err(CommunicationError::Decode)?;
        if decoded.completion_code != completion::SUCCESS {
            return Err(
                ProtocolError::CompletionCode(decoded.completion_code).into()
            );
        }
        self.set_state(FdState::Idle);
        self.update_mode = false;
        Ok(())
    }

    async fn reply_cc(&self, inbound: &InboundRequest, command: u8, cc: u8) {
        let payload = encode_cc_only_response(
            inbound.instance_id,
            PldmType::FirmwareUpdate,
            command,
            cc,
        );
        if let Err(err) = self
            .link
            .send_response(self.tid, inbound.msg_tag, payload, COMMAND_RETRIES)
            .await
        {
            warn!(self.log, "failed to send completion-code reply"; "err" => %err);
        }
    }
}

/// Ceiling on responder-side requests for a transfer of `data_size` bytes:
/// twice the unique-segment count plus slack for requeries. Duplicate
/// segment handles are tolerated up to this bound.
fn request_ceiling(data_size: usize) -> usize {
    2 * data_size.div_ceil(BASELINE_TRANSFER_SIZE).max(1) + 8
}
