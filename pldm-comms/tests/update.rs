// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end firmware-update scenarios against a scripted device.

mod common;

use common::device_request;
use common::linked_transport;
use common::Outgoing;
use common::RecordingPublisher;
use common::TestPackage;
use common::EID;
use common::TID;
use pldm_comms::fwup::update::FdState;
use pldm_comms::fwup::update::UpdateSession;
use pldm_comms::publish::Publisher;
use pldm_comms::SharedLink;
use pldm_messages::completion;
use pldm_messages::fwup;
use pldm_messages::fwup::FirmwareDataRequest;
use pldm_messages::Header;
use pldm_messages::PldmType;
use pldm_messages::INSTANCE_ID_MASK;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const PLDM_PREFIX: u8 = pldm_comms::transport::MESSAGE_TYPE_PLDM;

#[derive(Clone, Default)]
struct DeviceScript {
    /// Times to answer RequestUpdate with RETRY_REQUEST_UPDATE first.
    retry_request_update: usize,
    /// Components for which the device never requests firmware data.
    silent_components: Vec<u16>,
    /// Package data the device announces interest in and then fetches,
    /// including one mid-stream GetFirstPart requery.
    fetch_package_data: Option<Vec<u8>>,
    estimated_activation_secs: u16,
}

fn reply(out: Outgoing, body_after_header: &[u8], command: u8) {
    let instance_id = out.payload[1] & INSTANCE_ID_MASK;
    let mut response = vec![PLDM_PREFIX];
    Header::response(instance_id, PldmType::FirmwareUpdate, command)
        .encode(&mut response);
    response.extend_from_slice(body_after_header);
    out.reply.send(response).unwrap();
}

/// Scripted firmware device: answers agent requests and, after accepting
/// UpdateComponent, drives the download/verify/apply exchange itself.
fn spawn_device(
    script: DeviceScript,
    images: Vec<Vec<u8>>,
    link: SharedLink,
    mut requests: mpsc::UnboundedReceiver<Outgoing>,
    mut responses: mpsc::UnboundedReceiver<Vec<u8>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut retry_left = script.retry_request_update;
        let mut device_iid = 0u8;
        while let Some(out) = requests.recv().await {
            assert_eq!(out.eid, EID);
            assert_eq!(out.payload[0], PLDM_PREFIX);
            let (header, body) = Header::decode(&out.payload[1..]).unwrap();
            match header.command {
                fwup::CMD_REQUEST_UPDATE => {
                    if retry_left > 0 {
                        retry_left -= 1;
                        reply(
                            out,
                            &[completion::RETRY_REQUEST_UPDATE],
                            fwup::CMD_REQUEST_UPDATE,
                        );
                    } else {
                        let wants_pkg_data =
                            u8::from(script.fetch_package_data.is_some());
                        reply(
                            out,
                            &[completion::SUCCESS, 0, 0, wants_pkg_data],
                            fwup::CMD_REQUEST_UPDATE,
                        );
                        if let Some(expected) = &script.fetch_package_data {
                            fetch_package_data(
                                &link,
                                &mut responses,
                                &mut device_iid,
                                expected,
                            )
                            .await;
                        }
                    }
                }
                fwup::CMD_PASS_COMPONENT_TABLE => {
                    reply(
                        out,
                        &[completion::SUCCESS, 0, 0],
                        fwup::CMD_PASS_COMPONENT_TABLE,
                    );
                }
                fwup::CMD_UPDATE_COMPONENT => {
                    let identifier = u16::from_le_bytes([body[2], body[3]]);
                    let mut resp = vec![completion::SUCCESS];
                    resp.push(fwup::COMPONENT_CAN_BE_UPDATED);
                    resp.push(0); // response code
                    resp.extend_from_slice(&0u32.to_le_bytes());
                    resp.extend_from_slice(&0u16.to_le_bytes());
                    reply(out, &resp, fwup::CMD_UPDATE_COMPONENT);

                    if script.silent_components.contains(&identifier) {
                        continue;
                    }
                    drive_component_download(
                        &link,
                        &mut responses,
                        &mut device_iid,
                        &images[usize::from(identifier)],
                    )
                    .await;
                }
                fwup::CMD_ACTIVATE_FIRMWARE => {
                    let mut resp = vec![completion::SUCCESS];
                    resp.extend_from_slice(
                        &script.estimated_activation_secs.to_le_bytes(),
                    );
                    reply(out, &resp, fwup::CMD_ACTIVATE_FIRMWARE);
                }
                fwup::CMD_CANCEL_UPDATE_COMPONENT => {
                    reply(
                        out,
                        &[completion::SUCCESS],
                        fwup::CMD_CANCEL_UPDATE_COMPONENT,
                    );
                }
                fwup::CMD_CANCEL_UPDATE => {
                    let mut resp = vec![completion::SUCCESS, 0];
                    resp.extend_from_slice(&0u64.to_le_bytes());
                    reply(out, &resp, fwup::CMD_CANCEL_UPDATE);
                }
                command => panic!("device got unexpected command {command:#x}"),
            }
        }
    })
}

fn next_iid(iid: &mut u8) -> u8 {
    *iid = (*iid + 1) & INSTANCE_ID_MASK;
    *iid
}

/// Fetch the announced package data in baseline segments, issuing one
/// GetFirstPart requery mid-stream to confirm the agent restarts from
/// offset zero and still completes on the distinct-segment count.
async fn fetch_package_data(
    link: &SharedLink,
    responses: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    device_iid: &mut u8,
    expected: &[u8],
) {
    use pldm_messages::fwup::DataTransferRequest;
    use pldm_messages::TransferOp;

    let fetch = |iid: u8, handle: u32, op: TransferOp| {
        fwup::encode_data_transfer_req(
            iid,
            fwup::CMD_GET_PACKAGE_DATA,
            &DataTransferRequest { data_transfer_handle: handle, transfer_op: op },
        )
    };
    let segments = expected.len().div_ceil(32) as u32;
    let mut plan: Vec<(u32, TransferOp)> =
        vec![(0, TransferOp::GetFirstPart), (1, TransferOp::GetNextPart)];
    // Requery from the top, then finish the tail.
    plan.push((0, TransferOp::GetFirstPart));
    for segment in 2..segments {
        plan.push((segment, TransferOp::GetNextPart));
    }

    for (segment, op) in plan {
        let req = fetch(next_iid(device_iid), segment, op);
        let resp = device_request(link, responses, &req)
            .await
            .expect("no GetPackageData response");
        let decoded = fwup::decode_data_transfer_resp(&resp).unwrap();
        assert_eq!(decoded.completion_code, completion::SUCCESS);
        let offset = segment as usize * 32;
        let end = (offset + 32).min(expected.len());
        assert_eq!(decoded.portion, &expected[offset..end]);
        assert_eq!(decoded.next_data_transfer_handle, segment + 1);
        assert_eq!(
            decoded.transfer_flag,
            pldm_messages::transfer_flag(offset, end - offset, expected.len())
        );
    }
}

async fn drive_component_download(
    link: &SharedLink,
    responses: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    device_iid: &mut u8,
    image: &[u8],
) {
    const CHUNK: usize = 32;

    let mut offset = 0usize;
    while offset < image.len() {
        let req = fwup::encode_firmware_data_req(
            next_iid(device_iid),
            &FirmwareDataRequest {
                offset: offset as u32,
                length: CHUNK as u32,
            },
        );
        let resp = device_request(link, responses, &req)
            .await
            .expect("no RequestFirmwareData response");
        let (cc, data) = fwup::decode_firmware_data_resp(&resp).unwrap();
        assert_eq!(cc, completion::SUCCESS);
        assert_eq!(&data, &image[offset..(offset + CHUNK).min(image.len())]);
        offset += CHUNK;
    }

    let req = fwup::encode_transfer_complete_req(
        next_iid(device_iid),
        fwup::TRANSFER_RESULT_SUCCESS,
    );
    let resp = device_request(link, responses, &req).await.unwrap();
    assert_eq!(resp[3], completion::SUCCESS);

    let req = fwup::encode_verify_complete_req(
        next_iid(device_iid),
        fwup::VERIFY_RESULT_SUCCESS,
    );
    let resp = device_request(link, responses, &req).await.unwrap();
    assert_eq!(resp[3], completion::SUCCESS);

    let req = fwup::encode_apply_complete_req(
        next_iid(device_iid),
        &fwup::ApplyCompleteRequest {
            apply_result: fwup::APPLY_RESULT_SUCCESS,
            activation_methods_modification: 0,
        },
    );
    let resp = device_request(link, responses, &req).await.unwrap();
    assert_eq!(resp[3], completion::SUCCESS);
}

fn session(
    link: &SharedLink,
    package: Arc<TestPackage>,
    publisher: Arc<RecordingPublisher>,
) -> UpdateSession {
    UpdateSession::new(
        link.clone(),
        TID,
        0,
        package,
        publisher as Arc<dyn Publisher>,
        &common::test_log(),
    )
}

// One device, one 1024-byte component served in 32-byte chunks, then the
// transfer/verify/apply/activate handshake.
#[tokio::test(start_paused = true)]
async fn happy_path_single_component() {
    let (link, transport, req_rx, resp_rx) = linked_transport();
    let image: Vec<u8> = (0..1024u32).map(|i| i as u8).collect();
    let package = Arc::new(TestPackage::new(&[&image]));
    let publisher = Arc::new(RecordingPublisher::default());

    let device = spawn_device(
        DeviceScript { estimated_activation_secs: 5, ..Default::default() },
        vec![image],
        link.clone(),
        req_rx,
        resp_rx,
    );

    let mut session = session(&link, package, Arc::clone(&publisher));
    let outcome = session.run().await.expect("update should succeed");

    assert_eq!(outcome.estimated_activation_secs, 5);
    assert_eq!(session.state(), FdState::Activate);

    // Progress crossed every 25-percentile and finished at 100.
    let progress = publisher.progress.lock().unwrap().clone();
    assert!(progress.contains(&25));
    assert!(progress.contains(&50));
    assert!(progress.contains(&75));
    assert_eq!(progress.last(), Some(&100));

    // Reservation acquired and released exactly once.
    let counters = transport.counters.lock().unwrap();
    assert_eq!(counters.reserves, 1);
    assert_eq!(counters.releases, 1);
    drop(counters);

    drop(session);
    drop(link);
    device.abort();
}

// RequestUpdate answered with RETRY_REQUEST_UPDATE twice: three attempts,
// two retry delays, then the normal flow.
#[tokio::test(start_paused = true)]
async fn request_update_retries_then_succeeds() {
    let (link, _transport, req_rx, resp_rx) = linked_transport();
    let image: Vec<u8> = vec![0xA5; 64];
    let package = Arc::new(TestPackage::new(&[&image]));
    let publisher = Arc::new(RecordingPublisher::default());

    let device = spawn_device(
        DeviceScript {
            retry_request_update: 2,
            estimated_activation_secs: 1,
            ..Default::default()
        },
        vec![image],
        link.clone(),
        req_rx,
        resp_rx,
    );

    let started = tokio::time::Instant::now();
    let mut session = session(&link, package, publisher);
    session.run().await.expect("update should succeed after retries");
    let elapsed = started.elapsed();

    // Two 5-second retry waits dominate the virtual elapsed time.
    assert!(elapsed >= Duration::from_secs(10), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(60), "elapsed {elapsed:?}");
    assert_eq!(session.state(), FdState::Activate);
    device.abort();
}

// A third retry answer fails the session.
#[tokio::test(start_paused = true)]
async fn request_update_gives_up_after_three_attempts() {
    let (link, _transport, req_rx, resp_rx) = linked_transport();
    let image: Vec<u8> = vec![0xA5; 64];
    let package = Arc::new(TestPackage::new(&[&image]));
    let publisher = Arc::new(RecordingPublisher::default());

    let device = spawn_device(
        DeviceScript { retry_request_update: 3, ..Default::default() },
        vec![image],
        link.clone(),
        req_rx,
        resp_rx,
    );

    let mut session = session(&link, package, publisher);
    let err = session.run().await.unwrap_err();
    assert!(
        matches!(
            err,
            pldm_comms::error::UpdateError::Protocol(
                pldm_comms::error::ProtocolError::RetryRequestUpdate
            )
        ),
        "unexpected error {err}"
    );
    assert_eq!(session.state(), FdState::Idle);
    device.abort();
}

// The device announces interest in package data and fetches it, including
// a mid-stream GetFirstPart requery; the flow then completes normally.
#[tokio::test(start_paused = true)]
async fn package_data_served_with_requery() {
    let (link, _transport, req_rx, resp_rx) = linked_transport();
    let image: Vec<u8> = vec![0x5A; 64];
    let package_data: Vec<u8> = (0..80u32).map(|i| i as u8).collect();
    let package =
        Arc::new(TestPackage::new(&[&image]).with_package_data(&package_data));
    let publisher = Arc::new(RecordingPublisher::default());

    let device = spawn_device(
        DeviceScript {
            fetch_package_data: Some(package_data),
            estimated_activation_secs: 1,
            ..Default::default()
        },
        vec![image],
        link.clone(),
        req_rx,
        resp_rx,
    );

    let mut session = session(&link, package, publisher);
    session.run().await.expect("update should succeed");
    assert_eq!(session.state(), FdState::Activate);
    device.abort();
}

// While a session holds the reservation, the renewal timer fires at
// hold minus 5s and re-acquires; release still happens exactly once.
#[tokio::test(start_paused = true)]
async fn reservation_renews_before_expiry() {
    let (link, transport, req_rx, resp_rx) = linked_transport();
    // 50000 bytes gives a 57s hold, so one renewal lands inside the 90s
    // idle window of the silent download that follows.
    let image: Vec<u8> = vec![0x3C; 50_000];
    let package = Arc::new(TestPackage::new(&[&image]));
    let publisher = Arc::new(RecordingPublisher::default());

    let device = spawn_device(
        DeviceScript { silent_components: vec![0], ..Default::default() },
        vec![image],
        link.clone(),
        req_rx,
        resp_rx,
    );

    let mut session = session(&link, package, publisher);
    let err = session.run().await.unwrap_err();
    assert!(matches!(err, pldm_comms::error::UpdateError::Incomplete));

    let counters = transport.counters.lock().unwrap();
    assert_eq!(counters.reserves, 2, "initial acquire plus one renewal");
    assert_eq!(counters.releases, 1);
    assert_eq!(counters.last_hold, Some(Duration::from_secs(57)));
    drop(counters);
    device.abort();
}

// The device goes quiet for the first component: the 90-second idle wait
// expires, CancelUpdateComponent returns the session to ReadyXfer, and the
// second component still updates.
#[tokio::test(start_paused = true)]
async fn idle_download_is_cancelled_and_next_component_proceeds() {
    let (link, _transport, req_rx, resp_rx) = linked_transport();
    let image0: Vec<u8> = vec![0x11; 64];
    let image1: Vec<u8> = vec![0x22; 64];
    let package = Arc::new(TestPackage::new(&[&image0, &image1]));
    let publisher = Arc::new(RecordingPublisher::default());

    let device = spawn_device(
        DeviceScript {
            silent_components: vec![0],
            estimated_activation_secs: 2,
            ..Default::default()
        },
        vec![image0, image1],
        link.clone(),
        req_rx,
        resp_rx,
    );

    let mut session = session(&link, package, publisher);
    let outcome = session.run().await.expect(
        "session should still succeed via the second component",
    );
    assert_eq!(outcome.estimated_activation_secs, 2);
    assert_eq!(session.state(), FdState::Activate);
    device.abort();
}
