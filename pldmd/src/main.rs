// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! PLDM manageability agent daemon.
//!
//! Wires the AF_MCTP transport, the shared link, and the session
//! controller onto a single-threaded runtime, initializes the endpoints
//! named on the command line, and optionally drives a firmware update.

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use pldm_comms::package::PackageFile;
use pldm_comms::publish::LogPublisher;
use pldm_comms::publish::Publisher;
use pldm_comms::session::SessionController;
use pldm_comms::transport::RawTransport;
use pldm_comms::transport::TransportEvent;
use pldm_comms::SharedLink;
use slog::info;
use slog::o;
use slog::Drain;
use slog::Level;
use slog::Logger;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;

mod mctp;

/// Manageability agent for PLDM devices reachable over MCTP.
#[derive(Parser, Debug)]
struct Args {
    #[clap(
        short,
        long,
        default_value = "info",
        value_parser = level_from_str,
        help = "Log level",
    )]
    log_level: Level,

    /// MCTP endpoint IDs to initialize at startup.
    #[clap(required = true)]
    eids: Vec<u8>,

    /// Firmware update package to apply to every matching endpoint once
    /// initialization finishes.
    #[clap(long)]
    update_package: Option<PathBuf>,

    /// Write a PDR dump for each device after initialization.
    #[clap(long)]
    dump_pdrs: bool,
}

fn level_from_str(s: &str) -> Result<Level> {
    if let Ok(level) = s.parse() {
        Ok(level)
    } else {
        bail!(format!("Invalid log level: {}", s))
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    // PLDM_DEBUG=1 wins over the command line, matching the documented
    // environment knob.
    let level = match std::env::var("PLDM_DEBUG") {
        Ok(value) if value == "1" => Level::Debug,
        _ => args.log_level,
    };
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator)
        .build()
        .filter_level(level)
        .fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let log = Logger::root(drain, o!("component" => "pldmd"));

    let transport =
        mctp::MctpTransport::new(log.new(o!("component" => "mctp")))
            .context("failed to open AF_MCTP socket")?;
    let link = SharedLink::new(
        Arc::clone(&transport) as Arc<dyn RawTransport>,
        log.new(o!("component" => "link")),
    );
    transport.spawn_receiver(link.clone());

    let publisher: Arc<dyn Publisher> =
        Arc::new(LogPublisher::new(log.new(o!("component" => "publish"))));
    let mut controller = SessionController::new(
        link,
        Arc::clone(&publisher),
        log.new(o!("component" => "session")),
    );

    let (events_tx, mut events_rx) =
        tokio::sync::mpsc::unbounded_channel::<TransportEvent>();
    for &eid in &args.eids {
        events_tx.send(TransportEvent::DeviceAdded(eid)).unwrap();
    }

    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM")?;

    info!(log, "pldmd started"; "endpoints" => args.eids.len());
    loop {
        tokio::select! {
            event = events_rx.recv() => {
                let Some(event) = event else { break };
                controller.handle_event(event).await;

                // Once the queue drains, run the optional one-shot work.
                if events_rx.is_empty() {
                    post_init(&args, &mut controller, &log).await;
                    if args.update_package.is_some() {
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!(log, "SIGINT received, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                info!(log, "SIGTERM received, shutting down");
                break;
            }
        }
    }

    controller.shutdown();
    Ok(())
}

async fn post_init(
    args: &Args,
    controller: &mut SessionController,
    log: &Logger,
) {
    if args.dump_pdrs {
        for tid in controller.device_tids() {
            let Some(device) = controller.device(tid) else { continue };
            let Some(pdr) = device.pdr.as_ref() else { continue };
            let path = pdr.default_dump_path();
            match pdr.dump(&path) {
                Ok(()) => {
                    info!(log, "PDR dump written"; "path" => %path.display());
                }
                Err(err) => {
                    slog::error!(
                        log, "PDR dump failed";
                        "tid" => tid,
                        "err" => %err,
                    );
                }
            }
        }
    }

    if let Some(package_path) = &args.update_package {
        let launched = start_fw_update(controller, package_path, log).await;
        info!(log, "StartFWUpdate"; "rc" => launched);
    }
}

/// `StartFWUpdate(filePath)` semantics: 0 on an accepted launch, -1 when
/// another update is pending or the image fails to parse.
async fn start_fw_update(
    controller: &mut SessionController,
    package_path: &std::path::Path,
    log: &Logger,
) -> i32 {
    if controller.update_in_progress() {
        slog::error!(log, "firmware update already in progress");
        return -1;
    }
    let raw = match std::fs::read(package_path) {
        Ok(raw) => raw,
        Err(err) => {
            slog::error!(
                log, "failed to read update package";
                "path" => %package_path.display(),
                "err" => %err,
            );
            return -1;
        }
    };
    let package = match PackageFile::parse(raw) {
        Ok(package) => Arc::new(package),
        Err(err) => {
            slog::error!(log, "failed to parse update package"; "err" => %err);
            return -1;
        }
    };
    if let Err(err) = controller.run_update(package).await {
        slog::error!(log, "firmware update failed"; "err" => %err);
    }
    0
}
