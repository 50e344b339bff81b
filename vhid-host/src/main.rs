// Copyright 2024 Cloud Hypervisor Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Virtual HID host CLI entry point
//!
//! Serves one emulated HID device: requests are read from stdin and
//! responses written to stdout, one JSON object per line. Logs go to
//! stderr.

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context, anyhow};
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use log::{LevelFilter, error, info};
use simple_logger::SimpleLogger;

use vhid_host::{DeviceParameters, Host, spawn_writer};

fn command() -> Command {
    Command::new("vhid-host")
        .version(clap::crate_version!())
        .author("The Cloud Hypervisor Authors")
        .about("Serve a software-emulated HID device over stdin/stdout")
        .arg(
            Arg::new("params")
                .short('p')
                .long("params")
                .value_name("PATH")
                .value_parser(value_parser!(PathBuf))
                .help("Device parameter file (JSON)"),
        )
        .arg(
            Arg::new("initial-delay-ms")
                .long("initial-delay-ms")
                .value_name("MS")
                .value_parser(value_parser!(u64))
                .help("Delay before the first readiness timer firing"),
        )
        .arg(
            Arg::new("period-ms")
                .long("period-ms")
                .value_name("MS")
                .value_parser(value_parser!(u64))
                .help("Readiness timer period"),
        )
        .arg(
            Arg::new("max-pending-reads")
                .long("max-pending-reads")
                .value_name("N")
                .value_parser(value_parser!(usize))
                .help("Bound on parked read-report requests"),
        )
        .arg(
            Arg::new("grace-ms")
                .long("grace-ms")
                .value_name("MS")
                .value_parser(value_parser!(u64))
                .default_value("10000")
                .help("How long to wait for deferred reads after end of input"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Enable verbose logging"),
        )
}

/// Load the parameter file, then apply command line overrides.
fn device_parameters(matches: &ArgMatches) -> anyhow::Result<DeviceParameters> {
    let mut params = match matches.get_one::<PathBuf>("params") {
        Some(path) => DeviceParameters::load(path)?,
        None => DeviceParameters::default(),
    };
    if let Some(&ms) = matches.get_one::<u64>("initial-delay-ms") {
        params.timer.initial_delay_ms = ms;
    }
    if let Some(&ms) = matches.get_one::<u64>("period-ms") {
        params.timer.period_ms = ms;
    }
    if let Some(&max) = matches.get_one::<usize>("max-pending-reads") {
        params.max_pending_reads = Some(max);
    }
    Ok(params)
}

fn main() -> anyhow::Result<()> {
    let matches = command().get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    SimpleLogger::new()
        .with_level(log_level)
        .init()
        .context("Failed to initialize logger")?;

    let params = device_parameters(&matches)?;
    let grace = Duration::from_millis(
        matches
            .get_one::<u64>("grace-ms")
            .copied()
            .ok_or_else(|| anyhow!("missing --grace-ms"))?,
    );
    info!("Starting vhid-host with parameters: {params:?}");

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("Failed to install Ctrl+C handler")?;

    let (line_tx, line_rx) = flume::unbounded();
    thread::Builder::new()
        .name("vhid_reader".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                if line_tx.send(line).is_err() {
                    break;
                }
            }
        })
        .context("Failed to spawn stdin reader")?;

    let (resp_tx, resp_rx) = flume::unbounded();
    let writer = spawn_writer(io::stdout(), resp_rx).context("Failed to spawn writer")?;

    let host = Host::new(&params, resp_tx).context("Failed to create device")?;
    info!("Device ready, reading requests from stdin");

    let served = host.serve(&line_rx, &running);
    if served.is_ok() && !host.wait_idle(grace, &running) {
        info!("Cancelling reads still pending");
    }

    // Completes anything still parked with Cancelled and closes the
    // response channel.
    drop(host);
    match writer.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Response writer failed: {e}"),
        Err(_) => error!("Response writer panicked"),
    }

    served?;
    info!("vhid-host stopped");
    Ok(())
}
