// Copyright 2024 Cloud Hypervisor Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Host request loop
//!
//! Turns wire requests into IOCTL calls on the device, keeps track of the
//! deferred reads still waiting for the readiness timer, and forwards every
//! response to the writer thread.

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use devices::hid::{
    Completion, Dispatch, HidError, Operation, ReadId, ReadinessTimer, Status, VirtualHidDevice,
};
use flume::{Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};

use crate::config::DeviceParameters;
use crate::protocol::{RequestOp, WireRequest, WireResponse};
use crate::{HostError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Deferred reads by client tag
type Outstanding = Arc<Mutex<HashMap<u64, ReadId>>>;

pub struct Host {
    // Stops before the device is torn down
    timer: ReadinessTimer,
    device: VirtualHidDevice,
    responses: Sender<WireResponse>,
    outstanding: Outstanding,
}

impl Host {
    /// Create the device and start its readiness timer thread.
    pub fn new(params: &DeviceParameters, responses: Sender<WireResponse>) -> Result<Self> {
        let device = VirtualHidDevice::new(params, params.max_pending_reads);
        let timer = ReadinessTimer::start(&device, params.timer)?;
        Ok(Self::assemble(device, timer, responses))
    }

    /// Create the device with a timer that only fires through [`tick`](Self::tick).
    pub fn without_timer_thread(
        params: &DeviceParameters,
        responses: Sender<WireResponse>,
    ) -> Self {
        let device = VirtualHidDevice::new(params, params.max_pending_reads);
        let timer = ReadinessTimer::new(&device);
        Self::assemble(device, timer, responses)
    }

    fn assemble(
        device: VirtualHidDevice,
        timer: ReadinessTimer,
        responses: Sender<WireResponse>,
    ) -> Self {
        Self {
            timer,
            device,
            responses,
            outstanding: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn device(&self) -> &VirtualHidDevice {
        &self.device
    }

    pub fn tick(&self) -> bool {
        self.timer.tick()
    }

    /// Deferred reads not answered yet
    pub fn outstanding_reads(&self) -> Result<usize> {
        let reads = self
            .outstanding
            .lock()
            .map_err(|_| HidError::LockPoisoned("outstanding reads"))?;
        Ok(reads.len())
    }

    fn send(&self, response: WireResponse) {
        if self.responses.send(response).is_err() {
            warn!("Response writer gone, dropping response");
        }
    }

    /// Parse and handle one request line.
    ///
    /// A line that does not parse is answered with `InvalidParameter` when
    /// it at least carries a tag, and dropped otherwise.
    pub fn handle_line(&self, line: &str) {
        match serde_json::from_str::<WireRequest>(line) {
            Ok(request) => self.handle(&request),
            Err(e) => {
                warn!("Malformed request: {e}");
                let tag = serde_json::from_str::<serde_json::Value>(line)
                    .ok()
                    .and_then(|v| v.get("tag")?.as_u64());
                if let Some(tag) = tag {
                    self.send(WireResponse::status(tag, Status::InvalidParameter));
                }
            }
        }
    }

    pub fn handle(&self, request: &WireRequest) {
        let tag = request.tag;
        let Some(op) = request.op else {
            warn!("Request {tag} has no operation");
            self.send(WireResponse::status(tag, Status::InvalidParameter));
            return;
        };

        let operation = match op {
            RequestOp::Cancel => {
                self.cancel(tag, request.target);
                return;
            }
            // An Unknown code may still name a known operation
            RequestOp::Device(operation) => Operation::from_code(operation.code()),
        };

        if operation == Operation::ReadReport {
            self.read(tag, request.output_len);
            return;
        }

        let input = request.input_buffer(operation);
        let response = match self
            .device
            .handle_ioctl(operation.code(), &input, request.output_len)
        {
            Ok(Dispatch::Complete(response)) => WireResponse::complete(tag, response),
            Ok(Dispatch::Deferred(read)) => {
                self.device.cancel_read(read.id());
                WireResponse::status(tag, Status::DeviceError)
            }
            Err(e) => WireResponse::error(tag, &e),
        };
        self.send(response);
    }

    fn read(&self, tag: u64, capacity: usize) {
        // Held across the enqueue so a fast completion cannot run before
        // the tag is recorded.
        let mut outstanding = match self.outstanding.lock() {
            Ok(outstanding) => outstanding,
            Err(_) => {
                self.send(WireResponse::status(tag, Status::DeviceError));
                return;
            }
        };
        if outstanding.contains_key(&tag) {
            warn!("Tag {tag} already has a pending read");
            drop(outstanding);
            self.send(WireResponse::status(tag, Status::InvalidParameter));
            return;
        }

        let responses = self.responses.clone();
        let tracked = self.outstanding.clone();
        let complete = move |completion: Completion| {
            if let Ok(mut reads) = tracked.lock() {
                reads.remove(&tag);
            }
            if responses.send(WireResponse::deferred(tag, completion)).is_err() {
                debug!("Response writer gone, dropping completion of tag {tag}");
            }
        };

        match self.device.read_report_with(capacity, complete) {
            Ok(id) => {
                outstanding.insert(tag, id);
                debug!("Tag {tag} parked as {id}");
            }
            Err(e) => {
                drop(outstanding);
                self.send(WireResponse::error(tag, &e));
            }
        }
    }

    fn cancel(&self, tag: u64, target: Option<u64>) {
        let id = target.and_then(|t| self.outstanding.lock().ok()?.get(&t).copied());
        let status = match id {
            Some(id) if self.device.cancel_read(id) => Status::Success,
            _ => Status::InvalidParameter,
        };
        self.send(WireResponse::status(tag, status));
    }

    /// Handle request lines until end of input or until `running` clears.
    pub fn serve(&self, lines: &Receiver<io::Result<String>>, running: &AtomicBool) -> Result<()> {
        while running.load(Ordering::SeqCst) {
            match lines.recv_timeout(POLL_INTERVAL) {
                Ok(Ok(line)) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        self.handle_line(line);
                    }
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    info!("End of input");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Wait for outstanding deferred reads to be answered.
    ///
    /// Returns false if `grace` ran out or `running` cleared first. A
    /// poisoned tag table also counts as not idle.
    pub fn wait_idle(&self, grace: Duration, running: &AtomicBool) -> bool {
        let deadline = Instant::now() + grace;
        loop {
            let remaining = match self.outstanding_reads() {
                Ok(remaining) => remaining,
                Err(e) => {
                    warn!("Cannot track outstanding reads: {e}");
                    return false;
                }
            };
            if remaining == 0 {
                return true;
            }
            if !running.load(Ordering::SeqCst) || Instant::now() >= deadline {
                info!("Giving up on {remaining} outstanding reads");
                return false;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Spawn the thread writing one JSON line per response to `out`.
///
/// The thread ends once every sender of `responses` is gone.
pub fn spawn_writer<W>(
    mut out: W,
    responses: Receiver<WireResponse>,
) -> io::Result<thread::JoinHandle<Result<()>>>
where
    W: Write + Send + 'static,
{
    thread::Builder::new()
        .name("vhid_writer".to_string())
        .spawn(move || {
            for response in responses.iter() {
                serde_json::to_writer(&mut out, &response).map_err(HostError::Encode)?;
                out.write_all(b"\n")?;
                out.flush()?;
            }
            Ok(())
        })
}
