// Copyright 2024 Cloud Hypervisor Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Request dispatcher
//!
//! [`VirtualHidDevice`] classifies each control request, validates it,
//! runs the matching codec and state change, and answers with either a
//! finished [`Response`] or, for read-report requests, a deferred
//! [`ReadCompletion`].
//!
//! Every validation step runs before the device state is locked for
//! writing, so a failed request never leaves a partial update behind.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use log::{debug, info, warn};
use vm_memory::ByteValued;

use super::descriptor::{DescriptorSet, DescriptorSource};
use super::ioctl::Operation;
use super::pending::{Completion, PendingReadQueue, ReadCompletion, ReadId};
use super::report::{
    CONTROL_COLLECTION_REPORT_ID, ControlInfo, DeviceAttributesReport, InputReport, OutputReport,
    Report,
};
use super::state::DeviceState;
use super::strings::{StringRequest, wide_bytes};
use super::{HidError, Result};

/// Transfer packet unwrapped from a control request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReportPacket<'a> {
    /// Report id, which names the target collection
    pub collection_id: u8,
    pub buffer: &'a [u8],
}

impl<'a> ReportPacket<'a> {
    pub fn new(collection_id: u8, buffer: &'a [u8]) -> Self {
        Self {
            collection_id,
            buffer,
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// A classified control request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Request<'a> {
    GetDeviceDescriptor,
    GetDeviceAttributes,
    GetReportDescriptor,
    ReadReport,
    WriteReport(ReportPacket<'a>),
    GetFeature { collection_id: u8 },
    SetFeature(ReportPacket<'a>),
    GetInputReport { collection_id: u8 },
    SetOutputReport(ReportPacket<'a>),
    GetString(u32),
    GetIndexedString(u32),
    /// Accepted but not implemented by this device
    Unsupported(Operation),
}

impl Request<'_> {
    pub fn operation(&self) -> Operation {
        match self {
            Request::GetDeviceDescriptor => Operation::GetDeviceDescriptor,
            Request::GetDeviceAttributes => Operation::GetDeviceAttributes,
            Request::GetReportDescriptor => Operation::GetReportDescriptor,
            Request::ReadReport => Operation::ReadReport,
            Request::WriteReport(_) => Operation::WriteReport,
            Request::GetFeature { .. } => Operation::GetFeature,
            Request::SetFeature(_) => Operation::SetFeature,
            Request::GetInputReport { .. } => Operation::GetInputReport,
            Request::SetOutputReport(_) => Operation::SetOutputReport,
            Request::GetString(_) => Operation::GetString,
            Request::GetIndexedString(_) => Operation::GetIndexedString,
            Request::Unsupported(op) => *op,
        }
    }
}

/// A request completed synchronously
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Response {
    /// Bytes returned to the caller's output buffer
    pub data: Vec<u8>,
    /// Bytes transferred, in either direction
    pub bytes_written: usize,
}

impl Response {
    fn read(data: Vec<u8>) -> Self {
        let bytes_written = data.len();
        Self {
            data,
            bytes_written,
        }
    }

    fn written(bytes_written: usize) -> Self {
        Self {
            data: Vec::new(),
            bytes_written,
        }
    }
}

/// Outcome of dispatching one request
#[derive(Debug)]
pub enum Dispatch {
    Complete(Response),
    /// Parked in the pending read queue, completed later by the timer
    Deferred(ReadCompletion),
}

impl Dispatch {
    pub fn is_deferred(&self) -> bool {
        matches!(self, Dispatch::Deferred(_))
    }

    /// Bytes written so far: zero for a deferred request
    pub fn bytes_written(&self) -> usize {
        match self {
            Dispatch::Complete(response) => response.bytes_written,
            Dispatch::Deferred(_) => 0,
        }
    }
}

/// Copy a constant blob out, refusing to truncate
fn copy_out(src: &[u8], capacity: usize) -> Result<Vec<u8>> {
    if capacity < src.len() {
        return Err(HidError::buffer_too_small(src.len(), capacity));
    }
    Ok(src.to_vec())
}

fn check_collection(collection_id: u8) -> Result<()> {
    if collection_id != CONTROL_COLLECTION_REPORT_ID {
        return Err(HidError::InvalidCollection(collection_id));
    }
    Ok(())
}

/// The emulated HID device.
///
/// Owns the device state and the pending read queue. A
/// [`ReadinessTimer`](super::ReadinessTimer) only holds weak references to
/// them, so dropping the device ends the timer's work.
pub struct VirtualHidDevice {
    descriptors: DescriptorSet,
    state: Arc<Mutex<DeviceState>>,
    pending: Arc<Mutex<PendingReadQueue>>,
}

impl VirtualHidDevice {
    /// Create a device, consulting `source` once for an override report
    /// descriptor. `max_pending_reads` bounds the pending read queue.
    pub fn new<S: DescriptorSource + ?Sized>(source: &S, max_pending_reads: Option<usize>) -> Self {
        Self::with_descriptors(DescriptorSet::from_source(source), max_pending_reads)
    }

    pub fn with_descriptors(descriptors: DescriptorSet, max_pending_reads: Option<usize>) -> Self {
        info!(
            "Creating virtual HID device ({} report descriptor, {} bytes)",
            if descriptors.is_override() {
                "override"
            } else {
                "default"
            },
            descriptors.report_descriptor().len()
        );

        Self {
            descriptors,
            state: Arc::new(Mutex::new(DeviceState::new())),
            pending: Arc::new(Mutex::new(PendingReadQueue::new(max_pending_reads))),
        }
    }

    pub fn descriptors(&self) -> &DescriptorSet {
        &self.descriptors
    }

    /// Snapshot of the device state
    pub fn state(&self) -> Result<DeviceState> {
        Ok(self.lock_state()?.clone())
    }

    /// Number of reads waiting for the readiness timer
    pub fn pending_reads(&self) -> Result<usize> {
        Ok(self.lock_pending()?.len())
    }

    pub(crate) fn timer_refs(&self) -> (Weak<Mutex<DeviceState>>, Weak<Mutex<PendingReadQueue>>) {
        (Arc::downgrade(&self.state), Arc::downgrade(&self.pending))
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, DeviceState>> {
        self.state
            .lock()
            .map_err(|_| HidError::LockPoisoned("device state"))
    }

    fn lock_pending(&self) -> Result<MutexGuard<'_, PendingReadQueue>> {
        self.pending
            .lock()
            .map_err(|_| HidError::LockPoisoned("pending read queue"))
    }

    /// Dispatch a raw IOCTL: unwrap, then [`handle`](Self::handle).
    pub fn handle_ioctl(
        &self,
        code: u32,
        input: &[u8],
        output_capacity: usize,
    ) -> Result<Dispatch> {
        let request = Request::from_ioctl(Operation::from_code(code), input)?;
        self.handle(request, output_capacity)
    }

    /// Dispatch one control request.
    ///
    /// `output_capacity` is the size of the caller's output buffer.
    pub fn handle(&self, request: Request<'_>, output_capacity: usize) -> Result<Dispatch> {
        let operation = request.operation();
        debug!("{operation:?} (output capacity {output_capacity})");

        let result = match request {
            Request::GetDeviceDescriptor => self
                .get_device_descriptor(output_capacity)
                .map(Response::read),
            Request::GetDeviceAttributes => self
                .get_device_attributes(output_capacity)
                .map(Response::read),
            Request::GetReportDescriptor => self
                .get_report_descriptor(output_capacity)
                .map(Response::read),
            Request::ReadReport => {
                return self.read_report(output_capacity).map(Dispatch::Deferred);
            }
            Request::WriteReport(packet) => self.write_report(packet).map(Response::written),
            Request::GetFeature { collection_id } => self
                .get_feature(collection_id, output_capacity)
                .map(Response::read),
            Request::SetFeature(packet) => self.set_feature(packet).map(Response::written),
            Request::GetInputReport { collection_id } => self
                .get_input_report(collection_id, output_capacity)
                .map(Response::read),
            Request::SetOutputReport(packet) => {
                self.set_output_report(packet).map(Response::written)
            }
            Request::GetString(value) => self
                .get_string(value, output_capacity)
                .map(Response::read),
            Request::GetIndexedString(value) => self
                .get_indexed_string(value, output_capacity)
                .map(Response::read),
            Request::Unsupported(op) => Err(HidError::NotImplemented(format!("{op:?}"))),
        };

        match result {
            Ok(response) => Ok(Dispatch::Complete(response)),
            Err(e) => {
                warn!("{operation:?} failed: {e}");
                Err(e)
            }
        }
    }

    pub fn get_device_descriptor(&self, capacity: usize) -> Result<Vec<u8>> {
        copy_out(self.descriptors.device_descriptor(), capacity)
    }

    pub fn get_device_attributes(&self, capacity: usize) -> Result<Vec<u8>> {
        let attributes = self.lock_state()?.device_attributes();
        copy_out(attributes.as_slice(), capacity)
    }

    pub fn get_report_descriptor(&self, capacity: usize) -> Result<Vec<u8>> {
        copy_out(self.descriptors.report_descriptor(), capacity)
    }

    /// Park a read-report request; it resolves on a later timer firing.
    ///
    /// Fails immediately with [`HidError::QueueFull`] when the queue is at
    /// its bound.
    pub fn read_report(&self, capacity: usize) -> Result<ReadCompletion> {
        let (complete, handle) = ReadCompletion::channel();
        let id = self.read_report_with(capacity, complete)?;
        Ok(handle.with_id(id))
    }

    /// Park a read-report request with a completion callback.
    ///
    /// The callback runs exactly once, from the timer thread or from
    /// [`cancel_read`](Self::cancel_read). When this returns an error the
    /// callback is dropped without running.
    pub fn read_report_with<F>(&self, capacity: usize, complete: F) -> Result<ReadId>
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        let id = self.lock_pending()?.enqueue(capacity, complete)?;
        debug!("Deferred {id} (capacity {capacity})");
        Ok(id)
    }

    /// Abort a pending read. Completes it with [`HidError::Cancelled`].
    ///
    /// Returns false if the read already completed or never existed.
    pub fn cancel_read(&self, id: ReadId) -> bool {
        let removed = match self.lock_pending() {
            Ok(mut queue) => queue.remove(id),
            Err(_) => None,
        };
        match removed {
            Some(read) => {
                debug!("Cancelled {id}");
                read.complete(Err(HidError::Cancelled));
                true
            }
            None => false,
        }
    }

    pub fn write_report(&self, packet: ReportPacket<'_>) -> Result<usize> {
        check_collection(packet.collection_id)?;
        let report = OutputReport::decode(packet.buffer)?;
        self.lock_state()?.set_output_byte(report.data);
        Ok(OutputReport::SIZE)
    }

    pub fn get_feature(&self, collection_id: u8, capacity: usize) -> Result<Vec<u8>> {
        check_collection(collection_id)?;
        DeviceAttributesReport::check_len(capacity)?;
        Ok(self.lock_state()?.attributes_report().encode())
    }

    pub fn set_feature(&self, packet: ReportPacket<'_>) -> Result<usize> {
        check_collection(packet.collection_id)?;
        let control = ControlInfo::decode(packet.buffer)?;
        self.lock_state()?.apply_control(control)?;
        Ok(ControlInfo::SIZE)
    }

    pub fn get_input_report(&self, collection_id: u8, capacity: usize) -> Result<Vec<u8>> {
        check_collection(collection_id)?;
        InputReport::check_len(capacity)?;
        Ok(self.lock_state()?.input_report().encode())
    }

    pub fn set_output_report(&self, packet: ReportPacket<'_>) -> Result<usize> {
        check_collection(packet.collection_id)?;
        let report = OutputReport::decode(packet.buffer)?;
        self.lock_state()?.set_output_byte(report.data);
        Ok(OutputReport::SIZE)
    }

    pub fn get_string(&self, value: u32, capacity: usize) -> Result<Vec<u8>> {
        let string = StringRequest::from(value).lookup_string()?;
        copy_out(&wide_bytes(string), capacity)
    }

    pub fn get_indexed_string(&self, value: u32, capacity: usize) -> Result<Vec<u8>> {
        let string = StringRequest::from(value).lookup_indexed()?;
        copy_out(&wide_bytes(string), capacity)
    }
}

impl Drop for VirtualHidDevice {
    fn drop(&mut self) {
        let reads = match self.pending.lock() {
            Ok(mut queue) => queue.drain(),
            Err(_) => return,
        };
        if !reads.is_empty() {
            info!("Cancelling {} pending reads on teardown", reads.len());
        }
        for read in reads {
            read.complete(Err(HidError::Cancelled));
        }
    }
}
