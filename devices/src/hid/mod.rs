// Copyright 2024 Cloud Hypervisor Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Virtual HID Minidriver
//!
//! This module emulates a HID peripheral entirely in software. It answers
//! the control protocol a HID class driver speaks (descriptor retrieval,
//! feature get/set, input/output report transfer, string retrieval) with
//! byte-exact responses and no hardware behind it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Transport (class driver)                    │
//! │        IOCTL code + input buffer + output capacity          │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  VirtualHidDevice                           │
//! │  - Request classification                                   │
//! │  - Collection / buffer validation                           │
//! └─────────────────────────────────────────────────────────────┘
//!          │                 │                    │
//!          ▼                 ▼                    ▼
//! ┌─────────────┐   ┌─────────────────┐   ┌─────────────────┐
//! │ Descriptors │   │ DeviceState     │   │ PendingReadQueue│
//! │ (immutable) │   │ (Mutex)         │   │ (Mutex)         │
//! └─────────────┘   └─────────────────┘   └─────────────────┘
//!                            ▲                    ▲
//!                            └─────────┬──────────┘
//!                                      │ Weak
//!                            ┌─────────────────┐
//!                            │ ReadinessTimer  │
//!                            │ (timerfd+epoll) │
//!                            └─────────────────┘
//! ```
//!
//! Read-report requests never complete inline: they are parked in the
//! pending read queue and the readiness timer completes one of them per
//! firing, simulating a hardware "data ready" event.
//!
//! # Usage
//!
//! ```ignore
//! use devices::hid::{NoOverride, Request, ReadinessTimer, TimerConfig, VirtualHidDevice};
//!
//! let device = VirtualHidDevice::new(&NoOverride, None);
//! let mut timer = ReadinessTimer::start(&device, TimerConfig::default())?;
//!
//! let read = device.read_report(64)?;
//! let report = read.wait()?;
//! ```

mod descriptor;
mod dispatcher;
mod ioctl;
mod pending;
mod report;
mod state;
mod strings;
mod timer;

use serde::{Deserialize, Serialize};

pub use descriptor::{
    DEFAULT_REPORT_DESCRIPTOR, DEVICE_ATTRIBUTES_SIZE, DescriptorSet, DescriptorSource,
    DeviceAttributes, HID_DESCRIPTOR_SIZE, HIDMINI_PID, HIDMINI_VERSION, HIDMINI_VID, HidDescriptor,
    NoOverride,
};
pub use dispatcher::{Dispatch, ReportPacket, Request, Response, VirtualHidDevice};
pub use ioctl::{
    IOCTL_GET_PHYSICAL_DESCRIPTOR, IOCTL_HID_ACTIVATE_DEVICE, IOCTL_HID_DEACTIVATE_DEVICE,
    IOCTL_HID_GET_DEVICE_ATTRIBUTES, IOCTL_HID_GET_DEVICE_DESCRIPTOR, IOCTL_HID_GET_FEATURE,
    IOCTL_HID_GET_INDEXED_STRING, IOCTL_HID_GET_INPUT_REPORT, IOCTL_HID_GET_REPORT_DESCRIPTOR,
    IOCTL_HID_GET_STRING, IOCTL_HID_READ_REPORT, IOCTL_HID_SEND_IDLE_NOTIFICATION_REQUEST,
    IOCTL_HID_SET_FEATURE, IOCTL_HID_SET_OUTPUT_REPORT, IOCTL_HID_WRITE_REPORT, Operation,
};
pub use pending::{Completion, PendingRead, PendingReadQueue, ReadCompletion, ReadId};
pub use report::{
    CONTROL_COLLECTION_REPORT_ID, CONTROL_FEATURE_REPORT_ID, ControlInfo, DeviceAttributesReport,
    HIDMINI_CONTROL_CODE_DUMMY1, HIDMINI_CONTROL_CODE_DUMMY2, HIDMINI_CONTROL_CODE_SET_ATTRIBUTES,
    InputReport, OutputReport, Report,
};
pub use state::DeviceState;
pub use strings::{
    HID_STRING_ID_IMANUFACTURER, HID_STRING_ID_IPRODUCT, HID_STRING_ID_ISERIALNUMBER, StringRequest,
    VHIDMINI_DEVICE_STRING, VHIDMINI_DEVICE_STRING_INDEX, VHIDMINI_MANUFACTURER_STRING,
    VHIDMINI_PRODUCT_STRING, VHIDMINI_SERIAL_NUMBER_STRING,
};
pub use timer::{ReadinessTimer, TimerConfig};

/// Result type for HID minidriver operations.
pub type Result<T> = std::result::Result<T, HidError>;

/// HID minidriver error types.
///
/// Every validation failure is detected before any device state is touched,
/// so an error always means "zero bytes written, nothing changed".
#[derive(Debug, thiserror::Error)]
pub enum HidError {
    /// A collection-scoped request named a collection this device lacks.
    #[error("Invalid collection id: {0}")]
    InvalidCollection(u8),

    /// The caller's buffer cannot hold (or does not contain) a whole report.
    #[error("Buffer too small: required {required} bytes, got {actual}")]
    BufferTooSmall { required: usize, actual: usize },

    /// A scalar argument (string id, string index) is outside the supported set.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The request is recognized but this device does not implement it.
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// The pending read queue reached its configured depth.
    #[error("Pending read queue full ({0} entries)")]
    QueueFull(usize),

    /// A pending read was removed before the readiness timer drained it.
    #[error("Request cancelled")]
    Cancelled,

    /// A thread panicked while holding one of the device locks.
    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),

    /// An I/O error from the timer machinery.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HidError {
    /// Status kind reported to the transport for this error.
    pub fn status(&self) -> Status {
        match self {
            HidError::InvalidCollection(_) => Status::InvalidCollection,
            HidError::BufferTooSmall { .. } => Status::BufferTooSmall,
            HidError::InvalidParameter(_) => Status::InvalidParameter,
            HidError::NotImplemented(_) => Status::NotImplemented,
            HidError::QueueFull(_) => Status::QueueFull,
            HidError::Cancelled => Status::Cancelled,
            HidError::LockPoisoned(_) | HidError::Io(_) => Status::DeviceError,
        }
    }

    pub(crate) fn buffer_too_small(required: usize, actual: usize) -> Self {
        HidError::BufferTooSmall { required, actual }
    }
}

/// Completion status of a control operation as seen by the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Success,
    InvalidCollection,
    BufferTooSmall,
    InvalidParameter,
    NotImplemented,
    QueueFull,
    Cancelled,
    DeviceError,
}

impl Status {
    /// Conventional NTSTATUS value for this status.
    pub fn ntstatus(self) -> u32 {
        match self {
            Status::Success => 0x0000_0000,
            Status::NotImplemented => 0xC000_0002,
            Status::InvalidParameter => 0xC000_000D,
            Status::InvalidCollection => 0xC000_0010,
            Status::BufferTooSmall => 0xC000_0023,
            Status::QueueFull => 0xC000_009A,
            Status::Cancelled => 0xC000_0120,
            Status::DeviceError => 0xC000_0001,
        }
    }

    pub fn is_success(self) -> bool {
        self == Status::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(HidError::InvalidCollection(2).status(), Status::InvalidCollection);
        assert_eq!(
            HidError::buffer_too_small(8, 7).status(),
            Status::BufferTooSmall
        );
        assert_eq!(HidError::QueueFull(4).status(), Status::QueueFull);
        assert_eq!(HidError::Cancelled.status(), Status::Cancelled);
    }

    #[test]
    fn test_ntstatus_values_are_distinct() {
        let all = [
            Status::Success,
            Status::InvalidCollection,
            Status::BufferTooSmall,
            Status::InvalidParameter,
            Status::NotImplemented,
            Status::QueueFull,
            Status::Cancelled,
            Status::DeviceError,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a.ntstatus(), b.ntstatus());
            }
        }
        assert!(Status::Success.is_success());
        assert!(!Status::NotImplemented.is_success());
    }

    #[test]
    fn test_error_display() {
        let err = HidError::buffer_too_small(7, 6);
        assert_eq!(err.to_string(), "Buffer too small: required 7 bytes, got 6");
    }
}
