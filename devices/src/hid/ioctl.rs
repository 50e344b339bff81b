// Copyright 2024 Cloud Hypervisor Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! HID IOCTL codes
//!
//! Numeric control codes the class driver sends, and the unwrapping of a
//! raw `code + input buffer` pair into a [`Request`].
//!
//! Transfer requests carry a marshalled transfer packet in the input
//! buffer: the report id byte followed by the report buffer.

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use super::dispatcher::{ReportPacket, Request};
use super::{HidError, Result};

const FILE_DEVICE_KEYBOARD: u32 = 0x0000_000B;
const METHOD_IN_DIRECT: u32 = 1;
const METHOD_OUT_DIRECT: u32 = 2;
const METHOD_NEITHER: u32 = 3;

const fn ctl_code(function: u32, method: u32) -> u32 {
    (FILE_DEVICE_KEYBOARD << 16) | (function << 2) | method
}

const fn hid_ctl_code(id: u32) -> u32 {
    ctl_code(id, METHOD_NEITHER)
}

const fn hid_in_ctl_code(id: u32) -> u32 {
    ctl_code(id, METHOD_IN_DIRECT)
}

const fn hid_out_ctl_code(id: u32) -> u32 {
    ctl_code(id, METHOD_OUT_DIRECT)
}

pub const IOCTL_HID_GET_DEVICE_DESCRIPTOR: u32 = hid_ctl_code(0);
pub const IOCTL_HID_GET_REPORT_DESCRIPTOR: u32 = hid_ctl_code(1);
pub const IOCTL_HID_READ_REPORT: u32 = hid_ctl_code(2);
pub const IOCTL_HID_WRITE_REPORT: u32 = hid_ctl_code(3);
pub const IOCTL_HID_GET_STRING: u32 = hid_ctl_code(4);
pub const IOCTL_HID_ACTIVATE_DEVICE: u32 = hid_ctl_code(7);
pub const IOCTL_HID_DEACTIVATE_DEVICE: u32 = hid_ctl_code(8);
pub const IOCTL_HID_GET_DEVICE_ATTRIBUTES: u32 = hid_ctl_code(9);
pub const IOCTL_HID_SEND_IDLE_NOTIFICATION_REQUEST: u32 = hid_ctl_code(10);
pub const IOCTL_HID_GET_INDEXED_STRING: u32 = hid_out_ctl_code(30);
pub const IOCTL_HID_GET_FEATURE: u32 = hid_out_ctl_code(100);
pub const IOCTL_HID_SET_FEATURE: u32 = hid_in_ctl_code(100);
pub const IOCTL_HID_SET_OUTPUT_REPORT: u32 = hid_in_ctl_code(101);
pub const IOCTL_GET_PHYSICAL_DESCRIPTOR: u32 = hid_out_ctl_code(102);
pub const IOCTL_HID_GET_INPUT_REPORT: u32 = hid_out_ctl_code(104);

/// Control operations understood by the dispatcher
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    GetDeviceDescriptor,
    GetDeviceAttributes,
    GetReportDescriptor,
    ReadReport,
    WriteReport,
    GetFeature,
    SetFeature,
    GetInputReport,
    SetOutputReport,
    GetString,
    GetIndexedString,
    SendIdleNotification,
    ActivateDevice,
    DeactivateDevice,
    GetPhysicalDescriptor,
    Unknown(u32),
}

impl Operation {
    pub fn from_code(code: u32) -> Self {
        match code {
            IOCTL_HID_GET_DEVICE_DESCRIPTOR => Operation::GetDeviceDescriptor,
            IOCTL_HID_GET_DEVICE_ATTRIBUTES => Operation::GetDeviceAttributes,
            IOCTL_HID_GET_REPORT_DESCRIPTOR => Operation::GetReportDescriptor,
            IOCTL_HID_READ_REPORT => Operation::ReadReport,
            IOCTL_HID_WRITE_REPORT => Operation::WriteReport,
            IOCTL_HID_GET_FEATURE => Operation::GetFeature,
            IOCTL_HID_SET_FEATURE => Operation::SetFeature,
            IOCTL_HID_GET_INPUT_REPORT => Operation::GetInputReport,
            IOCTL_HID_SET_OUTPUT_REPORT => Operation::SetOutputReport,
            IOCTL_HID_GET_STRING => Operation::GetString,
            IOCTL_HID_GET_INDEXED_STRING => Operation::GetIndexedString,
            IOCTL_HID_SEND_IDLE_NOTIFICATION_REQUEST => Operation::SendIdleNotification,
            IOCTL_HID_ACTIVATE_DEVICE => Operation::ActivateDevice,
            IOCTL_HID_DEACTIVATE_DEVICE => Operation::DeactivateDevice,
            IOCTL_GET_PHYSICAL_DESCRIPTOR => Operation::GetPhysicalDescriptor,
            code => Operation::Unknown(code),
        }
    }

    pub fn code(&self) -> u32 {
        match *self {
            Operation::GetDeviceDescriptor => IOCTL_HID_GET_DEVICE_DESCRIPTOR,
            Operation::GetDeviceAttributes => IOCTL_HID_GET_DEVICE_ATTRIBUTES,
            Operation::GetReportDescriptor => IOCTL_HID_GET_REPORT_DESCRIPTOR,
            Operation::ReadReport => IOCTL_HID_READ_REPORT,
            Operation::WriteReport => IOCTL_HID_WRITE_REPORT,
            Operation::GetFeature => IOCTL_HID_GET_FEATURE,
            Operation::SetFeature => IOCTL_HID_SET_FEATURE,
            Operation::GetInputReport => IOCTL_HID_GET_INPUT_REPORT,
            Operation::SetOutputReport => IOCTL_HID_SET_OUTPUT_REPORT,
            Operation::GetString => IOCTL_HID_GET_STRING,
            Operation::GetIndexedString => IOCTL_HID_GET_INDEXED_STRING,
            Operation::SendIdleNotification => IOCTL_HID_SEND_IDLE_NOTIFICATION_REQUEST,
            Operation::ActivateDevice => IOCTL_HID_ACTIVATE_DEVICE,
            Operation::DeactivateDevice => IOCTL_HID_DEACTIVATE_DEVICE,
            Operation::GetPhysicalDescriptor => IOCTL_GET_PHYSICAL_DESCRIPTOR,
            Operation::Unknown(code) => code,
        }
    }
}

impl From<u32> for Operation {
    fn from(code: u32) -> Self {
        Operation::from_code(code)
    }
}

/// Split a marshalled transfer packet into report id and report buffer
fn xfer_packet(input: &[u8]) -> Result<ReportPacket<'_>> {
    match input.split_first() {
        Some((&collection_id, buffer)) => Ok(ReportPacket::new(collection_id, buffer)),
        None => Err(HidError::buffer_too_small(1, 0)),
    }
}

fn string_value(input: &[u8]) -> Result<u32> {
    if input.len() < 4 {
        return Err(HidError::buffer_too_small(4, input.len()));
    }
    Ok(LittleEndian::read_u32(&input[..4]))
}

impl<'a> Request<'a> {
    /// Unwrap a raw control request.
    ///
    /// Write-direction transfers (WriteReport, SetFeature, SetOutputReport)
    /// carry `report id + report` in `input`. Read-direction transfers
    /// (GetFeature, GetInputReport) carry only the report id. String
    /// requests carry the packed 32-bit string argument.
    pub fn from_ioctl(operation: Operation, input: &'a [u8]) -> Result<Self> {
        let request = match operation {
            Operation::GetDeviceDescriptor => Request::GetDeviceDescriptor,
            Operation::GetDeviceAttributes => Request::GetDeviceAttributes,
            Operation::GetReportDescriptor => Request::GetReportDescriptor,
            Operation::ReadReport => Request::ReadReport,
            Operation::WriteReport => Request::WriteReport(xfer_packet(input)?),
            Operation::SetFeature => Request::SetFeature(xfer_packet(input)?),
            Operation::SetOutputReport => Request::SetOutputReport(xfer_packet(input)?),
            Operation::GetFeature => Request::GetFeature {
                collection_id: xfer_packet(input)?.collection_id,
            },
            Operation::GetInputReport => Request::GetInputReport {
                collection_id: xfer_packet(input)?.collection_id,
            },
            Operation::GetString => Request::GetString(string_value(input)?),
            Operation::GetIndexedString => Request::GetIndexedString(string_value(input)?),
            Operation::SendIdleNotification
            | Operation::ActivateDevice
            | Operation::DeactivateDevice
            | Operation::GetPhysicalDescriptor
            | Operation::Unknown(_) => Request::Unsupported(operation),
        };
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ioctl_code_values() {
        assert_eq!(IOCTL_HID_GET_DEVICE_DESCRIPTOR, 0x000B_0003);
        assert_eq!(IOCTL_HID_READ_REPORT, 0x000B_000B);
        assert_eq!(IOCTL_HID_GET_DEVICE_ATTRIBUTES, 0x000B_0027);
        assert_eq!(IOCTL_HID_GET_FEATURE, 0x000B_0192);
        assert_eq!(IOCTL_HID_SET_FEATURE, 0x000B_0191);
        assert_eq!(IOCTL_HID_GET_INPUT_REPORT, 0x000B_01A2);
        assert_eq!(IOCTL_HID_GET_INDEXED_STRING, 0x000B_007A);
    }

    #[test]
    fn test_operation_code_mapping() {
        let ops = [
            Operation::GetDeviceDescriptor,
            Operation::GetDeviceAttributes,
            Operation::GetReportDescriptor,
            Operation::ReadReport,
            Operation::WriteReport,
            Operation::GetFeature,
            Operation::SetFeature,
            Operation::GetInputReport,
            Operation::SetOutputReport,
            Operation::GetString,
            Operation::GetIndexedString,
            Operation::SendIdleNotification,
            Operation::ActivateDevice,
            Operation::DeactivateDevice,
            Operation::GetPhysicalDescriptor,
        ];
        for op in ops {
            assert_eq!(Operation::from_code(op.code()), op);
        }
        assert_eq!(Operation::from(0x1234), Operation::Unknown(0x1234));
    }

    #[test]
    fn test_unwrap_transfer_packet() {
        let input = [0x01, 0x01, 0x55, 0, 0, 0, 0, 0, 0];
        match Request::from_ioctl(Operation::WriteReport, &input).unwrap() {
            Request::WriteReport(packet) => {
                assert_eq!(packet.collection_id, 1);
                assert_eq!(packet.buffer, &input[1..]);
            }
            other => panic!("unexpected request {other:?}"),
        }

        assert!(matches!(
            Request::from_ioctl(Operation::GetFeature, &[2]).unwrap(),
            Request::GetFeature { collection_id: 2 }
        ));
        assert!(matches!(
            Request::from_ioctl(Operation::SetFeature, &[]),
            Err(HidError::BufferTooSmall { .. })
        ));
    }

    #[test]
    fn test_unwrap_string_argument() {
        assert!(matches!(
            Request::from_ioctl(Operation::GetString, &0x0409_000Eu32.to_le_bytes()).unwrap(),
            Request::GetString(0x0409_000E)
        ));
        assert!(matches!(
            Request::from_ioctl(Operation::GetIndexedString, &[5, 0]),
            Err(HidError::BufferTooSmall {
                required: 4,
                actual: 2,
            })
        ));
    }

    #[test]
    fn test_unsupported_operations() {
        for op in [
            Operation::SendIdleNotification,
            Operation::ActivateDevice,
            Operation::DeactivateDevice,
            Operation::GetPhysicalDescriptor,
            Operation::Unknown(0xDEAD),
        ] {
            assert!(matches!(
                Request::from_ioctl(op, &[]).unwrap(),
                Request::Unsupported(o) if o == op
            ));
        }
    }
}
