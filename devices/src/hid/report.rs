// Copyright 2024 Cloud Hypervisor Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Report codecs
//!
//! Fixed-layout, little-endian encodings of every report this device
//! exchanges with the class driver. Decoding never reads past a report's
//! fixed size and rejects short buffers before looking at any field.

use byteorder::{ByteOrder, LittleEndian};

use super::{HidError, Result};

/// Report id of the single control collection
pub const CONTROL_COLLECTION_REPORT_ID: u8 = 0x01;

/// Report id stamped on input reports produced by the device
pub const CONTROL_FEATURE_REPORT_ID: u8 = 0x01;

/// SetFeature control codes
pub const HIDMINI_CONTROL_CODE_SET_ATTRIBUTES: u32 = 0x00;
pub const HIDMINI_CONTROL_CODE_DUMMY1: u32 = 0x01;
pub const HIDMINI_CONTROL_CODE_DUMMY2: u32 = 0x02;

/// A fixed-size report layout
pub trait Report: Sized {
    /// Size of the report on the wire, and the minimum buffer length
    const SIZE: usize;

    /// Parse a report from the front of `buf`.
    fn decode(buf: &[u8]) -> Result<Self>;

    /// Serialize into `out`, which is exactly [`Report::SIZE`] bytes long.
    fn write(&self, out: &mut [u8]);

    fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::SIZE];
        self.write(&mut buf);
        buf
    }

    /// Serialize into the front of a caller buffer, returning bytes written.
    fn encode_into(&self, out: &mut [u8]) -> Result<usize> {
        let len = out.len();
        let buf = out
            .get_mut(..Self::SIZE)
            .ok_or_else(|| HidError::buffer_too_small(Self::SIZE, len))?;
        self.write(buf);
        Ok(Self::SIZE)
    }

    /// Fail unless a buffer of `len` bytes can hold this report.
    fn check_len(len: usize) -> Result<()> {
        if len < Self::SIZE {
            return Err(HidError::buffer_too_small(Self::SIZE, len));
        }
        Ok(())
    }
}

/// Feature report carrying the device attributes (GetFeature)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceAttributesReport {
    pub vendor_id: u16,
    pub product_id: u16,
    pub version_number: u16,
}

impl Report for DeviceAttributesReport {
    const SIZE: usize = 7;

    fn decode(buf: &[u8]) -> Result<Self> {
        Self::check_len(buf.len())?;
        Ok(Self {
            vendor_id: LittleEndian::read_u16(&buf[1..3]),
            product_id: LittleEndian::read_u16(&buf[3..5]),
            version_number: LittleEndian::read_u16(&buf[5..7]),
        })
    }

    fn write(&self, out: &mut [u8]) {
        out[0] = CONTROL_COLLECTION_REPORT_ID;
        LittleEndian::write_u16(&mut out[1..3], self.vendor_id);
        LittleEndian::write_u16(&mut out[3..5], self.product_id);
        LittleEndian::write_u16(&mut out[5..7], self.version_number);
    }
}

/// Sideband control request carried by SetFeature.
///
/// On the wire: a 32-bit control code followed by a 6-byte payload whose
/// meaning depends on the code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlInfo {
    SetAttributes {
        vendor_id: u16,
        product_id: u16,
        version_number: u16,
    },
    Dummy1,
    Dummy2,
}

impl ControlInfo {
    pub fn control_code(&self) -> u32 {
        match self {
            ControlInfo::SetAttributes { .. } => HIDMINI_CONTROL_CODE_SET_ATTRIBUTES,
            ControlInfo::Dummy1 => HIDMINI_CONTROL_CODE_DUMMY1,
            ControlInfo::Dummy2 => HIDMINI_CONTROL_CODE_DUMMY2,
        }
    }
}

impl Report for ControlInfo {
    const SIZE: usize = 4 + 6;

    fn decode(buf: &[u8]) -> Result<Self> {
        Self::check_len(buf.len())?;
        match LittleEndian::read_u32(&buf[0..4]) {
            HIDMINI_CONTROL_CODE_SET_ATTRIBUTES => Ok(ControlInfo::SetAttributes {
                vendor_id: LittleEndian::read_u16(&buf[4..6]),
                product_id: LittleEndian::read_u16(&buf[6..8]),
                version_number: LittleEndian::read_u16(&buf[8..10]),
            }),
            HIDMINI_CONTROL_CODE_DUMMY1 => Ok(ControlInfo::Dummy1),
            HIDMINI_CONTROL_CODE_DUMMY2 => Ok(ControlInfo::Dummy2),
            code => Err(HidError::NotImplemented(format!(
                "SetFeature control code {code:#x}"
            ))),
        }
    }

    fn write(&self, out: &mut [u8]) {
        LittleEndian::write_u32(&mut out[0..4], self.control_code());
        match *self {
            ControlInfo::SetAttributes {
                vendor_id,
                product_id,
                version_number,
            } => {
                LittleEndian::write_u16(&mut out[4..6], vendor_id);
                LittleEndian::write_u16(&mut out[6..8], product_id);
                LittleEndian::write_u16(&mut out[8..10], version_number);
            }
            ControlInfo::Dummy1 | ControlInfo::Dummy2 => out[4..10].fill(0),
        }
    }
}

/// Input report: one data byte behind the report id
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InputReport {
    pub report_id: u8,
    pub data: u8,
}

impl InputReport {
    pub fn new(data: u8) -> Self {
        Self {
            report_id: CONTROL_FEATURE_REPORT_ID,
            data,
        }
    }
}

impl Report for InputReport {
    const SIZE: usize = 2;

    fn decode(buf: &[u8]) -> Result<Self> {
        Self::check_len(buf.len())?;
        Ok(Self {
            report_id: buf[0],
            data: buf[1],
        })
    }

    fn write(&self, out: &mut [u8]) {
        out[0] = self.report_id;
        out[1] = self.data;
    }
}

/// Output report: one data byte behind the report id, padded to 8 bytes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OutputReport {
    pub report_id: u8,
    pub data: u8,
}

impl OutputReport {
    pub fn new(data: u8) -> Self {
        Self {
            report_id: CONTROL_COLLECTION_REPORT_ID,
            data,
        }
    }
}

impl Report for OutputReport {
    const SIZE: usize = 1 + 1 + 2 + 4;

    fn decode(buf: &[u8]) -> Result<Self> {
        Self::check_len(buf.len())?;
        Ok(Self {
            report_id: buf[0],
            data: buf[1],
        })
    }

    fn write(&self, out: &mut [u8]) {
        out[0] = self.report_id;
        out[1] = self.data;
        out[2..Self::SIZE].fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_sizes() {
        assert_eq!(DeviceAttributesReport::SIZE, 7);
        assert_eq!(ControlInfo::SIZE, 10);
        assert_eq!(InputReport::SIZE, 2);
        assert_eq!(OutputReport::SIZE, 8);
    }

    #[test]
    fn test_device_attributes_encoding() {
        let report = DeviceAttributesReport {
            vendor_id: 0xDEED,
            product_id: 0xFEED,
            version_number: 0x0101,
        };
        assert_eq!(
            report.encode(),
            vec![0x01, 0xED, 0xDE, 0xED, 0xFE, 0x01, 0x01]
        );
    }

    #[test]
    fn test_control_info_decode_set_attributes() {
        let buf = [0, 0, 0, 0, 0x34, 0x12, 0x78, 0x56, 0x02, 0x00];
        assert_eq!(
            ControlInfo::decode(&buf).unwrap(),
            ControlInfo::SetAttributes {
                vendor_id: 0x1234,
                product_id: 0x5678,
                version_number: 0x0002,
            }
        );
    }

    #[test]
    fn test_control_info_dummy_codes() {
        let mut buf = [0u8; 10];
        buf[0] = 1;
        assert_eq!(ControlInfo::decode(&buf).unwrap(), ControlInfo::Dummy1);
        buf[0] = 2;
        assert_eq!(ControlInfo::decode(&buf).unwrap(), ControlInfo::Dummy2);
    }

    #[test]
    fn test_control_info_unknown_code() {
        let mut buf = [0u8; 10];
        buf[0] = 0x42;
        assert!(matches!(
            ControlInfo::decode(&buf),
            Err(HidError::NotImplemented(_))
        ));
    }

    #[test]
    fn test_short_buffers_rejected() {
        assert!(matches!(
            ControlInfo::decode(&[0u8; 9]),
            Err(HidError::BufferTooSmall {
                required: 10,
                actual: 9,
            })
        ));
        assert!(matches!(
            OutputReport::decode(&[1u8; 7]),
            Err(HidError::BufferTooSmall {
                required: 8,
                actual: 7,
            })
        ));
        assert!(matches!(
            InputReport::decode(&[1u8]),
            Err(HidError::BufferTooSmall {
                required: 2,
                actual: 1,
            })
        ));
        assert!(matches!(
            DeviceAttributesReport::decode(&[]),
            Err(HidError::BufferTooSmall {
                required: 7,
                actual: 0,
            })
        ));
    }

    #[test]
    fn test_output_report_padding() {
        let bytes = OutputReport::new(0xAB).encode();
        assert_eq!(bytes, vec![0x01, 0xAB, 0, 0, 0, 0, 0, 0]);

        let decoded = OutputReport::decode(&[0x01, 0x5A, 9, 9, 9, 9, 9, 9, 9]).unwrap();
        assert_eq!(decoded.data, 0x5A);
    }

    #[test]
    fn test_encode_into() {
        let mut out = [0xFFu8; 4];
        assert_eq!(InputReport::new(0x7F).encode_into(&mut out).unwrap(), 2);
        assert_eq!(out, [0x01, 0x7F, 0xFF, 0xFF]);

        let mut short = [0u8; 1];
        assert!(matches!(
            InputReport::new(0).encode_into(&mut short),
            Err(HidError::BufferTooSmall { .. })
        ));
        assert_eq!(short, [0]);
    }
}
