// Copyright 2024 Cloud Hypervisor Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Device strings
//!
//! Strings are served as UTF-16LE including the terminating NUL, the same
//! bytes a wide-string literal occupies in memory.

use super::{HidError, Result};

/// String ids accepted by GetString
pub const HID_STRING_ID_IMANUFACTURER: u16 = 14;
pub const HID_STRING_ID_IPRODUCT: u16 = 15;
pub const HID_STRING_ID_ISERIALNUMBER: u16 = 16;

/// The only index accepted by GetIndexedString
pub const VHIDMINI_DEVICE_STRING_INDEX: u16 = 5;

pub const VHIDMINI_MANUFACTURER_STRING: &str = "UMDF Virtual hidmini device Manufacturer string";
pub const VHIDMINI_PRODUCT_STRING: &str = "UMDF Virtual hidmini device Product string";
pub const VHIDMINI_SERIAL_NUMBER_STRING: &str = "UMDF Virtual hidmini device Serial Number string";
pub const VHIDMINI_DEVICE_STRING: &str = "UMDF Virtual hidmini device";

/// Decoded GetString / GetIndexedString argument.
///
/// The class driver packs the string id (or index) in the low 16 bits and
/// a language id in the high 16 bits. The language id is ignored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StringRequest {
    pub id: u16,
    pub language_id: u16,
}

impl From<u32> for StringRequest {
    fn from(value: u32) -> Self {
        Self {
            id: (value & 0xFFFF) as u16,
            language_id: (value >> 16) as u16,
        }
    }
}

impl StringRequest {
    /// Look up a GetString request
    pub fn lookup_string(&self) -> Result<&'static str> {
        match self.id {
            HID_STRING_ID_IMANUFACTURER => Ok(VHIDMINI_MANUFACTURER_STRING),
            HID_STRING_ID_IPRODUCT => Ok(VHIDMINI_PRODUCT_STRING),
            HID_STRING_ID_ISERIALNUMBER => Ok(VHIDMINI_SERIAL_NUMBER_STRING),
            id => Err(HidError::InvalidParameter(format!("string id {id}"))),
        }
    }

    /// Look up a GetIndexedString request
    pub fn lookup_indexed(&self) -> Result<&'static str> {
        if self.id != VHIDMINI_DEVICE_STRING_INDEX {
            return Err(HidError::InvalidParameter(format!(
                "string index {}",
                self.id
            )));
        }
        Ok(VHIDMINI_DEVICE_STRING)
    }
}

/// UTF-16LE bytes of `s` followed by a NUL code unit
pub(crate) fn wide_bytes(s: &str) -> Vec<u8> {
    s.encode_utf16()
        .chain(std::iter::once(0))
        .flat_map(u16::to_le_bytes)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_request_decoding() {
        let req = StringRequest::from(0x0409_000E);
        assert_eq!(req.id, HID_STRING_ID_IMANUFACTURER);
        assert_eq!(req.language_id, 0x0409);
    }

    #[test]
    fn test_lookup_string() {
        let lookup = |v: u32| StringRequest::from(v).lookup_string();

        assert_eq!(lookup(14).unwrap(), VHIDMINI_MANUFACTURER_STRING);
        assert_eq!(lookup(0x0409_000F).unwrap(), VHIDMINI_PRODUCT_STRING);
        assert_eq!(lookup(16).unwrap(), VHIDMINI_SERIAL_NUMBER_STRING);
        assert!(matches!(lookup(17), Err(HidError::InvalidParameter(_))));
        assert!(matches!(lookup(0), Err(HidError::InvalidParameter(_))));
    }

    #[test]
    fn test_lookup_indexed() {
        assert_eq!(
            StringRequest::from(0xFFFF_0005).lookup_indexed().unwrap(),
            VHIDMINI_DEVICE_STRING
        );
        assert!(matches!(
            StringRequest::from(4).lookup_indexed(),
            Err(HidError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_wide_bytes() {
        assert_eq!(wide_bytes("Ab"), vec![b'A', 0, b'b', 0, 0, 0]);
        assert_eq!(
            wide_bytes(VHIDMINI_DEVICE_STRING).len(),
            (VHIDMINI_DEVICE_STRING.len() + 1) * 2
        );
    }
}
