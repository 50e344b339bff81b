// Copyright 2024 Cloud Hypervisor Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! HID descriptors
//!
//! The two descriptor blobs the class driver asks for before anything else:
//! the HID class descriptor ("device descriptor") and the report descriptor.
//! Both are fixed once the device is created. The report descriptor may be
//! replaced by an override supplied by the device's parameter store, in
//! which case the length field of the class descriptor follows it.

use log::{info, warn};
use vm_memory::{ByteValued, Le16, Le32};

use super::report::{CONTROL_FEATURE_REPORT_ID, ControlInfo, InputReport, OutputReport, Report};

/// Vendor id reported in the device attributes
pub const HIDMINI_VID: u16 = 0xDEED;

/// Product id reported in the device attributes
pub const HIDMINI_PID: u16 = 0xFEED;

/// Version number reported in the device attributes
pub const HIDMINI_VERSION: u16 = 0x0101;

/// HID class descriptor type
const HID_HID_DESCRIPTOR_TYPE: u8 = 0x21;

/// Report descriptor type
const HID_REPORT_DESCRIPTOR_TYPE: u8 = 0x22;

/// HID specification release 1.00
const HID_SPEC_RELEASE: u16 = 0x0100;

const FEATURE_REPORT_SIZE_CB: usize = ControlInfo::SIZE - 1;
const INPUT_REPORT_SIZE_CB: usize = InputReport::SIZE - 1;
const OUTPUT_REPORT_SIZE_CB: usize = OutputReport::SIZE - 1;

/// Compiled-in report descriptor: one vendor-defined application collection
/// carrying a feature, an input and an output report, all with report id 1.
#[rustfmt::skip]
pub const DEFAULT_REPORT_DESCRIPTOR: &[u8] = &[
    0x06, 0x00, 0xFF,                  // Usage Page (Vendor Defined 0xFF00)
    0x09, 0x01,                        // Usage (Vendor Usage 0x01)
    0xA1, 0x01,                        // Collection (Application)
    0x85, CONTROL_FEATURE_REPORT_ID,   //   Report ID (1)
    0x09, 0x01,                        //   Usage (Vendor Usage 0x01)
    0x15, 0x00,                        //   Logical Minimum (0)
    0x26, 0xFF, 0x00,                  //   Logical Maximum (255)
    0x75, 0x08,                        //   Report Size (8)
    0x96,                              //   Report Count (feature)
    (FEATURE_REPORT_SIZE_CB & 0xFF) as u8,
    (FEATURE_REPORT_SIZE_CB >> 8) as u8,
    0xB1, 0x00,                        //   Feature (Data, Ary, Abs)
    0x09, 0x01,                        //   Usage (Vendor Usage 0x01)
    0x75, 0x08,                        //   Report Size (8)
    0x96,                              //   Report Count (input)
    (INPUT_REPORT_SIZE_CB & 0xFF) as u8,
    (INPUT_REPORT_SIZE_CB >> 8) as u8,
    0x81, 0x00,                        //   Input (Data, Ary, Abs)
    0x09, 0x01,                        //   Usage (Vendor Usage 0x01)
    0x75, 0x08,                        //   Report Size (8)
    0x96,                              //   Report Count (output)
    (OUTPUT_REPORT_SIZE_CB & 0xFF) as u8,
    (OUTPUT_REPORT_SIZE_CB >> 8) as u8,
    0x91, 0x00,                        //   Output (Data, Ary, Abs)
    0xC0,                              // End Collection
];

/// Size of the HID class descriptor on the wire
pub const HID_DESCRIPTOR_SIZE: usize = std::mem::size_of::<HidDescriptor>();

/// Size of the device attributes record on the wire
pub const DEVICE_ATTRIBUTES_SIZE: usize = std::mem::size_of::<DeviceAttributes>();

/// HID class descriptor with a single report descriptor entry
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HidDescriptor {
    pub b_length: u8,
    pub b_descriptor_type: u8,
    pub bcd_hid: Le16,
    pub b_country: u8,
    pub b_num_descriptors: u8,
    pub b_report_type: u8,
    pub w_report_length: Le16,
}

// SAFETY: packed struct of integer fields, every bit pattern is valid.
unsafe impl ByteValued for HidDescriptor {}

impl HidDescriptor {
    /// Class descriptor announcing a report descriptor of `report_length` bytes
    pub fn new(report_length: u16) -> Self {
        Self {
            b_length: HID_DESCRIPTOR_SIZE as u8,
            b_descriptor_type: HID_HID_DESCRIPTOR_TYPE,
            bcd_hid: Le16::from(HID_SPEC_RELEASE),
            b_country: 0x00,
            b_num_descriptors: 1,
            b_report_type: HID_REPORT_DESCRIPTOR_TYPE,
            w_report_length: Le16::from(report_length),
        }
    }

    pub fn report_length(&self) -> u16 {
        let len = self.w_report_length;
        len.into()
    }
}

/// Device attributes record returned for GetDeviceAttributes
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceAttributes {
    pub size: Le32,
    pub vendor_id: Le16,
    pub product_id: Le16,
    pub version_number: Le16,
    pub reserved: [Le16; 11],
}

// SAFETY: packed struct of integer fields, every bit pattern is valid.
unsafe impl ByteValued for DeviceAttributes {}

impl DeviceAttributes {
    pub fn new(vendor_id: u16, product_id: u16, version_number: u16) -> Self {
        Self {
            size: Le32::from(DEVICE_ATTRIBUTES_SIZE as u32),
            vendor_id: Le16::from(vendor_id),
            product_id: Le16::from(product_id),
            version_number: Le16::from(version_number),
            reserved: Default::default(),
        }
    }
}

/// Source of an optional replacement report descriptor.
///
/// Consulted exactly once, when the device is created.
pub trait DescriptorSource {
    fn try_load_override_descriptor(&self) -> Option<Vec<u8>>;
}

/// Descriptor source that never overrides the compiled-in descriptor
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOverride;

impl DescriptorSource for NoOverride {
    fn try_load_override_descriptor(&self) -> Option<Vec<u8>> {
        None
    }
}

/// The descriptor pair selected for one device instance
#[derive(Clone, Debug)]
pub struct DescriptorSet {
    hid_descriptor: HidDescriptor,
    report_descriptor: Vec<u8>,
    from_override: bool,
}

impl DescriptorSet {
    /// Select the descriptor pair.
    ///
    /// A present, non-empty override replaces the report descriptor and the
    /// class descriptor's length field is patched to match. Anything else,
    /// including an override too long for the 16-bit length field, falls
    /// back to the compiled-in pair.
    pub fn select(override_bytes: Option<Vec<u8>>) -> Self {
        match override_bytes {
            Some(bytes) if !bytes.is_empty() => match u16::try_from(bytes.len()) {
                Ok(len) => {
                    info!("Using override report descriptor ({len} bytes)");
                    Self {
                        hid_descriptor: HidDescriptor::new(len),
                        report_descriptor: bytes,
                        from_override: true,
                    }
                }
                Err(_) => {
                    warn!(
                        "Override report descriptor too long ({} bytes), using default",
                        bytes.len()
                    );
                    Self::default()
                }
            },
            _ => Self::default(),
        }
    }

    /// Select the descriptor pair from a parameter store
    pub fn from_source<S: DescriptorSource + ?Sized>(source: &S) -> Self {
        Self::select(source.try_load_override_descriptor())
    }

    /// Device (HID class) descriptor bytes
    pub fn device_descriptor(&self) -> &[u8] {
        self.hid_descriptor.as_slice()
    }

    pub fn hid_descriptor(&self) -> &HidDescriptor {
        &self.hid_descriptor
    }

    pub fn report_descriptor(&self) -> &[u8] {
        &self.report_descriptor
    }

    /// Whether the report descriptor came from the override source
    pub fn is_override(&self) -> bool {
        self.from_override
    }
}

impl Default for DescriptorSet {
    fn default() -> Self {
        Self {
            hid_descriptor: HidDescriptor::new(DEFAULT_REPORT_DESCRIPTOR.len() as u16),
            report_descriptor: DEFAULT_REPORT_DESCRIPTOR.to_vec(),
            from_override: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedOverride(Vec<u8>);

    impl DescriptorSource for FixedOverride {
        fn try_load_override_descriptor(&self) -> Option<Vec<u8>> {
            Some(self.0.clone())
        }
    }

    #[test]
    fn test_descriptor_sizes() {
        assert_eq!(HID_DESCRIPTOR_SIZE, 9);
        assert_eq!(DEVICE_ATTRIBUTES_SIZE, 32);
    }

    #[test]
    fn test_default_descriptor_bytes() {
        let set = DescriptorSet::default();
        let len = DEFAULT_REPORT_DESCRIPTOR.len() as u16;

        assert!(!set.is_override());
        assert_eq!(
            set.device_descriptor(),
            &[0x09, 0x21, 0x00, 0x01, 0x00, 0x01, 0x22, len as u8, (len >> 8) as u8]
        );
        assert_eq!(set.report_descriptor(), DEFAULT_REPORT_DESCRIPTOR);
    }

    #[test]
    fn test_default_report_descriptor_counts() {
        // Report Count items follow the report sizes minus the id byte
        let counts: Vec<u16> = DEFAULT_REPORT_DESCRIPTOR
            .windows(3)
            .filter(|w| w[0] == 0x96)
            .map(|w| u16::from(w[1]) | (u16::from(w[2]) << 8))
            .collect();
        assert_eq!(counts, vec![9, 1, 7]);
        assert_eq!(DEFAULT_REPORT_DESCRIPTOR.last(), Some(&0xC0));
    }

    #[test]
    fn test_override_patches_length() {
        let blob = vec![0x05, 0x01, 0x09, 0x02, 0xA1, 0x01, 0xC0];
        let set = DescriptorSet::from_source(&FixedOverride(blob.clone()));

        assert!(set.is_override());
        assert_eq!(set.report_descriptor(), blob.as_slice());
        assert_eq!(set.hid_descriptor().report_length(), 7);
        assert_eq!(set.device_descriptor()[7], 7);
        assert_eq!(set.device_descriptor()[8], 0);
    }

    #[test]
    fn test_empty_override_falls_back() {
        let set = DescriptorSet::from_source(&FixedOverride(Vec::new()));
        assert!(!set.is_override());
        assert_eq!(set.report_descriptor(), DEFAULT_REPORT_DESCRIPTOR);

        let set = DescriptorSet::from_source(&NoOverride);
        assert!(!set.is_override());
    }

    #[test]
    fn test_oversized_override_falls_back() {
        let set = DescriptorSet::select(Some(vec![0u8; usize::from(u16::MAX) + 1]));
        assert!(!set.is_override());
        assert_eq!(
            usize::from(set.hid_descriptor().report_length()),
            DEFAULT_REPORT_DESCRIPTOR.len()
        );
    }

    #[test]
    fn test_device_attributes_layout() {
        let attrs = DeviceAttributes::new(HIDMINI_VID, HIDMINI_PID, HIDMINI_VERSION);
        let bytes = attrs.as_slice();

        assert_eq!(&bytes[0..4], &[32, 0, 0, 0]);
        assert_eq!(&bytes[4..10], &[0xED, 0xDE, 0xED, 0xFE, 0x01, 0x01]);
        assert!(bytes[10..].iter().all(|&b| b == 0));
    }
}
