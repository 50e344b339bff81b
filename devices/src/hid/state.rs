// Copyright 2024 Cloud Hypervisor Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Device State
//!
//! The mutable memory of the emulated device. Output and input reports
//! share one data cell: whatever was last written through WriteReport or
//! SetOutputReport is what the next input report carries, so the device
//! behaves as a loopback.

use super::descriptor::{DeviceAttributes, HIDMINI_PID, HIDMINI_VERSION, HIDMINI_VID};
use super::report::{ControlInfo, DeviceAttributesReport, InputReport};
use super::{HidError, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceState {
    vendor_id: u16,
    product_id: u16,
    version_number: u16,
    /// Last output report data byte, also served as input report data
    data: u8,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceState {
    pub fn new() -> Self {
        Self {
            vendor_id: HIDMINI_VID,
            product_id: HIDMINI_PID,
            version_number: HIDMINI_VERSION,
            data: 0,
        }
    }

    pub fn vendor_id(&self) -> u16 {
        self.vendor_id
    }

    pub fn product_id(&self) -> u16 {
        self.product_id
    }

    pub fn version_number(&self) -> u16 {
        self.version_number
    }

    /// Last byte written by WriteReport or SetOutputReport
    pub fn last_output_byte(&self) -> u8 {
        self.data
    }

    /// Byte the next input report will carry
    pub fn last_input_byte(&self) -> u8 {
        self.data
    }

    pub fn set_output_byte(&mut self, data: u8) {
        self.data = data;
    }

    pub fn set_attributes(&mut self, vendor_id: u16, product_id: u16, version_number: u16) {
        self.vendor_id = vendor_id;
        self.product_id = product_id;
        self.version_number = version_number;
    }

    /// Record returned for GetDeviceAttributes
    pub fn device_attributes(&self) -> DeviceAttributes {
        DeviceAttributes::new(self.vendor_id, self.product_id, self.version_number)
    }

    /// Feature report returned for GetFeature
    pub fn attributes_report(&self) -> DeviceAttributesReport {
        DeviceAttributesReport {
            vendor_id: self.vendor_id,
            product_id: self.product_id,
            version_number: self.version_number,
        }
    }

    /// Input report built from the current data byte
    pub fn input_report(&self) -> InputReport {
        InputReport::new(self.data)
    }

    /// Apply a SetFeature control request.
    pub fn apply_control(&mut self, control: ControlInfo) -> Result<()> {
        match control {
            ControlInfo::SetAttributes {
                vendor_id,
                product_id,
                version_number,
            } => {
                self.set_attributes(vendor_id, product_id, version_number);
                Ok(())
            }
            ControlInfo::Dummy1 => Err(HidError::NotImplemented(
                "SetFeature control code DUMMY1".to_string(),
            )),
            ControlInfo::Dummy2 => Err(HidError::NotImplemented(
                "SetFeature control code DUMMY2".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let state = DeviceState::new();
        assert_eq!(state.vendor_id(), 0xDEED);
        assert_eq!(state.product_id(), 0xFEED);
        assert_eq!(state.version_number(), 0x0101);
        assert_eq!(state.last_output_byte(), 0);
    }

    #[test]
    fn test_output_byte_loops_back() {
        let mut state = DeviceState::new();
        state.set_output_byte(0x42);
        assert_eq!(state.last_input_byte(), 0x42);
        assert_eq!(state.input_report(), InputReport::new(0x42));
    }

    #[test]
    fn test_apply_control() {
        let mut state = DeviceState::new();
        state
            .apply_control(ControlInfo::SetAttributes {
                vendor_id: 1,
                product_id: 2,
                version_number: 3,
            })
            .unwrap();
        assert_eq!(
            state.attributes_report(),
            DeviceAttributesReport {
                vendor_id: 1,
                product_id: 2,
                version_number: 3,
            }
        );

        let before = state.clone();
        assert!(matches!(
            state.apply_control(ControlInfo::Dummy1),
            Err(HidError::NotImplemented(_))
        ));
        assert!(matches!(
            state.apply_control(ControlInfo::Dummy2),
            Err(HidError::NotImplemented(_))
        ));
        assert_eq!(state, before);
    }
}
