// Copyright 2024 Cloud Hypervisor Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Device parameters
//!
//! Per-device settings loaded from a JSON file. This is the host's stand-in
//! for the per-device parameter key a driver would read from its
//! configuration store, and the only place an override report descriptor
//! can come from.

use std::fs;
use std::path::Path;

use devices::hid::{DescriptorSource, TimerConfig};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::{HostError, Result};

/// Device parameter file contents
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceParameters {
    /// Non-zero enables `report_descriptor`
    pub read_from_registry: u32,
    /// Replacement report descriptor
    pub report_descriptor: Option<Vec<u8>>,
    /// Readiness timer schedule
    pub timer: TimerConfig,
    /// Bound on parked read-report requests
    pub max_pending_reads: Option<usize>,
}

impl DeviceParameters {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| HostError::ReadParams {
            path: path.to_path_buf(),
            source,
        })?;
        let params: Self =
            serde_json::from_str(&text).map_err(|source| HostError::ParseParams {
                path: path.to_path_buf(),
                source,
            })?;
        info!("Loaded device parameters from {}", path.display());
        Ok(params)
    }
}

impl DescriptorSource for DeviceParameters {
    fn try_load_override_descriptor(&self) -> Option<Vec<u8>> {
        if self.read_from_registry == 0 {
            return None;
        }
        match &self.report_descriptor {
            Some(bytes) if !bytes.is_empty() => Some(bytes.clone()),
            Some(_) => {
                warn!("Override report descriptor is empty");
                None
            }
            None => {
                warn!("read_from_registry set but no report descriptor given");
                None
            }
        }
    }
}
