// Copyright 2024 Cloud Hypervisor Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Emulated devices
//!
//! - [`hid`]: a HID minidriver answering the class driver's control
//!   protocol from an in-memory device, with timer-driven input reads.

pub mod hid;
