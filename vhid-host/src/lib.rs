// Copyright 2024 Cloud Hypervisor Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Virtual HID host
//!
//! Owns one [`VirtualHidDevice`](devices::hid::VirtualHidDevice) and plays
//! the collaborators around it: the device parameter store, the transport
//! that frames requests and responses, and the readiness timer lifecycle.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  JSON lines   ┌──────────────┐      ┌──────────────────┐
//! │ stdin reader │──────────────▶│     Host     │─────▶│ VirtualHidDevice │
//! └──────────────┘  (flume)      └──────────────┘      └──────────────────┘
//!                                       │                 ▲
//!                                       │ responses       │ Weak
//!                                       ▼                 │
//! ┌──────────────┐   (flume)     ┌──────────────┐      ┌──────────────────┐
//! │    stdout    │◀──────────────│ writer thread│◀─────│  ReadinessTimer  │
//! └──────────────┘               └──────────────┘      └──────────────────┘
//! ```
//!
//! Immediate requests are answered from the request loop. Deferred reads
//! are answered from the timer thread once it completes them. Both paths
//! feed the same writer thread so response lines never interleave.
//!
//! # Modules
//!
//! - [`config`]: device parameters and descriptor override
//! - [`protocol`]: wire request and response records
//! - [`host`]: request loop, deferred read bookkeeping, writer thread

use std::io;
use std::path::PathBuf;

pub mod config;
pub mod host;
pub mod protocol;

pub use config::DeviceParameters;
pub use host::{Host, spawn_writer};
pub use protocol::{RequestOp, WireRequest, WireResponse};

/// Host error types
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("Failed to read device parameters from {path}: {source}")]
    ReadParams {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid device parameters in {path}: {source}")]
    ParseParams {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode response: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Transport I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Device error: {0}")]
    Device(#[from] devices::hid::HidError),
}

pub type Result<T> = std::result::Result<T, HostError>;
