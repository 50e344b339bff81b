// Copyright 2024 Cloud Hypervisor Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Integration tests for vhid-host
//!
//! Runs whole sessions through the request loop, the real readiness timer
//! thread and the response writer.

use std::io::{self, Write};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use devices::hid::{Status, TimerConfig};
use vhid_host::{DeviceParameters, Host, WireResponse, spawn_writer};

/// Writer collecting everything into a shared buffer
#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn fast_params() -> DeviceParameters {
    DeviceParameters {
        timer: TimerConfig {
            initial_delay_ms: 1,
            period_ms: 5,
        },
        ..Default::default()
    }
}

/// Feed `lines` through a threaded host and collect every response line.
fn run_session(params: &DeviceParameters, lines: &[&str]) -> Vec<WireResponse> {
    let out = SharedBuf::default();
    let (resp_tx, resp_rx) = flume::unbounded();
    let writer = spawn_writer(out.clone(), resp_rx).unwrap();

    let (line_tx, line_rx) = flume::unbounded();
    for line in lines {
        line_tx.send(Ok(line.to_string())).unwrap();
    }
    drop(line_tx);

    let running = AtomicBool::new(true);
    let host = Host::new(params, resp_tx).unwrap();
    host.serve(&line_rx, &running).unwrap();
    assert!(host.wait_idle(Duration::from_secs(5), &running));
    drop(host);
    writer.join().unwrap().unwrap();

    let bytes = out.0.lock().unwrap().clone();
    String::from_utf8(bytes)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

fn by_tag(responses: &[WireResponse], tag: u64) -> &WireResponse {
    responses
        .iter()
        .find(|r| r.tag == tag)
        .unwrap_or_else(|| panic!("no response for tag {tag}"))
}

#[test]
fn test_session_loopback() {
    let responses = run_session(
        &fast_params(),
        &[
            r#"{"tag": 1, "op": "GetDeviceDescriptor", "output_len": 64}"#,
            r#"{"tag": 2, "op": "WriteReport", "report_id": 1, "buffer": [1, 77,0,0,0,0,0,0]}"#,
            r#"{"tag": 3, "op": "ReadReport", "output_len": 2}"#,
            r#"{"tag": 4, "op": "GetInputReport", "report_id": 1, "output_len": 2}"#,
        ],
    );
    assert_eq!(responses.len(), 4);

    let desc = by_tag(&responses, 1);
    assert_eq!(desc.status, Status::Success);
    assert_eq!(desc.bytes_written, 9);

    assert_eq!(by_tag(&responses, 2).bytes_written, 8);

    let read = by_tag(&responses, 3);
    assert!(read.deferred);
    assert_eq!(read.data, vec![1, 77]);

    assert_eq!(by_tag(&responses, 4).data, vec![1, 77]);
}

#[test]
fn test_session_errors() {
    let responses = run_session(
        &fast_params(),
        &[
            r#"{"tag": 1, "op": "GetFeature", "report_id": 2, "output_len": 64}"#,
            r#"{"tag": 2, "op": "GetFeature", "report_id": 1, "output_len": 6}"#,
            r#"{"tag": 3, "op": "GetString", "value": 99, "output_len": 256}"#,
            r#"{"tag": 4, "op": "ActivateDevice"}"#,
            r#"{"tag": 5, "op": "Cancel", "target": 42}"#,
        ],
    );

    let expected = [
        (1, Status::InvalidCollection),
        (2, Status::BufferTooSmall),
        (3, Status::InvalidParameter),
        (4, Status::NotImplemented),
        (5, Status::InvalidParameter),
    ];
    for (tag, status) in expected {
        let resp = by_tag(&responses, tag);
        assert_eq!(resp.status, status);
        assert_eq!(resp.ntstatus, status.ntstatus());
        assert_eq!(resp.bytes_written, 0);
        assert!(resp.data.is_empty());
    }
}

#[test]
fn test_session_reads_complete_in_order() {
    let responses = run_session(
        &fast_params(),
        &[
            r#"{"tag": 10, "op": "ReadReport", "output_len": 2}"#,
            r#"{"tag": 11, "op": "ReadReport", "output_len": 2}"#,
            r#"{"tag": 12, "op": "ReadReport", "output_len": 1}"#,
        ],
    );

    let tags: Vec<u64> = responses.iter().map(|r| r.tag).collect();
    assert_eq!(tags, vec![10, 11, 12]);
    assert_eq!(by_tag(&responses, 12).status, Status::BufferTooSmall);
}

#[test]
fn test_override_descriptor_session() {
    let params = DeviceParameters {
        read_from_registry: 1,
        report_descriptor: Some(vec![0x05, 0x01, 0x09, 0x06, 0xA1, 0x01, 0xC0]),
        ..fast_params()
    };
    let responses = run_session(
        &params,
        &[
            r#"{"tag": 1, "op": "GetReportDescriptor", "output_len": 256}"#,
            r#"{"tag": 2, "op": "GetDeviceDescriptor", "output_len": 9}"#,
        ],
    );

    assert_eq!(
        by_tag(&responses, 1).data,
        vec![0x05, 0x01, 0x09, 0x06, 0xA1, 0x01, 0xC0]
    );
    assert_eq!(by_tag(&responses, 2).data[7], 7);
}
