// Copyright 2024 Cloud Hypervisor Authors. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Wire records exchanged with the client, one JSON object per line.

use std::iter;

use devices::hid::{Completion, HidError, Operation, Response, Status};
use serde::{Deserialize, Serialize};

/// What a request asks for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestOp {
    /// Abort the deferred read whose tag is `target`
    Cancel,
    #[serde(untagged)]
    Device(Operation),
}

/// One client request
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WireRequest {
    /// Client-chosen identifier echoed in the response
    pub tag: u64,
    pub op: Option<RequestOp>,
    /// Collection id for collection-scoped operations
    pub report_id: Option<u8>,
    /// Report bytes for write-direction operations
    pub buffer: Vec<u8>,
    /// Packed string id / language id for string operations
    pub value: Option<u32>,
    /// Capacity of the client's output buffer
    pub output_len: usize,
    /// Tag of the read to cancel
    pub target: Option<u64>,
}

impl WireRequest {
    pub fn new(tag: u64, op: RequestOp) -> Self {
        Self {
            tag,
            op: Some(op),
            ..Default::default()
        }
    }

    /// Marshal the IOCTL input buffer for `operation`.
    ///
    /// Write transfers are `report id + report`, read transfers carry the
    /// report id alone and string requests the little-endian argument.
    pub fn input_buffer(&self, operation: Operation) -> Vec<u8> {
        match operation {
            Operation::WriteReport | Operation::SetFeature | Operation::SetOutputReport => {
                match self.report_id {
                    Some(id) => iter::once(id).chain(self.buffer.iter().copied()).collect(),
                    None => Vec::new(),
                }
            }
            Operation::GetFeature | Operation::GetInputReport => {
                self.report_id.into_iter().collect()
            }
            Operation::GetString | Operation::GetIndexedString => match self.value {
                Some(value) => value.to_le_bytes().to_vec(),
                None => Vec::new(),
            },
            _ => Vec::new(),
        }
    }
}

/// One response line
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireResponse {
    pub tag: u64,
    pub status: Status,
    pub ntstatus: u32,
    pub bytes_written: usize,
    pub data: Vec<u8>,
    /// Set on the final response of a request that was parked
    pub deferred: bool,
}

impl WireResponse {
    pub fn status(tag: u64, status: Status) -> Self {
        Self {
            tag,
            status,
            ntstatus: status.ntstatus(),
            bytes_written: 0,
            data: Vec::new(),
            deferred: false,
        }
    }

    pub fn error(tag: u64, error: &HidError) -> Self {
        Self::status(tag, error.status())
    }

    pub fn complete(tag: u64, response: Response) -> Self {
        Self {
            bytes_written: response.bytes_written,
            data: response.data,
            ..Self::status(tag, Status::Success)
        }
    }

    /// Final response of a deferred read
    pub fn deferred(tag: u64, completion: Completion) -> Self {
        let response = match completion {
            Ok(data) => Self {
                bytes_written: data.len(),
                data,
                ..Self::status(tag, Status::Success)
            },
            Err(e) => Self::error(tag, &e),
        };
        Self {
            deferred: true,
            ..response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_request() {
        let req: WireRequest = serde_json::from_str(
            r#"{"tag":7,"op":"WriteReport","report_id":1,"buffer":[1,42,0,0,0,0,0,0]}"#,
        )
        .unwrap();
        assert_eq!(req.tag, 7);
        assert_eq!(req.op, Some(RequestOp::Device(Operation::WriteReport)));
        assert_eq!(
            req.input_buffer(Operation::WriteReport),
            vec![1, 1, 42, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_parse_cancel() {
        let req: WireRequest =
            serde_json::from_str(r#"{"tag": 9, "op": "Cancel", "target": 3}"#).unwrap();
        assert_eq!(req.op, Some(RequestOp::Cancel));
        assert_eq!(req.target, Some(3));
    }

    #[test]
    fn test_unknown_op_rejected() {
        let json = r#"{"tag": 1, "op": "Reboot"}"#;
        let err = serde_json::from_str::<WireRequest>(json).unwrap_err();
        assert!(err.is_data());
    }

    #[test]
    fn test_input_buffers() {
        let mut req = WireRequest::new(1, RequestOp::Device(Operation::GetString));
        req.value = Some(0x0409_000F);
        assert_eq!(
            req.input_buffer(Operation::GetString),
            vec![0x0F, 0x00, 0x09, 0x04]
        );

        req.report_id = Some(1);
        assert_eq!(req.input_buffer(Operation::GetInputReport), vec![1]);
        assert!(req.input_buffer(Operation::GetDeviceDescriptor).is_empty());

        req.report_id = None;
        assert!(req.input_buffer(Operation::SetFeature).is_empty());
    }

    #[test]
    fn test_response_encoding() {
        let resp = WireResponse::deferred(4, Ok(vec![1, 9]));
        let json = serde_json::to_string(&resp).unwrap();
        let expected = concat!(
            r#"{"tag":4,"status":"Success","ntstatus":0,"#,
            r#""bytes_written":2,"data":[1,9],"deferred":true}"#,
        );
        assert_eq!(json, expected);

        let resp = WireResponse::deferred(5, Err(HidError::Cancelled));
        assert_eq!(resp.status, Status::Cancelled);
        assert_eq!(resp.ntstatus, 0xC000_0120);
        assert_eq!(resp.bytes_written, 0);
    }
}
