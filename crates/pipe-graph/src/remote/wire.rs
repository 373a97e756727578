//! Wire protocol of the remote graph service.
//!
//! Messages are single JSON values, one per newline-terminated line. Unary
//! exchanges write one [`GraphRequest`] and read one [`GraphResponse`];
//! `ObserveOutputStream` turns the connection into a server-push stream of
//! [`OutputStreamMessage`]s that ends when the server closes the socket.

use std::io::{BufRead, Write};

use pipe_types::{Error, PixelFormat, Result, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphRequest {
    GetGraphOptions,
    SetGraphConfig { serialized_config: Vec<u8> },
    StartGraphExecution,
    StopGraphExecution { stop_immediate: bool },
    ResetGraph,
    StartGraphProfiling,
    StopGraphProfiling,
    GetProfilingData,
    ObserveOutputStream { stream_id: i32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphResponse {
    Options { serialized_options: Vec<u8> },
    Status { code: StatusCode, message: String },
    ProfilingData { data: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputStreamMessage {
    pub timestamp_us: u64,
    pub payload: OutputStreamPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStreamPayload {
    PixelData {
        data: Vec<u8>,
        width: u32,
        height: u32,
        step: u32,
        format: PixelFormat,
    },
    SemanticData {
        data: Vec<u8>,
    },
}

pub fn write_message<W: Write, T: Serialize>(writer: &mut W, message: &T) -> Result {
    let mut line = serde_json::to_vec(message).map_err(|_| Error::Internal)?;
    line.push(b'\n');
    writer.write_all(&line).map_err(|e| {
        debug!(target: "graph.remote", error = %e, "wire_write_failed");
        Error::Internal
    })
}

/// Reads one message. `Ok(None)` is a clean end-of-stream; timeouts and
/// malformed payloads are errors.
pub fn read_message<R: BufRead, T: DeserializeOwned>(reader: &mut R) -> Result<Option<T>> {
    let mut line = String::new();
    let read = reader.read_line(&mut line).map_err(|e| {
        debug!(target: "graph.remote", error = %e, "wire_read_failed");
        Error::Internal
    })?;
    if read == 0 {
        return Ok(None);
    }
    serde_json::from_str(&line)
        .map(Some)
        .map_err(|_| Error::Internal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufReader;

    #[test]
    fn request_and_response_round_trip_over_a_buffer() {
        let mut buffer = Vec::new();
        write_message(&mut buffer, &GraphRequest::ObserveOutputStream { stream_id: 4 }).unwrap();
        write_message(
            &mut buffer,
            &GraphResponse::Status {
                code: StatusCode::Success,
                message: String::new(),
            },
        )
        .unwrap();

        let mut reader = BufReader::new(buffer.as_slice());
        let request: GraphRequest = read_message(&mut reader).unwrap().unwrap();
        assert_eq!(request, GraphRequest::ObserveOutputStream { stream_id: 4 });
        let response: GraphResponse = read_message(&mut reader).unwrap().unwrap();
        assert!(matches!(response, GraphResponse::Status { code, .. } if code == StatusCode::Success));
        let eof: Option<GraphRequest> = read_message(&mut reader).unwrap();
        assert!(eof.is_none());
    }

    #[test]
    fn malformed_line_is_an_error() {
        let mut reader = BufReader::new(&b"{not json}\n"[..]);
        let result: Result<Option<GraphRequest>> = read_message(&mut reader);
        assert!(result.is_err());
    }

    #[test]
    fn stream_message_round_trip() {
        let message = OutputStreamMessage {
            timestamp_us: 77,
            payload: OutputStreamPayload::PixelData {
                data: vec![1, 2, 3, 4, 5, 6],
                width: 2,
                height: 1,
                step: 6,
                format: PixelFormat::Rgb,
            },
        };
        let mut buffer = Vec::new();
        write_message(&mut buffer, &message).unwrap();
        let mut reader = BufReader::new(buffer.as_slice());
        let decoded: OutputStreamMessage = read_message(&mut reader).unwrap().unwrap();
        assert_eq!(decoded, message);
    }
}
