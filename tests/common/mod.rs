//! Common test utilities for driver tests
//!
//! Provides:
//! - An in-memory connector backed by `tokio::io::duplex`
//! - A scripted fake server speaking the frame protocol
//! - Payload helpers

#![allow(dead_code)]

use std::io;
use std::sync::Mutex;

use bytes::{Buf, BytesMut};
use polodb_client::protocol::{decode_frame, encode_frame, encode_payload, Frame};
use polodb_client::{Connector, MuxOptions, RequestMultiplexer};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

/// Hands out one pre-made duplex stream; later connects are refused.
pub struct DuplexConnector {
    stream: Mutex<Option<DuplexStream>>,
}

impl DuplexConnector {
    pub fn refusing() -> Self {
        Self {
            stream: Mutex::new(None),
        }
    }
}

#[async_trait::async_trait]
impl Connector for DuplexConnector {
    type Stream = DuplexStream;

    async fn connect(&self) -> io::Result<DuplexStream> {
        self.stream.lock().unwrap().take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::ConnectionRefused, "no server listening")
        })
    }

    fn address(&self) -> String {
        "duplex".to_string()
    }
}

/// The server end of a duplex connection.
pub struct FakeServer {
    stream: DuplexStream,
    buf: BytesMut,
}

impl FakeServer {
    /// Next complete request frame sent by the client
    pub async fn read_request(&mut self) -> Frame {
        loop {
            if let Some(frame) = decode_frame(&self.buf[..]).expect("client sent a corrupt frame") {
                self.buf.advance(frame.consumed);
                return frame;
            }
            let n = self.stream.read_buf(&mut self.buf).await.expect("server read failed");
            assert!(n > 0, "client closed the connection");
        }
    }

    pub async fn respond(&mut self, id: u32, payload: &[u8]) {
        let frame = encode_frame(id, payload).unwrap();
        self.write_raw(&frame).await;
    }

    pub async fn respond_json(&mut self, id: u32, value: &Value) {
        self.respond(id, &msgpack(value)).await;
    }

    pub async fn write_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
        self.stream.flush().await.unwrap();
    }

    /// Read until the client closes its side; returns the bytes seen.
    pub async fn read_to_end(&mut self) -> Vec<u8> {
        let mut rest = Vec::new();
        self.stream.read_to_end(&mut rest).await.unwrap();
        rest
    }
}

pub fn pair() -> (DuplexConnector, FakeServer) {
    pair_with_capacity(64 * 1024)
}

/// A pair whose pipe holds at most `capacity` unread bytes.
pub fn pair_with_capacity(capacity: usize) -> (DuplexConnector, FakeServer) {
    let (client, server) = tokio::io::duplex(capacity);
    (
        DuplexConnector {
            stream: Mutex::new(Some(client)),
        },
        FakeServer {
            stream: server,
            buf: BytesMut::new(),
        },
    )
}

pub fn mux_with_server(options: MuxOptions) -> (RequestMultiplexer<DuplexConnector>, FakeServer) {
    let (connector, server) = pair();
    (RequestMultiplexer::new(connector, options), server)
}

pub fn msgpack(value: &Value) -> Vec<u8> {
    encode_payload(value).unwrap()
}

/// Wait until `mux` has `count` requests parked.
pub async fn wait_for_pending(mux: &RequestMultiplexer<DuplexConnector>, count: usize) {
    for _ in 0..500 {
        if mux.pending_count() == count {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }
    panic!("expected {} pending requests, have {}", count, mux.pending_count());
}
