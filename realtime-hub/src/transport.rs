//! The boundary between a connection's loops and its duplex transport.
//!
//! Connections only see [`Frame`]s flowing through a `Stream` (inbound) and a
//! `Sink` (outbound), both failing with `io::Error`. [`websocket`] adapts an
//! upgraded axum socket to that shape; tests plug in plain channels.

use std::io;

use axum::extract::ws::{Message, WebSocket};
use futures::{future, Sink, SinkExt, Stream, StreamExt};

/// One discrete message on the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    /// The peer asked to close, or we are telling it we are done.
    Close,
}

/// Splits an upgraded socket into an outbound frame sink and an inbound frame
/// stream. Ping and pong frames are answered by the socket itself and never
/// surface here.
pub fn websocket(
    socket: WebSocket,
) -> (
    impl Sink<Frame, Error = io::Error> + Send + Unpin + 'static,
    impl Stream<Item = io::Result<Frame>> + Send + Unpin + 'static,
) {
    let (sink, stream) = socket.split();

    let sink = sink
        .sink_map_err(io::Error::other)
        .with(|frame: Frame| future::ready(Ok::<_, io::Error>(into_message(frame))));

    let stream = stream.filter_map(|message| {
        future::ready(match message {
            Ok(message) => from_message(message).map(Ok),
            Err(err) => Some(Err(io::Error::other(err))),
        })
    });

    (sink, stream)
}

fn into_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text),
        Frame::Binary(bytes) => Message::Binary(bytes),
        Frame::Close => Message::Close(None),
    }
}

fn from_message(message: Message) -> Option<Frame> {
    match message {
        Message::Text(text) => Some(Frame::Text(text)),
        Message::Binary(bytes) => Some(Frame::Binary(bytes)),
        Message::Close(_) => Some(Frame::Close),
        Message::Ping(_) | Message::Pong(_) => None,
    }
}
