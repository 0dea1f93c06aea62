//! One managed duplex transport and the two loops that serve it.
//!
//! The inbound loop turns every frame read from the peer into an
//! [`Envelope`] broadcast through the hub. The outbound loop drains the
//! connection's mailbox onto the transport. Either loop failing submits a
//! single unregister for the connection. Once the hub closes the mailbox
//! the inbound loop stops reading, and the outbound loop flushes what is
//! queued, sends a close frame, and stops.

use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{Context, Result};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::{select, sync::watch, task::JoinHandle, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::ConnectionSettings,
    envelope::{ConnectionId, Envelope},
    hub::{HubHandle, Mailbox, Registration},
    transport::Frame,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport ready, not yet submitted to the hub.
    Connecting,
    /// Registered; both loops running.
    Active,
    /// The hub closed the mailbox; queued envelopes are being flushed.
    Draining,
    /// Both loops finished. Terminal.
    Closed,
}

/// A transport that has not joined a hub yet.
pub struct Connection<K, S> {
    id: ConnectionId,
    sink: K,
    stream: S,
    settings: ConnectionSettings,
}

impl<K, S> Connection<K, S>
where
    K: Sink<Frame, Error = io::Error> + Send + Unpin + 'static,
    S: Stream<Item = io::Result<Frame>> + Send + Unpin + 'static,
{
    pub fn new(sink: K, stream: S, settings: ConnectionSettings) -> Self {
        Self {
            id: ConnectionId::random(),
            sink,
            stream,
            settings,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Registers with `hub` and starts the inbound and outbound loops.
    ///
    /// Registration is submitted before either loop runs, so anything this
    /// connection broadcasts is ordered after its own join.
    pub async fn start(self, hub: &HubHandle) -> ConnectionHandle {
        let Connection {
            id,
            sink,
            stream,
            settings,
        } = self;

        let (registration, mailbox) = Registration::new(id, settings.mailbox_capacity);
        let (state_tx, state) = watch::channel(ConnectionState::Connecting);
        hub.register(registration).await;
        state_tx.send_replace(ConnectionState::Active);

        let state_tx = Arc::new(state_tx);
        let departure = Arc::new(Departure::new(id, hub.clone()));
        let finished = CancellationToken::new();

        let outbound = tokio::spawn(run_outbound(
            id,
            sink,
            mailbox,
            Arc::clone(&state_tx),
            Arc::clone(&departure),
            finished.clone(),
            settings.write_timeout,
        ));

        let hub = hub.clone();
        let task = tokio::spawn(async move {
            run_inbound(id, stream, &hub, &departure, &finished, settings.idle_timeout).await;
            if let Err(err) = outbound.await {
                warn!(connection = %id, error = ?err, "outbound loop panicked");
            }
            state_tx.send_replace(ConnectionState::Closed);
            info!(connection = %id, "connection closed");
        });

        ConnectionHandle { id, state, task }
    }
}

/// Observes a started connection.
pub struct ConnectionHandle {
    id: ConnectionId,
    state: watch::Receiver<ConnectionState>,
    task: JoinHandle<()>,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Waits until both loops have finished.
    pub async fn closed(self) -> Result<()> {
        self.task.await.context("connection task panicked")
    }
}

/// Submits at most one unregister for a connection, whichever loop fails first.
struct Departure {
    id: ConnectionId,
    hub: HubHandle,
    submitted: AtomicBool,
}

impl Departure {
    fn new(id: ConnectionId, hub: HubHandle) -> Self {
        Self {
            id,
            hub,
            submitted: AtomicBool::new(false),
        }
    }

    async fn leave(&self) {
        if !self.submitted.swap(true, Ordering::AcqRel) {
            self.hub.unregister(self.id).await;
        }
    }
}

async fn run_inbound<S>(
    id: ConnectionId,
    mut stream: S,
    hub: &HubHandle,
    departure: &Departure,
    finished: &CancellationToken,
    idle_timeout: Option<Duration>,
) where
    S: Stream<Item = io::Result<Frame>> + Unpin,
{
    loop {
        let frame = select! {
            _ = finished.cancelled() => break,
            frame = read_frame(&mut stream, idle_timeout) => frame,
        };

        let text = match frame {
            Ok(Some(Frame::Text(text))) => text,
            Ok(Some(Frame::Binary(bytes))) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(err) => {
                    debug!(connection = %id, error = ?err, "binary frame is not utf-8");
                    break;
                }
            },
            Ok(Some(Frame::Close)) | Ok(None) => {
                debug!(connection = %id, "peer closed the transport");
                break;
            }
            Err(err) => {
                debug!(connection = %id, error = ?err, "read failed");
                break;
            }
        };

        hub.broadcast(Envelope::message(id, text)).await;
    }

    departure.leave().await;
}

async fn read_frame<S>(stream: &mut S, idle_timeout: Option<Duration>) -> io::Result<Option<Frame>>
where
    S: Stream<Item = io::Result<Frame>> + Unpin,
{
    let next = match idle_timeout {
        Some(limit) => timeout(limit, stream.next())
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "no frame within idle timeout"))?,
        None => stream.next().await,
    };
    next.transpose()
}

async fn run_outbound<K>(
    id: ConnectionId,
    mut sink: K,
    mut mailbox: Mailbox,
    state: Arc<watch::Sender<ConnectionState>>,
    departure: Arc<Departure>,
    finished: CancellationToken,
    write_timeout: Duration,
) where
    K: Sink<Frame, Error = io::Error> + Unpin,
{
    let mut failed = false;

    while let Some(envelope) = mailbox.recv().await {
        if mailbox.is_closed() {
            mark_draining(&state);
            finished.cancel();
        }

        let written = match envelope.to_json() {
            Ok(json) => write_frame(&mut sink, Frame::Text(json), write_timeout).await,
            Err(err) => Err(err),
        };
        if let Err(err) = written {
            debug!(connection = %id, error = ?err, "write failed");
            departure.leave().await;
            failed = true;
            break;
        }
    }

    if !failed {
        mark_draining(&state);
        if let Err(err) = write_frame(&mut sink, Frame::Close, write_timeout).await {
            debug!(connection = %id, error = ?err, "failed to send close frame");
        }
    }

    finished.cancel();
}

fn mark_draining(state: &watch::Sender<ConnectionState>) {
    state.send_if_modified(|current| {
        let draining = *current == ConnectionState::Active;
        if draining {
            *current = ConnectionState::Draining;
        }
        draining
    });
}

async fn write_frame<K>(sink: &mut K, frame: Frame, limit: Duration) -> io::Result<()>
where
    K: Sink<Frame, Error = io::Error> + Unpin,
{
    timeout(limit, sink.send(frame))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "write deadline exceeded"))?
}
