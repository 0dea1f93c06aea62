//! The single authority over connection membership and fan-out.
//!
//! A [`Hub`] owns the membership set outright and runs as one task. Every
//! mutation (register, unregister, broadcast, shutdown) arrives as a
//! [`Command`] on one ordered queue, so the set is never shared and never
//! locked. Callers talk to the loop through a cloneable [`HubHandle`].
//!
//! Delivery into a member's mailbox is always a non-blocking `try_send`. A
//! member whose mailbox is full is evicted on the spot, exactly as if it had
//! unregistered: a slow consumer drops itself instead of stalling everyone.

use std::{
    collections::{HashMap, VecDeque},
    num::NonZeroUsize,
    sync::Arc,
};

use anyhow::{Context, Result};
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        oneshot,
    },
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::envelope::{ConnectionId, Envelope};

/// Receiving half of a member's bounded mailbox.
///
/// The hub holds the only sending half; once the hub drops it the mailbox
/// yields whatever is still queued and then `None`.
pub type Mailbox = mpsc::Receiver<Arc<Envelope>>;

type Outbox = mpsc::Sender<Arc<Envelope>>;

/// A ticket to join the hub: an identity plus the only sending half of its
/// mailbox. Registering moves it into the hub, and it is destroyed when the
/// member leaves, so a departed identity cannot be registered again.
pub struct Registration {
    id: ConnectionId,
    outbox: Outbox,
}

impl Registration {
    pub fn new(id: ConnectionId, capacity: NonZeroUsize) -> (Self, Mailbox) {
        let (outbox, mailbox) = mpsc::channel(capacity.get());
        (Self { id, outbox }, mailbox)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

enum Command {
    Register(Registration),
    Unregister(ConnectionId),
    Broadcast(Envelope),
    Members {
        respond_to: oneshot::Sender<Vec<ConnectionId>>,
    },
    Shutdown,
}

/// Cloneable entry point to a running [`Hub`].
///
/// None of the operations report failure: if the hub has already stopped,
/// the command is dropped and logged at debug level.
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<Command>,
}

impl HubHandle {
    pub async fn register(&self, registration: Registration) {
        self.submit(Command::Register(registration)).await;
    }

    pub async fn unregister(&self, id: ConnectionId) {
        self.submit(Command::Unregister(id)).await;
    }

    pub async fn broadcast(&self, envelope: Envelope) {
        self.submit(Command::Broadcast(envelope)).await;
    }

    /// Tells every member the hub is going away, closes all mailboxes, and
    /// stops the loop. Commands queued behind it are discarded.
    pub async fn shutdown(&self) {
        self.submit(Command::Shutdown).await;
    }

    /// Snapshot of the current members, answered in command order.
    pub async fn members(&self) -> Result<Vec<ConnectionId>> {
        let (respond_to, response) = oneshot::channel();
        self.commands
            .send(Command::Members { respond_to })
            .await
            .context("hub is not running")?;
        response.await.context("hub stopped before answering")
    }

    async fn submit(&self, command: Command) {
        if self.commands.send(command).await.is_err() {
            debug!("hub stopped; dropping command");
        }
    }
}

pub struct Hub {
    members: HashMap<ConnectionId, Outbox>,
    commands: mpsc::Receiver<Command>,
}

impl Hub {
    pub fn new(command_capacity: NonZeroUsize) -> (Self, HubHandle) {
        let (commands_tx, commands) = mpsc::channel(command_capacity.get());
        let hub = Self {
            members: HashMap::new(),
            commands,
        };
        (hub, HubHandle { commands: commands_tx })
    }

    /// Builds a hub and runs its loop on a new task.
    pub fn spawn(command_capacity: NonZeroUsize) -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Self::new(command_capacity);
        (handle, tokio::spawn(hub.run()))
    }

    /// Processes commands one at a time until shutdown or until every
    /// handle is dropped. Members still present at exit have their
    /// mailboxes closed.
    pub async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            match command {
                Command::Register(registration) => self.register(registration),
                Command::Unregister(id) => self.unregister(id),
                Command::Broadcast(envelope) => self.broadcast(envelope),
                Command::Members { respond_to } => {
                    let _ = respond_to.send(self.members.keys().copied().collect());
                }
                Command::Shutdown => {
                    self.shut_down();
                    break;
                }
            }
        }
        debug!(remaining = self.members.len(), "hub loop finished");
    }

    fn register(&mut self, registration: Registration) {
        let Registration { id, outbox } = registration;
        if self.members.contains_key(&id) {
            warn!(connection = %id, "rejecting duplicate registration");
            return;
        }

        self.members.insert(id, outbox);
        info!(connection = %id, members = self.members.len(), "connection joined");
        self.fan_out(Envelope::joined(), Some(id));
    }

    fn unregister(&mut self, id: ConnectionId) {
        if self.members.remove(&id).is_none() {
            debug!(connection = %id, "ignoring unregister for non-member");
            return;
        }

        info!(connection = %id, members = self.members.len(), "connection left");
        self.fan_out(Envelope::left(), None);
    }

    /// Fans `envelope` out to every member. Messages from a connection that
    /// is no longer a member (evicted, draining, or never registered) are
    /// dropped; notices always go out.
    fn broadcast(&mut self, envelope: Envelope) {
        if let Some(sender) = envelope.sender() {
            if !self.members.contains_key(&sender) {
                debug!(connection = %sender, "dropping broadcast from non-member");
                return;
            }
        }
        self.fan_out(envelope, None);
    }

    fn shut_down(&mut self) {
        info!(members = self.members.len(), "hub shutting down");
        self.fan_out(Envelope::shutdown(), None);
        self.members.clear();
    }

    /// Delivers `envelope` to every member except `skip`. Members that cannot
    /// take it are evicted, and each eviction queues a "left" notice for the
    /// members that remain, which may in turn evict more.
    fn fan_out(&mut self, envelope: Envelope, skip: Option<ConnectionId>) {
        let mut pending = VecDeque::from([(Arc::new(envelope), skip)]);

        while let Some((envelope, skip)) = pending.pop_front() {
            let evicted: Vec<ConnectionId> = self
                .members
                .iter()
                .filter(|(id, _)| Some(**id) != skip)
                .filter_map(|(id, outbox)| match outbox.try_send(Arc::clone(&envelope)) {
                    Ok(()) => None,
                    Err(TrySendError::Full(_)) => {
                        warn!(connection = %id, "mailbox full; evicting slow connection");
                        Some(*id)
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!(connection = %id, "mailbox already closed; evicting");
                        Some(*id)
                    }
                })
                .collect();

            for id in evicted {
                self.members.remove(&id);
                pending.push_back((Arc::new(Envelope::left()), None));
            }
        }
    }
}
