//! Peer connection management
//!
//! The contact map is owned by a single worker task. Signaling callbacks,
//! calls and logout are all queued as commands, so no two writers ever race
//! on the map.

use super::connection::{Contact, PeerConnectionClient, PeerConnectionContext, PeerConnectionFactory};
use crate::context::SharedContext;
use crate::signaling::{
    FaultSink, IceCandidate, RoomParameters, SessionDescription, SignalingChannel,
    SignalingListener,
};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type Connection = Arc<dyn PeerConnectionClient>;

enum Command {
    RoomJoined {
        params: RoomParameters,
        reply: oneshot::Sender<Result<()>>,
    },
    RemoteDescription {
        contact: Contact,
        description: SessionDescription,
    },
    RemoteCandidate {
        contact: Contact,
        candidate: IceCandidate,
    },
    RemoteCandidatesRemoved {
        contact: Contact,
        candidates: Vec<IceCandidate>,
    },
    Call {
        contact: Contact,
        with_video: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    Renegotiate {
        with_video: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    TakeActive {
        reply: oneshot::Sender<Option<Connection>>,
    },
    TakeAll {
        reply: oneshot::Sender<Vec<Connection>>,
    },
    Get {
        contact: Contact,
        reply: oneshot::Sender<Option<Connection>>,
    },
    Contacts {
        reply: oneshot::Sender<Vec<Contact>>,
    },
}

/// Owns one peer connection per contact
pub struct PeerConnectionManager {
    tx: mpsc::UnboundedSender<Command>,
    signaling: Arc<dyn SignalingChannel>,
    worker: JoinHandle<()>,
}

struct Worker {
    connections: HashMap<Contact, Connection>,
    active: Option<Contact>,
    local: Option<Contact>,
    factory: Arc<dyn PeerConnectionFactory>,
    stream: SharedContext,
    signaling: Arc<dyn SignalingChannel>,
    faults: Option<FaultSink>,
}

impl PeerConnectionManager {
    /// Spawn the worker task. Must be called inside a Tokio runtime.
    pub fn new(
        factory: Arc<dyn PeerConnectionFactory>,
        stream: SharedContext,
        signaling: Arc<dyn SignalingChannel>,
        faults: Option<FaultSink>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        let worker = Worker {
            connections: HashMap::new(),
            active: None,
            local: None,
            factory,
            stream,
            signaling: signaling.clone(),
            faults,
        };

        Self {
            tx,
            signaling,
            worker: tokio::spawn(worker.run(rx)),
        }
    }

    fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| Error::PeerConnection("Peer manager has shut down".to_string()))
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.send(command(reply))?;
        rx.await
            .map_err(|_| Error::PeerConnection("Peer manager dropped the request".to_string()))
    }

    /// Call a contact, creating its connection if needed
    pub async fn call(&self, contact: Contact, with_video: bool) -> Result<()> {
        self.request(|reply| Command::Call {
            contact,
            with_video,
            reply,
        })
        .await?
    }

    /// Send a fresh offer on the local publisher connection, e.g. after the
    /// camera or screen share was enabled
    pub async fn renegotiate(&self, with_video: bool) -> Result<()> {
        self.request(|reply| Command::Renegotiate { with_video, reply })
            .await?
    }

    /// Join `room` as `as_contact` and create the local publisher connection
    pub async fn login(&self, as_contact: &Contact, room: &str) -> Result<()> {
        info!("Logging in to room {} as {}", room, as_contact);
        let params = self.signaling.join_room(as_contact, room).await?;
        self.on_room_joined(params).await
    }

    /// Close the active call and leave the room.
    ///
    /// The logout runs even when closing the active connection fails.
    pub async fn hangup(&self) -> Result<()> {
        let active = self.request(|reply| Command::TakeActive { reply }).await?;

        let close = async {
            match &active {
                Some(connection) => connection.close().await.map_err(|e| {
                    warn!("Failed to close peer connection {}: {}", connection.contact(), e);
                    e
                }),
                None => Ok(()),
            }
        };

        let (closed, logged_out) = tokio::join!(close, self.logout());
        closed.and(logged_out)
    }

    /// Close every connection and leave the room.
    ///
    /// The map is empty once this returns, even when a close or the room
    /// leave failed. The first failure is reported.
    pub async fn logout(&self) -> Result<()> {
        let connections = self.request(|reply| Command::TakeAll { reply }).await?;
        info!("Closing {} peer connections", connections.len());

        let closes = join_all(connections.iter().map(|c| async move {
            let result = c.close().await;
            if let Err(e) = &result {
                warn!("Failed to close peer connection {}: {}", c.contact(), e);
            }
            result
        }));

        let (results, left) = tokio::join!(closes, self.signaling.leave_room());
        if let Err(e) = &left {
            warn!("Failed to leave room: {}", e);
        }

        results.into_iter().chain(std::iter::once(left)).collect()
    }

    pub async fn connection(&self, contact: &Contact) -> Result<Option<Connection>> {
        let contact = contact.clone();
        self.request(|reply| Command::Get { contact, reply }).await
    }

    pub async fn contacts(&self) -> Result<Vec<Contact>> {
        self.request(|reply| Command::Contacts { reply }).await
    }
}

impl Drop for PeerConnectionManager {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

#[async_trait]
impl SignalingListener for PeerConnectionManager {
    async fn on_room_joined(&self, params: RoomParameters) -> Result<()> {
        self.request(|reply| Command::RoomJoined { params, reply })
            .await?
    }

    fn on_remote_session_description(&self, contact: Contact, description: SessionDescription) {
        if self
            .send(Command::RemoteDescription {
                contact,
                description,
            })
            .is_err()
        {
            warn!("Dropping remote session description, peer manager has shut down");
        }
    }

    fn on_remote_ice_candidate(&self, contact: Contact, candidate: IceCandidate) {
        let _ = self.send(Command::RemoteCandidate { contact, candidate });
    }

    fn on_remote_ice_candidates_removed(&self, contact: Contact, candidates: Vec<IceCandidate>) {
        let _ = self.send(Command::RemoteCandidatesRemoved {
            contact,
            candidates,
        });
    }
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            self.handle(command).await;
        }
        debug!("Peer manager worker terminated");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::RoomJoined { params, reply } => {
                let _ = reply.send(self.room_joined(params).await);
            }
            Command::RemoteDescription {
                contact,
                description,
            } => {
                if let Err(e) = self.remote_description(contact, description).await {
                    warn!("Set remote session description failed: {}", e);
                }
            }
            Command::RemoteCandidate { contact, candidate } => {
                // Candidates for unknown contacts are dropped.
                if let Some(connection) = self.connections.get(&contact) {
                    if let Err(e) = connection.add_ice_candidate(candidate).await {
                        warn!("Add ICE candidate for {} failed: {}", contact, e);
                    }
                }
            }
            Command::RemoteCandidatesRemoved {
                contact,
                candidates,
            } => {
                if let Some(connection) = self.connections.get(&contact) {
                    if let Err(e) = connection.remove_ice_candidates(candidates).await {
                        warn!("Remove ICE candidates for {} failed: {}", contact, e);
                    }
                }
            }
            Command::Call {
                contact,
                with_video,
                reply,
            } => {
                let _ = reply.send(self.call(contact, with_video).await);
            }
            Command::Renegotiate { with_video, reply } => {
                let result = match self.local.as_ref().and_then(|c| self.connections.get(c)) {
                    Some(connection) => connection.init_call(with_video).await,
                    None => Err(Error::PeerNotFound("local publisher".to_string())),
                };
                let _ = reply.send(result);
            }
            Command::TakeActive { reply } => {
                let connection = self
                    .active
                    .take()
                    .and_then(|contact| self.connections.remove(&contact));
                let _ = reply.send(connection);
            }
            Command::TakeAll { reply } => {
                self.active = None;
                self.local = None;
                let connections = self.connections.drain().map(|(_, c)| c).collect();
                let _ = reply.send(connections);
            }
            Command::Get { contact, reply } => {
                let _ = reply.send(self.connections.get(&contact).cloned());
            }
            Command::Contacts { reply } => {
                let _ = reply.send(self.connections.keys().cloned().collect());
            }
        }
    }

    async fn get_or_create(&mut self, contact: &Contact) -> Result<Connection> {
        if let Some(connection) = self.connections.get(contact) {
            return Ok(connection.clone());
        }

        let connection = self
            .factory
            .create(PeerConnectionContext {
                contact: contact.clone(),
                stream: self.stream.clone(),
                signaling: self.signaling.clone(),
                faults: self.faults.clone(),
            })
            .await?;

        self.connections.insert(contact.clone(), connection.clone());
        debug!("Added peer connection for {}", contact);

        Ok(connection)
    }

    async fn room_joined(&mut self, params: RoomParameters) -> Result<()> {
        info!(
            "Joined room as participant {} ({})",
            params.participant_id, params.display_name
        );

        self.stream.write().ice_servers = params.ice_servers.clone();

        let contact = Contact::new(params.participant_id.to_string(), params.display_name);

        // A rejoin after reconnection replaces the previous publisher connection.
        if let Some(previous) = self.local.take().filter(|c| *c != contact) {
            if let Some(stale) = self.connections.remove(&previous) {
                if let Err(e) = stale.close().await {
                    warn!("Close peer connection failed: {}", e);
                }
            }
        }

        let connection = self.get_or_create(&contact).await?;
        self.local = Some(contact);

        if params.initiator {
            let with_video = self.stream.read().video.send_video;
            connection.init_call(with_video).await?;
        }

        Ok(())
    }

    async fn remote_description(
        &mut self,
        contact: Contact,
        description: SessionDescription,
    ) -> Result<()> {
        let connection = if description.is_offer() {
            self.get_or_create(&contact).await?
        } else {
            // Answers may race ahead of a hangup.
            match self.connections.get(&contact) {
                Some(connection) => connection.clone(),
                None => {
                    debug!("Dropping answer for unknown contact {}", contact);
                    return Ok(());
                }
            }
        };

        connection.set_session_description(description).await
    }

    async fn call(&mut self, contact: Contact, with_video: bool) -> Result<()> {
        let connection = self.get_or_create(&contact).await?;
        connection.init_call(with_video).await?;
        self.active = Some(contact);
        Ok(())
    }
}
