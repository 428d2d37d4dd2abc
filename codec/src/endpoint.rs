//! Server and client endpoints: the codec driven over a [`Transport`].

use std::fmt;
use std::io;

use crate::error::{CodecError, LimitKind};
use crate::receiver::{ReceiveEvent, Received, Receiver};
use crate::transmitter::{EncodedFrame, Transmitter};
use crate::transport::{Transport, SERVER};
use crate::types::ClientId;
use crate::NetworkObject;

/// Why a connection was torn down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The peer sent something that could not be applied.
    Protocol(CodecError),
    /// The peer stopped acknowledging frames.
    Unresponsive,
    /// Local code asked for the disconnect.
    Requested,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol(e) => write!(f, "protocol error: {e}"),
            Self::Unresponsive => write!(f, "too many unacknowledged frames"),
            Self::Requested => write!(f, "disconnect requested"),
        }
    }
}

/// Result type for endpoint operations.
pub type EndpointResult<T> = Result<T, EndpointError>;

/// Errors raised by endpoints.
#[derive(Debug)]
pub enum EndpointError {
    Codec(CodecError),
    Transport(io::Error),
}

impl fmt::Display for EndpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Codec(e) => write!(f, "codec error: {e}"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
        }
    }
}

impl std::error::Error for EndpointError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Codec(e) => Some(e),
            Self::Transport(e) => Some(e),
        }
    }
}

impl From<CodecError> for EndpointError {
    fn from(err: CodecError) -> Self {
        Self::Codec(err)
    }
}

impl From<io::Error> for EndpointError {
    fn from(err: io::Error) -> Self {
        Self::Transport(err)
    }
}

/// Transmitter side of a session.
///
/// Each tick drains acknowledgements, then encodes and sends one frame per
/// connected client. Clients that misbehave are dropped and reported through
/// [`take_disconnects`](Self::take_disconnects).
#[derive(Debug)]
pub struct ServerEndpoint<T> {
    transmitter: Transmitter,
    transport: T,
    disconnects: Vec<(ClientId, DisconnectReason)>,
}

impl<T: Transport> ServerEndpoint<T> {
    pub fn new(transmitter: Transmitter, transport: T) -> Self {
        Self {
            transmitter,
            transport,
            disconnects: Vec::new(),
        }
    }

    pub fn transmitter(&self) -> &Transmitter {
        &self.transmitter
    }

    pub fn transmitter_mut(&mut self) -> &mut Transmitter {
        &mut self.transmitter
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Registers a client and sends it the registry description.
    pub fn connect(&mut self, client: ClientId) -> EndpointResult<()> {
        self.transmitter.add_client(client)?;
        let registry = self.transmitter.encode_registry_message()?;
        self.transport.send(client, &registry)?;
        Ok(())
    }

    /// Drops a client. Returns `false` if it was not connected.
    pub fn disconnect(&mut self, client: ClientId, reason: DisconnectReason) -> bool {
        if !self.transmitter.remove_client(client) {
            return false;
        }
        log::info!("disconnecting {client}: {reason}");
        self.disconnects.push((client, reason));
        true
    }

    /// Disconnects since the last call.
    pub fn take_disconnects(&mut self) -> Vec<(ClientId, DisconnectReason)> {
        std::mem::take(&mut self.disconnects)
    }

    /// Runs one tick for every client and returns the frames sent.
    pub fn tick(&mut self) -> EndpointResult<Vec<EncodedFrame>> {
        self.tick_filtered(&|_, _| true)
    }

    /// Runs one tick, skipping objects the filter deems irrelevant.
    ///
    /// Every frame that encodes is sent. Clients over the unacknowledged
    /// frame limit are disconnected; any other failure is returned after the
    /// remaining frames went out.
    pub fn tick_filtered(
        &mut self,
        filter: &dyn Fn(ClientId, &NetworkObject) -> bool,
    ) -> EndpointResult<Vec<EncodedFrame>> {
        self.drain_acks()?;

        let pass = self.transmitter.encode_all_filtered(filter)?;
        for frame in &pass.frames {
            self.transport.send(frame.client, &frame.bytes)?;
        }
        let mut failure = None;
        for (client, e) in pass.failed {
            match e {
                CodecError::LimitsExceeded {
                    kind: LimitKind::UnackedFrames,
                    ..
                } => {
                    self.disconnect(client, DisconnectReason::Unresponsive);
                }
                e => {
                    failure.get_or_insert(e);
                }
            }
        }
        match failure {
            Some(e) => Err(e.into()),
            None => Ok(pass.frames),
        }
    }

    fn drain_acks(&mut self) -> EndpointResult<()> {
        while let Some((from, bytes)) = self.transport.try_receive()? {
            if !self.transmitter.has_client(from) {
                log::debug!("ignoring {} bytes from unknown {from}", bytes.len());
                continue;
            }
            if let Err(e) = self.transmitter.handle_ack_message(from, &bytes) {
                log::warn!("bad ack from {from}: {e}");
                self.disconnect(from, DisconnectReason::Protocol(e));
            }
        }
        Ok(())
    }
}

/// Receiver side of a session.
///
/// Applies everything the server sent and acknowledges each applied frame.
/// A message that cannot be applied ends the session.
#[derive(Debug)]
pub struct ClientEndpoint<T> {
    receiver: Receiver,
    transport: T,
    disconnected: Option<DisconnectReason>,
}

impl<T: Transport> ClientEndpoint<T> {
    pub fn new(receiver: Receiver, transport: T) -> Self {
        Self {
            receiver,
            transport,
            disconnected: None,
        }
    }

    pub fn receiver(&self) -> &Receiver {
        &self.receiver
    }

    pub fn receiver_mut(&mut self) -> &mut Receiver {
        &mut self.receiver
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Set once the session has ended.
    pub fn disconnect_reason(&self) -> Option<&DisconnectReason> {
        self.disconnected.as_ref()
    }

    /// Applies every pending message and returns the resulting events.
    pub fn poll(&mut self) -> EndpointResult<Vec<ReceiveEvent>> {
        let mut events = Vec::new();
        if self.disconnected.is_some() {
            return Ok(events);
        }
        while let Some((from, bytes)) = self.transport.try_receive()? {
            if from != SERVER {
                log::debug!("ignoring {} bytes from {from}", bytes.len());
                continue;
            }
            match self.receiver.apply_message(&bytes) {
                Ok(Received::Frame(frame)) => {
                    let ack = self.receiver.encode_ack(frame.sequence)?;
                    self.transport.send(SERVER, &ack)?;
                    events.extend(frame.events);
                }
                Ok(Received::Registry { .. } | Received::Stale { .. }) => {}
                Err(e) => {
                    log::warn!("closing session: {e}");
                    self.disconnected = Some(DisconnectReason::Protocol(e.clone()));
                    return Err(e.into());
                }
            }
        }
        Ok(events)
    }
}
