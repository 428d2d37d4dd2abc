//! Transport seam and an in-memory loopback implementation.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::types::ClientId;

/// Address the server endpoint uses on a transport.
pub const SERVER: ClientId = ClientId::new(0);

/// Moves whole messages between peers.
///
/// Messages are assumed to arrive in order; loss is tolerated by the codec
/// under the default snapshot policy.
pub trait Transport {
    /// Queues `bytes` for delivery to `to`.
    fn send(&mut self, to: ClientId, bytes: &[u8]) -> io::Result<()>;

    /// Returns the next received message and its sender, if any.
    fn try_receive(&mut self) -> io::Result<Option<(ClientId, Vec<u8>)>>;
}

type Inboxes = HashMap<ClientId, VecDeque<(ClientId, Vec<u8>)>>;

/// In-memory network routing messages between loopback endpoints.
#[derive(Debug, Clone, Default)]
pub struct LoopbackNetwork {
    inboxes: Arc<Mutex<Inboxes>>,
}

impl LoopbackNetwork {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the endpoint for `address`, replacing any earlier inbox.
    pub fn endpoint(&self, address: ClientId) -> io::Result<LoopbackTransport> {
        self.lock()?.insert(address, VecDeque::new());
        Ok(LoopbackTransport {
            address,
            network: self.clone(),
        })
    }

    /// Messages waiting for `address`.
    pub fn pending(&self, address: ClientId) -> io::Result<usize> {
        Ok(self.lock()?.get(&address).map_or(0, VecDeque::len))
    }

    fn lock(&self) -> io::Result<MutexGuard<'_, Inboxes>> {
        self.inboxes
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "loopback network poisoned"))
    }
}

/// One peer's handle on a [`LoopbackNetwork`].
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    address: ClientId,
    network: LoopbackNetwork,
}

impl LoopbackTransport {
    #[must_use]
    pub const fn address(&self) -> ClientId {
        self.address
    }
}

impl Transport for LoopbackTransport {
    fn send(&mut self, to: ClientId, bytes: &[u8]) -> io::Result<()> {
        let mut inboxes = self.network.lock()?;
        let inbox = inboxes.get_mut(&to).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, format!("no loopback endpoint for {to}"))
        })?;
        inbox.push_back((self.address, bytes.to_vec()));
        Ok(())
    }

    fn try_receive(&mut self) -> io::Result<Option<(ClientId, Vec<u8>)>> {
        let mut inboxes = self.network.lock()?;
        Ok(inboxes
            .get_mut(&self.address)
            .and_then(VecDeque::pop_front))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_arrive_in_order_with_sender() {
        let network = LoopbackNetwork::new();
        let mut server = network.endpoint(SERVER).unwrap();
        let mut client = network.endpoint(ClientId::new(7)).unwrap();

        server.send(ClientId::new(7), b"one").unwrap();
        server.send(ClientId::new(7), b"two").unwrap();
        assert_eq!(network.pending(ClientId::new(7)).unwrap(), 2);

        assert_eq!(
            client.try_receive().unwrap(),
            Some((SERVER, b"one".to_vec()))
        );
        assert_eq!(
            client.try_receive().unwrap(),
            Some((SERVER, b"two".to_vec()))
        );
        assert_eq!(client.try_receive().unwrap(), None);
    }

    #[test]
    fn send_to_unknown_address_fails() {
        let network = LoopbackNetwork::new();
        let mut server = network.endpoint(SERVER).unwrap();
        let err = server.send(ClientId::new(3), b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }
}
