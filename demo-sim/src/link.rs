//! Lossy, recording wrapper around a loopback transport.

use std::io;

use codec::{ClientId, LoopbackTransport, Transport, WireLimits};
use wire::{decode_message, MessageKind};

/// Deterministic linear congruential generator.
#[derive(Debug, Clone)]
pub struct Rng {
    state: u64,
}

impl Rng {
    pub const fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub fn next_u32(&mut self) -> u32 {
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (self.state >> 32) as u32
    }

    /// `true` with probability `percent / 100`.
    pub fn chance(&mut self, percent: u32) -> bool {
        percent > 0 && self.next_u32() % 100 < percent
    }

    pub fn range_f32(&mut self, min: f32, max: f32) -> f32 {
        let unit = f64::from(self.next_u32()) / f64::from(u32::MAX);
        min + (max - min) * unit as f32
    }
}

/// Drops a share of outgoing messages and optionally keeps every message
/// received.
///
/// Registry messages are never dropped.
#[derive(Debug)]
pub struct SimLink {
    inner: LoopbackTransport,
    rng: Rng,
    loss_percent: u32,
    dropped: u64,
    recorded: Option<Vec<Vec<u8>>>,
}

impl SimLink {
    pub const fn new(inner: LoopbackTransport, seed: u64, loss_percent: u32) -> Self {
        Self {
            inner,
            rng: Rng::new(seed),
            loss_percent,
            dropped: 0,
            recorded: None,
        }
    }

    #[must_use]
    pub fn recording(mut self) -> Self {
        self.recorded = Some(Vec::new());
        self
    }

    pub fn set_loss_percent(&mut self, loss_percent: u32) {
        self.loss_percent = loss_percent;
    }

    pub const fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Messages received so far, oldest first.
    pub fn recorded(&self) -> &[Vec<u8>] {
        self.recorded.as_deref().unwrap_or_default()
    }
}

impl Transport for SimLink {
    fn send(&mut self, to: ClientId, bytes: &[u8]) -> io::Result<()> {
        let registry = decode_message(bytes, &WireLimits::default())
            .is_ok_and(|message| message.header.kind == MessageKind::Registry);
        if !registry && self.rng.chance(self.loss_percent) {
            self.dropped += 1;
            log::trace!("dropped {} bytes to {to}", bytes.len());
            return Ok(());
        }
        self.inner.send(to, bytes)
    }

    fn try_receive(&mut self) -> io::Result<Option<(ClientId, Vec<u8>)>> {
        let received = self.inner.try_receive()?;
        if let (Some(recorded), Some((_, bytes))) = (self.recorded.as_mut(), received.as_ref()) {
            recorded.push(bytes.clone());
        }
        Ok(received)
    }
}
