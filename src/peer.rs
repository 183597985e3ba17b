//! Fixed-capacity table of peer sessions, one per data pipe.

use heapless::Deque;
use heapless::Vec;

use crate::address::{AccessAddress, MacAddress};
use crate::config::DataPipe;
use crate::error::Fault;
use crate::fragment::Reassembler;
use crate::handshake::Handshake;
use crate::pdu::ControlPdu;
use crate::MAX_MESSAGE_SIZE;

/// Number of pipes available for peers (pipe 0 carries management traffic).
pub const MAX_PEERS: usize = 5;

const CONTROL_QUEUE: usize = 4;

/// Handle to an open socket.
///
/// Descriptors carry the generation of the slot they were issued for, so a handle
/// kept after [`close`](crate::Link::close) never reaches the slot's next owner.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Descriptor {
    slot: u8,
    generation: u16,
}

impl Descriptor {
    /// The management socket, bound to pipe 0.
    pub const MANAGEMENT: Self = Self {
        slot: u8::MAX,
        generation: 0,
    };

    /// Whether this is the management socket.
    pub fn is_management(&self) -> bool {
        self.slot == u8::MAX
    }

    /// Pipe the socket exchanges frames on.
    pub fn pipe(&self) -> DataPipe {
        if self.is_management() {
            DataPipe::DP0
        } else {
            DataPipe::from(self.slot + 1)
        }
    }

    pub(crate) fn slot(&self) -> usize {
        self.slot as usize
    }
}

/// Life cycle of a session.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectionState {
    /// Allocated, not yet listening or connecting.
    Idle,
    /// Thing waiting for a gateway's connect request.
    Listening,
    /// Gateway waiting for the thing to answer its connect request.
    Connecting(Handshake),
    /// Data flows on the pipe.
    Connected,
    /// The handshake ran out of attempts.
    Failed,
    /// The peer left or went silent.
    Disconnected,
}

#[derive(Debug)]
pub(crate) struct PeerSlot {
    pub allocated: bool,
    pub generation: u16,
    pub pipe: DataPipe,
    pub access_address: AccessAddress,
    pub peer: Option<MacAddress>,
    pub state: ConnectionState,
    pub rx: [u8; MAX_MESSAGE_SIZE],
    pub rx_len: usize,
    pub rx_ready: bool,
    pub tx: Vec<u8, MAX_MESSAGE_SIZE>,
    pub tx_attempts: u8,
    pub reassembler: Reassembler,
    pub control: Deque<ControlPdu, CONTROL_QUEUE>,
    pub fault: Option<Fault>,
    pub last_seen: u32,
    pub keepalive_sent: bool,
    pub peer_version: Option<(u8, u8)>,
}

impl PeerSlot {
    fn new(pipe: DataPipe) -> Self {
        Self {
            allocated: false,
            generation: 0,
            pipe,
            access_address: AccessAddress::MANAGEMENT,
            peer: None,
            state: ConnectionState::Idle,
            rx: [0; MAX_MESSAGE_SIZE],
            rx_len: 0,
            rx_ready: false,
            tx: Vec::new(),
            tx_attempts: 0,
            reassembler: Reassembler::new(),
            control: Deque::new(),
            fault: None,
            last_seen: 0,
            keepalive_sent: false,
            peer_version: None,
        }
    }

    /// Drops staged data and reassembly progress.
    pub fn clear_session(&mut self) {
        self.rx_len = 0;
        self.rx_ready = false;
        self.tx.clear();
        self.tx_attempts = 0;
        self.reassembler.reset();
        self.control.clear();
        self.keepalive_sent = false;
    }

    pub fn is_connected(&self) -> bool {
        self.allocated && self.state == ConnectionState::Connected
    }

    /// Queues a control PDU, returning `false` when the queue is full.
    pub fn queue_control(&mut self, pdu: ControlPdu) -> bool {
        self.control.push_back(pdu).is_ok()
    }

    /// Moves a delivered message into `out`, truncating it to fit.
    pub fn take_rx(&mut self, out: &mut [u8]) -> Option<usize> {
        if !self.rx_ready {
            return None;
        }
        let n = self.rx_len.min(out.len());
        out[..n].copy_from_slice(&self.rx[..n]);
        self.rx_len = 0;
        self.rx_ready = false;
        Some(n)
    }

    /// Records the session as torn down.
    pub fn disconnect(&mut self, fault: Fault) {
        self.clear_session();
        self.state = ConnectionState::Disconnected;
        self.fault = Some(fault);
    }
}

/// Session table with `N` slots; slot `i` owns pipe `i + 1`.
#[derive(Debug)]
pub(crate) struct PeerTable<const N: usize> {
    slots: [PeerSlot; N],
}

impl<const N: usize> PeerTable<N> {
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|i| PeerSlot::new(DataPipe::from(i as u8 + 1))),
        }
    }

    /// First free slot, lowest pipe first.
    pub fn allocate(&mut self) -> Option<Descriptor> {
        let (i, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| !slot.allocated)?;
        let generation = slot.generation;
        *slot = PeerSlot::new(slot.pipe);
        slot.allocated = true;
        slot.generation = generation;
        Some(Descriptor {
            slot: i as u8,
            generation,
        })
    }

    /// Releases the slot of `descriptor`. Stale or unknown descriptors are ignored.
    pub fn free(&mut self, descriptor: Descriptor) -> bool {
        match self.get_mut(descriptor) {
            Some(slot) => {
                slot.clear_session();
                slot.allocated = false;
                slot.generation = slot.generation.wrapping_add(1);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, descriptor: Descriptor) -> Option<&PeerSlot> {
        self.slots
            .get(descriptor.slot())
            .filter(|slot| slot.allocated && slot.generation == descriptor.generation)
    }

    pub fn get_mut(&mut self, descriptor: Descriptor) -> Option<&mut PeerSlot> {
        self.slots
            .get_mut(descriptor.slot())
            .filter(|slot| slot.allocated && slot.generation == descriptor.generation)
    }

    /// Allocated slot owning `pipe`.
    pub fn by_pipe_mut(&mut self, pipe: DataPipe) -> Option<&mut PeerSlot> {
        let index = (pipe as usize).checked_sub(1)?;
        self.slots.get_mut(index).filter(|slot| slot.allocated)
    }

    pub fn slot_mut(&mut self, index: usize) -> &mut PeerSlot {
        &mut self.slots[index]
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PeerSlot> {
        self.slots.iter_mut().filter(|slot| slot.allocated)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerSlot> {
        self.slots.iter().filter(|slot| slot.allocated)
    }

    pub fn is_connected(&self, index: usize) -> bool {
        self.slots.get(index).is_some_and(PeerSlot::is_connected)
    }

    pub fn any_connected(&self) -> bool {
        self.slots.iter().any(PeerSlot::is_connected)
    }
}
