//! Socket API of the link layer.
//!
//! A [`Link`] owns the radio and multiplexes one management socket (pipe 0, shared
//! broadcast channel) and up to five raw sockets (pipes 1-5, one peer each) on it.
//! Nothing in here blocks: every call first advances the [`Scheduler`], then works on
//! per-pipe staging buffers and returns [`Error::WouldBlock`] or [`Error::Busy`]
//! when it has to be called again.
//!
//! # Examples
//! ```ignore
//! let mut gateway = Gateway::new(radio, clock, delay, LinkConfig::gateway(own));
//! gateway.init()?;
//! let socket = gateway.socket(Protocol::Raw)?;
//! gateway.connect(socket, thing)?;
//! let peer = gateway.poll_until(5_000, 1_000, |link| link.accept(socket))?;
//! gateway.write(socket, b"hello")?;
//! ```

use embedded_hal::delay::DelayNs;
use heapless::Vec;

use crate::address::{AccessAddress, MacAddress};
use crate::clock::{elapsed, Clock};
use crate::config::{DataPipe, LinkConfig, Role};
use crate::error::{Error, Fault, FrameError};
use crate::fragment::{self, Progress};
use crate::handshake::{connect_request_for, Handshake, Step};
use crate::logging::{debug, info, trace, warn};
use crate::pdu::{
    max_message_size, ConnectRequest, ControlPdu, DataPdu, LogicalId, ManagementPdu,
    PROTOCOL_VERSION,
};
use crate::peer::{ConnectionState, Descriptor, PeerSlot, PeerTable, MAX_PEERS};
use crate::radio::{Ack, Radio};
use crate::scheduler::{Action, Scheduler, Window};
use crate::MAX_PAYLOAD_SIZE;

const FRAME_SIZE: usize = MAX_PAYLOAD_SIZE as usize;
// Frames pulled from the receive FIFO per tick
const MAX_RX_PER_TICK: usize = 8;

/// Capacity of the discovered peer list.
pub const MAX_DISCOVERED: usize = 8;
/// Capacity of the known peer list.
pub const MAX_KNOWN_PEERS: usize = 16;

/// A gateway serving up to five things.
pub type Gateway<R, C, D> = Link<R, C, D, MAX_PEERS>;
/// A thing talking to one gateway.
pub type Thing<R, C, D> = Link<R, C, D, 1>;

/// Kind of socket.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Protocol {
    /// Broadcast frames on pipe 0 of the management channel, no acknowledgement.
    Management = 0,
    /// Acknowledged, fragmented messages with one peer on its own pipe.
    Raw = 1,
}

/// Protocol number that names no [`Protocol`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UnknownProtocol(pub u8);

impl TryFrom<u8> for Protocol {
    type Error = UnknownProtocol;

    fn try_from(t: u8) -> Result<Self, Self::Error> {
        match t {
            0 => Ok(Self::Management),
            1 => Ok(Self::Raw),
            t => Err(UnknownProtocol(t)),
        }
    }
}

impl<E> From<UnknownProtocol> for Error<E> {
    fn from(_: UnknownProtocol) -> Self {
        Error::InvalidArgument
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Staged {
    // Beacon or presence, replaced by anything else
    Announcement,
    Request,
    User,
}

/// Single frame slots of the management pipe.
#[derive(Debug, Default)]
struct Management {
    rx: Option<Vec<u8, FRAME_SIZE>>,
    tx: Option<(Vec<u8, FRAME_SIZE>, Staged)>,
}

impl Management {
    fn is_busy(&self) -> bool {
        matches!(self.tx, Some((_, kind)) if kind != Staged::Announcement)
    }

    fn stage(&mut self, frame: &[u8], kind: Staged) -> bool {
        if self.is_busy() {
            return false;
        }
        match Vec::from_slice(frame) {
            Ok(frame) => {
                self.tx = Some((frame, kind));
                true
            }
            Err(()) => false,
        }
    }

    fn stage_pdu(&mut self, pdu: &ManagementPdu, kind: Staged) -> bool {
        let mut frame = [0u8; FRAME_SIZE];
        match pdu.encode(&mut frame) {
            Ok(len) => self.stage(&frame[..len], kind),
            Err(_) => false,
        }
    }
}

/// Link-layer endpoint with `N` peer slots.
///
/// Use the [`Gateway`] and [`Thing`] aliases rather than picking `N` by hand.
#[derive(Debug)]
pub struct Link<R, C, D, const N: usize> {
    radio: R,
    clock: C,
    delay: D,
    config: LinkConfig,
    initialized: bool,
    data_channel: u8,
    peers: PeerTable<N>,
    scheduler: Scheduler,
    management: Management,
    discovered: Vec<MacAddress, MAX_DISCOVERED>,
    known_peers: Vec<MacAddress, MAX_KNOWN_PEERS>,
    gateway: Option<(MacAddress, u8)>,
    last_announce: Option<u32>,
}

impl<R, C, D, const N: usize> Link<R, C, D, N>
where
    R: Radio,
    C: Clock,
    D: DelayNs,
{
    /// Creates an endpoint. Nothing touches the radio before [`init`](Self::init).
    pub fn new(radio: R, clock: C, delay: D, config: LinkConfig) -> Self {
        Self {
            radio,
            clock,
            delay,
            data_channel: config.data_channel,
            scheduler: Scheduler::new(config.management_dwell_ms, config.raw_dwell_ms),
            config,
            initialized: false,
            peers: PeerTable::new(),
            management: Management::default(),
            discovered: Vec::new(),
            known_peers: Vec::new(),
            gateway: None,
            last_announce: None,
        }
    }

    /// Validates the configuration and puts the radio on the management channel.
    ///
    /// Fails with [`Error::NotPermitted`] when called twice and with
    /// [`Error::InvalidArgument`] for a bad configuration or a slot count that does
    /// not fit the role.
    pub fn init(&mut self) -> Result<(), Error<R::Error>> {
        if self.initialized {
            return Err(Error::NotPermitted);
        }
        self.config.validate::<R::Error>()?;
        let slots_fit = match self.config.role {
            Role::Gateway => (1..=MAX_PEERS).contains(&N),
            Role::Thing => N == 1,
        };
        if !slots_fit {
            return Err(Error::InvalidArgument);
        }

        self.radio.set_standby().map_err(Error::Radio)?;
        self.radio
            .open_pipe(DataPipe::DP0, &AccessAddress::MANAGEMENT)
            .map_err(Error::Radio)?;
        self.radio
            .set_channel(self.config.management_channel)
            .map_err(Error::Radio)?;
        self.radio.set_rx_mode().map_err(Error::Radio)?;
        self.scheduler.restart();
        self.initialized = true;
        info!("link up as {:?} {}", self.config.role, self.config.address);
        Ok(())
    }

    /// Opens a socket.
    ///
    /// [`Protocol::Management`] always returns [`Descriptor::MANAGEMENT`]. A raw socket
    /// takes the first free pipe, or fails with [`Error::ResourceExhausted`].
    pub fn socket(&mut self, protocol: Protocol) -> Result<Descriptor, Error<R::Error>> {
        self.ensure_init()?;
        if protocol == Protocol::Management {
            return Ok(Descriptor::MANAGEMENT);
        }
        let descriptor = self.peers.allocate().ok_or(Error::ResourceExhausted)?;
        if self.config.role == Role::Gateway {
            // things learn their access address from the connect request
            let pipe = descriptor.pipe();
            let address = AccessAddress::for_pipe(
                self.config.access_address_seed,
                &self.config.address,
                pipe as u8,
            );
            if let Err(e) = self.radio.open_pipe(pipe, &address) {
                self.peers.free(descriptor);
                return Err(Error::Radio(e));
            }
            if let Some(slot) = self.peers.get_mut(descriptor) {
                slot.access_address = address;
            }
        }
        debug!("socket on pipe {:?}", descriptor.pipe());
        Ok(descriptor)
    }

    /// Closes a socket, abandoning staged data.
    ///
    /// A connected peer gets a best-effort disconnect notice first. Closing the
    /// management socket or an already closed one does nothing.
    pub fn close(&mut self, descriptor: Descriptor) -> Result<(), Error<R::Error>> {
        self.ensure_init()?;
        if descriptor.is_management() {
            return Ok(());
        }
        let (pipe, notify) = match self.peers.get(descriptor) {
            Some(slot) => (slot.pipe, slot.peer.filter(|_| slot.is_connected())),
            None => return Ok(()),
        };

        if let Some(peer) = notify {
            let mut frame = [0u8; FRAME_SIZE];
            let len = ControlPdu::Disconnect {
                src: self.config.address,
                dst: peer,
            }
            .encode_frame(&mut frame)?;
            if !matches!(self.send_now(pipe, &frame[..len]), Ok(Ack::Received)) {
                debug!("disconnect notice to {} not acknowledged", peer);
            }
            // the radio left the current window
            self.scheduler.restart();
        }

        self.peers.free(descriptor);
        self.radio.close_pipe(pipe).map_err(Error::Radio)?;
        debug!("closed pipe {:?}", pipe);
        Ok(())
    }

    /// Puts a thing's raw socket in listening state, announcing it on the
    /// management channel until a gateway connects it.
    ///
    /// Gateways and the management socket have nothing to listen for and get
    /// [`Error::Unimplemented`].
    pub fn listen(&mut self, descriptor: Descriptor) -> Result<(), Error<R::Error>> {
        self.ensure_init()?;
        if descriptor.is_management() || self.config.role == Role::Gateway {
            return Err(Error::Unimplemented);
        }
        let slot = self.peers.get_mut(descriptor).ok_or(Error::InvalidArgument)?;
        match slot.state {
            ConnectionState::Listening => Ok(()),
            ConnectionState::Idle | ConnectionState::Failed | ConnectionState::Disconnected => {
                slot.clear_session();
                slot.fault = None;
                slot.peer = None;
                slot.state = ConnectionState::Listening;
                self.last_announce = None;
                Ok(())
            }
            _ => Err(Error::NotPermitted),
        }
    }

    /// Stages a connect request for `peer` on the management pipe.
    ///
    /// Only gateways initiate connections; things get [`Error::Unimplemented`].
    /// [`Error::Busy`] means another management frame is still waiting to go out.
    /// Completion is reported by [`accept`](Self::accept).
    pub fn connect(
        &mut self,
        descriptor: Descriptor,
        peer: MacAddress,
    ) -> Result<(), Error<R::Error>> {
        self.ensure_init()?;
        if descriptor.is_management() || self.config.role == Role::Thing {
            return Err(Error::Unimplemented);
        }
        let own = self.config.address;
        if peer == own {
            return Err(Error::InvalidArgument);
        }
        let now = self.clock.now_ms();
        let slot = self.peers.get_mut(descriptor).ok_or(Error::InvalidArgument)?;
        if !matches!(
            slot.state,
            ConnectionState::Idle | ConnectionState::Failed | ConnectionState::Disconnected
        ) {
            return Err(Error::NotPermitted);
        }
        if self.management.is_busy() {
            return Err(Error::Busy);
        }

        let request = ConnectRequest {
            src: own,
            dst: peer,
            channel: self.data_channel,
            access_address: slot.access_address,
        };
        self.management
            .stage_pdu(&ManagementPdu::ConnectRequest(request), Staged::Request);
        slot.clear_session();
        slot.fault = None;
        slot.peer_version = None;
        slot.peer = Some(peer);
        slot.state = ConnectionState::Connecting(Handshake::start(now, &self.config.retry));
        info!("connecting {} on pipe {:?}", peer, slot.pipe);
        Ok(())
    }

    /// Completes a handshake, returning the connected peer.
    ///
    /// On a listening thing this takes a gateway's connect request, switches the
    /// socket to the assigned channel and access address and answers the request. On
    /// a gateway it takes the thing's answer to [`connect`](Self::connect).
    ///
    /// A pending frame that is not a connect request addressed to us is dropped with
    /// [`Error::InvalidArgument`]. [`Error::TimedOut`] reports a handshake that ran
    /// out of retries.
    pub fn accept(&mut self, descriptor: Descriptor) -> Result<MacAddress, Error<R::Error>> {
        self.tick()?;
        if descriptor.is_management() {
            return Err(Error::Unimplemented);
        }
        let state = self
            .peers
            .get(descriptor)
            .ok_or(Error::InvalidArgument)?
            .state;
        match state {
            ConnectionState::Listening | ConnectionState::Connecting(_) => {}
            ConnectionState::Failed => return Err(Error::TimedOut),
            ConnectionState::Disconnected => return Err(Error::Disconnected),
            ConnectionState::Idle | ConnectionState::Connected => {
                return Err(Error::NotPermitted)
            }
        }

        let Some(frame) = self.management.rx.as_ref() else {
            return Err(Error::WouldBlock);
        };
        let Some(request) = connect_request_for(frame, self.config.address) else {
            self.management.rx = None;
            debug!("dropped management frame, not a connect request for us");
            return Err(Error::InvalidArgument);
        };

        let now = self.clock.now_ms();
        if state == ConnectionState::Listening {
            self.accept_request(descriptor, request, now)
        } else {
            self.accept_reply(descriptor, request, now)
        }
    }

    /// Reads a message.
    ///
    /// On the management socket this returns the pending management frame. On a raw
    /// socket it returns the next reassembled message, truncated to `buf`, then any
    /// fault recorded against the session.
    pub fn read(&mut self, descriptor: Descriptor, buf: &mut [u8]) -> Result<usize, Error<R::Error>> {
        self.tick()?;
        if descriptor.is_management() {
            let frame = self.management.rx.take().ok_or(Error::WouldBlock)?;
            let n = frame.len().min(buf.len());
            buf[..n].copy_from_slice(&frame[..n]);
            return Ok(n);
        }

        let slot = self.peers.get_mut(descriptor).ok_or(Error::InvalidArgument)?;
        if let Some(n) = slot.take_rx(buf) {
            return Ok(n);
        }
        if let Some(fault) = slot.fault.take() {
            return Err(fault.into_error());
        }
        match slot.state {
            ConnectionState::Connected => Err(Error::WouldBlock),
            ConnectionState::Disconnected => Err(Error::Disconnected),
            _ => Err(Error::NotPermitted),
        }
    }

    /// Stages a message for transmission during the next window of its channel.
    ///
    /// Returns the accepted length right away. [`Error::Busy`] means the previous
    /// message has not been sent yet; it stays staged unchanged.
    pub fn write(&mut self, descriptor: Descriptor, buf: &[u8]) -> Result<usize, Error<R::Error>> {
        self.tick()?;
        if descriptor.is_management() {
            if buf.is_empty() || buf.len() > self.config.mtu_size() {
                return Err(Error::InvalidArgument);
            }
            if !self.management.stage(buf, Staged::User) {
                return Err(Error::Busy);
            }
            return Ok(buf.len());
        }

        let max = max_message_size(self.config.mtu_size());
        let slot = self.peers.get_mut(descriptor).ok_or(Error::InvalidArgument)?;
        if let Some(fault) = slot.fault.take() {
            return Err(fault.into_error());
        }
        match slot.state {
            ConnectionState::Connected => {}
            ConnectionState::Disconnected => return Err(Error::Disconnected),
            _ => return Err(Error::NotPermitted),
        }
        if buf.is_empty() || buf.len() > max {
            return Err(Error::InvalidArgument);
        }
        if !slot.tx.is_empty() {
            return Err(Error::Busy);
        }
        slot.tx
            .extend_from_slice(buf)
            .map_err(|_| Error::InvalidArgument)?;
        slot.tx_attempts = 0;
        Ok(buf.len())
    }

    /// Advances timers and the scheduler by one step.
    ///
    /// [`read`](Self::read), [`write`](Self::write) and [`accept`](Self::accept) call
    /// this themselves; call it directly when idle to keep announcements, handshakes
    /// and keepalives going.
    pub fn tick(&mut self) -> Result<(), Error<R::Error>> {
        self.ensure_init()?;
        let now = self.clock.now_ms();
        self.run_timers(now);

        let peers = &self.peers;
        let action = self
            .scheduler
            .advance(now, peers.any_connected(), N, |i| peers.is_connected(i));
        match action {
            Action::EnterManagement => {
                self.enter_management(now)?;
                self.management_window(now)
            }
            Action::Management => self.management_window(now),
            Action::EnterRaw => self.enter_raw(),
            Action::Raw(slot) => {
                self.drain_rx(now)?;
                self.flush_slot(slot)
            }
        }
    }

    /// Peer of a socket, once known.
    pub fn peer(&self, descriptor: Descriptor) -> Option<MacAddress> {
        self.peers.get(descriptor).and_then(|slot| slot.peer)
    }

    /// Protocol version the peer announced.
    pub fn peer_version(&self, descriptor: Descriptor) -> Option<(u8, u8)> {
        self.peers.get(descriptor).and_then(|slot| slot.peer_version)
    }

    /// Connection state of a socket, `None` for a closed or management descriptor.
    pub fn state(&self, descriptor: Descriptor) -> Option<ConnectionState> {
        self.peers.get(descriptor).map(|slot| slot.state)
    }

    /// Whether data can flow on the socket.
    pub fn is_connected(&self, descriptor: Descriptor) -> bool {
        self.peers.get(descriptor).is_some_and(PeerSlot::is_connected)
    }

    /// Window the radio is currently serving.
    pub fn window(&self) -> Window {
        self.scheduler.window()
    }

    /// Things that announced themselves to this gateway and are not connected.
    pub fn discovered(&self) -> &[MacAddress] {
        &self.discovered
    }

    /// Last gateway beacon heard by this thing, with the gateway's data channel.
    pub fn gateway(&self) -> Option<(MacAddress, u8)> {
        self.gateway
    }

    /// Restricts discovery to these addresses. An empty list accepts everybody.
    pub fn set_known_peers(&mut self, peers: &[MacAddress]) -> Result<(), Error<R::Error>> {
        self.known_peers = Vec::from_slice(peers).map_err(|_| Error::InvalidArgument)?;
        let known = &self.known_peers;
        if !known.is_empty() {
            self.discovered.retain(|mac| known.contains(mac));
        }
        Ok(())
    }

    /// Configuration in use.
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Gives back the radio, clock and delay.
    pub fn release(self) -> (R, C, D) {
        (self.radio, self.clock, self.delay)
    }

    pub(crate) fn now_ms(&self) -> u32 {
        self.clock.now_ms()
    }

    pub(crate) fn delay_mut(&mut self) -> &mut D {
        &mut self.delay
    }

    fn ensure_init(&self) -> Result<(), Error<R::Error>> {
        if self.initialized {
            Ok(())
        } else {
            Err(Error::NotPermitted)
        }
    }

    // Thing side: adopt the channel and access address handed out by the gateway.
    fn accept_request(
        &mut self,
        descriptor: Descriptor,
        request: ConnectRequest,
        now: u32,
    ) -> Result<MacAddress, Error<R::Error>> {
        if request.channel > LinkConfig::MAX_CHANNEL
            || request.channel == self.config.management_channel
        {
            self.management.rx = None;
            return Err(Error::InvalidArgument);
        }
        if self.management.is_busy() {
            // the reply goes out once the pending frame is sent
            return Err(Error::WouldBlock);
        }
        self.management.rx = None;

        let own = self.config.address;
        let slot = self.peers.get_mut(descriptor).ok_or(Error::InvalidArgument)?;
        self.radio
            .open_pipe(slot.pipe, &request.access_address)
            .map_err(Error::Radio)?;
        slot.access_address = request.access_address;
        slot.peer = Some(request.src);
        slot.last_seen = now;
        slot.state = ConnectionState::Connected;
        slot.queue_control(version_indication());

        self.data_channel = request.channel;
        self.gateway = Some((request.src, request.channel));
        self.management
            .stage_pdu(&ManagementPdu::ConnectRequest(request.reply(own)), Staged::Request);
        info!(
            "connected to {} on channel {}",
            request.src, request.channel
        );
        Ok(request.src)
    }

    // Gateway side: the thing echoed our request back.
    fn accept_reply(
        &mut self,
        descriptor: Descriptor,
        reply: ConnectRequest,
        now: u32,
    ) -> Result<MacAddress, Error<R::Error>> {
        let data_channel = self.data_channel;
        let slot = self.peers.get_mut(descriptor).ok_or(Error::InvalidArgument)?;
        if slot.peer == Some(reply.src)
            && slot.access_address == reply.access_address
            && reply.channel == data_channel
        {
            self.management.rx = None;
            slot.last_seen = now;
            slot.state = ConnectionState::Connected;
            slot.queue_control(version_indication());
            self.discovered.retain(|mac| *mac != reply.src);
            info!("{} connected on pipe {:?}", reply.src, slot.pipe);
            return Ok(reply.src);
        }

        let for_other_socket = self.peers.iter().any(|slot| {
            matches!(slot.state, ConnectionState::Connecting(_)) && slot.peer == Some(reply.src)
        });
        if for_other_socket {
            return Err(Error::WouldBlock);
        }
        self.management.rx = None;
        Err(Error::InvalidArgument)
    }

    fn run_timers(&mut self, now: u32) {
        let own = self.config.address;
        for slot in self.peers.iter_mut() {
            match slot.state {
                ConnectionState::Connecting(mut handshake) => {
                    match handshake.poll(now, &self.config.retry) {
                        Step::Wait => {}
                        Step::Resend => {
                            let Some(peer) = slot.peer else { continue };
                            let request = ConnectRequest {
                                src: own,
                                dst: peer,
                                channel: self.data_channel,
                                access_address: slot.access_address,
                            };
                            if self
                                .management
                                .stage_pdu(&ManagementPdu::ConnectRequest(request), Staged::Request)
                            {
                                debug!("connect request to {}, attempt {}", peer, handshake.attempts());
                                slot.state = ConnectionState::Connecting(handshake);
                            } else {
                                // the attempt is not counted until the request is staged
                                trace!("management busy, connect request to {} deferred", peer);
                            }
                        }
                        Step::GiveUp => {
                            warn!("no answer to {} connect requests", handshake.attempts());
                            slot.state = ConnectionState::Failed;
                        }
                    }
                }
                ConnectionState::Connected => {
                    let silent = elapsed(slot.last_seen, now);
                    if silent >= self.config.link_timeout_ms {
                        warn!("peer on pipe {:?} silent for {} ms", slot.pipe, silent);
                        slot.disconnect(Fault::Disconnected);
                    } else if silent >= self.config.keepalive_interval_ms && !slot.keepalive_sent {
                        if let Some(peer) = slot.peer {
                            slot.keepalive_sent = slot
                                .queue_control(ControlPdu::KeepaliveRequest { src: own, dst: peer });
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn enter_management(&mut self, now: u32) -> Result<(), Error<R::Error>> {
        self.radio
            .set_channel(self.config.management_channel)
            .map_err(Error::Radio)?;
        self.radio.set_rx_mode().map_err(Error::Radio)?;

        let due = self
            .last_announce
            .map_or(true, |at| elapsed(at, now) >= self.config.announce_interval_ms);
        if due && self.management.tx.is_none() {
            if let Some(pdu) = self.announcement() {
                self.management.stage_pdu(&pdu, Staged::Announcement);
                self.last_announce = Some(now);
            }
        }
        Ok(())
    }

    fn announcement(&self) -> Option<ManagementPdu> {
        let own = self.config.address;
        match self.config.role {
            Role::Gateway => Some(ManagementPdu::Beacon {
                src: own,
                channel: self.data_channel,
            }),
            Role::Thing => {
                let listening = self
                    .peers
                    .iter()
                    .any(|slot| slot.state == ConnectionState::Listening);
                match (listening, self.gateway) {
                    (false, _) => None,
                    (true, Some((gateway, _))) => Some(ManagementPdu::Setup {
                        src: own,
                        dst: gateway,
                    }),
                    (true, None) => Some(ManagementPdu::Presence { src: own }),
                }
            }
        }
    }

    fn management_window(&mut self, now: u32) -> Result<(), Error<R::Error>> {
        if let Some((frame, _)) = self.management.tx.as_ref() {
            let len = frame.len();
            let sent = self
                .radio
                .set_tx_mode(DataPipe::DP0, false)
                .and_then(|()| self.radio.transmit(frame));
            if let Err(e) = sent {
                // the frame stays staged for the next window
                let _ = self.radio.set_rx_mode();
                return Err(Error::Radio(e));
            }
            self.management.tx = None;
            // broadcast, the outcome carries no information
            self.radio.wait_for_ack().map_err(Error::Radio)?;
            self.radio.set_rx_mode().map_err(Error::Radio)?;
            trace!("management frame of {} bytes sent", len);
        }
        self.drain_rx(now)
    }

    fn dispatch_management(&mut self, frame: &[u8], now: u32) {
        let own = self.config.address;
        let pdu = match ManagementPdu::decode(frame) {
            Ok(pdu) => pdu,
            Err(FrameError::UnknownType(_)) => {
                // not ours to interpret, hand it to the management socket
                if self.management.rx.is_none() {
                    self.management.rx = Vec::from_slice(frame).ok();
                }
                return;
            }
            Err(e) => {
                debug!("bad management frame: {:?}", e);
                return;
            }
        };

        match (self.config.role, pdu) {
            (Role::Gateway, ManagementPdu::Presence { src }) => self.discover(src),
            (Role::Gateway, ManagementPdu::Setup { src, dst }) if dst == own => self.discover(src),
            (Role::Thing, ManagementPdu::Beacon { src, channel }) => {
                if self.gateway != Some((src, channel)) {
                    debug!("gateway {} serves channel {}", src, channel);
                }
                self.gateway = Some((src, channel));
            }
            (role, ManagementPdu::ConnectRequest(request)) => {
                self.on_connect_request(role, request, frame, now)
            }
            _ => {}
        }
    }

    fn on_connect_request(&mut self, role: Role, request: ConnectRequest, frame: &[u8], now: u32) {
        let own = self.config.address;
        if request.dst == own {
            let established = self.peers.iter_mut().find(|slot| {
                slot.is_connected()
                    && slot.peer == Some(request.src)
                    && slot.access_address == request.access_address
            });
            if let Some(slot) = established {
                if role == Role::Thing {
                    // our answer got lost, the gateway asks again
                    slot.last_seen = now;
                    self.management.stage_pdu(
                        &ManagementPdu::ConnectRequest(request.reply(own)),
                        Staged::Request,
                    );
                }
                return;
            }
        }

        let waiting = self.peers.iter().any(|slot| {
            matches!(
                slot.state,
                ConnectionState::Listening | ConnectionState::Connecting(_)
            )
        });
        if !waiting {
            return;
        }
        if self.management.rx.is_some() {
            debug!("management slot full, connect request from {} dropped", request.src);
            return;
        }
        self.management.rx = Vec::from_slice(frame).ok();
    }

    fn discover(&mut self, src: MacAddress) {
        if !self.known_peers.is_empty() && !self.known_peers.contains(&src) {
            return;
        }
        let connected = self
            .peers
            .iter()
            .any(|slot| slot.is_connected() && slot.peer == Some(src));
        if connected || self.discovered.contains(&src) {
            return;
        }
        if self.discovered.is_full() {
            self.discovered.remove(0);
        }
        if self.discovered.push(src).is_ok() {
            debug!("discovered {}", src);
        }
    }

    fn enter_raw(&mut self) -> Result<(), Error<R::Error>> {
        self.radio
            .set_channel(self.data_channel)
            .map_err(Error::Radio)?;
        self.radio.set_rx_mode().map_err(Error::Radio)
    }

    // The chip acknowledged every frame in the FIFO, so frames are routed by the pipe
    // they arrived on whatever window is open.
    fn drain_rx(&mut self, now: u32) -> Result<(), Error<R::Error>> {
        let mut frame = [0u8; FRAME_SIZE];
        for _ in 0..MAX_RX_PER_TICK {
            let Some(pipe) = self.radio.poll_available_pipe().map_err(Error::Radio)? else {
                break;
            };
            let len = self.radio.receive(&mut frame).map_err(Error::Radio)?;
            if pipe == DataPipe::DP0 {
                self.dispatch_management(&frame[..len], now);
            } else {
                self.route_data(pipe, &frame[..len], now);
            }
        }
        Ok(())
    }

    fn route_data(&mut self, pipe: DataPipe, frame: &[u8], now: u32) {
        let own = self.config.address;
        let mtu = self.config.mtu_size();
        let Some(slot) = self.peers.by_pipe_mut(pipe) else {
            trace!("frame on unused pipe {:?}", pipe);
            return;
        };
        if !slot.is_connected() {
            return;
        }
        slot.last_seen = now;
        slot.keepalive_sent = false;

        let pdu = match DataPdu::parse(frame) {
            Ok(pdu) => pdu,
            Err(e) => {
                slot.fault = Some(Fault::Protocol(e));
                return;
            }
        };

        if pdu.header.llid == LogicalId::Control {
            match ControlPdu::decode(pdu.payload) {
                Ok(ControlPdu::KeepaliveRequest { src, dst }) if dst == own => {
                    if !slot.queue_control(ControlPdu::KeepaliveResponse { src: own, dst: src }) {
                        debug!("control queue full on pipe {:?}", pipe);
                    }
                }
                Ok(ControlPdu::VersionIndication { major, minor }) => {
                    if major != PROTOCOL_VERSION.0 {
                        warn!("peer speaks version {}.{}", major, minor);
                    }
                    slot.peer_version = Some((major, minor));
                }
                Ok(ControlPdu::Disconnect { src, .. }) if slot.peer == Some(src) => {
                    info!("{} disconnected", src);
                    slot.disconnect(Fault::Disconnected);
                }
                Ok(_) => {}
                Err(e) => slot.fault = Some(Fault::Protocol(e)),
            }
            return;
        }

        if slot.rx_ready {
            debug!("receive slot of pipe {:?} full, message dropped", pipe);
            let mut result = slot.reassembler.skip(&pdu, mtu);
            if let Err(FrameError::IllegalSequence { received: 0, .. }) = result {
                result = slot.reassembler.skip(&pdu, mtu);
            }
            if let Err(e) = result {
                slot.fault = Some(Fault::Protocol(e));
            }
            return;
        }

        let mut result = slot.reassembler.push(&pdu, mtu, &mut slot.rx);
        if let Err(FrameError::IllegalSequence { received: 0, .. }) = result {
            // the sender lost an acknowledgement and started over
            debug!("pipe {:?} restarted a message", pipe);
            result = slot.reassembler.push(&pdu, mtu, &mut slot.rx);
        }
        match result {
            Ok(Progress::Complete(n)) => {
                slot.rx_len = n;
                slot.rx_ready = true;
            }
            Ok(Progress::Incomplete) => {}
            Err(e) => {
                debug!("reassembly on pipe {:?} failed: {:?}", pipe, e);
                slot.fault = Some(Fault::Protocol(e));
            }
        }
    }

    fn flush_slot(&mut self, index: usize) -> Result<(), Error<R::Error>> {
        let slot = self.peers.slot_mut(index);
        if !slot.is_connected() || (slot.control.is_empty() && slot.tx.is_empty()) {
            return Ok(());
        }
        self.radio
            .set_tx_mode(slot.pipe, true)
            .map_err(Error::Radio)?;
        let result = send_staged(&mut self.radio, &mut self.delay, slot, &self.config);
        self.radio.set_rx_mode().map_err(Error::Radio)?;
        result
    }

    // Sends one frame on the data channel outside of the scheduler.
    fn send_now(&mut self, pipe: DataPipe, frame: &[u8]) -> Result<Ack, R::Error> {
        self.radio.set_channel(self.data_channel)?;
        self.radio.set_tx_mode(pipe, true)?;
        self.radio.transmit(frame)?;
        self.radio.wait_for_ack()
    }
}

fn version_indication() -> ControlPdu {
    ControlPdu::VersionIndication {
        major: PROTOCOL_VERSION.0,
        minor: PROTOCOL_VERSION.1,
    }
}

// Control PDUs go first; the staged message follows once they are all acknowledged.
fn send_staged<R, D>(
    radio: &mut R,
    delay: &mut D,
    slot: &mut PeerSlot,
    config: &LinkConfig,
) -> Result<(), Error<R::Error>>
where
    R: Radio,
    D: DelayNs,
{
    let mut frame = [0u8; FRAME_SIZE];
    while let Some(&pdu) = slot.control.front() {
        let len = pdu.encode_frame(&mut frame)?;
        radio.transmit(&frame[..len]).map_err(Error::Radio)?;
        if radio.wait_for_ack().map_err(Error::Radio)? == Ack::TimedOut {
            // peer is not on the channel right now
            return Ok(());
        }
        slot.control.pop_front();
    }
    if slot.tx.is_empty() {
        return Ok(());
    }

    match fragment::send(
        radio,
        delay,
        config.mtu_size(),
        config.inter_frame_delay_us,
        &slot.tx,
    ) {
        Ok(_) => {
            slot.tx.clear();
            slot.tx_attempts = 0;
            Ok(())
        }
        Err(Error::TimedOut) => {
            slot.tx_attempts += 1;
            if slot.tx_attempts >= config.max_tx_attempts {
                warn!(
                    "dropped {} byte message after {} attempts",
                    slot.tx.len(),
                    slot.tx_attempts
                );
                slot.tx.clear();
                slot.tx_attempts = 0;
                slot.fault = Some(Fault::TimedOut);
            }
            Ok(())
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::DataHeader;
    use crate::radio::mock::{MockError, MockRadio, Mode};
    use core::cell::Cell;
    use embedded_hal_mock::eh1::delay::NoopDelay;
    use std::boxed::Box;
    use std::rc::Rc;
    use std::vec::Vec as StdVec;

    type TestClock = Box<dyn Fn() -> u32>;
    type TestGateway = Gateway<MockRadio, TestClock, NoopDelay>;
    type TestThing = Thing<MockRadio, TestClock, NoopDelay>;

    const GW: MacAddress = MacAddress([0x10, 0x20, 0x30, 0x40, 0x50, 0x60, 0x70, 0x80]);
    const THING: MacAddress = MacAddress([0xde, 0xad, 0xbe, 0xef, 0x00, 0x01, 0x02, 0x03]);
    const OTHER: MacAddress = MacAddress([0xde, 0xad, 0xbe, 0xef, 0x00, 0x01, 0x02, 0x04]);
    const FOX: &[u8] = b"The quick brown fox jumps over the lazy dog!!";

    fn clock(time: &Rc<Cell<u32>>) -> TestClock {
        let time = time.clone();
        Box::new(move || time.get())
    }

    fn setup() -> (TestGateway, TestThing, Rc<Cell<u32>>) {
        let time = Rc::new(Cell::new(0));
        let mut gw = Link::new(
            MockRadio::new(),
            clock(&time),
            NoopDelay,
            LinkConfig::gateway(GW),
        );
        let mut thing = Link::new(
            MockRadio::new(),
            clock(&time),
            NoopDelay,
            LinkConfig::thing(THING),
        );
        gw.init().unwrap();
        thing.init().unwrap();
        (gw, thing, time)
    }

    /// Delivers the frames `from` sent to `to` when channel and address match.
    fn pump<const A: usize, const B: usize>(
        from: &mut Link<MockRadio, TestClock, NoopDelay, A>,
        to: &mut Link<MockRadio, TestClock, NoopDelay, B>,
    ) -> usize {
        let mut delivered = 0;
        for sent in from.radio.take_sent() {
            if sent.channel != to.radio.channel || sent.address.is_none() {
                continue;
            }
            if let Some(pipe) = to.radio.pipes.iter().position(|p| *p == sent.address) {
                to.radio.inject(DataPipe::from(pipe as u8), &sent.frame);
                delivered += 1;
            }
        }
        delivered
    }

    fn connect(gw: &mut TestGateway, thing: &mut TestThing) -> (Descriptor, Descriptor) {
        let mac = thing.config().address;
        let gd = gw.socket(Protocol::Raw).unwrap();
        let td = thing.socket(Protocol::Raw).unwrap();
        thing.listen(td).unwrap();
        gw.connect(gd, mac).unwrap();
        gw.tick().unwrap();
        assert_eq!(pump(gw, thing), 1);
        assert_eq!(thing.accept(td), Ok(GW));
        thing.tick().unwrap();
        pump(thing, gw);
        assert_eq!(gw.accept(gd), Ok(mac));
        (gd, td)
    }

    fn data_frame(llid: LogicalId, seq: u8, payload: &[u8]) -> StdVec<u8> {
        let mut buf = [0u8; 32];
        let n = DataPdu::write(DataHeader::new(llid, seq), payload, &mut buf).unwrap();
        buf[..n].to_vec()
    }

    fn attempts(gw: &TestGateway, gd: Descriptor) -> u8 {
        match gw.state(gd) {
            Some(ConnectionState::Connecting(handshake)) => handshake.attempts(),
            other => panic!("not connecting: {:?}", other),
        }
    }

    fn control_frames(sent: &[crate::radio::mock::Sent]) -> StdVec<ControlPdu> {
        sent.iter()
            .filter_map(|s| DataPdu::parse(&s.frame).ok())
            .filter(|pdu| pdu.header.llid == LogicalId::Control)
            .filter_map(|pdu| ControlPdu::decode(pdu.payload).ok())
            .collect()
    }

    fn connect_requests(sent: &[crate::radio::mock::Sent]) -> usize {
        sent.iter()
            .filter(|s| {
                matches!(
                    ManagementPdu::decode(&s.frame),
                    Ok(ManagementPdu::ConnectRequest(_))
                )
            })
            .count()
    }

    #[test]
    fn nothing_before_init() {
        let time = Rc::new(Cell::new(0));
        let mut gw: TestGateway =
            Link::new(MockRadio::new(), clock(&time), NoopDelay, LinkConfig::gateway(GW));
        let mut buf = [0u8; 8];
        assert_eq!(gw.socket(Protocol::Raw), Err(Error::NotPermitted));
        assert_eq!(gw.read(Descriptor::MANAGEMENT, &mut buf), Err(Error::NotPermitted));
        assert_eq!(gw.tick(), Err(Error::NotPermitted));
        gw.init().unwrap();
        assert_eq!(gw.init(), Err(Error::NotPermitted));
        assert_eq!(gw.radio.pipes[0], Some(AccessAddress::MANAGEMENT));
        assert_eq!(gw.radio.channel, 2);
    }

    #[test]
    fn init_checks_role_against_slots() {
        let time = Rc::new(Cell::new(0));
        let mut wrong: TestGateway =
            Link::new(MockRadio::new(), clock(&time), NoopDelay, LinkConfig::thing(THING));
        assert_eq!(wrong.init(), Err(Error::InvalidArgument));
        let mut bad_mtu: TestThing = Link::new(
            MockRadio::new(),
            clock(&time),
            NoopDelay,
            LinkConfig::thing(THING).mtu(16),
        );
        assert_eq!(bad_mtu.init(), Err(Error::InvalidArgument));
    }

    #[test]
    fn protocol_numbers() {
        assert_eq!(Protocol::try_from(0), Ok(Protocol::Management));
        assert_eq!(Protocol::try_from(1), Ok(Protocol::Raw));
        assert_eq!(Protocol::try_from(7), Err(UnknownProtocol(7)));
        let e: Error<()> = UnknownProtocol(7).into();
        assert_eq!(e, Error::InvalidArgument);
    }

    #[test]
    fn sixth_raw_socket_is_refused() {
        let (mut gw, _, _) = setup();
        let sockets: StdVec<_> = (0..5).map(|_| gw.socket(Protocol::Raw).unwrap()).collect();
        assert_eq!(gw.socket(Protocol::Raw), Err(Error::ResourceExhausted));
        assert_eq!(gw.socket(Protocol::Management), Ok(Descriptor::MANAGEMENT));

        let mut pipes: StdVec<_> = sockets.iter().map(|d| d.pipe() as u8).collect();
        pipes.sort_unstable();
        assert_eq!(pipes, [1, 2, 3, 4, 5]);
        assert!(gw.radio.pipes[1..].iter().all(Option::is_some));

        gw.close(sockets[2]).unwrap();
        assert!(gw.radio.pipes[3].is_none());
        // closing twice is harmless
        gw.close(sockets[2]).unwrap();
        let reused = gw.socket(Protocol::Raw).unwrap();
        assert_eq!(reused.pipe(), DataPipe::DP3);
        assert_eq!(gw.write(sockets[2], b"x"), Err(Error::InvalidArgument));
    }

    #[test]
    fn role_restrictions() {
        let (mut gw, mut thing, _) = setup();
        let gd = gw.socket(Protocol::Raw).unwrap();
        let td = thing.socket(Protocol::Raw).unwrap();
        assert_eq!(gw.listen(gd), Err(Error::Unimplemented));
        assert_eq!(thing.listen(Descriptor::MANAGEMENT), Err(Error::Unimplemented));
        assert_eq!(thing.connect(td, GW), Err(Error::Unimplemented));
        assert_eq!(gw.connect(gd, GW), Err(Error::InvalidArgument));
        let mut buf = [0u8; 4];
        assert_eq!(gw.read(gd, &mut buf), Err(Error::NotPermitted));
        assert_eq!(gw.write(gd, b"early"), Err(Error::NotPermitted));
    }

    #[test]
    fn handshake_connects_both_sides() {
        let (mut gw, mut thing, _) = setup();
        let (gd, td) = connect(&mut gw, &mut thing);
        assert!(gw.is_connected(gd));
        assert!(thing.is_connected(td));
        assert_eq!(gw.peer(gd), Some(THING));
        assert_eq!(thing.peer(td), Some(GW));
        assert_eq!(thing.gateway(), Some((GW, 76)));
        // the thing listens with the address the gateway assigned to the pipe
        assert_eq!(thing.radio.pipes[1], gw.radio.pipes[gd.pipe() as usize]);
        // the presence announcement was recorded, then cleared by the connection
        assert!(gw.discovered().is_empty());
    }

    #[test]
    fn request_for_someone_else_is_rejected() {
        let (mut gw, mut thing, _) = setup();
        let gd = gw.socket(Protocol::Raw).unwrap();
        let td = thing.socket(Protocol::Raw).unwrap();
        thing.listen(td).unwrap();
        gw.connect(gd, OTHER).unwrap();
        gw.tick().unwrap();
        assert_eq!(pump(&mut gw, &mut thing), 1);

        assert_eq!(thing.accept(td), Err(Error::InvalidArgument));
        assert_eq!(thing.state(td), Some(ConnectionState::Listening));
        assert!(!thing.is_connected(td));
        assert_eq!(thing.radio.pipes[1], None);
        // the frame was dropped
        assert_eq!(thing.accept(td), Err(Error::WouldBlock));
    }

    #[test]
    fn connect_is_busy_while_request_pending() {
        let (mut gw, _, _) = setup();
        let a = gw.socket(Protocol::Raw).unwrap();
        let b = gw.socket(Protocol::Raw).unwrap();
        gw.connect(a, THING).unwrap();
        assert_eq!(gw.connect(b, OTHER), Err(Error::Busy));
        assert_eq!(gw.connect(a, THING), Err(Error::NotPermitted));
        gw.tick().unwrap();
        assert_eq!(gw.connect(b, OTHER), Ok(()));
    }

    #[test]
    fn handshake_retries_then_times_out() {
        let (mut gw, _, time) = setup();
        let gd = gw.socket(Protocol::Raw).unwrap();
        gw.connect(gd, THING).unwrap();
        for t in [0, 100, 300, 700, 1500] {
            time.set(t);
            gw.tick().unwrap();
            assert!(matches!(
                gw.state(gd),
                Some(ConnectionState::Connecting(_))
            ));
        }
        assert_eq!(gw.accept(gd), Err(Error::WouldBlock));
        assert_eq!(connect_requests(&gw.radio.take_sent()), 5);

        time.set(3100);
        assert_eq!(gw.accept(gd), Err(Error::TimedOut));
        assert_eq!(gw.state(gd), Some(ConnectionState::Failed));
        assert_eq!(connect_requests(&gw.radio.take_sent()), 0);
        // a failed socket may try again
        assert_eq!(gw.connect(gd, THING), Ok(()));
    }

    #[test]
    fn message_travels_gateway_to_thing() {
        let (mut gw, mut thing, time) = setup();
        let (gd, td) = connect(&mut gw, &mut thing);
        assert_eq!(gw.write(gd, FOX), Ok(45));

        time.set(10);
        gw.tick().unwrap(); // tune to the data channel
        gw.tick().unwrap(); // serve the slot
        thing.tick().unwrap();
        assert_eq!(thing.radio.channel, 76);
        assert_eq!(pump(&mut gw, &mut thing), 3);

        let mut buf = [0u8; 64];
        assert_eq!(thing.read(td, &mut buf), Ok(45));
        assert_eq!(&buf[..45], FOX);
        assert_eq!(thing.peer_version(td), Some(PROTOCOL_VERSION));
        assert_eq!(thing.read(td, &mut buf), Err(Error::WouldBlock));
    }

    #[test]
    fn second_write_is_busy_until_drained() {
        let (mut gw, mut thing, time) = setup();
        let (gd, _) = connect(&mut gw, &mut thing);
        assert_eq!(gw.write(gd, b"first"), Ok(5));
        assert_eq!(gw.write(gd, b"second"), Err(Error::Busy));

        time.set(10);
        gw.tick().unwrap();
        gw.tick().unwrap();
        let sent = gw.radio.take_sent();
        let last = sent.last().unwrap();
        assert_eq!(&last.frame[2..], b"first");
        assert!(last.ack);
        assert_eq!(gw.write(gd, b"second"), Ok(6));
    }

    #[test]
    fn oversized_write_is_invalid() {
        let (mut gw, mut thing, _) = setup();
        let (gd, _) = connect(&mut gw, &mut thing);
        assert_eq!(gw.write(gd, &[0; 1921]), Err(Error::InvalidArgument));
        assert_eq!(gw.write(gd, &[]), Err(Error::InvalidArgument));
        assert_eq!(gw.write(gd, &[0; 1920]), Ok(1920));
    }

    #[test]
    fn unacknowledged_message_is_dropped_after_max_attempts() {
        let (mut gw, mut thing, time) = setup();
        let (gd, _) = connect(&mut gw, &mut thing);
        assert_eq!(gw.write(gd, b"ping"), Ok(4));
        time.set(10);
        gw.tick().unwrap();
        gw.radio.acks.extend([Ack::Received, Ack::TimedOut, Ack::TimedOut, Ack::TimedOut]);
        for _ in 0..3 {
            gw.tick().unwrap();
        }
        let mut buf = [0u8; 8];
        assert_eq!(gw.read(gd, &mut buf), Err(Error::TimedOut));
        assert!(gw.is_connected(gd));
        assert_eq!(gw.write(gd, b"pong"), Ok(4));
    }

    #[test]
    fn silent_peer_is_evicted() {
        let (mut gw, mut thing, time) = setup();
        let (gd, _) = connect(&mut gw, &mut thing);
        time.set(2000);
        gw.tick().unwrap();
        gw.tick().unwrap();
        let requests = control_frames(&gw.radio.take_sent());
        assert!(requests.contains(&ControlPdu::KeepaliveRequest { src: GW, dst: THING }));

        time.set(6000);
        let mut buf = [0u8; 8];
        assert_eq!(gw.read(gd, &mut buf), Err(Error::Disconnected));
        assert!(!gw.is_connected(gd));
        assert_eq!(gw.read(gd, &mut buf), Err(Error::Disconnected));
        assert_eq!(gw.write(gd, b"late"), Err(Error::Disconnected));
    }

    #[test]
    fn keepalive_request_is_answered() {
        let (mut gw, mut thing, time) = setup();
        let (_, td) = connect(&mut gw, &mut thing);
        time.set(10);
        thing.tick().unwrap();
        let mut frame = [0u8; 32];
        let n = ControlPdu::KeepaliveRequest { src: GW, dst: THING }
            .encode_frame(&mut frame)
            .unwrap();
        thing.radio.inject(DataPipe::DP1, &frame[..n]);
        let mut buf = [0u8; 8];
        assert_eq!(thing.read(td, &mut buf), Err(Error::WouldBlock));
        let answers = control_frames(&thing.radio.take_sent());
        assert!(answers.contains(&ControlPdu::KeepaliveResponse { src: THING, dst: GW }));
    }

    #[test]
    fn close_notifies_peer() {
        let (mut gw, mut thing, time) = setup();
        let (gd, td) = connect(&mut gw, &mut thing);
        thing.radio.take_sent();
        thing.close(td).unwrap();
        let sent = thing.radio.take_sent();
        let notice = sent.last().unwrap();
        assert_eq!(notice.channel, 76);
        assert_eq!(notice.pipe, DataPipe::DP1);
        assert_eq!(
            control_frames(&sent),
            [ControlPdu::Disconnect { src: THING, dst: GW }]
        );
        assert!(thing.radio.pipes[1].is_none());
        assert_eq!(thing.state(td), None);

        time.set(10);
        gw.tick().unwrap();
        gw.radio.inject(gd.pipe(), &notice.frame);
        let mut buf = [0u8; 8];
        assert_eq!(gw.read(gd, &mut buf), Err(Error::Disconnected));
        assert_eq!(gw.state(gd), Some(ConnectionState::Disconnected));
    }

    #[test]
    fn management_socket_broadcasts_without_ack() {
        let (mut gw, mut thing, _) = setup();
        assert_eq!(gw.write(Descriptor::MANAGEMENT, b"hello"), Ok(5));
        assert_eq!(gw.write(Descriptor::MANAGEMENT, b"again"), Err(Error::Busy));
        assert_eq!(gw.write(Descriptor::MANAGEMENT, &[0; 33]), Err(Error::InvalidArgument));
        gw.tick().unwrap();

        let sent = gw.radio.take_sent();
        let last = sent.last().unwrap();
        assert_eq!(last.frame, b"hello");
        assert_eq!(last.pipe, DataPipe::DP0);
        assert!(!last.ack);
        assert_eq!(last.channel, 2);

        for s in sent {
            thing.radio.inject(DataPipe::DP0, &s.frame);
        }
        let mut buf = [0u8; 32];
        assert_eq!(thing.read(Descriptor::MANAGEMENT, &mut buf), Ok(5));
        assert_eq!(&buf[..5], b"hello");
        // the beacon sent along was recorded
        assert_eq!(thing.gateway(), Some((GW, 76)));
    }

    #[test]
    fn discovery_honours_known_peers() {
        let (mut gw, _, _) = setup();
        gw.set_known_peers(&[OTHER]).unwrap();
        let mut frame = [0u8; 32];
        for src in [THING, OTHER] {
            let n = ManagementPdu::Presence { src }.encode(&mut frame).unwrap();
            gw.radio.inject(DataPipe::DP0, &frame[..n]);
        }
        gw.tick().unwrap();
        assert_eq!(gw.discovered(), [OTHER]);
        gw.set_known_peers(&[]).unwrap();
    }

    #[test]
    fn frame_left_in_fifo_survives_window_change() {
        let (mut gw, mut thing, time) = setup();
        let (_, td) = connect(&mut gw, &mut thing);
        time.set(10);
        thing.tick().unwrap();
        assert_eq!(thing.window(), Window::Raw);
        thing.radio.inject(DataPipe::DP1, &data_frame(LogicalId::End, 0, b"hi"));

        // the raw window is over before the next tick
        time.set(80);
        let mut buf = [0u8; 8];
        assert_eq!(thing.read(td, &mut buf), Ok(2));
        assert_eq!(thing.window(), Window::Management);
        assert_eq!(&buf[..2], b"hi");
    }

    #[test]
    fn management_frame_in_raw_window_is_dispatched() {
        let (mut gw, mut thing, time) = setup();
        connect(&mut gw, &mut thing);
        time.set(10);
        gw.tick().unwrap();
        assert_eq!(gw.window(), Window::Raw);

        let mut frame = [0u8; 32];
        let n = ManagementPdu::Presence { src: OTHER }.encode(&mut frame).unwrap();
        gw.radio.inject(DataPipe::DP0, &frame[..n]);
        gw.tick().unwrap();
        assert_eq!(gw.discovered(), [OTHER]);
    }

    #[test]
    fn interleaved_messages_from_two_things() {
        let (mut gw, mut a, time) = setup();
        let mut b: TestThing =
            Link::new(MockRadio::new(), clock(&time), NoopDelay, LinkConfig::thing(OTHER));
        b.init().unwrap();
        let (ga, ta) = connect(&mut gw, &mut a);
        let (gb, tb) = connect(&mut gw, &mut b);
        assert_ne!(ga.pipe(), gb.pipe());

        let reversed: StdVec<u8> = FOX.iter().rev().copied().collect();
        assert_eq!(a.write(ta, FOX), Ok(45));
        assert_eq!(b.write(tb, &reversed), Ok(45));

        time.set(10);
        for thing in [&mut a, &mut b] {
            thing.tick().unwrap(); // tune to the data channel
            thing.tick().unwrap(); // serve the slot
        }
        gw.tick().unwrap();
        assert_eq!(gw.window(), Window::Raw);

        let from_a = a.radio.take_sent();
        let from_b = b.radio.take_sent();
        assert!(from_a.len() >= 2 && from_b.len() >= 2);
        for i in 0..from_a.len().max(from_b.len()) {
            if let Some(sent) = from_a.get(i) {
                gw.radio.inject(ga.pipe(), &sent.frame);
            }
            if let Some(sent) = from_b.get(i) {
                gw.radio.inject(gb.pipe(), &sent.frame);
            }
        }
        while !gw.radio.inbox.is_empty() {
            gw.tick().unwrap();
        }

        let mut buf = [0u8; 64];
        assert_eq!(gw.read(ga, &mut buf), Ok(45));
        assert_eq!(&buf[..45], FOX);
        assert_eq!(gw.read(gb, &mut buf), Ok(45));
        assert_eq!(&buf[..45], &reversed[..]);
        assert_eq!(gw.read(ga, &mut buf), Err(Error::WouldBlock));
        assert_eq!(gw.read(gb, &mut buf), Err(Error::WouldBlock));
    }

    #[test]
    fn failed_transmit_keeps_management_frame() {
        let (mut gw, _, _) = setup();
        assert_eq!(gw.write(Descriptor::MANAGEMENT, b"hello"), Ok(5));
        gw.radio.take_sent();

        gw.radio.fail_transmit = true;
        assert_eq!(gw.tick(), Err(Error::Radio(MockError)));
        assert!(gw.management.is_busy());
        assert_eq!(gw.radio.mode, Some(Mode::Rx));
        assert_eq!(gw.write(Descriptor::MANAGEMENT, b"again"), Err(Error::Radio(MockError)));

        gw.radio.fail_transmit = false;
        gw.tick().unwrap();
        let sent = gw.radio.take_sent();
        assert_eq!(sent.last().map(|s| &s.frame[..]), Some(&b"hello"[..]));
        assert!(!gw.management.is_busy());
    }

    #[test]
    fn resend_waits_for_free_management_slot() {
        let (mut gw, _, time) = setup();
        let gd = gw.socket(Protocol::Raw).unwrap();
        gw.connect(gd, THING).unwrap();
        assert_eq!(gw.write(Descriptor::MANAGEMENT, b"hello"), Ok(5));
        assert_eq!(connect_requests(&gw.radio.take_sent()), 1);
        assert_eq!(attempts(&gw, gd), 1);

        // the retry timer expires while the user frame is staged
        time.set(100);
        gw.tick().unwrap();
        let sent = gw.radio.take_sent();
        assert_eq!(connect_requests(&sent), 0);
        assert_eq!(sent.last().map(|s| &s.frame[..]), Some(&b"hello"[..]));
        assert_eq!(attempts(&gw, gd), 1);

        gw.tick().unwrap();
        assert_eq!(connect_requests(&gw.radio.take_sent()), 1);
        assert_eq!(attempts(&gw, gd), 2);
    }

    #[test]
    fn sender_restart_while_receive_slot_full() {
        let (mut gw, mut thing, time) = setup();
        let (_, td) = connect(&mut gw, &mut thing);
        time.set(10);
        thing.tick().unwrap();

        let pipe = DataPipe::DP1;
        thing.radio.inject(pipe, &data_frame(LogicalId::End, 0, b"hi"));
        thing.radio.inject(pipe, &data_frame(LogicalId::Fragment, 0, &[1; 30]));
        // the acknowledgement got lost, the sender starts over
        thing.radio.inject(pipe, &data_frame(LogicalId::Fragment, 0, &[1; 30]));
        thing.radio.inject(pipe, &data_frame(LogicalId::End, 1, &[2; 5]));

        let mut buf = [0u8; 8];
        assert_eq!(thing.read(td, &mut buf), Ok(2));
        assert_eq!(&buf[..2], b"hi");
        assert_eq!(thing.read(td, &mut buf), Err(Error::WouldBlock));
        assert!(thing.is_connected(td));
    }
}
