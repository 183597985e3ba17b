//! Different structs and values for configuration of the chip and of the link layer.

use crate::address::MacAddress;
use crate::error::Error;
use crate::pdu::MAX_MANAGEMENT_PDU_SIZE;
use crate::MAX_PAYLOAD_SIZE;

/// Configuration of the nRF24L01 chip, applied by [`Nrf24l01::new`](crate::Nrf24l01::new).
///
/// # Examples
/// ```
/// use nrf24_link::config::{DataRate, NrfConfig, PALevel, PayloadSize};
///
/// let config = NrfConfig::default()
///     .channel(8)
///     .pa_level(PALevel::Low)
///     .data_rate(DataRate::R2Mbps)
///     .payload_size(PayloadSize::Dynamic);
/// # let _ = config;
/// ```
#[derive(Copy, Debug, Clone)]
pub struct NrfConfig {
    pub(crate) payload_size: PayloadSize,
    pub(crate) channel: u8,
    pub(crate) addr_width: AddressWidth,
    pub(crate) data_rate: DataRate,
    pub(crate) pa_level: PALevel,
    pub(crate) crc_encoding_scheme: Option<EncodingScheme>,
    pub(crate) auto_retry: AutoRetransmission,
}

impl Default for NrfConfig {
    fn default() -> Self {
        Self {
            payload_size: PayloadSize::Dynamic,
            channel: 76,
            addr_width: AddressWidth::default(),
            crc_encoding_scheme: Some(EncodingScheme::R2Bytes),
            pa_level: PALevel::default(),
            data_rate: DataRate::default(),
            auto_retry: AutoRetransmission::default(),
        }
    }
}

impl NrfConfig {
    /// Set the payload size.
    pub fn payload_size<T: Into<PayloadSize>>(mut self, payload_size: T) -> Self {
        self.payload_size = payload_size.into().truncate();
        self
    }
    /// Set the RF channel, 0-125.
    pub fn channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }
    /// Set the address width.
    pub fn addr_width<T: Into<AddressWidth>>(mut self, addr_width: T) -> Self {
        self.addr_width = addr_width.into();
        self
    }
    /// Set the on-air data rate.
    pub fn data_rate(mut self, data_rate: DataRate) -> Self {
        self.data_rate = data_rate;
        self
    }
    /// Set the power amplifier level.
    pub fn pa_level(mut self, pa_level: PALevel) -> Self {
        self.pa_level = pa_level;
        self
    }
    /// Set the CRC scheme, `None` disables CRC.
    pub fn crc_encoding_scheme(mut self, crc_encoding_scheme: Option<EncodingScheme>) -> Self {
        self.crc_encoding_scheme = crc_encoding_scheme;
        self
    }
    /// Set the automatic retransmission.
    pub fn auto_retry<T: Into<AutoRetransmission>>(mut self, auto_retry: T) -> Self {
        self.auto_retry = auto_retry.into();
        self
    }
}

/// Different RF power levels. The higher the level the bigger range, but the more the current
/// consumption.
///
/// Defaults to Min.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PALevel {
    /// -18 dBm, 7 mA current consumption.
    #[default]
    Min = 0b0000_0000,
    /// -12 dBm, 7.5 mA current consumption.
    Low = 0b0000_0010,
    /// -6 dBm, 9.0 mA current consumption.
    High = 0b0000_0100,
    /// -0 dBm, 11.3 mA current consumption.
    Max = 0b0000_0110,
}

impl PALevel {
    pub(crate) fn level(&self) -> u8 {
        *self as u8
    }
}

impl From<u8> for PALevel {
    fn from(t: u8) -> Self {
        match t & 0b0000_0110 {
            0b0000_0000 => Self::Min,
            0b0000_0010 => Self::Low,
            0b0000_0100 => Self::High,
            _ => Self::Max,
        }
    }
}

/// Configured speed at which data will be sent.
///
/// Defaults to 1Mpbs.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataRate {
    /// 1 Mbps
    #[default]
    R1Mbps = 0b0000_0000,
    /// 2 Mbps
    R2Mbps = 0b0000_1000,
}

impl DataRate {
    pub(crate) fn rate(&self) -> u8 {
        *self as u8
    }
}

impl From<u8> for DataRate {
    fn from(t: u8) -> Self {
        if t & 0b0000_1000 != 0 {
            Self::R2Mbps
        } else {
            Self::R1Mbps
        }
    }
}

/// CRC encoding scheme
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EncodingScheme {
    /// 1 byte
    R1Byte = 0,
    /// 2 bytes
    R2Bytes = 1,
}

impl EncodingScheme {
    pub(crate) fn scheme(&self) -> u8 {
        *self as u8
    }
}

/// Address width
#[derive(Debug, PartialEq, Eq, Copy, Clone, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressWidth {
    /// 3 bytes
    R3Bytes = 1,
    /// 4 bytes
    R4Bytes = 2,
    /// 5 bytes
    #[default]
    R5Bytes = 3,
}

impl AddressWidth {
    pub(crate) fn value(&self) -> u8 {
        *self as u8
    }
}

impl From<u8> for AddressWidth {
    fn from(t: u8) -> Self {
        match t {
            0..=3 => Self::R3Bytes,
            4 => Self::R4Bytes,
            5..=u8::MAX => Self::R5Bytes,
        }
    }
}

/// Size of the payloads the chip exchanges.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PayloadSize {
    /// The payload length travels with every frame.
    Dynamic,
    /// Every frame is exactly this many bytes long.
    Static(u8),
}

impl PayloadSize {
    /// Clamps a static size to [`MAX_PAYLOAD_SIZE`].
    pub(crate) fn truncate(self) -> Self {
        match self {
            Self::Dynamic => Self::Dynamic,
            Self::Static(n) => Self::Static(core::cmp::min(n, MAX_PAYLOAD_SIZE)),
        }
    }
}

impl From<u8> for PayloadSize {
    fn from(size: u8) -> Self {
        match size {
            0 => Self::Dynamic,
            n => Self::Static(n),
        }
    }
}

/// Configuration of automatic retransmission.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AutoRetransmission {
    /// The auto retransmit delay.
    /// Values can be between 0 and 15.
    /// The delay before a retransmit is initiated, is calculated according to the following formula:
    /// > ((**delay** + 1) * 250) + 86 µs
    delay: u8,
    /// The number of times there will be an auto retransmission.
    /// Must be a value between 0 and 15.
    count: u8,
}

impl Default for AutoRetransmission {
    fn default() -> Self {
        Self {
            delay: 5,
            count: 15,
        }
    }
}

impl AutoRetransmission {
    pub(crate) fn from_register(reg: u8) -> Self {
        Self {
            delay: reg >> 4,
            count: reg & 0b0000_1111,
        }
    }
    /// The auto retransmit delay in microseconds.
    pub fn delay(&self) -> u32 {
        ((self.delay as u32 + 1) * 250) + 86
    }
    pub(crate) fn raw_delay(&self) -> u8 {
        self.delay
    }
    /// The number of retransmissions.
    pub fn count(&self) -> u8 {
        self.count
    }
}

impl From<(u8, u8)> for AutoRetransmission {
    fn from((delay, count): (u8, u8)) -> Self {
        Self {
            delay: core::cmp::min(delay, 15),
            count: core::cmp::min(count, 15),
        }
    }
}

/// Representation of the different data pipes through which data can be received
///
/// An nRF24L01 configured as primary RX (PRX) will be able to receive data trough 6 different data
/// pipes.
/// One data pipe will have a unique address but share the same frequency channel.
/// This means that up to 6 different nRF24L01 configured as primary TX (PTX) can communicate with
/// one nRF24L01 configured as PRX, and the nRF24L01 configured as PRX will be able to distinguish
/// between them.
///
/// The link layer reserves pipe 0 for management traffic and hands out pipes 1-5 to peers.
///
/// Data pipe 0 has a unique 40 bit configurable address. Each of data pipe 1-5 has an 8 bit unique
/// address and shares the 32 most significant address bits.
///
/// # Notes
/// In the PTX device data pipe 0 is used to received the acknowledgement, and therefore the
/// receive address for data pipe 0 has to be equal to the transmit address to be able to receive
/// the acknowledgement.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Default, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum DataPipe {
    /// Data pipe 0.
    /// Management pipe with a 40 bit configurable address.
    /// This pipe is used in TX mode when auto acknowledgement is enabled. On this channel the ACK
    /// messages are received.
    #[default]
    DP0 = 0,
    /// Data pipe 1.
    DP1 = 1,
    /// Data pipe 2.
    DP2 = 2,
    /// Data pipe 3.
    DP3 = 3,
    /// Data pipe 4.
    DP4 = 4,
    /// Data pipe 5.
    DP5 = 5,
}

impl DataPipe {
    pub(crate) fn pipe(&self) -> u8 {
        *self as u8
    }

    /// Pipe for a raw pipe number, `None` above 5.
    pub fn new(pipe: u8) -> Option<Self> {
        match pipe {
            0 => Some(DataPipe::DP0),
            1 => Some(DataPipe::DP1),
            2 => Some(DataPipe::DP2),
            3 => Some(DataPipe::DP3),
            4 => Some(DataPipe::DP4),
            5 => Some(DataPipe::DP5),
            _ => None,
        }
    }
}

impl From<u8> for DataPipe {
    fn from(t: u8) -> Self {
        Self::new(t).unwrap_or(DataPipe::DP0)
    }
}

/// Which side of the link this device plays.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Role {
    /// Initiates connections and serves up to five things, one per data pipe.
    Gateway,
    /// Listens for a single gateway.
    Thing,
}

/// Retry policy of the connection handshake.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RetryPolicy {
    /// Wait before the first resend.
    pub initial_backoff_ms: u32,
    /// Upper bound of the doubling backoff.
    pub max_backoff_ms: u32,
    /// Number of connect requests sent before giving up, the first one included.
    pub max_attempts: u8,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 100,
            max_backoff_ms: 1600,
            max_attempts: 5,
        }
    }
}

/// Configuration of the link layer.
///
/// # Examples
/// ```
/// use nrf24_link::config::{LinkConfig, Role};
/// use nrf24_link::MacAddress;
///
/// let own = MacAddress::new([0x02, 0, 0, 0, 0, 0, 0, 0x01]);
/// let config = LinkConfig::gateway(own).data_channel(90).raw_dwell_ms(40);
/// assert_eq!(config.role(), Role::Gateway);
/// assert!(config.validate::<()>().is_ok());
/// ```
#[derive(Debug, Clone, Copy)]
pub struct LinkConfig {
    pub(crate) role: Role,
    pub(crate) address: MacAddress,
    pub(crate) management_channel: u8,
    pub(crate) data_channel: u8,
    pub(crate) mtu: u8,
    pub(crate) inter_frame_delay_us: u32,
    pub(crate) management_dwell_ms: u32,
    pub(crate) raw_dwell_ms: u32,
    pub(crate) announce_interval_ms: u32,
    pub(crate) keepalive_interval_ms: u32,
    pub(crate) link_timeout_ms: u32,
    pub(crate) max_tx_attempts: u8,
    pub(crate) access_address_seed: u8,
    pub(crate) retry: RetryPolicy,
}

impl LinkConfig {
    /// Highest RF channel the link will tune to.
    pub const MAX_CHANNEL: u8 = 125;

    /// Defaults for the given role and own address.
    pub fn new(role: Role, address: MacAddress) -> Self {
        Self {
            role,
            address,
            management_channel: 2,
            data_channel: 76,
            mtu: MAX_PAYLOAD_SIZE,
            inter_frame_delay_us: 512,
            management_dwell_ms: 10,
            raw_dwell_ms: 60,
            announce_interval_ms: 1000,
            keepalive_interval_ms: 2000,
            link_timeout_ms: 6000,
            max_tx_attempts: 3,
            access_address_seed: 0xc0,
            retry: RetryPolicy::default(),
        }
    }

    /// Gateway defaults.
    pub fn gateway(address: MacAddress) -> Self {
        Self::new(Role::Gateway, address)
    }

    /// Thing defaults.
    pub fn thing(address: MacAddress) -> Self {
        Self::new(Role::Thing, address)
    }

    /// Role of the device.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Own address.
    pub fn address(&self) -> MacAddress {
        self.address
    }

    /// MTU of the radio.
    pub fn mtu_size(&self) -> usize {
        self.mtu as usize
    }

    /// Channel shared by every device for announcements and handshakes.
    pub fn management_channel(mut self, channel: u8) -> Self {
        self.management_channel = channel;
        self
    }
    /// Channel the gateway hands out for data sessions.
    pub fn data_channel(mut self, channel: u8) -> Self {
        self.data_channel = channel;
        self
    }
    /// Radio MTU, between the largest management PDU and the chip payload size.
    pub fn mtu(mut self, mtu: u8) -> Self {
        self.mtu = mtu;
        self
    }
    /// Spacing between two fragments of a message.
    pub fn inter_frame_delay_us(mut self, us: u32) -> Self {
        self.inter_frame_delay_us = us;
        self
    }
    /// Time spent on the management channel per cycle.
    pub fn management_dwell_ms(mut self, ms: u32) -> Self {
        self.management_dwell_ms = ms;
        self
    }
    /// Time spent on the data channel per cycle.
    pub fn raw_dwell_ms(mut self, ms: u32) -> Self {
        self.raw_dwell_ms = ms;
        self
    }
    /// Period of beacons (gateway) and presence announcements (listening thing).
    pub fn announce_interval_ms(mut self, ms: u32) -> Self {
        self.announce_interval_ms = ms;
        self
    }
    /// Silence after which a connected peer is sent a keepalive request.
    pub fn keepalive_interval_ms(mut self, ms: u32) -> Self {
        self.keepalive_interval_ms = ms;
        self
    }
    /// Silence after which a connected peer is dropped.
    pub fn link_timeout_ms(mut self, ms: u32) -> Self {
        self.link_timeout_ms = ms;
        self
    }
    /// Raw windows a staged message may fail in before it is dropped.
    pub fn max_tx_attempts(mut self, attempts: u8) -> Self {
        self.max_tx_attempts = attempts;
        self
    }
    /// Low byte base of the access addresses handed out by a gateway.
    pub fn access_address_seed(mut self, seed: u8) -> Self {
        self.access_address_seed = seed;
        self
    }
    /// Handshake retry policy.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Checks ranges and consistency.
    pub fn validate<E>(&self) -> Result<(), Error<E>> {
        let mtu = self.mtu as usize;
        let ok = (MAX_MANAGEMENT_PDU_SIZE..=MAX_PAYLOAD_SIZE as usize).contains(&mtu)
            && self.management_channel <= Self::MAX_CHANNEL
            && self.data_channel <= Self::MAX_CHANNEL
            && self.management_channel != self.data_channel
            && self.management_dwell_ms > 0
            && self.raw_dwell_ms > 0
            && self.max_tx_attempts > 0
            && self.retry.max_attempts > 0
            && self.retry.initial_backoff_ms > 0
            && self.retry.initial_backoff_ms <= self.retry.max_backoff_ms
            && self.keepalive_interval_ms < self.link_timeout_ms;
        if ok {
            Ok(())
        } else {
            Err(Error::InvalidArgument)
        }
    }
}
