//! This crate provides a link-layer protocol stack for the nRF24L01+ single chip 2.4 GHz
//! transceiver by Nordic Semiconductor, built on the [`embedded-hal`] traits.
//!
//! [`embedded-hal`]: https://github.com/rust-embedded/embedded-hal
//!
//! A *gateway* serves up to five *things*. Both sides share one radio between a common
//! management channel, where gateways send beacons and things announce themselves, and
//! a data channel carrying acknowledged, fragmented messages on one pipe per peer.
//! Applications talk to the stack through a small non-blocking socket API on [`Link`].
//!
//! # Usage
//!
//! ```toml
//! [dependencies]
//! nrf24-link = "0.1"
//! ```
//!
//! # Examples
//!
//! ```ignore
//! use nrf24_link::config::{LinkConfig, NrfConfig};
//! use nrf24_link::{Gateway, Nrf24l01, Protocol};
//!
//! let radio = Nrf24l01::new(spi, ce, delay, NrfConfig::default())?;
//! let mut gateway = Gateway::new(radio, || millis(), delay, LinkConfig::gateway(own));
//! gateway.init()?;
//!
//! let socket = gateway.socket(Protocol::Raw)?;
//! gateway.connect(socket, thing)?;
//! gateway.poll_until(5_000, 1_000, |link| link.accept(socket))?;
//! gateway.write(socket, b"hello")?;
//! ```
//!
//! # Feature-flags
//!
//! - **defmt:** log through [defmt](https://docs.rs/defmt) instead of the [log](https://docs.rs/log)
//!   facade, and derive `defmt::Format` for all public structs and enums.
//! - **async:** adds [`Link::poll_until_async`] on top of `embedded-hal-async` delays.
#![warn(
    missing_docs,
    missing_copy_implementations,
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts
)]
#![cfg_attr(not(test), no_std)]
extern crate embedded_hal as hal;
use hal::spi;

mod address;
mod blocking;
mod clock;
pub mod config;
mod error;
pub mod fragment;
mod handshake;
mod link;
mod logging;
mod nrf24;
pub mod pdu;
mod peer;
pub mod radio;
mod register_acces;
mod scheduler;
pub mod status;

pub use crate::address::{AccessAddress, AddressParseError, MacAddress};
pub use crate::clock::{Clock, Deadline};
pub use crate::error::{Error, FrameError, TransferError};
pub use crate::handshake::Handshake;
pub use crate::link::{
    Gateway, Link, Protocol, Thing, UnknownProtocol, MAX_DISCOVERED, MAX_KNOWN_PEERS,
};
pub use crate::nrf24::Nrf24l01;
pub use crate::peer::{ConnectionState, Descriptor, MAX_PEERS};
pub use crate::radio::{Ack, Radio};
pub use crate::scheduler::Window;

/// SPI mode. Use this when initializing the SPI instance.
pub const SPI_MODE: spi::Mode = spi::MODE_0;
/// Max size in bytes of a single payload to be sent or recieved.
pub const MAX_PAYLOAD_SIZE: u8 = 32;
/// Largest message a raw socket carries: 64 fragments of 30 bytes at the full MTU.
pub const MAX_MESSAGE_SIZE: usize = pdu::max_message_size(MAX_PAYLOAD_SIZE as usize);
