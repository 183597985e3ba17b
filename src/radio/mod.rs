//! The capability the link layer needs from a radio.
//!
//! [`Nrf24l01`](crate::Nrf24l01) implements it on top of the SPI register interface.
//! Other transports plug in by implementing the same trait; the link layer picks the
//! backend through its type parameter.

use crate::address::AccessAddress;
use crate::config::DataPipe;

#[cfg(test)]
pub(crate) mod mock;

/// Outcome of waiting for the hardware acknowledgement of a transmitted frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Ack {
    /// The receiver acknowledged the frame, or acknowledgement was disabled.
    Received,
    /// The retry budget ran out without an acknowledgement.
    TimedOut,
}

/// Low-level operations of a pipe based 2.4 GHz radio.
///
/// Every method returns immediately; none of them waits on the peer except
/// [`wait_for_ack`](Radio::wait_for_ack), which is bounded by the chip's own
/// retransmission budget.
pub trait Radio {
    /// Backend error.
    type Error;

    /// Tunes to `channel`.
    fn set_channel(&mut self, channel: u8) -> Result<(), Self::Error>;

    /// Listens for `address` on `pipe`.
    fn open_pipe(&mut self, pipe: DataPipe, address: &AccessAddress) -> Result<(), Self::Error>;

    /// Stops listening on `pipe`.
    fn close_pipe(&mut self, pipe: DataPipe) -> Result<(), Self::Error>;

    /// Leaves RX/TX and idles.
    fn set_standby(&mut self) -> Result<(), Self::Error>;

    /// Starts receiving on every open pipe.
    fn set_rx_mode(&mut self) -> Result<(), Self::Error>;

    /// Prepares to transmit to the address of `pipe`, with or without hardware
    /// acknowledgement.
    fn set_tx_mode(&mut self, pipe: DataPipe, ack: bool) -> Result<(), Self::Error>;

    /// Sends one frame. Returns the number of bytes put on air.
    fn transmit(&mut self, frame: &[u8]) -> Result<usize, Self::Error>;

    /// Waits for the acknowledgement of the last transmitted frame.
    fn wait_for_ack(&mut self) -> Result<Ack, Self::Error>;

    /// The pipe of the oldest frame waiting in the receive FIFO, if any.
    fn poll_available_pipe(&mut self) -> Result<Option<DataPipe>, Self::Error>;

    /// Pops the oldest received frame into `buf`, returning its length.
    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;
}
