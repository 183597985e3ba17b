//! Decoding of the STATUS and FIFO_STATUS registers.

use crate::config::DataPipe;

/// Content of the STATUS register, returned by every SPI command.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Status(u8);

/// Content of the FIFO_STATUS register.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FIFOStatus(u8);

impl Status {
    const RX_DR: u8 = 1 << 6;
    const TX_DS: u8 = 1 << 5;
    const MAX_RT: u8 = 1 << 4;
    const RX_P_NO_EMPTY: u8 = 0b111;

    /// Status with only the three interrupt flags set, written back to clear them.
    pub(crate) fn flags() -> Self {
        Status(Self::RX_DR | Self::TX_DS | Self::MAX_RT)
    }
    pub(crate) fn value(&self) -> u8 {
        self.0
    }
    /// The reserved top bit reads as 0 on a healthy bus.
    pub fn is_valid(&self) -> bool {
        (self.0 & (1 << 7)) == 0
    }
    /// A payload arrived in the RX FIFO.
    pub fn data_ready(&self) -> bool {
        (self.0 & Self::RX_DR) != 0
    }
    /// The last payload was sent (and acknowledged when ACK is enabled).
    pub fn data_sent(&self) -> bool {
        (self.0 & Self::TX_DS) != 0
    }
    /// The retransmission budget ran out.
    pub fn reached_max_retries(&self) -> bool {
        (self.0 & Self::MAX_RT) != 0
    }
    /// Pipe of the payload at the head of the RX FIFO, `None` when the FIFO is empty.
    pub fn data_pipe_available(&self) -> Option<DataPipe> {
        match (self.0 >> 1) & 0b111 {
            Self::RX_P_NO_EMPTY => None,
            n => DataPipe::new(n),
        }
    }
    /// The TX FIFO is full.
    pub fn tx_full(&self) -> bool {
        (self.0 & 0b1) != 0
    }
}

impl FIFOStatus {
    /// Returns `true` if there are no available locations in transmission queue
    pub fn tx_full(&self) -> bool {
        self.0 & (1 << 5) != 0
    }

    /// Returns `true` if the transmission queue is empty
    pub fn tx_empty(&self) -> bool {
        self.0 & (1 << 4) != 0
    }

    /// Returns `true` if there are no available locations in receive queue
    pub fn rx_full(&self) -> bool {
        self.0 & (1 << 1) != 0
    }

    /// Returns `true` if the receive queue is empty
    pub fn rx_empty(&self) -> bool {
        self.0 & 1 != 0
    }
}

impl From<u8> for Status {
    fn from(t: u8) -> Self {
        Status(t)
    }
}

impl From<u8> for FIFOStatus {
    fn from(t: u8) -> Self {
        FIFOStatus(t)
    }
}
