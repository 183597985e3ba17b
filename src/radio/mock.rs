//! In-memory radio used by the unit tests.

use std::collections::VecDeque;
use std::vec::Vec;

use super::{Ack, Radio};
use crate::address::AccessAddress;
use crate::config::DataPipe;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Mode {
    Standby,
    Rx,
    Tx { pipe: DataPipe, ack: bool },
}

/// A frame put on air by the code under test.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Sent {
    pub channel: u8,
    pub pipe: DataPipe,
    pub ack: bool,
    pub address: Option<AccessAddress>,
    pub frame: Vec<u8>,
}

#[derive(Debug, Default)]
pub(crate) struct MockRadio {
    pub channel: u8,
    pub mode: Option<Mode>,
    pub pipes: [Option<AccessAddress>; 6],
    pub sent: Vec<Sent>,
    pub inbox: VecDeque<(DataPipe, Vec<u8>)>,
    /// Acknowledgements handed out in order; `Ack::Received` once empty.
    pub acks: VecDeque<Ack>,
    pub fail_transmit: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct MockError;

impl MockRadio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inject(&mut self, pipe: DataPipe, frame: &[u8]) {
        self.inbox.push_back((pipe, frame.to_vec()));
    }

    pub fn take_sent(&mut self) -> Vec<Sent> {
        core::mem::take(&mut self.sent)
    }
}

impl Radio for MockRadio {
    type Error = MockError;

    fn set_channel(&mut self, channel: u8) -> Result<(), MockError> {
        self.channel = channel;
        Ok(())
    }

    fn open_pipe(&mut self, pipe: DataPipe, address: &AccessAddress) -> Result<(), MockError> {
        self.pipes[pipe as usize] = Some(*address);
        Ok(())
    }

    fn close_pipe(&mut self, pipe: DataPipe) -> Result<(), MockError> {
        self.pipes[pipe as usize] = None;
        Ok(())
    }

    fn set_standby(&mut self) -> Result<(), MockError> {
        self.mode = Some(Mode::Standby);
        Ok(())
    }

    fn set_rx_mode(&mut self) -> Result<(), MockError> {
        self.mode = Some(Mode::Rx);
        Ok(())
    }

    fn set_tx_mode(&mut self, pipe: DataPipe, ack: bool) -> Result<(), MockError> {
        self.mode = Some(Mode::Tx { pipe, ack });
        Ok(())
    }

    fn transmit(&mut self, frame: &[u8]) -> Result<usize, MockError> {
        if self.fail_transmit {
            return Err(MockError);
        }
        let Some(Mode::Tx { pipe, ack }) = self.mode else {
            panic!("transmit outside of TX mode");
        };
        assert!(frame.len() <= 32, "frame exceeds the radio MTU");
        self.sent.push(Sent {
            channel: self.channel,
            pipe,
            ack,
            address: self.pipes[pipe as usize],
            frame: frame.to_vec(),
        });
        Ok(frame.len())
    }

    fn wait_for_ack(&mut self) -> Result<Ack, MockError> {
        Ok(self.acks.pop_front().unwrap_or(Ack::Received))
    }

    fn poll_available_pipe(&mut self) -> Result<Option<DataPipe>, MockError> {
        if self.mode != Some(Mode::Rx) {
            return Ok(None);
        }
        Ok(self.inbox.front().map(|(pipe, _)| *pipe))
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, MockError> {
        let (_, frame) = self.inbox.pop_front().ok_or(MockError)?;
        let n = frame.len().min(buf.len());
        buf[..n].copy_from_slice(&frame[..n]);
        Ok(n)
    }
}
