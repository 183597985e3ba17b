//! Fragmentation and reassembly of messages larger than one frame.
//!
//! A message is cut into chunks of `mtu - 2` bytes. Every chunk travels in a data PDU
//! whose sequence number counts from 0; all chunks but the last carry
//! [`LogicalId::Fragment`], the last one [`LogicalId::End`]. With 6 sequence bits a
//! message spans at most 64 frames.
//!
//! ```text
//! 45 bytes, mtu 32:  [Fragment seq 0 | 30 bytes] [End seq 1 | 15 bytes]
//! ```
//!
//! Reassembly state lives in a [`Reassembler`] owned by each session, so any number
//! of sessions can be mid-message at the same time.

use embedded_hal::delay::DelayNs;

use crate::error::{Error, FrameError};
use crate::logging::{debug, trace};
use crate::pdu::{
    fragment_payload_size, max_message_size, next_sequence, DataHeader, DataPdu, LogicalId,
    DATA_HEADER_SIZE,
};
use crate::radio::{Ack, Radio};
use crate::MAX_PAYLOAD_SIZE;

/// Iterator over the fragments of one message, see [`fragments`].
#[derive(Debug, Clone)]
pub struct Fragments<'a> {
    rest: &'a [u8],
    chunk: usize,
    seq: u8,
}

impl<'a> Iterator for Fragments<'a> {
    type Item = (DataHeader, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        let (head, rest) = self.rest.split_at(self.chunk.min(self.rest.len()));
        let llid = if rest.is_empty() {
            LogicalId::End
        } else {
            LogicalId::Fragment
        };
        let header = DataHeader::new(llid, self.seq);
        self.seq = next_sequence(self.seq);
        self.rest = rest;
        Some((header, head))
    }
}

/// Splits `message` into the headers and payload chunks to put on air.
///
/// Fails with [`FrameError::OversizedMessage`] for an empty message or one longer than
/// 64 fragments, and with [`FrameError::BufferTooSmall`] when `mtu` cannot carry a
/// fragment (at most 2 or above the chip payload size).
pub fn fragments(message: &[u8], mtu: usize) -> Result<Fragments<'_>, FrameError> {
    if mtu <= DATA_HEADER_SIZE || mtu > MAX_PAYLOAD_SIZE as usize {
        return Err(FrameError::BufferTooSmall);
    }
    if message.is_empty() || message.len() > max_message_size(mtu) {
        return Err(FrameError::OversizedMessage);
    }
    Ok(Fragments {
        rest: message,
        chunk: fragment_payload_size(mtu),
        seq: 0,
    })
}

/// Sends `message` on the pipe the radio is currently set to transmit on.
///
/// Each fragment waits for its hardware acknowledgement and is followed by
/// `inter_frame_delay_us` of silence. Nothing is sent when the message is too long.
/// A missing acknowledgement aborts the rest of the message with [`Error::TimedOut`].
pub fn send<R, D>(
    radio: &mut R,
    delay: &mut D,
    mtu: usize,
    inter_frame_delay_us: u32,
    message: &[u8],
) -> Result<usize, Error<R::Error>>
where
    R: Radio,
    D: DelayNs,
{
    let mut frame = [0u8; MAX_PAYLOAD_SIZE as usize];
    for (header, chunk) in fragments(message, mtu)? {
        let len = DataPdu::write(header, chunk, &mut frame)?;
        radio.transmit(&frame[..len]).map_err(Error::Radio)?;
        if radio.wait_for_ack().map_err(Error::Radio)? == Ack::TimedOut {
            debug!("fragment {} of {} bytes not acknowledged", header.seq, message.len());
            return Err(Error::TimedOut);
        }
        delay.delay_us(inter_frame_delay_us);
    }
    Ok(message.len())
}

/// Result of feeding one fragment to a [`Reassembler`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Progress {
    /// More fragments are needed.
    Incomplete,
    /// A message of this many bytes sits at the start of the output buffer.
    Complete(usize),
}

/// Reassembly state of one session.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Reassembler {
    expected: u8,
    offset: usize,
    // The current message was already delivered or dropped, discard up to its end
    draining: bool,
}

impl Reassembler {
    /// Fresh state, waiting for sequence 0.
    pub const fn new() -> Self {
        Self {
            expected: 0,
            offset: 0,
            draining: false,
        }
    }

    /// Whether part of a message has been consumed.
    pub fn in_progress(&self) -> bool {
        self.expected != 0
    }

    /// Forgets any partial message.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Appends the payload of `pdu` to `out`.
    ///
    /// `out` must be the same buffer for every fragment of a message. When it fills up
    /// before the [`LogicalId::End`] fragment the truncated message is reported as
    /// complete and the remaining fragments are checked and discarded.
    ///
    /// Any error resets the state so that the next message starts clean.
    pub fn push(
        &mut self,
        pdu: &DataPdu<'_>,
        mtu: usize,
        out: &mut [u8],
    ) -> Result<Progress, FrameError> {
        self.check(pdu, mtu)?;
        let end = pdu.header.llid == LogicalId::End;

        if self.draining {
            self.advance(end);
            return Ok(Progress::Incomplete);
        }

        if self.offset > out.len() {
            // a shorter buffer than the one the message started in
            self.reset();
            return Err(FrameError::BufferTooSmall);
        }
        let room = out.len() - self.offset;
        let n = room.min(pdu.payload.len());
        out[self.offset..self.offset + n].copy_from_slice(&pdu.payload[..n]);
        self.offset += n;

        if end {
            let total = self.offset;
            self.reset();
            Ok(Progress::Complete(total))
        } else if self.offset >= out.len() {
            trace!("message truncated at {} bytes", self.offset);
            let total = self.offset;
            self.draining = true;
            self.advance(false);
            Ok(Progress::Complete(total))
        } else {
            self.advance(false);
            Ok(Progress::Incomplete)
        }
    }

    /// Consumes `pdu` without storing it, and discards the rest of its message.
    pub fn skip(&mut self, pdu: &DataPdu<'_>, mtu: usize) -> Result<(), FrameError> {
        self.check(pdu, mtu)?;
        self.draining = true;
        self.advance(pdu.header.llid == LogicalId::End);
        Ok(())
    }

    fn check(&mut self, pdu: &DataPdu<'_>, mtu: usize) -> Result<(), FrameError> {
        let chunk = fragment_payload_size(mtu);
        let result = match pdu.header.llid {
            LogicalId::Control => return Err(FrameError::Malformed),
            _ if pdu.header.seq != self.expected => Err(FrameError::IllegalSequence {
                expected: self.expected,
                received: pdu.header.seq,
            }),
            LogicalId::Fragment if pdu.payload.len() != chunk => Err(FrameError::Malformed),
            LogicalId::End if pdu.payload.is_empty() || pdu.payload.len() > chunk => {
                Err(FrameError::Malformed)
            }
            _ => Ok(()),
        };
        if result.is_err() {
            self.reset();
        }
        result
    }

    fn advance(&mut self, end: bool) {
        if end {
            self.reset();
        } else {
            self.expected = next_sequence(self.expected);
        }
    }
}

/// Polls the radio until a whole message has been reassembled into `out`.
///
/// Returns [`Error::WouldBlock`] as soon as the receive FIFO is empty; progress is kept
/// in `reassembler` for the next call. Control frames are skipped.
pub fn receive<R: Radio>(
    radio: &mut R,
    reassembler: &mut Reassembler,
    mtu: usize,
    out: &mut [u8],
) -> Result<usize, Error<R::Error>> {
    let mut frame = [0u8; MAX_PAYLOAD_SIZE as usize];
    loop {
        if radio.poll_available_pipe().map_err(Error::Radio)?.is_none() {
            return Err(Error::WouldBlock);
        }
        let len = radio.receive(&mut frame).map_err(Error::Radio)?;
        let pdu = DataPdu::parse(&frame[..len])?;
        if pdu.header.llid == LogicalId::Control {
            continue;
        }
        if let Progress::Complete(n) = reassembler.push(&pdu, mtu, out)? {
            return Ok(n);
        }
    }
}
