use core::fmt;

/// Errors that can occur when sending and receiving data through the nRF24L01 driver.
#[derive(Copy, Clone, Debug)]
pub enum TransferError<SPIError, PinError> {
    /// SPI communication error
    Spi(SPIError),
    /// Pin set error
    Pin(PinError),
    /// Communication error with module
    CommunicationError(u8),
    /// Max retries reached
    MaximumRetries,
}

/// Errors raised while encoding, decoding or reassembling link-layer frames.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// The output buffer cannot hold the encoded frame or message.
    BufferTooSmall,
    /// The message is empty or larger than 64 fragments of the MTU.
    OversizedMessage,
    /// The frame is shorter than its header or carries an invalid field.
    Malformed,
    /// Unknown management PDU type or control opcode.
    UnknownType(u8),
    /// A fragment arrived out of order.
    IllegalSequence {
        /// Sequence number the session was waiting for.
        expected: u8,
        /// Sequence number carried by the fragment.
        received: u8,
    },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferTooSmall => f.write_str("buffer too small"),
            Self::OversizedMessage => f.write_str("message length out of range"),
            Self::Malformed => f.write_str("malformed frame"),
            Self::UnknownType(t) => write!(f, "unknown frame type {:#04x}", t),
            Self::IllegalSequence { expected, received } => {
                write!(f, "illegal sequence: expected {}, got {}", expected, received)
            }
        }
    }
}

/// Errors returned by the link-layer socket API.
///
/// `E` is the error type of the underlying [`Radio`](crate::radio::Radio).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error<E> {
    /// Nothing to do right now, call again later.
    WouldBlock,
    /// Bad length, bad descriptor, unknown protocol or a frame not meant for us.
    InvalidArgument,
    /// No free pipe left in the peer table.
    ResourceExhausted,
    /// A previously staged buffer has not been drained yet.
    Busy,
    /// The peer broke the framing rules.
    Protocol(FrameError),
    /// The link is not initialized, already initialized, or the descriptor is
    /// in the wrong state for this call.
    NotPermitted,
    /// The operation has no meaning for this descriptor or role.
    Unimplemented,
    /// A deadline passed: handshake retries exhausted, missing hardware ACK
    /// or the blocking adapter gave up.
    TimedOut,
    /// The peer sent a disconnect notice or stopped answering keepalives.
    Disconnected,
    /// The radio backend failed.
    Radio(E),
}

impl<E> From<FrameError> for Error<E> {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::BufferTooSmall | FrameError::OversizedMessage => Error::InvalidArgument,
            e => Error::Protocol(e),
        }
    }
}

impl<E: fmt::Debug> fmt::Display for Error<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WouldBlock => f.write_str("operation would block"),
            Self::InvalidArgument => f.write_str("invalid argument"),
            Self::ResourceExhausted => f.write_str("too many users"),
            Self::Busy => f.write_str("resource busy"),
            Self::Protocol(e) => write!(f, "protocol violation: {}", e),
            Self::NotPermitted => f.write_str("operation not permitted"),
            Self::Unimplemented => f.write_str("operation not supported"),
            Self::TimedOut => f.write_str("timed out"),
            Self::Disconnected => f.write_str("peer disconnected"),
            Self::Radio(e) => write!(f, "radio error: {:?}", e),
        }
    }
}

/// Failures recorded against a session while the scheduler runs, handed to the
/// owner on its next `read` or `write`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum Fault {
    Protocol(FrameError),
    TimedOut,
    Disconnected,
}

impl Fault {
    pub(crate) fn into_error<E>(self) -> Error<E> {
        match self {
            Fault::Protocol(e) => Error::Protocol(e),
            Fault::TimedOut => Error::TimedOut,
            Fault::Disconnected => Error::Disconnected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_errors_become_invalid_argument() {
        let e: Error<()> = FrameError::OversizedMessage.into();
        assert_eq!(e, Error::InvalidArgument);
        let e: Error<()> = FrameError::BufferTooSmall.into();
        assert_eq!(e, Error::InvalidArgument);
    }

    #[test]
    fn framing_errors_become_protocol_violations() {
        let seq = FrameError::IllegalSequence {
            expected: 1,
            received: 3,
        };
        let e: Error<()> = seq.into();
        assert_eq!(e, Error::Protocol(seq));
    }
}
