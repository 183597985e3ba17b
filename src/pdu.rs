//! Link-layer PDUs.
//!
//! Two families share the air:
//!
//! * data PDUs, sent on pipes 1-5, carry message fragments or a nested control PDU,
//! * management PDUs, sent on pipe 0 of the management channel, carry announcements
//!   and connection handshakes.
//!
//! ```text
//! data:       [llid:2 | seq:6][reserved][payload ...]
//! management: [type:4 | reserved:4][payload ...]
//! control:    [data header, llid = control][opcode][payload ...]
//! ```
//!
//! No PDU is ever longer than the radio MTU.

use crate::address::{AccessAddress, MacAddress};
use crate::error::FrameError;

/// Size of the data PDU header.
pub const DATA_HEADER_SIZE: usize = 2;
/// Size of the management PDU header.
pub const MANAGEMENT_HEADER_SIZE: usize = 1;
/// Number of distinct sequence numbers, and so the maximum fragment count of a message.
pub const SEQUENCE_SPACE: usize = 64;
/// Largest encoded management PDU (a connect request).
pub const MAX_MANAGEMENT_PDU_SIZE: usize =
    MANAGEMENT_HEADER_SIZE + 2 * MacAddress::LEN + 1 + AccessAddress::LEN + 1;
/// Protocol version sent in version indications.
pub const PROTOCOL_VERSION: (u8, u8) = (1, 0);

const SEQUENCE_MASK: u8 = 0x3f;

/// Payload bytes carried by one fragment for a given MTU.
#[inline]
pub const fn fragment_payload_size(mtu: usize) -> usize {
    mtu - DATA_HEADER_SIZE
}

/// Longest message the fragmentation engine accepts for a given MTU.
#[inline]
pub const fn max_message_size(mtu: usize) -> usize {
    SEQUENCE_SPACE * fragment_payload_size(mtu)
}

/// Next sequence number, modulo the 6-bit sequence space.
#[inline]
pub(crate) fn next_sequence(seq: u8) -> u8 {
    seq.wrapping_add(1) & SEQUENCE_MASK
}

/// What a data PDU carries.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum LogicalId {
    /// A fragment followed by more fragments of the same message.
    Fragment = 0b01,
    /// The last fragment of a message.
    End = 0b10,
    /// A control PDU.
    Control = 0b11,
}

impl TryFrom<u8> for LogicalId {
    type Error = FrameError;

    fn try_from(t: u8) -> Result<Self, Self::Error> {
        match t & 0b11 {
            0b01 => Ok(Self::Fragment),
            0b10 => Ok(Self::End),
            0b11 => Ok(Self::Control),
            _ => Err(FrameError::Malformed),
        }
    }
}

/// Header of a data PDU.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DataHeader {
    /// Kind of payload.
    pub llid: LogicalId,
    /// Fragment sequence number, 0-63.
    pub seq: u8,
}

impl DataHeader {
    /// Creates a header. Only the low 6 bits of `seq` are kept.
    pub fn new(llid: LogicalId, seq: u8) -> Self {
        Self {
            llid,
            seq: seq & SEQUENCE_MASK,
        }
    }

    /// Encodes the header.
    pub fn to_bytes(&self) -> [u8; DATA_HEADER_SIZE] {
        [(self.llid as u8) | (self.seq << 2), 0]
    }

    /// Decodes the header from the start of `buf`.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < DATA_HEADER_SIZE {
            return Err(FrameError::Malformed);
        }
        Ok(Self {
            llid: LogicalId::try_from(buf[0])?,
            seq: buf[0] >> 2,
        })
    }
}

/// A parsed data PDU borrowing its payload from the receive buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DataPdu<'a> {
    /// Decoded header.
    pub header: DataHeader,
    /// Bytes following the header.
    pub payload: &'a [u8],
}

impl<'a> DataPdu<'a> {
    /// Parses a received frame.
    pub fn parse(frame: &'a [u8]) -> Result<Self, FrameError> {
        let header = DataHeader::from_bytes(frame)?;
        Ok(Self {
            header,
            payload: &frame[DATA_HEADER_SIZE..],
        })
    }

    /// Writes `header` followed by `payload` into `out`, returning the frame length.
    pub fn write(header: DataHeader, payload: &[u8], out: &mut [u8]) -> Result<usize, FrameError> {
        let len = DATA_HEADER_SIZE + payload.len();
        if out.len() < len {
            return Err(FrameError::BufferTooSmall);
        }
        out[..DATA_HEADER_SIZE].copy_from_slice(&header.to_bytes());
        out[DATA_HEADER_SIZE..len].copy_from_slice(payload);
        Ok(len)
    }
}

/// Connection request exchanged on the management pipe.
///
/// The gateway sends it to hand a thing its data channel and access address; the
/// thing answers with the same request, source and destination swapped.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnectRequest {
    /// Sender of the request.
    pub src: MacAddress,
    /// Intended receiver.
    pub dst: MacAddress,
    /// Data channel the session will use.
    pub channel: u8,
    /// Access address of the session pipe.
    pub access_address: AccessAddress,
}

impl ConnectRequest {
    /// The answer `own` sends back to the requester.
    pub fn reply(&self, own: MacAddress) -> Self {
        Self {
            src: own,
            dst: self.src,
            ..*self
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
enum ManagementType {
    Beacon = 0,
    Presence = 1,
    Setup = 2,
    ConnectRequest = 3,
}

/// PDUs carried on the management pipe.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ManagementPdu {
    /// A gateway announcing itself and the data channel it serves.
    Beacon {
        /// Gateway address.
        src: MacAddress,
        /// Data channel of the gateway.
        channel: u8,
    },
    /// A listening thing announcing itself.
    Presence {
        /// Thing address.
        src: MacAddress,
    },
    /// A thing asking one gateway to connect it.
    Setup {
        /// Thing address.
        src: MacAddress,
        /// Gateway address.
        dst: MacAddress,
    },
    /// Connection handshake.
    ConnectRequest(ConnectRequest),
}

impl ManagementPdu {
    fn kind(&self) -> ManagementType {
        match self {
            Self::Beacon { .. } => ManagementType::Beacon,
            Self::Presence { .. } => ManagementType::Presence,
            Self::Setup { .. } => ManagementType::Setup,
            Self::ConnectRequest(_) => ManagementType::ConnectRequest,
        }
    }

    /// Encoded length of this PDU.
    pub fn encoded_len(&self) -> usize {
        MANAGEMENT_HEADER_SIZE
            + match self {
                Self::Beacon { .. } => MacAddress::LEN + 1,
                Self::Presence { .. } => MacAddress::LEN,
                Self::Setup { .. } => 2 * MacAddress::LEN,
                Self::ConnectRequest(_) => 2 * MacAddress::LEN + 1 + AccessAddress::LEN + 1,
            }
    }

    /// Encodes the PDU into `out`, returning its length.
    pub fn encode(&self, out: &mut [u8]) -> Result<usize, FrameError> {
        let len = self.encoded_len();
        if out.len() < len {
            return Err(FrameError::BufferTooSmall);
        }
        out[0] = self.kind() as u8;
        let body = &mut out[MANAGEMENT_HEADER_SIZE..len];
        match self {
            Self::Beacon { src, channel } => {
                body[..8].copy_from_slice(src.as_bytes());
                body[8] = *channel;
            }
            Self::Presence { src } => body.copy_from_slice(src.as_bytes()),
            Self::Setup { src, dst } => {
                body[..8].copy_from_slice(src.as_bytes());
                body[8..16].copy_from_slice(dst.as_bytes());
            }
            Self::ConnectRequest(req) => {
                body[..8].copy_from_slice(req.src.as_bytes());
                body[8..16].copy_from_slice(req.dst.as_bytes());
                body[16] = req.channel;
                body[17..22].copy_from_slice(req.access_address.as_bytes());
                body[22] = 0;
            }
        }
        Ok(len)
    }

    /// Decodes a management frame. Trailing bytes are ignored.
    pub fn decode(frame: &[u8]) -> Result<Self, FrameError> {
        let (&head, body) = frame.split_first().ok_or(FrameError::Malformed)?;
        let pdu = match head & 0x0f {
            0 => {
                need(body, MacAddress::LEN + 1)?;
                Self::Beacon {
                    src: MacAddress::read(body),
                    channel: body[8],
                }
            }
            1 => {
                need(body, MacAddress::LEN)?;
                Self::Presence {
                    src: MacAddress::read(body),
                }
            }
            2 => {
                need(body, 2 * MacAddress::LEN)?;
                Self::Setup {
                    src: MacAddress::read(body),
                    dst: MacAddress::read(&body[8..]),
                }
            }
            3 => {
                need(body, 2 * MacAddress::LEN + 1 + AccessAddress::LEN)?;
                Self::ConnectRequest(ConnectRequest {
                    src: MacAddress::read(body),
                    dst: MacAddress::read(&body[8..]),
                    channel: body[16],
                    access_address: AccessAddress::read(&body[17..]),
                })
            }
            t => return Err(FrameError::UnknownType(t)),
        };
        Ok(pdu)
    }
}

/// Control PDUs, nested in a data PDU with [`LogicalId::Control`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControlPdu {
    /// Liveness check.
    KeepaliveRequest {
        /// Peer asking.
        src: MacAddress,
        /// Peer asked.
        dst: MacAddress,
    },
    /// Answer to a liveness check.
    KeepaliveResponse {
        /// Peer asked.
        src: MacAddress,
        /// Peer asking.
        dst: MacAddress,
    },
    /// Protocol version of the sender.
    VersionIndication {
        /// Major version.
        major: u8,
        /// Minor version.
        minor: u8,
    },
    /// The sender is tearing the session down.
    Disconnect {
        /// Leaving side.
        src: MacAddress,
        /// Remaining side.
        dst: MacAddress,
    },
}

const OP_KEEPALIVE_REQUEST: u8 = 0x01;
const OP_KEEPALIVE_RESPONSE: u8 = 0x02;
const OP_VERSION_INDICATION: u8 = 0x03;
const OP_DISCONNECT: u8 = 0x04;

impl ControlPdu {
    fn opcode(&self) -> u8 {
        match self {
            Self::KeepaliveRequest { .. } => OP_KEEPALIVE_REQUEST,
            Self::KeepaliveResponse { .. } => OP_KEEPALIVE_RESPONSE,
            Self::VersionIndication { .. } => OP_VERSION_INDICATION,
            Self::Disconnect { .. } => OP_DISCONNECT,
        }
    }

    /// Encodes a complete data frame (header, opcode, payload) into `out`.
    pub fn encode_frame(&self, out: &mut [u8]) -> Result<usize, FrameError> {
        let body_len = match self {
            Self::VersionIndication { .. } => 2,
            _ => 2 * MacAddress::LEN,
        };
        let len = DATA_HEADER_SIZE + 1 + body_len;
        if out.len() < len {
            return Err(FrameError::BufferTooSmall);
        }
        out[..DATA_HEADER_SIZE].copy_from_slice(&DataHeader::new(LogicalId::Control, 0).to_bytes());
        out[DATA_HEADER_SIZE] = self.opcode();
        let body = &mut out[DATA_HEADER_SIZE + 1..len];
        match self {
            Self::KeepaliveRequest { src, dst }
            | Self::KeepaliveResponse { src, dst }
            | Self::Disconnect { src, dst } => {
                body[..8].copy_from_slice(src.as_bytes());
                body[8..].copy_from_slice(dst.as_bytes());
            }
            Self::VersionIndication { major, minor } => {
                body[0] = *major;
                body[1] = *minor;
            }
        }
        Ok(len)
    }

    /// Decodes the payload of a data PDU whose logical id is [`LogicalId::Control`].
    pub fn decode(payload: &[u8]) -> Result<Self, FrameError> {
        let (&op, body) = payload.split_first().ok_or(FrameError::Malformed)?;
        let pdu = match op {
            OP_VERSION_INDICATION => {
                need(body, 2)?;
                Self::VersionIndication {
                    major: body[0],
                    minor: body[1],
                }
            }
            OP_KEEPALIVE_REQUEST | OP_KEEPALIVE_RESPONSE | OP_DISCONNECT => {
                need(body, 2 * MacAddress::LEN)?;
                let src = MacAddress::read(body);
                let dst = MacAddress::read(&body[8..]);
                match op {
                    OP_KEEPALIVE_REQUEST => Self::KeepaliveRequest { src, dst },
                    OP_KEEPALIVE_RESPONSE => Self::KeepaliveResponse { src, dst },
                    _ => Self::Disconnect { src, dst },
                }
            }
            op => return Err(FrameError::UnknownType(op)),
        };
        Ok(pdu)
    }
}

fn need(body: &[u8], len: usize) -> Result<(), FrameError> {
    if body.len() < len {
        Err(FrameError::Malformed)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GW: MacAddress = MacAddress([0x10, 0x20, 0x30, 0x40, 0x50, 0x60, 0x70, 0x80]);
    const THING: MacAddress = MacAddress([0xde, 0xad, 0xbe, 0xef, 0x00, 0x01, 0x02, 0x03]);

    #[test]
    fn data_header_layout() {
        let h = DataHeader::new(LogicalId::End, 5);
        assert_eq!(h.to_bytes(), [0b0001_0110, 0]);
        assert_eq!(DataHeader::from_bytes(&[0b0001_0110, 0xaa]).unwrap(), h);
        assert_eq!(DataHeader::new(LogicalId::Fragment, 63).to_bytes()[0], 0xfd);
    }

    #[test]
    fn data_header_rejects_reserved_llid() {
        assert_eq!(DataHeader::from_bytes(&[0b0000_0100, 0]), Err(FrameError::Malformed));
        assert_eq!(DataHeader::from_bytes(&[0b01]), Err(FrameError::Malformed));
    }

    #[test]
    fn sequence_wraps_in_six_bits() {
        assert_eq!(next_sequence(0), 1);
        assert_eq!(next_sequence(63), 0);
    }

    #[test]
    fn max_message_for_chip_mtu() {
        assert_eq!(fragment_payload_size(32), 30);
        assert_eq!(max_message_size(32), 1920);
    }

    #[test]
    fn connect_request_fits_mtu() {
        let pdu = ManagementPdu::ConnectRequest(ConnectRequest {
            src: GW,
            dst: THING,
            channel: 76,
            access_address: AccessAddress::new([1, 2, 3, 4, 5]),
        });
        let mut buf = [0u8; 32];
        let n = pdu.encode(&mut buf).unwrap();
        assert_eq!(n, MAX_MANAGEMENT_PDU_SIZE);
        assert_eq!(n, 24);
        assert_eq!(buf[0], 3);
        assert_eq!(&buf[1..9], GW.as_bytes());
        assert_eq!(&buf[9..17], THING.as_bytes());
        assert_eq!(buf[17], 76);
        assert_eq!(&buf[18..23], &[1, 2, 3, 4, 5]);
        assert_eq!(ManagementPdu::decode(&buf[..n]).unwrap(), pdu);
    }

    #[test]
    fn management_encode_respects_buffer() {
        let pdu = ManagementPdu::Setup { src: THING, dst: GW };
        let mut small = [0u8; 16];
        assert_eq!(pdu.encode(&mut small), Err(FrameError::BufferTooSmall));
    }

    #[test]
    fn management_decode_errors() {
        assert_eq!(ManagementPdu::decode(&[]), Err(FrameError::Malformed));
        assert_eq!(ManagementPdu::decode(&[0x07, 0, 0]), Err(FrameError::UnknownType(7)));
        assert_eq!(ManagementPdu::decode(&[0x03, 1, 2, 3]), Err(FrameError::Malformed));
        // reserved nibble is ignored
        let mut buf = [0u8; 9];
        ManagementPdu::Presence { src: THING }.encode(&mut buf).unwrap();
        buf[0] |= 0xa0;
        assert_eq!(
            ManagementPdu::decode(&buf).unwrap(),
            ManagementPdu::Presence { src: THING }
        );
    }

    #[test]
    fn control_frames_carry_control_llid() {
        let mut buf = [0u8; 32];
        let n = ControlPdu::Disconnect { src: GW, dst: THING }
            .encode_frame(&mut buf)
            .unwrap();
        assert_eq!(n, 19);
        let pdu = DataPdu::parse(&buf[..n]).unwrap();
        assert_eq!(pdu.header.llid, LogicalId::Control);
        assert_eq!(
            ControlPdu::decode(pdu.payload).unwrap(),
            ControlPdu::Disconnect { src: GW, dst: THING }
        );
    }

    #[test]
    fn version_indication_is_short() {
        let mut buf = [0u8; 8];
        let n = ControlPdu::VersionIndication { major: 1, minor: 0 }
            .encode_frame(&mut buf)
            .unwrap();
        assert_eq!(&buf[..n], &[0b11, 0, OP_VERSION_INDICATION, 1, 0]);
        assert_eq!(ControlPdu::decode(&[0x09]), Err(FrameError::UnknownType(9)));
    }

    #[test]
    fn reply_swaps_endpoints() {
        let req = ConnectRequest {
            src: GW,
            dst: THING,
            channel: 90,
            access_address: AccessAddress::new([9; 5]),
        };
        let reply = req.reply(THING);
        assert_eq!(reply.src, THING);
        assert_eq!(reply.dst, GW);
        assert_eq!(reply.channel, 90);
        assert_eq!(reply.access_address, req.access_address);
    }
}
