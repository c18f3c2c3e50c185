//! OLSR message parsing and serialization based on RFC 3626
//!
//! This module provides:
//! - `Wire`: the encode/decode capability shared by every header and body
//! - `MessageHeader` and `Message`: the common 12-byte header plus a typed body
//! - `Hello`, `Tc`, `Mid`, `Hna`: the four message bodies
//! - `seconds_to_emf` / `emf_to_seconds`: the 8-bit validity-time encoding
//!
//! References:
//! - <https://tools.ietf.org/html/rfc3626#section-3.3> (message format)
//! - <https://tools.ietf.org/html/rfc3626#section-18.3> (validity time)

use std::io::Cursor;
use std::net::Ipv4Addr;
use std::time::Duration;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{DecodeError, EncodeError};

/// Size of the common message header on the wire.
pub const MESSAGE_HEADER_SIZE: usize = 12;

/// Scaling constant C of the validity-time encoding: 1/16 s, in nanoseconds.
const EMF_C_NANOS: u64 = 62_500_000;

/// Encode/decode capability implemented by every wire structure.
///
/// Bodies consume the whole slice they are given; headers consume a fixed
/// prefix. `deserialize` reports how many bytes were read.
pub trait Wire: Sized {
    fn serialized_size(&self) -> usize;
    fn serialize(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError>;
    fn deserialize(buf: &[u8]) -> Result<(Self, usize), DecodeError>;
}

/// Encode a duration into the 8-bit mantissa/exponent format.
///
/// The result never decodes to more than `value`: the mantissa is rounded
/// down. Durations below C map to 0x00, durations past the largest
/// representable value map to 0xff.
pub fn seconds_to_emf(value: Duration) -> u8 {
    let v = value.as_nanos();
    let c = EMF_C_NANOS as u128;
    if v < c {
        return 0;
    }
    let mut b = 0u32;
    while b < 15 && (c << (b + 1)) <= v {
        b += 1;
    }
    let base = c << b;
    let a = ((16 * (v - base)) / base).min(15) as u8;
    (a << 4) | b as u8
}

/// Decode the 8-bit mantissa/exponent format: `C * (1 + a/16) * 2^b`.
pub fn emf_to_seconds(emf: u8) -> Duration {
    let a = u64::from(emf >> 4);
    let b = u32::from(emf & 0x0f);
    Duration::from_nanos(((EMF_C_NANOS / 16) * (16 + a)) << b)
}

/// Advertised readiness to act as a multipoint relay (0 = never, 7 = always).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Willingness(u8);

impl Willingness {
    pub const NEVER: Willingness = Willingness(0);
    pub const LOW: Willingness = Willingness(1);
    pub const DEFAULT: Willingness = Willingness(3);
    pub const HIGH: Willingness = Willingness(6);
    pub const ALWAYS: Willingness = Willingness(7);

    /// `None` when `value` is outside 0..=7.
    pub fn new(value: u8) -> Option<Self> {
        (value <= 7).then_some(Willingness(value))
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Willingness {
    fn default() -> Self {
        Willingness::DEFAULT
    }
}

/// Link type: the low two bits of a link code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LinkType {
    Unspec = 0,
    Asym = 1,
    Sym = 2,
    Lost = 3,
}

/// Neighbor type: bits 2..4 of a link code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NeighborType {
    Not = 0,
    Sym = 1,
    Mpr = 2,
}

/// Combine link and neighbor type into a link code byte.
pub fn link_code(link: LinkType, neighbor: NeighborType) -> u8 {
    (link as u8 & 0x03) | (((neighbor as u8) << 2) & 0x0f)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Hello = 1,
    Tc = 2,
    Mid = 3,
    Hna = 4,
}

impl TryFrom<u8> for MessageType {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageType::Hello),
            2 => Ok(MessageType::Tc),
            3 => Ok(MessageType::Mid),
            4 => Ok(MessageType::Hna),
            other => Err(DecodeError::UnknownMessageType(other)),
        }
    }
}

fn short(cur: &Cursor<&[u8]>, start: u64, want: usize) -> DecodeError {
    DecodeError::Truncated {
        needed: start as usize + want,
        available: cur.get_ref().len(),
    }
}

pub(crate) fn read_u8(cur: &mut Cursor<&[u8]>) -> Result<u8, DecodeError> {
    let start = cur.position();
    cur.read_u8().map_err(|_| short(cur, start, 1))
}

pub(crate) fn read_u16(cur: &mut Cursor<&[u8]>) -> Result<u16, DecodeError> {
    let start = cur.position();
    cur.read_u16::<BigEndian>().map_err(|_| short(cur, start, 2))
}

pub(crate) fn read_addr(cur: &mut Cursor<&[u8]>) -> Result<Ipv4Addr, DecodeError> {
    let start = cur.position();
    cur.read_u32::<BigEndian>()
        .map(Ipv4Addr::from)
        .map_err(|_| short(cur, start, 4))
}

fn write_addr(buf: &mut Vec<u8>, addr: Ipv4Addr) -> Result<(), EncodeError> {
    buf.write_u32::<BigEndian>(u32::from(addr))?;
    Ok(())
}

fn read_addr_list(
    cur: &mut Cursor<&[u8]>,
    len: usize,
    what: &'static str,
) -> Result<Vec<Ipv4Addr>, DecodeError> {
    if len % 4 != 0 {
        return Err(DecodeError::Misaligned { what, len, width: 4 });
    }
    (0..len / 4).map(|_| read_addr(cur)).collect()
}

fn u16_len(what: &'static str, size: usize) -> Result<u16, EncodeError> {
    u16::try_from(size).map_err(|_| EncodeError::TooLarge { what, size })
}

/// The common header preceding every message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub message_type: MessageType,
    /// Validity time, raw mantissa/exponent byte.
    pub vtime: u8,
    /// Size of header plus body in bytes.
    pub message_size: u16,
    pub originator_address: Ipv4Addr,
    pub time_to_live: u8,
    pub hop_count: u8,
    pub message_sequence_number: u16,
}

impl Wire for MessageHeader {
    fn serialized_size(&self) -> usize {
        MESSAGE_HEADER_SIZE
    }

    fn serialize(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        buf.write_u8(self.message_type as u8)?;
        buf.write_u8(self.vtime)?;
        buf.write_u16::<BigEndian>(self.message_size)?;
        write_addr(buf, self.originator_address)?;
        buf.write_u8(self.time_to_live)?;
        buf.write_u8(self.hop_count)?;
        buf.write_u16::<BigEndian>(self.message_sequence_number)?;
        Ok(MESSAGE_HEADER_SIZE)
    }

    fn deserialize(buf: &[u8]) -> Result<(Self, usize), DecodeError> {
        if buf.len() < MESSAGE_HEADER_SIZE {
            return Err(DecodeError::Truncated {
                needed: MESSAGE_HEADER_SIZE,
                available: buf.len(),
            });
        }
        let mut cur = Cursor::new(buf);
        let message_type = MessageType::try_from(read_u8(&mut cur)?)?;
        let vtime = read_u8(&mut cur)?;
        let message_size = read_u16(&mut cur)?;
        let originator_address = read_addr(&mut cur)?;
        let time_to_live = read_u8(&mut cur)?;
        let hop_count = read_u8(&mut cur)?;
        let message_sequence_number = read_u16(&mut cur)?;
        let header = MessageHeader {
            message_type,
            vtime,
            message_size,
            originator_address,
            time_to_live,
            hop_count,
            message_sequence_number,
        };
        Ok((header, MESSAGE_HEADER_SIZE))
    }
}

/// One link-code block of a HELLO.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkMessage {
    pub link_code: u8,
    pub neighbor_interface_addresses: Vec<Ipv4Addr>,
}

impl LinkMessage {
    pub fn new(link: LinkType, neighbor: NeighborType, addrs: Vec<Ipv4Addr>) -> Self {
        LinkMessage {
            link_code: link_code(link, neighbor),
            neighbor_interface_addresses: addrs,
        }
    }

    pub fn link_type(&self) -> LinkType {
        match self.link_code & 0x03 {
            1 => LinkType::Asym,
            2 => LinkType::Sym,
            3 => LinkType::Lost,
            _ => LinkType::Unspec,
        }
    }

    /// `None` for the reserved neighbor-type value 3.
    pub fn neighbor_type(&self) -> Option<NeighborType> {
        match (self.link_code >> 2) & 0x03 {
            0 => Some(NeighborType::Not),
            1 => Some(NeighborType::Sym),
            2 => Some(NeighborType::Mpr),
            _ => None,
        }
    }

    /// RFC 3626 §7.1.1: SYM_LINK with NOT_NEIGH, or an unknown neighbor
    /// type, must not be processed.
    pub fn is_valid(&self) -> bool {
        match self.neighbor_type() {
            None => false,
            Some(NeighborType::Not) => self.link_type() != LinkType::Sym,
            Some(_) => true,
        }
    }

    fn serialized_size(&self) -> usize {
        4 + 4 * self.neighbor_interface_addresses.len()
    }
}

/// HELLO body: [Reserved(2), HTime(1), Willingness(1), LinkMessage...]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    /// Emission interval, raw mantissa/exponent byte.
    pub h_time: u8,
    pub willingness: Willingness,
    pub link_messages: Vec<LinkMessage>,
}

impl Hello {
    pub fn h_time(&self) -> Duration {
        emf_to_seconds(self.h_time)
    }

    pub fn set_h_time(&mut self, interval: Duration) {
        self.h_time = seconds_to_emf(interval);
    }
}

impl Wire for Hello {
    fn serialized_size(&self) -> usize {
        4 + self
            .link_messages
            .iter()
            .map(LinkMessage::serialized_size)
            .sum::<usize>()
    }

    fn serialize(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        buf.write_u16::<BigEndian>(0)?;
        buf.write_u8(self.h_time)?;
        buf.write_u8(self.willingness.value())?;
        for lm in &self.link_messages {
            let size = u16_len("link message", lm.serialized_size())?;
            buf.write_u8(lm.link_code)?;
            buf.write_u8(0)?;
            buf.write_u16::<BigEndian>(size)?;
            for addr in &lm.neighbor_interface_addresses {
                write_addr(buf, *addr)?;
            }
        }
        Ok(self.serialized_size())
    }

    fn deserialize(buf: &[u8]) -> Result<(Self, usize), DecodeError> {
        let mut cur = Cursor::new(buf);
        read_u16(&mut cur)?; // reserved
        let h_time = read_u8(&mut cur)?;
        let raw = read_u8(&mut cur)?;
        let willingness = Willingness::new(raw).ok_or(DecodeError::InvalidWillingness(raw))?;

        let mut link_messages = Vec::new();
        while (cur.position() as usize) < buf.len() {
            let remaining = buf.len() - cur.position() as usize;
            let link_code = read_u8(&mut cur)?;
            read_u8(&mut cur)?; // reserved
            let declared = read_u16(&mut cur)? as usize;
            if declared < 4 || declared > remaining {
                return Err(DecodeError::LinkMessageSize {
                    declared,
                    remaining,
                });
            }
            let addrs = read_addr_list(&mut cur, declared - 4, "link message")?;
            link_messages.push(LinkMessage {
                link_code,
                neighbor_interface_addresses: addrs,
            });
        }

        let hello = Hello {
            h_time,
            willingness,
            link_messages,
        };
        Ok((hello, buf.len()))
    }
}

/// TC body: [ANSN(2), Reserved(2), Advertised neighbor main address...]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tc {
    pub ansn: u16,
    pub neighbor_addresses: Vec<Ipv4Addr>,
}

impl Wire for Tc {
    fn serialized_size(&self) -> usize {
        4 + 4 * self.neighbor_addresses.len()
    }

    fn serialize(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        buf.write_u16::<BigEndian>(self.ansn)?;
        buf.write_u16::<BigEndian>(0)?;
        for addr in &self.neighbor_addresses {
            write_addr(buf, *addr)?;
        }
        Ok(self.serialized_size())
    }

    fn deserialize(buf: &[u8]) -> Result<(Self, usize), DecodeError> {
        let mut cur = Cursor::new(buf);
        let ansn = read_u16(&mut cur)?;
        read_u16(&mut cur)?; // reserved
        let neighbor_addresses = read_addr_list(&mut cur, buf.len() - 4, "TC body")?;
        Ok((
            Tc {
                ansn,
                neighbor_addresses,
            },
            buf.len(),
        ))
    }
}

/// MID body: [Interface address...]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mid {
    pub interface_addresses: Vec<Ipv4Addr>,
}

impl Wire for Mid {
    fn serialized_size(&self) -> usize {
        4 * self.interface_addresses.len()
    }

    fn serialize(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        for addr in &self.interface_addresses {
            write_addr(buf, *addr)?;
        }
        Ok(self.serialized_size())
    }

    fn deserialize(buf: &[u8]) -> Result<(Self, usize), DecodeError> {
        let mut cur = Cursor::new(buf);
        let interface_addresses = read_addr_list(&mut cur, buf.len(), "MID body")?;
        Ok((Mid { interface_addresses }, buf.len()))
    }
}

/// A (network, netmask) pair announced in an HNA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HnaAssociation {
    pub address: Ipv4Addr,
    pub mask: Ipv4Addr,
}

/// HNA body: [(Network address, Netmask)...]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hna {
    pub associations: Vec<HnaAssociation>,
}

impl Wire for Hna {
    fn serialized_size(&self) -> usize {
        8 * self.associations.len()
    }

    fn serialize(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        for assoc in &self.associations {
            write_addr(buf, assoc.address)?;
            write_addr(buf, assoc.mask)?;
        }
        Ok(self.serialized_size())
    }

    fn deserialize(buf: &[u8]) -> Result<(Self, usize), DecodeError> {
        if buf.len() % 8 != 0 {
            return Err(DecodeError::Misaligned {
                what: "HNA body",
                len: buf.len(),
                width: 8,
            });
        }
        let mut cur = Cursor::new(buf);
        let mut associations = Vec::with_capacity(buf.len() / 8);
        for _ in 0..buf.len() / 8 {
            let address = read_addr(&mut cur)?;
            let mask = read_addr(&mut cur)?;
            associations.push(HnaAssociation { address, mask });
        }
        Ok((Hna { associations }, buf.len()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Hello(Hello),
    Tc(Tc),
    Mid(Mid),
    Hna(Hna),
}

impl MessageBody {
    pub fn message_type(&self) -> MessageType {
        match self {
            MessageBody::Hello(_) => MessageType::Hello,
            MessageBody::Tc(_) => MessageType::Tc,
            MessageBody::Mid(_) => MessageType::Mid,
            MessageBody::Hna(_) => MessageType::Hna,
        }
    }

    fn serialized_size(&self) -> usize {
        match self {
            MessageBody::Hello(b) => b.serialized_size(),
            MessageBody::Tc(b) => b.serialized_size(),
            MessageBody::Mid(b) => b.serialized_size(),
            MessageBody::Hna(b) => b.serialized_size(),
        }
    }

    fn serialize(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        match self {
            MessageBody::Hello(b) => b.serialize(buf),
            MessageBody::Tc(b) => b.serialize(buf),
            MessageBody::Mid(b) => b.serialize(buf),
            MessageBody::Hna(b) => b.serialize(buf),
        }
    }

    fn deserialize(message_type: MessageType, buf: &[u8]) -> Result<Self, DecodeError> {
        let body = match message_type {
            MessageType::Hello => MessageBody::Hello(Hello::deserialize(buf)?.0),
            MessageType::Tc => MessageBody::Tc(Tc::deserialize(buf)?.0),
            MessageType::Mid => MessageBody::Mid(Mid::deserialize(buf)?.0),
            MessageType::Hna => MessageBody::Hna(Hna::deserialize(buf)?.0),
        };
        Ok(body)
    }
}

/// A complete OLSR message. Size and type are derived from the body when
/// the header is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Validity time, raw mantissa/exponent byte.
    pub vtime: u8,
    pub originator: Ipv4Addr,
    pub time_to_live: u8,
    pub hop_count: u8,
    pub sequence_number: u16,
    pub body: MessageBody,
}

impl Message {
    pub fn new(
        originator: Ipv4Addr,
        sequence_number: u16,
        vtime: Duration,
        time_to_live: u8,
        body: MessageBody,
    ) -> Self {
        Message {
            vtime: seconds_to_emf(vtime),
            originator,
            time_to_live,
            hop_count: 0,
            sequence_number,
            body,
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.body.message_type()
    }

    pub fn vtime(&self) -> Duration {
        emf_to_seconds(self.vtime)
    }

    pub fn header(&self) -> Result<MessageHeader, EncodeError> {
        Ok(MessageHeader {
            message_type: self.message_type(),
            vtime: self.vtime,
            message_size: u16_len("message", self.serialized_size())?,
            originator_address: self.originator,
            time_to_live: self.time_to_live,
            hop_count: self.hop_count,
            message_sequence_number: self.sequence_number,
        })
    }

    pub fn hello(&self) -> Option<&Hello> {
        match &self.body {
            MessageBody::Hello(h) => Some(h),
            _ => None,
        }
    }

    pub fn tc(&self) -> Option<&Tc> {
        match &self.body {
            MessageBody::Tc(t) => Some(t),
            _ => None,
        }
    }

    pub fn mid(&self) -> Option<&Mid> {
        match &self.body {
            MessageBody::Mid(m) => Some(m),
            _ => None,
        }
    }

    pub fn hna(&self) -> Option<&Hna> {
        match &self.body {
            MessageBody::Hna(h) => Some(h),
            _ => None,
        }
    }
}

impl Wire for Message {
    fn serialized_size(&self) -> usize {
        MESSAGE_HEADER_SIZE + self.body.serialized_size()
    }

    fn serialize(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let header = self.header()?;
        let n = header.serialize(buf)?;
        Ok(n + self.body.serialize(buf)?)
    }

    fn deserialize(buf: &[u8]) -> Result<(Self, usize), DecodeError> {
        let (header, used) = MessageHeader::deserialize(buf)?;
        let size = header.message_size as usize;
        if size < MESSAGE_HEADER_SIZE || size > buf.len() {
            return Err(DecodeError::MessageSize {
                declared: size,
                remaining: buf.len(),
            });
        }
        let body = MessageBody::deserialize(header.message_type, &buf[used..size])?;
        let msg = Message {
            vtime: header.vtime,
            originator: header.originator_address,
            time_to_live: header.time_to_live,
            hop_count: header.hop_count,
            sequence_number: header.message_sequence_number,
            body,
        };
        Ok((msg, size))
    }
}
