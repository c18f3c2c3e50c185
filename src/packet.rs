// src/packet.rs
// OLSR packet framing: a 4-byte packet header followed by one or more messages

use std::io::Cursor;

use byteorder::{BigEndian, WriteBytesExt};

use crate::error::{DecodeError, EncodeError};
use crate::message::{Message, Wire, read_u16};

/// Size of the packet header on the wire
pub const PACKET_HEADER_SIZE: usize = 4;

/// Messages aggregated into one packet before it is flushed
pub const MAX_MESSAGES_PER_PACKET: usize = 64;

/// Packet header: [Packet Length(2), Packet Sequence Number(2)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Total packet length including this header
    pub packet_length: u16,
    pub packet_sequence_number: u16,
}

impl Wire for PacketHeader {
    fn serialized_size(&self) -> usize {
        PACKET_HEADER_SIZE
    }

    fn serialize(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        buf.write_u16::<BigEndian>(self.packet_length)?;
        buf.write_u16::<BigEndian>(self.packet_sequence_number)?;
        Ok(PACKET_HEADER_SIZE)
    }

    fn deserialize(buf: &[u8]) -> Result<(Self, usize), DecodeError> {
        let mut cur = Cursor::new(buf);
        let packet_length = read_u16(&mut cur)?;
        let packet_sequence_number = read_u16(&mut cur)?;
        Ok((
            PacketHeader {
                packet_length,
                packet_sequence_number,
            },
            PACKET_HEADER_SIZE,
        ))
    }
}

/// An OLSR packet: a sequence number and the messages it carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub sequence_number: u16,
    pub messages: Vec<Message>,
}

impl Packet {
    pub fn new(sequence_number: u16) -> Self {
        Packet {
            sequence_number,
            messages: Vec::new(),
        }
    }

    pub fn with_messages(sequence_number: u16, messages: Vec<Message>) -> Self {
        Packet {
            sequence_number,
            messages,
        }
    }

    pub fn add_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn serialized_size(&self) -> usize {
        PACKET_HEADER_SIZE
            + self
                .messages
                .iter()
                .map(Wire::serialized_size)
                .sum::<usize>()
    }

    pub fn header(&self) -> Result<PacketHeader, EncodeError> {
        let size = self.serialized_size();
        let packet_length = u16::try_from(size).map_err(|_| EncodeError::TooLarge {
            what: "packet",
            size,
        })?;
        Ok(PacketHeader {
            packet_length,
            packet_sequence_number: self.sequence_number,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        let header = self.header()?;
        let mut buf = Vec::with_capacity(header.packet_length as usize);
        header.serialize(&mut buf)?;
        for msg in &self.messages {
            msg.serialize(&mut buf)?;
        }
        Ok(buf)
    }

    /// Decode a whole packet. Any malformed message rejects the packet.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, DecodeError> {
        let (header, mut offset) = PacketHeader::deserialize(buf)?;
        let declared = header.packet_length as usize;
        if declared != buf.len() || declared < PACKET_HEADER_SIZE {
            return Err(DecodeError::PacketLength {
                declared,
                actual: buf.len(),
            });
        }

        let mut messages = Vec::new();
        while offset < buf.len() {
            let (msg, used) = Message::deserialize(&buf[offset..])?;
            messages.push(msg);
            offset += used;
        }

        Ok(Packet {
            sequence_number: header.packet_sequence_number,
            messages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{
        Hello, Hna, HnaAssociation, LinkMessage, MessageBody, Mid, Tc, Willingness,
    };
    use proptest::prelude::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    fn sample_packet() -> Packet {
        let origin = Ipv4Addr::new(10, 0, 0, 1);
        let mut pkt = Packet::new(513);
        pkt.add_message(Message::new(
            origin,
            1,
            Duration::from_secs(15),
            255,
            MessageBody::Tc(Tc {
                ansn: 4,
                neighbor_addresses: vec![Ipv4Addr::new(10, 0, 0, 2)],
            }),
        ));
        pkt.add_message(Message::new(
            origin,
            2,
            Duration::from_secs(15),
            255,
            MessageBody::Mid(Mid {
                interface_addresses: vec![Ipv4Addr::new(10, 1, 0, 1)],
            }),
        ));
        pkt.add_message(Message::new(
            origin,
            3,
            Duration::from_secs(15),
            255,
            MessageBody::Hna(Hna {
                associations: vec![HnaAssociation {
                    address: Ipv4Addr::new(192, 168, 0, 0),
                    mask: Ipv4Addr::new(255, 255, 255, 0),
                }],
            }),
        ));
        pkt
    }

    #[test]
    fn packet_roundtrip() {
        let pkt = sample_packet();
        let bytes = pkt.to_bytes().unwrap();
        assert_eq!(bytes.len(), pkt.serialized_size());
        assert_eq!(&bytes[..4], &[0, bytes.len() as u8, 2, 1]);
        assert_eq!(Packet::from_bytes(&bytes).unwrap(), pkt);
    }

    #[test]
    fn empty_packet_is_header_only() {
        let bytes = Packet::new(9).to_bytes().unwrap();
        assert_eq!(bytes, vec![0, 4, 0, 9]);
        assert!(Packet::from_bytes(&bytes).unwrap().messages.is_empty());
    }

    #[test]
    fn declared_length_must_match_buffer() {
        let mut bytes = sample_packet().to_bytes().unwrap();
        let actual = bytes.len();
        bytes.push(0);
        assert_eq!(
            Packet::from_bytes(&bytes).unwrap_err(),
            DecodeError::PacketLength {
                declared: actual,
                actual: actual + 1
            }
        );
    }

    #[test]
    fn truncated_header() {
        assert_eq!(
            Packet::from_bytes(&[0, 4, 0]).unwrap_err(),
            DecodeError::Truncated {
                needed: 4,
                available: 3
            }
        );
    }

    #[test]
    fn malformed_message_rejects_packet() {
        let mut bytes = sample_packet().to_bytes().unwrap();
        // Shrink the first message's declared size so the TC body is 2 bytes short.
        bytes[4 + 3] -= 2;
        assert!(Packet::from_bytes(&bytes).is_err());
    }

    fn addr() -> impl Strategy<Value = Ipv4Addr> {
        any::<u32>().prop_map(Ipv4Addr::from)
    }

    fn addrs() -> impl Strategy<Value = Vec<Ipv4Addr>> {
        prop::collection::vec(addr(), 0..8)
    }

    fn body() -> impl Strategy<Value = MessageBody> {
        let link = (any::<u8>(), addrs()).prop_map(|(link_code, addrs)| LinkMessage {
            link_code,
            neighbor_interface_addresses: addrs,
        });
        let hello = (any::<u8>(), 0u8..=7, prop::collection::vec(link, 0..4)).prop_map(
            |(h_time, w, link_messages)| {
                MessageBody::Hello(Hello {
                    h_time,
                    willingness: Willingness::new(w).unwrap(),
                    link_messages,
                })
            },
        );
        let tc = (any::<u16>(), addrs()).prop_map(|(ansn, neighbor_addresses)| {
            MessageBody::Tc(Tc {
                ansn,
                neighbor_addresses,
            })
        });
        let mid = addrs().prop_map(|interface_addresses| {
            MessageBody::Mid(Mid {
                interface_addresses,
            })
        });
        let hna = prop::collection::vec((addr(), addr()), 0..6).prop_map(|pairs| {
            MessageBody::Hna(Hna {
                associations: pairs
                    .into_iter()
                    .map(|(address, mask)| HnaAssociation { address, mask })
                    .collect(),
            })
        });
        prop_oneof![hello, tc, mid, hna]
    }

    fn message() -> impl Strategy<Value = Message> {
        (
            any::<u8>(),
            addr(),
            any::<u8>(),
            any::<u8>(),
            any::<u16>(),
            body(),
        )
            .prop_map(|(vtime, originator, time_to_live, hop_count, sequence_number, body)| {
                Message {
                    vtime,
                    originator,
                    time_to_live,
                    hop_count,
                    sequence_number,
                    body,
                }
            })
    }

    proptest! {
        #[test]
        fn any_packet_roundtrips(
            seq in any::<u16>(),
            messages in prop::collection::vec(message(), 0..8),
        ) {
            let pkt = Packet::with_messages(seq, messages);
            let bytes = pkt.to_bytes().unwrap();
            prop_assert_eq!(bytes.len(), pkt.serialized_size());
            prop_assert_eq!(Packet::from_bytes(&bytes).unwrap(), pkt);
        }

        #[test]
        fn truncated_packet_is_rejected(
            messages in prop::collection::vec(message(), 1..4),
        ) {
            let bytes = Packet::with_messages(1, messages).to_bytes().unwrap();
            for cut in 0..bytes.len() {
                prop_assert!(Packet::from_bytes(&bytes[..cut]).is_err());
            }
        }
    }
}
