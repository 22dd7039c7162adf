//! Frame format and protocol-level messages.
//!
//! Every frame on the wire is
//!
//! ```text
//! magic 0xE9BEB4D9 ‖ command (12 B, NUL-padded ASCII) ‖
//! length (u32 BE) ‖ checksum = SHA-512(payload)[0..4] ‖ payload
//! ```
//!
//! with the payload capped at [`MAX_PAYLOAD_LENGTH`] bytes. Oversized
//! lengths are rejected from the header alone, before any payload
//! allocation.

use std::io::Cursor;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use bitmsg_crypto::hash::sha512;
use bitmsg_types::{BmError, InventoryVector, Result};

use crate::codec::{
    read_array, read_i64, read_u16, read_u32, read_u64, read_var_int, read_var_int_list,
    read_var_string, write_i64, write_u16, write_u32, write_u64, write_var_int,
    write_var_int_list, write_var_string,
};
use crate::object::ObjectMessage;

/// Frame magic, big-endian on the wire.
pub const MAGIC: u32 = 0xE9BE_B4D9;

/// The protocol version this implementation speaks.
pub const PROTOCOL_VERSION: u32 = 3;

/// Service bit: this node can relay objects.
pub const SERVICE_NODE_NETWORK: u64 = 1;

/// Hard upper bound on a frame payload.
pub const MAX_PAYLOAD_LENGTH: usize = 1_600_003;

/// Frame header size: magic + command + length + checksum.
pub const HEADER_LENGTH: usize = 24;

/// Upper bound on entries in one `inv` or `getdata`.
pub const MAX_INV_ENTRIES: usize = 50_000;

/// Upper bound on entries in one `addr`.
pub const MAX_ADDR_ENTRIES: usize = 1_000;

// ---------------------------------------------------------------------------
// NetworkAddress
// ---------------------------------------------------------------------------

/// A peer as gossiped in `addr` and named in the version handshake.
///
/// IPv4 addresses ride in the low bytes of an IPv6-mapped address,
/// as everywhere else in the Bitcoin protocol family.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct NetworkAddress {
    /// Last-seen UNIX time. Zero in the version handshake.
    pub time: i64,
    /// Stream the peer serves. Zero in the version handshake.
    pub stream: u64,
    /// Service bitfield.
    pub services: u64,
    /// IPv6 or IPv6-mapped IPv4 address.
    pub ip: [u8; 16],
    /// TCP port.
    pub port: u16,
}

impl NetworkAddress {
    /// Builds an entry from a socket address.
    pub fn from_socket_addr(addr: SocketAddr, stream: u64, time: i64) -> Self {
        let ip = match addr.ip() {
            IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
            IpAddr::V6(v6) => v6.octets(),
        };
        Self {
            time,
            stream,
            services: SERVICE_NODE_NETWORK,
            ip,
            port: addr.port(),
        }
    }

    /// The socket address this entry points at.
    pub fn socket_addr(&self) -> SocketAddr {
        let v6 = Ipv6Addr::from(self.ip);
        match v6.to_ipv4_mapped() {
            Some(v4) => SocketAddr::new(IpAddr::V4(v4), self.port),
            None => SocketAddr::new(IpAddr::V6(v6), self.port),
        }
    }

    /// Serializes the 38-byte `addr` entry form.
    pub fn write_full(&self, out: &mut Vec<u8>) {
        write_i64(out, self.time);
        write_u32(out, self.stream as u32);
        write_u64(out, self.services);
        out.extend_from_slice(&self.ip);
        write_u16(out, self.port);
    }

    /// Parses the 38-byte `addr` entry form.
    pub fn read_full(reader: &mut impl std::io::Read) -> Result<Self> {
        Ok(Self {
            time: read_i64(reader)?,
            stream: u64::from(read_u32(reader)?),
            services: read_u64(reader)?,
            ip: read_array(reader)?,
            port: read_u16(reader)?,
        })
    }

    /// Serializes the 26-byte handshake form (no time, no stream).
    pub fn write_short(&self, out: &mut Vec<u8>) {
        write_u64(out, self.services);
        out.extend_from_slice(&self.ip);
        write_u16(out, self.port);
    }

    /// Parses the 26-byte handshake form.
    pub fn read_short(reader: &mut impl std::io::Read) -> Result<Self> {
        Ok(Self {
            time: 0,
            stream: 0,
            services: read_u64(reader)?,
            ip: read_array(reader)?,
            port: read_u16(reader)?,
        })
    }
}

impl From<(Ipv4Addr, u16)> for NetworkAddress {
    fn from((ip, port): (Ipv4Addr, u16)) -> Self {
        Self::from_socket_addr(SocketAddr::new(IpAddr::V4(ip), port), 0, 0)
    }
}

// ---------------------------------------------------------------------------
// VersionPayload
// ---------------------------------------------------------------------------

/// The opening message of every connection.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VersionPayload {
    /// Protocol version; peers below 3 are rejected.
    pub protocol_version: u32,
    /// Service bitfield of the sender.
    pub services: u64,
    /// Sender's clock, for skew detection.
    pub timestamp: i64,
    /// The address the sender believes it is talking to.
    pub addr_recv: NetworkAddress,
    /// The sender's own address.
    pub addr_from: NetworkAddress,
    /// Per-process random nonce, for self-connection detection.
    pub nonce: u64,
    /// Free-form client identification.
    pub user_agent: String,
    /// Streams the sender subscribes to.
    pub streams: Vec<u64>,
}

impl VersionPayload {
    fn write(&self, out: &mut Vec<u8>) {
        write_u32(out, self.protocol_version);
        write_u64(out, self.services);
        write_i64(out, self.timestamp);
        self.addr_recv.write_short(out);
        self.addr_from.write_short(out);
        write_u64(out, self.nonce);
        write_var_string(out, &self.user_agent);
        write_var_int_list(out, &self.streams);
    }

    fn read(reader: &mut impl std::io::Read) -> Result<Self> {
        Ok(Self {
            protocol_version: read_u32(reader)?,
            services: read_u64(reader)?,
            timestamp: read_i64(reader)?,
            addr_recv: NetworkAddress::read_short(reader)?,
            addr_from: NetworkAddress::read_short(reader)?,
            nonce: read_u64(reader)?,
            user_agent: read_var_string(reader)?,
            streams: read_var_int_list(reader)?,
        })
    }
}

// ---------------------------------------------------------------------------
// CustomMessage
// ---------------------------------------------------------------------------

/// An application-defined request/response frame.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CustomMessage {
    /// Application-chosen sub-command.
    pub command: String,
    /// Opaque application data.
    pub data: Vec<u8>,
}

// ---------------------------------------------------------------------------
// NetworkPayload
// ---------------------------------------------------------------------------

/// Every message this implementation speaks.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NetworkPayload {
    /// Handshake opener.
    Version(VersionPayload),
    /// Handshake acknowledgement.
    Verack,
    /// Known-peer gossip.
    Addr(Vec<NetworkAddress>),
    /// Inventory advertisement.
    Inv(Vec<InventoryVector>),
    /// Inventory request.
    GetData(Vec<InventoryVector>),
    /// One object.
    Object(ObjectMessage),
    /// Application-defined traffic.
    Custom(CustomMessage),
}

impl NetworkPayload {
    /// The 12-byte frame command this payload travels under.
    pub fn command(&self) -> &'static str {
        match self {
            Self::Version(_) => "version",
            Self::Verack => "verack",
            Self::Addr(_) => "addr",
            Self::Inv(_) => "inv",
            Self::GetData(_) => "getdata",
            Self::Object(_) => "object",
            Self::Custom(_) => "custom",
        }
    }

    /// Serializes the payload body (without the frame header).
    pub fn to_payload_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Self::Version(v) => v.write(&mut out),
            Self::Verack => {}
            Self::Addr(entries) => {
                write_var_int(&mut out, entries.len() as u64);
                for entry in entries {
                    entry.write_full(&mut out);
                }
            }
            Self::Inv(ivs) | Self::GetData(ivs) => {
                write_var_int(&mut out, ivs.len() as u64);
                for iv in ivs {
                    out.extend_from_slice(iv.as_bytes());
                }
            }
            Self::Object(object) => out = object.to_bytes(),
            Self::Custom(custom) => {
                write_var_string(&mut out, &custom.command);
                out.extend_from_slice(&custom.data);
            }
        }
        out
    }

    /// Parses a payload under the given frame command.
    ///
    /// # Errors
    ///
    /// [`BmError::Decode`] for unknown commands or malformed bodies.
    pub fn parse(command: &str, data: &[u8]) -> Result<Self> {
        match command {
            "version" => Ok(Self::Version(VersionPayload::read(&mut &data[..])?)),
            "verack" => Ok(Self::Verack),
            "addr" => {
                let mut reader = Cursor::new(data);
                let count = read_var_int(&mut reader)? as usize;
                if count > MAX_ADDR_ENTRIES {
                    return Err(BmError::Decode {
                        reason: format!("addr with {count} entries exceeds {MAX_ADDR_ENTRIES}"),
                    });
                }
                let mut entries = Vec::with_capacity(count);
                for _ in 0..count {
                    entries.push(NetworkAddress::read_full(&mut reader)?);
                }
                Ok(Self::Addr(entries))
            }
            "inv" | "getdata" => {
                let mut reader = Cursor::new(data);
                let count = read_var_int(&mut reader)? as usize;
                if count > MAX_INV_ENTRIES {
                    return Err(BmError::Decode {
                        reason: format!("inventory with {count} entries exceeds {MAX_INV_ENTRIES}"),
                    });
                }
                let mut ivs = Vec::with_capacity(count);
                for _ in 0..count {
                    ivs.push(InventoryVector::new(read_array(&mut reader)?));
                }
                if command == "inv" {
                    Ok(Self::Inv(ivs))
                } else {
                    Ok(Self::GetData(ivs))
                }
            }
            "object" => Ok(Self::Object(ObjectMessage::from_bytes(data)?)),
            "custom" => {
                let mut reader = Cursor::new(data);
                let sub_command = read_var_string(&mut reader)?;
                let consumed = reader.position() as usize;
                Ok(Self::Custom(CustomMessage {
                    command: sub_command,
                    data: data[consumed..].to_vec(),
                }))
            }
            other => Err(BmError::Decode {
                reason: format!("unknown command {other:?}"),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

/// The parsed fixed-size frame header.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FrameHeader {
    /// Frame command with NUL padding removed.
    pub command: String,
    /// Payload length in bytes.
    pub length: usize,
    /// First 4 bytes of `SHA-512(payload)`.
    pub checksum: [u8; 4],
}

/// Serializes a complete frame.
pub fn write_frame(out: &mut Vec<u8>, payload: &NetworkPayload) {
    let body = payload.to_payload_bytes();
    write_u32(out, MAGIC);
    let mut command = [0u8; 12];
    let name = payload.command().as_bytes();
    command[..name.len()].copy_from_slice(name);
    out.extend_from_slice(&command);
    write_u32(out, body.len() as u32);
    out.extend_from_slice(&sha512(&body)[..4]);
    out.extend_from_slice(&body);
}

/// Parses and validates the 24-byte frame header.
///
/// # Errors
///
/// [`BmError::MalformedWire`] for a wrong magic, a non-ASCII command,
/// or a length above [`MAX_PAYLOAD_LENGTH`]. Rejecting the length here
/// keeps oversized frames from ever being allocated.
pub fn parse_frame_header(header: &[u8; HEADER_LENGTH]) -> Result<FrameHeader> {
    let magic = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    if magic != MAGIC {
        return Err(BmError::MalformedWire {
            reason: format!("bad magic {magic:#010x}"),
        });
    }
    let command_bytes = &header[4..16];
    let end = command_bytes.iter().position(|&b| b == 0).unwrap_or(12);
    if command_bytes[end..].iter().any(|&b| b != 0) {
        return Err(BmError::MalformedWire {
            reason: "command has bytes after NUL padding".into(),
        });
    }
    let command = std::str::from_utf8(&command_bytes[..end])
        .map_err(|_| BmError::MalformedWire {
            reason: "command is not ASCII".into(),
        })?
        .to_owned();
    let length = u32::from_be_bytes([header[16], header[17], header[18], header[19]]) as usize;
    if length > MAX_PAYLOAD_LENGTH {
        return Err(BmError::MalformedWire {
            reason: format!("payload length {length} exceeds {MAX_PAYLOAD_LENGTH}"),
        });
    }
    let mut checksum = [0u8; 4];
    checksum.copy_from_slice(&header[20..24]);
    Ok(FrameHeader {
        command,
        length,
        checksum,
    })
}

/// Verifies a frame payload against its header checksum.
///
/// # Errors
///
/// [`BmError::MalformedWire`] on mismatch.
pub fn verify_checksum(header: &FrameHeader, payload: &[u8]) -> Result<()> {
    if sha512(payload)[..4] != header.checksum {
        return Err(BmError::MalformedWire {
            reason: "payload checksum mismatch".into(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_version() -> NetworkPayload {
        NetworkPayload::Version(VersionPayload {
            protocol_version: PROTOCOL_VERSION,
            services: SERVICE_NODE_NETWORK,
            timestamp: 1_700_000_000,
            addr_recv: (Ipv4Addr::new(10, 0, 0, 2), 8444).into(),
            addr_from: (Ipv4Addr::new(10, 0, 0, 1), 8444).into(),
            nonce: 0xDEAD_BEEF_CAFE_F00D,
            user_agent: "/bitmsg:0.1.0/".into(),
            streams: vec![1],
        })
    }

    fn frame_roundtrip(payload: &NetworkPayload) -> NetworkPayload {
        let mut frame = Vec::new();
        write_frame(&mut frame, payload);
        let header: [u8; HEADER_LENGTH] = frame[..HEADER_LENGTH].try_into().expect("header");
        let header = parse_frame_header(&header).expect("parse header");
        assert_eq!(header.command, payload.command());
        let body = &frame[HEADER_LENGTH..];
        assert_eq!(body.len(), header.length);
        verify_checksum(&header, body).expect("checksum");
        NetworkPayload::parse(&header.command, body).expect("parse payload")
    }

    #[test]
    fn version_frame_roundtrip() {
        let payload = sample_version();
        assert_eq!(frame_roundtrip(&payload), payload);
    }

    #[test]
    fn verack_frame_roundtrip() {
        assert_eq!(frame_roundtrip(&NetworkPayload::Verack), NetworkPayload::Verack);
    }

    #[test]
    fn inv_and_addr_roundtrip() {
        let inv = NetworkPayload::Inv(vec![
            InventoryVector::new([0x11; 32]),
            InventoryVector::new([0x22; 32]),
        ]);
        assert_eq!(frame_roundtrip(&inv), inv);

        let addr = NetworkPayload::Addr(vec![NetworkAddress {
            time: 1_700_000_000,
            stream: 1,
            services: SERVICE_NODE_NETWORK,
            ip: Ipv6Addr::LOCALHOST.octets(),
            port: 8444,
        }]);
        assert_eq!(frame_roundtrip(&addr), addr);
    }

    #[test]
    fn custom_roundtrip_preserves_subcommand() {
        let payload = NetworkPayload::Custom(CustomMessage {
            command: "ping".into(),
            data: vec![1, 2, 3],
        });
        assert_eq!(frame_roundtrip(&payload), payload);
    }

    #[test]
    fn bad_magic_rejected() {
        let mut frame = Vec::new();
        write_frame(&mut frame, &NetworkPayload::Verack);
        frame[0] = 0x00;
        let header: [u8; HEADER_LENGTH] = frame[..HEADER_LENGTH].try_into().expect("header");
        assert!(matches!(
            parse_frame_header(&header),
            Err(BmError::MalformedWire { .. })
        ));
    }

    #[test]
    fn oversized_length_rejected_in_header() {
        let mut frame = Vec::new();
        write_frame(&mut frame, &NetworkPayload::Verack);
        frame[16..20].copy_from_slice(&((MAX_PAYLOAD_LENGTH as u32) + 1).to_be_bytes());
        let header: [u8; HEADER_LENGTH] = frame[..HEADER_LENGTH].try_into().expect("header");
        assert!(parse_frame_header(&header).is_err());
    }

    #[test]
    fn checksum_mismatch_rejected() {
        let mut frame = Vec::new();
        write_frame(&mut frame, &sample_version());
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        let header: [u8; HEADER_LENGTH] = frame[..HEADER_LENGTH].try_into().expect("header");
        let header = parse_frame_header(&header).expect("parse header");
        assert!(verify_checksum(&header, &frame[HEADER_LENGTH..]).is_err());
    }

    #[test]
    fn unknown_command_rejected() {
        assert!(NetworkPayload::parse("wibble", &[]).is_err());
    }

    #[test]
    fn ipv4_mapping_roundtrip() {
        let entry: NetworkAddress = (Ipv4Addr::new(192, 168, 1, 1), 8444).into();
        let socket = entry.socket_addr();
        assert_eq!(socket.to_string(), "192.168.1.1:8444");
    }

    #[test]
    fn oversized_inv_count_rejected() {
        let mut body = Vec::new();
        write_var_int(&mut body, (MAX_INV_ENTRIES as u64) + 1);
        assert!(NetworkPayload::parse("inv", &body).is_err());
    }
}
