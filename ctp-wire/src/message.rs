//! Messaging primitives for the CTP fixed header (§3) and the closed set of
//! message types (§6).

use std::io::{self, Cursor, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{WireErrorKind, WireResult, WireResultExt};
use crate::{HEADER_LEN, ID_LEN, MAX_BODY};

/// The closed enumeration of CTP message types (§6). The table in §6 is
/// authoritative for request/response classification — the last bit of a
/// few values (`PEERLIST_PUSH`, `NO_OP`) does not match the parity
/// convention used by the rest, so classification is done by explicit
/// match rather than by inspecting the bit.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MessageType {
    StatusRequest,
    StatusResponse,
    Notification,
    NotificationAck,
    BlockRequest,
    BlockResponse,
    ClusterJoinRequest,
    ClusterJoinResponse,
    ManifestRequest,
    ManifestResponse,
    CrinfoRequest,
    CrinfoResponse,
    NewCrinfoNotif,
    NewCrinfoNotifAck,
    PeerlistPush,
    UnexpectedReq,
    InvalidReq,
    NoOp,
    ServerError,
}

impl MessageType {
    /// Decode a message type from its one-byte wire value.
    pub fn from_u8(value: u8) -> WireResult<MessageType> {
        use MessageType::*;

        Ok(match value {
            0x00 => StatusRequest,
            0x01 => StatusResponse,
            0x02 => Notification,
            0x03 => NotificationAck,
            0x04 => BlockRequest,
            0x05 => BlockResponse,
            0x06 => ClusterJoinRequest,
            0x07 => ClusterJoinResponse,
            0x08 => ManifestRequest,
            0x09 => ManifestResponse,
            0x0A => CrinfoRequest,
            0x0B => CrinfoResponse,
            0x0C => NewCrinfoNotif,
            0x0D => NewCrinfoNotifAck,
            0x10 => PeerlistPush,
            0xF9 => UnexpectedReq,
            0xFD => InvalidReq,
            0xFE => NoOp,
            0xFF => ServerError,
            other => {
                return Err(WireErrorKind::InvalidMessage(format!("unknown message type 0x{:02X}", other)).into())
            }
        })
    }

    /// Encode this message type to its one-byte wire value.
    pub fn to_u8(self) -> u8 {
        use MessageType::*;

        match self {
            StatusRequest => 0x00,
            StatusResponse => 0x01,
            Notification => 0x02,
            NotificationAck => 0x03,
            BlockRequest => 0x04,
            BlockResponse => 0x05,
            ClusterJoinRequest => 0x06,
            ClusterJoinResponse => 0x07,
            ManifestRequest => 0x08,
            ManifestResponse => 0x09,
            CrinfoRequest => 0x0A,
            CrinfoResponse => 0x0B,
            NewCrinfoNotif => 0x0C,
            NewCrinfoNotifAck => 0x0D,
            PeerlistPush => 0x10,
            UnexpectedReq => 0xF9,
            InvalidReq => 0xFD,
            NoOp => 0xFE,
            ServerError => 0xFF,
        }
    }

    /// True if this type is a request (as opposed to a response), per the
    /// authoritative table in §6 — not derived from the parity bit, since
    /// `PeerlistPush`/`NoOp` are requests despite odd-looking values.
    pub fn is_request(self) -> bool {
        use MessageType::*;

        matches!(
            self,
            StatusRequest
                | Notification
                | BlockRequest
                | ClusterJoinRequest
                | ManifestRequest
                | CrinfoRequest
                | NewCrinfoNotif
                | PeerlistPush
                | NoOp
        )
    }

    /// True if a request of this type expects a response. Only
    /// `PeerlistPush` and `NoOp` are fire-and-forget.
    pub fn expects_response(self) -> bool {
        self.is_request() && !matches!(self, MessageType::PeerlistPush | MessageType::NoOp)
    }
}

/// A 32-byte ASCII identifier (`cluster_id` or `sender_id`).
pub fn validate_id(id: &str, field: &str) -> WireResult<()> {
    if !id.is_ascii() {
        bail!(WireErrorKind::InvalidArgument(format!("{} is not ASCII", field)));
    }
    if id.len() != ID_LEN {
        bail!(WireErrorKind::InvalidArgument(format!(
            "{} must be exactly {} bytes, got {}",
            field,
            ID_LEN,
            id.len()
        )));
    }
    Ok(())
}

/// A fully decoded CTP datagram: fixed header (§3) plus a variable body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CTPMessage {
    msg_type: MessageType,
    seqnum: u32,
    cluster_id: String,
    sender_id: String,
    body: Vec<u8>,
}

impl CTPMessage {
    /// Construct a new message. Fails if `cluster_id`/`sender_id` are not
    /// exactly 32 ASCII bytes or `body` exceeds `MAX_BODY`.
    pub fn new(
        msg_type: MessageType,
        seqnum: u32,
        cluster_id: impl Into<String>,
        sender_id: impl Into<String>,
        body: Vec<u8>,
    ) -> WireResult<CTPMessage> {
        let cluster_id = cluster_id.into();
        let sender_id = sender_id.into();

        validate_id(&cluster_id, "cluster_id")?;
        validate_id(&sender_id, "sender_id")?;
        if body.len() > MAX_BODY {
            bail!(WireErrorKind::InvalidArgument(format!(
                "body of {} bytes exceeds MAX_BODY ({})",
                body.len(),
                MAX_BODY
            )));
        }

        Ok(CTPMessage {
            msg_type,
            seqnum,
            cluster_id,
            sender_id,
            body,
        })
    }

    pub fn msg_type(&self) -> MessageType {
        self.msg_type
    }

    pub fn seqnum(&self) -> u32 {
        self.seqnum
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    /// Pack this message into a datagram: header (§3) followed by body.
    pub fn pack(&self) -> WireResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.body.len());
        write_header(&mut buf, self.msg_type, self.seqnum, &self.cluster_id, &self.sender_id)?;
        buf.write_all(&self.body)
            .chain_err(|| WireErrorKind::InvalidMessage("failed writing body".into()))?;
        Ok(buf)
    }

    /// Unpack a full datagram (header + body) into a `CTPMessage`.
    pub fn unpack(packet: &[u8]) -> WireResult<CTPMessage> {
        if packet.len() < HEADER_LEN {
            bail!(WireErrorKind::InvalidMessage(format!(
                "packet of {} bytes shorter than header ({})",
                packet.len(),
                HEADER_LEN
            )));
        }

        let (msg_type, seqnum, cluster_id, sender_id) = unpack_header(&packet[..HEADER_LEN])?;
        let body = packet[HEADER_LEN..].to_vec();

        CTPMessage::new(msg_type, seqnum, cluster_id, sender_id, body)
    }
}

/// Decode only the fixed header fields from exactly `HEADER_LEN` bytes.
pub fn unpack_header(header: &[u8]) -> WireResult<(MessageType, u32, String, String)> {
    if header.len() != HEADER_LEN {
        bail!(WireErrorKind::InvalidMessage(format!(
            "header must be exactly {} bytes, got {}",
            HEADER_LEN,
            header.len()
        )));
    }

    let mut cursor = Cursor::new(header);
    let type_byte = cursor
        .read_u8()
        .chain_err(|| WireErrorKind::InvalidMessage("truncated header".into()))?;
    let msg_type = MessageType::from_u8(type_byte)?;
    let seqnum = cursor
        .read_u32::<BigEndian>()
        .chain_err(|| WireErrorKind::InvalidMessage("truncated seqnum".into()))?;

    let cluster_id = read_id(&mut cursor, "cluster_id")?;
    let sender_id = read_id(&mut cursor, "sender_id")?;

    Ok((msg_type, seqnum, cluster_id, sender_id))
}

fn read_id(cursor: &mut Cursor<&[u8]>, field: &str) -> WireResult<String> {
    let mut raw = [0u8; ID_LEN];
    io::Read::read_exact(cursor, &mut raw)
        .chain_err(|| WireErrorKind::InvalidMessage(format!("truncated {}", field)))?;

    String::from_utf8(raw.to_vec())
        .ok()
        .filter(|s| s.is_ascii())
        .ok_or_else(|| WireErrorKind::InvalidMessage(format!("{} is not ASCII", field)).into())
}

fn write_header<W: Write>(
    writer: &mut W,
    msg_type: MessageType,
    seqnum: u32,
    cluster_id: &str,
    sender_id: &str,
) -> WireResult<()> {
    validate_id(cluster_id, "cluster_id")?;
    validate_id(sender_id, "sender_id")?;

    writer
        .write_u8(msg_type.to_u8())
        .chain_err(|| WireErrorKind::InvalidMessage("failed writing type".into()))?;
    writer
        .write_u32::<BigEndian>(seqnum)
        .chain_err(|| WireErrorKind::InvalidMessage("failed writing seqnum".into()))?;
    writer
        .write_all(cluster_id.as_bytes())
        .chain_err(|| WireErrorKind::InvalidMessage("failed writing cluster_id".into()))?;
    writer
        .write_all(sender_id.as_bytes())
        .chain_err(|| WireErrorKind::InvalidMessage("failed writing sender_id".into()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> String {
        std::iter::repeat(byte as char).take(ID_LEN).collect()
    }

    #[test]
    fn positive_roundtrip_block_request() {
        let msg = CTPMessage::new(MessageType::BlockRequest, 42, id('a'), id('b'), b"hi".to_vec()).unwrap();

        let packed = msg.pack().unwrap();
        assert_eq!(packed.len(), HEADER_LEN + 2);

        let unpacked = CTPMessage::unpack(&packed).unwrap();
        assert_eq!(unpacked, msg);
    }

    #[test]
    fn positive_empty_body() {
        let msg = CTPMessage::new(MessageType::NoOp, 7, id('c'), id('d'), Vec::new()).unwrap();
        let packed = msg.pack().unwrap();
        assert_eq!(CTPMessage::unpack(&packed).unwrap(), msg);
    }

    #[test]
    fn negative_short_cluster_id() {
        let err = CTPMessage::new(MessageType::NoOp, 0, "short", id('d'), Vec::new());
        assert!(err.is_err());
    }

    #[test]
    fn negative_body_too_large() {
        let body = vec![0u8; MAX_BODY + 1];
        let err = CTPMessage::new(MessageType::BlockRequest, 0, id('a'), id('b'), body);
        assert!(err.is_err());
    }

    #[test]
    fn negative_unpack_truncated() {
        let bytes = [0u8; HEADER_LEN - 1];
        assert!(CTPMessage::unpack(&bytes).is_err());
    }

    #[test]
    fn negative_unpack_unknown_type() {
        let mut bytes = vec![0xAAu8];
        bytes.extend_from_slice(&[0u8; 4]);
        bytes.extend_from_slice(id('a').as_bytes());
        bytes.extend_from_slice(id('b').as_bytes());
        assert!(CTPMessage::unpack(&bytes).is_err());
    }

    #[test]
    fn negative_unpack_non_ascii_id() {
        let mut bytes = vec![MessageType::NoOp.to_u8()];
        bytes.extend_from_slice(&[0u8; 4]);
        bytes.extend_from_slice(&[0xFFu8; ID_LEN]); // not valid UTF-8/ASCII
        bytes.extend_from_slice(id('b').as_bytes());
        assert!(CTPMessage::unpack(&bytes).is_err());
    }

    #[test]
    fn positive_is_request_table() {
        assert!(MessageType::PeerlistPush.is_request());
        assert!(!MessageType::PeerlistPush.expects_response());
        assert!(MessageType::NoOp.is_request());
        assert!(!MessageType::NoOp.expects_response());
        assert!(MessageType::BlockRequest.is_request());
        assert!(MessageType::BlockRequest.expects_response());
        assert!(!MessageType::BlockResponse.is_request());
    }

    #[test]
    fn positive_unpack_header_matches_unpack() {
        let msg = CTPMessage::new(MessageType::StatusRequest, 100, id('p'), id('q'), b"x".to_vec()).unwrap();
        let packed = msg.pack().unwrap();

        let (ty, seq, cid, sid) = unpack_header(&packed[..HEADER_LEN]).unwrap();
        assert_eq!(ty, MessageType::StatusRequest);
        assert_eq!(seq, 100);
        assert_eq!(cid, id('p'));
        assert_eq!(sid, id('q'));
    }
}
