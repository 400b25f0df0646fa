//! Wire messages
//!
//! One closed tagged union over every request and response the protocol
//! family speaks. Routing is done on [`MessageKind`], never on downcasts:
//! the dispatcher looks handlers up by kind and the exchange coordinator
//! discards responses whose kind does not match the running exchange.
//!
//! Every message starts with the common [`MessageHeader`]; payload fields
//! follow the shape of the corresponding protocol phase.

use serde::{Deserialize, Serialize};

use peerdrive_core::domain::{
    AccessType, ClientDevice, EventKind, ExchangeId, FileId, PeerAddress, Sharer, StatusCode,
    VersionHash,
};

/// Common header carried by every message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// The exchange this message belongs to
    pub exchange_id: ExchangeId,
    /// Status of the request or outcome of the response
    pub status: StatusCode,
    /// The device that sent this message
    pub sender: ClientDevice,
    /// The address this message is directed to
    pub receiver: PeerAddress,
}

impl MessageHeader {
    pub fn new(
        exchange_id: ExchangeId,
        status: StatusCode,
        sender: ClientDevice,
        receiver: PeerAddress,
    ) -> Self {
        Self {
            exchange_id,
            status,
            sender,
            receiver,
        }
    }
}

/// Offer a pending local change to a peer for negotiation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferRequest {
    pub header: MessageHeader,
    /// What kind of change is being offered
    pub event_kind: EventKind,
    /// The affected path
    pub path: String,
    /// The destination path for move offers
    pub new_path: Option<String>,
    /// Whether the path is a file
    pub is_file: bool,
    /// Content version the change was based on, if any
    pub baseline: Option<VersionHash>,
}

/// Reply to an offer; the verdict rides in the header status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferResponse {
    pub header: MessageHeader,
    pub path: String,
}

/// One chunk of content pushed toward a peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
    pub header: MessageHeader,
    pub path: String,
    pub is_file: bool,
    /// Zero-based index of this chunk
    pub chunk_index: u64,
    /// Nominal chunk size the offsets are computed from
    pub chunk_size: u64,
    /// Total number of chunks; only set on the final chunk
    pub total_chunks: Option<u64>,
    /// Checksum of the complete content; only set on the final chunk
    pub checksum: Option<String>,
    /// Owning username; only set on chunk 0
    pub owner: Option<String>,
    /// Receiver-side capability on the path; only set on chunk 0
    pub access_type: Option<AccessType>,
    /// Everyone the path is shared with; only set on chunk 0
    pub sharers: Vec<Sharer>,
    /// Durable file id, when the path has one
    pub file_id: Option<FileId>,
    /// The chunk bytes
    pub data: Vec<u8>,
}

/// Reply to a push chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushResponse {
    pub header: MessageHeader,
    pub path: String,
    /// The chunk the receiver wants next; -1 means done or denied
    pub requesting_chunk: i64,
}

/// Ask a specific peer for one chunk of a file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemandRequest {
    pub header: MessageHeader,
    pub path: String,
    pub chunk_index: u64,
}

/// One chunk of content returned to a demanding peer
///
/// `chunk_index == -1 && total_chunks == -1` means the source no longer
/// has the file or denied the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemandResponse {
    pub header: MessageHeader,
    pub path: String,
    pub chunk_index: i64,
    pub total_chunks: i64,
    pub chunk_size: u64,
    /// Checksum of the complete content, set on the final rounds
    pub checksum: Option<String>,
    pub is_file: bool,
    /// Sharing metadata so a first-time puller can publish it locally
    pub sharers: Vec<Sharer>,
    pub data: Vec<u8>,
}

/// Propagate a deletion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub header: MessageHeader,
    pub path: String,
    pub owner: Option<String>,
    pub file_id: Option<FileId>,
}

/// Reply to a deletion; the verdict rides in the header status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub header: MessageHeader,
}

/// Propagate a rename/move
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveRequest {
    pub header: MessageHeader,
    pub old_path: String,
    pub new_path: String,
    pub is_file: bool,
}

/// Reply to a move; the verdict rides in the header status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveResponse {
    pub header: MessageHeader,
}

/// Discriminant of a [`Message`], used as the dispatch and filter key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    OfferRequest,
    OfferResponse,
    PushRequest,
    PushResponse,
    DemandRequest,
    DemandResponse,
    DeleteRequest,
    DeleteResponse,
    MoveRequest,
    MoveResponse,
}

impl MessageKind {
    /// Whether messages of this kind initiate work on the receiver
    #[must_use]
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            MessageKind::OfferRequest
                | MessageKind::PushRequest
                | MessageKind::DemandRequest
                | MessageKind::DeleteRequest
                | MessageKind::MoveRequest
        )
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// The closed union of everything that crosses the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    OfferRequest(OfferRequest),
    OfferResponse(OfferResponse),
    PushRequest(PushRequest),
    PushResponse(PushResponse),
    DemandRequest(DemandRequest),
    DemandResponse(DemandResponse),
    DeleteRequest(DeleteRequest),
    DeleteResponse(DeleteResponse),
    MoveRequest(MoveRequest),
    MoveResponse(MoveResponse),
}

impl Message {
    /// The discriminant of this message
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::OfferRequest(_) => MessageKind::OfferRequest,
            Message::OfferResponse(_) => MessageKind::OfferResponse,
            Message::PushRequest(_) => MessageKind::PushRequest,
            Message::PushResponse(_) => MessageKind::PushResponse,
            Message::DemandRequest(_) => MessageKind::DemandRequest,
            Message::DemandResponse(_) => MessageKind::DemandResponse,
            Message::DeleteRequest(_) => MessageKind::DeleteRequest,
            Message::DeleteResponse(_) => MessageKind::DeleteResponse,
            Message::MoveRequest(_) => MessageKind::MoveRequest,
            Message::MoveResponse(_) => MessageKind::MoveResponse,
        }
    }

    /// The common header of this message
    #[must_use]
    pub fn header(&self) -> &MessageHeader {
        match self {
            Message::OfferRequest(m) => &m.header,
            Message::OfferResponse(m) => &m.header,
            Message::PushRequest(m) => &m.header,
            Message::PushResponse(m) => &m.header,
            Message::DemandRequest(m) => &m.header,
            Message::DemandResponse(m) => &m.header,
            Message::DeleteRequest(m) => &m.header,
            Message::DeleteResponse(m) => &m.header,
            Message::MoveRequest(m) => &m.header,
            Message::MoveResponse(m) => &m.header,
        }
    }

    fn header_mut(&mut self) -> &mut MessageHeader {
        match self {
            Message::OfferRequest(m) => &mut m.header,
            Message::OfferResponse(m) => &mut m.header,
            Message::PushRequest(m) => &mut m.header,
            Message::PushResponse(m) => &mut m.header,
            Message::DemandRequest(m) => &mut m.header,
            Message::DemandResponse(m) => &mut m.header,
            Message::DeleteRequest(m) => &mut m.header,
            Message::DeleteResponse(m) => &mut m.header,
            Message::MoveRequest(m) => &mut m.header,
            Message::MoveResponse(m) => &mut m.header,
        }
    }

    /// This message re-addressed to another receiver
    #[must_use]
    pub fn with_receiver(mut self, receiver: PeerAddress) -> Self {
        self.header_mut().receiver = receiver;
        self
    }
}

#[cfg(test)]
mod tests {
    use peerdrive_core::domain::DeviceId;

    use super::*;

    fn header() -> MessageHeader {
        MessageHeader::new(
            ExchangeId::new(),
            StatusCode::Accepted,
            ClientDevice::new("alice", DeviceId::new(), PeerAddress::new("a", 1)),
            PeerAddress::new("b", 2),
        )
    }

    #[test]
    fn test_kind_matches_variant() {
        let msg = Message::DeleteRequest(DeleteRequest {
            header: header(),
            path: "a.txt".into(),
            owner: None,
            file_id: None,
        });
        assert_eq!(msg.kind(), MessageKind::DeleteRequest);
        assert!(msg.kind().is_request());
        assert!(!MessageKind::DeleteResponse.is_request());
    }

    #[test]
    fn test_with_receiver_rewrites_header() {
        let msg = Message::OfferResponse(OfferResponse {
            header: header(),
            path: "a.txt".into(),
        });
        let readdressed = msg.with_receiver(PeerAddress::new("c", 3));
        assert_eq!(readdressed.header().receiver, PeerAddress::new("c", 3));
    }

    #[test]
    fn test_push_request_serde_roundtrip() {
        let msg = Message::PushRequest(PushRequest {
            header: header(),
            path: "docs/report.txt".into(),
            is_file: true,
            chunk_index: 2,
            chunk_size: 1024,
            total_chunks: Some(3),
            checksum: Some("abc".into()),
            owner: Some("alice".into()),
            access_type: Some(AccessType::Write),
            sharers: vec![Sharer::new("bob", AccessType::Read)],
            file_id: Some(FileId::new()),
            data: vec![1, 2, 3],
        });

        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_demand_response_negative_markers_roundtrip() {
        let msg = Message::DemandResponse(DemandResponse {
            header: header(),
            path: "gone.txt".into(),
            chunk_index: -1,
            total_chunks: -1,
            chunk_size: 0,
            checksum: None,
            is_file: true,
            sharers: Vec::new(),
            data: Vec::new(),
        });

        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }
}
