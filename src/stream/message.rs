use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};

/// Tag carried by frames that have no type byte (startup, SSLRequest,
/// CancelRequest).
pub const LENGTH_ONLY_TAG: u8 = 0;

/// True if `byte` can open a typed PostgreSQL v3 frame.
pub fn is_ascii_type(byte: u8) -> bool {
    byte.is_ascii_alphabetic()
}

/// Client-to-server message kinds.
///
/// Any ASCII type byte outside the known set is still framed (the length
/// field alone drives framing) and classified as [`ClientKind::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    Query,
    Parse,
    Bind,
    Execute,
    Sync,
    Terminate,
    CopyData,
    CopyFail,
    Describe,
    Flush,
    FunctionCall,
    FunctionCallResponse,
    Password,
    LengthOnly,
    Other,
}

impl ClientKind {
    pub fn from_tag(tag: u8) -> Self {
        match tag {
            b'Q' => ClientKind::Query,
            b'P' => ClientKind::Parse,
            b'B' => ClientKind::Bind,
            b'E' => ClientKind::Execute,
            b'S' => ClientKind::Sync,
            b'X' => ClientKind::Terminate,
            b'd' => ClientKind::CopyData,
            b'f' => ClientKind::CopyFail,
            b'D' => ClientKind::Describe,
            b'H' => ClientKind::Flush,
            b'F' => ClientKind::FunctionCall,
            b'V' => ClientKind::FunctionCallResponse,
            b'p' => ClientKind::Password,
            LENGTH_ONLY_TAG => ClientKind::LengthOnly,
            _ => ClientKind::Other,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientKind::Query => "Query",
            ClientKind::Parse => "Parse",
            ClientKind::Bind => "Bind",
            ClientKind::Execute => "Execute",
            ClientKind::Sync => "Sync",
            ClientKind::Terminate => "Terminate",
            ClientKind::CopyData => "CopyData",
            ClientKind::CopyFail => "CopyFail",
            ClientKind::Describe => "Describe",
            ClientKind::Flush => "Flush",
            ClientKind::FunctionCall => "FunctionCall",
            ClientKind::FunctionCallResponse => "FunctionCallResponse",
            ClientKind::Password => "PasswordMessage",
            ClientKind::LengthOnly => "<len-only>",
            ClientKind::Other => "Unknown",
        }
    }

    /// Simple queries are the only kind answered by a dedicated
    /// `CommandComplete`; extended-protocol messages share a single
    /// `ReadyForQuery` after `Sync` and are recorded without correlation.
    pub fn needs_command_complete(&self) -> bool {
        matches!(self, ClientKind::Query)
    }

    pub fn needs_ready_for_query(&self) -> bool {
        matches!(self, ClientKind::Query)
    }

    pub fn is_simple_query(&self) -> bool {
        matches!(self, ClientKind::Query)
    }
}

/// Server-to-client message kinds. Only `CommandComplete` and
/// `ReadyForQuery` drive correlation; the rest are framed and skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerKind {
    CommandComplete,
    ReadyForQuery,
    AuthRequest,
    ErrorResponse,
    RowDescription,
    DataRow,
    LengthOnly,
    Other,
}

impl ServerKind {
    pub fn from_tag(tag: u8) -> Self {
        match tag {
            b'C' => ServerKind::CommandComplete,
            b'Z' => ServerKind::ReadyForQuery,
            b'R' => ServerKind::AuthRequest,
            b'E' => ServerKind::ErrorResponse,
            b'T' => ServerKind::RowDescription,
            b'D' => ServerKind::DataRow,
            LENGTH_ONLY_TAG => ServerKind::LengthOnly,
            _ => ServerKind::Other,
        }
    }
}

/// One logical client message reassembled from one or more TCP segments.
///
/// `tag`, `len` and `payload` reconstruct the exact on-wire bytes; the
/// timestamps date the first and last captured byte and, for simple
/// queries, the server's `CommandComplete` / `ReadyForQuery` answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientMessage {
    pub first_ts: DateTime<Utc>,
    pub last_ts: DateTime<Utc>,
    pub command_complete_ts: Option<DateTime<Utc>>,
    pub ready_for_query_ts: Option<DateTime<Utc>>,
    /// ASCII type byte, or [`LENGTH_ONLY_TAG`] for length-only frames.
    pub tag: u8,
    /// Declared length field (includes itself, excludes the type byte).
    pub len: u32,
    pub payload: Bytes,
}

impl ClientMessage {
    pub fn kind(&self) -> ClientKind {
        ClientKind::from_tag(self.tag)
    }

    pub fn has_type_byte(&self) -> bool {
        self.tag != LENGTH_ONLY_TAG
    }

    /// On-wire size of the serialized message.
    pub fn wire_len(&self) -> usize {
        if self.has_type_byte() {
            1 + self.len as usize
        } else {
            self.len as usize
        }
    }

    /// Serializes back to the exact bytes observed in the capture.
    pub fn to_wire(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.wire_len());
        if self.has_type_byte() {
            buf.put_u8(self.tag);
        }
        buf.put_u32(self.len);
        buf.put(self.payload.as_ref());
        buf.freeze()
    }

    /// SQL text of a simple query, with the trailing NUL and surrounding
    /// whitespace removed. `None` for every other kind.
    pub fn query_text(&self) -> Option<String> {
        if !self.kind().is_simple_query() {
            return None;
        }
        let body = self
            .payload
            .strip_suffix(&[0u8])
            .unwrap_or(self.payload.as_ref());
        Some(String::from_utf8_lossy(body).trim().to_string())
    }

    /// Human-readable kind, e.g. `Query (Q)` or `<len-only>`.
    pub fn kind_label(&self) -> String {
        let name = self.kind().name();
        if self.has_type_byte() {
            format!("{name} ({})", self.tag as char)
        } else {
            name.to_string()
        }
    }
}
