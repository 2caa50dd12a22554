//! TCP reassembly and PostgreSQL v3 framing.
//!
//! Packets enter through the [`FlowTable`], which canonicalizes each
//! conversation to a client→server key and feeds the matching [`Flow`].
//! Each flow reassembles both directions independently, frames the client
//! half into [`ClientMessage`]s, and stamps `CommandComplete` /
//! `ReadyForQuery` timestamps from the server half onto the simple queries
//! awaiting them.

pub mod flow;
pub mod message;
pub mod parser;
pub mod segments;



pub use flow::{Direction, Flow, FlowKey, FlowTable};
pub use message::{is_ascii_type, ClientKind, ClientMessage, ServerKind, LENGTH_ONLY_TAG};
pub use parser::{DirectionParser, Frame, MAX_FRAME_LEN};
pub use segments::SegmentLog;
