use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::net::SocketAddr;
use tracing::debug;

use super::message::{ClientMessage, ServerKind};
use super::parser::DirectionParser;
use crate::capture::CapturedPacket;
use crate::config::ServerEndpoint;
use crate::{Error, Result};

/// Which half of the conversation a packet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Client,
    Server,
}

/// Canonical identity of one TCP conversation. Packets from either
/// direction map to the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub client: SocketAddr,
    pub server: SocketAddr,
}

/// One bidirectional conversation: a payload-capturing parser for the
/// client half, a scanning parser for the server half, the completed
/// client messages, and the correlation cursors.
///
/// Correlation is strictly ordered: the i-th server `CommandComplete`
/// stamps the i-th client message (from the cursor) whose kind awaits it,
/// and the cursor then moves past that message, so a stamp is never
/// overwritten.
#[derive(Debug)]
pub struct Flow {
    client: DirectionParser,
    server: DirectionParser,
    completed: Vec<ClientMessage>,
    next_command_complete: usize,
    next_ready_for_query: usize,
}

impl Default for Flow {
    fn default() -> Self {
        Self::new()
    }
}

impl Flow {
    pub fn new() -> Self {
        Self {
            client: DirectionParser::client(),
            server: DirectionParser::server(),
            completed: Vec::new(),
            next_command_complete: 0,
            next_ready_for_query: 0,
        }
    }

    /// Feeds one payload into the chosen direction and drives extraction.
    pub fn ingest(&mut self, direction: Direction, payload: &[u8], ts: DateTime<Utc>) {
        match direction {
            Direction::Client => {
                self.client.append(payload, ts);
                for frame in self.client.extract_frames() {
                    self.completed.push(ClientMessage::from(frame));
                }
            }
            Direction::Server => {
                self.server.append(payload, ts);
                for frame in self.server.extract_frames() {
                    match ServerKind::from_tag(frame.tag) {
                        ServerKind::CommandComplete => {
                            self.attach_command_complete(frame.first_ts);
                        }
                        ServerKind::ReadyForQuery => {
                            self.attach_ready_for_query(frame.first_ts);
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    fn attach_command_complete(&mut self, ts: DateTime<Utc>) {
        while self.next_command_complete < self.completed.len() {
            let index = self.next_command_complete;
            self.next_command_complete += 1;
            if self.completed[index].kind().needs_command_complete() {
                self.completed[index].command_complete_ts = Some(ts);
                return;
            }
        }
        debug!("CommandComplete with no awaiting client message, dropped");
    }

    fn attach_ready_for_query(&mut self, ts: DateTime<Utc>) {
        while self.next_ready_for_query < self.completed.len() {
            let index = self.next_ready_for_query;
            self.next_ready_for_query += 1;
            if self.completed[index].kind().needs_ready_for_query() {
                self.completed[index].ready_for_query_ts = Some(ts);
                return;
            }
        }
        debug!("ReadyForQuery with no awaiting client message, dropped");
    }

    /// Returns the completed messages and resets all internal state.
    pub fn drain(&mut self) -> Vec<ClientMessage> {
        let messages = std::mem::take(&mut self.completed);
        *self = Flow::new();
        messages
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }
}

/// Routes captured packets to their flows and owns every flow until
/// [`FlowTable::collect`] drains them.
#[derive(Debug)]
pub struct FlowTable {
    server: ServerEndpoint,
    flows: HashMap<FlowKey, Flow>,
}

impl FlowTable {
    pub fn new(server: ServerEndpoint) -> Self {
        Self {
            server,
            flows: HashMap::new(),
        }
    }

    /// Dispatches one packet to its flow, creating the flow on first
    /// contact.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InputTooSmall`] for payloads under 4 bytes (too
    /// short to carry a length field); no flow state is touched.
    pub fn route(&mut self, packet: &CapturedPacket) -> Result<()> {
        if packet.payload.len() < 4 {
            return Err(Error::InputTooSmall {
                len: packet.payload.len(),
            });
        }

        let (key, direction) = if self.server.matches(packet.src) {
            (
                FlowKey {
                    client: packet.dst,
                    server: packet.src,
                },
                Direction::Server,
            )
        } else {
            (
                FlowKey {
                    client: packet.src,
                    server: packet.dst,
                },
                Direction::Client,
            )
        };

        self.flows
            .entry(key)
            .or_default()
            .ingest(direction, &packet.payload, packet.timestamp);
        Ok(())
    }

    /// Drains every flow and removes it; returns the union of their
    /// completed messages, in no particular order.
    pub fn collect(&mut self) -> Vec<ClientMessage> {
        let mut messages = Vec::new();
        for (_, mut flow) in self.flows.drain() {
            messages.append(&mut flow.drain());
        }
        messages
    }

    pub fn flow_count(&self) -> usize {
        self.flows.len()
    }
}
