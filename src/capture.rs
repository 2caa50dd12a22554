//! Offline capture ingest.
//!
//! Reads a pcap file, slices each record down to its TCP payload and
//! endpoints, keeps the packets that touch the configured server endpoint,
//! and returns them sorted by capture timestamp — the order the flow table
//! expects. IPv4 and IPv6 are both supported; empty payloads (pure ACKs)
//! are discarded here so downstream code never sees them.

use std::fs::File;
use std::io::{BufReader, Read};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use etherparse::{NetSlice, SlicedPacket, TransportSlice};
use pcap_file::pcap::PcapReader;
use pcap_file::DataLink;
use tracing::info;

use crate::config::ServerEndpoint;
use crate::{Error, Result};

/// One captured TCP segment relevant to the filtered conversation.
#[derive(Debug, Clone)]
pub struct CapturedPacket {
    pub timestamp: DateTime<Utc>,
    pub src: SocketAddr,
    pub dst: SocketAddr,
    pub payload: Bytes,
}

/// Reads and filters a capture file. See [`read_capture`].
pub fn read_capture_file(path: &Path, filter: &ServerEndpoint) -> Result<Vec<CapturedPacket>> {
    let file = File::open(path)?;
    read_capture(BufReader::new(file), filter)
}

/// Reads a pcap stream and returns the TCP packets touching `filter`,
/// sorted by capture timestamp.
///
/// Records that are not parseable TCP are skipped. An unsupported link
/// type fails the whole read up front rather than silently skipping every
/// record.
pub fn read_capture<R: Read>(reader: R, filter: &ServerEndpoint) -> Result<Vec<CapturedPacket>> {
    let mut pcap = PcapReader::new(reader)?;
    let datalink = pcap.header().datalink;
    if !matches!(
        datalink,
        DataLink::ETHERNET
            | DataLink::RAW
            | DataLink::IPV4
            | DataLink::IPV6
            | DataLink::NULL
            | DataLink::LOOP
    ) {
        return Err(Error::Capture(format!(
            "unsupported link type {datalink:?}"
        )));
    }

    let mut packets = Vec::new();
    while let Some(next) = pcap.next_packet() {
        let record = next?;
        let Some((src, dst, payload)) = slice_tcp(datalink, record.data.as_ref()) else {
            continue;
        };
        if payload.is_empty() {
            continue;
        }
        if !filter.matches(src) && !filter.matches(dst) {
            continue;
        }
        let timestamp = DateTime::from_timestamp(
            record.timestamp.as_secs() as i64,
            record.timestamp.subsec_nanos(),
        )
        .ok_or_else(|| Error::Capture("packet timestamp out of range".to_string()))?;

        packets.push(CapturedPacket {
            timestamp,
            src,
            dst,
            payload: Bytes::copy_from_slice(payload),
        });
    }

    packets.sort_by_key(|packet| packet.timestamp);
    info!(packets = packets.len(), "extracted TCP packets from capture");
    Ok(packets)
}

fn slice_tcp(datalink: DataLink, data: &[u8]) -> Option<(SocketAddr, SocketAddr, &[u8])> {
    let sliced = match datalink {
        DataLink::ETHERNET => SlicedPacket::from_ethernet(data).ok()?,
        DataLink::RAW | DataLink::IPV4 | DataLink::IPV6 => SlicedPacket::from_ip(data).ok()?,
        // BSD loopback prefixes a 4-byte address-family word.
        DataLink::NULL | DataLink::LOOP => SlicedPacket::from_ip(data.get(4..)?).ok()?,
        _ => return None,
    };

    let (src_ip, dst_ip): (IpAddr, IpAddr) = match &sliced.net {
        Some(NetSlice::Ipv4(v4)) => (
            v4.header().source_addr().into(),
            v4.header().destination_addr().into(),
        ),
        Some(NetSlice::Ipv6(v6)) => (
            v6.header().source_addr().into(),
            v6.header().destination_addr().into(),
        ),
        _ => return None,
    };

    let Some(TransportSlice::Tcp(tcp)) = sliced.transport else {
        return None;
    };

    Some((
        SocketAddr::new(src_ip, tcp.source_port()),
        SocketAddr::new(dst_ip, tcp.destination_port()),
        tcp.payload(),
    ))
}
