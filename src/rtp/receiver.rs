//! RTP receiver
//!
//! Multiplexes any number of receive sessions over one extended UDP socket
//! per local port. Packets are classified by (destination address, source
//! address, destination port, SSRC), validated, filtered, counted and
//! handed to the session's subscribers in arrival order. Sequence-order
//! recovery is the jitter buffer's job, not the receiver's.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::audio::SampleFormat;
use crate::error::{NodeError, NodeResult};
use crate::ptp::{PtpClock, PtpTimestamp};
use crate::rtp::filter::RtpFilter;
use crate::rtp::packet::RtpPacketView;
use crate::rtp::socket::UdpExtSocket;
use crate::rtp::stats::{RtpPacketStats, RtpStatsCounters};

/// Identifies one installed receive session.
pub type RtpSessionId = u64;

/// Identifies one subscription within a session.
pub type SubscriptionId = u64;

/// Parameters of a receive session. Equality is structural.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpSessionParams {
    pub connection_address: IpAddr,
    pub rtp_port: u16,
    pub payload_type: u8,
    pub clock_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
}

impl RtpSessionParams {
    /// RTCP runs on the next port up.
    pub fn rtcp_port(&self) -> u16 {
        self.rtp_port + 1
    }

    /// Two sessions conflict when their RTP/RTCP port pairs overlap on the
    /// same destination address.
    pub fn conflicts_with(&self, other: &RtpSessionParams) -> bool {
        if self.connection_address != other.connection_address {
            return false;
        }
        self.rtp_port == other.rtp_port
            || self.rtp_port == other.rtcp_port()
            || self.rtcp_port() == other.rtp_port
    }
}

/// A validated packet delivered to session subscribers.
#[derive(Debug, Clone)]
pub struct RtpPacketEvent {
    pub session: RtpSessionId,
    pub payload: Bytes,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub src: SocketAddr,
    pub dst: IpAddr,
    pub arrival: PtpTimestamp,
}

type SubscriberFn = Arc<dyn Fn(&RtpPacketEvent) + Send + Sync>;

struct SsrcState {
    stats: RtpPacketStats,
}

struct SessionContext {
    id: RtpSessionId,
    params: RtpSessionParams,
    filter: RtpFilter,
    subscribers: Vec<(SubscriptionId, SubscriberFn)>,
    ssrc_states: HashMap<u32, SsrcState>,
}

/// Pure session table: classification and dispatch, no sockets.
#[derive(Default)]
struct SessionTable {
    sessions: HashMap<(IpAddr, u16), SessionContext>,
    next_session_id: RtpSessionId,
    next_subscription_id: SubscriptionId,
    /// Packets that matched no session or failed validation.
    unclaimed: u64,
}

impl SessionTable {
    fn add(&mut self, params: RtpSessionParams, filter: RtpFilter) -> NodeResult<RtpSessionId> {
        if self
            .sessions
            .values()
            .any(|s| s.params.conflicts_with(&params))
        {
            return Err(NodeError::SessionRejected(format!(
                "port overlap on {}:{}",
                params.connection_address, params.rtp_port
            )));
        }

        self.next_session_id += 1;
        let id = self.next_session_id;
        self.sessions.insert(
            (params.connection_address, params.rtp_port),
            SessionContext {
                id,
                params,
                filter,
                subscribers: Vec::new(),
                ssrc_states: HashMap::new(),
            },
        );
        Ok(id)
    }

    fn remove(&mut self, id: RtpSessionId) -> Option<RtpSessionParams> {
        let key = self
            .sessions
            .iter()
            .find(|(_, s)| s.id == id)
            .map(|(k, _)| *k)?;
        self.sessions.remove(&key).map(|s| s.params)
    }

    fn context_mut(&mut self, id: RtpSessionId) -> Option<&mut SessionContext> {
        self.sessions.values_mut().find(|s| s.id == id)
    }

    /// Classifies and accounts one packet; returns the event and the
    /// subscribers to invoke (outside any lock).
    fn dispatch(
        &mut self,
        data: &[u8],
        src: SocketAddr,
        dst: IpAddr,
        port: u16,
        arrival: PtpTimestamp,
    ) -> Option<(RtpPacketEvent, Vec<SubscriberFn>)> {
        let packet = match RtpPacketView::parse(data) {
            Ok(packet) => packet,
            Err(e) => {
                self.unclaimed += 1;
                trace!("dropping invalid RTP packet from {src}: {e}");
                return None;
            }
        };

        let session = match self.sessions.get_mut(&(dst, port)) {
            Some(session) => session,
            None => {
                self.unclaimed += 1;
                return None;
            }
        };

        if !session.filter.allows(src.ip()) {
            trace!("source {} rejected by session filter", src.ip());
            return None;
        }

        let ssrc = packet.ssrc();
        let state = session
            .ssrc_states
            .entry(ssrc)
            .or_insert_with(|| SsrcState {
                stats: RtpPacketStats::default(),
            });
        state.stats.update(packet.sequence_number());

        let event = RtpPacketEvent {
            session: session.id,
            payload: Bytes::copy_from_slice(packet.payload()),
            sequence_number: packet.sequence_number(),
            timestamp: packet.timestamp(),
            ssrc,
            src,
            dst,
            arrival,
        };
        let subscribers = session
            .subscribers
            .iter()
            .map(|(_, f)| f.clone())
            .collect();
        Some((event, subscribers))
    }
}

/// The multi-session RTP receiver.
pub struct RtpReceiver {
    interface: Ipv4Addr,
    clock: Arc<PtpClock>,
    table: Arc<RwLock<SessionTable>>,
    sockets: parking_lot::Mutex<HashMap<u16, SocketEntry>>,
}

struct SocketEntry {
    socket: Arc<UdpExtSocket>,
    reader: JoinHandle<()>,
    /// Reference counts per joined multicast group.
    groups: HashMap<Ipv4Addr, usize>,
    /// Sessions using this port.
    session_count: usize,
}

impl RtpReceiver {
    pub fn new(interface: Ipv4Addr, clock: Arc<PtpClock>) -> Self {
        Self {
            interface,
            clock,
            table: Arc::new(RwLock::new(SessionTable::default())),
            sockets: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Installs a session: binds the port if needed, joins the multicast
    /// group on first reference.
    pub fn add_session(
        &self,
        params: RtpSessionParams,
        filter: RtpFilter,
    ) -> NodeResult<RtpSessionId> {
        let port = params.rtp_port;
        let group = match params.connection_address {
            IpAddr::V4(addr) if addr.is_multicast() => Some(addr),
            _ => None,
        };

        let id = self.table.write().add(params, filter)?;

        let mut sockets = self.sockets.lock();
        if !sockets.contains_key(&port) {
            let socket = match UdpExtSocket::bind(port) {
                Ok(socket) => Arc::new(socket),
                Err(e) => {
                    self.table.write().remove(id);
                    return Err(e);
                }
            };
            let reader = spawn_reader(
                socket.clone(),
                port,
                self.interface,
                self.clock.clone(),
                self.table.clone(),
            );
            sockets.insert(
                port,
                SocketEntry {
                    socket,
                    reader,
                    groups: HashMap::new(),
                    session_count: 0,
                },
            );
        }
        let entry = sockets.get_mut(&port).expect("socket entry just ensured");
        entry.session_count += 1;

        if let Some(group) = group {
            let count = entry.groups.entry(group).or_insert(0);
            if *count == 0 {
                if let Err(e) = entry.socket.join_multicast_v4(group, self.interface) {
                    warn!("failed to join {group}: {e}");
                }
            }
            *count += 1;
        }

        info!("🎧 RTP session {id} installed on port {port}");
        Ok(id)
    }

    /// Removes a session, leaving its multicast group and closing the
    /// socket on last reference.
    pub fn remove_session(&self, id: RtpSessionId) {
        let Some(params) = self.table.write().remove(id) else {
            return;
        };

        let mut sockets = self.sockets.lock();
        if let Some(entry) = sockets.get_mut(&params.rtp_port) {
            if let IpAddr::V4(group) = params.connection_address {
                if group.is_multicast() {
                    if let Some(count) = entry.groups.get_mut(&group) {
                        *count -= 1;
                        if *count == 0 {
                            entry.groups.remove(&group);
                            let _ = entry.socket.leave_multicast_v4(group, self.interface);
                        }
                    }
                }
            }

            entry.session_count -= 1;
            if entry.session_count == 0 {
                if let Some(entry) = sockets.remove(&params.rtp_port) {
                    entry.reader.abort();
                }
            }
        }

        info!("RTP session {id} removed");
    }

    /// Attaches a packet callback. Packets arrive in network order.
    pub fn subscribe(
        &self,
        session: RtpSessionId,
        callback: impl Fn(&RtpPacketEvent) + Send + Sync + 'static,
    ) -> Option<SubscriptionId> {
        let mut table = self.table.write();
        table.next_subscription_id += 1;
        let subscription = table.next_subscription_id;
        let context = table.context_mut(session)?;
        context.subscribers.push((subscription, Arc::new(callback)));
        Some(subscription)
    }

    /// Detaches a subscription. The session dies with its last subscriber.
    pub fn unsubscribe(&self, session: RtpSessionId, subscription: SubscriptionId) {
        let remove_session = {
            let mut table = self.table.write();
            let Some(context) = table.context_mut(session) else {
                return;
            };
            context.subscribers.retain(|(id, _)| *id != subscription);
            context.subscribers.is_empty()
        };

        if remove_session {
            self.remove_session(session);
        }
    }

    /// Per-SSRC statistics of a session: (ssrc, window, total).
    pub fn session_stats(
        &self,
        session: RtpSessionId,
    ) -> Vec<(u32, RtpStatsCounters, RtpStatsCounters)> {
        let mut table = self.table.write();
        let Some(context) = table.context_mut(session) else {
            return Vec::new();
        };
        context
            .ssrc_states
            .iter()
            .map(|(ssrc, state)| (*ssrc, state.stats.window(), state.stats.total()))
            .collect()
    }

    /// Flags a packet as having missed its playout deadline.
    pub fn mark_too_late(&self, session: RtpSessionId, ssrc: u32, sequence: u16) {
        let mut table = self.table.write();
        if let Some(context) = table.context_mut(session) {
            if let Some(state) = context.ssrc_states.get_mut(&ssrc) {
                state.stats.mark_too_late(sequence);
            }
        }
    }

    /// Packets that matched no session or failed validation.
    pub fn unclaimed_packets(&self) -> u64 {
        self.table.read().unclaimed
    }

    /// Stops all reader tasks and drops all sessions.
    pub fn shutdown(&self) {
        let mut sockets = self.sockets.lock();
        for (_, entry) in sockets.drain() {
            entry.reader.abort();
        }
        self.table.write().sessions.clear();
    }
}

impl Drop for RtpReceiver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// The per-port reader: one task per socket, all running on the node's
/// single reactive thread.
fn spawn_reader(
    socket: Arc<UdpExtSocket>,
    port: u16,
    interface: Ipv4Addr,
    clock: Arc<PtpClock>,
    table: Arc<RwLock<SessionTable>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = vec![0u8; 2048];
        loop {
            let info = match socket.recv_ext(&mut buf).await {
                Ok(info) => info,
                Err(e) => {
                    debug!("RTP socket {port} receive error: {e}");
                    continue;
                }
            };

            let arrival = clock.now();
            let dst = info.dst.unwrap_or(IpAddr::V4(interface));

            let dispatched =
                table
                    .write()
                    .dispatch(&buf[..info.len], info.src, dst, port, arrival);
            if let Some((event, subscribers)) = dispatched {
                for subscriber in subscribers {
                    subscriber(&event);
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(last_octet: u8, port: u16) -> RtpSessionParams {
        RtpSessionParams {
            connection_address: IpAddr::V4(Ipv4Addr::new(239, 1, 2, last_octet)),
            rtp_port: port,
            payload_type: 97,
            clock_rate: 48_000,
            channels: 2,
            sample_format: SampleFormat::I24,
        }
    }

    fn make_packet(seq: u16, ssrc: u32, payload: &[u8]) -> Vec<u8> {
        use crate::rtp::packet::RtpHeader;
        let mut header = RtpHeader::new(97, ssrc);
        header.sequence_number = seq;
        header.timestamp = seq as u32 * 48;
        let mut out = bytes::BytesMut::new();
        header.encode(payload, &mut out);
        out.to_vec()
    }

    #[test]
    fn test_conflicting_ports_rejected() {
        let mut table = SessionTable::default();
        table.add(params(3, 5004), RtpFilter::new()).unwrap();

        // Same port, same address
        assert!(table.add(params(3, 5004), RtpFilter::new()).is_err());
        // RTCP port of the new session collides with existing RTP port
        assert!(table.add(params(3, 5003), RtpFilter::new()).is_err());
        // RTP port of the new session collides with existing RTCP port
        assert!(table.add(params(3, 5005), RtpFilter::new()).is_err());
        // Same ports on a different address are fine
        assert!(table.add(params(4, 5004), RtpFilter::new()).is_ok());
    }

    #[test]
    fn test_dispatch_classifies_by_destination() {
        let mut table = SessionTable::default();
        let id = table.add(params(3, 5004), RtpFilter::new()).unwrap();

        let src: SocketAddr = "10.0.0.7:9000".parse().unwrap();
        let packet = make_packet(100, 0xABCD, &[1, 2, 3]);

        // Matching destination
        let result = table.dispatch(
            &packet,
            src,
            IpAddr::V4(Ipv4Addr::new(239, 1, 2, 3)),
            5004,
            PtpTimestamp::default(),
        );
        let (event, _) = result.unwrap();
        assert_eq!(event.session, id);
        assert_eq!(event.sequence_number, 100);
        assert_eq!(event.payload.as_ref(), &[1, 2, 3]);

        // Wrong destination: unclaimed
        let result = table.dispatch(
            &packet,
            src,
            IpAddr::V4(Ipv4Addr::new(239, 9, 9, 9)),
            5004,
            PtpTimestamp::default(),
        );
        assert!(result.is_none());
        assert_eq!(table.unclaimed, 1);
    }

    #[test]
    fn test_dispatch_applies_filter() {
        let mut table = SessionTable::default();
        let mut filter = RtpFilter::new();
        filter.add_include("10.0.0.7".parse().unwrap());
        table.add(params(3, 5004), filter).unwrap();

        let packet = make_packet(1, 1, &[0; 6]);
        let dst = IpAddr::V4(Ipv4Addr::new(239, 1, 2, 3));

        let allowed: SocketAddr = "10.0.0.7:9000".parse().unwrap();
        assert!(table
            .dispatch(&packet, allowed, dst, 5004, PtpTimestamp::default())
            .is_some());

        let denied: SocketAddr = "10.0.0.8:9000".parse().unwrap();
        assert!(table
            .dispatch(&packet, denied, dst, 5004, PtpTimestamp::default())
            .is_none());
    }

    #[test]
    fn test_dispatch_tracks_per_ssrc_stats() {
        let mut table = SessionTable::default();
        let id = table.add(params(3, 5004), RtpFilter::new()).unwrap();
        let src: SocketAddr = "10.0.0.7:9000".parse().unwrap();
        let dst = IpAddr::V4(Ipv4Addr::new(239, 1, 2, 3));

        for seq in [10u16, 11, 13] {
            let packet = make_packet(seq, 42, &[0; 6]);
            table.dispatch(&packet, src, dst, 5004, PtpTimestamp::default());
        }

        let context = table.context_mut(id).unwrap();
        let stats = &context.ssrc_states.get(&42).unwrap().stats;
        let window = stats.window();
        assert_eq!(window.received, 3);
        assert_eq!(window.dropped, 1); // sequence 12 missing
    }

    #[test]
    fn test_invalid_packet_counted_not_dispatched() {
        let mut table = SessionTable::default();
        table.add(params(3, 5004), RtpFilter::new()).unwrap();

        let src: SocketAddr = "10.0.0.7:9000".parse().unwrap();
        let result = table.dispatch(
            &[0u8; 4],
            src,
            IpAddr::V4(Ipv4Addr::new(239, 1, 2, 3)),
            5004,
            PtpTimestamp::default(),
        );
        assert!(result.is_none());
        assert_eq!(table.unclaimed, 1);
    }
}
