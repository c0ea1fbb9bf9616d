//! PTP port and instance
//!
//! One port per interface participates in the BMCA and disciplines the
//! shared [`PtpClock`]. The port owns the two PTP sockets (event 319,
//! general 320, both joined to 224.0.1.129), runs the state machine
//! `Initializing -> Listening -> (Master | Slave | Passive)` and feeds
//! completed Sync/Delay exchanges into the servo.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::error::{NodeError, NodeResult};
use crate::ptp::bmca::{recommend_state, BmcaDecision, PtpForeignMasterList};
use crate::ptp::datasets::{
    PtpClockIdentity, PtpCurrentDs, PtpDefaultDs, PtpParentDs, PtpPortIdentity,
    PtpTimePropertiesDs,
};
use crate::ptp::messages::{
    PtpAnnounceMessage, PtpDelayRespMessage, PtpMessageHeader, PtpMessageType,
    PtpTimestampMessage,
};
use crate::ptp::servo::PtpClock;
use crate::ptp::time::{PtpTimeInterval, PtpTimestamp};

/// PTP primary multicast group.
pub const PTP_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(224, 0, 1, 129);
/// Event port: Sync, Delay_Req.
pub const PTP_EVENT_PORT: u16 = 319;
/// General port: Announce, Follow_Up, Delay_Resp.
pub const PTP_GENERAL_PORT: u16 = 320;

/// Announce intervals without an announce from the parent before the port
/// falls back to Listening.
const ANNOUNCE_TIMEOUT_INTERVALS: u32 = 4;

/// Port states (IEEE 1588-2019: 9.2.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtpPortState {
    Initializing,
    Listening,
    Master,
    Slave,
    Passive,
}

/// Emitted whenever the BMCA selects a new parent.
#[derive(Debug, Clone)]
pub struct ParentChangedEvent {
    pub parent: PtpParentDs,
}

type ParentChangedCallback = Box<dyn Fn(&ParentChangedEvent) + Send + Sync>;

/// Configuration for one PTP instance.
#[derive(Debug, Clone)]
pub struct PtpConfig {
    pub interface: Ipv4Addr,
    pub domain: u8,
    pub slave_only: bool,
    /// log2 of the announce interval in seconds (AES67 default: 1 = 2 s).
    pub log_announce_interval: i8,
    /// log2 of the sync interval when acting as master.
    pub log_sync_interval: i8,
    /// log2 of the delay request interval when acting as slave.
    pub log_delay_req_interval: i8,
}

impl Default for PtpConfig {
    fn default() -> Self {
        Self {
            interface: Ipv4Addr::UNSPECIFIED,
            domain: 0,
            slave_only: true,
            log_announce_interval: 1,
            log_sync_interval: 0,
            log_delay_req_interval: 0,
        }
    }
}

fn interval_from_log(log: i8) -> Duration {
    Duration::from_secs_f64(2f64.powi(log as i32))
}

/// Shared, read-mostly view of the port's data sets.
struct SharedState {
    state: RwLock<PtpPortState>,
    default_ds: RwLock<PtpDefaultDs>,
    current_ds: RwLock<PtpCurrentDs>,
    parent_ds: RwLock<PtpParentDs>,
    time_properties_ds: RwLock<PtpTimePropertiesDs>,
    parent_changed: Mutex<Vec<ParentChangedCallback>>,
}

/// A PTP instance with one port.
pub struct PtpInstance {
    config: PtpConfig,
    clock: Arc<PtpClock>,
    shared: Arc<SharedState>,
    port_identity: PtpPortIdentity,
}

impl PtpInstance {
    pub fn new(config: PtpConfig) -> Self {
        let clock_identity = generate_clock_identity(config.interface);
        let mut default_ds = PtpDefaultDs::new(clock_identity, config.domain);
        default_ds.slave_only = config.slave_only;

        let parent_ds = PtpParentDs::from_default_ds(&default_ds);
        let port_identity = PtpPortIdentity {
            clock_identity,
            port_number: 1,
        };

        info!("⏱️  PTP instance: identity {clock_identity}, domain {}", config.domain);

        Self {
            config,
            clock: Arc::new(PtpClock::new()),
            shared: Arc::new(SharedState {
                state: RwLock::new(PtpPortState::Initializing),
                default_ds: RwLock::new(default_ds),
                current_ds: RwLock::new(PtpCurrentDs::default()),
                parent_ds: RwLock::new(parent_ds),
                time_properties_ds: RwLock::new(PtpTimePropertiesDs::default()),
                parent_changed: Mutex::new(Vec::new()),
            }),
            port_identity,
        }
    }

    /// The disciplined clock all subsystems read time from.
    pub fn clock(&self) -> Arc<PtpClock> {
        self.clock.clone()
    }

    pub fn state(&self) -> PtpPortState {
        *self.shared.state.read()
    }

    pub fn parent_ds(&self) -> PtpParentDs {
        self.shared.parent_ds.read().clone()
    }

    pub fn current_ds(&self) -> PtpCurrentDs {
        *self.shared.current_ds.read()
    }

    pub fn grandmaster_identity(&self) -> PtpClockIdentity {
        self.shared.parent_ds.read().grandmaster_identity
    }

    pub fn domain(&self) -> u8 {
        self.config.domain
    }

    pub fn port_identity(&self) -> PtpPortIdentity {
        self.port_identity
    }

    /// Registers a callback invoked (on the reactive thread) whenever the
    /// BMCA selects a new parent.
    pub fn on_parent_changed(&self, callback: impl Fn(&ParentChangedEvent) + Send + Sync + 'static) {
        self.shared.parent_changed.lock().push(Box::new(callback));
    }

    /// Binds the event and general sockets. Separated from `run` so that a
    /// failure to bind the well-known ports surfaces from the setup call.
    pub fn bind(&self) -> NodeResult<PtpSockets> {
        Ok(PtpSockets {
            event: open_ptp_socket(PTP_EVENT_PORT, self.config.interface)?,
            general: open_ptp_socket(PTP_GENERAL_PORT, self.config.interface)?,
        })
    }

    /// Runs the port until `shutdown` flips to true. All reactive state
    /// lives inside this future.
    pub async fn run(
        &self,
        sockets: PtpSockets,
        mut shutdown: watch::Receiver<bool>,
    ) -> NodeResult<()> {
        let PtpSockets {
            event: event_socket,
            general: general_socket,
        } = sockets;

        let mut port = PortRuntime::new(
            &self.config,
            self.port_identity,
            self.clock.clone(),
            self.shared.clone(),
        );

        *self.shared.state.write() = PtpPortState::Listening;
        info!("⏱️  PTP port listening on domain {}", self.config.domain);

        let mut event_buf = [0u8; 256];
        let mut general_buf = [0u8; 256];
        let mut tick = tokio::time::interval(Duration::from_millis(250));

        enum Wake {
            Event(usize, SocketAddr),
            General(usize, SocketAddr),
            Tick,
            Shutdown,
        }

        loop {
            let wake = tokio::select! {
                result = event_socket.recv_from(&mut event_buf) => match result {
                    Ok((len, src)) => Wake::Event(len, src),
                    Err(e) => {
                        warn!("PTP event socket error: {e}");
                        continue;
                    }
                },
                result = general_socket.recv_from(&mut general_buf) => match result {
                    Ok((len, src)) => Wake::General(len, src),
                    Err(e) => {
                        warn!("PTP general socket error: {e}");
                        continue;
                    }
                },
                _ = tick.tick() => Wake::Tick,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    Wake::Shutdown
                }
            };

            match wake {
                Wake::Event(len, src) => {
                    port.handle_event_message(&event_buf[..len], src, &event_socket, &general_socket)
                        .await;
                }
                Wake::General(len, src) => {
                    port.handle_general_message(&general_buf[..len], src).await;
                }
                Wake::Tick => {
                    port.on_tick(&event_socket, &general_socket).await;
                }
                Wake::Shutdown => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        *self.shared.state.write() = PtpPortState::Initializing;
        info!("PTP port stopped");
        Ok(())
    }
}

/// Mutable per-port state owned by the running task.
struct PortRuntime {
    domain: u8,
    port_identity: PtpPortIdentity,
    clock: Arc<PtpClock>,
    shared: Arc<SharedState>,
    foreign_masters: PtpForeignMasterList,

    announce_interval: Duration,
    sync_interval: Duration,
    delay_req_interval: Duration,
    log_announce_interval: i8,
    log_sync_interval: i8,

    /// Pending two-step sync: (sequence_id, t2, correction).
    pending_sync: Option<(u16, PtpTimestamp, PtpTimeInterval)>,
    /// Last completed sync pair, needed for the delay computation.
    last_sync_pair: Option<(PtpTimestamp, PtpTimestamp)>,
    /// Outstanding delay request: (sequence_id, t3).
    pending_delay_req: Option<(u16, PtpTimestamp)>,

    last_parent_announce: Option<Instant>,
    last_bmca: Instant,
    last_announce_tx: Instant,
    last_sync_tx: Instant,
    last_delay_req_tx: Instant,

    announce_sequence: u16,
    sync_sequence: u16,
    delay_req_sequence: u16,
}

impl PortRuntime {
    fn new(
        config: &PtpConfig,
        port_identity: PtpPortIdentity,
        clock: Arc<PtpClock>,
        shared: Arc<SharedState>,
    ) -> Self {
        let now = Instant::now();
        Self {
            domain: config.domain,
            port_identity,
            clock,
            shared,
            foreign_masters: PtpForeignMasterList::new(port_identity.clock_identity),
            announce_interval: interval_from_log(config.log_announce_interval),
            sync_interval: interval_from_log(config.log_sync_interval),
            delay_req_interval: interval_from_log(config.log_delay_req_interval),
            log_announce_interval: config.log_announce_interval,
            log_sync_interval: config.log_sync_interval,
            pending_sync: None,
            last_sync_pair: None,
            pending_delay_req: None,
            last_parent_announce: None,
            last_bmca: now,
            last_announce_tx: now,
            last_sync_tx: now,
            last_delay_req_tx: now,
            announce_sequence: 0,
            sync_sequence: 0,
            delay_req_sequence: 0,
        }
    }

    fn state(&self) -> PtpPortState {
        *self.shared.state.read()
    }

    fn set_state(&self, state: PtpPortState) {
        let mut current = self.shared.state.write();
        if *current != state {
            info!("PTP port state: {:?} -> {:?}", *current, state);
            *current = state;
        }
    }

    async fn handle_event_message(
        &mut self,
        data: &[u8],
        src: SocketAddr,
        _event_socket: &UdpSocket,
        general_socket: &UdpSocket,
    ) {
        let header = match PtpMessageHeader::parse(data) {
            Ok(header) => header,
            Err(e) => {
                debug!("dropping malformed PTP event message from {src}: {e}");
                return;
            }
        };
        if header.domain != self.domain {
            return;
        }

        match header.message_type {
            PtpMessageType::Sync => self.handle_sync(data, &header),
            PtpMessageType::DelayReq => self.handle_delay_req(data, src, general_socket).await,
            _ => trace!("unexpected {:?} on event port", header.message_type),
        }
    }

    async fn handle_general_message(&mut self, data: &[u8], src: SocketAddr) {
        let header = match PtpMessageHeader::parse(data) {
            Ok(header) => header,
            Err(e) => {
                debug!("dropping malformed PTP general message from {src}: {e}");
                return;
            }
        };
        if header.domain != self.domain {
            return;
        }

        match header.message_type {
            PtpMessageType::Announce => self.handle_announce(data),
            PtpMessageType::FollowUp => self.handle_follow_up(data, &header),
            PtpMessageType::DelayResp => self.handle_delay_resp(data),
            _ => trace!("unexpected {:?} on general port", header.message_type),
        }
    }

    fn handle_announce(&mut self, data: &[u8]) {
        let announce = match PtpAnnounceMessage::parse(data) {
            Ok(announce) => announce,
            Err(e) => {
                debug!("dropping malformed announce: {e}");
                return;
            }
        };

        let now = Instant::now();
        if !self.foreign_masters.consider(&announce, now) {
            return;
        }

        let parent = self.shared.parent_ds.read().parent_port_identity;
        if announce.header.source_port_identity == parent {
            self.last_parent_announce = Some(now);
        }
    }

    fn handle_sync(&mut self, data: &[u8], header: &PtpMessageHeader) {
        if self.state() != PtpPortState::Slave {
            return;
        }
        let parent = self.shared.parent_ds.read().parent_port_identity;
        if header.source_port_identity != parent {
            return;
        }

        let t2 = self.clock.now();
        let sync = match PtpTimestampMessage::parse(data) {
            Ok(sync) => sync,
            Err(e) => {
                debug!("dropping malformed sync: {e}");
                return;
            }
        };

        if header.flags.two_step {
            self.pending_sync = Some((header.sequence_id, t2, header.correction_field));
        } else {
            let t1 = sync.timestamp + header.correction_field;
            self.complete_sync(t1, t2);
        }
    }

    fn handle_follow_up(&mut self, data: &[u8], header: &PtpMessageHeader) {
        let Some((pending_seq, t2, sync_correction)) = self.pending_sync else {
            return;
        };
        if header.sequence_id != pending_seq {
            trace!(
                "follow-up sequence {} does not match pending sync {}",
                header.sequence_id,
                pending_seq
            );
            return;
        }

        let follow_up = match PtpTimestampMessage::parse(data) {
            Ok(follow_up) => follow_up,
            Err(e) => {
                debug!("dropping malformed follow-up: {e}");
                return;
            }
        };

        self.pending_sync = None;
        let t1 = follow_up.timestamp + sync_correction + header.correction_field;
        self.complete_sync(t1, t2);
    }

    fn complete_sync(&mut self, t1: PtpTimestamp, t2: PtpTimestamp) {
        self.last_sync_pair = Some((t1, t2));
        self.clock.process_sync(t1, t2);

        let mut current = self.shared.current_ds.write();
        current.offset_from_master = self.clock.offset_from_master();
        current.mean_path_delay = self.clock.mean_path_delay();
    }

    fn handle_delay_resp(&mut self, data: &[u8]) {
        let Some((pending_seq, t3)) = self.pending_delay_req else {
            return;
        };

        let resp = match PtpDelayRespMessage::parse(data) {
            Ok(resp) => resp,
            Err(e) => {
                debug!("dropping malformed delay response: {e}");
                return;
            }
        };

        if resp.header.sequence_id != pending_seq
            || resp.requesting_port_identity != self.port_identity
        {
            return;
        }

        let Some((t1, t2)) = self.last_sync_pair else {
            return;
        };

        self.pending_delay_req = None;
        let t4 = resp.receive_timestamp - resp.header.correction_field;
        self.clock.process_delay(t1, t2, t3, t4);
        self.shared.current_ds.write().mean_path_delay = self.clock.mean_path_delay();
    }

    /// Master behaviour: answer Delay_Req with Delay_Resp.
    async fn handle_delay_req(&mut self, data: &[u8], _src: SocketAddr, general_socket: &UdpSocket) {
        if self.state() != PtpPortState::Master {
            return;
        }

        let t4 = self.clock.now();
        let req = match PtpTimestampMessage::parse(data) {
            Ok(req) => req,
            Err(e) => {
                debug!("dropping malformed delay request: {e}");
                return;
            }
        };

        let mut header =
            PtpMessageHeader::new(PtpMessageType::DelayResp, self.domain, self.port_identity);
        header.sequence_id = req.header.sequence_id;
        header.log_message_interval = self.log_announce_interval;

        let resp = PtpDelayRespMessage {
            header,
            receive_timestamp: t4,
            requesting_port_identity: req.header.source_port_identity,
        };

        let target = SocketAddr::new(IpAddr::V4(PTP_MULTICAST_ADDR), PTP_GENERAL_PORT);
        if let Err(e) = general_socket.send_to(&resp.serialize(), target).await {
            warn!("failed to send delay response: {e}");
        }
    }

    async fn on_tick(&mut self, event_socket: &UdpSocket, general_socket: &UdpSocket) {
        let now = Instant::now();

        // Announce receipt timeout: the selected parent went silent.
        if self.state() == PtpPortState::Slave {
            let timeout = self.announce_interval * ANNOUNCE_TIMEOUT_INTERVALS;
            let expired = self
                .last_parent_announce
                .map(|last| now.duration_since(last) > timeout)
                .unwrap_or(false);
            if expired {
                warn!("⚠️  PTP announce timeout, reselecting master");
                let parent = self.shared.parent_ds.read().parent_port_identity;
                self.foreign_masters.remove(&parent);
                self.clock.reset_servo();
                self.set_state(PtpPortState::Listening);
                self.last_parent_announce = None;
            }
        }

        // BMCA evaluation once per announce interval.
        if now.duration_since(self.last_bmca) >= self.announce_interval {
            self.last_bmca = now;
            self.foreign_masters.prune(now);
            self.run_bmca(now);
        }

        match self.state() {
            PtpPortState::Master => {
                if now.duration_since(self.last_announce_tx) >= self.announce_interval {
                    self.last_announce_tx = now;
                    self.send_announce(general_socket).await;
                }
                if now.duration_since(self.last_sync_tx) >= self.sync_interval {
                    self.last_sync_tx = now;
                    self.send_sync(event_socket, general_socket).await;
                }
            }
            PtpPortState::Slave => {
                if now.duration_since(self.last_delay_req_tx) >= self.delay_req_interval {
                    self.last_delay_req_tx = now;
                    self.send_delay_req(event_socket).await;
                }
            }
            _ => {}
        }
    }

    fn run_bmca(&mut self, now: Instant) {
        let default_ds = self.shared.default_ds.read().clone();
        let decision = recommend_state(&default_ds, &self.foreign_masters, now);

        match decision {
            BmcaDecision::Listen => {
                if self.state() == PtpPortState::Slave || self.state() == PtpPortState::Master {
                    self.set_state(PtpPortState::Listening);
                }
            }
            BmcaDecision::Master => {
                if self.state() != PtpPortState::Master {
                    // We are the grandmaster: parent is ourselves.
                    let parent = PtpParentDs::from_default_ds(&default_ds);
                    let changed = *self.shared.parent_ds.read() != parent;
                    if changed {
                        *self.shared.parent_ds.write() = parent.clone();
                        self.shared.current_ds.write().steps_removed = 0;
                        self.emit_parent_changed(parent);
                    }
                    self.set_state(PtpPortState::Master);
                }
            }
            BmcaDecision::Slave(announce) => {
                let mut parent = self.shared.parent_ds.read().clone();
                let new_parent =
                    parent.parent_port_identity != announce.header.source_port_identity
                        || parent.grandmaster_identity != announce.grandmaster_identity;

                if new_parent {
                    parent.update_from_announce(&announce);
                    info!(
                        "PTP parent selected: {} (grandmaster {})",
                        parent.parent_port_identity, parent.grandmaster_identity
                    );

                    *self.shared.parent_ds.write() = parent.clone();
                    {
                        let mut current = self.shared.current_ds.write();
                        current.steps_removed = announce.steps_removed + 1;
                    }
                    self.shared
                        .time_properties_ds
                        .write()
                        .update_from_announce(&announce);

                    self.last_parent_announce = Some(now);
                    self.clock.reset_servo();
                    self.emit_parent_changed(parent);
                }

                self.set_state(PtpPortState::Slave);
            }
        }
    }

    fn emit_parent_changed(&self, parent: PtpParentDs) {
        let event = ParentChangedEvent { parent };
        for callback in self.shared.parent_changed.lock().iter() {
            callback(&event);
        }
    }

    async fn send_announce(&mut self, general_socket: &UdpSocket) {
        let default_ds = self.shared.default_ds.read().clone();
        let time_properties = *self.shared.time_properties_ds.read();

        let mut header =
            PtpMessageHeader::new(PtpMessageType::Announce, self.domain, self.port_identity);
        header.sequence_id = self.announce_sequence;
        self.announce_sequence = self.announce_sequence.wrapping_add(1);
        header.log_message_interval = self.log_announce_interval;
        header.flags.ptp_timescale = time_properties.ptp_timescale;
        header.flags.current_utc_offset_valid = time_properties.current_utc_offset_valid;

        let announce = PtpAnnounceMessage {
            header,
            origin_timestamp: PtpTimestamp::default(),
            current_utc_offset: time_properties.current_utc_offset,
            grandmaster_priority1: default_ds.priority1,
            grandmaster_clock_quality: default_ds.clock_quality,
            grandmaster_priority2: default_ds.priority2,
            grandmaster_identity: default_ds.clock_identity,
            steps_removed: 0,
            time_source: time_properties.time_source,
        };

        let target = SocketAddr::new(IpAddr::V4(PTP_MULTICAST_ADDR), PTP_GENERAL_PORT);
        if let Err(e) = general_socket.send_to(&announce.serialize(), target).await {
            warn!("failed to send announce: {e}");
        }
    }

    /// Two-step master transmission: Sync followed by Follow_Up carrying
    /// the precise origin timestamp.
    async fn send_sync(&mut self, event_socket: &UdpSocket, general_socket: &UdpSocket) {
        let sequence = self.sync_sequence;
        self.sync_sequence = self.sync_sequence.wrapping_add(1);

        let mut header = PtpMessageHeader::new(PtpMessageType::Sync, self.domain, self.port_identity);
        header.sequence_id = sequence;
        header.flags.two_step = true;
        header.log_message_interval = self.log_sync_interval;

        let origin = self.clock.now();
        let sync = PtpTimestampMessage {
            header,
            timestamp: PtpTimestamp::default(),
        };

        let event_target = SocketAddr::new(IpAddr::V4(PTP_MULTICAST_ADDR), PTP_EVENT_PORT);
        if let Err(e) = event_socket.send_to(&sync.serialize(), event_target).await {
            warn!("failed to send sync: {e}");
            return;
        }

        let mut follow_header =
            PtpMessageHeader::new(PtpMessageType::FollowUp, self.domain, self.port_identity);
        follow_header.sequence_id = sequence;
        follow_header.log_message_interval = self.log_sync_interval;

        let follow_up = PtpTimestampMessage {
            header: follow_header,
            timestamp: origin,
        };

        let general_target = SocketAddr::new(IpAddr::V4(PTP_MULTICAST_ADDR), PTP_GENERAL_PORT);
        if let Err(e) = general_socket.send_to(&follow_up.serialize(), general_target).await {
            warn!("failed to send follow-up: {e}");
        }
    }

    async fn send_delay_req(&mut self, event_socket: &UdpSocket) {
        let sequence = self.delay_req_sequence;
        self.delay_req_sequence = self.delay_req_sequence.wrapping_add(1);

        let mut header =
            PtpMessageHeader::new(PtpMessageType::DelayReq, self.domain, self.port_identity);
        header.sequence_id = sequence;

        let req = PtpTimestampMessage {
            header,
            timestamp: PtpTimestamp::default(),
        };

        let t3 = self.clock.now();
        let target = SocketAddr::new(IpAddr::V4(PTP_MULTICAST_ADDR), PTP_EVENT_PORT);
        match event_socket.send_to(&req.serialize(), target).await {
            Ok(_) => self.pending_delay_req = Some((sequence, t3)),
            Err(e) => warn!("failed to send delay request: {e}"),
        }
    }
}

/// The two bound PTP sockets, ready for `run`.
pub struct PtpSockets {
    event: UdpSocket,
    general: UdpSocket,
}

/// Creates a PTP multicast socket the way the RTP sockets are built:
/// socket2 for the options, then converted into a tokio socket.
fn open_ptp_socket(port: u16, interface: Ipv4Addr) -> NodeResult<UdpSocket> {
    use socket2::{Domain, Protocol, Socket, Type};

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;

    #[cfg(unix)]
    socket.set_reuse_port(true)?;

    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
    socket
        .bind(&addr.into())
        .map_err(|e| NodeError::Config(format!("cannot bind PTP port {port}: {e}")))?;
    socket.join_multicast_v4(&PTP_MULTICAST_ADDR, &interface)?;
    socket.set_multicast_ttl_v4(16)?;
    socket.set_nonblocking(true)?;

    let socket = UdpSocket::from_std(socket.into())?;
    Ok(socket)
}

/// Derives a clock identity from the interface address plus random salt,
/// in EUI-64 layout.
fn generate_clock_identity(interface: Ipv4Addr) -> PtpClockIdentity {
    let octets = interface.octets();
    let mut rng = rand::thread_rng();
    PtpClockIdentity::from_mac([
        0x02, // locally administered
        octets[1] ^ rng.gen::<u8>(),
        octets[2],
        octets[3],
        rng.gen(),
        rng.gen(),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_from_log() {
        assert_eq!(interval_from_log(0), Duration::from_secs(1));
        assert_eq!(interval_from_log(1), Duration::from_secs(2));
        assert_eq!(interval_from_log(-3), Duration::from_millis(125));
    }

    #[test]
    fn test_instance_initial_state() {
        let instance = PtpInstance::new(PtpConfig::default());
        assert_eq!(instance.state(), PtpPortState::Initializing);
        assert_eq!(
            instance.grandmaster_identity(),
            instance.port_identity().clock_identity
        );
        assert_eq!(instance.current_ds().steps_removed, 0);
    }

    #[test]
    fn test_clock_identity_is_local() {
        let identity = generate_clock_identity(Ipv4Addr::new(192, 168, 1, 10));
        assert_eq!(identity.0[0], 0x02);
        assert_eq!(identity.0[3], 0xFF);
        assert_eq!(identity.0[4], 0xFE);
    }
}
