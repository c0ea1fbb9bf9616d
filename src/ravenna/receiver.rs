//! RAVENNA receive sessions
//!
//! Binds discovered sessions to RTSP connections and RTP receive state:
//! a subscription waits for the session to appear in DNS-SD, DESCRIBEs it
//! over RTSP, parses the SDP and installs an RTP session whose packets
//! land in a jitter buffer. The audio side reads frames from the handle,
//! clocked by the shared PTP time base.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::dnssd::ServiceDescription;
use crate::error::{NodeError, NodeResult};
use crate::ravenna::browser::{RavennaBrowser, RavennaBrowserEvent};
use crate::rtp::{JitterBuffer, RtpFilter, RtpReceiver, RtpSessionId, RtpSessionParams, SubscriptionId};
use crate::rtsp::RtspClient;
use crate::sdp::SdpSessionDescription;

/// Jitter buffer delay in packets when the subscriber does not override it.
const DEFAULT_DELAY_PACKETS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveState {
    /// Session not yet visible in DNS-SD.
    WaitingForService,
    /// DESCRIBE in flight.
    WaitingForDescription,
    /// RTP session installed, audio flowing into the jitter buffer.
    Active,
}

struct HandleState {
    state: ReceiveState,
    sdp: Option<SdpSessionDescription>,
    jitter: Option<Arc<Mutex<JitterBuffer>>>,
    rtp_session: Option<(RtpSessionId, SubscriptionId)>,
    rtsp_peer: Option<SocketAddr>,
}

/// Handle owned by the audio consumer of one subscribed session.
pub struct RavennaSessionHandle {
    session_name: String,
    /// Delay in packets for the jitter buffer.
    delay_packets: usize,
    state: Mutex<HandleState>,
}

impl RavennaSessionHandle {
    fn new(session_name: String, delay_packets: usize) -> Self {
        Self {
            session_name,
            delay_packets,
            state: Mutex::new(HandleState {
                state: ReceiveState::WaitingForService,
                sdp: None,
                jitter: None,
                rtp_session: None,
                rtsp_peer: None,
            }),
        }
    }

    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    pub fn state(&self) -> ReceiveState {
        self.state.lock().state
    }

    pub fn sdp(&self) -> Option<SdpSessionDescription> {
        self.state.lock().sdp.clone()
    }

    /// Reads buffered audio; returns 0 until the session is active and the
    /// jitter delay is filled. Safe to call from the audio thread.
    pub fn read(&self, out: &mut [u8]) -> usize {
        let jitter = self.state.lock().jitter.clone();
        match jitter {
            Some(jitter) => jitter.lock().read(out),
            None => 0,
        }
    }
}

enum Command {
    Subscribe(Arc<RavennaSessionHandle>),
    Unsubscribe(String),
    Browser(RavennaBrowserEvent),
    Announced(SocketAddr, String),
}

/// Installs and tears down receive sessions; the glue between discovery,
/// RTSP and the RTP data plane.
pub struct RavennaReceiver {
    commands: mpsc::UnboundedSender<Command>,
}

impl RavennaReceiver {
    /// Wires the receiver into browser and RTSP client and starts its
    /// reactive task.
    pub fn start(
        browser: Arc<RavennaBrowser>,
        rtsp: Arc<RtspClient>,
        rtp: Arc<RtpReceiver>,
        shutdown: watch::Receiver<bool>,
    ) -> Arc<Self> {
        let (commands, command_rx) = mpsc::unbounded_channel();

        // Browser events arrive on the backend thread; marshal them.
        let browser_commands = commands.clone();
        browser.subscribe(move |event| {
            let _ = browser_commands.send(Command::Browser(event.clone()));
        });

        // ANNOUNCE updates carry refreshed SDPs.
        let announce_commands = commands.clone();
        rtsp.on_server_request(move |peer, request| {
            if request.method == "ANNOUNCE" {
                if let Ok(sdp) = String::from_utf8(request.body.clone()) {
                    let _ = announce_commands.send(Command::Announced(peer, sdp));
                }
            }
        });

        let receiver = Arc::new(Self { commands });
        tokio::spawn(run_loop(browser, rtsp, rtp, command_rx, shutdown));
        receiver
    }

    /// Subscribes to a session by its advertised name. The handle becomes
    /// active once the session is discovered and described.
    pub fn subscribe(&self, session_name: &str) -> Arc<RavennaSessionHandle> {
        self.subscribe_with_delay(session_name, DEFAULT_DELAY_PACKETS)
    }

    pub fn subscribe_with_delay(
        &self,
        session_name: &str,
        delay_packets: usize,
    ) -> Arc<RavennaSessionHandle> {
        let handle = Arc::new(RavennaSessionHandle::new(
            session_name.to_string(),
            delay_packets.max(1),
        ));
        let _ = self.commands.send(Command::Subscribe(handle.clone()));
        handle
    }

    /// Drops the subscription; the RTP session dies with its last
    /// subscriber and the RTSP connection once nothing references it.
    pub fn unsubscribe(&self, handle: &RavennaSessionHandle) {
        let _ = self
            .commands
            .send(Command::Unsubscribe(handle.session_name.clone()));
    }
}

async fn run_loop(
    browser: Arc<RavennaBrowser>,
    rtsp: Arc<RtspClient>,
    rtp: Arc<RtpReceiver>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut sessions: Vec<Arc<RavennaSessionHandle>> = Vec::new();

    loop {
        let command = tokio::select! {
            command = commands.recv() => command,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        };
        let Some(command) = command else {
            break;
        };

        match command {
            Command::Subscribe(handle) => {
                info!("subscribing to RAVENNA session '{}'", handle.session_name);
                // The session may already be visible
                if let Some(service) = browser.find_by_name(&handle.session_name) {
                    describe_and_install(&rtsp, &rtp, &handle, &service).await;
                }
                sessions.push(handle);
            }
            Command::Unsubscribe(session_name) => {
                if let Some(index) = sessions
                    .iter()
                    .position(|handle| handle.session_name == session_name)
                {
                    let handle = sessions.swap_remove(index);
                    teardown(&rtsp, &rtp, &handle, &sessions);
                }
            }
            Command::Browser(RavennaBrowserEvent::SessionResolved(service)) => {
                for handle in &sessions {
                    if handle.session_name == service.name
                        && handle.state() == ReceiveState::WaitingForService
                    {
                        describe_and_install(&rtsp, &rtp, handle, &service).await;
                    }
                }
            }
            Command::Browser(RavennaBrowserEvent::SessionRemoved(service)) => {
                for handle in &sessions {
                    if handle.session_name == service.name {
                        info!("session '{}' disappeared", service.name);
                        teardown(&rtsp, &rtp, handle, &sessions);
                    }
                }
            }
            Command::Announced(peer, sdp_text) => {
                handle_announce(&rtp, &sessions, peer, &sdp_text).await;
            }
        }
    }
    debug!("RAVENNA receiver loop stopped");
}

/// Resolves the service address, DESCRIBEs the session and installs the
/// RTP receive state described by the returned SDP.
async fn describe_and_install(
    rtsp: &Arc<RtspClient>,
    rtp: &Arc<RtpReceiver>,
    handle: &Arc<RavennaSessionHandle>,
    service: &ServiceDescription,
) {
    let Some(address) = service.addresses.iter().find(|a| a.is_ipv4()) else {
        warn!("service '{}' resolved without IPv4 address", service.name);
        return;
    };
    let peer = SocketAddr::new(*address, service.port);
    let path = format!("/by-name/{}", handle.session_name);

    handle.state.lock().state = ReceiveState::WaitingForDescription;

    let response = match rtsp.describe(peer, &path).await {
        Ok(response) if response.is_success() => response,
        Ok(response) => {
            warn!(
                "DESCRIBE {} failed with status {}",
                handle.session_name, response.status
            );
            handle.state.lock().state = ReceiveState::WaitingForService;
            return;
        }
        Err(e) => {
            warn!("DESCRIBE {} failed: {e}", handle.session_name);
            handle.state.lock().state = ReceiveState::WaitingForService;
            return;
        }
    };

    let sdp_text = String::from_utf8_lossy(&response.body);
    match install_from_sdp(rtp, handle, &sdp_text) {
        Ok(()) => {
            let mut state = handle.state.lock();
            state.rtsp_peer = Some(peer);
            info!("🎶 session '{}' active", handle.session_name);
        }
        Err(e) => {
            warn!("installing session '{}' failed: {e}", handle.session_name);
            handle.state.lock().state = ReceiveState::WaitingForService;
        }
    }
}

/// Parses the SDP and installs RTP session, jitter buffer and packet
/// subscription on the handle.
fn install_from_sdp(
    rtp: &Arc<RtpReceiver>,
    handle: &Arc<RavennaSessionHandle>,
    sdp_text: &str,
) -> NodeResult<()> {
    let sdp = SdpSessionDescription::parse(sdp_text)?;
    let media = sdp
        .media
        .first()
        .ok_or_else(|| NodeError::SessionRejected("SDP carries no media".into()))?;
    let rtpmap = media
        .rtpmap
        .as_ref()
        .ok_or_else(|| NodeError::SessionRejected("SDP media has no rtpmap".into()))?;

    let connection = media
        .connection
        .or(sdp.connection)
        .ok_or_else(|| NodeError::SessionRejected("SDP has no connection address".into()))?;

    let params = RtpSessionParams {
        connection_address: connection.address,
        rtp_port: media.port,
        payload_type: rtpmap.payload_type,
        clock_rate: rtpmap.clock_rate,
        channels: rtpmap.channels,
        sample_format: rtpmap.sample_format()?,
    };

    let mut filter = RtpFilter::new();
    if let Some(source_filter) = &media.source_filter {
        for source in &source_filter.sources {
            if source_filter.include {
                filter.add_include(*source);
            } else {
                filter.add_exclude(*source);
            }
        }
    }

    let bytes_per_frame = params.sample_format.bytes_per_sample() * params.channels as usize;
    let framecount = media.framecount.unwrap_or_else(|| {
        let ptime_s = media.ptime_seconds().unwrap_or(0.001);
        (params.clock_rate as f64 * ptime_s).round() as u32
    });
    let delay_frames = handle.delay_packets * framecount as usize;
    let jitter = Arc::new(Mutex::new(JitterBuffer::new(delay_frames, bytes_per_frame)));

    let session_id = rtp.add_session(params, filter)?;

    let jitter_for_packets = jitter.clone();
    // Weak: the subscriber lives inside the receiver's own session table.
    let rtp_for_packets = Arc::downgrade(rtp);
    let subscription = rtp
        .subscribe(session_id, move |event| {
            let written = jitter_for_packets
                .lock()
                .write(event.timestamp, &event.payload);
            if !written {
                // Too old for the buffer window: it missed its deadline.
                if let Some(rtp) = rtp_for_packets.upgrade() {
                    rtp.mark_too_late(event.session, event.ssrc, event.sequence_number);
                }
            }
        })
        .ok_or(NodeError::OperationAborted)?;

    let mut state = handle.state.lock();
    state.sdp = Some(sdp);
    state.jitter = Some(jitter);
    state.rtp_session = Some((session_id, subscription));
    state.state = ReceiveState::Active;
    Ok(())
}

fn teardown(
    rtsp: &Arc<RtspClient>,
    rtp: &Arc<RtpReceiver>,
    handle: &Arc<RavennaSessionHandle>,
    remaining: &[Arc<RavennaSessionHandle>],
) {
    let (rtp_session, peer) = {
        let mut state = handle.state.lock();
        state.state = ReceiveState::WaitingForService;
        state.jitter = None;
        (state.rtp_session.take(), state.rtsp_peer.take())
    };

    if let Some((session, subscription)) = rtp_session {
        rtp.unsubscribe(session, subscription);
    }

    // Connections live as long as any session references the endpoint.
    if let Some(peer) = peer {
        let still_used = remaining.iter().any(|other| {
            !Arc::ptr_eq(other, handle) && other.state.lock().rtsp_peer == Some(peer)
        });
        if !still_used {
            rtsp.disconnect(peer);
        }
    }
}

/// An ANNOUNCE with a fresh SDP: reinstall the sessions served by that
/// peer so parameter changes (destination, format) take effect.
async fn handle_announce(
    rtp: &Arc<RtpReceiver>,
    sessions: &[Arc<RavennaSessionHandle>],
    peer: SocketAddr,
    sdp_text: &str,
) {
    let Ok(sdp) = SdpSessionDescription::parse(sdp_text) else {
        debug!("ignoring unparsable ANNOUNCE from {peer}");
        return;
    };

    for handle in sessions {
        let matches = {
            let state = handle.state.lock();
            state.rtsp_peer == Some(peer) && handle.session_name == sdp.session_name
        };
        if !matches {
            continue;
        }

        info!("session '{}' re-announced, reinstalling", handle.session_name);
        if let Some((session, subscription)) = handle.state.lock().rtp_session.take() {
            rtp.unsubscribe(session, subscription);
        }
        if let Err(e) = install_from_sdp(rtp, handle, sdp_text) {
            warn!("reinstalling '{}' failed: {e}", handle.session_name);
            handle.state.lock().state = ReceiveState::WaitingForService;
        } else {
            handle.state.lock().rtsp_peer = Some(peer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SampleFormat;
    use crate::ptp::PtpClock;
    use std::net::Ipv4Addr;

    fn test_sdp(port: u16) -> String {
        format!(
            "v=0\r\no=- 1 0 IN IP4 127.0.0.1\r\ns=Studio A\r\nc=IN IP4 239.1.2.3/15\r\nt=0 0\r\nm=audio {port} RTP/AVP 97\r\na=rtpmap:97 L24/48000/2\r\na=ptime:1\r\na=framecount:48\r\na=recvonly\r\n"
        )
    }

    #[tokio::test]
    async fn test_install_from_sdp() {
        let clock = Arc::new(PtpClock::new());
        let rtp = Arc::new(RtpReceiver::new(Ipv4Addr::UNSPECIFIED, clock));
        let handle = Arc::new(RavennaSessionHandle::new("Studio A".into(), 3));

        install_from_sdp(&rtp, &handle, &test_sdp(40120)).unwrap();
        assert_eq!(handle.state(), ReceiveState::Active);

        let sdp = handle.sdp().unwrap();
        assert_eq!(sdp.session_name, "Studio A");
        let media = &sdp.media[0];
        assert_eq!(media.port, 40120);
        assert_eq!(
            media.rtpmap.as_ref().unwrap().sample_format().unwrap(),
            SampleFormat::I24
        );

        // Nothing buffered yet
        let mut out = [0u8; 6];
        assert_eq!(handle.read(&mut out), 0);
    }

    #[tokio::test]
    async fn test_install_rejects_sdp_without_media() {
        let clock = Arc::new(PtpClock::new());
        let rtp = Arc::new(RtpReceiver::new(Ipv4Addr::UNSPECIFIED, clock));
        let handle = Arc::new(RavennaSessionHandle::new("x".into(), 3));

        let sdp = "v=0\r\no=- 1 0 IN IP4 127.0.0.1\r\ns=x\r\nt=0 0\r\n";
        assert!(install_from_sdp(&rtp, &handle, sdp).is_err());
        assert_eq!(handle.state(), ReceiveState::WaitingForService);
    }
}
