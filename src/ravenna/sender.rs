//! RAVENNA send sessions
//!
//! A sender owns one outgoing stream: it serves the session's SDP over
//! RTSP under `/by-name/<session>` and `/by-id/<id>`, advertises the
//! session in DNS-SD, re-ANNOUNCEs when the PTP grandmaster changes and
//! paces RTP packets against the PTP clock.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::audio::AudioFormat;
use crate::dnssd::{AdvertisementId, DnssdAdvertiser, RAVENNA_SESSION_SUBTYPE};
use crate::error::{NodeError, NodeResult};
use crate::ptp::{PtpClockIdentity, PtpInstance};
use crate::rtp::{ProducerFn, RtpSenderConfig, RtpStreamSender};
use crate::rtsp::{RtspRequest, RtspResponse, RtspServer};
use crate::sdp::{
    SdpConnection, SdpDirection, SdpMediaClock, SdpMediaDescription, SdpOrigin, SdpRefClock,
    SdpRtpMap, SdpSessionDescription, SdpSourceFilter,
};

/// Fixed RTP destination port for RAVENNA streams.
const RTP_PORT: u16 = 5004;

/// Multicast TTL signaled in the SDP connection line.
const SDP_TTL: u8 = 15;

/// AES67 dynamic payload type.
const PAYLOAD_TYPE: u8 = 97;

static NEXT_SENDER_ID: AtomicU32 = AtomicU32::new(1);

/// Configuration of one send session.
#[derive(Debug, Clone)]
pub struct RavennaSenderConfig {
    pub session_name: String,
    /// Multicast override; derived from the interface address if absent.
    pub destination_address: Option<Ipv4Addr>,
    pub audio_format: AudioFormat,
    /// Packet time in seconds.
    pub ptime: f64,
    pub enabled: bool,
}

impl Default for RavennaSenderConfig {
    fn default() -> Self {
        Self {
            session_name: String::new(),
            destination_address: None,
            audio_format: AudioFormat::default(),
            ptime: 0.001,
            enabled: true,
        }
    }
}

struct SenderShared {
    id: u32,
    interface: Ipv4Addr,
    rtsp_port: u16,
    clock_domain: u8,
    config: RwLock<RavennaSenderConfig>,
    session_version: AtomicU64,
    grandmaster: Mutex<PtpClockIdentity>,
}

impl SenderShared {
    fn destination(&self) -> Ipv4Addr {
        self.config
            .read()
            .destination_address
            .unwrap_or_else(|| {
                // Derived multicast address: 239.x.y.<id>
                let octets = self.interface.octets();
                Ipv4Addr::new(239, octets[2], octets[3], (self.id % 0xFF) as u8)
            })
    }

    fn framecount(&self) -> u32 {
        let config = self.config.read();
        config.audio_format.frames_per_ptime(config.ptime)
    }

    fn build_sdp(&self) -> NodeResult<SdpSessionDescription> {
        let config = self.config.read();
        if config.session_name.is_empty() {
            return Err(NodeError::Config("session name not set".into()));
        }

        let encoding = config
            .audio_format
            .format
            .sdp_encoding_name()
            .ok_or_else(|| NodeError::Config("audio format not transportable".into()))?;

        let destination = IpAddr::V4(self.destination());
        let interface = IpAddr::V4(self.interface);
        let grandmaster = self.grandmaster.lock().to_string();
        let connection = SdpConnection {
            address: destination,
            ttl: Some(SDP_TTL),
        };
        let ref_clock = SdpRefClock::ptp_2008(grandmaster, self.clock_domain);

        let mut media = SdpMediaDescription::new(RTP_PORT, PAYLOAD_TYPE);
        media.connection = Some(connection);
        media.rtpmap = Some(SdpRtpMap {
            payload_type: PAYLOAD_TYPE,
            encoding: encoding.to_string(),
            clock_rate: config.audio_format.sample_rate,
            channels: config.audio_format.channels,
        });
        media.ptime = Some(config.ptime * 1000.0);
        media.framecount = Some(config.audio_format.frames_per_ptime(config.ptime));
        media.source_filter = Some(SdpSourceFilter {
            include: true,
            destination,
            sources: vec![interface],
        });
        media.sync_time = Some(0);
        media.clock_domain = Some(self.clock_domain);
        media.ref_clock = Some(ref_clock.clone());
        media.media_clock = Some(SdpMediaClock::default());
        media.direction = Some(SdpDirection::RecvOnly);

        let mut origin = SdpOrigin::new(self.id.to_string(), interface);
        origin.session_version = self.session_version.load(Ordering::Relaxed);

        let mut sdp = SdpSessionDescription::new(origin, config.session_name.clone());
        sdp.connection = Some(connection);
        sdp.clock_domain = Some(self.clock_domain);
        sdp.ref_clock = Some(ref_clock);
        sdp.media_clock = Some(SdpMediaClock::default());
        sdp.media.push(media);
        Ok(sdp)
    }

    fn path_by_name(&self) -> String {
        format!("/by-name/{}", self.config.read().session_name)
    }

    fn path_by_id(&self) -> String {
        format!("/by-id/{}", self.id)
    }
}

/// One advertised send session.
pub struct RavennaSender {
    shared: Arc<SenderShared>,
    rtsp_server: Arc<RtspServer>,
    advertiser: Arc<dyn DnssdAdvertiser>,
    advertisement: Mutex<Option<AdvertisementId>>,
    running: AtomicBool,
    stream_shutdown: Mutex<Option<watch::Sender<bool>>>,
}

impl RavennaSender {
    /// Registers RTSP handlers and the DNS-SD advertisement and hooks the
    /// sender to grandmaster changes.
    pub fn new(
        config: RavennaSenderConfig,
        interface: Ipv4Addr,
        rtsp_server: Arc<RtspServer>,
        advertiser: Arc<dyn DnssdAdvertiser>,
        ptp: &PtpInstance,
    ) -> NodeResult<Arc<Self>> {
        if config.session_name.is_empty() {
            return Err(NodeError::Config("session name not set".into()));
        }

        let id = NEXT_SENDER_ID.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(SenderShared {
            id,
            interface,
            rtsp_port: rtsp_server.port(),
            clock_domain: ptp.domain(),
            config: RwLock::new(config.clone()),
            session_version: AtomicU64::new(0),
            grandmaster: Mutex::new(ptp.grandmaster_identity()),
        });

        let sender = Arc::new(Self {
            shared: shared.clone(),
            rtsp_server: rtsp_server.clone(),
            advertiser: advertiser.clone(),
            advertisement: Mutex::new(None),
            running: AtomicBool::new(false),
            stream_shutdown: Mutex::new(None),
        });

        if config.enabled {
            sender.register()?;
        }

        // Re-announce whenever the grandmaster changes.
        let announce_shared = Arc::downgrade(&shared);
        let announce_server = Arc::downgrade(&rtsp_server);
        ptp.on_parent_changed(move |event| {
            let (Some(shared), Some(server)) = (announce_shared.upgrade(), announce_server.upgrade())
            else {
                return;
            };
            let mut grandmaster = shared.grandmaster.lock();
            if *grandmaster == event.parent.grandmaster_identity {
                return;
            }
            *grandmaster = event.parent.grandmaster_identity;
            drop(grandmaster);

            shared.session_version.fetch_add(1, Ordering::Relaxed);
            send_announce(&shared, &server);
        });

        info!("🎙️ RAVENNA sender '{}' (id {id}) created", config.session_name);
        Ok(sender)
    }

    fn register(&self) -> NodeResult<()> {
        let shared = &self.shared;

        let describe_shared = shared.clone();
        let handler = Arc::new(move |request: &RtspRequest| -> RtspResponse {
            match describe_shared.build_sdp() {
                Ok(sdp) => {
                    let mut response = RtspResponse::to_request(request, 200, "OK");
                    response.headers.set("Content-Type", "application/sdp");
                    response.body = sdp.to_sdp_string().into_bytes();
                    response
                }
                Err(e) => {
                    warn!("cannot build SDP: {e}");
                    RtspResponse::to_request(request, 500, "Internal Server Error")
                }
            }
        });

        self.rtsp_server
            .register_handler(shared.path_by_name(), handler.clone());
        self.rtsp_server
            .register_handler(shared.path_by_id(), handler);

        let mut txt = HashMap::new();
        txt.insert("clock-domain".to_string(), shared.clock_domain.to_string());
        let advertisement = self.advertiser.register_service(
            RAVENNA_SESSION_SUBTYPE,
            &shared.config.read().session_name,
            shared.rtsp_port,
            txt,
        )?;
        *self.advertisement.lock() = Some(advertisement);
        Ok(())
    }

    pub fn id(&self) -> u32 {
        self.shared.id
    }

    pub fn config(&self) -> RavennaSenderConfig {
        self.shared.config.read().clone()
    }

    /// The effective multicast destination.
    pub fn destination(&self) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(self.shared.destination()), RTP_PORT)
    }

    pub fn session_sdp(&self) -> NodeResult<SdpSessionDescription> {
        self.shared.build_sdp()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn framecount(&self) -> u32 {
        self.shared.framecount()
    }

    /// Starts transmitting: the producer callback is asked for
    /// `framecount` frames per packet, paced by the PTP clock.
    pub async fn start(&self, ptp: &PtpInstance, producer: ProducerFn) -> NodeResult<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Ok(()); // already transmitting
        }

        let config = self.shared.config.read().clone();
        if !config.enabled {
            self.running.store(false, Ordering::Release);
            return Err(NodeError::Config("sender is disabled".into()));
        }

        let sender_config = RtpSenderConfig {
            destination: self.destination(),
            payload_type: PAYLOAD_TYPE,
            format: config.audio_format,
            framecount: self.shared.framecount(),
        };

        let stream =
            RtpStreamSender::new(self.shared.interface, sender_config, ptp.clock(), producer)
                .await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *self.stream_shutdown.lock() = Some(shutdown_tx);
        tokio::spawn(stream.run(shutdown_rx));

        send_announce(&self.shared, &self.rtsp_server);
        Ok(())
    }

    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(shutdown) = self.stream_shutdown.lock().take() {
            let _ = shutdown.send(true);
        }
        info!(
            "RAVENNA sender '{}' stopped",
            self.shared.config.read().session_name
        );
    }
}

impl Drop for RavennaSender {
    fn drop(&mut self) {
        self.stop();
        self.rtsp_server.unregister_handler(&self.shared.path_by_name());
        self.rtsp_server.unregister_handler(&self.shared.path_by_id());
        if let Some(advertisement) = self.advertisement.lock().take() {
            let _ = self.advertiser.unregister_service(&advertisement);
        }
    }
}

/// Sends the current SDP as ANNOUNCE to every connection attached to the
/// sender's paths.
fn send_announce(shared: &Arc<SenderShared>, server: &Arc<RtspServer>) {
    let sdp = match shared.build_sdp() {
        Ok(sdp) => sdp.to_sdp_string(),
        Err(e) => {
            warn!("cannot build SDP for announce: {e}");
            return;
        }
    };

    for path in [shared.path_by_name(), shared.path_by_id()] {
        let uri = format!("rtsp://{}:{}{path}", shared.interface, shared.rtsp_port);
        let mut request = RtspRequest::new("ANNOUNCE", uri);
        request.headers.set("Content-Type", "application/sdp");
        request.body = sdp.clone().into_bytes();
        server.send_request(&path, &request);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dnssd::MockDnssd;
    use crate::ptp::PtpConfig;

    async fn test_server() -> Arc<RtspServer> {
        Arc::new(
            RtspServer::bind(SocketAddr::new([127, 0, 0, 1].into(), 0))
                .await
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_sender_builds_complete_sdp() {
        let server = test_server().await;
        let mock = Arc::new(MockDnssd::new());
        let ptp = PtpInstance::new(PtpConfig::default());

        let config = RavennaSenderConfig {
            session_name: "Studio A".into(),
            ..RavennaSenderConfig::default()
        };
        let sender = RavennaSender::new(
            config,
            Ipv4Addr::new(192, 168, 1, 10),
            server,
            mock.clone(),
            &ptp,
        )
        .unwrap();

        let sdp = sender.session_sdp().unwrap();
        assert_eq!(sdp.session_name, "Studio A");
        let media = &sdp.media[0];
        assert_eq!(media.port, RTP_PORT);
        assert_eq!(media.ptime, Some(1.0));
        assert_eq!(media.framecount, Some(48));
        assert_eq!(media.direction, Some(SdpDirection::RecvOnly));
        assert!(media.ref_clock.is_some());

        // Default destination derived from interface and id
        let destination = sender.destination();
        match destination.ip() {
            IpAddr::V4(addr) => {
                let octets = addr.octets();
                assert_eq!(octets[0], 239);
                assert_eq!(octets[1], 1);
                assert_eq!(octets[2], 10);
            }
            other => panic!("unexpected destination {other}"),
        }

        // Session advertised under the RAVENNA subtype
        let registered = mock.registered_services();
        assert_eq!(registered.len(), 1);
        assert_eq!(registered[0].0, RAVENNA_SESSION_SUBTYPE);
        assert_eq!(registered[0].1, "Studio A");
    }

    #[tokio::test]
    async fn test_sender_without_name_rejected() {
        let server = test_server().await;
        let mock = Arc::new(MockDnssd::new());
        let ptp = PtpInstance::new(PtpConfig::default());

        let result = RavennaSender::new(
            RavennaSenderConfig::default(),
            Ipv4Addr::LOCALHOST,
            server,
            mock,
            &ptp,
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_advertisement_removed_on_drop() {
        let server = test_server().await;
        let mock = Arc::new(MockDnssd::new());
        let ptp = PtpInstance::new(PtpConfig::default());

        let config = RavennaSenderConfig {
            session_name: "Studio B".into(),
            ..RavennaSenderConfig::default()
        };
        let sender =
            RavennaSender::new(config, Ipv4Addr::LOCALHOST, server, mock.clone(), &ptp).unwrap();
        assert_eq!(mock.registered_services().len(), 1);

        drop(sender);
        assert!(mock.registered_services().is_empty());
    }
}
