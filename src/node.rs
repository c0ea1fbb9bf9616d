//! Node façade
//!
//! Owns the single-threaded async context all reactive components run on:
//! a current-thread tokio runtime driven by one dedicated worker thread.
//! Public operations post work onto that runtime and wait on a completion
//! channel, giving outside callers a synchronous API while the reactive
//! components keep their single-threaded invariant.

use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::NodeConfig;
use crate::dnssd::{DnssdAdvertiser, DnssdBrowser, MdnsAdvertiser, MdnsBrowser, ServiceDescription};
use crate::error::{NodeError, NodeResult};
use crate::ptp::{PtpClock, PtpConfig, PtpInstance, PtpPortState, PtpTimeInterval};
use crate::ravenna::{
    RavennaBrowser, RavennaReceiver, RavennaSender, RavennaSenderConfig, RavennaSessionHandle,
};
use crate::rtp::{ProducerFn, RtpReceiver, RtpSessionId, RtpStatsCounters};
use crate::rtsp::{RtspClient, RtspServer};

struct NodeInner {
    config: NodeConfig,
    ptp: Arc<PtpInstance>,
    rtp_receiver: Arc<RtpReceiver>,
    rtsp_server: Arc<RtspServer>,
    rtsp_client: Arc<RtspClient>,
    browser: Arc<RavennaBrowser>,
    receiver: Arc<RavennaReceiver>,
    advertiser: Arc<dyn DnssdAdvertiser>,
    /// Kept alive for the lifetime of the node; the browser backend stops
    /// when dropped.
    _dnssd_browser: Arc<dyn DnssdBrowser>,
    senders: Mutex<Vec<Arc<RavennaSender>>>,
}

/// A running RAVENNA node.
pub struct Node {
    inner: Arc<NodeInner>,
    runtime: tokio::runtime::Handle,
    shutdown: watch::Sender<bool>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl Node {
    /// Starts a node with the mdns-sd discovery backend.
    pub fn start(config: NodeConfig) -> NodeResult<Self> {
        let browser =
            Arc::new(MdnsBrowser::new().map_err(|e| NodeError::Config(e.to_string()))?);
        let advertiser =
            Arc::new(MdnsAdvertiser::new().map_err(|e| NodeError::Config(e.to_string()))?);
        Self::start_with_backends(config, browser, advertiser)
    }

    /// Starts a node with explicit discovery backends (tests use the mock).
    pub fn start_with_backends(
        config: NodeConfig,
        dnssd_browser: Arc<dyn DnssdBrowser>,
        advertiser: Arc<dyn DnssdAdvertiser>,
    ) -> NodeResult<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (setup_tx, setup_rx) = std::sync::mpsc::channel();

        let worker_shutdown = shutdown_rx.clone();
        let worker = std::thread::Builder::new()
            .name("ravenna-node".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = setup_tx.send(Err(NodeError::Io(e)));
                        return;
                    }
                };

                runtime.block_on(async move {
                    let setup = setup_node(
                        config,
                        dnssd_browser,
                        advertiser,
                        worker_shutdown.clone(),
                    )
                    .await;

                    let inner = match setup {
                        Ok(inner) => {
                            let handle = tokio::runtime::Handle::current();
                            let _ = setup_tx.send(Ok((inner.clone(), handle)));
                            inner
                        }
                        Err(e) => {
                            let _ = setup_tx.send(Err(e));
                            return;
                        }
                    };

                    // Park until shutdown; all work happens in spawned tasks.
                    let mut shutdown = worker_shutdown;
                    while !*shutdown.borrow() {
                        if shutdown.changed().await.is_err() {
                            break;
                        }
                    }

                    inner.rtp_receiver.shutdown();
                    inner.rtsp_client.disconnect_all();
                    info!("node context stopped");
                });
            })
            .map_err(NodeError::Io)?;

        let (inner, runtime) = setup_rx
            .recv()
            .map_err(|_| NodeError::Config("node worker died during setup".into()))??;

        Ok(Self {
            inner,
            runtime,
            shutdown: shutdown_tx,
            worker: Some(worker),
        })
    }

    /// Posts a future onto the node context and waits for its result.
    fn dispatch<T, F>(&self, future: F) -> NodeResult<T>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let (tx, rx) = std::sync::mpsc::channel();
        self.runtime.spawn(async move {
            let _ = tx.send(future.await);
        });
        rx.recv().map_err(|_| NodeError::OperationAborted)
    }

    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    /// The PTP-disciplined clock; readable from any thread.
    pub fn clock(&self) -> Arc<PtpClock> {
        self.inner.ptp.clock()
    }

    pub fn ptp_state(&self) -> PtpPortState {
        self.inner.ptp.state()
    }

    pub fn ptp_offset_from_master(&self) -> PtpTimeInterval {
        self.inner.ptp.clock().offset_from_master()
    }

    pub fn ptp_is_calibrated(&self) -> bool {
        self.inner.ptp.clock().is_calibrated()
    }

    pub fn grandmaster_identity(&self) -> String {
        self.inner.ptp.grandmaster_identity().to_string()
    }

    /// RAVENNA sessions currently visible in DNS-SD.
    pub fn discovered_sessions(&self) -> Vec<ServiceDescription> {
        self.inner.browser.sessions()
    }

    /// Creates a send session from a sender configuration.
    pub fn create_sender(&self, config: RavennaSenderConfig) -> NodeResult<Arc<RavennaSender>> {
        let inner = self.inner.clone();
        let sender = self.dispatch(async move {
            RavennaSender::new(
                config,
                inner.config.primary_interface,
                inner.rtsp_server.clone(),
                inner.advertiser.clone(),
                &inner.ptp,
            )
        })??;
        self.inner.senders.lock().push(sender.clone());
        Ok(sender)
    }

    /// Starts a sender with the given audio producer.
    pub fn start_sender(
        &self,
        sender: &Arc<RavennaSender>,
        producer: ProducerFn,
    ) -> NodeResult<()> {
        let sender = sender.clone();
        let inner = self.inner.clone();
        self.dispatch(async move { sender.start(&inner.ptp, producer).await })?
    }

    /// Subscribes to a remote session by name; the returned handle turns
    /// active once the session is discovered and described.
    pub fn subscribe_session(&self, session_name: &str) -> Arc<RavennaSessionHandle> {
        self.inner.receiver.subscribe(session_name)
    }

    pub fn unsubscribe_session(&self, handle: &RavennaSessionHandle) {
        self.inner.receiver.unsubscribe(handle);
    }

    /// Receive statistics per SSRC: (ssrc, window, total).
    pub fn session_stats(
        &self,
        session: RtpSessionId,
    ) -> Vec<(u32, RtpStatsCounters, RtpStatsCounters)> {
        self.inner.rtp_receiver.session_stats(session)
    }

    /// Stops the node: cancels timers and tasks, closes sockets, joins the
    /// worker thread.
    pub fn stop(&mut self) {
        info!("🛑 stopping node");
        for sender in self.inner.senders.lock().drain(..) {
            sender.stop();
        }
        let _ = self.shutdown.send(true);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("node worker panicked");
            }
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.stop();
        }
    }
}

/// Builds all subsystems on the node context.
async fn setup_node(
    config: NodeConfig,
    dnssd_browser: Arc<dyn DnssdBrowser>,
    advertiser: Arc<dyn DnssdAdvertiser>,
    shutdown: watch::Receiver<bool>,
) -> NodeResult<Arc<NodeInner>> {
    info!(
        "🎛️ RAVENNA node starting: '{}' on {}",
        config.session_name, config.primary_interface
    );
    if config.secondary_interface.is_some() {
        // TODO: second PTP port and duplicate RTP path for ST 2022-7 style
        // redundancy once the session layer can merge streams.
        warn!("secondary interface configured but redundancy is not active yet");
    }

    let ptp = Arc::new(PtpInstance::new(PtpConfig {
        interface: config.primary_interface,
        domain: config.clock_domain,
        ..PtpConfig::default()
    }));
    let ptp_sockets = ptp.bind()?;
    let ptp_runner = ptp.clone();
    let ptp_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = ptp_runner.run(ptp_sockets, ptp_shutdown).await {
            error!("PTP port failed: {e}");
        }
    });

    let rtsp_server = Arc::new(
        RtspServer::bind(SocketAddr::new(
            std::net::IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            config.rtsp_port,
        ))
        .await?,
    );
    let server_runner = rtsp_server.clone();
    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = server_runner.run(server_shutdown).await {
            error!("RTSP server failed: {e}");
        }
    });

    let rtsp_client = Arc::new(RtspClient::new());
    let rtp_receiver = Arc::new(RtpReceiver::new(config.primary_interface, ptp.clock()));

    let browser = RavennaBrowser::start(dnssd_browser.as_ref())?;
    let receiver = RavennaReceiver::start(
        browser.clone(),
        rtsp_client.clone(),
        rtp_receiver.clone(),
        shutdown,
    );

    Ok(Arc::new(NodeInner {
        config,
        ptp,
        rtp_receiver,
        rtsp_server,
        rtsp_client,
        browser,
        receiver,
        advertiser,
        _dnssd_browser: dnssd_browser,
        senders: Mutex::new(Vec::new()),
    }))
}
