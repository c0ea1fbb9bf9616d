//! RAVENNA Node Server
//!
//! AES67-kompatibler Audio-over-IP Knoten
//!
//! Funktionen:
//! - PTP (IEEE 1588) Synchronisation auf den Grandmaster
//! - RTP Senden/Empfangen von L16/L24 Streams
//! - RTSP/SDP Session-Verwaltung
//! - mDNS/DNS-SD Discovery (RAVENNA-kompatibel)

use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ravenna_node::rtp::ring_producer;
use ravenna_node::sync::SpscRing;
use ravenna_node::{Node, NodeConfig, RavennaSenderConfig};

fn main() -> Result<()> {
    // Logging initialisieren (Level über RUST_LOG)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("🎛️ RAVENNA Node v{}", env!("CARGO_PKG_VERSION"));
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // Konfiguration laden
    let config = NodeConfig::load()?;
    info!(
        "Konfiguration: Session '{}', Interface {}, Domain {}",
        config.session_name, config.primary_interface, config.clock_domain
    );

    let sender_config = RavennaSenderConfig {
        session_name: config.session_name.clone(),
        destination_address: config.destination_address,
        audio_format: config.audio_format.to_audio_format()?,
        ptime: config.ptime,
        enabled: config.enabled,
    };

    // Node starten
    let mut node = Node::start(config)?;

    // Session anlegen; der Sende-Ring wird von einem Audio-Backend
    // befüllt (Audio-Geräte sind nicht Teil des Kerns). Ohne Daten
    // bleibt der Stream still.
    if sender_config.enabled {
        let audio_format = sender_config.audio_format;
        let sender = node.create_sender(sender_config)?;
        info!("Sende auf {}", sender.destination());

        let frames_per_second = audio_format.sample_rate as usize;
        let send_ring = Arc::new(SpscRing::new(
            audio_format.bytes_per_frame() * frames_per_second / 4, // 250 ms
        ));
        node.start_sender(&sender, ring_producer(send_ring))?;
    }

    // Bis Ctrl-C laufen lassen
    let (stop_tx, stop_rx) = std::sync::mpsc::channel();
    ctrlc_handler(move || {
        let _ = stop_tx.send(());
    });
    let _ = stop_rx.recv();

    info!("Beende...");
    node.stop();
    Ok(())
}

/// Minimaler Ctrl-C Handler über einen dedizierten Signal-Thread.
fn ctrlc_handler(callback: impl FnOnce() + Send + 'static) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("signal runtime");
    std::thread::spawn(move || {
        runtime.block_on(async {
            let _ = tokio::signal::ctrl_c().await;
        });
        callback();
    });
}
