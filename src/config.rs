//! Konfigurationsmodul
//!
//! Lädt die Node-Konfiguration aus TOML-Datei oder JSON-Snapshot

use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::audio::{AudioFormat, ByteOrder, SampleFormat};

/// Haupt-Konfiguration des Nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Primäres Netzwerk-Interface (eine Adresse pro redundantem Pfad)
    #[serde(default = "default_interface")]
    pub primary_interface: Ipv4Addr,

    /// Sekundäres Interface für Redundanz (optional)
    #[serde(default)]
    pub secondary_interface: Option<Ipv4Addr>,

    /// PTP-Domain (0-127, AES67 Default 0)
    #[serde(default)]
    pub clock_domain: u8,

    /// Name der angebotenen Session
    #[serde(default = "default_session_name")]
    pub session_name: String,

    /// Multicast-Ziel; wird sonst aus der Interface-Adresse abgeleitet
    #[serde(default)]
    pub destination_address: Option<Ipv4Addr>,

    /// Audio-Format des Streams
    #[serde(default)]
    pub audio_format: AudioFormatConfig,

    /// Paketzeit in Sekunden (z.B. 0.001 oder 0.000125)
    #[serde(default = "default_ptime")]
    pub ptime: f64,

    /// Session aktiv
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// TCP-Port des RTSP-Servers (0 = beliebig)
    #[serde(default = "default_rtsp_port")]
    pub rtsp_port: u16,
}

/// Audio-Format, wie es in der Konfiguration steht
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioFormatConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    #[serde(default = "default_channels")]
    pub channels: u16,

    /// 16 oder 24 Bit (L16/L24)
    #[serde(default = "default_bits")]
    pub bits_per_sample: u8,

    /// "be" oder "le"
    #[serde(default = "default_byte_order")]
    pub byte_order: ByteOrder,
}

// Default-Werte
fn default_interface() -> Ipv4Addr {
    Ipv4Addr::UNSPECIFIED
}
fn default_session_name() -> String {
    "RAVENNA Node".to_string()
}
fn default_ptime() -> f64 {
    0.001
}
fn default_true() -> bool {
    true
}
fn default_rtsp_port() -> u16 {
    8554
}
fn default_sample_rate() -> u32 {
    48_000
}
fn default_channels() -> u16 {
    2
}
fn default_bits() -> u8 {
    24
}
fn default_byte_order() -> ByteOrder {
    ByteOrder::Be
}

impl Default for AudioFormatConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            bits_per_sample: 24,
            byte_order: ByteOrder::Be,
        }
    }
}

impl AudioFormatConfig {
    /// In das interne Format übersetzen
    pub fn to_audio_format(&self) -> Result<AudioFormat> {
        let format = SampleFormat::from_bits(self.bits_per_sample)
            .with_context(|| format!("ungültige Bit-Tiefe: {}", self.bits_per_sample))?;
        Ok(AudioFormat {
            sample_rate: self.sample_rate,
            channels: self.channels,
            format,
            byte_order: self.byte_order,
        })
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            primary_interface: Ipv4Addr::UNSPECIFIED,
            secondary_interface: None,
            clock_domain: 0,
            session_name: "RAVENNA Node".to_string(),
            destination_address: None,
            audio_format: AudioFormatConfig::default(),
            ptime: 0.001,
            enabled: true,
            rtsp_port: 8554,
        }
    }
}

impl NodeConfig {
    /// Konfiguration laden: erste gefundene Datei gewinnt
    pub fn load() -> Result<Self> {
        let config_paths = [
            "ravenna-node.toml",
            "/etc/ravenna-node/config.toml",
            "~/.config/ravenna-node/config.toml",
        ];

        for path in config_paths {
            let expanded_path = shellexpand::tilde(path);
            if Path::new(expanded_path.as_ref()).exists() {
                return Self::load_from_file(expanded_path.as_ref());
            }
        }

        // Keine Konfiguration gefunden, Standard verwenden
        tracing::warn!("Keine Konfigurationsdatei gefunden, verwende Standardwerte");
        Ok(Self::default())
    }

    /// Konfiguration aus TOML- oder JSON-Datei laden
    pub fn load_from_file(path: &str) -> Result<Self> {
        let content =
            fs::read_to_string(path).with_context(|| format!("Konnte {} nicht lesen", path))?;

        let config = if path.ends_with(".json") {
            serde_json::from_str(&content)
                .with_context(|| format!("Fehler beim Parsen von {}", path))?
        } else {
            toml::from_str(&content)
                .with_context(|| format!("Fehler beim Parsen von {}", path))?
        };

        tracing::info!("Konfiguration geladen von: {}", path);
        Ok(config)
    }

    /// Snapshot als JSON-Objekt
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Fehler beim Serialisieren der Konfiguration")
    }

    /// Snapshot aus JSON-Objekt
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Fehler beim Parsen des JSON-Snapshots")
    }

    /// Konfiguration in Datei speichern (JSON)
    pub fn save_to_file(&self, path: &str) -> Result<()> {
        fs::write(path, self.to_json()?)
            .with_context(|| format!("Konnte {} nicht schreiben", path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_roundtrip() {
        let config = NodeConfig {
            session_name: "Studio A".into(),
            ptime: 0.000_125,
            destination_address: Some(Ipv4Addr::new(239, 69, 1, 1)),
            ..NodeConfig::default()
        };

        let json = config.to_json().unwrap();
        let restored = NodeConfig::from_json(&json).unwrap();
        assert_eq!(restored.session_name, "Studio A");
        assert_eq!(restored.ptime, 0.000_125);
        assert_eq!(
            restored.destination_address,
            Some(Ipv4Addr::new(239, 69, 1, 1))
        );
    }

    #[test]
    fn test_defaults_from_empty_json() {
        let config = NodeConfig::from_json("{}").unwrap();
        assert_eq!(config.clock_domain, 0);
        assert_eq!(config.ptime, 0.001);
        assert!(config.enabled);
        assert_eq!(config.audio_format.bits_per_sample, 24);
    }

    #[test]
    fn test_audio_format_conversion() {
        let config = AudioFormatConfig {
            sample_rate: 48_000,
            channels: 8,
            bits_per_sample: 16,
            byte_order: ByteOrder::Be,
        };
        let format = config.to_audio_format().unwrap();
        assert_eq!(format.format, SampleFormat::I16);
        assert_eq!(format.bytes_per_frame(), 16);

        let bad = AudioFormatConfig {
            bits_per_sample: 20,
            ..AudioFormatConfig::default()
        };
        assert!(bad.to_audio_format().is_err());
    }
}
