//! PTP identities and data sets
//!
//! The identity types shared by all PTP messages and the four data sets a
//! port owns per IEEE 1588-2019 clause 8: default, current, parent and time
//! properties.

use std::fmt;

use crate::ptp::messages::PtpAnnounceMessage;
use crate::ptp::time::PtpTimeInterval;

/// Eight-byte identity of a PTP instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PtpClockIdentity(pub [u8; 8]);

impl PtpClockIdentity {
    /// Builds an identity from a MAC address using the EUI-64 mapping.
    pub fn from_mac(mac: [u8; 6]) -> Self {
        Self([mac[0], mac[1], mac[2], 0xFF, 0xFE, mac[3], mac[4], mac[5]])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 8]
    }
}

impl fmt::Display for PtpClockIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Conventional RAVENNA formatting: XX-XX-XX-XX-XX-XX-XX-XX
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "-")?;
            }
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

/// Identity of one port of a PTP instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PtpPortIdentity {
    pub clock_identity: PtpClockIdentity,
    pub port_number: u16,
}

impl fmt::Display for PtpPortIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.clock_identity, self.port_number)
    }
}

/// Clock quality triple carried in Announce messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtpClockQuality {
    pub clock_class: u8,
    pub clock_accuracy: u8,
    pub offset_scaled_log_variance: u16,
}

impl Default for PtpClockQuality {
    fn default() -> Self {
        // IEEE 1588-2019 defaults for an ordinary, unsynchronized clock
        Self {
            clock_class: 248,
            clock_accuracy: 0xFE, // unknown
            offset_scaled_log_variance: 0xFFFF,
        }
    }
}

/// Source feeding the local time scale (IEEE 1588-2019 table 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum PtpTimeSource {
    AtomicClock = 0x10,
    Gnss = 0x20,
    TerrestrialRadio = 0x30,
    SerialTimeCode = 0x39,
    Ptp = 0x40,
    Ntp = 0x50,
    HandSet = 0x60,
    Other = 0x90,
    #[default]
    InternalOscillator = 0xA0,
}

impl PtpTimeSource {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x10 => PtpTimeSource::AtomicClock,
            0x20 => PtpTimeSource::Gnss,
            0x30 => PtpTimeSource::TerrestrialRadio,
            0x39 => PtpTimeSource::SerialTimeCode,
            0x40 => PtpTimeSource::Ptp,
            0x50 => PtpTimeSource::Ntp,
            0x60 => PtpTimeSource::HandSet,
            0xA0 => PtpTimeSource::InternalOscillator,
            _ => PtpTimeSource::Other,
        }
    }
}

/// Default data set: static description of this PTP instance.
#[derive(Debug, Clone)]
pub struct PtpDefaultDs {
    pub clock_identity: PtpClockIdentity,
    pub priority1: u8,
    pub priority2: u8,
    pub clock_quality: PtpClockQuality,
    pub domain: u8,
    pub slave_only: bool,
    pub two_step: bool,
}

impl PtpDefaultDs {
    pub fn new(clock_identity: PtpClockIdentity, domain: u8) -> Self {
        Self {
            clock_identity,
            priority1: 128,
            priority2: 128,
            clock_quality: PtpClockQuality::default(),
            domain,
            slave_only: true,
            two_step: true,
        }
    }
}

/// Current data set: measured relation to the master.
#[derive(Debug, Clone, Copy, Default)]
pub struct PtpCurrentDs {
    pub steps_removed: u16,
    pub offset_from_master: PtpTimeInterval,
    pub mean_path_delay: PtpTimeInterval,
}

/// Parent data set: the selected master and its grandmaster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtpParentDs {
    pub parent_port_identity: PtpPortIdentity,
    pub grandmaster_identity: PtpClockIdentity,
    pub grandmaster_clock_quality: PtpClockQuality,
    pub grandmaster_priority1: u8,
    pub grandmaster_priority2: u8,
}

impl PtpParentDs {
    /// Initial state: we are our own parent (IEEE 1588-2019: 8.2.3).
    pub fn from_default_ds(default_ds: &PtpDefaultDs) -> Self {
        Self {
            parent_port_identity: PtpPortIdentity {
                clock_identity: default_ds.clock_identity,
                port_number: 0,
            },
            grandmaster_identity: default_ds.clock_identity,
            grandmaster_clock_quality: default_ds.clock_quality,
            grandmaster_priority1: default_ds.priority1,
            grandmaster_priority2: default_ds.priority2,
        }
    }

    /// Adopts a new parent from a winning Announce (state decision S1).
    pub fn update_from_announce(&mut self, announce: &PtpAnnounceMessage) {
        self.parent_port_identity = announce.header.source_port_identity;
        self.grandmaster_identity = announce.grandmaster_identity;
        self.grandmaster_clock_quality = announce.grandmaster_clock_quality;
        self.grandmaster_priority1 = announce.grandmaster_priority1;
        self.grandmaster_priority2 = announce.grandmaster_priority2;
    }
}

/// Time properties data set: characteristics of the distributed time scale.
#[derive(Debug, Clone, Copy)]
pub struct PtpTimePropertiesDs {
    pub current_utc_offset: i16,
    pub current_utc_offset_valid: bool,
    pub leap59: bool,
    pub leap61: bool,
    pub time_traceable: bool,
    pub frequency_traceable: bool,
    pub ptp_timescale: bool,
    pub time_source: PtpTimeSource,
}

impl Default for PtpTimePropertiesDs {
    fn default() -> Self {
        Self {
            current_utc_offset: 37, // TAI-UTC as of 2017; updated from Announce
            current_utc_offset_valid: false,
            leap59: false,
            leap61: false,
            time_traceable: false,
            frequency_traceable: false,
            ptp_timescale: true,
            time_source: PtpTimeSource::InternalOscillator,
        }
    }
}

impl PtpTimePropertiesDs {
    pub fn update_from_announce(&mut self, announce: &PtpAnnounceMessage) {
        let flags = &announce.header.flags;
        self.current_utc_offset = announce.current_utc_offset;
        self.current_utc_offset_valid = flags.current_utc_offset_valid;
        self.leap59 = flags.leap59;
        self.leap61 = flags.leap61;
        self.time_traceable = flags.time_traceable;
        self.frequency_traceable = flags.frequency_traceable;
        self.ptp_timescale = flags.ptp_timescale;
        self.time_source = announce.time_source;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_identity_display() {
        let identity = PtpClockIdentity([0x00, 0x1D, 0xC1, 0xFF, 0xFE, 0x12, 0x34, 0x56]);
        assert_eq!(identity.to_string(), "00-1D-C1-FF-FE-12-34-56");
    }

    #[test]
    fn test_identity_from_mac() {
        let identity = PtpClockIdentity::from_mac([0x00, 0x1D, 0xC1, 0x12, 0x34, 0x56]);
        assert_eq!(identity.0, [0x00, 0x1D, 0xC1, 0xFF, 0xFE, 0x12, 0x34, 0x56]);
    }

    #[test]
    fn test_parent_ds_starts_as_self() {
        let default_ds = PtpDefaultDs::new(PtpClockIdentity([1; 8]), 0);
        let parent = PtpParentDs::from_default_ds(&default_ds);
        assert_eq!(parent.grandmaster_identity, default_ds.clock_identity);
        assert_eq!(parent.grandmaster_priority1, 128);
    }
}
