//! Best Master Clock Algorithm
//!
//! Foreign master qualification (IEEE 1588-2019: 9.3.2.5) and the dataset
//! comparison that selects the parent clock (9.3.4). An announce sender
//! qualifies once two announces arrived within a four-announce-interval
//! window; qualified candidates are compared lexicographically on
//! (priority1, clockClass, clockAccuracy, offsetScaledLogVariance,
//! priority2, clockIdentity, stepsRemoved), lower winning throughout.

use std::time::{Duration, Instant};

use tracing::trace;

use crate::ptp::datasets::{PtpClockIdentity, PtpDefaultDs, PtpPortIdentity};
use crate::ptp::messages::PtpAnnounceMessage;

/// Number of announce intervals forming the qualification window.
const FOREIGN_MASTER_TIME_WINDOW: u32 = 4;

/// Number of announce messages required within the window.
const FOREIGN_MASTER_THRESHOLD: usize = 2;

/// The comparison key extracted from an announce (or our own default DS).
///
/// Field order matters: the derived lexicographic `Ord` is the BMCA dataset
/// comparison, lower values win.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct BmcaDataset {
    pub priority1: u8,
    pub clock_class: u8,
    pub clock_accuracy: u8,
    pub offset_scaled_log_variance: u16,
    pub priority2: u8,
    pub clock_identity: PtpClockIdentity,
    pub steps_removed: u16,
}

impl BmcaDataset {
    pub fn from_announce(announce: &PtpAnnounceMessage) -> Self {
        Self {
            priority1: announce.grandmaster_priority1,
            clock_class: announce.grandmaster_clock_quality.clock_class,
            clock_accuracy: announce.grandmaster_clock_quality.clock_accuracy,
            offset_scaled_log_variance: announce
                .grandmaster_clock_quality
                .offset_scaled_log_variance,
            priority2: announce.grandmaster_priority2,
            clock_identity: announce.grandmaster_identity,
            steps_removed: announce.steps_removed,
        }
    }

    pub fn from_default_ds(default_ds: &PtpDefaultDs) -> Self {
        Self {
            priority1: default_ds.priority1,
            clock_class: default_ds.clock_quality.clock_class,
            clock_accuracy: default_ds.clock_quality.clock_accuracy,
            offset_scaled_log_variance: default_ds.clock_quality.offset_scaled_log_variance,
            priority2: default_ds.priority2,
            clock_identity: default_ds.clock_identity,
            steps_removed: 0,
        }
    }
}

struct ForeignMasterEntry {
    port_identity: PtpPortIdentity,
    /// Arrival times of announces within the qualification window.
    arrivals: Vec<Instant>,
    most_recent: PtpAnnounceMessage,
}

/// The set of foreign masters seen on one port.
pub struct PtpForeignMasterList {
    own_identity: PtpClockIdentity,
    entries: Vec<ForeignMasterEntry>,
}

impl PtpForeignMasterList {
    pub fn new(own_identity: PtpClockIdentity) -> Self {
        Self {
            own_identity,
            entries: Vec::new(),
        }
    }

    /// Feeds an announce into the list.
    ///
    /// Returns false if the message is unqualified and was dropped: sent by
    /// ourselves, or not newer than the last one stored for its sender.
    pub fn consider(&mut self, announce: &PtpAnnounceMessage, now: Instant) -> bool {
        let sender = announce.header.source_port_identity;

        // a) Must not come from the same PTP instance
        if sender.clock_identity == self.own_identity {
            return false;
        }

        let window = qualification_window(announce.header.log_message_interval);

        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.port_identity == sender)
        {
            // b) Only the most recent message from a sender counts
            let last = entry.most_recent.header.sequence_id;
            if announce.header.sequence_id.wrapping_sub(last) as i16 <= 0 {
                trace!("dropping stale announce from {}", sender);
                return false;
            }
            entry.most_recent = *announce;
            entry.arrivals.push(now);
            entry.arrivals.retain(|t| now.duration_since(*t) <= window);
        } else {
            self.entries.push(ForeignMasterEntry {
                port_identity: sender,
                arrivals: vec![now],
                most_recent: *announce,
            });
        }

        true
    }

    /// Removes entries whose announces have all aged out of the window.
    pub fn prune(&mut self, now: Instant) {
        self.entries.retain_mut(|entry| {
            let window = qualification_window(entry.most_recent.header.log_message_interval);
            entry.arrivals.retain(|t| now.duration_since(*t) <= window);
            !entry.arrivals.is_empty()
        });
    }

    /// The most recent announce of every qualified foreign master.
    pub fn qualified(&self, now: Instant) -> Vec<&PtpAnnounceMessage> {
        self.entries
            .iter()
            .filter(|entry| {
                let window = qualification_window(entry.most_recent.header.log_message_interval);
                entry
                    .arrivals
                    .iter()
                    .filter(|t| now.duration_since(**t) <= window)
                    .count()
                    >= FOREIGN_MASTER_THRESHOLD
            })
            .map(|entry| &entry.most_recent)
            .collect()
    }

    /// Dataset comparison over all qualified candidates.
    pub fn best(&self, now: Instant) -> Option<&PtpAnnounceMessage> {
        self.qualified(now)
            .into_iter()
            .min_by_key(|announce| BmcaDataset::from_announce(announce))
    }

    /// Forgets a specific master, e.g. after an announce timeout.
    pub fn remove(&mut self, port_identity: &PtpPortIdentity) {
        self.entries.retain(|e| e.port_identity != *port_identity);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

fn qualification_window(log_announce_interval: i8) -> Duration {
    let interval = if log_announce_interval == 0x7F {
        // Interval not signaled; assume the AES67 default of one message
        // every two seconds.
        Duration::from_secs(2)
    } else {
        Duration::from_secs_f64(2f64.powi(log_announce_interval as i32))
    };
    interval * FOREIGN_MASTER_TIME_WINDOW
}

/// What the BMCA recommends for the port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BmcaDecision {
    /// No qualified master and we may not be one: keep listening.
    Listen,
    /// Our own dataset beats every qualified foreign master.
    Master,
    /// The contained announce describes the new parent.
    Slave(Box<PtpAnnounceMessage>),
}

/// Runs the state decision for one port.
pub fn recommend_state(
    default_ds: &PtpDefaultDs,
    foreign_masters: &PtpForeignMasterList,
    now: Instant,
) -> BmcaDecision {
    match foreign_masters.best(now) {
        None => {
            if default_ds.slave_only {
                BmcaDecision::Listen
            } else {
                BmcaDecision::Master
            }
        }
        Some(best) => {
            let own = BmcaDataset::from_default_ds(default_ds);
            let foreign = BmcaDataset::from_announce(best);
            if !default_ds.slave_only && own < foreign {
                BmcaDecision::Master
            } else {
                BmcaDecision::Slave(Box::new(*best))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ptp::datasets::{PtpClockQuality, PtpTimeSource};
    use crate::ptp::messages::{PtpMessageHeader, PtpMessageType};
    use crate::ptp::time::PtpTimestamp;

    fn announce_from(
        identity: [u8; 8],
        priority1: u8,
        sequence_id: u16,
    ) -> PtpAnnounceMessage {
        let mut header = PtpMessageHeader::new(
            PtpMessageType::Announce,
            0,
            PtpPortIdentity {
                clock_identity: PtpClockIdentity(identity),
                port_number: 1,
            },
        );
        header.sequence_id = sequence_id;
        header.log_message_interval = 1; // 2 s announce interval

        PtpAnnounceMessage {
            header,
            origin_timestamp: PtpTimestamp::default(),
            current_utc_offset: 37,
            grandmaster_priority1: priority1,
            grandmaster_clock_quality: PtpClockQuality {
                clock_class: 248,
                clock_accuracy: 0xFE,
                offset_scaled_log_variance: 0xFFFF,
            },
            grandmaster_priority2: 128,
            grandmaster_identity: PtpClockIdentity(identity),
            steps_removed: 0,
            time_source: PtpTimeSource::InternalOscillator,
        }
    }

    #[test]
    fn test_own_announces_are_dropped() {
        let mut list = PtpForeignMasterList::new(PtpClockIdentity([1; 8]));
        assert!(!list.consider(&announce_from([1; 8], 128, 0), Instant::now()));
    }

    #[test]
    fn test_stale_sequence_is_dropped() {
        let mut list = PtpForeignMasterList::new(PtpClockIdentity([1; 8]));
        let now = Instant::now();
        assert!(list.consider(&announce_from([2; 8], 128, 10), now));
        assert!(!list.consider(&announce_from([2; 8], 128, 10), now));
        assert!(!list.consider(&announce_from([2; 8], 128, 9), now));
        assert!(list.consider(&announce_from([2; 8], 128, 11), now));
    }

    #[test]
    fn test_qualification_needs_two_announces() {
        let mut list = PtpForeignMasterList::new(PtpClockIdentity([1; 8]));
        let now = Instant::now();

        list.consider(&announce_from([2; 8], 128, 0), now);
        assert!(list.qualified(now).is_empty());

        list.consider(&announce_from([2; 8], 128, 1), now + Duration::from_secs(2));
        let qualified = list.qualified(now + Duration::from_secs(2));
        assert_eq!(qualified.len(), 1);
    }

    #[test]
    fn test_best_master_by_priority() {
        let mut list = PtpForeignMasterList::new(PtpClockIdentity([1; 8]));
        let now = Instant::now();

        for seq in 0..2 {
            list.consider(&announce_from([2; 8], 100, seq), now);
            list.consider(&announce_from([3; 8], 50, seq), now);
        }

        let best = list.best(now).unwrap();
        assert_eq!(best.grandmaster_identity, PtpClockIdentity([3; 8]));
    }

    #[test]
    fn test_tie_resolves_by_smaller_identity() {
        let mut list = PtpForeignMasterList::new(PtpClockIdentity([1; 8]));
        let now = Instant::now();

        for seq in 0..2 {
            list.consider(&announce_from([9; 8], 128, seq), now);
            list.consider(&announce_from([2; 8], 128, seq), now);
        }

        let best = list.best(now).unwrap();
        assert_eq!(best.grandmaster_identity, PtpClockIdentity([2; 8]));
    }

    #[test]
    fn test_slave_only_listens_without_masters() {
        let default_ds = PtpDefaultDs::new(PtpClockIdentity([1; 8]), 0);
        let list = PtpForeignMasterList::new(default_ds.clock_identity);
        assert_eq!(
            recommend_state(&default_ds, &list, Instant::now()),
            BmcaDecision::Listen
        );
    }

    #[test]
    fn test_recommends_slave_when_master_qualified() {
        let default_ds = PtpDefaultDs::new(PtpClockIdentity([1; 8]), 0);
        let mut list = PtpForeignMasterList::new(default_ds.clock_identity);
        let now = Instant::now();

        for seq in 0..2 {
            list.consider(&announce_from([2; 8], 50, seq), now);
        }

        match recommend_state(&default_ds, &list, now) {
            BmcaDecision::Slave(announce) => {
                assert_eq!(announce.grandmaster_identity, PtpClockIdentity([2; 8]));
            }
            other => panic!("expected slave decision, got {other:?}"),
        }
    }

    #[test]
    fn test_entries_age_out() {
        let mut list = PtpForeignMasterList::new(PtpClockIdentity([1; 8]));
        let now = Instant::now();

        list.consider(&announce_from([2; 8], 128, 0), now);
        list.consider(&announce_from([2; 8], 128, 1), now);
        assert_eq!(list.qualified(now).len(), 1);

        // 4 x 2 s window has passed
        let later = now + Duration::from_secs(9);
        assert!(list.qualified(later).is_empty());
        list.prune(later);
        assert!(list.best(later).is_none());
    }
}
