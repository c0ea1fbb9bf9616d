//! RTP packet statistics
//!
//! A sliding window of per-sequence-number slots plus total counters for
//! everything that has been evicted from the window. Each slot records how
//! often its sequence number was received, whether it arrived out of order
//! and whether a consumer flagged it as too late for playout.

use crate::util::WrappingU16;

/// Per-sequence-number slot.
#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    times_received: u16,
    times_out_of_order: u16,
    times_too_late: u16,
}

/// Aggregated counters, either over the live window or over everything
/// evicted from it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RtpStatsCounters {
    /// Sequence numbers received at least once.
    pub received: u64,
    /// Sequence numbers never received.
    pub dropped: u64,
    /// Extra receptions beyond the first.
    pub duplicates: u64,
    /// Packets that arrived out of sequence order.
    pub out_of_order: u64,
    /// Packets flagged by a consumer as past their playout deadline.
    pub too_late: u64,
}

impl RtpStatsCounters {
    fn absorb_slot(&mut self, slot: &Slot) {
        if slot.times_received == 0 {
            self.dropped += 1;
        } else {
            self.received += 1;
            self.duplicates += (slot.times_received - 1) as u64;
        }
        self.out_of_order += slot.times_out_of_order as u64;
        self.too_late += slot.times_too_late as u64;
    }
}

/// Default ring size; must stay below the 16-bit sequence space.
const DEFAULT_WINDOW: usize = 1024;

/// Sliding-window loss/duplicate/reorder statistics for one SSRC.
pub struct RtpPacketStats {
    slots: Vec<Slot>,
    /// Oldest sequence number still tracked in the window.
    window_start: WrappingU16,
    /// Newest sequence number seen.
    most_recent: WrappingU16,
    first_packet: bool,
    totals: RtpStatsCounters,
    /// Arrivals older than the whole window.
    too_old: u64,
}

impl Default for RtpPacketStats {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl RtpPacketStats {
    pub fn new(window_size: usize) -> Self {
        assert!(window_size > 0 && window_size < 65_536);
        Self {
            slots: vec![Slot::default(); window_size],
            window_start: WrappingU16::default(),
            most_recent: WrappingU16::default(),
            first_packet: true,
            totals: RtpStatsCounters::default(),
            too_old: 0,
        }
    }

    fn slot_mut(&mut self, sequence: WrappingU16) -> &mut Slot {
        let index = sequence.value() as usize % self.slots.len();
        &mut self.slots[index]
    }

    fn window_len(&self) -> usize {
        if self.first_packet {
            return 0;
        }
        // Mid-advance the start may transiently pass the old newest; the
        // effective live window is empty then.
        let len = self.most_recent.diff(self.window_start);
        if len < 0 {
            0
        } else {
            len as usize + 1
        }
    }

    /// Records the arrival of `sequence`.
    pub fn update(&mut self, sequence: u16) {
        let sequence = WrappingU16(sequence);

        if self.first_packet {
            self.first_packet = false;
            self.window_start = sequence;
            self.most_recent = sequence;
            self.slot_mut(sequence).times_received = 1;
            return;
        }

        let delta = sequence.diff(self.most_recent);

        if delta > 0 {
            // Advance the window one sequence number at a time, evicting
            // the oldest slot whenever the window is at capacity.
            for i in 1..=delta as u16 {
                let new_seq = self.most_recent + i;
                if self.window_len() + i as usize - 1 >= self.slots.len() {
                    let oldest = self.window_start;
                    let slot = *self.slot_mut(oldest);
                    self.totals.absorb_slot(&slot);
                    self.window_start = oldest + 1;
                }
                *self.slot_mut(new_seq) = Slot::default();
            }
            self.most_recent = sequence;

            let slot = self.slot_mut(sequence);
            slot.times_received += 1;
            if delta > 1 {
                // Arrived with a gap: this packet is ahead of its
                // predecessors.
                slot.times_out_of_order += 1;
            }
        } else if delta == 0 {
            let slot = self.slot_mut(sequence);
            slot.times_received = slot.times_received.saturating_add(1);
        } else if sequence.diff(self.window_start) >= 0 {
            // Late arrival still within the window
            let slot = self.slot_mut(sequence);
            slot.times_received = slot.times_received.saturating_add(1);
            slot.times_out_of_order += 1;
        } else {
            self.too_old += 1;
        }
    }

    /// Flags a packet as having missed its playout deadline. Called by
    /// consumers, not by the receive path.
    pub fn mark_too_late(&mut self, sequence: u16) {
        let sequence = WrappingU16(sequence);
        if !self.first_packet
            && sequence.diff(self.window_start) >= 0
            && self.most_recent.diff(sequence) >= 0
        {
            self.slot_mut(sequence).times_too_late += 1;
        } else {
            self.totals.too_late += 1;
        }
    }

    /// Counters over the current window.
    pub fn window(&self) -> RtpStatsCounters {
        let mut counters = RtpStatsCounters::default();
        if self.first_packet {
            return counters;
        }
        for i in 0..self.window_len() as u16 {
            let sequence = self.window_start + i;
            let index = sequence.value() as usize % self.slots.len();
            counters.absorb_slot(&self.slots[index]);
        }
        counters
    }

    /// Counters over everything evicted from the window.
    pub fn total(&self) -> RtpStatsCounters {
        self.totals
    }

    /// Window plus totals.
    pub fn combined(&self) -> RtpStatsCounters {
        let window = self.window();
        let total = self.totals;
        RtpStatsCounters {
            received: window.received + total.received,
            dropped: window.dropped + total.dropped,
            duplicates: window.duplicates + total.duplicates,
            out_of_order: window.out_of_order + total.out_of_order,
            too_late: window.too_late + total.too_late,
        }
    }

    /// Arrivals too old for the window to account for.
    pub fn too_old(&self) -> u64 {
        self.too_old
    }

    pub fn reset(&mut self) {
        self.slots.fill(Slot::default());
        self.first_packet = true;
        self.window_start = WrappingU16::default();
        self.most_recent = WrappingU16::default();
        self.totals = RtpStatsCounters::default();
        self.too_old = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_order_stream() {
        let mut stats = RtpPacketStats::default();
        for seq in 100..110 {
            stats.update(seq);
        }
        let window = stats.window();
        assert_eq!(window.received, 10);
        assert_eq!(window.dropped, 0);
        assert_eq!(window.duplicates, 0);
        assert_eq!(window.out_of_order, 0);
    }

    #[test]
    fn test_reorder_scenario() {
        // Sequence 102 and 103 overtaken by 104
        let mut stats = RtpPacketStats::default();
        for seq in [100u16, 101, 104, 102, 103] {
            stats.update(seq);
        }
        let window = stats.window();
        assert_eq!(window.out_of_order, 3);
        assert_eq!(window.duplicates, 0);
        assert_eq!(window.dropped, 0);
        assert_eq!(window.received, 5);
    }

    #[test]
    fn test_loss_counts_as_dropped() {
        let mut stats = RtpPacketStats::default();
        stats.update(10);
        stats.update(13); // 11 and 12 never arrive
        let window = stats.window();
        assert_eq!(window.received, 2);
        assert_eq!(window.dropped, 2);
    }

    #[test]
    fn test_duplicates() {
        let mut stats = RtpPacketStats::default();
        stats.update(5);
        stats.update(5);
        stats.update(6);
        stats.update(5);
        let window = stats.window();
        assert_eq!(window.received, 2);
        assert_eq!(window.duplicates, 2);
    }

    #[test]
    fn test_sequence_wrap_delta() {
        let mut stats = RtpPacketStats::default();
        stats.update(0xFFFE);
        stats.update(0x0001); // delta 3: one received, two missing
        let window = stats.window();
        assert_eq!(window.received, 2);
        assert_eq!(window.dropped, 2);
    }

    #[test]
    fn test_eviction_preserves_span_invariant() {
        // Push well past the window size with a gap pattern; the invariant
        // total.dropped + total.received == evicted span must hold, and
        // combined() must cover the full issued span.
        let mut stats = RtpPacketStats::new(64);
        let mut issued = 0u64;
        for seq in 0..1000u16 {
            if seq % 10 != 3 {
                stats.update(seq);
            }
            issued += 1;
        }

        let combined = stats.combined();
        assert_eq!(combined.received + combined.dropped, issued);
        assert_eq!(combined.dropped, 100); // every tenth packet missing
    }

    #[test]
    fn test_mark_too_late() {
        let mut stats = RtpPacketStats::default();
        stats.update(1);
        stats.update(2);
        stats.mark_too_late(1);
        assert_eq!(stats.window().too_late, 1);
    }

    #[test]
    fn test_too_old_arrival() {
        let mut stats = RtpPacketStats::new(16);
        for seq in 100..150 {
            stats.update(seq);
        }
        stats.update(50);
        assert_eq!(stats.too_old(), 1);
    }

    #[test]
    fn test_reset() {
        let mut stats = RtpPacketStats::default();
        stats.update(1);
        stats.update(5);
        stats.reset();
        assert_eq!(stats.window(), RtpStatsCounters::default());
        assert_eq!(stats.total(), RtpStatsCounters::default());
    }
}
