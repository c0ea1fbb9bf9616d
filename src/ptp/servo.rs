//! PTP clock servo
//!
//! The local virtual clock and the PI servo disciplining it. Every other
//! subsystem reads time through [`PtpClock::now`], which applies the current
//! shift and drift correction on top of the free-running local clock. The
//! servo consumes Sync/Follow_Up and Delay_Req/Resp measurements:
//!
//! - `offset_from_master = (t2 - t1) - mean_path_delay`
//! - `mean_path_delay = ((t2 - t1) + (t4 - t3)) / 2`
//!
//! The integral state is the frequency correction; the proportional term
//! contributes a step only when the offset exceeds the step threshold,
//! otherwise the clock slews. Offsets beyond one second hard-step the clock
//! and reset the servo.

use std::time::{Duration, Instant, SystemTime};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::ptp::time::{PtpTimeInterval, PtpTimestamp};
use crate::sync::Rcu;

/// Proportional gain.
const KP: f64 = 0.7;

/// Integral gain, per second of integration.
const KI: f64 = 0.3;

/// Offsets above this step the clock by the proportional term.
const STEP_THRESHOLD_NS: f64 = 1_000.0; // 1 us

/// Offsets above this hard-step the clock and reset the servo.
const HARD_STEP_THRESHOLD_NS: f64 = 1_000_000_000.0; // 1 s

/// Frequency correction clamp.
const MAX_DRIFT: f64 = 500e-6; // 500 ppm

/// Offset magnitude below which an exchange counts towards calibration.
const CALIBRATED_OFFSET_NS: f64 = 100_000.0; // 100 us

/// Consecutive good exchanges required before `is_calibrated`.
const CALIBRATED_STREAK: u32 = 3;

/// TAI-UTC offset applied when deriving the free-running TAI base.
const DEFAULT_UTC_OFFSET_SECS: u64 = 37;

/// Correction published by the servo, applied by every reader.
#[derive(Debug, Clone, Copy, Default)]
struct Discipline {
    /// Accumulated phase correction in nanoseconds.
    shift_ns: f64,
    /// Frequency correction as a ratio (positive = run faster).
    drift: f64,
    /// Monotonic nanoseconds (since clock construction) of the last update.
    reference_mono_ns: f64,
}

#[derive(Debug, Default)]
struct ServoState {
    /// Integral state: the frequency correction.
    integral: f64,
    offset_from_master: PtpTimeInterval,
    mean_path_delay: PtpTimeInterval,
    calibrated_streak: u32,
    last_update_mono_ns: Option<f64>,
    sync_count: u64,
}

/// The PTP-disciplined local clock.
///
/// Cheap to read from any thread; written only by the PTP port's reactive
/// context.
pub struct PtpClock {
    epoch_instant: Instant,
    /// TAI at `epoch_instant`.
    epoch_tai: Duration,
    discipline: Rcu<Discipline>,
    servo: Mutex<ServoState>,
}

impl PtpClock {
    pub fn new() -> Self {
        let epoch_instant = Instant::now();
        let unix = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            epoch_instant,
            epoch_tai: unix + Duration::from_secs(DEFAULT_UTC_OFFSET_SECS),
            discipline: Rcu::new(Discipline::default()),
            servo: Mutex::new(ServoState::default()),
        }
    }

    fn mono_ns(&self) -> f64 {
        self.epoch_instant.elapsed().as_nanos() as f64
    }

    /// Free-running local TAI in nanoseconds, before discipline.
    fn raw_ns(&self, mono_ns: f64) -> f64 {
        self.epoch_tai.as_nanos() as f64 + mono_ns
    }

    /// The disciplined time: `local + shift + drift * elapsed_since_update`.
    pub fn now(&self) -> PtpTimestamp {
        let mono = self.mono_ns();
        let discipline = self.discipline.load();
        let corrected = self.raw_ns(mono)
            + discipline.shift_ns
            + discipline.drift * (mono - discipline.reference_mono_ns);
        let corrected = corrected.max(0.0);

        let seconds = (corrected / 1e9) as u64;
        let nanoseconds = (corrected - seconds as f64 * 1e9) as u32;
        PtpTimestamp::new(seconds, nanoseconds.min(999_999_999), 0)
    }

    /// Current media clock position in samples.
    pub fn now_samples(&self, sample_rate: u32) -> u64 {
        self.now().to_samples(sample_rate)
    }

    pub fn offset_from_master(&self) -> PtpTimeInterval {
        self.servo.lock().offset_from_master
    }

    pub fn mean_path_delay(&self) -> PtpTimeInterval {
        self.servo.lock().mean_path_delay
    }

    /// True once enough consecutive exchanges stayed under the calibration
    /// threshold.
    pub fn is_calibrated(&self) -> bool {
        self.servo.lock().calibrated_streak >= CALIBRATED_STREAK
    }

    pub fn sync_count(&self) -> u64 {
        self.servo.lock().sync_count
    }

    /// Feeds a completed Sync measurement: `t1` is the master's origin
    /// timestamp (from Follow_Up when two-step, correction applied), `t2`
    /// the local receive time.
    pub fn process_sync(&self, t1: PtpTimestamp, t2: PtpTimestamp) {
        let mono = self.mono_ns();
        let mut servo = self.servo.lock();

        let offset = (t2 - t1) - servo.mean_path_delay;
        let offset_ns = offset.nanos() as f64;

        servo.offset_from_master = offset;
        servo.sync_count += 1;

        if offset_ns.abs() > HARD_STEP_THRESHOLD_NS {
            warn!(
                "PTP offset {:.3} ms beyond hard step threshold, stepping clock",
                offset_ns / 1e6
            );
            let discipline = self.discipline.load();
            self.discipline.store(Discipline {
                shift_ns: discipline.shift_ns
                    + discipline.drift * (mono - discipline.reference_mono_ns)
                    - offset_ns,
                drift: 0.0,
                reference_mono_ns: mono,
            });
            servo.integral = 0.0;
            servo.calibrated_streak = 0;
            servo.last_update_mono_ns = Some(mono);
            return;
        }

        // Integration time since the previous exchange, clamped so a lost
        // sync burst cannot wind the integrator up.
        let dt_s = servo
            .last_update_mono_ns
            .map(|last| ((mono - last) / 1e9).clamp(0.1, 10.0))
            .unwrap_or(1.0);
        servo.last_update_mono_ns = Some(mono);

        servo.integral = (servo.integral + KI * (offset_ns / 1e9) * dt_s)
            .clamp(-MAX_DRIFT, MAX_DRIFT);

        let discipline = self.discipline.load();
        // Fold the correction accumulated since the last update into the
        // shift before re-anchoring the drift at `mono`.
        let mut shift_ns =
            discipline.shift_ns + discipline.drift * (mono - discipline.reference_mono_ns);

        if offset_ns.abs() > STEP_THRESHOLD_NS {
            shift_ns -= KP * offset_ns;
        }

        self.discipline.store(Discipline {
            shift_ns,
            drift: -servo.integral,
            reference_mono_ns: mono,
        });

        if offset_ns.abs() < CALIBRATED_OFFSET_NS {
            if servo.calibrated_streak < CALIBRATED_STREAK {
                servo.calibrated_streak += 1;
                if servo.calibrated_streak == CALIBRATED_STREAK {
                    info!(
                        "✅ PTP servo calibrated (offset {:.1} us)",
                        offset_ns / 1e3
                    );
                }
            }
        } else {
            servo.calibrated_streak = 0;
        }

        debug!(
            "sync exchange: offset={:.1}ns path_delay={}ns drift={:.3}ppm",
            offset_ns,
            servo.mean_path_delay.nanos(),
            servo.integral * 1e6
        );
    }

    /// Feeds a completed delay measurement: `t3` is the local Delay_Req
    /// transmit time, `t4` the master's receive timestamp. Needs the most
    /// recent sync pair to compute the mean path delay.
    pub fn process_delay(
        &self,
        t1: PtpTimestamp,
        t2: PtpTimestamp,
        t3: PtpTimestamp,
        t4: PtpTimestamp,
    ) {
        let forward = t2 - t1;
        let backward = t4 - t3;
        let sum = forward + backward;
        let delay = PtpTimeInterval::new(sum.nanos() / 2, sum.fraction() / 2);

        if delay.is_negative() {
            debug!("negative path delay measurement discarded: {}", delay);
            return;
        }

        self.servo.lock().mean_path_delay = delay;
    }

    /// Resets the servo, keeping the clock free-running from its current
    /// corrected position. Used when the master is lost.
    pub fn reset_servo(&self) {
        let mono = self.mono_ns();
        let discipline = self.discipline.load();
        self.discipline.store(Discipline {
            shift_ns: discipline.shift_ns
                + discipline.drift * (mono - discipline.reference_mono_ns),
            drift: 0.0,
            reference_mono_ns: mono,
        });

        let mut servo = self.servo.lock();
        servo.integral = 0.0;
        servo.calibrated_streak = 0;
        servo.last_update_mono_ns = None;
    }
}

impl Default for PtpClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uncalibrated_at_start() {
        let clock = PtpClock::new();
        assert!(!clock.is_calibrated());
        assert_eq!(clock.offset_from_master(), PtpTimeInterval::default());
    }

    #[test]
    fn test_now_is_monotonic_without_discipline() {
        let clock = PtpClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }

    #[test]
    fn test_calibration_after_three_good_exchanges() {
        let clock = PtpClock::new();
        let base = clock.now();

        for _ in 0..3 {
            // Perfectly aligned exchange: zero offset
            clock.process_sync(base, base);
        }
        assert!(clock.is_calibrated());

        // A large offset breaks the streak
        let far = base + PtpTimeInterval::from_nanos(50_000_000);
        clock.process_sync(base, far);
        assert!(!clock.is_calibrated());
    }

    #[test]
    fn test_hard_step_applies_full_offset() {
        let clock = PtpClock::new();
        let t2 = clock.now();
        // Master is 5 seconds ahead: t1 = t2 + 5 s, offset = -5 s
        let t1 = t2 + PtpTimeInterval::from_nanos(5_000_000_000);
        clock.process_sync(t1, t2);

        let now = clock.now();
        let diff = now - t2;
        // Clock must have jumped forward by about 5 seconds
        assert!((diff.nanos() - 5_000_000_000).abs() < 100_000_000);
        assert!(!clock.is_calibrated());
    }

    #[test]
    fn test_mean_path_delay_from_exchange() {
        let clock = PtpClock::new();
        let t1 = PtpTimestamp::new(100, 0, 0);
        let t2 = PtpTimestamp::new(100, 600, 0); // forward: 600 ns
        let t3 = PtpTimestamp::new(100, 1_000, 0);
        let t4 = PtpTimestamp::new(100, 1_400, 0); // backward: 400 ns

        clock.process_delay(t1, t2, t3, t4);
        assert_eq!(clock.mean_path_delay().nanos(), 500);
    }

    #[test]
    fn test_offset_uses_path_delay() {
        let clock = PtpClock::new();
        let t1 = PtpTimestamp::new(100, 0, 0);
        let t2 = PtpTimestamp::new(100, 600, 0);
        clock.process_delay(t1, t2, PtpTimestamp::new(100, 1_000, 0), PtpTimestamp::new(100, 1_400, 0));

        clock.process_sync(t1, t2);
        // (t2 - t1) - mpd = 600 - 500 = 100 ns
        assert_eq!(clock.offset_from_master().nanos(), 100);
    }
}
