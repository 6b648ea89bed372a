//! Tick based time keeping shared by the scheduler and the regional policies.
//!
//! [`Time`] is a free-running 32 bit tick counter that wraps roughly every 19 hours at
//! [`TICKS_PER_SEC`]. Two instants are ordered by the sign of their wrapping difference, which is
//! well defined as long as they are less than half the counter range apart.
use core::cmp::Ordering;
use core::ops::{Add, AddAssign, Neg, Sub};
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering as AtomicOrdering};

use rand_core::RngCore;

/// Tick rate of the platform clock (16 µs per tick).
pub const TICKS_PER_SEC: i32 = 62_500;
const US_PER_TICK: i64 = 1_000_000 / TICKS_PER_SEC as i64;

#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Time(u32);

#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Duration(i32);

impl Time {
    pub const fn from_ticks(ticks: u32) -> Self {
        Self(ticks)
    }

    pub const fn ticks(self) -> u32 {
        self.0
    }

    /// Signed distance from `earlier` to `self`, negative when `self` lies before `earlier`.
    pub const fn since(self, earlier: Time) -> Duration {
        Duration(self.0.wrapping_sub(earlier.0) as i32)
    }

    /// True once `now` has caught up with this instant.
    pub const fn is_reached(self, now: Time) -> bool {
        now.since(self).0 >= 0
    }
}

impl PartialOrd for Time {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Time {
    fn cmp(&self, other: &Self) -> Ordering {
        self.since(*other).0.cmp(&0)
    }
}

impl Add<Duration> for Time {
    type Output = Time;

    fn add(self, rhs: Duration) -> Time {
        Time(self.0.wrapping_add_signed(rhs.0))
    }
}

impl AddAssign<Duration> for Time {
    fn add_assign(&mut self, rhs: Duration) {
        *self = *self + rhs;
    }
}

impl Sub<Duration> for Time {
    type Output = Time;

    fn sub(self, rhs: Duration) -> Time {
        Time(self.0.wrapping_add_signed(rhs.0.wrapping_neg()))
    }
}

impl Sub<Time> for Time {
    type Output = Duration;

    fn sub(self, rhs: Time) -> Duration {
        self.since(rhs)
    }
}

impl Duration {
    pub const ZERO: Duration = Duration(0);

    pub const fn from_ticks(ticks: i32) -> Self {
        Self(ticks)
    }

    pub const fn ticks(self) -> i32 {
        self.0
    }

    pub const fn from_sec(sec: i32) -> Self {
        Self(sec.saturating_mul(TICKS_PER_SEC))
    }

    pub const fn from_ms(ms: i32) -> Self {
        Self((ms as i64 * TICKS_PER_SEC as i64 / 1000) as i32)
    }

    /// Converts microseconds to ticks, rounding to the nearest tick.
    pub const fn from_us_round(us: i32) -> Self {
        Self(((us as i64 + US_PER_TICK / 2) / US_PER_TICK) as i32)
    }

    pub const fn as_ms(self) -> i32 {
        (self.0 as i64 * 1000 / TICKS_PER_SEC as i64) as i32
    }

    pub const fn as_us(self) -> i64 {
        self.0 as i64 * US_PER_TICK
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Multiplies the duration, saturating at the representable range.
    pub const fn saturating_mul(self, factor: i32) -> Self {
        Self(self.0.saturating_mul(factor))
    }

    /// Random back-off used before the first join attempt.
    ///
    /// The base delay is drawn from 16 random bits and folded below one second. When `sec_span`
    /// is non-zero, a random whole number of seconds below `sec_span` is added on top.
    pub fn rnd_delay<RNG: RngCore>(rng: &mut RNG, sec_span: u8) -> Self {
        let r = rng.next_u32() as u16;
        let mut delay = r as i32;
        if delay > TICKS_PER_SEC {
            delay = r as i32 % TICKS_PER_SEC;
        }
        if sec_span > 0 {
            delay += ((r as u8) % sec_span) as i32 * TICKS_PER_SEC;
        }
        Self(delay)
    }
}

impl Add for Duration {
    type Output = Duration;

    fn add(self, rhs: Duration) -> Duration {
        Duration(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Duration {
    type Output = Duration;

    fn sub(self, rhs: Duration) -> Duration {
        Duration(self.0.saturating_sub(rhs.0))
    }
}

impl Neg for Duration {
    type Output = Duration;

    fn neg(self) -> Duration {
        Duration(self.0.saturating_neg())
    }
}

/// Monotonic tick source supplied by the platform.
pub trait Clock {
    fn now(&self) -> Time;

    fn is_due(&self, deadline: Time) -> bool {
        deadline.is_reached(self.now())
    }

    /// Timestamp deposited by an interrupt since the last call, if any.
    ///
    /// Platforms without interrupt driven radios keep the default.
    fn take_irq(&self) -> Option<Time> {
        None
    }
}

/// Single-slot handoff of an interrupt timestamp into the cooperative loop.
///
/// The interrupt handler calls [`IrqTrigger::trigger`]; the loop drains it through
/// [`IrqTrigger::take`], typically from [`Clock::take_irq`]. A second trigger before the loop
/// observes the first one overwrites the stamp.
#[derive(Debug, Default)]
pub struct IrqTrigger {
    stamp: AtomicU32,
    pending: AtomicBool,
}

impl IrqTrigger {
    pub const fn new() -> Self {
        Self { stamp: AtomicU32::new(0), pending: AtomicBool::new(false) }
    }

    pub fn trigger(&self, at: Time) {
        self.stamp.store(at.ticks(), AtomicOrdering::Relaxed);
        self.pending.store(true, AtomicOrdering::Release);
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(AtomicOrdering::Acquire)
    }

    pub fn take(&self) -> Option<Time> {
        if self.pending.swap(false, AtomicOrdering::Acquire) {
            Some(Time::from_ticks(self.stamp.load(AtomicOrdering::Relaxed)))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_util::ScriptedRng;

    #[test]
    fn ordering_survives_wraparound() {
        let before = Time::from_ticks(u32::MAX - 10);
        let after = before + Duration::from_ticks(20);
        assert_eq!(after.ticks(), 9);
        assert!(after > before);
        assert_eq!(after - before, Duration::from_ticks(20));
        assert_eq!(core::cmp::max(before, after), after);
        assert!(before.is_reached(after));
        assert!(!after.is_reached(before));
    }

    #[test]
    fn conversions() {
        assert_eq!(Duration::from_sec(1).ticks(), TICKS_PER_SEC);
        assert_eq!(Duration::from_ms(1000), Duration::from_sec(1));
        assert_eq!(Duration::from_ms(3).ticks(), 187);
        assert_eq!(Duration::from_us_round(24).ticks(), 2);
        assert_eq!(Duration::from_us_round(23).ticks(), 1);
        assert_eq!(Duration::from_sec(3).as_ms(), 3000);
        assert_eq!(Duration::from_ticks(2).as_us(), 32);
    }

    #[test]
    fn rnd_delay_stays_within_span() {
        // 0x1234_FFFF: low 16 bits above one second, low byte 0xFF
        let mut rng = ScriptedRng::new(&[0x1234_FFFF, 0x0000_1000, 0]);
        let d = Duration::rnd_delay(&mut rng, 8);
        assert_eq!(d.ticks(), 0xFFFF % TICKS_PER_SEC + 7 * TICKS_PER_SEC);
        let d = Duration::rnd_delay(&mut rng, 8);
        assert_eq!(d.ticks(), 0x1000);
        let d = Duration::rnd_delay(&mut rng, 0);
        assert_eq!(d, Duration::ZERO);
    }

    #[test]
    fn irq_trigger_is_single_shot() {
        let trigger = IrqTrigger::new();
        assert_eq!(trigger.take(), None);
        trigger.trigger(Time::from_ticks(5));
        trigger.trigger(Time::from_ticks(7));
        assert!(trigger.is_pending());
        assert_eq!(trigger.take(), Some(Time::from_ticks(7)));
        assert_eq!(trigger.take(), None);
    }
}
