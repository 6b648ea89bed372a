//! Cooperative, run-to-completion job scheduler.
//!
//! Jobs are slots in a fixed-capacity arena owned by the [`Scheduler`] and addressed by
//! [`JobId`]. A job sits in at most one of two queues: the runnable FIFO, or the deadline queue
//! ordered by deadline. [`Scheduler::run_step`] executes at most one job per call and reports how
//! long the caller may idle afterwards.
//!
//! Callbacks receive the scheduler itself, their own id and a caller supplied context `T`, which
//! is how a job re-arms itself or schedules follow-up work:
//!
//! ```
//! use lorawan_mac_core::scheduler::{JobId, Scheduler};
//! use lorawan_mac_core::time::{Clock, Duration, Time};
//!
//! struct Fixed(Time);
//! impl Clock for Fixed {
//!     fn now(&self) -> Time {
//!         self.0
//!     }
//! }
//!
//! fn blink(s: &mut Scheduler<u32, 4>, id: JobId, count: &mut u32) {
//!     *count += 1;
//!     let at = s.deadline(id).unwrap_or_default() + Duration::from_sec(1);
//!     s.schedule_at(id, at, blink);
//! }
//!
//! let mut sched: Scheduler<u32, 4> = Scheduler::new();
//! let job = sched.new_job().unwrap();
//! sched.schedule_now(job, blink);
//!
//! let mut count = 0;
//! let idle = sched.run_step(&Fixed(Time::from_ticks(0)), &mut count);
//! assert_eq!(count, 1);
//! assert_eq!(idle, Duration::from_sec(1));
//! ```
use heapless::Vec;

use crate::time::{Clock, Duration, Time};

/// Job body. Runs to completion on the thread calling [`Scheduler::run_step`].
pub type Callback<T, const N: usize> = fn(&mut Scheduler<T, N>, JobId, &mut T);

/// Handle of a job slot, valid only with the [`Scheduler`] whose [`Scheduler::new_job`]
/// returned it.
///
/// The id is a plain slot index and carries no trace of its scheduler. Passing it to another
/// scheduler addresses that scheduler's slot of the same index, if it has one; ids beyond the
/// allocated slots are ignored with a warning.
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(u8);

impl JobId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Every job slot is already handed out.
    Full,
}

#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Runnable,
    Scheduled(Time),
}

struct Slot<T, const N: usize> {
    callback: Option<Callback<T, N>>,
    state: JobState,
}

pub struct Scheduler<T, const N: usize> {
    slots: Vec<Slot<T, N>, N>,
    runnable: Vec<JobId, N>,
    scheduled: Vec<JobId, N>,
    sleep_allowed: bool,
    irq_job: Option<(JobId, Callback<T, N>)>,
    irq_stamp: Option<Time>,
}

impl<T, const N: usize> Default for Scheduler<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Scheduler<T, N> {
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            runnable: Vec::new(),
            scheduled: Vec::new(),
            sleep_allowed: true,
            irq_job: None,
            irq_stamp: None,
        }
    }

    /// Allocates a job slot. Slots stay bound to this scheduler for its whole lifetime.
    pub fn new_job(&mut self) -> Result<JobId, Error> {
        let id = JobId(u8::try_from(self.slots.len()).map_err(|_| Error::Full)?);
        self.slots
            .push(Slot { callback: None, state: JobState::Idle })
            .map_err(|_| Error::Full)?;
        Ok(id)
    }

    /// Appends `job` to the runnable FIFO, removing it from wherever it was queued before.
    pub fn schedule_now(&mut self, job: JobId, callback: Callback<T, N>) {
        if !self.unlink(job) {
            return;
        }
        trace!("job {} runnable", job.0);
        if let Some(slot) = self.slots.get_mut(job.index()) {
            slot.callback = Some(callback);
            slot.state = JobState::Runnable;
        }
        // Each job occupies at most one queue entry, so this cannot overflow.
        let _ = self.runnable.push(job);
    }

    /// Queues `job` to run once `at` is reached. Jobs sharing a deadline run in the order they
    /// were scheduled.
    pub fn schedule_at(&mut self, job: JobId, at: Time, callback: Callback<T, N>) {
        if !self.unlink(job) {
            return;
        }
        trace!("job {} scheduled at {}", job.0, at.ticks());
        if let Some(slot) = self.slots.get_mut(job.index()) {
            slot.callback = Some(callback);
            slot.state = JobState::Scheduled(at);
        }
        let pos = self
            .scheduled
            .iter()
            .position(|other| self.deadline(*other).is_some_and(|d| d > at))
            .unwrap_or(self.scheduled.len());
        let _ = self.scheduled.insert(pos, job);
    }

    /// Removes `job` from both queues. Also re-permits sleep; callers that still need the
    /// device awake have to call [`Scheduler::forbid_sleep`] again.
    pub fn cancel(&mut self, job: JobId) {
        if self.unlink(job) {
            trace!("job {} cancelled", job.0);
        }
        self.sleep_allowed = true;
    }

    pub fn forbid_sleep(&mut self) {
        self.sleep_allowed = false;
    }

    pub fn allow_sleep(&mut self) {
        self.sleep_allowed = true;
    }

    pub fn is_sleep_allowed(&self) -> bool {
        self.sleep_allowed
    }

    /// Binds the job made runnable whenever the clock reports an interrupt timestamp.
    pub fn set_irq_job(&mut self, job: JobId, callback: Callback<T, N>) {
        self.irq_job = Some((job, callback));
    }

    /// Timestamp of the most recently observed interrupt.
    pub fn irq_timestamp(&self) -> Option<Time> {
        self.irq_stamp
    }

    pub fn state(&self, job: JobId) -> Option<JobState> {
        self.slots.get(job.index()).map(|slot| slot.state)
    }

    pub fn deadline(&self, job: JobId) -> Option<Time> {
        match self.state(job)? {
            JobState::Scheduled(at) => Some(at),
            _ => None,
        }
    }

    pub fn is_pending(&self, job: JobId) -> bool {
        !matches!(self.state(job), None | Some(JobState::Idle))
    }

    /// Earliest deadline in the deadline queue.
    pub fn next_deadline(&self) -> Option<Time> {
        self.scheduled.first().and_then(|job| self.deadline(*job))
    }

    pub fn runnable_len(&self) -> usize {
        self.runnable.len()
    }

    pub fn scheduled_len(&self) -> usize {
        self.scheduled.len()
    }

    /// Executes at most one job and returns how long the caller may idle.
    ///
    /// Runnable jobs always take precedence over due deadline jobs. The returned duration is zero
    /// when more work is ready, when sleep is forbidden, or when nothing is queued at all; in the
    /// latter case only an external wake source should end the idle period.
    pub fn run_step<C: Clock>(&mut self, clock: &C, ctx: &mut T) -> Duration {
        if let Some(stamp) = clock.take_irq() {
            self.irq_stamp = Some(stamp);
            if let Some((job, callback)) = self.irq_job {
                self.schedule_now(job, callback);
            }
        }

        let next = if !self.runnable.is_empty() {
            Some(self.runnable.remove(0))
        } else {
            match self.next_deadline() {
                Some(at) if clock.is_due(at) => Some(self.scheduled.remove(0)),
                _ => None,
            }
        };

        if let Some(job) = next {
            let callback = self.slots.get_mut(job.index()).and_then(|slot| {
                slot.state = JobState::Idle;
                slot.callback
            });
            if let Some(callback) = callback {
                trace!("running job {}", job.0);
                callback(self, job, ctx);
            }
        }

        self.idle_time(clock)
    }

    fn idle_time<C: Clock>(&self, clock: &C) -> Duration {
        if !self.runnable.is_empty() || !self.sleep_allowed {
            return Duration::ZERO;
        }
        match self.next_deadline() {
            Some(at) => {
                let d = at - clock.now();
                if d.is_negative() {
                    Duration::ZERO
                } else {
                    d
                }
            }
            None => Duration::ZERO,
        }
    }

    /// Takes `job` out of whichever queue holds it. Returns false for ids not owned by this
    /// scheduler.
    fn unlink(&mut self, job: JobId) -> bool {
        let Some(slot) = self.slots.get_mut(job.index()) else {
            warn!("unknown job {}", job.0);
            return false;
        };
        let queue = match slot.state {
            JobState::Idle => return true,
            JobState::Runnable => &mut self.runnable,
            JobState::Scheduled(_) => &mut self.scheduled,
        };
        slot.state = JobState::Idle;
        if let Some(pos) = queue.iter().position(|j| *j == job) {
            queue.remove(pos);
        }
        true
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_util::ManualClock;

    type Log = std::vec::Vec<u8>;
    type Sched = Scheduler<Log, 8>;

    fn record(_: &mut Sched, id: JobId, log: &mut Log) {
        log.push(id.0);
    }

    fn respawn(s: &mut Sched, id: JobId, log: &mut Log) {
        log.push(id.0);
        s.schedule_now(id, respawn);
    }

    fn chain(s: &mut Sched, id: JobId, log: &mut Log) {
        log.push(id.0);
        // the job after this one was allocated right behind it
        s.schedule_now(JobId(id.0 + 1), record);
    }

    fn jobs(s: &mut Sched, n: usize) -> std::vec::Vec<JobId> {
        (0..n).map(|_| s.new_job().unwrap()).collect()
    }

    fn drain(s: &mut Sched, clock: &ManualClock) -> Log {
        let mut log = Log::new();
        for _ in 0..32 {
            s.run_step(clock, &mut log);
        }
        log
    }

    #[test]
    fn deadline_queue_is_sorted() {
        let mut s = Sched::new();
        let ids = jobs(&mut s, 6);
        let deadlines = [50u32, 10, 40, 10, 0, 30];
        for (id, at) in ids.iter().zip(deadlines) {
            s.schedule_at(*id, Time::from_ticks(at), record);
        }
        let clock = ManualClock::new(Time::from_ticks(100));
        let log = drain(&mut s, &clock);
        let popped: std::vec::Vec<u32> = log.iter().map(|i| deadlines[*i as usize]).collect();
        assert!(popped.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(log.len(), 6);
    }

    #[test]
    fn equal_deadlines_run_first_inserted_first() {
        let mut s = Sched::new();
        let ids = jobs(&mut s, 4);
        let at = Time::from_ticks(20);
        s.schedule_at(ids[2], at, record);
        s.schedule_at(ids[0], at, record);
        s.schedule_at(ids[3], Time::from_ticks(10), record);
        s.schedule_at(ids[1], at, record);
        let clock = ManualClock::new(at);
        assert_eq!(drain(&mut s, &clock), [3, 2, 0, 1]);
    }

    #[test]
    fn runnable_jobs_precede_due_deadlines() {
        let mut s = Sched::new();
        let ids = jobs(&mut s, 3);
        s.schedule_at(ids[0], Time::from_ticks(0), record);
        s.schedule_now(ids[1], record);
        s.schedule_now(ids[2], record);
        let clock = ManualClock::new(Time::from_ticks(1000));
        assert_eq!(drain(&mut s, &clock), [1, 2, 0]);
    }

    #[test]
    fn self_rescheduling_job_starves_deadlines() {
        let mut s = Sched::new();
        let ids = jobs(&mut s, 2);
        s.schedule_at(ids[0], Time::from_ticks(0), record);
        s.schedule_now(ids[1], respawn);
        let clock = ManualClock::new(Time::from_ticks(5));
        let log = drain(&mut s, &clock);
        assert!(log.iter().all(|id| *id == 1));
        assert!(s.is_pending(ids[0]));
    }

    #[test]
    fn jobs_schedule_follow_up_work() {
        let mut s = Sched::new();
        let ids = jobs(&mut s, 2);
        s.schedule_now(ids[0], chain);
        let clock = ManualClock::new(Time::from_ticks(0));
        assert_eq!(drain(&mut s, &clock), [0, 1]);
    }

    #[test]
    fn rescheduling_moves_between_queues() {
        let mut s = Sched::new();
        let ids = jobs(&mut s, 1);
        s.schedule_at(ids[0], Time::from_ticks(500), record);
        s.schedule_now(ids[0], record);
        assert_eq!(s.scheduled_len(), 0);
        assert_eq!(s.runnable_len(), 1);
        s.schedule_at(ids[0], Time::from_ticks(500), record);
        s.schedule_at(ids[0], Time::from_ticks(600), record);
        assert_eq!(s.runnable_len(), 0);
        assert_eq!(s.scheduled_len(), 1);
        assert_eq!(s.deadline(ids[0]), Some(Time::from_ticks(600)));
    }

    #[test]
    fn cancel_is_idempotent_and_allows_sleep() {
        let mut s = Sched::new();
        let ids = jobs(&mut s, 2);
        s.schedule_at(ids[0], Time::from_ticks(10), record);
        s.schedule_now(ids[1], record);
        s.forbid_sleep();
        s.cancel(ids[0]);
        assert!(s.is_sleep_allowed());
        s.cancel(ids[0]);
        s.cancel(ids[0]);
        assert_eq!(s.state(ids[0]), Some(JobState::Idle));
        assert_eq!(s.scheduled_len(), 0);
        s.cancel(ids[1]);
        assert_eq!(s.runnable_len(), 0);

        let clock = ManualClock::new(Time::from_ticks(100));
        assert!(drain(&mut s, &clock).is_empty());
    }

    #[test]
    fn idle_time_reflects_queues_and_sleep_flag() {
        let mut s = Sched::new();
        let ids = jobs(&mut s, 2);
        let clock = ManualClock::new(Time::from_ticks(100));
        let mut log = Log::new();

        assert_eq!(s.run_step(&clock, &mut log), Duration::ZERO);

        s.schedule_at(ids[0], Time::from_ticks(400), record);
        assert_eq!(s.run_step(&clock, &mut log), Duration::from_ticks(300));

        s.forbid_sleep();
        assert_eq!(s.run_step(&clock, &mut log), Duration::ZERO);
        s.allow_sleep();

        s.schedule_now(ids[1], record);
        s.schedule_now(ids[1], record);
        assert_eq!(s.runnable_len(), 1);
        // ids[1] runs, the deadline is still ahead
        assert_eq!(s.run_step(&clock, &mut log), Duration::from_ticks(300));

        clock.advance(Duration::from_ticks(300));
        assert_eq!(s.run_step(&clock, &mut log), Duration::ZERO);
        assert_eq!(log, [1, 0]);
        assert!(!s.is_pending(ids[0]));
    }

    #[test]
    fn deadlines_across_counter_wrap() {
        let mut s = Sched::new();
        let ids = jobs(&mut s, 2);
        let start = Time::from_ticks(u32::MAX - 5);
        s.schedule_at(ids[0], start + Duration::from_ticks(10), record);
        s.schedule_at(ids[1], start + Duration::from_ticks(2), record);
        let clock = ManualClock::new(start);
        let mut log = Log::new();
        assert_eq!(s.run_step(&clock, &mut log), Duration::from_ticks(2));
        clock.advance(Duration::from_ticks(10));
        assert_eq!(drain(&mut s, &clock), [1, 0]);
    }

    #[test]
    fn interrupt_stamp_wakes_bound_job() {
        let mut s = Sched::new();
        let ids = jobs(&mut s, 2);
        s.set_irq_job(ids[1], record);
        s.schedule_at(ids[0], Time::from_ticks(50), record);
        let clock = ManualClock::new(Time::from_ticks(60));
        clock.irq.trigger(Time::from_ticks(55));

        let mut log = Log::new();
        s.run_step(&clock, &mut log);
        assert_eq!(log, [1]);
        assert_eq!(s.irq_timestamp(), Some(Time::from_ticks(55)));
        s.run_step(&clock, &mut log);
        assert_eq!(log, [1, 0]);
    }

    #[test]
    fn capacity_is_bounded() {
        let mut s: Scheduler<Log, 2> = Scheduler::new();
        assert!(s.new_job().is_ok());
        assert!(s.new_job().is_ok());
        assert_eq!(s.new_job(), Err(Error::Full));
    }

    #[test]
    fn ids_beyond_allocated_slots_are_ignored() {
        let mut other = Sched::new();
        let foreign = jobs(&mut other, 3)[2];

        let clock = ManualClock::new(Time::from_ticks(0));
        let mut s = Sched::new();
        let own = s.new_job().unwrap();
        s.schedule_now(foreign, record);
        s.schedule_at(foreign, Time::from_ticks(10), record);
        s.cancel(foreign);
        assert_eq!(s.state(foreign), None);
        assert!(!s.is_pending(foreign));
        assert_eq!((s.runnable_len(), s.scheduled_len()), (0, 0));

        s.schedule_now(own, record);
        assert_eq!(drain(&mut s, &clock), [0]);
    }
}
