use core::cell::Cell;

use rand_core::RngCore;

use crate::time::{Clock, Duration, IrqTrigger, Time};

/// Clock driven by hand from tests.
pub struct ManualClock {
    now: Cell<Time>,
    pub irq: IrqTrigger,
}

impl ManualClock {
    pub fn new(start: Time) -> Self {
        Self { now: Cell::new(start), irq: IrqTrigger::new() }
    }

    pub fn set(&self, t: Time) {
        self.now.set(t);
    }

    pub fn advance(&self, d: Duration) {
        self.now.set(self.now.get() + d);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Time {
        self.now.get()
    }

    fn take_irq(&self) -> Option<Time> {
        self.irq.take()
    }
}

/// Replays a fixed sequence of words, starting over once exhausted.
pub struct ScriptedRng {
    words: Vec<u32>,
    pos: usize,
}

impl ScriptedRng {
    pub fn new(words: &[u32]) -> Self {
        assert!(!words.is_empty());
        Self { words: words.to_vec(), pos: 0 }
    }
}

impl RngCore for ScriptedRng {
    fn next_u32(&mut self) -> u32 {
        let w = self.words[self.pos % self.words.len()];
        self.pos += 1;
        w
    }

    fn next_u64(&mut self) -> u64 {
        rand_core::impls::next_u64_via_u32(self)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        rand_core::impls::fill_bytes_via_next(self, dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}
