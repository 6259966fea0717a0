//! Tick source for the reconciliation loop.

use std::time::{Duration, Instant};

use crate::io::interrupt::InterruptFlag;

/// What the loop should do after waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Tick,
    Interrupted,
}

pub trait Ticker {
    /// Block until the next tick is due or the operator interrupts.
    fn wait(&mut self) -> Tick;
}

/// Fixed-interval ticker; the first tick fires immediately.
#[derive(Debug)]
pub struct IntervalTicker {
    interval: Duration,
    interrupt: InterruptFlag,
    started: bool,
}

const SLICE: Duration = Duration::from_millis(200);

impl IntervalTicker {
    pub fn new(interval: Duration, interrupt: InterruptFlag) -> Self {
        Self {
            interval,
            interrupt,
            started: false,
        }
    }
}

impl Ticker for IntervalTicker {
    fn wait(&mut self) -> Tick {
        if self.interrupt.is_set() {
            return Tick::Interrupted;
        }
        if !self.started {
            self.started = true;
            return Tick::Tick;
        }
        let deadline = Instant::now() + self.interval;
        loop {
            if self.interrupt.is_set() {
                return Tick::Interrupted;
            }
            let now = Instant::now();
            if now >= deadline {
                return Tick::Tick;
            }
            std::thread::sleep(SLICE.min(deadline - now));
        }
    }
}
