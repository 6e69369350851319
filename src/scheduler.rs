//! Two clocks drive a session and they are kept apart on purpose: frames
//! (which call `step`) and the 60 Hz hardware timer (which calls `tick`).
//! Changing the instruction rate must never change how fast timers decay.
use std::time::{Duration, Instant};

/// a source falling further behind than this skips ahead instead of firing a
/// burst
pub const MAX_CATCH_UP: u32 = 4;

pub const FRAME_HZ: u32 = 60;

/// Fires every `period`.
#[derive(Debug, Clone)]
pub struct Periodic {
    period: Duration,
    next: Instant,
}

impl Periodic {
    pub fn new(period: Duration, start: Instant) -> Self {
        Periodic {
            period,
            next: start + period,
        }
    }

    pub fn from_hz(hz: u32, start: Instant) -> Self {
        Self::new(Duration::from_secs(1) / hz.max(1), start)
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn next_deadline(&self) -> Instant {
        self.next
    }

    /// how many times the source has fired by `now`
    pub fn poll(&mut self, now: Instant) -> u32 {
        let mut fired = 0;
        while self.next <= now {
            fired += 1;
            self.next += self.period;
            if fired == MAX_CATCH_UP {
                // drop the backlog
                if self.next <= now {
                    self.next = now + self.period;
                }
                break;
            }
        }
        fired
    }
}

/// What came due while waiting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Due {
    pub frames: u32,
    pub ticks: u32,
    /// ms since the scheduler started
    pub now: f64,
}

pub struct Scheduler {
    started: Instant,
    frame: Periodic,
    timer: Periodic,
}

impl Scheduler {
    pub fn new(frame_hz: u32, timer_hz: u32) -> Self {
        let started = Instant::now();
        Scheduler {
            started,
            frame: Periodic::from_hz(frame_hz, started),
            timer: Periodic::from_hz(timer_hz, started),
        }
    }

    /// high-resolution timestamp in ms, as handed to the guest
    pub fn timestamp(&self, at: Instant) -> f64 {
        at.saturating_duration_since(self.started).as_secs_f64() * 1000.0
    }

    pub fn now(&self) -> f64 {
        self.timestamp(Instant::now())
    }

    /// collect whatever is due at `now` without sleeping
    pub fn poll(&mut self, now: Instant) -> Due {
        Due {
            frames: self.frame.poll(now),
            ticks: self.timer.poll(now),
            now: self.timestamp(now),
        }
    }

    /// sleep until the nearer of the two sources fires
    pub fn wait(&mut self) -> Due {
        let deadline = self.frame.next_deadline().min(self.timer.next_deadline());
        let now = Instant::now();
        if deadline > now {
            spin_sleep::sleep(deadline - now);
        }
        self.poll(Instant::now())
    }
}
