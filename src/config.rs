/// Behavioural toggles handed to the guest once at start-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quirks {
    /// 8XY6/8XYE shift VX in place, ignoring VY
    pub shift: bool,
    /// FX55/FX65 leave I untouched
    pub register: bool,
    /// sprites wrap at the screen edge
    pub wrap: bool,
}

impl Default for Quirks {
    fn default() -> Self {
        Quirks {
            shift: true,
            register: true,
            wrap: true,
        }
    }
}

pub const DEFAULT_CLOCK_HZ: u32 = 500;
pub const TIMER_HZ: u32 = 60;

/// seeds handed to the guest fit in a positive i32
pub const SEED_MASK: u32 = 0x7fff_ffff;

/// Session configuration; frozen once the guest has been initialised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// fixed seed for reproducible runs; entropy otherwise
    pub seed: Option<u32>,
    /// instructions per second
    pub clock_hz: u32,
    pub quirks: Quirks,
    /// delay/sound timer rate, independent of `clock_hz`
    pub timer_hz: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            seed: None,
            clock_hz: DEFAULT_CLOCK_HZ,
            quirks: Quirks::default(),
            timer_hz: TIMER_HZ,
        }
    }
}

impl Config {
    pub fn with_seed(mut self, seed: u32) -> Self {
        self.seed = Some(seed & SEED_MASK);
        self
    }

    pub fn with_clock_hz(mut self, clock_hz: u32) -> Self {
        self.clock_hz = clock_hz;
        self
    }

    pub fn with_quirks(mut self, quirks: Quirks) -> Self {
        self.quirks = quirks;
        self
    }
}
