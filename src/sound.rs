use beep::beep;
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Audio sink. `play_cue` is the guest's fire-and-forget trigger; `stop` is
/// called by the runtime once the sound timer has run out.
pub trait Sound {
    fn play_cue(&mut self) -> Result<(), Box<dyn Error>>;
    fn stop(&mut self) -> Result<(), Box<dyn Error>>;
}

const SIMPLEBEEP_PITCH: u16 = 2093; // C

/// PC speaker tone
pub struct SimpleBeep {
    is_beeping: bool,
}

impl SimpleBeep {
    pub fn new() -> Self {
        SimpleBeep { is_beeping: false }
    }
}

impl Default for SimpleBeep {
    fn default() -> Self {
        Self::new()
    }
}

impl Sound for SimpleBeep {
    fn play_cue(&mut self) -> Result<(), Box<dyn Error>> {
        if !self.is_beeping {
            beep(SIMPLEBEEP_PITCH)?;
            self.is_beeping = true;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), Box<dyn Error>> {
        if self.is_beeping {
            beep(0)?;
            self.is_beeping = false;
        }
        Ok(())
    }
}

pub struct Mute;

impl Sound for Mute {
    fn play_cue(&mut self) -> Result<(), Box<dyn Error>> {
        Ok(())
    }

    fn stop(&mut self) -> Result<(), Box<dyn Error>> {
        Ok(())
    }
}

/// counts cues and stops; clones share the counters
#[derive(Clone, Default)]
pub struct CueCounter {
    cues: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
}

impl CueCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cues(&self) -> usize {
        self.cues.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl Sound for CueCounter {
    fn play_cue(&mut self) -> Result<(), Box<dyn Error>> {
        self.cues.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), Box<dyn Error>> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
