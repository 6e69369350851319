//! Host functions the guest may import. Every binding reads the shared memory
//! it is handed, never writes it, and never fails: bad offsets, bad text and
//! sink errors end up in the log and the guest carries on.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, error, info, warn};

use crate::config::SEED_MASK;
use crate::display::Display;
use crate::memory::{MemoryMap, CALL_STACK, REGISTERS};
use crate::sound::Sound;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

/// Last machine state the guest pushed through `setRegisters`/`setStack`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugPush {
    pub program_counter: u16,
    pub stack_pointer: u16,
    pub index_register: u16,
    pub registers: Vec<u8>,
    pub stack: Vec<u8>,
}

pub struct Bindings {
    display: Box<dyn Display>,
    sound: Box<dyn Sound>,
    rng: StdRng,
    frame: Vec<u8>,
    debug_push: DebugPush,
}

impl Bindings {
    /// a fixed seed makes `random_seed` a reproducible stream
    pub fn new(display: Box<dyn Display>, sound: Box<dyn Sound>, seed: Option<u32>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed as u64),
            None => StdRng::from_entropy(),
        };
        Bindings {
            display,
            sound,
            rng,
            frame: Vec::new(),
            debug_push: DebugPush::default(),
        }
    }

    pub fn log_message(&self, memory: &[u8], severity: Severity, offset: u32, len: usize) {
        let Some(bytes) = memory.get_ro_slice(offset, len) else {
            warn!(offset, len, "guest log message out of bounds");
            return;
        };
        let text = String::from_utf8_lossy(bytes);
        match severity {
            Severity::Debug => debug!(target: "guest", "{text}"),
            Severity::Info => info!(target: "guest", "{text}"),
            Severity::Warn => warn!(target: "guest", "{text}"),
            Severity::Error => error!(target: "guest", "{text}"),
        }
    }

    /// 31 bits of host entropy
    pub fn random_seed(&mut self) -> u32 {
        self.rng.gen::<u32>() & SEED_MASK
    }

    /// Copy the frame out before handing it on; the guest is free to scribble
    /// over its buffer as soon as this returns. The copy is as big as the
    /// display asks for, truncated or zero padded.
    pub fn request_draw(&mut self, memory: &[u8], offset: u32, len: usize) {
        let Some(bytes) = memory.get_ro_slice(offset, len) else {
            warn!(offset, len, "guest draw request out of bounds");
            return;
        };
        let size = self.display.get_display_size_bytes();
        if len != size {
            warn!(len, size, "guest draw request is not a whole frame");
        }
        let n = len.min(size);
        self.frame.clear();
        self.frame.resize(size, 0);
        self.frame[..n].copy_from_slice(&bytes[..n]);
        if let Err(e) = self.display.draw(&self.frame) {
            warn!(error = %e, "display sink failed");
        }
    }

    pub fn play_audio_cue(&mut self) {
        if let Err(e) = self.sound.play_cue() {
            warn!(error = %e, "audio sink failed to play");
        }
    }

    pub fn silence(&mut self) {
        if let Err(e) = self.sound.stop() {
            warn!(error = %e, "audio sink failed to stop");
        }
    }

    pub fn set_stack(&mut self, memory: &[u8], offset: u32, len: usize) {
        match memory.get_ro_slice(offset, len.min(CALL_STACK.len)) {
            Some(bytes) => self.debug_push.stack = bytes.to_vec(),
            None => warn!(offset, len, "guest stack push out of bounds"),
        }
    }

    pub fn set_registers(&mut self, memory: &[u8], pc: u16, sp: u16, i: u16, offset: u32, len: usize) {
        self.debug_push.program_counter = pc;
        self.debug_push.stack_pointer = sp;
        self.debug_push.index_register = i;
        match memory.get_ro_slice(offset, len.min(REGISTERS.len)) {
            Some(bytes) => self.debug_push.registers = bytes.to_vec(),
            None => warn!(offset, len, "guest register push out of bounds"),
        }
    }

    pub fn debug_push(&self) -> &DebugPush {
        &self.debug_push
    }
}
