//! # runtime
//!
//! Supervises one guest for one session:
//!
//!  * `new` builds the binding table, instantiates and initialises the guest,
//!    and checks where it says its machine image lives
//!  * `step` is called once per rendered frame with the current time; the
//!    guest turns elapsed time into instructions at its configured clock
//!  * `tick` is called at a fixed 60 Hz whatever the clock, for the
//!    delay/sound timers
//!  * `on_input` feeds key edges in, `read_state` reads the machine image out
//!
//! Session states: Ready -> Running <-> Paused ... ; dropping the
//! runtime is the only way out. A guest trap puts it in Failed for good.
//!
//! Real-time running and single-stepping are separate modes. `step` is
//! dropped while single-stepping and `debug_step` is dropped while running,
//! so the two never both advance the same session.
use tracing::{debug, error, info, trace, warn};

use crate::bindings::{Bindings, DebugPush};
use crate::config::{Config, SEED_MASK};
use crate::display::Display;
use crate::error::{HostError, HostResult};
use crate::guest::{Guest, GuestLoader, InitParams};
use crate::input;
use crate::memory::{
    Layout, MemoryMap, CALL_STACK, CALL_STACK_WORDS, DISPLAY, DISPLAY_SIZE_BYTES, INDEX_REGISTER,
    PROGRAM_CAPACITY_BYTES, PROGRAM_COUNTER, PROGRAM_LOAD_OFFSET, REGISTERS, REGISTER_COUNT,
    STACK_POINTER,
};
use crate::sound::Sound;

/// Ready until the guest has executed something. `pause` and `resume` switch
/// the mode but leave a Ready session Ready; the first `step` or `tick` makes
/// it Running and the first `debug_step` makes it Paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Ready,
    Running,
    /// single-stepping after the guest has run
    Paused,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Realtime,
    SingleStep,
}

/// Point-in-time copy of the guest's machine image. Fields are read one after
/// another, so nothing ties them to the same instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineState {
    pub program_counter: u16,
    pub stack_pointer: u16,
    pub index_register: u16,
    pub stack: [u16; CALL_STACK_WORDS],
    pub registers: [u8; REGISTER_COUNT],
    pub display: [u8; DISPLAY_SIZE_BYTES],
    /// as of the last step/tick
    pub sound_timer: u8,
}

impl MachineState {
    pub fn is_sounding(&self) -> bool {
        self.sound_timer > 0
    }
}

pub struct Runtime {
    guest: Box<dyn Guest>,
    layout: Layout,
    config: Config,
    state: SessionState,
    mode: RunMode,
    last_timestamp: Option<f64>,
    program_len: usize,
    sound_timer: u8,
}

impl Runtime {
    /// Instantiate and initialise a guest. Every failure here is fatal: no
    /// runtime comes back half set up.
    pub fn new(
        loader: &dyn GuestLoader,
        config: Config,
        display: Box<dyn Display>,
        sound: Box<dyn Sound>,
        now: f64,
    ) -> HostResult<Self> {
        let config = Config {
            seed: config.seed.map(|seed| seed & SEED_MASK),
            ..config
        };
        let mut bindings = Bindings::new(display, sound, config.seed);
        let seed = config.seed.unwrap_or_else(|| bindings.random_seed());

        let mut guest = loader.instantiate(bindings)?;
        let params = InitParams {
            seed,
            now,
            clock_hz: config.clock_hz,
            quirks: config.quirks,
        };
        guest.init(&params)?;
        if !config.quirks.wrap {
            debug!("wrap quirk is not part of the guest init call; ignoring");
        }

        let base = guest.memory_base_offset()?;
        let layout = Layout::new(base, guest.memory().len())?;
        info!(
            seed,
            clock_hz = config.clock_hz,
            base = format_args!("0x{base:05x}"),
            "guest initialised"
        );

        Ok(Runtime {
            guest,
            layout,
            config,
            state: SessionState::Ready,
            mode: RunMode::Realtime,
            last_timestamp: Some(now),
            program_len: 0,
            sound_timer: 0,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn last_timestamp(&self) -> Option<f64> {
        self.last_timestamp
    }

    pub fn program_len(&self) -> usize {
        self.program_len
    }

    /// whatever the guest last pushed through its debug bindings
    pub fn debug_push(&self) -> &DebugPush {
        self.guest.bindings().debug_push()
    }

    /// Copy a program to the load offset and hand it to the guest. Oversized
    /// programs are refused before anything is written.
    pub fn load_program(&mut self, bytes: &[u8]) -> HostResult<()> {
        self.check_alive()?;
        let len = bytes.len();
        if len > PROGRAM_CAPACITY_BYTES {
            return Err(HostError::ProgramTooLarge {
                len,
                capacity: PROGRAM_CAPACITY_BYTES,
            });
        }
        if self.layout.overlaps(PROGRAM_LOAD_OFFSET, len) {
            return Err(HostError::ProgramOverlapsLayout {
                len,
                base: self.layout.base(),
            });
        }
        self.guest
            .memory_mut()
            .write(bytes, PROGRAM_LOAD_OFFSET)
            .ok_or(HostError::ProgramTooLarge {
                len,
                capacity: PROGRAM_CAPACITY_BYTES,
            })?;
        self.call(|g| g.load_program(PROGRAM_LOAD_OFFSET, len as u32))?;
        self.program_len = len;
        debug!(len, "program loaded");
        Ok(())
    }

    /// restart the loaded program
    pub fn reset(&mut self) -> HostResult<()> {
        self.call(|g| g.reset())
    }

    /// Forward the frame time. The guest decides how many instructions that is.
    pub fn step(&mut self, now: f64) -> HostResult<()> {
        self.check_alive()?;
        if self.mode == RunMode::SingleStep {
            warn!("step while single-stepping; dropped");
            return Ok(());
        }
        self.call(|g| g.step(now))?;
        self.last_timestamp = Some(now);
        self.state = SessionState::Running;
        self.refresh_sound_timer()
    }

    /// 60 Hz timer decay, independent of the instruction clock
    pub fn tick(&mut self) -> HostResult<()> {
        self.call(|g| g.tick())?;
        if self.state == SessionState::Ready {
            self.state = SessionState::Running;
        }
        self.refresh_sound_timer()
    }

    /// One instruction; only while single-stepping.
    pub fn debug_step(&mut self) -> HostResult<()> {
        self.check_alive()?;
        if self.mode == RunMode::Realtime {
            warn!("debug step while running in real time; dropped");
            return Ok(());
        }
        self.call(|g| g.debug_step())?;
        if self.state == SessionState::Ready {
            self.state = SessionState::Paused;
        }
        self.refresh_sound_timer()
    }

    /// Stop real-time running and switch to single-stepping.
    pub fn pause(&mut self) -> HostResult<()> {
        self.check_alive()?;
        self.mode = RunMode::SingleStep;
        if self.state == SessionState::Running {
            self.state = SessionState::Paused;
        }
        Ok(())
    }

    /// Hand the guest the current time so the pause isn't replayed as a
    /// backlog of instructions, then go back to real time.
    pub fn resume(&mut self, now: f64) -> HostResult<()> {
        self.call(|g| g.set_current_time(now))?;
        self.last_timestamp = Some(now);
        self.mode = RunMode::Realtime;
        if self.state == SessionState::Paused {
            self.state = SessionState::Running;
        }
        Ok(())
    }

    /// Map a host key and forward the edge. Keys with no keypad equivalent
    /// are dropped.
    pub fn on_input(&mut self, key: &str, is_down: bool) -> HostResult<()> {
        let Some(code) = input::keypad_code(key) else {
            trace!(key, "no keypad mapping");
            return Ok(());
        };
        if is_down {
            self.call(|g| g.key_down(code))
        } else {
            self.call(|g| g.key_up(code))
        }
    }

    pub fn read_state(&self) -> MachineState {
        let memory = self.guest.memory();
        let layout = &self.layout;

        let mut stack = [0u16; CALL_STACK_WORDS];
        for (i, word) in stack.iter_mut().enumerate() {
            *word = memory
                .get_word(layout.addr(CALL_STACK) + 2 * i as u32)
                .unwrap_or(0);
        }
        // a field the memory no longer covers reads as zeros
        let registers: [u8; REGISTER_COUNT] = layout
            .field(memory, REGISTERS)
            .try_into()
            .unwrap_or([0; REGISTER_COUNT]);
        let display: [u8; DISPLAY_SIZE_BYTES] = layout
            .field(memory, DISPLAY)
            .try_into()
            .unwrap_or([0; DISPLAY_SIZE_BYTES]);

        MachineState {
            program_counter: layout.word(memory, PROGRAM_COUNTER),
            stack_pointer: layout.word(memory, STACK_POINTER),
            index_register: layout.word(memory, INDEX_REGISTER),
            stack,
            registers,
            display,
            sound_timer: self.sound_timer,
        }
    }

    fn check_alive(&self) -> HostResult<()> {
        match self.state {
            SessionState::Failed => Err(HostError::SessionFailed),
            _ => Ok(()),
        }
    }

    /// every call into the guest goes through here; a trap ends the session
    fn call<T>(&mut self, f: impl FnOnce(&mut dyn Guest) -> HostResult<T>) -> HostResult<T> {
        self.check_alive()?;
        f(self.guest.as_mut()).map_err(|e| {
            error!(error = %e, "guest call failed; session is over");
            self.state = SessionState::Failed;
            e
        })
    }

    /// silence the audio sink once the sound timer runs out
    fn refresh_sound_timer(&mut self) -> HostResult<()> {
        let previous = self.sound_timer;
        self.sound_timer = self.call(|g| g.sound_timer())?;
        if previous > 0 && self.sound_timer == 0 {
            self.guest.bindings_mut().silence();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Quirks;
    use crate::display::{DummyDisplay, FrameCapture};
    use crate::guest::testing::ScriptedLoader;
    use crate::memory::{SHARED_SIZE_BYTES, SYSTEM_RESERVED_BYTES};
    use crate::sound::{CueCounter, Mute};

    const FRAME_MS: f64 = 16.67;

    fn runtime(loader: &ScriptedLoader) -> HostResult<Runtime> {
        Runtime::new(
            loader,
            Config::default().with_seed(1),
            Box::new(DummyDisplay),
            Box::new(Mute),
            0.0,
        )
    }

    #[test]
    fn test_init_passes_frozen_config() -> HostResult<()> {
        let loader = ScriptedLoader::new();
        let config = Config::default()
            .with_seed(7)
            .with_clock_hz(700)
            .with_quirks(Quirks {
                shift: false,
                register: true,
                wrap: false,
            });
        let rt = Runtime::new(&loader, config.clone(), Box::new(DummyDisplay), Box::new(Mute), 12.5)?;
        let init = loader.log().init.expect("init was called");
        assert_eq!(init.seed, 7);
        assert_eq!(init.now, 12.5);
        assert_eq!(init.clock_hz, 700);
        assert!(!init.quirks.shift);
        assert_eq!(rt.config(), &config);
        assert_eq!(rt.state(), SessionState::Ready);
        assert_eq!(rt.layout().base(), 0x1_0000);
        Ok(())
    }

    #[test]
    fn test_seed_set_on_config_is_31_bits() -> HostResult<()> {
        let loader = ScriptedLoader::new();
        let config = Config {
            seed: Some(u32::MAX),
            ..Config::default()
        };
        let rt = Runtime::new(&loader, config, Box::new(DummyDisplay), Box::new(Mute), 0.0)?;
        assert_eq!(loader.log().init.expect("init was called").seed, 0x7fff_ffff);
        assert_eq!(rt.config().seed, Some(0x7fff_ffff));
        Ok(())
    }

    #[test]
    fn test_layout_outside_memory_is_fatal() {
        let mut loader = ScriptedLoader::new();
        loader.base = (SHARED_SIZE_BYTES - SYSTEM_RESERVED_BYTES + 1) as u32;
        assert!(matches!(
            runtime(&loader),
            Err(HostError::LayoutMismatch { .. })
        ));
    }

    #[test]
    fn test_end_to_end_pc_advances_with_time() -> HostResult<()> {
        let loader = ScriptedLoader::new();
        let t0 = 1000.0;
        let mut rt = Runtime::new(
            &loader,
            Config::default().with_seed(1).with_clock_hz(500),
            Box::new(DummyDisplay),
            Box::new(Mute),
            t0,
        )?;
        rt.load_program(&[0x12, 0x00])?;
        rt.step(t0)?;
        let before = rt.read_state().program_counter;
        rt.step(t0 + FRAME_MS)?;
        let after = rt.read_state().program_counter;

        let bound = (FRAME_MS * 500.0 / 1000.0).floor() as u16;
        assert!(after > before);
        assert!((after - before) / 2 <= bound);
        assert_eq!(rt.state(), SessionState::Running);
        assert_eq!(rt.last_timestamp(), Some(t0 + FRAME_MS));
        Ok(())
    }

    #[test]
    fn test_display_always_256_bytes() -> HostResult<()> {
        let loader = ScriptedLoader::new();
        let mut rt = runtime(&loader)?;
        assert_eq!(rt.read_state().display.len(), 256);
        rt.load_program(&[0xa5; 3000])?;
        rt.step(100.0)?;
        assert_eq!(rt.read_state().display.len(), 256);
        Ok(())
    }

    #[test]
    fn test_display_bytes_are_relayed_unmodified() -> HostResult<()> {
        let loader = ScriptedLoader::new();
        let mut rt = runtime(&loader)?;
        let pattern: Vec<u8> = (0..=255u8).collect();
        let addr = rt.layout().addr(DISPLAY);
        rt.guest.memory_mut().write(&pattern, addr).unwrap();
        assert_eq!(rt.read_state().display.to_vec(), pattern);
        Ok(())
    }

    #[test]
    fn test_call_stack_words_are_big_endian() -> HostResult<()> {
        let loader = ScriptedLoader::new();
        let mut rt = runtime(&loader)?;
        let addr = rt.layout().addr(CALL_STACK);
        rt.guest
            .memory_mut()
            .write(&[0x02, 0x46, 0x0a, 0xbc], addr)
            .unwrap();
        rt.guest
            .memory_mut()
            .write(&[0x0f, 0xfe], addr + 2 * (CALL_STACK_WORDS as u32 - 1))
            .unwrap();
        let stack = rt.read_state().stack;
        assert_eq!(stack[0], 0x0246);
        assert_eq!(stack[1], 0x0abc);
        assert_eq!(stack[2], 0);
        assert_eq!(stack[CALL_STACK_WORDS - 1], 0x0ffe);
        Ok(())
    }

    #[test]
    fn test_read_state_after_memory_shrinks() -> HostResult<()> {
        let loader = ScriptedLoader::new();
        let mut rt = runtime(&loader)?;
        let addr = rt.layout().addr(DISPLAY);
        rt.guest.memory_mut().write(&[0xff; 256], addr).unwrap();
        rt.on_input("1", true)?;

        loader.shrink_memory(rt.layout().base() as usize + 0x100);
        let state = rt.read_state();
        assert_eq!(state.display, [0; DISPLAY_SIZE_BYTES]);
        assert_eq!(state.registers, [0; REGISTER_COUNT]);
        assert_eq!(state.stack, [0; CALL_STACK_WORDS]);
        assert_eq!(state.program_counter, 0x200);
        Ok(())
    }

    #[test]
    fn test_draw_binding_reaches_display_sink() -> HostResult<()> {
        let loader = ScriptedLoader::new();
        let capture = FrameCapture::new();
        let mut rt = Runtime::new(
            &loader,
            Config::default().with_seed(1),
            Box::new(capture.clone()),
            Box::new(Mute),
            0.0,
        )?;
        let addr = rt.layout().addr(DISPLAY);
        rt.guest.memory_mut().write(&[0x81; 256], addr).unwrap();
        rt.step(10.0)?;
        assert_eq!(capture.last(), Some(vec![0x81; 256]));
        Ok(())
    }

    #[test]
    fn test_sound_timer_runs_down_and_stays_at_zero() -> HostResult<()> {
        let mut loader = ScriptedLoader::new();
        loader.sound_timer = 5;
        let counter = CueCounter::new();
        let mut rt = Runtime::new(
            &loader,
            Config::default().with_seed(1),
            Box::new(DummyDisplay),
            Box::new(counter.clone()),
            0.0,
        )?;
        rt.load_program(&[0x00, 0xe0])?;
        assert_eq!(counter.cues(), 1);

        let mut seen = Vec::new();
        for _ in 0..10 {
            rt.tick()?;
            seen.push(rt.read_state().sound_timer);
        }
        assert_eq!(seen, vec![4, 3, 2, 1, 0, 0, 0, 0, 0, 0]);
        assert!(!rt.read_state().is_sounding());
        assert_eq!(counter.stops(), 1);
        assert_eq!(loader.log().ticks, 10);
        Ok(())
    }

    #[test]
    fn test_oversized_program_rejected_without_writing() -> HostResult<()> {
        let loader = ScriptedLoader::new();
        let mut rt = runtime(&loader)?;
        let program = vec![0xee; PROGRAM_CAPACITY_BYTES + 1];
        assert!(matches!(
            rt.load_program(&program),
            Err(HostError::ProgramTooLarge { len, capacity })
                if len == 0x1_f001 && capacity == 0x1_f000
        ));
        assert!(rt.guest.memory()[..16].iter().all(|b| *b == 0));
        assert!(loader.log().loads.is_empty());
        assert_eq!(rt.program_len(), 0);
        // still usable
        rt.load_program(&[1, 2])?;
        assert_eq!(loader.log().loads, vec![(0, 2)]);
        Ok(())
    }

    #[test]
    fn test_program_may_not_cover_guest_image() -> HostResult<()> {
        let loader = ScriptedLoader::new();
        let mut rt = runtime(&loader)?;
        let program = vec![0xee; 0x1_0001];
        assert!(matches!(
            rt.load_program(&program),
            Err(HostError::ProgramOverlapsLayout { len: 0x1_0001, base: 0x1_0000 })
        ));
        assert!(rt.guest.memory()[..16].iter().all(|b| *b == 0));
        Ok(())
    }

    #[test]
    fn test_load_copies_to_offset_zero() -> HostResult<()> {
        let loader = ScriptedLoader::new();
        let mut rt = runtime(&loader)?;
        rt.load_program(&[0x00, 0xe0, 0x12, 0x00])?;
        assert_eq!(rt.guest.memory()[..4], [0x00, 0xe0, 0x12, 0x00]);
        assert_eq!(rt.program_len(), 4);
        Ok(())
    }

    #[test]
    fn test_key_edges_forwarded_once() -> HostResult<()> {
        let loader = ScriptedLoader::new();
        let mut rt = runtime(&loader)?;
        rt.on_input("q", true)?;
        assert_eq!(rt.read_state().registers[0x4], 1);
        rt.on_input("q", false)?;
        rt.on_input("Shift", true)?;
        rt.on_input("Shift", false)?;
        assert_eq!(loader.log().edges, vec![(0x4, true), (0x4, false)]);
        assert_eq!(rt.read_state().registers[0x4], 0);
        Ok(())
    }

    #[test]
    fn test_modes_do_not_mix() -> HostResult<()> {
        let loader = ScriptedLoader::new();
        let mut rt = runtime(&loader)?;

        rt.debug_step()?;
        assert_eq!(loader.log().debug_steps, 0);

        rt.pause()?;
        assert_eq!(rt.state(), SessionState::Ready);
        assert_eq!(rt.mode(), RunMode::SingleStep);
        let pc = rt.read_state().program_counter;
        rt.step(500.0)?;
        assert!(loader.log().steps.is_empty());
        rt.debug_step()?;
        assert_eq!(rt.state(), SessionState::Paused);
        rt.debug_step()?;
        assert_eq!(rt.read_state().program_counter, pc + 4);

        rt.resume(2000.0)?;
        assert_eq!(rt.mode(), RunMode::Realtime);
        assert_eq!(rt.state(), SessionState::Running);
        assert_eq!(loader.log().set_times, vec![2000.0]);
        // the paused time is not replayed
        rt.step(2000.0)?;
        assert_eq!(rt.read_state().program_counter, pc + 4);
        Ok(())
    }

    #[test]
    fn test_pause_and_resume_before_running_stay_ready() -> HostResult<()> {
        let loader = ScriptedLoader::new();
        let mut rt = runtime(&loader)?;
        rt.pause()?;
        assert_eq!(rt.state(), SessionState::Ready);
        rt.resume(40.0)?;
        assert_eq!(rt.state(), SessionState::Ready);
        assert_eq!(rt.mode(), RunMode::Realtime);
        rt.step(50.0)?;
        assert_eq!(rt.state(), SessionState::Running);
        rt.pause()?;
        assert_eq!(rt.state(), SessionState::Paused);
        Ok(())
    }

    #[test]
    fn test_trap_fails_session() -> HostResult<()> {
        let mut loader = ScriptedLoader::new();
        loader.trap_on_tick = true;
        let mut rt = runtime(&loader)?;
        assert!(matches!(rt.tick(), Err(HostError::Trap { .. })));
        assert_eq!(rt.state(), SessionState::Failed);
        assert!(matches!(rt.step(1.0), Err(HostError::SessionFailed)));
        assert!(matches!(rt.on_input("q", true), Err(HostError::SessionFailed)));
        assert!(matches!(rt.load_program(&[1]), Err(HostError::SessionFailed)));
        // reading is still fine
        assert_eq!(rt.read_state().display.len(), 256);
        Ok(())
    }

    #[test]
    fn test_reset_forwarded() -> HostResult<()> {
        let loader = ScriptedLoader::new();
        let mut rt = runtime(&loader)?;
        rt.reset()?;
        assert_eq!(loader.log().resets, 1);
        Ok(())
    }
}
