use crate::bindings::Bindings;
use crate::config::Quirks;
use crate::error::HostResult;

/// Everything the guest is told once, at start-up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InitParams {
    pub seed: u32,
    /// high-resolution timestamp, milliseconds
    pub now: f64,
    pub clock_hz: u32,
    pub quirks: Quirks,
}

/// The sandboxed instruction interpreter, seen from the host. The runtime
/// never issues overlapping calls; the guest may call back into its
/// `Bindings` during any of them.
pub trait Guest {
    fn init(&mut self, params: &InitParams) -> HostResult<()>;

    /// restart the loaded program
    fn reset(&mut self) -> HostResult<()>;

    /// the program is already at `offset` in shared memory
    fn load_program(&mut self, offset: u32, len: u32) -> HostResult<()>;

    /// where the guest keeps its machine image
    fn memory_base_offset(&mut self) -> HostResult<u32>;

    fn key_down(&mut self, code: u8) -> HostResult<()>;
    fn key_up(&mut self, code: u8) -> HostResult<()>;

    /// run however many instructions the time since the last call is worth
    fn step(&mut self, now: f64) -> HostResult<()>;

    /// move the guest's idea of "last seen" to `now` without running anything
    fn set_current_time(&mut self, now: f64) -> HostResult<()>;

    /// 60 Hz delay/sound timer decay
    fn tick(&mut self) -> HostResult<()>;

    /// exactly one instruction
    fn debug_step(&mut self) -> HostResult<()>;

    fn sound_timer(&mut self) -> HostResult<u8>;

    /// the whole shared region
    fn memory(&self) -> &[u8];
    fn memory_mut(&mut self) -> &mut [u8];

    fn bindings(&self) -> &Bindings;
    fn bindings_mut(&mut self) -> &mut Bindings;
}

/// Produces guests wired to a given binding table.
pub trait GuestLoader {
    fn instantiate(&self, bindings: Bindings) -> HostResult<Box<dyn Guest>>;
}
