///
/// ## Design
///
/// * the CHIP-8 interpreter itself is a sandboxed guest (compiled to wasm);
///   this crate is the host that drives it
/// * host and guest share one linear memory of two 64K pages, allocated by
///   the host; the guest reports where its 4K machine image lives in it
/// * instruction throughput is the guest's business: the host only forwards
///   the frame timestamp and the guest works out how many instructions that is
/// * timers decay at a fixed 60 Hz on their own clock, whatever the
///   instruction rate
/// * abstract display and audio so can plug alternatives; starting with TUI
///   in-console and a PC speaker beep
///
/// Model
///
/// Runtime(loader, config, display, audio)
///  |-- bindings(display, audio, rng)     -- what the guest may call
///  |-- guest = loader.instantiate(bindings)
///  |-- guest.init(seed, now, clock, quirks)
///  |-- layout = guest.memory_base_offset() -- checked against the memory
///  `-- driven from outside:
///       |-- every frame:   runtime.step(now)
///       |-- every 1/60 s:  runtime.tick()
///       |-- on key edges:  runtime.on_input(key, down)
///       `-- whenever:      runtime.read_state()
pub mod bindings;
pub mod config;
pub mod display;
pub mod error;
pub mod guest;
pub mod input;
pub mod memory;
pub mod rom;
pub mod runtime;
pub mod scheduler;
pub mod sound;
pub mod wasm;

pub use config::{Config, Quirks};
pub use error::{HostError, HostResult};
pub use runtime::{MachineState, RunMode, Runtime, SessionState};
