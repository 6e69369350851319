//! Guests compiled to WebAssembly.
//!
//! The host allocates the two-page linear memory and hands it to the module as
//! `env.memory`, alongside the binding table as `env.*` functions. The module
//! must import that memory rather than bring its own: host and guest describe
//! the same bytes or nothing works.
use std::fs;
use std::path::Path;

use tracing::{debug, warn};
use wasmtime::{
    Caller, Engine, ExternType, Instance, Linker, Memory, MemoryType, Module, Store, TypedFunc,
    WasmParams, WasmResults,
};

use crate::bindings::{Bindings, Severity};
use crate::error::{HostError, HostResult};
use crate::guest::{Guest, GuestLoader, InitParams};
use crate::memory::SHARED_PAGES;

const IMPORT_MODULE: &str = "env";

struct HostState {
    bindings: Bindings,
    memory: Option<Memory>,
}

/// Compiled once, instantiated per session.
pub struct WasmLoader {
    engine: Engine,
    module: Module,
}

impl WasmLoader {
    /// binary or text format
    pub fn from_bytes(bytes: &[u8]) -> HostResult<Self> {
        let engine = Engine::default();
        let module =
            Module::new(&engine, bytes).map_err(|e| HostError::Instantiate(format!("{e:#}")))?;

        let imports_memory = module.imports().any(|import| {
            import.module() == IMPORT_MODULE
                && import.name() == "memory"
                && matches!(import.ty(), ExternType::Memory(_))
        });
        if !imports_memory {
            return Err(HostError::Instantiate(
                "guest must import its memory as env.memory".to_string(),
            ));
        }
        Ok(WasmLoader { engine, module })
    }

    pub fn from_file(path: impl AsRef<Path>) -> HostResult<Self> {
        let bytes = fs::read(path)?;
        Self::from_bytes(&bytes)
    }
}

impl GuestLoader for WasmLoader {
    fn instantiate(&self, bindings: Bindings) -> HostResult<Box<dyn Guest>> {
        let instantiate_err = |e: wasmtime::Error| HostError::Instantiate(format!("{e:#}"));

        let mut store = Store::new(
            &self.engine,
            HostState {
                bindings,
                memory: None,
            },
        );
        let memory = Memory::new(&mut store, MemoryType::new(SHARED_PAGES, Some(SHARED_PAGES)))
            .map_err(instantiate_err)?;
        store.data_mut().memory = Some(memory);

        let mut linker = Linker::new(&self.engine);
        linker
            .define(&store, IMPORT_MODULE, "memory", memory)
            .map_err(instantiate_err)?;
        link_bindings(&mut linker).map_err(instantiate_err)?;

        let instance = linker
            .instantiate(&mut store, &self.module)
            .map_err(instantiate_err)?;
        let exports = Exports::resolve(&instance, &mut store)?;
        debug!("wasm guest instantiated");

        Ok(Box::new(WasmGuest {
            store,
            memory,
            exports,
        }))
    }
}

/// run `f` against the shared memory and the binding table together
fn with_memory(caller: &mut Caller<'_, HostState>, f: impl FnOnce(&[u8], &mut Bindings)) {
    let Some(memory) = caller.data().memory else {
        warn!("binding called before memory was attached");
        return;
    };
    let (data, state) = memory.data_and_store_mut(&mut *caller);
    f(data, &mut state.bindings);
}

fn log_binding(
    linker: &mut Linker<HostState>,
    name: &str,
    severity: Severity,
) -> wasmtime::Result<()> {
    linker.func_wrap(
        IMPORT_MODULE,
        name,
        move |mut caller: Caller<'_, HostState>, offset: i32, len: i32| {
            with_memory(&mut caller, |memory, bindings| {
                bindings.log_message(memory, severity, offset as u32, len as u32 as usize)
            })
        },
    )?;
    Ok(())
}

fn link_bindings(linker: &mut Linker<HostState>) -> wasmtime::Result<()> {
    log_binding(linker, "consoleDebug", Severity::Debug)?;
    log_binding(linker, "consoleInfo", Severity::Info)?;
    log_binding(linker, "consoleWarn", Severity::Warn)?;
    log_binding(linker, "consoleError", Severity::Error)?;

    linker.func_wrap(
        IMPORT_MODULE,
        "getRandomSeed",
        |mut caller: Caller<'_, HostState>| -> i32 {
            caller.data_mut().bindings.random_seed() as i32
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "draw",
        |mut caller: Caller<'_, HostState>, offset: i32, len: i32| {
            with_memory(&mut caller, |memory, bindings| {
                bindings.request_draw(memory, offset as u32, len as u32 as usize)
            })
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "playAudio",
        |mut caller: Caller<'_, HostState>| caller.data_mut().bindings.play_audio_cue(),
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "setStack",
        |mut caller: Caller<'_, HostState>, offset: i32, len: i32| {
            with_memory(&mut caller, |memory, bindings| {
                bindings.set_stack(memory, offset as u32, len as u32 as usize)
            })
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "setRegisters",
        |mut caller: Caller<'_, HostState>, pc: i32, sp: i32, i: i32, offset: i32, len: i32| {
            with_memory(&mut caller, |memory, bindings| {
                bindings.set_registers(
                    memory,
                    pc as u16,
                    sp as u16,
                    i as u16,
                    offset as u32,
                    len as u32 as usize,
                )
            })
        },
    )?;
    Ok(())
}

struct Exports {
    init: TypedFunc<(i32, f64, i32, i32, i32), ()>,
    reset: TypedFunc<(), ()>,
    load_game: TypedFunc<(i32, i32), ()>,
    get_mem_ptr: TypedFunc<(), i32>,
    on_keydown: TypedFunc<i32, ()>,
    on_keyup: TypedFunc<i32, ()>,
    on_animation_frame: TypedFunc<f64, ()>,
    timer_tick: TypedFunc<(), ()>,
    get_sound_timer: TypedFunc<(), i32>,
    set_current_time: TypedFunc<f64, ()>,
    debug_step: TypedFunc<(), ()>,
}

impl Exports {
    fn resolve(instance: &Instance, store: &mut Store<HostState>) -> HostResult<Self> {
        Ok(Exports {
            init: export(instance, store, "init")?,
            reset: export(instance, store, "reset")?,
            load_game: export(instance, store, "loadGame")?,
            get_mem_ptr: export(instance, store, "getMemPtr")?,
            on_keydown: export(instance, store, "onKeydown")?,
            on_keyup: export(instance, store, "onKeyup")?,
            on_animation_frame: export(instance, store, "onAnimationFrame")?,
            timer_tick: export(instance, store, "timerTick")?,
            get_sound_timer: export(instance, store, "getSoundTimer")?,
            set_current_time: export(instance, store, "setCurrentTime")?,
            debug_step: export(instance, store, "debugStep")?,
        })
    }
}

fn export<P, R>(
    instance: &Instance,
    store: &mut Store<HostState>,
    name: &'static str,
) -> HostResult<TypedFunc<P, R>>
where
    P: WasmParams,
    R: WasmResults,
{
    instance
        .get_typed_func::<P, R>(&mut *store, name)
        .map_err(|e| HostError::MissingExport {
            name,
            reason: format!("{e:#}"),
        })
}

fn trap(entry: &'static str) -> impl FnOnce(wasmtime::Error) -> HostError {
    move |e| HostError::Trap {
        entry,
        reason: format!("{e:#}"),
    }
}

pub struct WasmGuest {
    store: Store<HostState>,
    memory: Memory,
    exports: Exports,
}

impl Guest for WasmGuest {
    fn init(&mut self, params: &InitParams) -> HostResult<()> {
        let args = (
            params.seed as i32,
            params.now,
            params.clock_hz as i32,
            params.quirks.shift as i32,
            params.quirks.register as i32,
        );
        self.exports
            .init
            .call(&mut self.store, args)
            .map_err(trap("init"))
    }

    fn reset(&mut self) -> HostResult<()> {
        self.exports
            .reset
            .call(&mut self.store, ())
            .map_err(trap("reset"))
    }

    fn load_program(&mut self, offset: u32, len: u32) -> HostResult<()> {
        self.exports
            .load_game
            .call(&mut self.store, (offset as i32, len as i32))
            .map_err(trap("loadGame"))
    }

    fn memory_base_offset(&mut self) -> HostResult<u32> {
        self.exports
            .get_mem_ptr
            .call(&mut self.store, ())
            .map(|ptr| ptr as u32)
            .map_err(trap("getMemPtr"))
    }

    fn key_down(&mut self, code: u8) -> HostResult<()> {
        self.exports
            .on_keydown
            .call(&mut self.store, code as i32)
            .map_err(trap("onKeydown"))
    }

    fn key_up(&mut self, code: u8) -> HostResult<()> {
        self.exports
            .on_keyup
            .call(&mut self.store, code as i32)
            .map_err(trap("onKeyup"))
    }

    fn step(&mut self, now: f64) -> HostResult<()> {
        self.exports
            .on_animation_frame
            .call(&mut self.store, now)
            .map_err(trap("onAnimationFrame"))
    }

    fn set_current_time(&mut self, now: f64) -> HostResult<()> {
        self.exports
            .set_current_time
            .call(&mut self.store, now)
            .map_err(trap("setCurrentTime"))
    }

    fn tick(&mut self) -> HostResult<()> {
        self.exports
            .timer_tick
            .call(&mut self.store, ())
            .map_err(trap("timerTick"))
    }

    fn debug_step(&mut self) -> HostResult<()> {
        self.exports
            .debug_step
            .call(&mut self.store, ())
            .map_err(trap("debugStep"))
    }

    fn sound_timer(&mut self) -> HostResult<u8> {
        self.exports
            .get_sound_timer
            .call(&mut self.store, ())
            .map(|t| t.clamp(0, u8::MAX as i32) as u8)
            .map_err(trap("getSoundTimer"))
    }

    fn memory(&self) -> &[u8] {
        self.memory.data(&self.store)
    }

    fn memory_mut(&mut self) -> &mut [u8] {
        self.memory.data_mut(&mut self.store)
    }

    fn bindings(&self) -> &Bindings {
        &self.store.data().bindings
    }

    fn bindings_mut(&mut self) -> &mut Bindings {
        &mut self.store.data_mut().bindings
    }
}
