use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{bail, Context};
use clap::Parser;
use crossterm::{cursor, execute, terminal};
use tracing::info;
use tracing_subscriber::EnvFilter;

use chip8_host::config::{Config, Quirks};
use chip8_host::display::MonoTermDisplay;
use chip8_host::input::{HostEvent, TerminalInput};
use chip8_host::rom::{ProgramSource, RomDirectory};
use chip8_host::scheduler::{Scheduler, FRAME_HZ};
use chip8_host::sound::{Mute, SimpleBeep, Sound};
use chip8_host::wasm::WasmLoader;
use chip8_host::{RunMode, Runtime};

/// Run a CHIP-8 guest module in the terminal.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// compiled interpreter (.wasm or .wat)
    guest: PathBuf,

    /// ROM title to look up in --roms
    rom: String,

    /// directory of ROMs
    #[arg(long, default_value = "roms")]
    roms: PathBuf,

    /// fixed seed for reproducible runs
    #[arg(long)]
    seed: Option<u32>,

    /// instructions per second
    #[arg(long, default_value_t = chip8_host::config::DEFAULT_CLOCK_HZ)]
    clock_hz: u32,

    #[arg(long)]
    no_shift_quirk: bool,

    #[arg(long)]
    no_register_quirk: bool,

    #[arg(long)]
    no_wrap_quirk: bool,

    #[arg(long)]
    mute: bool,

    /// write logs here; the terminal belongs to the display
    #[arg(long)]
    log: Option<PathBuf>,
}

impl Args {
    fn config(&self) -> Config {
        let config = Config::default()
            .with_clock_hz(self.clock_hz)
            .with_quirks(Quirks {
                shift: !self.no_shift_quirk,
                register: !self.no_register_quirk,
                wrap: !self.no_wrap_quirk,
            });
        match self.seed {
            Some(seed) => config.with_seed(seed),
            None => config,
        }
    }
}

fn init_logging(path: Option<&PathBuf>) -> anyhow::Result<()> {
    let Some(path) = path else {
        return Ok(());
    };
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log.as_ref())?;

    let roms = RomDirectory::new(&args.roms);
    let Some(program) = roms.fetch(&args.rom)? else {
        bail!("no rom called {:?} in {}", args.rom, roms.root().display());
    };
    let loader = WasmLoader::from_file(&args.guest)
        .with_context(|| format!("loading guest {}", args.guest.display()))?;

    let config = args.config();
    let mut scheduler = Scheduler::new(FRAME_HZ, config.timer_hz);
    let sound: Box<dyn Sound> = if args.mute {
        Box::new(Mute)
    } else {
        Box::new(SimpleBeep::new())
    };

    let mut input = TerminalInput::new()?;
    execute!(io::stdout(), terminal::EnterAlternateScreen, cursor::Hide)?;
    let display = MonoTermDisplay::new(64, 32)?;

    let result = run(&loader, config, display, sound, &program, &mut scheduler, &mut input);

    execute!(io::stdout(), cursor::Show, terminal::LeaveAlternateScreen)?;
    drop(input);
    result
}

fn run(
    loader: &WasmLoader,
    config: Config,
    display: MonoTermDisplay,
    sound: Box<dyn Sound>,
    program: &[u8],
    scheduler: &mut Scheduler,
    input: &mut TerminalInput,
) -> anyhow::Result<()> {
    let mut runtime = Runtime::new(loader, config, Box::new(display), sound, scheduler.now())?;
    runtime.load_program(program)?;
    info!(len = program.len(), "running");

    loop {
        let due = scheduler.wait();
        for event in input.poll(std::time::Instant::now())? {
            match event {
                HostEvent::Quit => return Ok(()),
                HostEvent::TogglePause => match runtime.mode() {
                    RunMode::Realtime => runtime.pause()?,
                    RunMode::SingleStep => runtime.resume(scheduler.now())?,
                },
                HostEvent::DebugStep => runtime.debug_step()?,
                HostEvent::Key { key, is_down } => runtime.on_input(&key, is_down)?,
            }
        }
        if runtime.mode() == RunMode::Realtime {
            for _ in 0..due.ticks {
                runtime.tick()?;
            }
            if due.frames > 0 {
                runtime.step(due.now)?;
            }
        }
    }
}
