mod audio;
mod config;
mod guest;

use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Duration;
use vita_emu_core::audio::{self as mix, PortFormat, ResumeAudioThread};
use vita_emu_core::kernel::Kernel;
use vita_emu_core::renderer::null::NullDriver;
use vita_emu_core::renderer::{self, Backend, CommandKind};

#[derive(Parser)]
struct Args {
    /// Path to the host TOML config
    #[arg(long)]
    config: Option<PathBuf>,

    /// Render backend (opengl or vulkan), overrides the config
    #[arg(long)]
    backend: Option<Backend>,

    /// Run without opening an audio device
    #[arg(long)]
    no_audio: bool,

    /// Number of guest threads to run
    #[arg(long, default_value_t = 2)]
    threads: u32,

    /// Number of seconds to run before stopping the guest
    #[arg(long, default_value_t = 2)]
    seconds: u64,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn main() {
    let args = Args::parse();

    let default_filter = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(config::default_host_config_path);
    let cfg = config::load_from_file(&config_path);
    info!("Using host config {}", config_path.display());

    let backend = args.backend.unwrap_or_else(|| cfg.renderer.backend.into());
    let (mut renderer, render) = match renderer::init(
        backend,
        Box::new(NullDriver::new(backend)),
        cfg.renderer.max_pending,
    ) {
        Ok(pair) => pair,
        Err(e) => {
            error!("Renderer: {e}");
            return;
        }
    };
    let render_thread = thread::spawn(move || {
        renderer.run();
        renderer.executed()
    });

    let kernel = Arc::new(Kernel::new(cfg.kernel_config()));
    let wake = Arc::new(guest::WakeBoard::default());

    let audio = if args.no_audio || !cfg.audio.enabled {
        None
    } else {
        let board = Arc::clone(&wake);
        let resume: ResumeAudioThread = Arc::new(move |thread| board.wake(thread));
        let mut host = audio::CpalHost::default();
        match mix::init(&mut host, &cfg.audio.desired_spec(), resume) {
            Ok(engine) => Some(engine),
            Err(e) => {
                warn!("Continuing without audio: {e}");
                None
            }
        }
    };

    let counter = Arc::new(AtomicU32::new(0));
    let env = guest::GuestEnv {
        kernel: Arc::clone(&kernel),
        render: render.clone(),
        wake,
        counter: Arc::clone(&counter),
    };

    let ports: Vec<_> = (0..args.threads)
        .map(|index| {
            audio.as_ref().and_then(|engine| {
                engine
                    .state()
                    .open_port(PortFormat {
                        sample_rate: 48_000,
                        channels: 1,
                    })
                    .inspect_err(|e| warn!("guest{index}: {e}"))
                    .ok()
            })
        })
        .collect();

    let guests: Vec<_> = ports
        .iter()
        .zip(0u32..)
        .map(|(port, index)| {
            let env = env.clone();
            let port = port.clone();
            thread::spawn(move || guest::run(env, index, port))
        })
        .collect();
    drop(env);

    thread::sleep(Duration::from_secs(args.seconds));
    kernel.exit_all_threads();

    for (index, handle) in guests.into_iter().enumerate() {
        match handle.join() {
            Ok(guest::GuestExit::Stopped { frames }) => {
                info!("guest{index}: {frames} frames")
            }
            Ok(exit) => error!("guest{index}: {exit:?}"),
            Err(_) => error!("guest{index}: thread panicked"),
        }
    }

    if let Err(e) = render.execute(CommandKind::Shutdown) {
        error!("Renderer: {e}");
    }
    drop(render);
    let executed = render_thread.join().unwrap_or_default();

    if let Some(engine) = &audio {
        for port in ports.iter().flatten() {
            if let Err(e) = engine.state().close_port(port.id()) {
                warn!("{e}");
            }
        }
    }

    info!(
        "Executed {executed} render commands, guest counter {} after {}us",
        counter.load(Ordering::Acquire),
        kernel.uptime_us()
    );
}
