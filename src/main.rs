use anyhow::{Context, Result};
use crossbeam::channel;
use pedal_looper::audio::io::import_wav;
use pedal_looper::audio::stream::enumerate_device_names;
use pedal_looper::audio::{AudioStreams, DeviceSelection, TakeStore, WavTakeStore};
use pedal_looper::control::{
    ControlMessage, Dispatcher, KeyboardButtons, Lifecycle, ShutdownSignal,
};
use pedal_looper::ui::TerminalStatus;
use pedal_looper::config::ButtonSection;
use pedal_looper::{Looper, LooperConfig, LooperError};
use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info};

const LOG_FILE: &str = "looper.log";

fn print_help(buttons: &ButtonSection) {
    println!("pedal-looper - Foot-pedal audio looper");
    println!();
    println!("USAGE:");
    println!("    pedal-looper [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help          Print this help message");
    println!("    --debug             Enable debug logging");
    println!("    --config <PATH>     Read settings from PATH (default: looper.toml)");
    println!("    --list-devices      List audio devices and exit");
    println!("    --load <WAV>        Start with a saved take as the current loop");
    println!();
    println!("DESCRIPTION:");
    println!("    Records one take from the input device and loops it gaplessly on");
    println!("    the output device. Four buttons drive it; the keyboard stands in");
    println!("    for the pedal. Takes are saved as WAV files.");
    println!();
    let keys = &buttons.keys;
    println!("CONTROLS:");
    println!("    {}        Record: start a take / stop and keep it", keys.record);
    println!("    {}        Play/Stop: loop the take, or stop the loop", keys.play_stop);
    println!("    {}        Mute/unmute the output", keys.mute);
    println!(
        "    {}        Hold {} to shut down",
        keys.exit,
        buttons.long_press_label()
    );
    println!("    q        Quit");
    println!();
    println!("Log output goes to {LOG_FILE}.");
}

struct Args {
    debug: bool,
    config: Option<PathBuf>,
    load: Option<PathBuf>,
    list_devices: bool,
    help: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        debug: false,
        config: None,
        load: None,
        list_devices: false,
        help: false,
    };

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => args.help = true,
            "--debug" => args.debug = true,
            "--list-devices" => args.list_devices = true,
            "--config" => {
                let path = iter.next().context("--config needs a path")?;
                args.config = Some(PathBuf::from(path));
            }
            "--load" => {
                let path = iter.next().context("--load needs a WAV file")?;
                args.load = Some(PathBuf::from(path));
            }
            other => anyhow::bail!("unknown argument '{}' (try --help)", other),
        }
    }

    Ok(args)
}

fn init_logging(debug: bool) -> Result<()> {
    let file = File::create(LOG_FILE).with_context(|| format!("cannot create {LOG_FILE}"))?;
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_max_level(level)
        .with_thread_names(true)
        .init();
    Ok(())
}

fn list_devices() -> Result<()> {
    let (inputs, outputs) = enumerate_device_names()?;

    println!("Input devices:");
    for name in inputs {
        println!("    {name}");
    }
    println!("Output devices:");
    for name in outputs {
        println!("    {name}");
    }
    Ok(())
}

fn run(args: Args) -> Result<()> {
    init_logging(args.debug)?;

    let config = LooperConfig::load(args.config.as_deref())?;
    info!(?config, "Configuration loaded");

    let selection = DeviceSelection::resolve(&config.audio)?;
    let input_channels = selection.input_channels();
    let output_channels = selection.output_channels();

    let preload = args
        .load
        .as_ref()
        .map(|path| import_wav(path, config.audio.sample_rate, 0))
        .transpose()?;

    let store: Option<Box<dyn TakeStore>> = config.takes.persist.then(|| {
        Box::new(WavTakeStore::new(&config.takes.dir, config.takes.encoding)) as Box<dyn TakeStore>
    });

    println!("Starting pedal-looper...");
    let display = TerminalStatus::new(
        config.buttons.keys.clone(),
        config.buttons.long_press_label(),
        selection.input_device_name(),
        selection.output_device_name(),
    )
    .map_err(|e| LooperError::Button(format!("terminal: {e}")))?;

    let mut looper = Looper::new(&config, input_channels, Box::new(display), store);
    if let Some(buffer) = preload {
        looper.preload(buffer);
    }

    let streams = AudioStreams::start(
        selection,
        looper.capture_sink(),
        looper.playback_source(output_channels),
        looper.stats(),
    )?;

    let (sender, receiver) = channel::unbounded::<ControlMessage>();
    let shutdown = ShutdownSignal::new();

    let signal = shutdown.clone();
    let signal_sender = sender.clone();
    ctrlc::set_handler(move || {
        if signal.request() {
            let _ = signal_sender.send(ControlMessage::Terminate);
        }
    })
    .context("cannot install signal handler")?;

    let buttons = KeyboardButtons::new(config.buttons.keys.clone(), config.buttons.key_hold());
    let dispatcher = Dispatcher::from_config(&config.buttons, Instant::now());
    let stop = shutdown.clone();
    let interval = config.buttons.poll_interval();
    let dispatcher_thread = thread::Builder::new()
        .name("buttons".into())
        .spawn(move || dispatcher.run(buttons, sender, stop, interval))
        .context("cannot start button dispatcher")?;

    let report = Lifecycle::new(
        looper,
        receiver,
        shutdown,
        Duration::from_millis(config.tick_ms),
    )
    .with_streams(Box::new(streams))
    .with_dispatcher(dispatcher_thread)
    .run();

    info!(
        cause = ?report.cause,
        events = report.events_handled,
        failures = report.failures.len(),
        "pedal-looper stopped"
    );
    for failure in &report.failures {
        eprintln!("Warning: {failure}");
    }
    println!("pedal-looper stopped.");
    Ok(())
}

fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    if args.help {
        // Show the configured keys; an unreadable config falls back to defaults.
        let buttons = LooperConfig::load(args.config.as_deref())
            .map(|config| config.buttons)
            .unwrap_or_default();
        print_help(&buttons);
        return ExitCode::SUCCESS;
    }

    if args.list_devices {
        return match list_devices() {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Error: {e:#}");
                ExitCode::from(2)
            }
        };
    }

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {e:#}");
            let hardware = e
                .downcast_ref::<LooperError>()
                .is_some_and(LooperError::is_hardware);
            if hardware {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
