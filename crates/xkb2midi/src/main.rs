//! xkb2midi - play MIDI notes on a dedicated X11 keyboard
//!
//! Reads keycodes and MIDI note numbers from a config file and reconfigures
//! one keyboard through the X Keyboard Extension. Keystrokes on the mapped
//! keys are sent as MIDI note on/off events over JACK, whichever window has
//! focus.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use xkb2midi::{
    config::{self, Settings},
    midi::{is_jack_running, list_jack_midi_ports, JackMidiOutput},
    Dispatcher, KeyboardDevice, XkbKeyboard, XKB_USE_CORE_KBD,
};

const AFTER_HELP: &str = "\
Mapped keys are intercepted through the X Keyboard Extension, so the program
does not need to be in focus to work.

Please be aware that this program can potentially lock up your input handling,
so don't use it on your core keyboard(!)";

#[derive(Parser)]
#[command(name = "xkb2midi")]
#[command(author, version, about = "Turn a dedicated X11 keyboard into a JACK MIDI controller", long_about = None)]
#[command(after_help = AFTER_HELP)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Keymap file with keycode to note mappings (default: ~/.config/xkb2midi.cfg)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// XKB device index (c.f. `xinput list`). The default is the core
    /// keyboard, which probably should be avoided.
    #[arg(short, long, default_value_t = XKB_USE_CORE_KBD)]
    device: u16,

    /// Prevent mapped keys from generating key events as usual
    #[arg(short, long)]
    unmap: bool,

    /// Do not ask for confirmation when using the core keyboard
    #[arg(short, long)]
    yes: bool,

    /// JACK settings file (default: ~/.config/xkb2midi/settings.toml)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// JACK client name
    #[arg(long)]
    client_name: Option<String>,

    /// Velocity (1-127)
    #[arg(long)]
    velocity: Option<u8>,

    /// Log debug output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a sample keymap at the default location
    Init,
    /// Show the default keymap path
    ConfigPath,
    /// List available JACK MIDI ports
    ListPorts,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    match cli.command {
        Some(Commands::Init) => {
            let path = config::create_default_keymap_file()?;
            println!("Created sample keymap at: {}", path.display());
            return Ok(());
        }
        Some(Commands::ConfigPath) => {
            let path = config::default_keymap_path()?;
            println!("{}", path.display());
            return Ok(());
        }
        Some(Commands::ListPorts) => {
            if !is_jack_running() {
                println!("JACK is not running");
                return Ok(());
            }
            let ports = list_jack_midi_ports();
            if ports.is_empty() {
                println!("No JACK MIDI input ports found");
            } else {
                println!("Available JACK MIDI input ports:");
                for port in ports {
                    println!("  {}", port);
                }
            }
            return Ok(());
        }
        None => {}
    }

    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    let keymap_path = match cli.config {
        Some(path) => path,
        None => config::default_keymap_path()?,
    };
    let keymap = config::load_keymap(&keymap_path)
        .with_context(|| format!("Unable to parse config file: '{}'", keymap_path.display()))?;
    if keymap.is_empty() {
        log::warn!("No key mappings in '{}'", keymap_path.display());
    }

    let mut settings = match &cli.settings {
        Some(path) => Settings::load(path)?,
        None => Settings::load_default()?,
    };
    if let Some(name) = cli.client_name {
        settings.midi.client_name = name;
    }
    if let Some(velocity) = cli.velocity {
        settings.midi.velocity = velocity;
    }
    settings.midi.velocity = settings.midi.velocity.clamp(1, 127);

    if cli.device == XKB_USE_CORE_KBD && !cli.yes && !confirm_core_keyboard()? {
        println!("Exiting ...");
        std::process::exit(1);
    }

    let keyboard = XkbKeyboard::connect(None, cli.device).context("Failed to open X display")?;
    let output = JackMidiOutput::from_settings(&settings.midi).context("Could not connect to JACK server")?;
    log::info!("JACK MIDI output created: {}", output.port_name());

    let generate_events = !cli.unmap;
    let mut dispatcher =
        Dispatcher::new(keyboard, output, keymap, generate_events).with_velocity(settings.midi.velocity);

    dispatcher
        .bind()
        .with_context(|| format!("Unable to get map for device #{}", cli.device))?;

    if !dispatcher.output_mut().activate() {
        bail!("Could not activate JACK client");
    }
    dispatcher.output().auto_connect(&settings.midi.auto_connect);

    dispatcher.device_mut().select_notifications()?;
    log::info!("Listening for key events on device #{}", cli.device);

    dispatcher.run().context("Lost connection to the X server")
}

/// Ask before grabbing the keyboard the whole session depends on
fn confirm_core_keyboard() -> Result<bool> {
    print!("Are you sure you want to use the Core keyboard? This might make your system inoperable. (y/N) ");
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    println!();
    Ok(matches!(answer.trim_start().chars().next(), Some('y' | 'Y')))
}
