use clap::Parser;

use voxdial::audio;
use voxdial::settings;
use voxdial::VoiceClient;

/// Talk to a realtime voice agent from the terminal.
#[derive(Parser, Debug)]
#[command(name = "voxdial", version, about)]
struct Cli {
    /// Backend WebSocket URL (overrides the saved setting)
    #[arg(long)]
    server: Option<String>,

    /// Agent voice code, e.g. es-ES-Female
    #[arg(long)]
    voice: Option<String>,

    /// Conversation prompt identifier
    #[arg(long)]
    prompt: Option<String>,

    /// Input device name (defaults to the system default microphone)
    #[arg(long)]
    input_device: Option<String>,

    /// Outbound capture slice in milliseconds
    #[arg(long)]
    slice_ms: Option<u32>,

    /// List input devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Persist the effective settings for future runs
    #[arg(long)]
    save: bool,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    if cli.list_devices {
        for name in audio::capture::list_devices() {
            println!("{}", name);
        }
        return std::process::ExitCode::SUCCESS;
    }

    // CLI flags override the settings file for this run.
    let mut settings = settings::load_settings();
    if let Some(server) = cli.server {
        settings.server_url = server;
    }
    if let Some(voice) = cli.voice {
        settings.voice = voice;
    }
    if let Some(prompt) = cli.prompt {
        settings.prompt = Some(prompt);
    }
    if let Some(device) = cli.input_device {
        settings.input_device = Some(device);
    }
    if let Some(slice_ms) = cli.slice_ms {
        settings.capture_slice_ms = slice_ms;
    }

    if !settings::is_known_voice(&settings.voice) {
        log::warn!(
            "Unknown voice code '{}' (known: {}); the backend will fall back to its default",
            settings.voice,
            settings::VOICES.join(", ")
        );
    }

    if cli.save {
        if let Err(e) = settings::save_settings(&settings) {
            log::warn!("Could not save settings: {}", e);
        }
    }

    log::info!(
        "voxdial starting (server {}, voice {})",
        settings.server_url,
        settings.voice
    );

    match VoiceClient::new(settings).run().await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            std::process::ExitCode::FAILURE
        }
    }
}
