use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use ttspreview_core::channel::direct::{DirectChannel, DirectConfig};
use ttspreview_core::channel::hass::{HassChannel, HassConfig};
use ttspreview_core::discovery::discover;
use ttspreview_core::media::silent::SilentSink;
use ttspreview_core::personas::{self, Language, Sex};
use ttspreview_core::settings::config::{PlaybackBackend, Transport};
use ttspreview_core::{
    AudioSink, Channel, PreviewSession, RequestBuilder, SessionState, Settings, SettingsManager,
};

#[derive(Parser, Debug)]
#[command(name = "ttspreview")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Preview Kokoro TTS voices before saving them")]
struct Args {
    /// Load settings from a specific file instead of ~/.ttspreview/settings.toml
    #[arg(long, global = true, value_name = "PATH")]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Synthesize a short sample and play it
    Preview(PreviewArgs),
    /// List voices, asking the server when --base-url is given
    Personas {
        #[arg(long)]
        language: Option<Language>,
        #[arg(long)]
        sex: Option<Sex>,
        /// Kokoro server to query for models and voices
        #[arg(long)]
        base_url: Option<String>,
        #[arg(long)]
        api_key: Option<String>,
    },
}

#[derive(clap::Args, Debug)]
struct PreviewArgs {
    #[arg(long)]
    base_url: Option<String>,

    #[arg(long)]
    model: Option<String>,

    #[arg(long)]
    persona: Option<String>,

    /// Sentence to speak; a built-in sentence is used when blank
    #[arg(long)]
    text: Option<String>,

    #[arg(long)]
    speed: Option<f64>,

    #[arg(long)]
    format: Option<String>,

    #[arg(long)]
    sample_rate: Option<u32>,

    #[arg(long)]
    api_key: Option<String>,

    /// Send the request through Home Assistant or straight to the server
    #[arg(long, value_enum)]
    via: Option<Via>,

    #[arg(long)]
    hass_url: Option<String>,

    /// Home Assistant long-lived access token
    #[arg(long)]
    token: Option<String>,

    /// Give up if no reply arrives within this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Decode and time the clip without an output device
    #[arg(long)]
    silent: bool,

    /// Write the effective values back to the settings file
    #[arg(long)]
    save: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Via {
    Hass,
    Direct,
}

impl From<Via> for Transport {
    fn from(via: Via) -> Self {
        match via {
            Via::Hass => Transport::Hass,
            Via::Direct => Transport::Direct,
        }
    }
}

fn main() -> Result<()> {
    setup_tracing()?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let local = tokio::task::LocalSet::new();
        local.run_until(async_main()).await
    })
}

async fn async_main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Personas {
            language,
            sex,
            base_url: Some(base_url),
            api_key,
        } => list_discovered(&base_url, api_key.as_deref(), language, sex).await,
        Command::Personas { language, sex, .. } => {
            list_personas(language, sex);
            Ok(())
        }
        Command::Preview(preview) => {
            let manager = match args.settings {
                Some(path) => SettingsManager::from_path(path)?,
                None => SettingsManager::new()?,
            };
            run_preview(&manager, preview).await
        }
    }
}

fn list_personas(language: Option<Language>, sex: Option<Sex>) {
    for persona in personas::filter(language, sex) {
        println!("{:<14} {}", persona.id, persona.label());
    }
}

async fn list_discovered(
    base_url: &str,
    api_key: Option<&str>,
    language: Option<Language>,
    sex: Option<Sex>,
) -> Result<()> {
    let found = discover(base_url, api_key).await?;
    info!(
        models = found.models.len(),
        personas = found.personas.len(),
        from_server = found.personas_from_server,
        "Discovered voices"
    );

    println!("Models: {}", found.models.join(", "));
    if !found.personas_from_server {
        println!("No voices reported by {base_url}; showing the built-in catalogue");
    }

    let filtered = language.is_some() || sex.is_some();
    for id in &found.personas {
        match personas::find(id) {
            Some(persona)
                if language.map_or(true, |l| persona.language == l)
                    && sex.map_or(true, |s| persona.sex == s) =>
            {
                println!("{:<14} {}", persona.id, persona.label());
            }
            // Custom voices have no language or sex to filter on
            None if !filtered => println!("{id}"),
            _ => {}
        }
    }
    Ok(())
}

async fn run_preview(manager: &SettingsManager, args: PreviewArgs) -> Result<()> {
    manager.update_setting(|settings| apply_overrides(settings, &args));
    let settings = manager.settings();

    info!(
        "CLI startup: transport={:?}, persona={:?}, silent={}",
        settings.connection.transport, settings.preview.persona, args.silent
    );

    if let Some(persona) = settings.preview.persona.as_deref() {
        if personas::find(persona).is_none() {
            warn!(persona, "Persona is not in the built-in catalogue");
            eprintln!("Note: '{persona}' is not a built-in voice; sending it anyway");
        }
    }

    let request = RequestBuilder::new().build(&settings.preview.to_form())?;

    if args.save {
        manager.save()?;
        info!("Saved preview settings to {:?}", manager.path());
    }

    let channel = connect(&settings).await?;
    let sink = open_sink(&settings, args.silent)?;
    let session = PreviewSession::new(channel, sink, settings.preview.session_config());
    let mut state = session.subscribe();

    let persona = request.persona.clone();
    let started = session.preview(request).await?;
    println!(
        "Playing {persona} ({} bytes, {})",
        started.bytes, started.content_type
    );

    state
        .wait_for(|s| *s == SessionState::Idle)
        .await
        .context("Preview session closed before playback finished")?;
    Ok(())
}

fn apply_overrides(settings: &mut Settings, args: &PreviewArgs) {
    let preview = &mut settings.preview;
    if let Some(base_url) = &args.base_url {
        preview.base_url = Some(base_url.clone());
    }
    if let Some(model) = &args.model {
        preview.model = model.clone();
    }
    if let Some(persona) = &args.persona {
        preview.persona = Some(persona.clone());
    }
    if let Some(text) = &args.text {
        preview.preview_text = Some(text.clone());
    }
    if let Some(speed) = args.speed {
        preview.speed = Some(speed);
    }
    if let Some(format) = &args.format {
        preview.format = Some(format.clone());
    }
    if let Some(sample_rate) = args.sample_rate {
        preview.sample_rate = Some(sample_rate);
    }
    if let Some(api_key) = &args.api_key {
        preview.api_key = Some(api_key.clone());
    }
    if let Some(timeout) = args.timeout_secs {
        preview.response_timeout_secs = Some(timeout);
    }

    let connection = &mut settings.connection;
    if let Some(via) = args.via {
        connection.transport = via.into();
    }
    if let Some(url) = &args.hass_url {
        connection.hass_url = url.clone();
    }
    if let Some(token) = &args.token {
        connection.access_token = token.clone();
    }

    if args.silent {
        settings.playback.backend = PlaybackBackend::Silent;
    }
}

async fn connect(settings: &Settings) -> Result<Arc<dyn Channel>> {
    let connection = &settings.connection;
    match connection.transport {
        Transport::Hass => {
            if connection.access_token.trim().is_empty() {
                bail!("A Home Assistant access token is required (--token or connection.access_token)");
            }
            let channel = HassChannel::connect(&HassConfig {
                url: connection.hass_url.clone(),
                access_token: connection.access_token.clone(),
            })
            .await?;
            Ok(Arc::new(channel))
        }
        Transport::Direct => {
            let channel = DirectChannel::new(DirectConfig {
                request_timeout: Duration::from_secs(connection.request_timeout_secs),
            })?;
            Ok(Arc::new(channel))
        }
    }
}

fn open_sink(settings: &Settings, silent: bool) -> Result<Arc<dyn AudioSink>> {
    if silent || settings.playback.backend == PlaybackBackend::Silent {
        return Ok(Arc::new(SilentSink::new()));
    }

    #[cfg(feature = "audio")]
    {
        let sink = ttspreview_core::media::device::DeviceSink::new()?;
        Ok(Arc::new(sink))
    }

    #[cfg(not(feature = "audio"))]
    {
        warn!("Built without the audio feature; playing silently");
        eprintln!("Note: built without audio support, the preview will not be audible");
        Ok(Arc::new(SilentSink::new()))
    }
}

fn setup_tracing() -> Result<()> {
    use std::fs;
    use tracing_subscriber::fmt;

    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    let trace_dir = PathBuf::from(home).join(".ttspreview").join("trace");
    fs::create_dir_all(&trace_dir)?;

    let log_file = trace_dir.join("ttspreview.log");
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)?;

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(file)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true),
        )
        .with(EnvFilter::new("info"))
        .init();

    info!("Tracing initialized to {:?}", log_file);
    Ok(())
}
