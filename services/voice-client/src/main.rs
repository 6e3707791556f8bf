use anyhow::{Context, Result};
use assistant_client::{ClientConfig, HttpAssistant};
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::fmt::time::ChronoLocal;
use voice_client::config::Config;
use voice_client::console::{ConsoleCapture, ConsoleHost, ConsolePlayback};
use voice_client::runtime::{RuntimeOptions, SessionRuntime};
use voice_session_core::OutputMode;
use voice_session_core::capability::AssistantClient;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Root URL of the assistant backend (overrides ASSISTANT_BASE_URL)
    #[arg(long)]
    base_url: Option<String>,

    /// Deliver replies to typed messages as "text" or "voice" (overrides OUTPUT_MODE)
    #[arg(long)]
    mode: Option<OutputMode>,

    /// Start listening as soon as the backend is reachable
    #[arg(long)]
    auto_listen: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Load Configuration ---
    let args = Cli::parse();
    let mut config = Config::from_env().context("Failed to load application configuration")?;
    if let Some(base_url) = args.base_url {
        config.base_url = base_url;
    }
    if let Some(mode) = args.mode {
        config.output_mode = mode;
    }

    // --- 2. Initialize Logging ---
    // Logs go to stderr so the conversation on stdout stays readable.
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Configuration loaded successfully. Assistant at {}", config.base_url);

    // --- 3. Initialize the Assistant Client ---
    let client_config = ClientConfig::builder()
        .with_base_url(&config.base_url)
        .with_request_timeout(config.request_timeout)
        .with_health_timeout(config.health_timeout)
        .build();
    let assistant: Arc<dyn AssistantClient> =
        Arc::new(HttpAssistant::new(client_config).context("Failed to create assistant client")?);

    // --- 4. Session Setup ---
    let (capture, slot) = ConsoleCapture::new();
    let options = RuntimeOptions {
        request_timeout: config.request_timeout,
        output_mode: config.output_mode,
        preferred_voice_provider: config.preferred_voice_provider.clone(),
        ..RuntimeOptions::default()
    };
    let (runtime, handle) =
        SessionRuntime::new(capture, ConsolePlayback::default(), assistant.clone(), options);
    let host = ConsoleHost::new(handle.clone(), slot, assistant);

    let mut runtime_task = tokio::spawn(runtime.run());

    // --- 5. Run until the user quits ---
    tokio::select! {
        result = host.run(args.auto_listen) => {
            result.context("Console host failed")?;
        }
        result = &mut runtime_task => {
            result.context("Session runtime panicked")??;
            tracing::warn!("Session runtime exited before the console");
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, shutting down");
        }
    }

    handle.shutdown();
    runtime_task
        .await
        .context("Session runtime panicked")?
        .context("Session runtime failed")?;

    tracing::info!("Goodbye");
    Ok(())
}
