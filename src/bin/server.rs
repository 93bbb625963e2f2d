//! Streaming chat server: LLM tokens and sentence-ordered TTS audio over SSE.
//!
//! Usage: `ember-server [CONFIG.toml]`
//!
//! Without an argument the default config path is used if it exists.

use ember::SpeechConfig;
use ember::llm::openai::OpenAiTokenSource;
use ember::server::ChatServer;
use ember::tts::build_provider;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Log to stderr, plus a daily-rolling file when `server.log_dir` is set.
/// The returned guard flushes the file writer on drop.
fn init_tracing(config: &SpeechConfig) -> Option<WorkerGuard> {
    let stderr = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    match &config.server.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "ember-server.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(env_filter())
                .with(stderr)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter())
                .with(stderr)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(SpeechConfig::default_config_path);
    let config = SpeechConfig::load_or_default(&path)?;
    let _log_guard = init_tracing(&config);

    tracing::info!(config = %path.display(), "ember-server starting");

    let tokens = Arc::new(OpenAiTokenSource::new(&config.llm)?);
    let tts = if config.tts.enabled {
        let provider = build_provider(&config.tts)?;
        tracing::info!(provider = provider.name(), "speech enabled");
        Some(provider)
    } else {
        tracing::info!("speech disabled, streaming text only");
        None
    };

    let mut server = ChatServer::start(&config, tokens, tts).await?;
    tracing::info!("listening on http://{}", server.addr());

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    server.shutdown_and_wait().await;
    tracing::info!("ember-server shut down cleanly");
    Ok(())
}
