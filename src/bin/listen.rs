//! Terminal client: sends one message and plays the streamed reply.
//!
//! Usage: `ember-listen [--server URL] [--config CONFIG.toml] [--devices] MESSAGE...`

use anyhow::Context;
use ember::SpeechConfig;
use ember::audio::{AudioContext, CpalAudioContext};
use ember::client::{ChatClient, ChatTurn};
use ember::playback::{ContextFactory, NoopUnlock, StreamingAudioQueue};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

struct Args {
    server: Option<String>,
    config: Option<PathBuf>,
    devices: bool,
    message: String,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args {
        server: None,
        config: None,
        devices: false,
        message: String::new(),
    };
    let mut words = Vec::new();
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--server" => args.server = Some(iter.next().context("--server needs a URL")?),
            "--config" => {
                args.config = Some(PathBuf::from(iter.next().context("--config needs a path")?));
            }
            "--devices" => args.devices = true,
            _ => words.push(arg),
        }
    }
    args.message = words.join(" ");
    Ok(args)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = parse_args()?;
    if args.devices {
        for name in CpalAudioContext::list_output_devices()? {
            println!("{name}");
        }
        return Ok(());
    }
    if args.message.trim().is_empty() {
        anyhow::bail!("usage: ember-listen [--server URL] [--config PATH] MESSAGE...");
    }

    let config_path = args
        .config
        .unwrap_or_else(SpeechConfig::default_config_path);
    let config = SpeechConfig::load_or_default(&config_path)?;
    let server = args.server.unwrap_or_else(|| {
        format!("http://{}:{}", config.server.host, config.server.port)
    });

    let playback = config.playback.clone();
    let factory: ContextFactory = Arc::new(move || {
        let ctx: Arc<dyn AudioContext> = Arc::new(CpalAudioContext::new(&playback)?);
        Ok(ctx)
    });
    let queue = StreamingAudioQueue::new(factory, Arc::new(NoopUnlock));
    let client = ChatClient::new(&server, Some(queue.clone()))?;

    let outcome = client
        .stream_turn(&ChatTurn::new(args.message), |token| {
            print!("{token}");
            let _ = std::io::stdout().flush();
        })
        .await?;
    println!();

    if let Some(error) = outcome.error {
        queue.stop();
        anyhow::bail!("turn failed: {error}");
    }
    if outcome.audio_chunks > 0 {
        queue.wait_for_completion().await;
    }
    queue.stop();
    if outcome.session_complete {
        println!("(session complete)");
    }
    Ok(())
}
