// chatango-bot: runnable bot around the ch-bot runtime.
//
// Loads the TOML config, registers a couple of built-in commands, and
// runs until ctrl-c.

use std::path::PathBuf;

use tracing::info;

use ch_bot::config::{load_config, load_config_from_path};
use ch_bot::App;

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber for structured logging to stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "chatango-bot starting");

    // `--config <path>` overrides the default /etc location.
    let mut args = std::env::args().skip(1);
    let config_path = match (args.next().as_deref(), args.next()) {
        (Some("--config"), Some(path)) => Some(PathBuf::from(path)),
        (None, _) => None,
        (Some(other), _) => {
            eprintln!("unknown argument: {other}\nusage: chatango-bot [--config <path>]");
            std::process::exit(2);
        }
    };

    let config = match config_path {
        Some(path) => load_config_from_path(&path),
        None => load_config(),
    };
    let config = match config {
        Ok(config) => {
            info!(groups = config.groups.len(), "config loaded");
            config
        }
        Err(e) => {
            eprintln!("FATAL: failed to load config: {e}");
            std::process::exit(1);
        }
    };

    let app = match App::new(config) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("FATAL: failed to build app: {e}");
            std::process::exit(1);
        }
    };

    app.on_command(&["ping"], |event, _ctx, _args| async move {
        if let Some(group) = event.group() {
            let _ = group.send_message("pong").await;
        }
    });

    app.on_command(&["uptime"], {
        let started = std::time::Instant::now();
        move |event, _ctx, _args| {
            let elapsed = started.elapsed();
            async move {
                if let Some(group) = event.group() {
                    let _ = group
                        .send_message(&format!("up for {} seconds", elapsed.as_secs()))
                        .await;
                }
            }
        }
    });

    if let Err(e) = app.run().await {
        eprintln!("FATAL: {e}");
        std::process::exit(1);
    }
}
