//! Host harness for the static server
//!
//! Starts the server from `STATIC_SERVER_*` environment variables, then
//! reads commands from stdin so lifecycle events can be driven by hand:
//! `active`, `background`, `inactive`, `start`, `stop`, `kill`, `origin`,
//! `status`, `quit`.

use staticserver::{AppState, StartOptions, StaticServer};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug")),
        )
        .init();

    let server = StaticServer::global();
    let options = StartOptions::from_env();

    match server.start(&options).await {
        Ok(origin) => println!("Serving at {}", origin),
        Err(e) => {
            eprintln!("Failed to start static server: {} ({})", e, e.code());
            eprintln!("Please check STATIC_SERVER_ROOT and STATIC_SERVER_PORT in the .env file");
            return;
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!("Failed to read stdin: {}", e);
                break;
            }
        };

        if !run_command(server, &options, line.trim()).await {
            break;
        }
    }

    server.kill().await;
}

/// Run one stdin command; returns `false` to exit
async fn run_command(server: &StaticServer, options: &StartOptions, command: &str) -> bool {
    match command {
        "" => {}
        "quit" | "exit" => return false,
        "start" => match server.start(options).await {
            Ok(origin) => println!("Serving at {}", origin),
            Err(e) => println!("Start failed: {}", e),
        },
        "stop" => {
            server.stop().await;
            println!("Stopped");
        }
        "kill" => {
            server.kill().await;
            println!("Killed");
        }
        "origin" => println!("{}", server.origin().await),
        "status" => println!(
            "running: {}, wants running: {}, tracking lifecycle: {}",
            server.is_running().await,
            server.wants_running().await,
            server.is_tracking_lifecycle().await
        ),
        other => match other.parse::<AppState>() {
            Ok(state) => {
                let delivered = server.app_state_events().notify(state);
                if delivered == 0 {
                    println!("No lifecycle listener; {} ignored", state);
                }
            }
            Err(e) => println!("{}", e),
        },
    }
    true
}
