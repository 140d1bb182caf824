use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relay_daemon::config::Config;
use relay_daemon::server::{self, Server};
use relay_protocol::{methods, JsonRpcRequest, JsonRpcResponse, RequestId};
use relay_router::{CompletionRouter, ConfigStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

#[derive(Parser)]
#[command(
    name = "relay",
    about = "Multi-provider AI completion router with failover"
)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Relay daemon
    Start {
        /// Run in foreground (don't daemonize)
        #[arg(long)]
        foreground: bool,
        /// Path to config file
        #[arg(long)]
        config: Option<String>,
    },
    /// Stop the running daemon
    Stop,
    /// Show provider and endpoint status
    Status,
    /// Generate text for a prompt
    Generate {
        /// The prompt to send
        prompt: String,
        /// Agent mode (e.g. general, coding)
        #[arg(long, default_value = "general")]
        mode: String,
    },
    /// List available agent modes
    Modes,
    /// Reload the configuration without restarting
    Reload,
    /// Persist an API key for an endpoint
    SetKey {
        /// Provider id (e.g. gemini)
        provider: String,
        /// Endpoint name within the provider
        endpoint: String,
        /// The API key to store
        api_key: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start { foreground, config } => cmd_start(foreground, config).await,
        Commands::Stop => cmd_stop().await,
        Commands::Status => cmd_status().await,
        Commands::Generate { prompt, mode } => cmd_generate(&prompt, &mode).await,
        Commands::Modes => cmd_modes().await,
        Commands::Reload => cmd_reload().await,
        Commands::SetKey {
            provider,
            endpoint,
            api_key,
        } => cmd_set_key(&provider, &endpoint, &api_key).await,
    }
}

async fn cmd_start(foreground: bool, config_path: Option<String>) -> Result<()> {
    // Check if already running
    if is_daemon_running() {
        println!("Relay daemon is already running.");
        return Ok(());
    }

    let path = config_path
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(Config::config_path);
    let config = if path.exists() {
        Config::load_from(Path::new(&path))?
    } else {
        Config::default()
    };

    if foreground {
        server::init_tracing(&config.daemon.log_level);
        println!("Starting Relay daemon (foreground)...");

        let store = ConfigStore::load(&path)?;
        let router = Arc::new(CompletionRouter::new(store));
        let _monitor = router.spawn_health_monitor();

        let server = Server::new(config, router);
        server.run().await?;
    } else {
        // Spawn as background process
        let exe = std::env::current_exe()?;
        let mut args = vec!["start".to_string(), "--foreground".to_string()];
        if let Some(path) = config_path {
            args.push("--config".to_string());
            args.push(path);
        }

        let child = std::process::Command::new(exe)
            .args(&args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .context("Failed to spawn daemon process")?;

        println!("Relay daemon started (PID: {})", child.id());
    }

    Ok(())
}

async fn cmd_stop() -> Result<()> {
    if !is_daemon_running() {
        println!("Relay daemon is not running.");
        return Ok(());
    }

    // Send shutdown via socket
    let config = Config::load().unwrap_or_default();
    match send_request(&config.daemon.socket_path, methods::SHUTDOWN, None).await {
        Ok(_) => println!("Relay daemon stopped."),
        Err(_) => {
            // Fallback: kill via PID
            if let Ok(pid_str) = std::fs::read_to_string(Config::pid_path()) {
                if let Ok(pid) = pid_str.trim().parse::<i32>() {
                    unsafe {
                        libc::kill(pid, libc::SIGTERM);
                    }
                    let _ = std::fs::remove_file(Config::pid_path());
                    println!("Relay daemon stopped (via signal).");
                }
            }
        }
    }

    Ok(())
}

async fn cmd_status() -> Result<()> {
    if !is_daemon_running() {
        println!("Relay daemon is not running.");
        return Ok(());
    }

    let config = Config::load().unwrap_or_default();
    match send_request(&config.daemon.socket_path, methods::STATUS, None).await {
        Ok(response) => {
            if let Some(result) = response.result {
                println!("Relay daemon status:");
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
        }
        Err(e) => {
            println!("Failed to get status: {e}");
        }
    }

    Ok(())
}

async fn cmd_generate(prompt: &str, mode: &str) -> Result<()> {
    let config = Config::load().unwrap_or_default();
    let params = serde_json::json!({ "prompt": prompt, "mode": mode });

    let response = send_request(&config.daemon.socket_path, methods::GENERATE, Some(params))
        .await
        .context("Is the Relay daemon running? Try `relay start`.")?;

    if let Some(error) = response.error {
        anyhow::bail!("Generation failed: {}", error.message);
    }
    if let Some(result) = response.result {
        if let Some(text) = result["text"].as_str() {
            println!("{text}");
        }
        eprintln!(
            "[{} / {} in {}ms]",
            result["provider"].as_str().unwrap_or("?"),
            result["model"].as_str().unwrap_or("?"),
            result["latency_ms"]
        );
    }

    Ok(())
}

async fn cmd_modes() -> Result<()> {
    let config = Config::load().unwrap_or_default();
    let response = send_request(&config.daemon.socket_path, methods::MODES, None)
        .await
        .context("Is the Relay daemon running? Try `relay start`.")?;

    if let Some(result) = response.result {
        println!("{}", serde_json::to_string_pretty(&result)?);
    }

    Ok(())
}

async fn cmd_reload() -> Result<()> {
    let config = Config::load().unwrap_or_default();
    let response = send_request(&config.daemon.socket_path, methods::RELOAD, None)
        .await
        .context("Is the Relay daemon running? Try `relay start`.")?;

    match response.error {
        Some(error) => anyhow::bail!("Reload failed: {}", error.message),
        None => println!("Configuration reloaded."),
    }

    Ok(())
}

async fn cmd_set_key(provider: &str, endpoint: &str, api_key: &str) -> Result<()> {
    let config = Config::load().unwrap_or_default();
    let params = serde_json::json!({
        "provider": provider,
        "endpoint": endpoint,
        "api_key": api_key,
    });

    let response = send_request(
        &config.daemon.socket_path,
        methods::SET_CREDENTIAL,
        Some(params),
    )
    .await
    .context("Is the Relay daemon running? Try `relay start`.")?;

    match response.error {
        Some(error) => anyhow::bail!("Failed to store key: {}", error.message),
        None => println!("Stored API key for {provider}/{endpoint}."),
    }

    Ok(())
}

/// Send a JSON-RPC request to the daemon and return the response.
async fn send_request(
    socket_path: &str,
    method: &str,
    params: Option<serde_json::Value>,
) -> Result<JsonRpcResponse> {
    let stream = UnixStream::connect(socket_path).await?;
    let (reader, mut writer) = stream.into_split();

    let request = JsonRpcRequest::new(method, params, RequestId::Number(1));
    let json = serde_json::to_string(&request)?;

    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;

    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let response: JsonRpcResponse = serde_json::from_str(&line)?;
    Ok(response)
}

fn is_daemon_running() -> bool {
    let pid_path = Config::pid_path();
    if !pid_path.exists() {
        return false;
    }

    if let Ok(pid_str) = std::fs::read_to_string(&pid_path) {
        if let Ok(pid) = pid_str.trim().parse::<i32>() {
            // Check if process is alive
            unsafe { libc::kill(pid, 0) == 0 }
        } else {
            false
        }
    } else {
        false
    }
}
