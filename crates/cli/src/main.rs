use clap::{Parser, Subcommand};
use parley::connection::{ConnectionManager, ConnectionOptions, ConnectionState};
use parley::gateway::ModelGateway;
use parley::monitor::HealthMonitor;
use parley::session::ConversationStore;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Parley CLI: chat with local Ollama models", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Check whether the model service is reachable and list its models (JSON).
    Status {
        /// Config file path (default: PARLEY_CONFIG_PATH or ~/.parley/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// List local models.
    Models {
        /// Config file path (default: PARLEY_CONFIG_PATH or ~/.parley/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Download a model.
    Pull {
        /// Model name, e.g. codellama or llama3.2:latest
        name: String,

        /// Config file path (default: PARLEY_CONFIG_PATH or ~/.parley/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Delete a local model.
    Delete {
        name: String,

        /// Config file path (default: PARLEY_CONFIG_PATH or ~/.parley/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Check one model's health and print its status (JSON).
    Show {
        name: String,

        /// Config file path (default: PARLEY_CONFIG_PATH or ~/.parley/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Chat with a model (interactive). Replies stream as they are generated.
    Chat {
        /// Config file path (default: PARLEY_CONFIG_PATH or ~/.parley/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Model to use (default from config, else codellama)
        #[arg(long, short)]
        model: Option<String>,
    },

    /// Poll service and model health until interrupted.
    Watch {
        /// Config file path (default: PARLEY_CONFIG_PATH or ~/.parley/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Version) => {
            println!("parley {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Status { config }) => run_status(config).await,
        Some(Commands::Models { config }) => run_models(config).await,
        Some(Commands::Pull { name, config }) => run_pull(config, &name).await,
        Some(Commands::Delete { name, config }) => run_delete(config, &name).await,
        Some(Commands::Show { name, config }) => run_show(config, &name).await,
        Some(Commands::Chat { config, model }) => run_chat(config, model).await,
        Some(Commands::Watch { config }) => run_watch(config).await,
        None => {
            println!("Run with --help for usage");
            Ok(())
        }
    };

    if let Err(e) = result {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

fn gateway(config_path: Option<PathBuf>) -> anyhow::Result<(parley::config::Config, ModelGateway)> {
    let (config, path) = parley::config::load_config(config_path)?;
    log::debug!("loaded config from {}", path.display());
    let gateway = ModelGateway::from_config(&config);
    log::info!("model service at {}", gateway.base_url());
    Ok((config, gateway))
}

async fn run_status(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let (_, gateway) = gateway(config_path)?;
    let report = gateway.check_status().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.connected {
        anyhow::bail!("model service not reachable at {}", gateway.base_url());
    }
    Ok(())
}

async fn run_models(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let (_, gateway) = gateway(config_path)?;
    let models = gateway.list_models().await?;
    if models.is_empty() {
        println!("no local models; try `parley pull codellama`");
    }
    for model in models {
        let modified = model.modified.as_deref().unwrap_or("-");
        println!("{:<32} {:>12} {}", model.name, format_size(model.size), modified);
    }
    Ok(())
}

async fn run_pull(config_path: Option<PathBuf>, name: &str) -> anyhow::Result<()> {
    let (_, gateway) = gateway(config_path)?;
    println!("pulling {} ...", name);
    let res = gateway.pull_model(name).await?;
    println!("{}: {}", name, if res.status.is_empty() { "done" } else { res.status.as_str() });
    Ok(())
}

async fn run_delete(config_path: Option<PathBuf>, name: &str) -> anyhow::Result<()> {
    let (_, gateway) = gateway(config_path)?;
    gateway.delete_model(name).await?;
    println!("deleted {}", name);
    Ok(())
}

async fn run_show(config_path: Option<PathBuf>, name: &str) -> anyhow::Result<()> {
    let (_, gateway) = gateway(config_path)?;
    let status = gateway.check_model_health(name).await;
    println!("{}", serde_json::to_string_pretty(&status)?);
    if !status.available {
        anyhow::bail!("model {} is not available", name);
    }
    Ok(())
}

async fn run_chat(config_path: Option<PathBuf>, model: Option<String>) -> anyhow::Result<()> {
    use std::io::{self, Write};

    let (config, gateway) = gateway(config_path)?;
    let gateway = Arc::new(gateway);
    let manager = ConnectionManager::new(
        Arc::clone(&gateway),
        ConnectionOptions::from(&config.connection),
    );

    let snapshot = manager.check_connection().await;
    if snapshot.state != ConnectionState::Connected {
        anyhow::bail!(
            "model service not reachable at {}: {}",
            gateway.base_url(),
            snapshot.error.unwrap_or_default()
        );
    }
    let model = parley::config::resolve_model(&config, model.as_deref());
    manager.set_current_model(&model).await?;
    println!("chatting with {} (/exit to quit)", model);

    let chunks = gateway.response_chunks().subscribe(|c| {
        let mut stdout = io::stdout();
        let _ = write!(stdout, "{}", c.chunk);
        let _ = stdout.flush();
    });

    let store = ConversationStore::new();
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("/exit") || input.eq_ignore_ascii_case("/quit") {
            break;
        }

        write!(stdout, "< ")?;
        stdout.flush()?;
        match store.send_message(&gateway, input, &model).await {
            Ok(_) => println!(),
            Err(e) => eprintln!("\nchat error: {}", e),
        }
    }

    chunks.unsubscribe();
    Ok(())
}

async fn run_watch(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let (config, gateway) = gateway(config_path)?;
    let gateway = Arc::new(gateway);

    let _connection = gateway.connection_status_events().subscribe(|report| {
        if report.connected {
            println!(
                "[{}] connected, {} model(s)",
                report.timestamp.format("%H:%M:%S"),
                report.models.len()
            );
        } else {
            println!(
                "[{}] disconnected: {}",
                report.timestamp.format("%H:%M:%S"),
                report.error.as_deref().unwrap_or("unknown error")
            );
        }
    });
    let _models = gateway.model_status_events().subscribe(|event| {
        if event.status.available {
            println!("  {} available", event.name);
        } else {
            println!(
                "  {} unavailable: {}",
                event.name,
                event.status.error.as_deref().unwrap_or("unknown error")
            );
        }
    });

    let monitor = HealthMonitor::new(Arc::clone(&gateway));
    if !config.monitor.enabled {
        log::warn!("monitor disabled in config; running a single round");
        monitor.check_now().await;
        return Ok(());
    }
    monitor.start(config.monitor.interval());
    tokio::signal::ctrl_c().await?;
    monitor.stop();
    Ok(())
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
