use chrono::{Days, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pulsar")]
#[command(about = "Pulsar CLI: ouvidoria gateway and analyst client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and default files (config and data directory).
    Init {
        /// Config file path (default: PULSAR_CONFIG_PATH or ~/.pulsar/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Run the gateway (vendor webhooks plus the analysis API).
    Gateway {
        /// Config file path (default: PULSAR_CONFIG_PATH or ~/.pulsar/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// HTTP port (default from config or 15151)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Ask the running gateway for an executive summary of a channel's conversations.
    Summary {
        /// Config file path (default: PULSAR_CONFIG_PATH or ~/.pulsar/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Channel id from the config's channel list.
        #[arg(long, value_name = "ID")]
        channel: String,

        /// First day (YYYY-MM-DD, default: seven days ago).
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Last day (YYYY-MM-DD, default: today).
        #[arg(long)]
        to: Option<NaiveDate>,

        /// Leave today's partial conversations out of the report.
        #[arg(long)]
        no_today: bool,
    },

    /// Ask the analyst a question about a channel's conversations.
    Ask {
        /// Config file path (default: PULSAR_CONFIG_PATH or ~/.pulsar/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Channel id from the config's channel list.
        #[arg(long, value_name = "ID")]
        channel: String,

        /// First day (YYYY-MM-DD, default: seven days ago).
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Last day (YYYY-MM-DD, default: today).
        #[arg(long)]
        to: Option<NaiveDate>,

        /// The question.
        question: String,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("pulsar {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Gateway { config, port }) => {
            if let Err(e) = run_gateway(config, port).await {
                log::error!("gateway failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Summary {
            config,
            channel,
            from,
            to,
            no_today,
        }) => {
            let body = serde_json::json!({
                "channelId": channel,
                "startDate": from.unwrap_or_else(default_start),
                "endDate": to,
                "includeToday": !no_today,
            });
            match post_to_gateway(config, "/analysis/summary", body).await {
                Ok(res) => println!("{}", res["summary"].as_str().unwrap_or_default()),
                Err(e) => {
                    log::error!("summary failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Some(Commands::Ask {
            config,
            channel,
            from,
            to,
            question,
        }) => {
            let body = serde_json::json!({
                "channelId": channel,
                "question": question,
                "startDate": from.unwrap_or_else(default_start),
                "endDate": to,
            });
            match post_to_gateway(config, "/analysis/chat", body).await {
                Ok(res) => println!("{}", res["answer"].as_str().unwrap_or_default()),
                Err(e) => {
                    log::error!("ask failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn default_start() -> NaiveDate {
    let today = Utc::now().date_naive();
    today.checked_sub_days(Days::new(7)).unwrap_or(today)
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(pulsar::config::default_config_path);
    let dir = pulsar::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_gateway(config_path: Option<PathBuf>, port: Option<u16>) -> anyhow::Result<()> {
    let (mut config, path) = pulsar::config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    log::info!("starting gateway on {}:{}", config.gateway.bind, config.gateway.port);
    pulsar::gateway::run_gateway(config, path).await
}

/// POST a JSON body to the local gateway and return the JSON answer. Non-2xx answers become errors.
async fn post_to_gateway(
    config_path: Option<PathBuf>,
    route: &str,
    body: serde_json::Value,
) -> anyhow::Result<serde_json::Value> {
    let (config, _) = pulsar::config::load_config(config_path)?;
    let url = format!(
        "{}{}",
        gateway_base_url(&config.gateway.bind, config.gateway.port),
        route
    );
    let res = reqwest::Client::new().post(&url).json(&body).send().await?;
    let status = res.status();
    let json: serde_json::Value = res.json().await?;
    if !status.is_success() {
        let message = json["error"].as_str().unwrap_or("request failed");
        anyhow::bail!("{} {}", status, message);
    }
    Ok(json)
}

/// Local URL for a gateway bound to `bind`. Wildcard binds map to loopback, IPv6 gets brackets.
fn gateway_base_url(bind: &str, port: u16) -> String {
    let bind = bind.trim().trim_start_matches('[').trim_end_matches(']');
    match bind {
        "0.0.0.0" | "" => format!("http://127.0.0.1:{}", port),
        "::" => format!("http://[::1]:{}", port),
        host if host.contains(':') => format!("http://[{}]:{}", host, port),
        host => format!("http://{}:{}", host, port),
    }
}
