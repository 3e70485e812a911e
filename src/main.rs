use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use tri_arbitrage::{config::RobotConfig, config::ServerConfig, server, utils::logger, Result};

#[derive(Parser)]
#[command(name = "tri-arbitrage")]
#[command(about = "Triangular arbitrage trading engine")]
#[command(version)]
struct Cli {
    /// Server configuration file path
    #[arg(long, default_value = "server_config.toml")]
    server_config: PathBuf,

    /// Robot configuration file path
    #[arg(long, default_value = "robot_config.toml")]
    robot_config: PathBuf,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Log file path
    #[arg(long, default_value = "logs/robot.log")]
    log_file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the control server hosting the engine
    Serve,
    /// Start the robot described by the robot configuration
    Start,
    /// Stop the running robot
    Stop,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    logger::init(&cli.log_level, &cli.log_file)?;
    info!("tri-arbitrage v{}", tri_arbitrage::VERSION);

    let server_config = ServerConfig::from_file(&cli.server_config)?;

    match cli.command {
        Commands::Serve => server::serve(&server_config).await,
        Commands::Start => {
            let robot_config = RobotConfig::from_file(&cli.robot_config)?;
            robot_config.validate()?;
            send_start(&server_config, &robot_config).await
        }
        Commands::Stop => send_stop(&server_config).await,
    }
}

async fn send_start(server: &ServerConfig, robot: &RobotConfig) -> Result<()> {
    let body = json!({
        "market": robot.market,
        "api_key": robot.api_key,
        "secret": robot.secret,
        "delta": robot.delta,
        "lot": robot.lot,
        "fee": robot.fee,
    });

    let response = reqwest::Client::new()
        .post(control_url(server))
        .json(&body)
        .send()
        .await?;
    print_reply(response).await
}

async fn send_stop(server: &ServerConfig) -> Result<()> {
    let response = reqwest::Client::new()
        .delete(control_url(server))
        .send()
        .await?;
    print_reply(response).await
}

fn control_url(server: &ServerConfig) -> String {
    format!("http://{}/robot", server.address())
}

#[derive(Debug, Default, Deserialize)]
struct ControlReply {
    status: Option<String>,
    error: Option<String>,
}

async fn print_reply(response: reqwest::Response) -> Result<()> {
    let status = response.status();
    let reply: ControlReply = response.json().await.unwrap_or_default();

    match reply.error {
        Some(error) => println!("{status}: {error}"),
        None => println!("{status}: {}", reply.status.unwrap_or_default()),
    }
    Ok(())
}
