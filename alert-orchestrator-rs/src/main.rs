use std::process;

use alert_orchestrator_rs::cli::{run, Cli};
use clap::Parser;
use dotenv::dotenv;
use log::error;

#[tokio::main]
async fn main() {
    dotenv().ok();
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    match run(cli).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            error!("{:#}", e);
            process::exit(1);
        }
    }
}
