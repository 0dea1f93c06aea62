use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use realtime_hub::{
    cli::{Cli, Command},
    client,
    config::HubSettings,
    server::Server,
};

fn init_tracing() {
    use std::io::IsTerminal;
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(std::io::stdout().is_terminal())
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => {
            let server = Server::bind(HubSettings::from(args)).await?;
            let addr = server.local_addr()?;
            info!("hub listening on {}", addr);
            if let Err(err) = server.run_until_ctrl_c().await {
                warn!("server exited with error: {err:?}");
                return Err(err);
            }
        }
        Command::Client(args) => client::run(args).await?,
    }

    Ok(())
}
