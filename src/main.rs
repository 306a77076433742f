use clap::{Parser, Subcommand};
use lumpsum::api::{RunArgs, run_cli, run_http_server};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "lumpsum",
    about = "Monte Carlo projection of a lump-sum investment under random annual returns"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one simulation and print the outcome summary
    Run(RunArgs),
    /// Serve the JSON simulation API
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Run(args) => run_cli(args),
        Command::Serve { port } => run_http_server(port).await.map_err(anyhow::Error::from),
    };

    if let Err(e) = result {
        tracing::error!("{e:#}");
        std::process::exit(1);
    }
}
