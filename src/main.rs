use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use watchshare::{demo, web};

#[derive(Parser, Debug)]
#[command(author, version, about = "Share your screen via a room code or a web link.")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the web server that serves the host and join pages.
    Web(web::Args),
    /// Run a host and a viewer in process and walk through a full session.
    Demo(demo::Args),
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };

    match &args.command {
        Commands::Web(_) => {
            // Create ~/.watchshare directory if it doesn't exist
            let home_dir = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            let log_dir = format!("{home_dir}/.watchshare");
            std::fs::create_dir_all(&log_dir)?;

            let log_file = std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(format!("{log_dir}/watchshare-web.log"))?;

            // Log to both console and file
            use tracing_subscriber::fmt::writer::MakeWriterExt;
            let writer = std::io::stdout.and(log_file);

            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(writer)
                .init();
        }
        Commands::Demo(_) => {
            tracing_subscriber::fmt().with_env_filter(filter()).init();
        }
    }

    match args.command {
        Commands::Web(web_args) => {
            info!("Starting watchshare web server");
            web::run_web_server(web_args).await
        }
        Commands::Demo(demo_args) => {
            info!("Starting watchshare demo");
            demo::run_demo(demo_args).await
        }
    }
}
