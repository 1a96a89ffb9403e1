use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "image-overlay-rust",
    version,
    about = "Overlay text onto images over HTTP or as a one-shot job"
)]
struct Cli {
    /// Extra settings file merged over the defaults
    #[arg(short = 'r', long = "settings", global = true)]
    settings: Option<PathBuf>,

    /// Log at debug level
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server
    Serve {
        /// Bind host (overrides settings and HOST)
        #[arg(long = "host")]
        host: Option<String>,

        /// Bind port (overrides settings and PORT)
        #[arg(short = 'p', long = "port")]
        port: Option<u16>,
    },
    /// Run the processing job configured through environment variables
    Process,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = image_overlay_rust::load_settings(cli.settings.as_deref())?;
    image_overlay_rust::logging::init(&settings.log_level, cli.verbose)?;

    match cli.command {
        Command::Serve { host, port } => {
            if let Some(host) = host {
                settings.host = host;
            }
            if let Some(port) = port {
                settings.port = port;
            }
            image_overlay_rust::server::run_server(settings).await
        }
        Command::Process => {
            let env = image_overlay_rust::JobEnv::from_env()?;
            let manifest = image_overlay_rust::job::run(&settings, &env).await?;
            info!("job: wrote {}", manifest.output);
            println!("{}", serde_json::to_string_pretty(&manifest)?);
            Ok(())
        }
    }
}
