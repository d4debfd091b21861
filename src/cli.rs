//! CLI interface for the voice conversation server

use clap::{Parser, Subcommand};
use anyhow::Result;

#[derive(Parser)]
#[command(name = "my-agent")]
#[command(about = "Real-time voice conversation server", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the full web server (auth + voice conversation endpoints)
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Enable HTTPS
        #[arg(long)]
        https: bool,
        /// Path to SSL certificate
        #[arg(long)]
        cert: Option<String>,
        /// Path to SSL private key
        #[arg(long)]
        key: Option<String>,
    },
    /// Start the real-time voice conversation server standalone
    VoiceServer {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Enable HTTPS
        #[arg(long)]
        https: bool,
        /// Path to SSL certificate
        #[arg(long)]
        cert: Option<String>,
        /// Path to SSL private key
        #[arg(long)]
        key: Option<String>,
    },
    /// Manage stored credentials and view configuration
    Config {
        /// Set your OpenRouter API key
        #[arg(long)]
        set_api_key: Option<String>,
        /// Display current configuration
        #[arg(long)]
        show: bool,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None => {
            print_usage();
        }
        Some(Commands::Serve { port, host, https, cert, key }) => {
            println!("Starting web server on {}:{}", host, port);
            if https {
                println!("✓ HTTPS enabled");
            }
            crate::server::start(&host, port, https, cert, key).await?;
        }
        Some(Commands::VoiceServer { port, host, https, cert, key }) => {
            println!("Starting voice conversation server on {}:{}", host, port);
            println!("  GET /conversation/stream (WebSocket), POST /tts/stream, GET /healthz");
            crate::server::start(&host, port, https, cert, key).await?;
        }
        Some(Commands::Config { set_api_key, show }) => {
            if let Some(key) = set_api_key {
                crate::security::set_api_key(&key)?;
                println!("OpenRouter API key stored securely in keyring.");
            } else if show {
                crate::config::show_config()?;
            } else {
                print_usage();
            }
        }
    }

    Ok(())
}

fn print_usage() {
    println!("Usage:");
    println!("  my-agent serve                Start the web server");
    println!("  my-agent voice-server          Start the voice conversation server");
    println!("  my-agent config --set-api-key <key>");
    println!("  my-agent config --show");
}
