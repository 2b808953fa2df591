//! Tunnelium - a Trojan-over-WebSocket tunneling proxy

use std::path::PathBuf;

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use tunnelium::app::Runtime;
use tunnelium::config::Config;
use tunnelium::error::Result;

fn main() -> Result<()> {
    let args = Args::parse();

    if args.version {
        print_version();
        return Ok(());
    }

    if args.gen_config {
        let config = Config::default_server();
        println!("{}", serde_json::to_string_pretty(&config).unwrap());
        return Ok(());
    }

    // Load configuration
    let config = if let Some(path) = &args.config {
        Config::load(path)?
    } else {
        Config::default_server()
    };

    // Initialize logging: RUST_LOG wins over the config file
    let log_level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse().ok())
        .or_else(|| config.log.level.parse().ok())
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    if args.config.is_none() {
        info!("No config file specified, using default server config");
    }

    info!("Tunnelium v{} starting...", env!("CARGO_PKG_VERSION"));

    // Run the tunnel
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let runtime = Runtime::from_config(&config)?;
        runtime.run().await
    })?;

    info!("Goodbye!");
    Ok(())
}

/// Command line arguments
struct Args {
    config: Option<PathBuf>,
    gen_config: bool,
    version: bool,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let mut config = None;
        let mut gen_config = false;
        let mut version = false;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "-c" | "--config" => {
                    if i + 1 < args.len() {
                        config = Some(PathBuf::from(&args[i + 1]));
                        i += 1;
                    }
                }
                "--gen-config" => gen_config = true,
                "-v" | "--version" => version = true,
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                arg if !arg.starts_with('-') && config.is_none() => {
                    // Positional argument: treat as config file
                    config = Some(PathBuf::from(arg));
                }
                _ => {}
            }
            i += 1;
        }

        Self {
            config,
            gen_config,
            version,
        }
    }
}

fn print_help() {
    println!(
        r#"Tunnelium - a Trojan-over-WebSocket tunneling proxy

USAGE:
    tunnelium [OPTIONS]

OPTIONS:
    -c, --config <FILE>     Path to configuration file
    --gen-config            Generate an example server config
    -v, --version           Print version information
    -h, --help              Print help information

EXAMPLES:
    tunnelium -c config.json
    tunnelium --gen-config > config.json
"#
    );
}

fn print_version() {
    println!("Tunnelium v{}", env!("CARGO_PKG_VERSION"));
    println!("A Trojan-over-WebSocket tunneling proxy");
}
