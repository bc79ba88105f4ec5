//! Stub Resolver - CLI Entry Point

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use std::io;
use std::path::PathBuf;
use stub_resolver::transport::{HttpTransport, RawConnection};
use stub_resolver::{Registry, Request, ResolverConfig};
use tokio::io::AsyncWriteExt;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "stub-resolver",
    about = "HTTP stub resolution - priority selection, scenarios and fault injection",
    version
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "stubs.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,

    /// Print registered mappings as JSON
    #[arg(long)]
    dump_mappings: bool,

    /// Resolve a request line such as "GET /path?q=1" and print the
    /// response as written on the wire. Repeatable; scenario state carries
    /// over between requests.
    #[arg(short, long, value_name = "REQUEST")]
    resolve: Vec<String>,
}

/// Writes raw response bytes to stdout and reports connection faults.
struct StdoutConnection {
    out: tokio::io::Stdout,
}

#[async_trait]
impl RawConnection for StdoutConnection {
    async fn write_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.out.write_all(bytes).await?;
        self.out.flush().await
    }

    async fn close(&mut self) -> io::Result<()> {
        self.out.write_all(b"\n[connection closed]\n").await?;
        self.out.flush().await
    }

    fn reset(&mut self) -> io::Result<()> {
        println!("[connection reset]");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .with_writer(io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.print_config {
        println!("{}", include_str!("../demos/default-config.yaml"));
        return Ok(());
    }

    let config = if args.config.exists() {
        info!(path = ?args.config, "Loading configuration");
        ResolverConfig::from_file(&args.config)?
    } else if args.validate {
        anyhow::bail!("Configuration file not found: {:?}", args.config);
    } else {
        info!("Using default configuration (no stubs)");
        ResolverConfig::default()
    };

    if args.validate {
        config.validate()?;
        println!(
            "Configuration is valid ({} stubs defined)",
            config.stubs.len()
        );
        return Ok(());
    }

    let registry = Registry::from_config(&config)?;

    if args.dump_mappings {
        let mappings: Vec<_> = registry
            .mappings()
            .iter()
            .map(|m| serde_json::json!({ "id": m.id(), "stub": &**m }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&mappings)?);
    }

    for line in &args.resolve {
        let request = Request::parse_line(line);
        info!(method = %request.method, path = %request.path, "Resolving request");

        let response = registry.serve(&request)?;
        let mut transport = HttpTransport::new(StdoutConnection {
            out: tokio::io::stdout(),
        });
        response.apply_to(&mut transport).await?;
        println!();
    }

    if !args.resolve.is_empty() {
        let stats = registry.stats();
        info!(
            total = stats.requests_total,
            matched = stats.requests_matched,
            unmatched = stats.requests_unmatched,
            "Resolution finished"
        );
        for scenario in registry.scenarios() {
            info!(scenario = %scenario.name, state = %scenario.state, "Scenario state");
        }
    }

    Ok(())
}
