//! picoNavX host entry point.
//!
//! ```text
//! piconavx-host                          Run in the foreground
//! piconavx-host --config <path>          Load a custom config TOML
//! piconavx-host --gen-config             Print the default config
//! piconavx-host --gen-config <path>      Write the default config to a file
//! piconavx-host --simulate 2 --json      Serve two simulated boards, JSON output
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use piconavx_core::DataKind;
use piconavx_host::config::HostConfig;
use piconavx_host::service::HostService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "piconavx-host", about = "picoNavX telemetry host")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "piconavx-host.toml")]
    config: PathBuf,

    /// Print the default configuration (or write it to PATH) and exit.
    #[arg(long, value_name = "PATH")]
    gen_config: Option<Option<PathBuf>>,

    /// Override the listening port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Number of simulated boards to attach.
    #[arg(long, value_name = "N")]
    simulate: Option<u32>,

    /// Stream to select on every board: raw, ahrs, ahrspos, ypr or feed.
    #[arg(long, value_parser = parse_data_kind)]
    data_kind: Option<DataKind>,

    /// Print updates and reports as JSON lines on stdout.
    #[arg(long)]
    json: bool,
}

fn parse_data_kind(s: &str) -> Result<DataKind, String> {
    DataKind::try_from(s.to_ascii_uppercase().as_str()).map_err(|e| e.to_string())
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    match &cli.gen_config {
        Some(Some(path)) => {
            HostConfig::write_default(path)?;
            println!("wrote {}", path.display());
            return Ok(());
        }
        Some(None) => {
            println!("{}", toml::to_string_pretty(&HostConfig::default())?);
            return Ok(());
        }
        None => {}
    }

    let mut config = HostConfig::load(&cli.config);

    // Logs go to stderr so stdout stays clean for --json.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Some(port) = cli.port {
        config.network.port = port;
    }
    if let Some(boards) = cli.simulate {
        config.simulation.boards = boards;
    }
    if let Some(kind) = cli.data_kind {
        config.session.data_kind = kind;
    }
    if cli.json {
        config.logging.json = true;
    }

    info!("piconavx-host v{}", env!("CARGO_PKG_VERSION"));
    info!("listening on {}:{}", config.network.bind_address, config.network.port);
    info!("data kind: {:?}", config.session.data_kind);
    info!("simulated boards: {}", config.simulation.boards);

    let service = HostService::new(config);
    let stop = service.stop_handle();

    // Ctrl-C handler.
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.cancel();
    });

    service.run().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn gen_config_takes_an_optional_path() {
        let cli = Cli::parse_from(["piconavx-host", "--gen-config"]);
        assert_eq!(cli.gen_config, Some(None));
        let cli = Cli::parse_from(["piconavx-host", "--gen-config", "out.toml"]);
        assert_eq!(cli.gen_config, Some(Some(PathBuf::from("out.toml"))));
    }

    #[test]
    fn overrides_parse() {
        let cli = Cli::parse_from([
            "piconavx-host", "--port", "7000", "--simulate", "3", "--data-kind", "FEED", "--json",
        ]);
        assert_eq!(cli.port, Some(7000));
        assert_eq!(cli.simulate, Some(3));
        assert_eq!(cli.data_kind, Some(DataKind::Feed));
        assert!(cli.json);
    }
}
