use std::net::SocketAddr;

use anyhow::Result;
use clap::Parser;
use wristlink::{ExtraPeerPolicy, Options, RelayServer};

/// Pairing relay between a phone and a watch (or console) peer.
///
/// Listens for exactly two WebSocket clients and forwards every application
/// message arriving from one to the other, unmodified. When one side
/// disconnects, the survivor is told so it can prompt a reconnect.
#[derive(Parser, Debug)]
#[command(name = "wristlinkd", version)]
struct Args {
    /// Socket address to listen on.
    #[arg(long, default_value = "127.0.0.1:9000", env = "WRISTLINK_LISTEN")]
    listen: SocketAddr,

    /// Accept pre-RFC (sentinel-framed) clients as well.
    #[arg(long)]
    allow_legacy: bool,

    /// Split outbound messages larger than this many bytes into fragments.
    #[arg(long)]
    fragment_size: Option<usize>,

    /// Admit a third connection instead of refusing it; its traffic is
    /// ignored until a slot frees up.
    #[arg(long)]
    admit_extra_peers: bool,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    simple_logger::SimpleLogger::new().with_level(level).init()?;

    let policy = if args.admit_extra_peers {
        ExtraPeerPolicy::Admit
    } else {
        ExtraPeerPolicy::Refuse
    };
    let options = Options::default()
        .with_listen(args.listen)
        .with_legacy(args.allow_legacy)
        .with_auto_fragment_size(args.fragment_size)
        .with_extra_peer_policy(policy);

    let Some(server) = RelayServer::ensure_listening(options).await? else {
        log::info!("a relay is already listening on {}", args.listen);
        return Ok(());
    };

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => log::info!("shutting down"),
    }

    Ok(())
}
