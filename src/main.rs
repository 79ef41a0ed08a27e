//! J2K/RTP round-trip harness CLI
//!
//! Reads a complete JPEG 2000 codestream from disk, payloads it at a
//! configurable MTU, feeds the resulting packets straight into a
//! [`Depayloader`] in-process (optionally dropping some to exercise loss
//! recovery), and reports whether the stream round-tripped. There is no
//! capture or network transport here — both are out-of-scope
//! collaborators for this crate; see `config.rs` for the shape this
//! binary's configuration takes.

#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::{Context, Result};
use clap::Parser;
use rust_j2k_rtp::config::Config;
use rust_j2k_rtp::rtp::{payload, Depayloader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "j2k-rtp")]
#[command(about = "Payloads a J2K codestream, depayloads it, and reports whether it round-tripped")]
#[command(version)]
struct Cli {
    /// Path to a complete JPEG 2000 codestream.
    input: String,

    /// Path to a configuration file; overrides the default MTU if present.
    #[arg(short, long)]
    config: Option<String>,

    /// Maximum transmission unit; overrides the config file value.
    #[arg(short, long)]
    mtu: Option<usize>,

    /// Zero-indexed packet numbers to drop, simulating loss (repeatable).
    #[arg(short, long = "drop")]
    drop_packets: Vec<usize>,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    fmt().with_env_filter(filter).with_target(false).init();

    let config = match &cli.config {
        Some(path) => Config::load(path).with_context(|| format!("loading config {path}"))?,
        None => Config::default(),
    };
    let mtu = cli.mtu.unwrap_or(config.j2k_rtp.mtu);

    info!(input = %cli.input, mtu, "reading codestream");
    let codestream = std::fs::read(&cli.input).with_context(|| format!("reading {}", cli.input))?;

    let packets = payload(&codestream, 0, mtu).context("payloading codestream")?;
    info!(packets = packets.len(), "payloaded");

    let mut depay = Depayloader::new();
    let mut frames = Vec::new();
    for (i, packet) in packets.iter().enumerate() {
        if cli.drop_packets.contains(&i) {
            warn!(index = i, "dropping packet to simulate loss");
            continue;
        }
        let bytes = packet.to_bytes();
        frames.extend(depay.ingest(&bytes, packet.timestamp, packet.marker));
    }

    match frames.len() {
        0 => {
            warn!("no frame was reassembled");
            anyhow::bail!("round trip failed: no frame reassembled");
        }
        1 => {
            let frame = &frames[0];
            let mut expected = codestream.clone();
            if !expected.ends_with(&[0xFF, 0xD9]) {
                expected.extend_from_slice(&[0xFF, 0xD9]);
            }
            if frame[..] == expected[..] {
                info!(bytes = frame.len(), "round trip succeeded");
            } else {
                warn!(
                    expected = expected.len(),
                    got = frame.len(),
                    "round trip produced a frame that differs from the input"
                );
                anyhow::bail!("round trip mismatch");
            }
        }
        n => {
            warn!(frames = n, "expected exactly one reassembled frame");
        }
    }

    Ok(())
}
