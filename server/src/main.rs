// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// dnsfrag Server: authoritative listener for a fragment-carrying zone
//
// Answers every query for the configured domain with a TTL-0 CNAME to an
// inert sink. A-record query names are reassembled into payloads, which are
// written to stdout one per line as each transfer completes.

mod framing;
mod listener;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use dnsfrag_core::config::DEFAULT_SINK_DOMAIN;
use dnsfrag_core::{encode_transfer, CompletedTransfer, Responder, Tunnel, TunnelConfig};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "dnsfrag-server", about = "DNS listener that reassembles payloads from query names")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Domain fragments are sent under (e.g. tunnel.example.com)
    #[arg(long, global = true)]
    top_domain: Option<String>,

    /// Listen address (UDP, and TCP unless --no-tcp)
    #[arg(long, default_value = "[::]:53")]
    listen: String,

    /// Drop a transfer after this long without a fragment (e.g. "30s", "5m")
    #[arg(long, default_value = "30s", value_parser = parse_duration)]
    expiration: Duration,

    /// How often expired transfers are swept
    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    sweep_interval: Duration,

    /// Domain every answer aliases to
    #[arg(long, default_value = DEFAULT_SINK_DOMAIN)]
    sink: String,

    /// Maximum number of transfers in flight
    #[arg(long, default_value_t = 10_000)]
    max_transfers: usize,

    /// Maximum declared encoded size of one transfer (bytes)
    #[arg(long, default_value_t = 1 << 20)]
    max_transfer_size: usize,

    /// Serve UDP only
    #[arg(long)]
    no_tcp: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Print the query names that carry a payload to this server
    Encode {
        /// Transfer id (one DNS label)
        #[arg(long)]
        id: String,

        /// Encoded characters per fragment
        #[arg(long, default_value_t = 48)]
        chunk: usize,

        /// Payload file (stdin if omitted)
        input: Option<PathBuf>,
    },
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (digits, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(split) => s.split_at(split),
        None => (s, "s"),
    };
    let n: u64 = digits
        .parse()
        .map_err(|e| format!("invalid duration {s:?}: {e}"))?;
    let secs = |factor: u64| {
        n.checked_mul(factor)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration {s:?} is too large"))
    };
    match unit {
        "ms" => Ok(Duration::from_millis(n)),
        "s" => Ok(Duration::from_secs(n)),
        "m" => secs(60),
        "h" => secs(3600),
        _ => Err(format!("invalid duration unit {unit:?} (use ms, s, m or h)")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let Some(top_domain) = args.top_domain.clone() else {
        anyhow::bail!("provide --top-domain (the zone delegated to this server)");
    };

    if let Some(Command::Encode { id, chunk, input }) = &args.command {
        return encode(id, *chunk, input.as_ref(), &top_domain);
    }

    let config = TunnelConfig {
        top_domain,
        expiration: args.expiration,
        sweep_interval: args.sweep_interval,
        sink_domain: args.sink.clone(),
        max_transfers: args.max_transfers,
        max_transfer_size: args.max_transfer_size,
    };
    serve(&args, config).await
}

async fn serve(args: &Args, config: TunnelConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let (tunnel, completed) = Tunnel::spawn(&config, shutdown.clone())?;
    let responder = Arc::new(Responder::from_config(&config, tunnel.sender())?);

    let udp = Arc::new(UdpSocket::bind(&args.listen).await?);
    tokio::spawn(listener::serve_udp(
        udp,
        Arc::clone(&responder),
        listener::MAX_CONCURRENT_QUERIES,
        shutdown.clone(),
    ));

    if !args.no_tcp {
        let tcp = TcpListener::bind(&args.listen).await?;
        tokio::spawn(listener::serve_tcp(tcp, responder, shutdown.clone()));
    }

    tokio::spawn(write_payloads(completed, shutdown.clone()));

    info!(
        listen = %args.listen,
        tcp = !args.no_tcp,
        sink = %config.sink_domain,
        "dnsfrag server started"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    shutdown.cancel();
    tunnel.join().await;
    Ok(())
}

/// Default consumer: one payload per line on stdout.
async fn write_payloads(mut completed: mpsc::Receiver<CompletedTransfer>, shutdown: CancellationToken) {
    let mut stdout = tokio::io::stdout();
    loop {
        let transfer = tokio::select! {
            () = shutdown.cancelled() => break,
            transfer = completed.recv() => match transfer {
                Some(transfer) => transfer,
                None => break,
            },
        };

        let mut line = transfer.payload;
        line.push(b'\n');
        if let Err(e) = stdout.write_all(&line).await {
            error!(id = %transfer.id, error = %e, "failed to write payload");
            continue;
        }
        if let Err(e) = stdout.flush().await {
            error!(error = %e, "failed to flush stdout");
        }
    }
}

fn encode(
    id: &str,
    chunk: usize,
    input: Option<&PathBuf>,
    top_domain: &str,
) -> anyhow::Result<()> {
    let payload = match input {
        Some(path) => std::fs::read(path)?,
        None => {
            let mut buf = Vec::new();
            std::io::Read::read_to_end(&mut std::io::stdin(), &mut buf)?;
            buf
        }
    };

    for name in encode_transfer(id, &payload, top_domain, chunk)? {
        println!("{name}");
    }
    Ok(())
}
