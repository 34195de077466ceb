// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// UDP and TCP DNS listeners. Every parsed request is handed to the
// responder on its own task. UDP handlers are capped by a semaphore: when the
// tunnel's inbound queue is full and every handler is parked on it, the
// listener stops reading the socket and the kernel buffer absorbs (or drops)
// further datagrams.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dnsfrag_core::Responder;
use hickory_proto::op::Message;
use hickory_proto::serialize::binary::{BinDecodable, BinEncodable};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::framing;

/// Receive buffer for one UDP datagram (EDNS payload sizes fit).
const MAX_UDP_MESSAGE: usize = 4096;

/// Default cap on UDP queries being answered at once.
pub const MAX_CONCURRENT_QUERIES: usize = 1024;

/// How long a TCP connection may sit idle between queries.
const TCP_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn serve_udp(
    socket: Arc<UdpSocket>,
    responder: Arc<Responder>,
    max_in_flight: usize,
    shutdown: CancellationToken,
) {
    let permits = Arc::new(Semaphore::new(max_in_flight));
    let mut buf = vec![0u8; MAX_UDP_MESSAGE];
    loop {
        let permit = tokio::select! {
            () = shutdown.cancelled() => break,
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let (len, peer) = tokio::select! {
            () = shutdown.cancelled() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "udp receive failed");
                    continue;
                }
            },
        };

        let request = match Message::from_bytes(&buf[..len]) {
            Ok(request) => request,
            Err(e) => {
                debug!(peer = %peer, error = %e, "dropping unparseable datagram");
                continue;
            }
        };

        let socket = Arc::clone(&socket);
        let responder = Arc::clone(&responder);
        tokio::spawn(async move {
            if let Err(e) = answer_udp(&socket, &responder, &request, peer).await {
                warn!(peer = %peer, error = %e, "udp reply failed");
            }
            drop(permit);
        });
    }
    info!("udp listener stopped");
}

async fn answer_udp(
    socket: &UdpSocket,
    responder: &Responder,
    request: &Message,
    peer: SocketAddr,
) -> anyhow::Result<()> {
    let Some(reply) = responder.respond(request).await else {
        return Ok(());
    };
    socket.send_to(&reply.to_bytes()?, peer).await?;
    Ok(())
}

pub async fn serve_tcp(
    listener: TcpListener,
    responder: Arc<Responder>,
    shutdown: CancellationToken,
) {
    loop {
        let (stream, peer) = tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            },
        };

        let responder = Arc::clone(&responder);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = shutdown.cancelled() => {}
                result = handle_connection(stream, &responder) => {
                    if let Err(e) = result {
                        debug!(peer = %peer, error = %e, "tcp connection closed with error");
                    }
                }
            }
        });
    }
    info!("tcp listener stopped");
}

async fn handle_connection(mut stream: TcpStream, responder: &Responder) -> anyhow::Result<()> {
    loop {
        let wire = match tokio::time::timeout(TCP_IDLE_TIMEOUT, framing::read_message(&mut stream))
            .await
        {
            Ok(read) => match read? {
                Some(wire) => wire,
                None => return Ok(()),
            },
            Err(_) => return Ok(()),
        };

        let request = Message::from_bytes(&wire)?;
        let Some(reply) = responder.respond(&request).await else {
            continue;
        };
        framing::write_message(&mut stream, &reply.to_bytes()?).await?;
    }
}
