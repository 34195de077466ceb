// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! Ingestion pipeline.
//!
//! A single worker drains query names from the inbound queue, parses them,
//! feeds the store and pushes completed transfers onto the outbound queue.
//! A second task sweeps expired transfers on a fixed interval. Both queues
//! are bounded and block when full, so a slow consumer eventually stalls
//! the DNS handlers feeding the inbound queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::codec;
use crate::config::TunnelConfig;
use crate::error::{ConfigError, Error};
use crate::fragment::CompletedTransfer;
use crate::store::ReassemblyStore;

/// Capacity of both the inbound name queue and the outbound transfer queue.
pub const QUEUE_CAPACITY: usize = 256;

/// Handle to a running ingestion pipeline.
pub struct Tunnel {
    inbound: mpsc::Sender<String>,
    store: Arc<ReassemblyStore>,
    tracker: TaskTracker,
}

impl Tunnel {
    /// Start the ingestion worker and the sweep task.
    ///
    /// Returns the handle and the receiving end of the outbound queue. Both
    /// tasks exit when `shutdown` is cancelled; neither queue is drained.
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        config: &TunnelConfig,
        shutdown: CancellationToken,
    ) -> Result<(Self, mpsc::Receiver<CompletedTransfer>), ConfigError> {
        config.validate()?;

        let (inbound_tx, inbound_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(QUEUE_CAPACITY);
        let store = Arc::new(ReassemblyStore::new(config));

        let tracker = TaskTracker::new();
        tracker.spawn(ingest_loop(
            config.normalized_top_domain(),
            Arc::clone(&store),
            inbound_rx,
            outbound_tx,
            shutdown.clone(),
        ));
        tracker.spawn(sweep_loop(
            Arc::clone(&store),
            config.sweep_interval,
            shutdown,
        ));
        tracker.close();

        info!(
            top_domain = %config.normalized_top_domain(),
            expiration = ?config.expiration,
            sweep_interval = ?config.sweep_interval,
            "tunnel started"
        );

        let tunnel = Self {
            inbound: inbound_tx,
            store,
            tracker,
        };
        Ok((tunnel, outbound_rx))
    }

    /// Sender side of the inbound query-name queue.
    pub fn sender(&self) -> mpsc::Sender<String> {
        self.inbound.clone()
    }

    pub fn store(&self) -> &Arc<ReassemblyStore> {
        &self.store
    }

    /// Wait for both tasks to exit.
    pub async fn join(self) {
        drop(self.inbound);
        self.tracker.wait().await;
    }
}

async fn ingest_loop(
    top_domain: String,
    store: Arc<ReassemblyStore>,
    mut inbound: mpsc::Receiver<String>,
    outbound: mpsc::Sender<CompletedTransfer>,
    shutdown: CancellationToken,
) {
    loop {
        let name = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            name = inbound.recv() => match name {
                Some(name) => name,
                None => break,
            },
        };

        let fragment = match codec::parse_query_name(&top_domain, &name) {
            Ok(fragment) => fragment,
            Err(e @ Error::DomainMismatch { .. }) => {
                debug!(error = %e, "ignoring query");
                continue;
            }
            Err(e) => {
                warn!(name = %name, error = %e, "ignoring malformed fragment");
                continue;
            }
        };

        let id = fragment.id.clone();
        let payload = match store.ingest(fragment).await {
            Ok(Some(payload)) => payload,
            Ok(None) => continue,
            Err(e @ Error::AlreadyCompleted(_)) => {
                debug!(error = %e, "ignoring retransmission");
                continue;
            }
            Err(e) => {
                warn!(id = %id, error = %e, "fragment not applied");
                continue;
            }
        };

        info!(id = %id, len = payload.len(), "transfer complete");
        let transfer = CompletedTransfer { id, payload };
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            sent = outbound.send(transfer) => {
                if let Err(mpsc::error::SendError(transfer)) = sent {
                    warn!(id = %transfer.id, "no consumer for completed transfers, payload dropped");
                }
            }
        }
    }
    debug!("ingestion worker stopped");
}

async fn sweep_loop(store: Arc<ReassemblyStore>, period: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let evicted = store.sweep(Instant::now()).await;
                if evicted > 0 {
                    info!(evicted, "dropped expired transfers");
                }
            }
        }
    }
    debug!("sweep task stopped");
}
