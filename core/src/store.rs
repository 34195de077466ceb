// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! Reassembly store: in-flight transfers keyed by transfer id.
//!
//! Mutated by two actors only, the ingestion worker and the expiration
//! sweep, serialized by a single lock. A transfer leaves the store either by
//! completing (in the same critical section that decodes it) or by expiring.
//!
//! Memory is bounded on every axis a sender controls: the number of
//! transfers, the declared size of each, the bytes buffered per transfer
//! (twice its declared size), and the number of completion markers.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::codec;
use crate::config::TunnelConfig;
use crate::error::Error;
use crate::fragment::{Fragment, FragmentList};

#[derive(Debug, Default)]
struct StoreState {
    /// Incomplete, unexpired transfers
    transfers: HashMap<String, FragmentList>,
    /// Recently completed ids, mapped to when they may be reused
    completed: HashMap<String, Instant>,
    /// Keys of `completed`, oldest first
    completed_order: VecDeque<String>,
}

/// Buffered bytes allowed per transfer, as a multiple of its declared size.
const BUFFER_FACTOR: usize = 2;

/// Thread-safe store of partially received transfers.
#[derive(Debug)]
pub struct ReassemblyStore {
    expiration: Duration,
    max_transfers: usize,
    max_transfer_size: usize,
    state: Mutex<StoreState>,
}

impl ReassemblyStore {
    pub fn new(config: &TunnelConfig) -> Self {
        Self {
            expiration: config.expiration,
            max_transfers: config.max_transfers,
            max_transfer_size: config.max_transfer_size,
            state: Mutex::new(StoreState::default()),
        }
    }

    /// Add a fragment to its transfer.
    ///
    /// Returns the decoded payload once the transfer's fragments cover the
    /// whole encoded blob. A transfer whose assembly or decoding fails stays
    /// in the store and is retried when its next fragment arrives.
    pub async fn ingest(&self, fragment: Fragment) -> Result<Option<Vec<u8>>, Error> {
        self.ingest_at(fragment, Instant::now()).await
    }

    async fn ingest_at(&self, fragment: Fragment, now: Instant) -> Result<Option<Vec<u8>>, Error> {
        let mut state = self.state.lock().await;
        let StoreState {
            transfers,
            completed,
            completed_order,
        } = &mut *state;

        if completed.contains_key(&fragment.id) {
            return Err(Error::AlreadyCompleted(fragment.id));
        }
        if fragment.offset >= fragment.total_size {
            return Err(Error::OffsetOutOfRange {
                offset: fragment.offset,
                total_size: fragment.total_size,
            });
        }

        let id = fragment.id.clone();
        let expires_at = now + self.expiration;
        let in_flight = transfers.len();

        let list = match transfers.entry(id.clone()) {
            Entry::Occupied(entry) => {
                let list = entry.into_mut();
                if list.total_size != fragment.total_size {
                    return Err(Error::SizeMismatch {
                        id,
                        declared: list.total_size,
                        got: fragment.total_size,
                    });
                }
                list
            }
            Entry::Vacant(entry) => {
                if fragment.total_size > self.max_transfer_size {
                    return Err(Error::TransferTooLarge {
                        id,
                        total_size: fragment.total_size,
                        limit: self.max_transfer_size,
                    });
                }
                if in_flight >= self.max_transfers {
                    return Err(Error::CapacityExceeded {
                        id,
                        limit: self.max_transfers,
                    });
                }
                entry.insert(FragmentList::new(fragment.total_size, expires_at))
            }
        };

        let limit = list.total_size.saturating_mul(BUFFER_FACTOR);
        let buffered = list.received_len_with(&fragment);
        if buffered > limit {
            return Err(Error::TransferOverflow {
                id,
                buffered,
                limit,
            });
        }

        list.insert(fragment);
        list.expires_at = expires_at;

        if !list.is_complete() {
            debug!(
                id = %id,
                covered = list.covered_len(),
                total = list.total_size,
                "fragment stored"
            );
            return Ok(None);
        }

        let payload = codec::assemble(list)?;
        transfers.remove(&id);

        // Markers share the transfer cap; the oldest is forgotten first.
        if completed_order.len() >= self.max_transfers {
            if let Some(oldest) = completed_order.pop_front() {
                completed.remove(&oldest);
            }
        }
        completed.insert(id.clone(), expires_at);
        completed_order.push_back(id);
        Ok(Some(payload))
    }

    /// Drop every transfer that expired before `now`.
    ///
    /// Returns the number of transfers evicted. Completion markers past
    /// their window are cleared as well; they expire in the order they were
    /// created, so only the front of the queue is inspected.
    pub async fn sweep(&self, now: Instant) -> usize {
        let mut state = self.state.lock().await;
        let StoreState {
            transfers,
            completed,
            completed_order,
        } = &mut *state;

        let before = transfers.len();
        transfers.retain(|_, list| list.expires_at >= now);

        while let Some(id) = completed_order.front() {
            if completed.get(id).is_some_and(|until| *until >= now) {
                break;
            }
            if let Some(id) = completed_order.pop_front() {
                completed.remove(&id);
            }
        }

        before - transfers.len()
    }

    /// Number of in-flight transfers.
    pub async fn len(&self) -> usize {
        self.state.lock().await.transfers.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Whether a transfer with this id is in flight.
    pub async fn contains(&self, id: &str) -> bool {
        self.state.lock().await.transfers.contains_key(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ReassemblyStore {
        ReassemblyStore::new(&TunnelConfig::new("tunnel.example.com"))
    }

    fn fragment(id: &str, total_size: usize, offset: usize, data: &str) -> Fragment {
        Fragment {
            id: id.to_string(),
            total_size,
            offset,
            data: data.to_string(),
        }
    }

    #[tokio::test]
    async fn single_fragment_completes_and_is_removed() {
        let store = store();
        let payload = store.ingest(fragment("msg1", 8, 0, "nbuq0000")).await.unwrap();
        assert_eq!(payload.as_deref(), Some(&b"hi"[..]));
        assert!(!store.contains("msg1").await);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn completes_out_of_order() {
        let store = store();
        assert!(store.ingest(fragment("msg2", 8, 4, "0000")).await.unwrap().is_none());
        assert!(store.contains("msg2").await);
        let payload = store.ingest(fragment("msg2", 8, 0, "nbuq")).await.unwrap();
        assert_eq!(payload.as_deref(), Some(&b"hi"[..]));
    }

    #[tokio::test]
    async fn duplicates_do_not_complete_or_re_emit() {
        let store = store();
        for _ in 0..3 {
            assert!(store.ingest(fragment("dup", 8, 0, "nbuq")).await.unwrap().is_none());
        }
        assert!(store.ingest(fragment("dup", 8, 4, "0000")).await.unwrap().is_some());

        // Retransmission after completion is refused rather than re-emitted.
        let err = store.ingest(fragment("dup", 8, 4, "0000")).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyCompleted(_)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn gap_is_not_completion() {
        let store = store();
        // Six bytes received, but the ranges overlap and only cover half the blob.
        store.ingest(fragment("gap", 8, 0, "nbu")).await.unwrap();
        let result = store.ingest(fragment("gap", 8, 1, "buq")).await.unwrap();
        assert!(result.is_none());
        assert!(store.contains("gap").await);
    }

    #[tokio::test]
    async fn size_redeclaration_is_rejected() {
        let store = store();
        store.ingest(fragment("sz", 16, 0, "nbuq")).await.unwrap();
        let err = store.ingest(fragment("sz", 4, 0, "nbuq")).await.unwrap_err();
        assert!(matches!(
            err,
            Error::SizeMismatch {
                declared: 16,
                got: 4,
                ..
            }
        ));
        assert!(store.contains("sz").await);
    }

    #[tokio::test]
    async fn decode_failure_keeps_transfer() {
        let store = store();
        let err = store.ingest(fragment("bad", 8, 0, "nbu!0000")).await.unwrap_err();
        assert!(matches!(err, Error::Codec(_)));
        assert!(store.contains("bad").await);

        // A corrected fragment at the same offset replaces the bad one.
        let payload = store.ingest(fragment("bad", 8, 0, "nbuq0000")).await.unwrap();
        assert_eq!(payload.as_deref(), Some(&b"hi"[..]));
    }

    #[tokio::test]
    async fn offset_out_of_range_is_rejected_on_arrival() {
        let store = store();
        let err = store.ingest(fragment("oor", 8, 9, "aa")).await.unwrap_err();
        assert!(matches!(err, Error::OffsetOutOfRange { offset: 9, .. }));
        assert!(!store.contains("oor").await);

        let payload = store.ingest(fragment("oor", 8, 0, "nbuq0000")).await.unwrap();
        assert_eq!(payload.as_deref(), Some(&b"hi"[..]));
    }

    #[tokio::test]
    async fn flooding_one_transfer_stays_bounded() {
        let config = TunnelConfig {
            max_transfers: 1,
            max_transfer_size: 8,
            ..TunnelConfig::new("tunnel.example.com")
        };
        let store = ReassemblyStore::new(&config);

        store.ingest(fragment("x", 8, 1, "a")).await.unwrap();
        for offset in 8..5_008 {
            let err = store.ingest(fragment("x", 8, offset, "aa")).await.unwrap_err();
            assert!(matches!(err, Error::OffsetOutOfRange { .. }));
        }

        // Overlapping fragments stop being accepted at twice the declared size.
        // The last byte is never sent, so the transfer cannot complete.
        let mut overflowed = 0;
        for offset in 1..7 {
            let data = &"aaaaaa"[..7 - offset];
            if let Err(Error::TransferOverflow { limit: 16, .. }) =
                store.ingest(fragment("x", 8, offset, data)).await
            {
                overflowed += 1;
            }
        }
        assert!(overflowed > 0);

        let state = store.state.lock().await;
        let list = &state.transfers["x"];
        assert!(list.fragments.len() <= 8);
        assert!(list.received_len() <= 16);
    }

    #[tokio::test]
    async fn completion_markers_are_capped() {
        let config = TunnelConfig {
            max_transfers: 2,
            ..TunnelConfig::new("tunnel.example.com")
        };
        let store = ReassemblyStore::new(&config);

        for id in ["a", "b", "c"] {
            assert!(store.ingest(fragment(id, 8, 0, "nbuq0000")).await.unwrap().is_some());
        }
        {
            let state = store.state.lock().await;
            assert_eq!(state.completed.len(), 2);
            assert_eq!(state.completed_order.len(), 2);
        }

        // "a" was forgotten to make room; "c" is still remembered.
        assert!(store.ingest(fragment("a", 8, 0, "nbuq0000")).await.unwrap().is_some());
        let err = store.ingest(fragment("c", 8, 0, "nbuq0000")).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyCompleted(_)));
    }

    #[tokio::test]
    async fn enforces_limits() {
        let config = TunnelConfig {
            max_transfers: 1,
            max_transfer_size: 16,
            ..TunnelConfig::new("tunnel.example.com")
        };
        let store = ReassemblyStore::new(&config);

        let err = store.ingest(fragment("big", 32, 0, "aaaa")).await.unwrap_err();
        assert!(matches!(err, Error::TransferTooLarge { .. }));

        store.ingest(fragment("one", 8, 0, "nbuq")).await.unwrap();
        let err = store.ingest(fragment("two", 8, 0, "nbuq")).await.unwrap_err();
        assert!(matches!(err, Error::CapacityExceeded { limit: 1, .. }));

        // Existing transfers still make progress at the cap.
        assert!(store.ingest(fragment("one", 8, 4, "0000")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn sweep_evicts_only_expired() {
        let store = store();
        let start = Instant::now();
        store.ingest_at(fragment("old", 8, 0, "nbuq"), start).await.unwrap();
        store
            .ingest_at(fragment("new", 8, 0, "nbuq"), start + Duration::from_secs(20))
            .await
            .unwrap();

        assert_eq!(store.sweep(start + Duration::from_secs(30)).await, 0);
        assert_eq!(store.sweep(start + Duration::from_secs(31)).await, 1);
        assert!(!store.contains("old").await);
        assert!(store.contains("new").await);
    }

    #[tokio::test]
    async fn activity_refreshes_expiry() {
        let store = store();
        let start = Instant::now();
        store.ingest_at(fragment("slow", 24, 0, "aaaa"), start).await.unwrap();
        store
            .ingest_at(fragment("slow", 24, 4, "aaaa"), start + Duration::from_secs(25))
            .await
            .unwrap();

        assert_eq!(store.sweep(start + Duration::from_secs(40)).await, 0);
        assert!(store.contains("slow").await);
    }

    #[tokio::test]
    async fn completed_id_is_reusable_after_window() {
        let store = store();
        let start = Instant::now();
        store.ingest_at(fragment("r", 8, 0, "nbuq0000"), start).await.unwrap();
        store.sweep(start + Duration::from_secs(31)).await;

        let payload = store
            .ingest_at(fragment("r", 8, 0, "nbuq0000"), start + Duration::from_secs(32))
            .await
            .unwrap();
        assert!(payload.is_some());
    }
}
