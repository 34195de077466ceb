// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>

//! Fragment and in-progress transfer records.

use std::collections::BTreeMap;

use tokio::time::Instant;

/// One parsed query name: a slice of a transfer's encoded blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Transfer identifier
    pub id: String,
    /// Declared length of the whole encoded blob
    pub total_size: usize,
    /// Position of `data` within the encoded blob
    pub offset: usize,
    /// Encoded characters carried by this fragment
    pub data: String,
}

impl Fragment {
    /// End of the byte range this fragment writes (exclusive).
    pub fn end(&self) -> usize {
        self.offset.saturating_add(self.data.len())
    }
}

/// Fragments received so far for one transfer.
///
/// Keyed by offset, so redelivering a fragment overwrites the earlier copy
/// and iteration is always in ascending offset order. Covered byte ranges
/// are tracked as merged intervals alongside the fragments.
#[derive(Debug, Clone)]
pub struct FragmentList {
    pub(crate) total_size: usize,
    pub(crate) fragments: BTreeMap<usize, Fragment>,
    pub(crate) expires_at: Instant,
    /// Sum of stored data lengths
    received: usize,
    /// Disjoint covered ranges within `[0, total_size)`, start -> end
    coverage: BTreeMap<usize, usize>,
    covered: usize,
}

impl FragmentList {
    pub fn new(total_size: usize, expires_at: Instant) -> Self {
        Self {
            total_size,
            fragments: BTreeMap::new(),
            expires_at,
            received: 0,
            coverage: BTreeMap::new(),
            covered: 0,
        }
    }

    pub fn total_size(&self) -> usize {
        self.total_size
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn fragments(&self) -> impl Iterator<Item = &Fragment> {
        self.fragments.values()
    }

    /// Store a fragment at its offset, replacing any fragment already there.
    ///
    /// Data past `total_size` is cut off, since assembly never reads it.
    pub fn insert(&mut self, mut fragment: Fragment) {
        let keep = self.stored_len(&fragment);
        if fragment.data.is_char_boundary(keep) {
            fragment.data.truncate(keep);
        }

        let offset = fragment.offset;
        let len = fragment.data.len();
        let replaced = self.fragments.insert(offset, fragment);
        let replaced_len = replaced.as_ref().map_or(0, |old| old.data.len());
        self.received = self.received - replaced_len + len;

        if replaced_len > len {
            self.rebuild_coverage();
        } else {
            self.cover(offset, offset.saturating_add(len));
        }
    }

    /// Bytes of `fragment` that would be kept by [`insert`](Self::insert).
    pub fn stored_len(&self, fragment: &Fragment) -> usize {
        fragment
            .data
            .len()
            .min(self.total_size.saturating_sub(fragment.offset))
    }

    /// What [`received_len`](Self::received_len) would be after inserting `fragment`.
    pub fn received_len_with(&self, fragment: &Fragment) -> usize {
        let replaced = self
            .fragments
            .get(&fragment.offset)
            .map_or(0, |old| old.data.len());
        self.received - replaced + self.stored_len(fragment)
    }

    /// Sum of the data lengths of all stored fragments.
    pub fn received_len(&self) -> usize {
        self.received
    }

    /// Number of bytes in `[0, total_size)` written by at least one fragment.
    pub fn covered_len(&self) -> usize {
        self.covered
    }

    /// True once every byte of the encoded blob has been received.
    pub fn is_complete(&self) -> bool {
        self.covered >= self.total_size
    }

    fn cover(&mut self, start: usize, end: usize) {
        let mut start = start.min(self.total_size);
        let mut end = end.min(self.total_size);
        if end <= start {
            return;
        }

        if let Some((&s, &e)) = self.coverage.range(..=start).next_back() {
            if e >= start {
                start = s;
                end = end.max(e);
                self.coverage.remove(&s);
                self.covered -= e - s;
            }
        }
        while let Some((&s, &e)) = self.coverage.range(start..=end).next() {
            end = end.max(e);
            self.coverage.remove(&s);
            self.covered -= e - s;
        }

        self.coverage.insert(start, end);
        self.covered += end - start;
    }

    // A shorter fragment replaced a longer one, so coverage may have shrunk.
    fn rebuild_coverage(&mut self) {
        self.coverage.clear();
        self.covered = 0;
        let ranges: Vec<(usize, usize)> = self
            .fragments
            .values()
            .map(|f| (f.offset, f.end()))
            .collect();
        for (start, end) in ranges {
            self.cover(start, end);
        }
    }
}

/// A reassembled and decoded transfer, handed to the outbound queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedTransfer {
    pub id: String,
    pub payload: Vec<u8>,
}
