// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Error types for fragment parsing, reassembly and configuration.
//
// None of these are fatal: each one is scoped to a single query or transfer
// and is logged by the ingestion worker, never surfaced in a DNS reply.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("domain {name} is not under top domain {top_domain}")]
    DomainMismatch { name: String, top_domain: String },

    #[error("malformed fragment: {0}")]
    MalformedFragment(String),

    #[error("fragment offset {offset} >= total size {total_size}")]
    OffsetOutOfRange { offset: usize, total_size: usize },

    #[error("base32 decode failed: {0}")]
    Codec(#[from] data_encoding::DecodeError),

    #[error("transfer {id} declared total size {declared}, fragment declares {got}")]
    SizeMismatch {
        id: String,
        declared: usize,
        got: usize,
    },

    #[error("transfer {id} declares {total_size} encoded bytes, limit is {limit}")]
    TransferTooLarge {
        id: String,
        total_size: usize,
        limit: usize,
    },

    #[error("{limit} transfers already in flight, rejecting new transfer {id}")]
    CapacityExceeded { id: String, limit: usize },

    #[error("transfer {id} would buffer {buffered} bytes, limit is {limit}")]
    TransferOverflow {
        id: String,
        buffered: usize,
        limit: usize,
    },

    #[error("transfer {0} already completed")]
    AlreadyCompleted(String),

    #[error("invalid transfer id {0:?}: must be 1-63 characters without dots")]
    InvalidTransferId(String),

    #[error("query name is {len} characters, DNS allows at most {max}")]
    NameTooLong { len: usize, max: usize },

    #[error("chunk length must be greater than zero")]
    InvalidChunkLength,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("top domain must not be empty")]
    EmptyTopDomain,

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("{0} must be greater than zero")]
    ZeroLimit(&'static str),

    #[error("invalid sink domain {domain}: {source}")]
    InvalidSink {
        domain: String,
        #[source]
        source: hickory_proto::error::ProtoError,
    },
}
