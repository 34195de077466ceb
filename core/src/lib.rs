// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// dnsfrag Core: payload reassembly from DNS query-name fragments
//
// Wire format (one fragment per A-record query):
//   <id>.<total>.<offset>.<data-label>[.<data-label>...].<top-domain>
//
//   id      opaque transfer identifier, shared by every fragment of a transfer
//   total   length of the encoded blob (decimal)
//   offset  byte offset of this fragment's data within the encoded blob
//   data    base32 chunk (a-z, 2-7; padding '0'), split across <=63 char labels

pub mod codec;
pub mod config;
pub mod error;
pub mod fragment;
pub mod pipeline;
pub mod responder;
pub mod store;

pub use codec::{assemble, encode_transfer, parse_query_name};
pub use config::TunnelConfig;
pub use error::{ConfigError, Error};
pub use fragment::{CompletedTransfer, Fragment, FragmentList};
pub use pipeline::{Tunnel, QUEUE_CAPACITY};
pub use responder::Responder;
pub use store::ReassemblyStore;
