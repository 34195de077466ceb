// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Fragment codec: query name <-> Fragment, fragments <-> payload.
//
// Encoded blob alphabet: "abcdefghijklmnopqrstuvwxyz234567", padding '0'.
// The padding character is not '=' because '=' is not valid in a hostname.

use std::sync::LazyLock;

use data_encoding::{Encoding, Specification};

use crate::config::normalize_domain;
use crate::error::Error;
use crate::fragment::{Fragment, FragmentList};

/// Base32 symbols, in value order.
pub const ALPHABET: &str = "abcdefghijklmnopqrstuvwxyz234567";
/// Padding character of the encoded blob.
pub const PADDING: char = '0';

/// Maximum length of a single DNS label (RFC 1035).
pub const MAX_LABEL_LEN: usize = 63;
/// Maximum length of a DNS name in presentation form, without the root dot.
pub const MAX_NAME_LEN: usize = 253;

/// Labels before the data: id, total size, offset.
const HEADER_LABELS: usize = 3;

static TUNNEL_BASE32: LazyLock<Encoding> = LazyLock::new(|| {
    let mut spec = Specification::new();
    spec.symbols.push_str(ALPHABET);
    spec.padding = Some(PADDING);
    spec.check_trailing_bits = false;
    spec.encoding()
        .expect("tunnel base32 specification is statically valid")
});

/// The tunnel's base32 encoding.
pub fn tunnel_base32() -> &'static Encoding {
    &TUNNEL_BASE32
}

/// Parse a query name into a fragment.
///
/// The name must end with `.<top_domain>`; what precedes it is split into
/// `id`, `total`, `offset` and one or more data labels, which are joined
/// without separator. Matching is case-insensitive and a trailing root dot
/// on either side is ignored.
pub fn parse_query_name(top_domain: &str, name: &str) -> Result<Fragment, Error> {
    let top_domain = normalize_domain(top_domain);
    let name = normalize_domain(name);

    let payload = name
        .strip_suffix(top_domain.as_str())
        .and_then(|rest| rest.strip_suffix('.'))
        .ok_or_else(|| Error::DomainMismatch {
            name: name.clone(),
            top_domain: top_domain.clone(),
        })?;

    let labels: Vec<&str> = payload.split('.').collect();
    if labels.len() <= HEADER_LABELS {
        return Err(Error::MalformedFragment(format!(
            "name has {} labels but expected at least {}",
            labels.len(),
            HEADER_LABELS + 1
        )));
    }

    let total_size = parse_number("total size", labels[1])?;
    let offset = parse_number("offset", labels[2])?;

    let data = labels[HEADER_LABELS..].concat();
    if data.is_empty() {
        return Err(Error::MalformedFragment("fragment carries no data".to_string()));
    }

    Ok(Fragment {
        id: labels[0].to_string(),
        total_size,
        offset,
        data,
    })
}

fn parse_number(field: &str, label: &str) -> Result<usize, Error> {
    label
        .parse()
        .map_err(|e| Error::MalformedFragment(format!("{field} {label:?}: {e}")))
}

/// Reassemble a transfer's encoded blob and decode it.
///
/// Fragments are written into a `total_size` buffer in ascending offset
/// order, so where ranges overlap the fragment with the higher offset wins.
/// Data running past `total_size` is truncated.
pub fn assemble(list: &FragmentList) -> Result<Vec<u8>, Error> {
    let total_size = list.total_size();
    let mut blob = vec![0u8; total_size];

    for fragment in list.fragments() {
        if fragment.offset >= total_size {
            return Err(Error::OffsetOutOfRange {
                offset: fragment.offset,
                total_size,
            });
        }
        let end = fragment.end().min(total_size);
        let len = end - fragment.offset;
        blob[fragment.offset..end].copy_from_slice(&fragment.data.as_bytes()[..len]);
    }

    Ok(tunnel_base32().decode(&blob)?)
}

/// Produce the query names a sender issues to transfer `payload`.
///
/// The encoded blob is cut every `chunk_len` characters; each chunk becomes
/// one fragment, split into labels of at most 63 characters. An empty
/// payload yields no names.
pub fn encode_transfer(
    id: &str,
    payload: &[u8],
    top_domain: &str,
    chunk_len: usize,
) -> Result<Vec<String>, Error> {
    if id.is_empty() || id.len() > MAX_LABEL_LEN || id.contains('.') {
        return Err(Error::InvalidTransferId(id.to_string()));
    }
    if chunk_len == 0 {
        return Err(Error::InvalidChunkLength);
    }

    let top_domain = normalize_domain(top_domain);
    let blob = tunnel_base32().encode(payload);
    let total_size = blob.len();

    let mut names = Vec::with_capacity(total_size.div_ceil(chunk_len));
    for offset in (0..total_size).step_by(chunk_len) {
        let chunk = &blob[offset..(offset + chunk_len).min(total_size)];
        let name = format!(
            "{id}.{total_size}.{offset}.{}.{top_domain}",
            split_labels(chunk).join(".")
        );
        if name.len() > MAX_NAME_LEN {
            return Err(Error::NameTooLong {
                len: name.len(),
                max: MAX_NAME_LEN,
            });
        }
        names.push(name);
    }

    Ok(names)
}

// `chunk` is base32 output, so every index is a char boundary.
fn split_labels(chunk: &str) -> Vec<&str> {
    (0..chunk.len())
        .step_by(MAX_LABEL_LEN)
        .map(|start| &chunk[start..(start + MAX_LABEL_LEN).min(chunk.len())])
        .collect()
}
