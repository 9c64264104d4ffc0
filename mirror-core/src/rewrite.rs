//! Single-occurrence content rewriting for redirect files.
//!
//! A redirect file holds a path or URL. Mirroring it swaps one prefix for
//! another, so only the first match is replaced.

use std::path::Path;

use crate::error::{MirrorError, Result};

/// Replace the first occurrence of `search` in `text`.
///
/// An empty `search` leaves the text untouched.
pub fn rewrite_first(text: &str, search: &str, replace: &str) -> String {
    if search.is_empty() {
        return text.to_string();
    }
    text.replacen(search, replace, 1)
}

/// Decode `bytes` as UTF-8 and rewrite them with [`rewrite_first`].
///
/// `path` is only used to label a decode failure.
pub fn rewrite_bytes(bytes: &[u8], search: &str, replace: &str, path: &Path) -> Result<Vec<u8>> {
    let text = std::str::from_utf8(bytes).map_err(|source| MirrorError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(rewrite_first(text, search, replace).into_bytes())
}
