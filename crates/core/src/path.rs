//! Repository-relative artifact paths.

use crate::digest::DigestAlgorithm;
use crate::error::{Error, Result};

/// Validate a repository-relative path.
///
/// Rejects empty paths, absolute paths, backslashes, control characters,
/// empty segments and `.`/`..` components.
pub fn validate_relative_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(Error::InvalidPath("path is empty".to_string()));
    }
    if path.starts_with('/') {
        return Err(Error::InvalidPath(format!("path must be relative: {path}")));
    }
    if path.contains('\\') {
        return Err(Error::InvalidPath(format!(
            "path contains a backslash: {path}"
        )));
    }
    if path.chars().any(char::is_control) {
        return Err(Error::InvalidPath(
            "path contains control characters".to_string(),
        ));
    }
    for segment in path.split('/') {
        match segment {
            "" => {
                return Err(Error::InvalidPath(format!(
                    "path contains an empty segment: {path}"
                )));
            }
            "." | ".." => {
                return Err(Error::InvalidPath(format!(
                    "path contains a relative component: {path}"
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Validate a storage or repository identifier.
pub fn validate_id(kind: &str, id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(Error::InvalidPath(format!("{kind} id is empty")));
    }
    if id.contains('/') || id.contains('\\') || id == "." || id == ".." {
        return Err(Error::InvalidPath(format!("invalid {kind} id: {id}")));
    }
    Ok(())
}

/// Last segment of a `/`-separated path.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Parent of a `/`-separated path, or `None` at the top level.
pub fn parent(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(parent, _)| parent)
}

/// Join two `/`-separated fragments, tolerating empty parts.
pub fn join(base: &str, rest: &str) -> String {
    let base = base.trim_end_matches('/');
    let rest = rest.trim_start_matches('/');
    match (base.is_empty(), rest.is_empty()) {
        (true, _) => rest.to_string(),
        (_, true) => base.to_string(),
        _ => format!("{base}/{rest}"),
    }
}

/// Split a checksum file path into its base path and algorithm.
///
/// `a/b.jar.sha1` yields `("a/b.jar", Sha1)`. Paths without a known
/// checksum extension yield `None`.
pub fn split_checksum_suffix(path: &str) -> Option<(&str, DigestAlgorithm)> {
    let (base, ext) = path.rsplit_once('.')?;
    if base.is_empty() || base.ends_with('/') || ext.contains('/') {
        return None;
    }
    DigestAlgorithm::from_extension(ext).map(|alg| (base, alg))
}
