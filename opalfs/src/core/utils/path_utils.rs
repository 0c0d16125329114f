// SPDX-License-Identifier: MIT

//! Path utilities for the volume namespaces.
//!
//! Every path accepted by the public API is absolute (`/`-rooted) and
//! `/`-separated. These helpers validate and split such paths without
//! touching any namespace-specific encoding rules.

#[cfg(all(not(feature = "std"), feature = "alloc"))]
use alloc::{vec, vec::Vec};

use crate::core::error::*;

/// Splits an absolute path into its components.
///
/// Returns a Vec of non-empty components; the root path yields an
/// empty Vec.
pub fn split_path(path: &str) -> Vec<&str> {
    let mut parts = vec![];

    for part in path.split('/') {
        if !part.is_empty() {
            parts.push(part);
        }
    }

    parts
}

/// Validates that a caller-supplied path is absolute and normalized.
pub fn check_abs_path(path: &str) -> IsoResult<()> {
    if !path.starts_with('/') {
        return Err(IsoError::Invalid("path must be absolute"));
    }
    for part in path[1..].split('/') {
        if part.is_empty() && path != "/" {
            return Err(IsoError::Invalid("empty path component"));
        }
        if part == "." || part == ".." {
            return Err(IsoError::Invalid("path must not contain . or .."));
        }
    }
    Ok(())
}

/// Splits an absolute path into (parent components, final name).
pub fn split_parent(path: &str) -> IsoResult<(Vec<&str>, &str)> {
    check_abs_path(path)?;
    let mut parts = split_path(path);
    let name = parts
        .pop()
        .ok_or(IsoError::Invalid("the root cannot be addressed here"))?;
    Ok((parts, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_path() {
        assert_eq!(split_path("/"), Vec::<&str>::new());
        assert_eq!(split_path("/A/B/C"), ["A", "B", "C"]);
    }

    #[test]
    fn test_check_abs_path() {
        assert!(check_abs_path("/FOO.;1").is_ok());
        assert!(check_abs_path("FOO").is_err());
        assert!(check_abs_path("/A//B").is_err());
        assert!(check_abs_path("/A/../B").is_err());
    }

    #[test]
    fn test_split_parent() {
        let (parents, name) = split_parent("/DIR1/DIR2/FILE.;1").unwrap();
        assert_eq!(parents, ["DIR1", "DIR2"]);
        assert_eq!(name, "FILE.;1");
        assert!(split_parent("/").is_err());
    }
}
