// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Content hashing shared by the watcher, the build system, and the feed
//! generator.

use sha2::{Digest, Sha256};
use std::{fs::File, io::copy, path::Path};

/// Compute SHA-256 hex digest of a file's content.
///
/// # Errors
///
/// - Return [`std::io::Error`] if file cannot be read.
pub fn sha256_file(path: impl AsRef<Path>) -> std::io::Result<String> {
    let mut file = File::open(path.as_ref())?;
    let mut hasher = Sha256::new();
    copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs::write;

    #[test]
    fn digest_of_known_content() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("abc.txt");
        write(&path, "abc")?;

        assert_eq!(
            sha256_file(&path)?,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );

        Ok(())
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(sha256_file("/definitely/not/here").is_err());
    }
}
