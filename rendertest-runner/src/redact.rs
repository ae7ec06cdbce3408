// Copyright (c) The rendertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Redact signatures from logs written by tests.
//!
//! License diagnostics and renderer output can contain `sig="..."` attributes. They are masked
//! with asterisks of the same length before logs are kept in the output directory. Logs may
//! contain arbitrary binary data, so redaction works on bytes.

use camino::Utf8Path;
use regex::bytes::{Captures, Regex};
use std::{borrow::Cow, io, sync::LazyLock};

static SIGNATURE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?-u)sig="(?P<sig>.+)""#).unwrap());

/// Masks every `sig="..."` value in `contents`.
pub fn redact_signatures(contents: &[u8]) -> Cow<'_, [u8]> {
    SIGNATURE_REGEX.replace_all(contents, |captures: &Captures<'_>| {
        let len = captures.name("sig").map_or(0, |sig| sig.len());
        let mut replacement = Vec::with_capacity(len + 6);
        replacement.extend_from_slice(b"sig=\"");
        replacement.resize(replacement.len() + len, b'*');
        replacement.push(b'"');
        replacement
    })
}

/// Redacts the file at `path` in place. Missing files are ignored.
pub fn redact_file(path: &Utf8Path) -> io::Result<()> {
    let contents = match std::fs::read(path) {
        Ok(contents) => contents,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(error) => return Err(error),
    };
    if let Cow::Owned(redacted) = redact_signatures(&contents) {
        std::fs::write(path, redacted)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::tempdir;

    #[test]
    fn masks_signatures() {
        let input = b"license sig=\"abc123\" ok\nsecond line";
        let redacted = redact_signatures(input);
        assert_eq!(&*redacted, b"license sig=\"******\" ok\nsecond line");
        assert_eq!(redacted.len(), input.len());
    }

    #[test]
    fn binary_data_is_preserved() {
        let input = b"\xff\xfe sig=\"\x00\x01\" \x80";
        let redacted = redact_signatures(input);
        assert_eq!(&*redacted, b"\xff\xfe sig=\"**\" \x80");
    }

    #[test]
    fn untouched_without_signatures() {
        let input = b"nothing to see";
        assert!(matches!(redact_signatures(input), Cow::Borrowed(_)));
    }

    #[test]
    fn redact_in_place() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rlm.diag");
        std::fs::write(&path, "sig=\"secret\"").unwrap();
        redact_file(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "sig=\"******\"");

        redact_file(&dir.path().join("missing.log")).unwrap();
    }
}
