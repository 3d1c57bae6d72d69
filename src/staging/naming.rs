//! Artifact naming rules
//!
//! Encryption appends [`ENCRYPTED_SUFFIX`]. Decryption reverses it with a
//! rule that depends on the container format: token containers drop the
//! last extension, the raw and envelope containers remove every occurrence
//! of the suffix. Both rules are kept exactly so names round-trip the same
//! way old artifacts did.

use crate::crypto::{Algorithm, ContainerFormat};
use crate::error::{FileCryptError, Result};

/// Suffix appended to encrypted artifacts
pub const ENCRYPTED_SUFFIX: &str = ".enc";

/// Longest accepted file name in bytes
pub const MAX_NAME_LEN: usize = 255;

/// Name of the encrypted artifact for an input file
pub fn encrypted_name(name: &str) -> Result<String> {
    validate_name(&format!("{}{}", name, ENCRYPTED_SUFFIX))
}

/// Name of the decrypted artifact for an encrypted input file
pub fn decrypted_name(algorithm: Algorithm, name: &str) -> Result<String> {
    let stripped = match algorithm.format() {
        ContainerFormat::Token => strip_extension(name).to_string(),
        ContainerFormat::RawCbc | ContainerFormat::Envelope => name.replace(ENCRYPTED_SUFFIX, ""),
    };
    validate_name(&stripped)
}

/// Drop the last extension; leading dots never start an extension
fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) if name[..idx].chars().any(|c| c != '.') => &name[..idx],
        _ => name,
    }
}

/// Reduce a client-supplied file name to a safe base name
///
/// Directory components are discarded, so `../../etc/passwd` becomes `passwd`.
pub fn sanitize_filename(name: &str) -> Result<String> {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    validate_name(base)
}

/// Check that a name is a single, non-special path component
pub fn validate_name(name: &str) -> Result<String> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(FileCryptError::invalid(format!("invalid file name {:?}", name)));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(FileCryptError::invalid(format!(
            "file name longer than {} bytes",
            MAX_NAME_LEN
        )));
    }
    if name.chars().any(|c| c == '/' || c == '\\' || c.is_control()) {
        return Err(FileCryptError::invalid(format!(
            "file name {:?} contains a separator or control character",
            name
        )));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypted_name() {
        assert_eq!(encrypted_name("report.pdf").unwrap(), "report.pdf.enc");
        assert_eq!(encrypted_name("a.enc").unwrap(), "a.enc.enc");
    }

    #[test]
    fn test_token_decrypted_name_drops_last_extension() {
        for alg in [Algorithm::AesSmall, Algorithm::AesLarge] {
            assert_eq!(decrypted_name(alg, "report.pdf.enc").unwrap(), "report.pdf");
            assert_eq!(decrypted_name(alg, "a.enc.enc").unwrap(), "a.enc");
            assert_eq!(decrypted_name(alg, "archive.bin").unwrap(), "archive");
            assert_eq!(decrypted_name(alg, "noext").unwrap(), "noext");
        }
    }

    #[test]
    fn test_token_leading_dots_are_not_extensions() {
        assert_eq!(decrypted_name(Algorithm::AesLarge, ".enc").unwrap(), ".enc");
        assert_eq!(decrypted_name(Algorithm::AesLarge, "..enc").unwrap(), "..enc");
        assert_eq!(decrypted_name(Algorithm::AesLarge, ".bashrc.enc").unwrap(), ".bashrc");
    }

    #[test]
    fn test_replace_all_decrypted_name() {
        for alg in [Algorithm::Blowfish, Algorithm::Rsa] {
            assert_eq!(decrypted_name(alg, "report.pdf.enc").unwrap(), "report.pdf");
            assert_eq!(decrypted_name(alg, "a.enc.enc").unwrap(), "a");
            assert_eq!(decrypted_name(alg, "my.encoded.txt.enc").unwrap(), "myoded.txt");
        }
        assert!(decrypted_name(Algorithm::Blowfish, ".enc").is_err());
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("report.pdf").unwrap(), "report.pdf");
        assert_eq!(sanitize_filename("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\me\\notes.txt").unwrap(), "notes.txt");
        assert!(sanitize_filename("").is_err());
        assert!(sanitize_filename("dir/").is_err());
        assert!(sanitize_filename("..").is_err());
        assert!(sanitize_filename("bad\0name").is_err());
        assert!(sanitize_filename(&"x".repeat(300)).is_err());
    }

    #[test]
    fn test_validate_name_rejects_separators() {
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("a\\b").is_err());
        assert!(validate_name(".").is_err());
        assert_eq!(validate_name("ok.txt").unwrap(), "ok.txt");
    }
}
