//! Content-addressed hashing for template fingerprints and migration inputs.

use std::fs;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{TestDbError, TestDbResult};

/// Number of digest bytes kept in a rendered fingerprint. 16 bytes is 32 hex
/// characters, the width template database names are built from.
const FINGERPRINT_BYTES: usize = 16;

/// A rolling content hash. Each time more data is added, the hash updates
/// itself to include the digest of all previous contents, so the result
/// depends on both the contents and their order. Useful for hashing a
/// sequence of migration files or configuration fields.
#[derive(Clone)]
pub struct RecursiveHash {
    hasher: Sha256,
}

impl RecursiveHash {
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }

    /// Creates a hash seeded with the given `key=value` fields, in order.
    pub fn with_fields<'a, I>(fields: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut hash = Self::new();
        for (key, value) in fields {
            hash.add_field(key, value);
        }
        hash
    }

    /// Folds new content into the hash.
    pub fn add(&mut self, bytes: &[u8]) {
        let so_far = self.hasher.clone().finalize();
        let content = Sha256::digest(bytes);
        self.hasher
            .update(format!("{}={}\n", hex::encode(so_far), hex::encode(content)));
    }

    /// Folds a named configuration value into the hash. Any setting that
    /// affects the final schema of a database belongs here, so that changing
    /// it produces a different template.
    pub fn add_field(&mut self, key: &str, value: &str) {
        self.add(format!("{key}={value}").as_bytes());
    }

    /// Renders the digest as a 32-character lowercase hex string.
    pub fn finish(self) -> String {
        let digest = self.hasher.finalize();
        hex::encode(&digest[..FINGERPRINT_BYTES])
    }
}

impl Default for RecursiveHash {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns a unique hash based on the contents of the given files, in order.
pub fn hash_files<P: AsRef<Path>>(paths: &[P]) -> TestDbResult<String> {
    let mut hash = RecursiveHash::new();
    for path in paths {
        let path = path.as_ref();
        let contents = fs::read(path).map_err(|source| TestDbError::Io {
            path: path.display().to_string(),
            source,
        })?;
        hash.add(&contents);
    }
    Ok(hash.finish())
}

/// Returns a unique hash based on the contents of every `*.sql` file in the
/// given directory, in lexicographic filename order.
pub fn hash_dir<P: AsRef<Path>>(dir: P) -> TestDbResult<String> {
    let dir = dir.as_ref();
    let entries = fs::read_dir(dir).map_err(|source| TestDbError::Io {
        path: dir.display().to_string(),
        source,
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| TestDbError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "sql") {
            paths.push(path);
        }
    }
    paths.sort();
    hash_files(&paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashing_is_deterministic() {
        let mut a = RecursiveHash::new();
        a.add(b"CREATE TABLE cats (id BIGINT)");
        let mut b = RecursiveHash::new();
        b.add(b"CREATE TABLE cats (id BIGINT)");
        assert_eq!(a.finish(), b.finish());
    }

    #[test]
    fn fingerprint_is_32_lowercase_hex_chars() {
        let mut hash = RecursiveHash::new();
        hash.add(b"anything");
        let digest = hash.finish();
        assert_eq!(digest.len(), 32);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn order_of_contents_matters() {
        let mut ab = RecursiveHash::new();
        ab.add(b"one");
        ab.add(b"two");
        let mut ba = RecursiveHash::new();
        ba.add(b"two");
        ba.add(b"one");
        assert_ne!(ab.finish(), ba.finish());
    }

    #[test]
    fn fields_change_the_digest() {
        let a = RecursiveHash::with_fields([("Username", "pgtdbuser"), ("Capabilities", "NOSUPERUSER")]);
        let b = RecursiveHash::with_fields([("Username", "pgtdbuser"), ("Capabilities", "SUPERUSER")]);
        assert_ne!(a.finish(), b.finish());
    }

    #[test]
    fn hash_dir_sees_only_sql_files_in_order() {
        let dir = std::env::temp_dir().join(format!("testdb-hash-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("0001_initial.sql"), "CREATE TABLE a (id INT)").unwrap();
        fs::write(dir.join("0002_more.sql"), "CREATE TABLE b (id INT)").unwrap();
        fs::write(dir.join("notes.txt"), "not a migration").unwrap();

        let first = hash_dir(&dir).unwrap();
        assert_eq!(
            first,
            hash_files(&[dir.join("0001_initial.sql"), dir.join("0002_more.sql")]).unwrap()
        );

        fs::write(dir.join("0002_more.sql"), "CREATE TABLE c (id INT)").unwrap();
        assert_ne!(first, hash_dir(&dir).unwrap());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn hash_files_reports_missing_paths() {
        let err = hash_files(&["/definitely/not/a/real/path.sql"]).unwrap_err();
        assert!(matches!(err, TestDbError::Io { .. }));
    }
}
