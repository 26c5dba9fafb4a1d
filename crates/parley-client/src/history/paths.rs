//! Location of per-user history files
//!
//! `<data_dir>/history/<sanitized>-<hash8>.sqlite3`, where `hash8` is the first
//! eight hex characters of the SHA-256 of the exact username. The hash keeps
//! usernames that sanitize to the same text in separate files.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Directory under the data root that holds the store files
pub const HISTORY_DIR: &str = "history";

/// Extension of a store file
pub const STORE_EXTENSION: &str = "sqlite3";

/// Keep ASCII alphanumerics, `-` and `_`; everything else becomes `_`
pub fn sanitize_username(username: &str) -> String {
    let sanitized: String = username
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.is_empty() {
        "anonymous".to_string()
    } else {
        sanitized
    }
}

/// First eight hex characters of SHA-256(username)
pub fn username_digest(username: &str) -> String {
    let digest = Sha256::digest(username.as_bytes());
    hex::encode(&digest[..4])
}

pub fn store_file_name(username: &str) -> String {
    format!(
        "{}-{}.{}",
        sanitize_username(username),
        username_digest(username),
        STORE_EXTENSION
    )
}

/// Full path of `username`'s store under `data_dir`
pub fn store_path(data_dir: &Path, username: &str) -> PathBuf {
    data_dir.join(HISTORY_DIR).join(store_file_name(username))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sanitize_replaces_path_characters() {
        assert_eq!(sanitize_username("alice"), "alice");
        assert_eq!(sanitize_username("bob_the-2nd"), "bob_the-2nd");
        assert_eq!(sanitize_username("../etc/passwd"), "___etc_passwd");
        assert_eq!(sanitize_username("zoë"), "zo_");
        assert_eq!(sanitize_username(""), "anonymous");
    }

    #[test]
    fn test_colliding_sanitized_names_get_distinct_files() {
        assert_eq!(sanitize_username("a/b"), sanitize_username("a.b"));
        assert_ne!(store_file_name("a/b"), store_file_name("a.b"));
    }

    #[test]
    fn test_store_path_layout() {
        let path = store_path(Path::new("/data"), "carol");
        assert!(path.starts_with("/data/history"));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("carol-"));
        assert!(name.ends_with(".sqlite3"));
        assert_eq!(name.len(), "carol-".len() + 8 + ".sqlite3".len());
    }

    proptest! {
        #[test]
        fn store_path_stays_inside_history_dir(username in ".{0,40}") {
            let path = store_path(Path::new("/data"), &username);
            prop_assert_eq!(path.parent(), Some(Path::new("/data/history")));

            let name = store_file_name(&username);
            prop_assert!(name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')));
            prop_assert!(name.ends_with(".sqlite3"));
        }
    }
}
