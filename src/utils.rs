use rand::{Rng, distributions::Alphanumeric};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// Reads a file of `key:value` lines into a map, e.g. the password file with
/// `reader:bcrypt-hash` entries. Keys and values are trimmed; empty lines are
/// skipped and lines without a colon are warned about and ignored.
pub fn read_colon_separated_file<P: AsRef<Path>>(path: P) -> io::Result<HashMap<String, String>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut map = HashMap::new();

    for line_result in reader.lines() {
        let line = line_result?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match trimmed.split_once(':') {
            Some((key, value)) => {
                map.insert(key.trim().to_string(), value.trim().to_string());
            }
            None => log::warn!("Skipping malformed line (no colon found): '{line}'"),
        }
    }

    Ok(map)
}

pub fn generate_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}

/// Digest of a bearer token as stored server-side; a dump of the state never
/// contains usable tokens.
pub fn token_hash(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn generated_ids_are_distinct_and_sized() {
        let a = generate_id();
        let b = generate_id();
        assert_eq!(a.len(), 16);
        assert_ne!(a, b);
    }

    #[test]
    fn token_hash_is_stable_and_hex() {
        let h = token_hash("abc123");
        assert_eq!(h, token_hash("abc123"));
        assert_ne!(h, token_hash("abc124"));
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn parses_colon_separated_lines_and_skips_junk() {
        let path = std::env::temp_dir().join(format!("readtracker-passwd-{}", generate_id()));
        {
            let mut file = File::create(&path).unwrap();
            writeln!(file, "ana: hash-a ").unwrap();
            writeln!(file).unwrap();
            writeln!(file, "no colon here").unwrap();
            writeln!(file, "luis:hash-b").unwrap();
        }

        let map = read_colon_separated_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(map.len(), 2);
        assert_eq!(map.get("ana").map(String::as_str), Some("hash-a"));
        assert_eq!(map.get("luis").map(String::as_str), Some("hash-b"));
    }
}
