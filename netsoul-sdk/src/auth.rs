//! Challenge digest for `ext_user_log`.
//!
//! The server greets with a random hash plus the client's host and port as it
//! sees them. The client proves knowledge of the password with
//! `md5("{hash}-{host}/{port}{password}")` rendered as lowercase hex.
//! MD5 is what the server checks; it cannot be swapped for anything stronger.

use md5::{Digest, Md5};

use crate::message::Challenge;

pub fn compute_digest(hash: &str, host: &str, port: &str, password: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(format!("{hash}-{host}/{port}{password}").as_bytes());
    hex::encode(hasher.finalize())
}

/// Digest for a parsed `salut` greeting.
pub fn digest_for(challenge: &Challenge, password: &str) -> String {
    compute_digest(&challenge.hash, &challenge.host, &challenge.port, password)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_known_vectors() {
        assert_eq!(compute_digest("a", "b", "c", "pw"), "0cfbc664b0fbeaa839a6129c940ba88f");
        assert_eq!(compute_digest("", "", "", ""), "5fe672850e674ee20db50b5e1cf27a19");
    }

    #[test]
    fn is_deterministic() {
        assert_eq!(compute_digest("a", "b", "c", "pw"), compute_digest("a", "b", "c", "pw"));
    }

    #[test]
    fn every_input_changes_the_digest() {
        let base = compute_digest("a", "b", "c", "pw");
        let variants = [
            compute_digest("x", "b", "c", "pw"),
            compute_digest("a", "x", "c", "pw"),
            compute_digest("a", "b", "x", "pw"),
            compute_digest("a", "b", "c", "px"),
        ];
        for v in &variants {
            assert_ne!(v, &base);
        }
    }

    #[test]
    fn uses_challenge_fields() {
        let challenge = Challenge {
            socket: "12".into(),
            hash: "0123abcd".into(),
            host: "10.0.0.1".into(),
            port: "4242".into(),
            timestamp: "1285000000".into(),
        };
        let digest = digest_for(&challenge, "secret");
        assert_eq!(digest, "e38aa722525f3699f1c01609c5089b9f");
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
