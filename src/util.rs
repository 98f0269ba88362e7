use chrono::Local;
use sha1::{Digest, Sha1};

/// Current local time, for log line prefixes.
pub fn timestr() -> String {
    Local::now().format("%H:%M:%S%.3f").to_string()
}

pub fn sha1_hash(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}
