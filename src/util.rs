//! Shared utility functions

use sha2::{Digest, Sha256};

/// 获取当前 UTC 时间戳（毫秒）
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Generate a Snowflake-style i64 for use as resource ID.
///
/// Layout (53 bits, fits in JavaScript's Number.MAX_SAFE_INTEGER):
///   - 41 bits: milliseconds since 2024-01-01 UTC (~69 years)
///   - 12 bits: random (4096 values per ms)
pub fn snowflake_id() -> i64 {
    use rand::Rng;
    // Custom epoch: 2024-01-01 00:00:00 UTC
    const EPOCH_MS: i64 = 1_704_067_200_000;
    let now = now_millis();
    let ts = (now - EPOCH_MS) & 0x1FF_FFFF_FFFF; // 41 bits
    let rand_bits: i64 = rand::thread_rng().gen_range(0..0x1000); // 12 bits
    (ts << 12) | rand_bits
}

/// Human-facing reservation reference, e.g. "JP-4821".
///
/// Only ~9000 codes exist; the reservation table has a UNIQUE index and the
/// caller retries on collision.
pub fn generate_reference_code() -> String {
    use rand::Rng;
    let digits: u32 = rand::thread_rng().gen_range(1000..10000);
    format!("JP-{digits}")
}

pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Deterministic JSON serialization: object keys sorted at every level.
///
/// Used for idempotency request hashing so that key order in the incoming
/// payload does not change the hash.
pub fn stable_stringify(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(stable_stringify).collect();
            format!("[{}]", inner.join(","))
        }
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let entries: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::Value::String(k.clone()),
                        stable_stringify(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", entries.join(","))
        }
        other => other.to_string(),
    }
}

/// Hash of the normalized request payload, for idempotency conflict detection.
pub fn request_hash(value: &serde_json::Value) -> String {
    sha256_hex(&stable_stringify(value))
}
