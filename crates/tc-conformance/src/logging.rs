use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tc_core::HostBuffer;
use tc_runtime::now_unix_ms;

pub const LOG_SCHEMA_VERSION: &str = "tc-case-log/v1";
pub const SUITE_ID: &str = "tensor_conformance";

const RESERVED_KEYS: [&str; 15] = [
    "schema_version",
    "ts_unix_ms",
    "suite_id",
    "scenario_id",
    "device",
    "seed",
    "env_fingerprint",
    "input_digests",
    "output_digests",
    "duration_ms",
    "artifact_refs",
    "replay_command",
    "outcome",
    "reason_code",
    "mode",
];

/// One JSONL line describing the outcome of a scenario on one device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructuredCaseLog {
    pub schema_version: &'static str,
    pub ts_unix_ms: u64,
    pub suite_id: &'static str,
    pub scenario_id: String,
    pub device: String,
    pub seed: u64,
    pub env_fingerprint: String,
    pub input_digests: Vec<String>,
    pub output_digests: Vec<String>,
    pub duration_ms: u64,
    pub artifact_refs: Vec<String>,
    pub replay_command: String,
    pub outcome: &'static str,
    pub reason_code: String,
    #[serde(flatten)]
    pub extra_fields: BTreeMap<String, Value>,
}

impl StructuredCaseLog {
    #[must_use]
    pub fn new(
        scenario_id: &str,
        device: &str,
        seed: u64,
        replay_command: String,
        outcome: &'static str,
        reason_code: &str,
    ) -> Self {
        Self {
            schema_version: LOG_SCHEMA_VERSION,
            ts_unix_ms: now_unix_ms(),
            suite_id: SUITE_ID,
            scenario_id: scenario_id.to_string(),
            device: device.to_string(),
            seed,
            env_fingerprint: env_fingerprint(),
            input_digests: Vec::new(),
            output_digests: Vec::new(),
            duration_ms: 0,
            artifact_refs: Vec::new(),
            replay_command,
            outcome,
            reason_code: reason_code.to_string(),
            extra_fields: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_digests(mut self, inputs: Vec<String>, outputs: Vec<String>) -> Self {
        self.input_digests = inputs;
        self.output_digests = outputs;
        self
    }

    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    #[must_use]
    pub fn with_artifact_refs(mut self, refs: Vec<String>) -> Self {
        self.artifact_refs = refs;
        self
    }

    /// Extra fields are flattened into the JSON line, so keys that would
    /// shadow the envelope are dropped.
    #[must_use]
    pub fn with_extra_fields(mut self, mut extra_fields: BTreeMap<String, Value>) -> Self {
        for key in RESERVED_KEYS {
            extra_fields.remove(key);
        }
        self.extra_fields.extend(extra_fields);
        self
    }

    #[must_use]
    pub fn passed(&self) -> bool {
        self.outcome == "pass"
    }

    pub fn to_json_line(&self) -> Result<String, String> {
        serde_json::to_string(self)
            .map_err(|error| format!("failed to serialize structured log entry: {error}"))
    }
}

#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(&mut out, "{byte:02x}");
    }
    out
}

/// Digest over dtype, shape and little-endian element bytes.
#[must_use]
pub fn buffer_digest(buffer: &HostBuffer) -> String {
    let mut bytes = format!("{}{:?}", buffer.dtype(), buffer.shape()).into_bytes();
    bytes.extend(buffer.to_le_bytes());
    sha256_hex(&bytes)
}

fn env_fingerprint() -> String {
    let raw = format!(
        "{}/{}/{}",
        std::env::consts::OS,
        std::env::consts::ARCH,
        env!("CARGO_PKG_VERSION")
    );
    sha256_hex(raw.as_bytes())[..16].to_string()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::{Value, json};
    use tc_core::{DType, HostBuffer};

    use super::{StructuredCaseLog, buffer_digest, sha256_hex};

    #[test]
    fn sha256_hex_matches_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn buffer_digest_depends_on_dtype_and_shape() {
        let a = HostBuffer::zeros(&[2, 2], DType::I32);
        let b = HostBuffer::zeros(&[4], DType::I32);
        let c = HostBuffer::zeros(&[2, 2], DType::F32);
        assert_ne!(buffer_digest(&a), buffer_digest(&b));
        assert_ne!(buffer_digest(&a), buffer_digest(&c));
        assert_eq!(buffer_digest(&a), buffer_digest(&a.clone()));
    }

    #[test]
    fn extra_fields_cannot_shadow_envelope() {
        let mut extra = BTreeMap::new();
        extra.insert("outcome".to_string(), json!("pass"));
        extra.insert("trace".to_string(), json!(["init", "skipped"]));
        let log = StructuredCaseLog::new(
            "elemwise_sum/1/float32",
            "cuda",
            7,
            "cargo run".to_string(),
            "skip",
            "device_unavailable",
        )
        .with_extra_fields(extra);

        let line = log.to_json_line().expect("log should serialize");
        let value: Value = serde_json::from_str(&line).expect("line should parse");
        assert_eq!(value["outcome"], "skip");
        assert_eq!(value["reason_code"], "device_unavailable");
        assert_eq!(value["trace"][1], "skipped");
        assert!(!log.passed());
    }
}
