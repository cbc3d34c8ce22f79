//! Chunk verification results for a single node.

use serde::{Deserialize, Serialize};

/// Counts extracted from a verify response.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VerifyCounts {
    pub verified: usize,
    pub corrupted: usize,
    pub missing: usize,
}

impl VerifyCounts {
    /// A successful job that still found damaged or absent chunks.
    pub fn needs_attention(&self) -> bool {
        self.corrupted > 0 || self.missing > 0
    }

    pub fn total(&self) -> usize {
        self.verified + self.corrupted + self.missing
    }
}

/// The three chunk lists. Entries are opaque; only their number matters.
#[derive(Deserialize, Debug, Default)]
pub struct ChunkResults {
    #[serde(default)]
    pub verified_chunks: Vec<serde_json::Value>,
    #[serde(default)]
    pub corrupted_chunks: Vec<serde_json::Value>,
    #[serde(default)]
    pub missing_chunks: Vec<serde_json::Value>,
}

/// Accepts both the nested `{results: {...}}` body and a flat one.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
pub enum VerifyResponse {
    Nested { results: ChunkResults },
    Flat(ChunkResults),
}

impl VerifyResponse {
    pub fn counts(&self) -> VerifyCounts {
        let results = match self {
            VerifyResponse::Nested { results } => results,
            VerifyResponse::Flat(results) => results,
        };
        VerifyCounts {
            verified: results.verified_chunks.len(),
            corrupted: results.corrupted_chunks.len(),
            missing: results.missing_chunks.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_come_from_array_lengths() {
        let verified: Vec<u32> = (1..=97).collect();
        let raw = serde_json::json!({
            "verified_chunks": verified,
            "corrupted_chunks": [98],
            "missing_chunks": []
        });
        let resp: VerifyResponse = serde_json::from_value(raw).unwrap();
        let counts = resp.counts();
        assert_eq!(
            counts,
            VerifyCounts {
                verified: 97,
                corrupted: 1,
                missing: 0
            }
        );
        assert!(counts.needs_attention());
    }

    #[test]
    fn nested_body_is_accepted() {
        let raw = r#"{"node_name":"node1","total_chunks":2,
            "results":{"verified_chunks":[{"chunk_id":1}],"corrupted_chunks":[],"missing_chunks":[{"chunk_id":2}]},
            "summary":{"verified":1,"corrupted":0,"missing":1}}"#;
        let counts = serde_json::from_str::<VerifyResponse>(raw).unwrap().counts();
        assert_eq!(counts.verified, 1);
        assert_eq!(counts.missing, 1);
        assert_eq!(counts.total(), 2);
    }
}
