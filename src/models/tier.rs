//! Storage tier summaries and the totals derived from them.

use serde::{Deserialize, Serialize};

/// Per-tier aggregate. `name` is the unique key (hot, warm, cold).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StorageTierSummary {
    pub name: String,
    pub file_count: u64,
    pub total_size: u64,
    pub total_compressed_size: u64,
}

#[derive(Deserialize, Debug)]
pub struct TierListing {
    pub tiers: Vec<StorageTierSummary>,
}

/// Sums across all tiers plus the share of the nominal capacity in use.
///
/// `nominal_capacity` is configured on the client and is a display
/// placeholder. The backend does not report a capacity.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct TierTotals {
    pub file_count: u64,
    pub total_size: u64,
    pub total_compressed_size: u64,
    pub nominal_capacity: u64,
}

impl TierTotals {
    pub fn from_tiers(tiers: &[StorageTierSummary], nominal_capacity: u64) -> Self {
        tiers.iter().fold(
            Self {
                file_count: 0,
                total_size: 0,
                total_compressed_size: 0,
                nominal_capacity,
            },
            |mut acc, tier| {
                acc.file_count = acc.file_count.saturating_add(tier.file_count);
                acc.total_size = acc.total_size.saturating_add(tier.total_size);
                acc.total_compressed_size = acc
                    .total_compressed_size
                    .saturating_add(tier.total_compressed_size);
                acc
            },
        )
    }

    /// Compressed bytes as a percentage of the nominal capacity.
    pub fn usage_percent(&self) -> f64 {
        if self.nominal_capacity == 0 {
            return 0.0;
        }
        self.total_compressed_size as f64 / self.nominal_capacity as f64 * 100.0
    }

    pub fn compression_ratio(&self) -> f64 {
        if self.total_size == 0 {
            return 1.0;
        }
        self.total_compressed_size as f64 / self.total_size as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier(name: &str, count: u64, size: u64, compressed: u64) -> StorageTierSummary {
        StorageTierSummary {
            name: name.into(),
            file_count: count,
            total_size: size,
            total_compressed_size: compressed,
        }
    }

    #[test]
    fn totals_sum_every_tier() {
        let tiers = [tier("hot", 3, 300, 150), tier("warm", 1, 100, 50), tier("cold", 0, 0, 0)];
        let totals = TierTotals::from_tiers(&tiers, 1000);
        assert_eq!(totals.file_count, 4);
        assert_eq!(totals.total_size, 400);
        assert_eq!(totals.total_compressed_size, 200);
        assert!((totals.usage_percent() - 20.0).abs() < 1e-9);
        assert!((totals.compression_ratio() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn oversized_backend_totals_saturate() {
        let tiers = [tier("hot", u64::MAX, u64::MAX, u64::MAX), tier("warm", 2, 2, 2)];
        let totals = TierTotals::from_tiers(&tiers, 1000);
        assert_eq!(totals.file_count, u64::MAX);
        assert_eq!(totals.total_size, u64::MAX);
        assert_eq!(totals.total_compressed_size, u64::MAX);
    }

    #[test]
    fn zero_capacity_reports_zero_usage() {
        let totals = TierTotals::from_tiers(&[tier("hot", 1, 10, 10)], 0);
        assert_eq!(totals.usage_percent(), 0.0);
    }
}
