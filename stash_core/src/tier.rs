use serde::{Deserialize, Serialize};

/// Ceiling for tiers without an explicit entry.
pub const DEFAULT_CEILING: u64 = 26_110_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCeiling {
    pub tier: u8,
    pub max_bytes: u64,
}

/// Maximum attachment size per service tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierTable {
    #[serde(default = "default_ceiling")]
    pub default_max_bytes: u64,
    #[serde(default)]
    pub tiers: Vec<TierCeiling>,
}

fn default_ceiling() -> u64 {
    DEFAULT_CEILING
}

impl TierTable {
    pub fn new(default_max_bytes: u64) -> Self {
        Self {
            default_max_bytes,
            tiers: Vec::new(),
        }
    }

    /// Sets the ceiling for `tier`, replacing an existing entry.
    pub fn with_tier(mut self, tier: u8, max_bytes: u64) -> Self {
        self.tiers.retain(|entry| entry.tier != tier);
        self.tiers.push(TierCeiling { tier, max_bytes });
        self
    }

    pub fn max_attachment_size(&self, tier: u8) -> u64 {
        self.tiers
            .iter()
            .find(|entry| entry.tier == tier)
            .map_or(self.default_max_bytes, |entry| entry.max_bytes)
    }
}

impl Default for TierTable {
    fn default() -> Self {
        TierTable::new(DEFAULT_CEILING)
            .with_tier(2, 52_420_000)
            .with_tier(3, 104_840_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table() {
        let table = TierTable::default();
        assert_eq!(table.max_attachment_size(0), 26_110_000);
        assert_eq!(table.max_attachment_size(1), 26_110_000);
        assert_eq!(table.max_attachment_size(2), 52_420_000);
        assert_eq!(table.max_attachment_size(3), 104_840_000);
        assert_eq!(table.max_attachment_size(200), DEFAULT_CEILING);
    }

    #[test]
    fn overrides_replace_entries() {
        let table = TierTable::new(8_000_000).with_tier(2, 1).with_tier(2, 2);
        assert_eq!(table.tiers.len(), 1);
        assert_eq!(table.max_attachment_size(2), 2);
        assert_eq!(table.max_attachment_size(3), 8_000_000);
    }
}
