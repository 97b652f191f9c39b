//! Tree shape and behavior options

use serde::{Deserialize, Serialize};
use tessera_store::HashAlgorithm;

/// Total id capacity of every tree, independent of degree: `2^60`.
///
/// Each supported degree pairs with a depth so that `degree^depth` is exactly
/// this value, keeping the maximum id space stable across configurations.
pub const CAPACITY: u64 = 1 << 60;

/// Branching factor of the tree, fixed per tree instance
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Degree {
    /// 2 children per node, depth 60
    Two,
    /// 4 children per node, depth 30
    Four,
    /// 8 children per node, depth 20
    Eight,
    /// 16 children per node, depth 15
    #[default]
    Sixteen,
    /// 32 children per node, depth 12
    ThirtyTwo,
}

impl Degree {
    /// Number of child slots per node
    pub fn width(&self) -> u64 {
        match self {
            Degree::Two => 2,
            Degree::Four => 4,
            Degree::Eight => 8,
            Degree::Sixteen => 16,
            Degree::ThirtyTwo => 32,
        }
    }

    /// Maximum tree depth for this degree, chosen so `width^depth == 2^60`
    pub fn depth(&self) -> u32 {
        match self {
            Degree::Two => 60,
            Degree::Four => 30,
            Degree::Eight => 20,
            Degree::Sixteen => 15,
            Degree::ThirtyTwo => 12,
        }
    }

    /// Parse from a branching factor
    pub fn from_width(width: u64) -> Option<Self> {
        match width {
            2 => Some(Degree::Two),
            4 => Some(Degree::Four),
            8 => Some(Degree::Eight),
            16 => Some(Degree::Sixteen),
            32 => Some(Degree::ThirtyTwo),
            _ => None,
        }
    }
}

/// Configuration for tree behavior
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct TreeOptions {
    /// Branching factor
    pub degree: Degree,
    /// Digest function for node hashing
    pub hash_algorithm: HashAlgorithm,
    /// Recompute and check every loaded node's digest against its storage key
    pub verify_hash_on_load: bool,
    /// Raise instead of silently deduplicating when persisting content whose
    /// digest already exists
    pub report_duplicate_write: bool,
}
