//! Table-driven mapping from rating level to storage category.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Folder a downloaded item is filed under when category organization is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    /// Levels below the mature threshold.
    #[serde(rename = "SFW")]
    Sfw,
    /// Levels from the mature threshold up to (not including) the adult threshold.
    Mature,
    /// Levels at or above the adult threshold.
    Adult,
}

impl Category {
    /// Directory name used on disk.
    #[must_use]
    pub fn folder_name(self) -> &'static str {
        match self {
            Self::Sfw => "SFW",
            Self::Mature => "Mature",
            Self::Adult => "Adult",
        }
    }

    /// All categories, in ascending severity.
    #[must_use]
    pub fn all() -> [Self; 3] {
        [Self::Sfw, Self::Mature, Self::Adult]
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.folder_name())
    }
}

/// Lower bounds (inclusive) of the non-SFW categories.
///
/// Defaults: levels `0..=1` → SFW, `2..=4` → Mature, `5..=6` → Adult.
/// Changing the thresholds changes the mapping everywhere it is used; call
/// sites only ever go through [`CategoryThresholds::category_for`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryThresholds {
    /// First level filed as [`Category::Mature`].
    pub mature_from: u8,
    /// First level filed as [`Category::Adult`].
    pub adult_from: u8,
}

impl Default for CategoryThresholds {
    fn default() -> Self {
        Self {
            mature_from: 2,
            adult_from: 5,
        }
    }
}

impl CategoryThresholds {
    /// Returns the category for a normalized rating level.
    #[must_use]
    pub fn category_for(&self, level: u8) -> Category {
        self.table()
            .iter()
            .rev()
            .find(|(from, _)| level >= *from)
            .map_or(Category::Sfw, |(_, category)| *category)
    }

    /// Returns true if the thresholds are ordered (`mature_from <= adult_from`).
    #[must_use]
    pub fn is_ordered(&self) -> bool {
        self.mature_from <= self.adult_from
    }

    fn table(&self) -> [(u8, Category); 3] {
        [
            (0, Category::Sfw),
            (self.mature_from, Category::Mature),
            (self.adult_from, Category::Adult),
        ]
    }
}
