//! Server-side filter criteria and client-side item filters.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::item::ItemDescriptor;

/// Largest page the service returns.
pub const MAX_PAGE_SIZE: u32 = 200;

/// Lowest rating level treated as adult content by the adult-only filter.
pub const ADULT_LEVEL: u8 = 5;

fn normalized(value: &str) -> String {
    value
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '_'))
        .flat_map(char::to_lowercase)
        .collect()
}

macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $kind:literal {
            $($(#[$vmeta:meta])* $variant:ident => $wire:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// Value sent on the wire.
            #[must_use]
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $wire),+
                }
            }

            /// Every accepted value.
            #[must_use]
            pub fn all() -> &'static [Self] {
                &[$(Self::$variant),+]
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            /// Case-insensitive; spaces, dashes and underscores are ignored.
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let wanted = normalized(s);
                Self::all()
                    .iter()
                    .copied()
                    .find(|candidate| normalized(candidate.as_str()) == wanted)
                    .ok_or_else(|| {
                        let accepted: Vec<&str> = Self::all().iter().map(|v| v.as_str()).collect();
                        format!("invalid {} '{s}' (expected one of: {})", $kind, accepted.join(", "))
                    })
            }
        }

        impl TryFrom<String> for $name {
            type Error = String;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.as_str().to_string()
            }
        }
    };
}

wire_enum! {
    /// Result ordering.
    SortOrder, "sort order" {
        /// Most reactions first.
        MostReactions => "Most Reactions",
        /// Most comments first.
        MostComments => "Most Comments",
        /// Newest first.
        Newest => "Newest",
    }
}

wire_enum! {
    /// Time window the ordering is computed over.
    Period, "period" {
        /// No time restriction.
        AllTime => "AllTime",
        /// Last year.
        Year => "Year",
        /// Last month.
        Month => "Month",
        /// Last week.
        Week => "Week",
        /// Last day.
        Day => "Day",
    }
}

wire_enum! {
    /// Server-side content-rating filter.
    RatingFilter, "rating filter" {
        /// Only unrated content.
        None => "None",
        /// Up to soft.
        Soft => "Soft",
        /// Up to mature.
        Mature => "Mature",
        /// Explicit content.
        X => "X",
    }
}

impl Default for SortOrder {
    fn default() -> Self {
        Self::MostReactions
    }
}

impl Default for Period {
    fn default() -> Self {
        Self::AllTime
    }
}

/// Query criteria passed to the remote API on every page request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilterCriteria {
    /// Result ordering.
    pub sort: SortOrder,
    /// Time window.
    pub period: Period,
    /// Content-rating filter; `None` sends no filter.
    pub rating: Option<RatingFilter>,
    /// Restrict to one author.
    pub username: Option<String>,
    /// Restrict to one model.
    pub model_id: Option<u64>,
    /// Restrict to one post.
    pub post_id: Option<u64>,
}

impl FilterCriteria {
    /// Builds the query string pairs for one page request.
    ///
    /// `limit` is clamped to `1..=200`.
    #[must_use]
    pub fn query_params(&self, limit: u32, cursor: Option<&str>) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("limit", limit.clamp(1, MAX_PAGE_SIZE).to_string()),
            ("sort", self.sort.as_str().to_string()),
            ("period", self.period.as_str().to_string()),
        ];
        if let Some(rating) = self.rating {
            params.push(("nsfw", rating.as_str().to_string()));
        }
        if let Some(username) = self.username.as_deref().filter(|u| !u.is_empty()) {
            params.push(("username", username.to_string()));
        }
        if let Some(model_id) = self.model_id {
            params.push(("modelId", model_id.to_string()));
        }
        if let Some(post_id) = self.post_id {
            params.push(("postId", post_id.to_string()));
        }
        if let Some(cursor) = cursor.filter(|c| !c.is_empty()) {
            params.push(("cursor", cursor.to_string()));
        }
        params
    }
}

/// Filters applied to each item after a page arrives and before it is
/// dispatched. Rejected items never touch the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientFilter {
    /// Minimum length of the longer side, in pixels.
    pub min_resolution: Option<u32>,
    /// Keep only items rated at [`ADULT_LEVEL`] or above.
    pub adult_only: bool,
    /// Minimum like + heart + laugh + cry.
    pub min_reactions: Option<u64>,
}

impl ClientFilter {
    /// Returns true if `item` passes every configured filter.
    #[must_use]
    pub fn accepts(&self, item: &ItemDescriptor) -> bool {
        if item.source_url.is_none() {
            debug!(item_id = %item.id, "item has no source URL");
            return false;
        }
        if let Some(min) = self.min_resolution
            && item.longer_side().is_none_or(|side| side < min)
        {
            debug!(item_id = %item.id, min, "below minimum resolution");
            return false;
        }
        if self.adult_only && item.rating < ADULT_LEVEL {
            debug!(item_id = %item.id, rating = item.rating, "not adult");
            return false;
        }
        if let Some(min) = self.min_reactions
            && item.stats.reactions() < min
        {
            debug!(item_id = %item.id, min, "below minimum reactions");
            return false;
        }
        true
    }
}
