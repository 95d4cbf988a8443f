//! Content-rating normalization and storage categories.
//!
//! The remote API reports ratings inconsistently: sometimes a numeric level
//! (`nsfwLevel: 3` or `"3"`), sometimes a label (`nsfw: "Mature"`), sometimes
//! a boolean, sometimes nothing. [`classify`] folds all of these into a
//! single level in `0..=6`, and [`CategoryThresholds`] maps a level onto the
//! folder it is stored under.
//!
//! Both functions are total and pure: they never fail and never touch I/O.

mod category;
mod rating;

pub use category::{Category, CategoryThresholds};
pub use rating::{MAX_RATING, RATING_LABELS, classify, classify_label};
