//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use harvester_core::api::{Period, RatingFilter, SortOrder};
use harvester_core::config::{FileConfig, Target};

/// Bulk-download media from a paginated content API.
///
/// Harvester pages through item metadata, downloads each item with a bounded
/// worker pool, files it by content rating and remembers what it fetched so
/// the next run picks up where this one stopped.
///
/// Flags override the config file, which overrides built-in defaults.
/// While running, type `p` and Enter to pause or resume; Ctrl+C stops after
/// in-flight transfers finish, a second Ctrl+C stops immediately.
#[derive(Parser, Debug)]
#[command(name = "harvester")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Config file (default: $XDG_CONFIG_HOME/harvester/config.json)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Output directory
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Concurrent downloads (1-100)
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub workers: Option<u8>,

    /// Delay between page requests in milliseconds (max 60000)
    #[arg(short = 'd', long, value_name = "MS", value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub delay_ms: Option<u64>,

    /// Attempts per item before giving up (0-10, 0 means a single attempt)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub max_retries: Option<u8>,

    /// New success/failed records to collect, or "endless"
    #[arg(short = 'n', long)]
    pub target: Option<Target>,

    /// Items requested per page (1-200)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=200))]
    pub page_size: Option<u32>,

    /// Result ordering: "Most Reactions", "Most Comments" or "Newest"
    #[arg(long)]
    pub sort: Option<SortOrder>,

    /// Time window: AllTime, Year, Month, Week or Day
    #[arg(long)]
    pub period: Option<Period>,

    /// Server-side rating filter: None, Soft, Mature or X
    #[arg(long)]
    pub rating: Option<RatingFilter>,

    /// Only items posted by this user
    #[arg(long)]
    pub username: Option<String>,

    /// Only items generated with this model
    #[arg(long)]
    pub model_id: Option<u64>,

    /// Only items from this post
    #[arg(long)]
    pub post_id: Option<u64>,

    /// Allowed file types, comma separated (e.g. jpg,png,mp4)
    #[arg(long, value_delimiter = ',', value_name = "EXT")]
    pub types: Option<Vec<String>>,

    /// Skip items whose longer side is below this many pixels
    #[arg(long, value_name = "PX")]
    pub min_resolution: Option<u32>,

    /// Skip items with fewer reactions
    #[arg(long)]
    pub min_reactions: Option<u64>,

    /// Keep only adult-rated items
    #[arg(long)]
    pub adult_only: bool,

    /// Store everything in one folder instead of per-category folders
    #[arg(long)]
    pub flat: bool,

    /// Do not write metadata sidecar files
    #[arg(long)]
    pub no_metadata: bool,

    /// Leave failed items out of the ledger so a later run retries them
    #[arg(long)]
    pub retry_failed_later: bool,

    /// API bearer token
    #[arg(long, value_name = "KEY")]
    pub api_key: Option<String>,

    /// API endpoint
    #[arg(long, value_name = "URL")]
    pub api_base: Option<String>,
}

impl Args {
    /// The flags that were given, as a config layer.
    pub fn overrides(&self) -> FileConfig {
        FileConfig {
            output_root: self.output.clone(),
            workers: self.workers.map(usize::from),
            page_delay_ms: self.delay_ms,
            max_retries: self.max_retries.map(u32::from),
            organize_by_category: self.flat.then_some(false),
            allowed_types: self.types.clone(),
            min_resolution: self.min_resolution,
            adult_only: self.adult_only.then_some(true),
            min_reactions: self.min_reactions,
            target: self.target,
            page_size: self.page_size,
            save_metadata: self.no_metadata.then_some(false),
            api_base: self.api_base.clone(),
            api_key: self.api_key.clone(),
            mark_failed_in_ledger: self.retry_failed_later.then_some(false),
            sort: self.sort,
            period: self.period,
            rating: self.rating,
            username: self.username.clone(),
            model_id: self.model_id,
            post_id: self.post_id,
            ..FileConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default_args_parses_successfully() {
        let args = Args::try_parse_from(["harvester"]).unwrap();
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert_eq!(args.workers, None);
        assert_eq!(args.overrides(), FileConfig::default());
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["harvester", "-v"]).unwrap();
        assert_eq!(args.verbose, 1);

        let args = Args::try_parse_from(["harvester", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["harvester", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_invalid_flag_returns_error() {
        let err = Args::try_parse_from(["harvester", "--invalid-flag"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }

    // ==================== Worker Tests ====================

    #[test]
    fn test_cli_workers_bounds() {
        let args = Args::try_parse_from(["harvester", "-w", "100"]).unwrap();
        assert_eq!(args.workers, Some(100));

        for bad in ["0", "101"] {
            let err = Args::try_parse_from(["harvester", "-w", bad]).unwrap_err();
            assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
        }
    }

    #[test]
    fn test_cli_max_retries_zero_allowed() {
        let args = Args::try_parse_from(["harvester", "-r", "0"]).unwrap();
        assert_eq!(args.overrides().max_retries, Some(0));
    }

    // ==================== Query Tests ====================

    #[test]
    fn test_cli_parses_query_enums_loosely() {
        let args = Args::try_parse_from([
            "harvester",
            "--sort",
            "newest",
            "--period",
            "week",
            "--rating",
            "None",
        ])
        .unwrap();
        assert_eq!(args.sort, Some(SortOrder::Newest));
        assert_eq!(args.period, Some(Period::Week));
        assert_eq!(args.rating, Some(RatingFilter::None));
    }

    #[test]
    fn test_cli_rejects_unknown_period() {
        let err = Args::try_parse_from(["harvester", "--period", "decade"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_target_accepts_count_and_endless() {
        let args = Args::try_parse_from(["harvester", "-n", "10"]).unwrap();
        assert_eq!(args.target, Some(Target::Count(10)));

        let args = Args::try_parse_from(["harvester", "--target", "endless"]).unwrap();
        assert_eq!(args.target, Some(Target::Unbounded));
    }

    // ==================== Override Tests ====================

    #[test]
    fn test_cli_switches_only_override_when_given() {
        let args = Args::try_parse_from([
            "harvester",
            "--flat",
            "--no-metadata",
            "--adult-only",
            "--retry-failed-later",
            "--types",
            "jpg,png",
        ])
        .unwrap();
        let layer = args.overrides();
        assert_eq!(layer.organize_by_category, Some(false));
        assert_eq!(layer.save_metadata, Some(false));
        assert_eq!(layer.adult_only, Some(true));
        assert_eq!(layer.mark_failed_in_ledger, Some(false));
        assert_eq!(
            layer.allowed_types,
            Some(vec!["jpg".to_string(), "png".to_string()])
        );

        let plain = Args::try_parse_from(["harvester"]).unwrap().overrides();
        assert_eq!(plain.organize_by_category, None);
        assert_eq!(plain.adult_only, None);
    }
}
