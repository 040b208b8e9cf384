//! Command-line options.

use std::path::PathBuf;

use clap::Parser;

/// Hierarchical energy market simulator.
///
/// If no `--scenario` or `--preset` is given, the `default` preset is used.
#[derive(Debug, Parser)]
#[command(name = "area-market-sim", version, about)]
pub struct Cli {
    /// Load scenario from TOML config file
    #[arg(long, conflicts_with = "preset")]
    pub scenario: Option<PathBuf>,

    /// Use a built-in preset (default, community)
    #[arg(long)]
    pub preset: Option<String>,

    /// Override random seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Keep every past market (`true`) or only the most recent one (`false`)
    #[arg(long)]
    pub keep_past_markets: Option<bool>,

    /// Export slot summaries to CSV
    #[arg(long)]
    pub telemetry_out: Option<PathBuf>,

    /// Export device statistics to CSV
    #[arg(long)]
    pub stats_out: Option<PathBuf>,

    /// Export KPI and unmatched-load views to JSON
    #[arg(long)]
    pub kpi_out: Option<PathBuf>,

    /// Start REST API server after simulation
    #[cfg(feature = "api")]
    #[arg(long)]
    pub serve: bool,

    /// API server port
    #[cfg(feature = "api")]
    #[arg(long, default_value_t = 3000)]
    pub port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supports_scenario_cli() {
        let cli = Cli::try_parse_from(["area-market-sim", "--scenario", "scenario.toml"]).unwrap();
        assert_eq!(
            cli.scenario.as_deref().and_then(|p| p.to_str()),
            Some("scenario.toml")
        );
        assert!(cli.preset.is_none());
    }

    #[test]
    fn supports_preset_and_overrides() {
        let cli = Cli::try_parse_from([
            "area-market-sim",
            "--preset",
            "community",
            "--seed",
            "7",
            "--keep-past-markets",
            "false",
        ])
        .unwrap();
        assert_eq!(cli.preset.as_deref(), Some("community"));
        assert_eq!(cli.seed, Some(7));
        assert_eq!(cli.keep_past_markets, Some(false));
    }

    #[test]
    fn scenario_and_preset_are_mutually_exclusive() {
        let result = Cli::try_parse_from([
            "area-market-sim",
            "--scenario",
            "a.toml",
            "--preset",
            "default",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_bad_seed() {
        assert!(Cli::try_parse_from(["area-market-sim", "--seed", "minus-one"]).is_err());
    }
}
