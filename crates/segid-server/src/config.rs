use anyhow::{bail, Context};
use clap::Parser;
use core::time::Duration;
use segid::{AdaptiveStep, GeneratorConfig, TagRecord};
use std::path::PathBuf;

/// Runtime configuration for the `segid-server` binary.
///
/// All values are parsed from CLI arguments or environment variables. The
/// defaults prefetch early and keep tags in memory, which is enough for a
/// single-node deployment; point `STORE_PATH` at a file to survive restarts.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "segid-server",
    version,
    about = "An HTTP service handing out segment-allocated IDs per business tag"
)]
pub struct CliArgs {
    /// Address to listen on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:8080"))]
    pub server_addr: String,

    /// JSON file backing the ID store. Created on first write.
    ///
    /// Without it, tags live in memory and every restart starts from zero.
    ///
    /// Environment variable: `STORE_PATH`
    #[arg(long, env = "STORE_PATH")]
    pub store_path: Option<PathBuf>,

    /// Tags created at startup if the store does not know them yet, as
    /// `name:step`. Existing tags keep their stored state.
    ///
    /// Environment variable: `SEED_TAGS` (comma separated)
    #[arg(long = "tag", env = "SEED_TAGS", value_delimiter = ',')]
    pub tags: Vec<String>,

    /// Number of threads running background prefetches.
    ///
    /// Environment variable: `PREFETCH_WORKERS`
    #[arg(long, env = "PREFETCH_WORKERS", default_value_t = 5)]
    pub prefetch_workers: usize,

    /// Fraction of a segment that may remain before the standby segment is
    /// fetched.
    ///
    /// Environment variable: `LOW_WATER_RATIO`
    #[arg(long, env = "LOW_WATER_RATIO", default_value_t = 0.9)]
    pub low_water_ratio: f64,

    /// Milliseconds after which a running prefetch is considered stuck.
    ///
    /// Environment variable: `PREFETCH_TIMEOUT_MS`
    #[arg(long, env = "PREFETCH_TIMEOUT_MS", default_value_t = 30_000)]
    pub prefetch_timeout_ms: u64,

    /// Milliseconds a request waits for the standby segment before failing
    /// with `503`.
    ///
    /// Environment variable: `EXHAUSTION_TIMEOUT_MS`
    #[arg(long, env = "EXHAUSTION_TIMEOUT_MS", default_value_t = 1_000)]
    pub exhaustion_timeout_ms: u64,

    /// Grow or shrink the fetched step with the consumption rate.
    ///
    /// Environment variable: `ADAPTIVE_STEP`
    #[arg(long, env = "ADAPTIVE_STEP", default_value_t = false)]
    pub adaptive_step: bool,

    /// Upper bound of an adapted step.
    ///
    /// Environment variable: `MAX_STEP`
    #[arg(long, env = "MAX_STEP", default_value_t = 1_000_000)]
    pub max_step: u64,

    /// Target lifetime of one segment when adapting the step, in seconds.
    ///
    /// Environment variable: `SEGMENT_DURATION_SECS`
    #[arg(long, env = "SEGMENT_DURATION_SECS", default_value_t = 900)]
    pub segment_duration_secs: u64,

    /// Seconds between two syncs of the registered tags with the store.
    ///
    /// Environment variable: `REFRESH_INTERVAL_SECS`
    #[arg(long, env = "REFRESH_INTERVAL_SECS", default_value_t = 60)]
    pub refresh_interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub store_path: Option<PathBuf>,
    pub seed_tags: Vec<TagRecord>,
    pub generator: GeneratorConfig,
    pub refresh_interval: Duration,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.refresh_interval_secs == 0 {
            bail!("REFRESH_INTERVAL_SECS must be greater than 0");
        }

        let seed_tags = args
            .tags
            .iter()
            .map(|raw| parse_seed(raw))
            .collect::<anyhow::Result<Vec<_>>>()?;

        let generator = GeneratorConfig {
            low_water_ratio: args.low_water_ratio,
            prefetch_timeout: Duration::from_millis(args.prefetch_timeout_ms),
            exhaustion_timeout: Duration::from_millis(args.exhaustion_timeout_ms),
            prefetch_workers: args.prefetch_workers,
            adaptive_step: args.adaptive_step.then(|| AdaptiveStep {
                segment_duration: Duration::from_secs(args.segment_duration_secs),
                max_step: args.max_step,
            }),
            ..GeneratorConfig::default()
        };
        generator.validate()?;

        Ok(Self {
            server_addr: args.server_addr,
            store_path: args.store_path,
            seed_tags,
            generator,
            refresh_interval: Duration::from_secs(args.refresh_interval_secs),
        })
    }
}

fn parse_seed(raw: &str) -> anyhow::Result<TagRecord> {
    let Some((tag, step)) = raw.trim().rsplit_once(':') else {
        bail!("seed tag `{raw}` must be formatted as name:step");
    };
    if tag.is_empty() {
        bail!("seed tag `{raw}` has an empty name");
    }
    let step: u64 = step
        .parse()
        .with_context(|| format!("seed tag `{raw}` has an invalid step"))?;
    if step == 0 {
        bail!("seed tag `{raw}` must have a step greater than 0");
    }
    Ok(TagRecord::new(tag, step))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> CliArgs {
        let argv = core::iter::once("segid-server").chain(extra.iter().copied());
        CliArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults_build_a_valid_config() {
        let config = ServerConfig::try_from(args(&[])).unwrap();
        assert_eq!(config.server_addr, "0.0.0.0:8080");
        assert!(config.store_path.is_none());
        assert!(config.seed_tags.is_empty());
        assert_eq!(config.generator.low_water_ratio, 0.9);
        assert_eq!(config.generator.adaptive_step, None);
        assert_eq!(config.refresh_interval, Duration::from_secs(60));
    }

    #[test]
    fn seed_tags_are_parsed() {
        let config =
            ServerConfig::try_from(args(&["--tag", "bookmark:1000,order:50", "--tag", "a:b:7"]))
                .unwrap();
        let seeds: Vec<_> = config
            .seed_tags
            .iter()
            .map(|r| (r.tag.as_str(), r.step))
            .collect();
        assert_eq!(seeds, [("bookmark", 1000), ("order", 50), ("a:b", 7)]);
    }

    #[test]
    fn malformed_seed_tags_are_rejected() {
        for bad in ["bookmark", ":10", "bookmark:0", "bookmark:many"] {
            assert!(
                ServerConfig::try_from(args(&["--tag", bad])).is_err(),
                "accepted `{bad}`"
            );
        }
    }

    #[test]
    fn adaptive_step_is_opt_in() {
        let config = ServerConfig::try_from(args(&[
            "--adaptive-step",
            "--max-step",
            "5000",
            "--segment-duration-secs",
            "60",
        ]))
        .unwrap();
        assert_eq!(
            config.generator.adaptive_step,
            Some(AdaptiveStep {
                segment_duration: Duration::from_secs(60),
                max_step: 5000,
            })
        );
    }

    #[test]
    fn invalid_generator_settings_are_rejected() {
        assert!(ServerConfig::try_from(args(&["--low-water-ratio", "1.5"])).is_err());
        assert!(ServerConfig::try_from(args(&["--prefetch-workers", "0"])).is_err());
        assert!(ServerConfig::try_from(args(&["--refresh-interval-secs", "0"])).is_err());
    }
}
