//! Run configuration
//!
//! A run is configured from plain key/value options. Keys follow the
//! camelCase names operators use (`rootLimit`, `rateLimitRPS`, ...). The
//! environment (optionally seeded from a dotenv file) and CLI flags are both
//! turned into options and funnelled through [`RunConfig::from_options`], so
//! validation lives in exactly one place.

use crate::error::ConfigError;
use crate::model::ResourceKind;
use crate::pokeapi::{RelatedPolicy, RetryPolicy};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://pokeapi.co/api/v2/";

/// Environment variables and the option keys they feed.
pub const ENV_OPTIONS: &[(&str, &str)] = &[
    ("POKEAPI_URL", "baseUrl"),
    ("DEXSYNC_DATABASE", "database"),
    ("DEXSYNC_ROOT_LIMIT", "rootLimit"),
    ("DEXSYNC_OFFSET", "offset"),
    ("DEXSYNC_RELATED_LIMIT", "relatedLimit"),
    ("DEXSYNC_CONCURRENCY", "concurrency"),
    ("DEXSYNC_BATCH_SIZE", "batchSize"),
    ("DEXSYNC_MAX_RETRIES", "maxRetries"),
    ("DEXSYNC_RATE_LIMIT_RPS", "rateLimitRPS"),
    ("DEXSYNC_RATE_LIMIT_BURST", "rateLimitBurst"),
    ("DEXSYNC_INITIAL_BACKOFF_MS", "initialBackoffMs"),
    ("DEXSYNC_MAX_BACKOFF_MS", "maxBackoffMs"),
    ("DEXSYNC_REQUEST_TIMEOUT_SECS", "requestTimeoutSecs"),
    ("DEXSYNC_STORE_RETRIES", "storeRetries"),
    ("DEXSYNC_ON_BATCH_FAILURE", "onBatchFailure"),
    ("DEXSYNC_PIPELINE_MODE", "pipelineMode"),
    ("DEXSYNC_QUEUE_DEPTH", "queueDepth"),
    ("DEXSYNC_FOLLOW", "follow"),
    ("DEXSYNC_RETRY_FAILED", "retryFailed"),
];

/// What to do when a batch fails to persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchFailurePolicy {
    /// Stop the run; it reports `Failed`.
    Abort,
    /// Record the batch as failed and move on to the next one.
    #[default]
    SkipAndContinue,
}

impl FromStr for BatchFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "skipandcontinue" | "skip-and-continue" | "skip" => Ok(Self::SkipAndContinue),
            other => Err(format!("expected abort or skipAndContinue, got '{}'", other)),
        }
    }
}

/// How batches move between stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineMode {
    /// Each batch goes through extract, transform and load before the next
    /// batch starts.
    #[default]
    Sequential,
    /// Stages run concurrently, connected by bounded queues.
    Pipelined,
}

impl FromStr for PipelineMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "pipelined" => Ok(Self::Pipelined),
            other => Err(format!("expected sequential or pipelined, got '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub base_url: Url,
    pub database: PathBuf,
    /// Number of root creatures to ingest.
    pub root_limit: usize,
    /// Position in the creature listing to start from.
    pub offset: usize,
    /// Moves followed per creature.
    pub related_limit: usize,
    /// Fetch worker pool width.
    pub concurrency: usize,
    pub batch_size: usize,
    pub max_retries: u32,
    pub rate_limit_rps: f64,
    /// Back-to-back requests allowed after an idle period. Values above 1
    /// let a one-second window exceed `rate_limit_rps` by `burst - 1`.
    pub rate_limit_burst: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub request_timeout: Duration,
    pub store_retries: u32,
    pub on_batch_failure: BatchFailurePolicy,
    pub pipeline_mode: PipelineMode,
    pub queue_depth: usize,
    /// Sub-resource kinds followed from each creature.
    pub follow: BTreeSet<ResourceKind>,
    /// Give roots that failed for a recoverable reason one more pass at the
    /// end of the run.
    pub retry_failed: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_BASE_URL).expect("default base URL is valid"),
            database: PathBuf::from("pokedex.db"),
            root_limit: 20,
            offset: 0,
            related_limit: 3,
            concurrency: 4,
            batch_size: 20,
            max_retries: 3,
            rate_limit_rps: 10.0,
            rate_limit_burst: 1,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            store_retries: 3,
            on_batch_failure: BatchFailurePolicy::default(),
            pipeline_mode: PipelineMode::default(),
            queue_depth: 2,
            follow: [
                ResourceKind::Species,
                ResourceKind::EvolutionChain,
                ResourceKind::Type,
                ResourceKind::Ability,
                ResourceKind::Move,
            ]
            .into_iter()
            .collect(),
            retry_failed: true,
        }
    }
}

impl RunConfig {
    /// Build a configuration from key/value options over the defaults.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] for unknown keys, unparsable values, or a
    /// combination that fails [`RunConfig::validate`].
    pub fn from_options<I, K, V>(options: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, value) in options {
            config.set(key.as_ref(), value.as_ref())?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Apply one option.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let value = value.trim();
        match key {
            "baseUrl" => self.base_url = parse_base_url(value)?,
            "database" => self.database = PathBuf::from(value),
            "rootLimit" => self.root_limit = parse(key, value)?,
            "offset" => self.offset = parse(key, value)?,
            "relatedLimit" => self.related_limit = parse(key, value)?,
            "concurrency" => self.concurrency = parse(key, value)?,
            "batchSize" => self.batch_size = parse(key, value)?,
            "maxRetries" => self.max_retries = parse(key, value)?,
            "rateLimitRPS" => self.rate_limit_rps = parse(key, value)?,
            "rateLimitBurst" => self.rate_limit_burst = parse(key, value)?,
            "initialBackoffMs" => {
                self.initial_backoff = Duration::from_millis(parse(key, value)?)
            }
            "maxBackoffMs" => self.max_backoff = Duration::from_millis(parse(key, value)?),
            "requestTimeoutSecs" => {
                self.request_timeout = Duration::from_secs(parse(key, value)?)
            }
            "storeRetries" => self.store_retries = parse(key, value)?,
            "onBatchFailure" => self.on_batch_failure = parse(key, value)?,
            "pipelineMode" => self.pipeline_mode = parse(key, value)?,
            "queueDepth" => self.queue_depth = parse(key, value)?,
            "follow" => {
                self.follow = value
                    .split(',')
                    .filter(|s| !s.trim().is_empty())
                    .map(|s| parse::<ResourceKind>(key, s))
                    .collect::<Result<_, _>>()?
            }
            "retryFailed" => self.retry_failed = parse_flag(key, value)?,
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        }
        Ok(())
    }

    /// Check cross-field and range constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("rootLimit", self.root_limit)?;
        positive("concurrency", self.concurrency)?;
        positive("batchSize", self.batch_size)?;
        positive("rateLimitBurst", self.rate_limit_burst as usize)?;
        positive("queueDepth", self.queue_depth)?;
        positive("requestTimeoutSecs", self.request_timeout.as_secs() as usize)?;

        if !(self.rate_limit_rps.is_finite() && self.rate_limit_rps > 0.0) {
            return Err(ConfigError::NonPositive {
                key: "rateLimitRPS",
                value: self.rate_limit_rps.to_string(),
            });
        }
        if self.max_backoff < self.initial_backoff {
            return Err(ConfigError::Invalid {
                key: "maxBackoffMs".to_string(),
                value: self.max_backoff.as_millis().to_string(),
                reason: format!(
                    "must be at least initialBackoffMs ({})",
                    self.initial_backoff.as_millis()
                ),
            });
        }
        if self.follow.contains(&ResourceKind::Creature) {
            return Err(ConfigError::Invalid {
                key: "follow".to_string(),
                value: ResourceKind::Creature.to_string(),
                reason: "creatures are roots, not related resources".to_string(),
            });
        }
        Ok(())
    }

    pub fn related_policy(&self) -> RelatedPolicy {
        RelatedPolicy {
            follow: self.follow.clone(),
            moves_per_creature: self.related_limit,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: self.initial_backoff,
            max_delay: self.max_backoff,
        }
    }
}

/// Collect options from the process environment using [`ENV_OPTIONS`].
pub fn options_from_env() -> Vec<(String, String)> {
    ENV_OPTIONS
        .iter()
        .filter_map(|(var, key)| {
            std::env::var(var)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(|v| (key.to_string(), v))
        })
        .collect()
}

fn parse<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key: key.to_string(),
            value: value.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}

fn positive(key: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::NonPositive {
            key,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// The API root must end with a slash, otherwise `Url::join` drops its last
/// segment.
fn parse_base_url(value: &str) -> Result<Url, ConfigError> {
    let with_slash = if value.ends_with('/') {
        value.to_string()
    } else {
        format!("{}/", value)
    };
    Url::parse(&with_slash).map_err(|e| ConfigError::Invalid {
        key: "baseUrl".to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}
