use clap::builder::TypedValueParser as _;
use clap::Parser;
use dotenvy::dotenv;
use log::LevelFilter;
use std::fmt;
use std::str::FromStr;

/// Default Redis connection URL used when `REDIS_URL` is not set.
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379/";

/// Which pub/sub backend to construct at startup. Everything downstream of
/// construction sees only the `PubSub` contract.
#[derive(Clone, Debug, PartialEq)]
pub enum PubSubBackend {
    Local,
    Redis,
}

#[derive(Debug, PartialEq, Eq)]
pub struct PubSubBackendParseError;

impl FromStr for PubSubBackend {
    type Err = PubSubBackendParseError;
    fn from_str(backend: &str) -> Result<PubSubBackend, Self::Err> {
        match backend.to_lowercase().as_str() {
            "local" => Ok(PubSubBackend::Local),
            "redis" => Ok(PubSubBackend::Redis),
            _ => Err(PubSubBackendParseError),
        }
    }
}

impl fmt::Display for PubSubBackend {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PubSubBackend::Local => write!(f, "local"),
            PubSubBackend::Redis => write!(f, "redis"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum RustEnv {
    Development,
    Production,
    Staging,
}

#[derive(Debug, PartialEq, Eq)]
pub struct RustEnvParseError;

impl FromStr for RustEnv {
    type Err = RustEnvParseError;
    fn from_str(level: &str) -> Result<RustEnv, Self::Err> {
        match level.to_lowercase().as_str() {
            "development" => Ok(RustEnv::Development),
            "production" => Ok(RustEnv::Production),
            "staging" => Ok(RustEnv::Staging),
            _ => Err(RustEnvParseError),
        }
    }
}

impl fmt::Display for RustEnv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RustEnv::Development => write!(f, "development"),
            RustEnv::Production => write!(f, "production"),
            RustEnv::Staging => write!(f, "staging"),
        }
    }
}

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// The pub/sub backend to construct: in-process fanout for a single
    /// instance, or Redis-backed fanout for horizontally scaled deployments.
    #[arg(
        long,
        env,
        default_value_t = PubSubBackend::Local,
        value_parser = clap::builder::PossibleValuesParser::new(["local", "redis"])
            .map(|s| s.parse::<PubSubBackend>().unwrap()),
    )]
    pub pubsub_backend: PubSubBackend,

    /// Sets the Redis URL the distributed pub/sub backend connects to
    #[arg(long, env, default_value = DEFAULT_REDIS_URL)]
    redis_url: Option<String>,

    /// Capacity of each subscription's delivery queue; a subscriber that
    /// falls this many messages behind has further messages dropped for it
    #[arg(long, env, default_value_t = pubsub::DEFAULT_QUEUE_CAPACITY)]
    pub pubsub_queue_capacity: usize,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(
        short,
        long,
        env,
        default_value_t = LevelFilter::Info,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .map(|s| s.parse::<LevelFilter>().unwrap()),
        )]
    pub log_level_filter: LevelFilter,

    /// Set the Rust runtime environment to use.
    #[arg(
    short,
    long,
    env,
    default_value_t = RustEnv::Development,
    value_parser = clap::builder::PossibleValuesParser::new([
        "DEVELOPMENT", "PRODUCTION", "STAGING",
        "development", "production", "staging"
    ])
        .map(|s| s.parse::<RustEnv>().unwrap()),
    )]
    pub runtime_env: RustEnv,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        // Load .env file first
        dotenv().ok();
        // Then parse the command line parameters and flags
        Config::parse()
    }

    pub fn redis_url(&self) -> &str {
        self.redis_url.as_ref().expect("No Redis URL provided")
    }

    pub fn set_redis_url(mut self, redis_url: String) -> Self {
        self.redis_url = Some(redis_url);
        self
    }

    pub fn runtime_env(&self) -> RustEnv {
        self.runtime_env.clone()
    }

    pub fn is_production(&self) -> bool {
        self.runtime_env() == RustEnv::Production
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pubsub_backend_parses_known_values_case_insensitively() {
        assert_eq!("local".parse::<PubSubBackend>(), Ok(PubSubBackend::Local));
        assert_eq!("REDIS".parse::<PubSubBackend>(), Ok(PubSubBackend::Redis));
        assert_eq!(
            "kafka".parse::<PubSubBackend>(),
            Err(PubSubBackendParseError)
        );
    }

    #[test]
    fn test_pubsub_backend_display_round_trips_through_from_str() {
        for backend in [PubSubBackend::Local, PubSubBackend::Redis] {
            assert_eq!(backend.to_string().parse::<PubSubBackend>(), Ok(backend));
        }
    }

    #[test]
    fn test_config_defaults_to_the_local_backend() {
        let config = Config::try_parse_from(["service"]).unwrap();

        assert_eq!(config.pubsub_backend, PubSubBackend::Local);
        assert_eq!(config.redis_url(), DEFAULT_REDIS_URL);
        assert_eq!(config.pubsub_queue_capacity, pubsub::DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn test_backend_selection_is_parsed_from_the_command_line() {
        let config = Config::try_parse_from(["service", "--pubsub-backend", "redis"]).unwrap();

        assert_eq!(config.pubsub_backend, PubSubBackend::Redis);
    }
}
