// Command line and environment configuration.

use crate::web::RequestLimits;
use crate::worker::RetryPolicy;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Command line arguments for product-server
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct AppConfig {
    /// Hostname/IP to bind the server to. "*" listens on all interfaces.
    #[arg(long, env = "PRODUCT_SERVER_HOST", default_value = "*")]
    pub host: String,

    /// Port number to listen on.
    #[arg(short, long, env = "PRODUCT_SERVER_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Directory uploaded objects are stored under.
    #[arg(long, env = "PRODUCT_SERVER_STORAGE_ROOT", default_value = "./uploads")]
    pub storage_root: PathBuf,

    /// Maximum accepted request body, in bytes.
    #[arg(
        long,
        env = "PRODUCT_SERVER_MAX_BODY_SIZE",
        default_value_t = 32 * 1024 * 1024,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub max_body_size: u64,

    /// Longest object key derived from a client filename.
    #[arg(
        long,
        env = "PRODUCT_SERVER_MAX_FILENAME_LENGTH",
        default_value_t = 128,
        value_parser = clap::value_parser!(u64).range(16..)
    )]
    pub max_filename_length: u64,

    /// How many suffixed keys to try before giving up on a name collision.
    #[arg(
        long,
        env = "PRODUCT_SERVER_KEY_ATTEMPTS",
        default_value_t = 8,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub key_attempts: u64,

    /// Jobs that may wait for a worker before uploads are refused with 503.
    #[arg(
        long,
        env = "PRODUCT_SERVER_QUEUE_CAPACITY",
        default_value_t = 1024,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub queue_capacity: u64,

    /// Number of image workers.
    #[arg(
        long,
        env = "PRODUCT_SERVER_WORKERS",
        default_value_t = 1,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub workers: u64,

    /// Retries after the first attempt for transient job failures.
    #[arg(long, env = "PRODUCT_SERVER_RETRY_ATTEMPTS", default_value_t = 3)]
    pub retry_attempts: u32,

    #[arg(long, env = "PRODUCT_SERVER_BACKOFF_BASE_MS", default_value_t = 200)]
    pub backoff_base_ms: u64,

    #[arg(long, env = "PRODUCT_SERVER_BACKOFF_CAP_MS", default_value_t = 5000)]
    pub backoff_cap_ms: u64,

    /// Bound on each shutdown phase (in-flight requests, then worker drain).
    #[arg(long, env = "PRODUCT_SERVER_SHUTDOWN_GRACE_SECS", default_value_t = 30)]
    pub shutdown_grace_secs: u64,

    #[arg(
        long,
        env = "PRODUCT_SERVER_REQUEST_TIMEOUT_SECS",
        default_value_t = 60,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub request_timeout_secs: u64,

    /// Thumbnail edge lengths, comma separated.
    #[arg(
        long,
        env = "PRODUCT_SERVER_THUMBNAIL_SIZES",
        default_value = "256",
        value_delimiter = ',',
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub thumbnail_sizes: Vec<u32>,

    /// Products kept in the read cache.
    #[arg(
        long,
        env = "PRODUCT_SERVER_CACHE_CAPACITY",
        default_value_t = 1024,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub cache_capacity: u64,
}

impl AppConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry_attempts,
            base: Duration::from_millis(self.backoff_base_ms),
            cap: Duration::from_millis(self.backoff_cap_ms.max(self.backoff_base_ms)),
        }
    }

    pub fn request_limits(&self) -> RequestLimits {
        RequestLimits {
            max_body_size: to_usize(self.max_body_size),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn queue_capacity(&self) -> usize {
        to_usize(self.queue_capacity)
    }

    pub fn worker_count(&self) -> usize {
        to_usize(self.workers)
    }

    pub fn cache_capacity(&self) -> usize {
        to_usize(self.cache_capacity)
    }

    pub fn max_filename_length(&self) -> usize {
        to_usize(self.max_filename_length)
    }

    pub fn key_attempts(&self) -> usize {
        to_usize(self.key_attempts)
    }
}

fn to_usize(value: u64) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}
