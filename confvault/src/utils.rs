//! Utility functions

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::errors::TransportError;

/// Version information for the binary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Get version information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

/// Cooldown options for exponential backoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CooldownOptions {
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for CooldownOptions {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Calculate exponential backoff delay
pub fn calc_exp_backoff(options: &CooldownOptions, attempt: u32) -> Duration {
    let delay_secs = options.base_delay.as_secs_f64() * options.multiplier.powi(attempt as i32);
    let capped_delay = delay_secs.min(options.max_delay.as_secs_f64()).max(0.0);
    Duration::from_secs_f64(capped_delay)
}

/// Bounded-attempt retry policy for device operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,

    /// Delay schedule between attempts
    #[serde(default)]
    pub cooldown: CooldownOptions,
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            cooldown: CooldownOptions::default(),
        }
    }

    /// Delay to wait after the given (zero-based) failed attempt
    pub fn delay_after(&self, attempt: u32) -> Duration {
        calc_exp_backoff(&self.cooldown, attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            cooldown: CooldownOptions::default(),
        }
    }
}

/// Per-operation time budgets for device I/O
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationTimeouts {
    #[serde(with = "duration_millis", default = "default_fetch_timeout")]
    pub fetch: Duration,
    #[serde(with = "duration_millis", default = "default_apply_timeout")]
    pub apply: Duration,
    #[serde(with = "duration_millis", default = "default_fetch_timeout")]
    pub verify: Duration,
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_apply_timeout() -> Duration {
    Duration::from_secs(120)
}

impl Default for OperationTimeouts {
    fn default() -> Self {
        Self {
            fetch: default_fetch_timeout(),
            apply: default_apply_timeout(),
            verify: default_fetch_timeout(),
        }
    }
}

/// Run a transport operation under a time budget, retrying transient
/// failures with backoff. Returns the value and the number of attempts made.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    budget: Duration,
    device: &str,
    operation: &str,
    mut op: F,
) -> (Result<T, TransportError>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        let result = match tokio::time::timeout(budget, op()).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout {
                device: device.to_string(),
                operation: operation.to_string(),
                after: budget,
            }),
        };
        attempt += 1;

        match result {
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = policy.delay_after(attempt - 1);
                warn!(
                    "{} on {} failed (attempt {}/{}), retrying in {:?}: {}",
                    operation, device, attempt, max_attempts, delay, e
                );
                tokio::time::sleep(delay).await;
            }
            other => return (other, attempt),
        }
    }
}

/// Generate a random UUID v4
pub fn generate_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Calculate SHA256 hash of data
pub fn sha256_hash(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Map a device id onto a name that is safe as a single path component
pub fn sanitize_file_name(name: &str) -> String {
    let safe: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if safe.chars().all(|c| c == '.') {
        format!("_{}", safe)
    } else {
        safe
    }
}

/// Serde helper storing a `Duration` as integer milliseconds
pub mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
