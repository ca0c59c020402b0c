//! Configuration for the engine.

use rand::Rng;
use std::time::Duration;

/// Configuration for retry behavior of the sync loop.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a retry configuration with the given bounds.
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Calculates the delay for a given attempt (0-indexed, 0 means no
    /// failure yet). Never exceeds `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let base_delay =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.max(1.0).powi(exponent);
        let max = self.max_delay.as_secs_f64();
        let delay_secs = base_delay.min(max);

        let delay_secs = if self.add_jitter {
            // Up to 25% on top, still capped.
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen_range(0.0..1.0);
            (delay_secs + jitter).min(max)
        } else {
            delay_secs
        };
        Duration::from_secs_f64(delay_secs)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(60))
    }
}

/// Configuration for the sync loop.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Long-poll timeout passed to the transport.
    pub timeout: Duration,
    /// Backoff after retryable failures.
    pub retry: RetryConfig,
}

impl SyncConfig {
    /// Creates a sync configuration.
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }

    /// Sets the long-poll timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the decryption coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptionConfig {
    /// Number of worker tasks.
    pub workers: usize,
    /// Maximum tasks handled per pass.
    pub batch_size: usize,
    /// Sync cycles after which a task waiting for its key is retried anyway.
    pub retry_after_cycles: u64,
    /// Key-missing attempts before the event is marked undecryptable.
    pub max_key_attempts: u32,
}

impl DecryptionConfig {
    /// Creates a decryption configuration.
    pub fn new() -> Self {
        Self {
            workers: 2,
            batch_size: 32,
            retry_after_cycles: 10,
            max_key_attempts: 5,
        }
    }

    /// Sets the worker count (at least one).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Sets the batch size (at least one).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Sets how many sync cycles a parked task waits.
    pub fn with_retry_after_cycles(mut self, cycles: u64) -> Self {
        self.retry_after_cycles = cycles.max(1);
        self
    }

    /// Sets the attempt limit (at least one).
    pub fn with_max_key_attempts(mut self, attempts: u32) -> Self {
        self.max_key_attempts = attempts.max(1);
        self
    }
}

impl Default for DecryptionConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the command dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandConfig {
    /// Deadline for commands that do not set their own.
    pub default_deadline: Duration,
    /// Server-side typing expiry when a command gives none.
    pub typing_timeout: Duration,
}

impl CommandConfig {
    /// Creates a command configuration.
    pub fn new() -> Self {
        Self {
            default_deadline: Duration::from_secs(30),
            typing_timeout: Duration::from_secs(30),
        }
    }

    /// Sets the default deadline.
    pub fn with_default_deadline(mut self, deadline: Duration) -> Self {
        self.default_deadline = deadline;
        self
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the notification feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmitterConfig {
    /// Notifications buffered per subscriber before the oldest are dropped.
    pub capacity: usize,
}

impl EmitterConfig {
    /// Creates an emitter configuration.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
        }
    }
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Everything the engine can be tuned with.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineConfig {
    /// Sync loop.
    pub sync: SyncConfig,
    /// Decryption coordinator.
    pub decryption: DecryptionConfig,
    /// Command dispatcher.
    pub commands: CommandConfig,
    /// Notification feed.
    pub emitter: EmitterConfig,
}

impl EngineConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the sync configuration.
    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }

    /// Sets the decryption configuration.
    pub fn with_decryption(mut self, decryption: DecryptionConfig) -> Self {
        self.decryption = decryption;
        self
    }

    /// Sets the command configuration.
    pub fn with_commands(mut self, commands: CommandConfig) -> Self {
        self.commands = commands;
        self
    }

    /// Sets the emitter configuration.
    pub fn with_emitter(mut self, emitter: EmitterConfig) -> Self {
        self.emitter = emitter;
        self
    }
}
