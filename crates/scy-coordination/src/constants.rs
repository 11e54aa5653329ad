//! Fixed namespaces and default timings.
//!
//! Path roots are shared with other clients of the same store and must not
//! change.

/// Root of all distributed lock nodes.
pub const LOCK_BASE_PATH: &str = "/distributedlocks";

/// Root of the RPC service registry (`/scy-rpc/{env}/{service_key}/{address}`).
pub const RPC_BASE_PATH: &str = "/scy-rpc";

/// Root of the messaging consumer-group registry (`/scy-mq/{env}/{topic}/{group}`).
pub const MQ_BASE_PATH: &str = "/scy-mq";

/// Parent of dynamic configuration entries.
pub const DYNAMIC_CONFIG_PATH: &str = "/application/config/dynamic_configuration";

/// Parent of per-node clock watermark entries.
pub const CLOCK_MONITOR_PATH: &str = "/snowflake/forever";

/// Upper bound on a single lock wait before re-trying the create.
pub const DEFAULT_LOCK_RETRY_TIMEOUT_MS: u64 = 3_000;

/// Registry re-assertion period.
pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 60;

/// Full discovery refresh period.
pub const DEFAULT_DISCOVERY_REFRESH_INTERVAL_SECS: u64 = 60;

/// Watch callbacks allowed to run at once.
pub const DEFAULT_MAX_CONCURRENT_CALLBACKS: usize = 10;

/// Hard ceiling for `max_concurrent_callbacks`.
pub const MAX_CONCURRENT_CALLBACKS: usize = 1_024;

/// Delay before the first clock upload.
pub const DEFAULT_CLOCK_INITIAL_DELAY_SECS: u64 = 30;

/// Clock upload period.
pub const DEFAULT_CLOCK_INTERVAL_SECS: u64 = 300;
