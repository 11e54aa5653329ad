//! Coordination recipes built on a [`CoordinationStore`](scy_store::CoordinationStore).
//!
//! This crate provides the coordination primitives a service process needs
//! from a hierarchical, watch-capable store:
//!
//! - [`DistributedLock`]: mutual exclusion over ephemeral nodes with
//!   watch-driven wake-up and a bounded retry interval
//! - [`WatchDispatcher`]: typed add/update/delete/children callbacks on a
//!   bounded executor, in subtree or one-shot mode
//! - [`ServiceRegistry`] / [`ServiceDiscovery`] / [`RegisterCenter`]:
//!   self-healing service registration and a cached discovery view
//! - [`TopicRegistry`]: consumer-group membership for messaging topics
//! - [`ConfigCenter`]: dynamic configuration with explicit apply callbacks
//! - [`ClockMonitor`]: wall-clock rollback guard
//! - [`CoordinationModule`]: owns all of the above with explicit start and
//!   shutdown
//!
//! Registry and discovery calls favor availability: store faults are logged
//! and answered with a safe default. The lock retries until it succeeds.
//!
//! # Store layout
//!
//! ```text
//! /distributedlocks/{key}                               lock (ephemeral)
//! /scy-rpc/{env}/{service_key}/{address}                {"enable":true} (ephemeral)
//! /scy-mq/{env}/{topic}/{group}                         empty (ephemeral)
//! /application/config/dynamic_configuration/{key}       value (persistent)
//! /snowflake/forever/{node_id}                          clock ms (persistent)
//! ```

pub mod clock;
pub mod config;
pub mod config_center;
pub mod constants;
pub mod discovery;
pub mod error;
pub mod lock;
pub mod module;
pub mod pure;
pub mod register_center;
pub mod registry;
pub mod task;
pub mod topic;
pub mod types;
pub mod watch;

pub use clock::ClockMonitor;
pub use config::ClockMonitorConfig;
pub use config::ConfigError;
pub use config::CoordinationConfig;
pub use config::RegistryConfig;
pub use config::WatchConfig;
pub use config_center::ApplyFn;
pub use config_center::ConfigCenter;
pub use discovery::ServiceDiscovery;
pub use error::CoordinationError;
pub use lock::DistributedLock;
pub use lock::LockConfig;
pub use lock::LockHandle;
pub use module::CoordinationModule;
pub use register_center::RegisterCenter;
pub use registry::ServiceRegistry;
pub use task::PeriodicTask;
pub use topic::TopicRegistry;
pub use types::AddressRecord;
pub use types::LockEntry;
pub use watch::CallbackExecutor;
pub use watch::DataListener;
pub use watch::ListenerId;
pub use watch::WatchDispatcher;
