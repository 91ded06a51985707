//! rffmpeg-core: configuration shared by the autoscaler crates.
//!
//! The daemon reads a single TOML file (plus a handful of environment
//! overrides for secrets) into [`AutoscalerConfig`]. Library crates only see
//! the sections they need: the store gets [`DatabaseConfig`], the lifecycle
//! manager gets [`CloudConfig`] and [`FallbackConfig`], the control loop gets
//! [`ScalingConfig`].

pub mod config;
pub mod error;

pub use config::{
    AutoscalerConfig, CloudConfig, DatabaseConfig, DatabaseKind, FallbackConfig, MediaConfig,
    ScalingConfig, DEFAULT_CONFIG_PATH, ENV_PREFIX,
};
pub use error::{ConfigError, ConfigResult};
