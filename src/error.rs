//! Unified error types for the fan control and monitor engine.
//!
//! A single `Error` enum that every subsystem funnels into, keeping the
//! event loop's error handling uniform. Errors are surfaced structurally
//! and are never used for control flow across action boundaries — an
//! action that fails silently is considered to have produced no update.

use std::fmt;

/// Every fallible operation in the engine funnels into this type.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Missing required field, unknown action name, or other malformed
    /// configuration. Fatal at startup; on reload, the previous
    /// configuration is kept and the error is only logged.
    ConfigParse(ConfigParseError),
    /// Object cache lookup miss. Callers generally recover silently,
    /// treating the value as "not present".
    NotCached { path: String, interface: String, property: String },
    /// The service owning a path/interface has no bus owner.
    BrokerUnavailable { service: String },
    /// A broker method call, property get/set, or subscription failed.
    Broker(BrokerError),
    /// A rotor sensor stayed out of range past its fault timer.
    HardwareFault(String),
    /// No rotor sensors appeared on the bus at power-on.
    FanControllerOffline,
    /// The inventory service rejected or failed a functional-state write.
    InventoryWriteFailure { path: String, reason: String },
    /// A power-off unit start request failed at the broker.
    PowerOffRequestFailure { reason: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigParse(e) => write!(f, "config parse: {e}"),
            Self::NotCached { path, interface, property } => {
                write!(f, "not cached: {path} {interface} {property}")
            }
            Self::BrokerUnavailable { service } => write!(f, "broker unavailable: {service}"),
            Self::Broker(e) => write!(f, "broker: {e}"),
            Self::HardwareFault(msg) => write!(f, "hardware fault: {msg}"),
            Self::FanControllerOffline => write!(f, "fan controller offline"),
            Self::InventoryWriteFailure { path, reason } => {
                write!(f, "inventory write failed for {path}: {reason}")
            }
            Self::PowerOffRequestFailure { reason } => {
                write!(f, "power-off request failed: {reason}")
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<ConfigParseError> for Error {
    fn from(e: ConfigParseError) -> Self {
        Self::ConfigParse(e)
    }
}

impl From<BrokerError> for Error {
    fn from(e: BrokerError) -> Self {
        Self::Broker(e)
    }
}

/// A single typed failure carrying name, path, interface, and the
/// original broker error.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerError {
    pub service: String,
    pub path: String,
    pub interface: String,
    pub message: String,
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}: {}",
            self.service, self.path, self.interface, self.message
        )
    }
}

/// Configuration parse failure: the action/trigger/group name and a
/// human-readable detail.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigParseError {
    pub context: String,
    pub detail: String,
}

impl ConfigParseError {
    pub fn new(context: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            detail: detail.into(),
        }
    }
}

impl fmt::Display for ConfigParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.context, self.detail)
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
