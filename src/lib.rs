//! sdkbuilder - layered SDK build orchestrator.
//!
//! Composes a build tree for an embedded firmware target out of common,
//! SDK-family and target layers, then drives the SDK's build in a
//! container.

pub mod commands;
pub mod common;
pub mod config;
pub mod container;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod overlay;
pub mod paths;
pub mod preflight;
pub mod process;
pub mod sdk;
pub mod source;
pub mod spec;
pub mod store;
pub mod target;
pub mod timing;

pub use error::{BuildError, ErrorKind};
