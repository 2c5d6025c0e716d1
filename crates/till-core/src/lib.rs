//! Core extension runtime for the Till point-of-service host.
//!
//! Till is extended at runtime by installable packages ("extensions") that
//! contribute data models, permissions, URL prefixes, and menu entries. This
//! crate implements the runtime around those packages:
//!
//! - manifest model and validation against the host's dependency allow-list
//! - lifecycle state derived from directory naming, with atomic transitions
//! - schema conflict detection against the live store
//! - the archive install/uninstall pipeline
//! - the startup loader and in-process registry
//! - entitlement checks for paid extensions
//!
//! Persistence lives in `till-store`, which implements the backend traits
//! declared in [`extension::backend`]. The `till` binary wires the two
//! together.

pub mod config;
pub mod error;
pub mod extension;

pub use error::{Error, Result};
