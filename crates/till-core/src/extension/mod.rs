//! Extension runtime: manifests, lifecycle, validation, installation,
//! loading, and entitlement.
//!
//! The flow through this module mirrors an extension's life:
//! [`archive`] unpacks a package, [`validate`] and [`conflict`] gate it,
//! [`install`] orchestrates the pipeline, [`state`] flips it active or
//! inactive on disk, and on the next host start [`loader`] registers it
//! with the in-process [`registry`]. [`entitlement`] runs independently at
//! request time for paid extensions.

pub mod archive;
pub mod backend;
pub mod conflict;
pub mod entitlement;
pub mod i18n;
pub mod install;
pub mod loader;
pub mod manifest;
pub mod registry;
pub mod scaffold;
pub mod state;
pub mod validate;

pub use backend::{CatalogEntry, ExtensionCatalog, PermissionSyncReport, SchemaBackend};
pub use conflict::LiveSchema;
pub use entitlement::{AccessDecision, EntitlementClient, SubscriptionChecker};
pub use install::{InstallOutcome, Installer, UninstallOutcome};
pub use loader::{LoadReport, Loader};
pub use manifest::{ExtensionManifest, PricingKind, MANIFEST_FILE_NAME};
pub use registry::ExtensionRegistry;
pub use state::{LifecycleState, StateManager, StateTransition};
pub use validate::{SecurityWarning, ValidationReport};
