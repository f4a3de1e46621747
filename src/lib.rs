//! Gating decisions taken before the manifests of an Argo CD Application
//! are rendered: spec normalization, destination enrichment, project
//! permission checks, Helm values resolution, and the refresh
//! request/acknowledge protocol shared by clients and the controller.

pub mod application;
pub mod context;
pub mod enrich;
pub mod errors;
pub mod normalize;
pub mod permissions;
pub mod project;
pub mod refresh;
pub mod sync_resource;
pub mod values;

pub use errors::{Error, Result};
