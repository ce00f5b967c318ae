//! Provider-facing descriptors (data) and strategies (behavior).
//!
//! `descriptor` exposes validated metadata (`ProviderDescriptor`) covering the
//! authorization, token, and tenant-discovery endpoints plus the tenant-scoped API base.
//! `strategy` defines [`ProviderStrategy`], the hook flows use to decorate token requests,
//! classify token endpoint failures, and pick a tenant after authorization.

pub mod descriptor;
pub mod resource;
pub mod strategy;

pub use descriptor::*;
pub use resource::*;
pub use strategy::*;
