//! gracl - hierarchical access control
//!
//! Resolves subject -> resource permissions over a static collection
//! hierarchy and synthesizes bulk query filters from explicit grant/deny
//! edges. It exposes all modules for testing purposes.

pub mod authz;
pub mod entities;
pub mod errors;
pub mod settings;
pub mod storage;

pub use authz::engine::Gracl;
pub use authz::errors::AuthzError;
pub use authz::AuthzState;
