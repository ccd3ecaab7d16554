//! OSArtifact CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the OS artifact build operator,
//! plus the label, annotation and finalizer contract shared by every
//! object the operator creates.

pub mod conditions;
pub mod labels;
pub mod os_artifact;
pub mod references;

pub use conditions::*;
pub use labels::*;
pub use os_artifact::*;
pub use references::*;
