//! Event routing from dependents back to their artifact.
//!
//! Every dependent carries [`ARTIFACT_LABEL`] with the artifact's name. Same
//! namespace dependents resolve to the artifact in their own namespace. The
//! copy role binding lives elsewhere and also carries
//! [`ARTIFACT_NAMESPACE_LABEL`], which takes precedence when present.

use crds::{ARTIFACT_LABEL, ARTIFACT_NAMESPACE_LABEL, OSArtifact};
use kube::{Resource, ResourceExt};
use kube_runtime::reflector::ObjectRef;

/// Artifact a dependent belongs to, or `None` for unlabeled objects
pub fn owning_artifact<K>(object: &K) -> Option<ObjectRef<OSArtifact>>
where
    K: Resource,
{
    let labels = object.labels();
    let name = labels.get(ARTIFACT_LABEL).filter(|n| !n.is_empty())?;
    let namespace = labels
        .get(ARTIFACT_NAMESPACE_LABEL)
        .cloned()
        .or_else(|| object.namespace())?;
    Some(ObjectRef::new(name).within(&namespace))
}
