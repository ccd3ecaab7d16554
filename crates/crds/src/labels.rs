//! Label, annotation and finalizer keys shared between the CRD and the controller.
//!
//! Every dependent object carries [`ARTIFACT_LABEL`] with the owning artifact's
//! name as its value. This label is the only way the controller discovers an
//! artifact's dependents and routes their events back to the artifact.

/// Label identifying the owning OSArtifact by name
pub const ARTIFACT_LABEL: &str = "build.kairos.io/artifact";

/// Label identifying the owning OSArtifact's namespace on cross-namespace objects
pub const ARTIFACT_NAMESPACE_LABEL: &str = "build.kairos.io/artifact-namespace";

/// Annotation holding an exporter job's position in the artifact's exporter list
pub const EXPORTER_INDEX_ANNOTATION: &str = "build.kairos.io/export-index";

/// Finalizer gating OSArtifact deletion until cleanup has run
pub const ARTIFACT_FINALIZER: &str = "build.kairos.io/osbuilder-finalizer";

/// Condition type reported on every OSArtifact
pub const READY_CONDITION: &str = "Ready";

/// Label selector matching every dependent of the named artifact
#[must_use]
pub fn artifact_selector(artifact_name: &str) -> String {
    format!("{ARTIFACT_LABEL}={artifact_name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_selector() {
        assert_eq!(artifact_selector("hello"), "build.kairos.io/artifact=hello");
    }
}
