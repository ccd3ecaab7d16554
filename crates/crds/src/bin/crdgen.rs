//! Prints the OSArtifact CustomResourceDefinition as YAML.
//!
//! Usage: `cargo run -p crds --bin crdgen > config/crd/osartifact.yaml`

use crds::OSArtifact;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&OSArtifact::crd())?);
    Ok(())
}
