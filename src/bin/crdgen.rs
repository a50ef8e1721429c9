//! CRD YAML Generator
//!
//! This binary generates the Kubernetes CRD manifest for the custom resource
//! owned by the volume-snapshot-mirror-operator.
//!
//! Usage: cargo run --bin crdgen > deploy/crds/all.yaml

use volume_snapshot_mirror_operator::crd::generate_crds;

fn main() -> anyhow::Result<()> {
    for crd in generate_crds()? {
        println!("---");
        print!("{}", crd);
    }
    Ok(())
}
