//! CRD YAML Generator
//!
//! This binary generates the Kubernetes CRD manifest for the NewDep
//! custom resource.
//!
//! Usage: cargo run --bin crdgen > deploy/crds/newdep.yaml

use newdep_operator::crd::generate_crds;

fn main() -> anyhow::Result<()> {
    for crd in generate_crds()? {
        println!("---");
        print!("{}", crd);
    }
    Ok(())
}
