use kube::core::CustomResourceExt;
use oprc_fnc::crd::ManagedFunction;

fn main() {
    let crd = ManagedFunction::crd();
    let yaml = serde_yaml::to_string(&crd).expect("serialize CRD to YAML");
    println!("{}", yaml);
}
