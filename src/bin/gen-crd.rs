use kube::CustomResourceExt;
use pylon::crd::revision::Revision;
use pylon::crd::route::Route;
use pylon::crd::serverless_service::ServerlessService;

fn main() -> anyhow::Result<()> {
    // Use: cargo run --bin gen-crd | python3 -c "import sys,json,yaml; print(yaml.dump_all(json.load(sys.stdin), default_flow_style=False))"
    // to convert to YAML
    let crds = vec![
        serde_json::to_value(Route::crd())?,
        serde_json::to_value(Revision::crd())?,
        serde_json::to_value(ServerlessService::crd())?,
    ];

    println!("{}", serde_json::to_string_pretty(&crds)?);
    Ok(())
}
