use anyhow::{bail, Context, Result};

use netconverge::{
    config::Config,
    k8s::{ClusterResource, KubeCluster},
    nmstate::{parse_manifest, NodeNetworkConfigurationPolicy, PolicyFixture},
    telemetry::init_tracing,
};

const USAGE: &str = "usage: netconverge <render|apply|delete> <manifest.yaml>";

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (command, path) = match args.as_slice() {
        [command, path] => (command.as_str(), path.as_str()),
        _ => bail!(USAGE),
    };

    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read manifest {}", path))?;
    let policies = parse_manifest(&text)?;
    tracing::info!(count = policies.len(), manifest = %path, "Manifest loaded");

    match command {
        "render" => render(&policies),
        "apply" => apply(policies).await,
        "delete" => delete(policies).await,
        other => bail!("unknown command {:?}\n{}", other, USAGE),
    }
}

fn render(policies: &[NodeNetworkConfigurationPolicy]) -> Result<()> {
    for policy in policies {
        let body = policy.to_body()?;
        println!("---\n{}", serde_yaml::to_string(&body)?);
    }
    Ok(())
}

async fn connect() -> Result<(KubeCluster, Config)> {
    let config = Config::load()?;
    let cluster = KubeCluster::new(&config).await?;
    if !cluster.health_check().await? {
        bail!("Kubernetes API server is not healthy");
    }
    tracing::info!("Connected to Kubernetes cluster");
    Ok((cluster, config))
}

/// Deploy every policy and leave it in place
async fn apply(policies: Vec<NodeNetworkConfigurationPolicy>) -> Result<()> {
    let (cluster, config) = connect().await?;
    for policy in policies {
        let name = policy.name().to_string();
        let mut fixture = PolicyFixture::new(&cluster, policy, config.timeouts()).teardown(false);
        fixture
            .deploy()
            .await
            .with_context(|| format!("Failed to apply policy {}", name))?;
        // Teardown is off: this only releases ownership
        fixture.clean_up().await?;
        tracing::info!(policy = %name, "Policy applied");
    }
    Ok(())
}

/// Remove the interfaces of every policy, then the policies, in reverse order
async fn delete(policies: Vec<NodeNetworkConfigurationPolicy>) -> Result<()> {
    let (cluster, config) = connect().await?;
    let mut failures = 0;
    for policy in policies.into_iter().rev() {
        let name = policy.name().to_string();
        let mut fixture = PolicyFixture::new(&cluster, policy, config.timeouts());
        if let Err(e) = fixture.adopt().await {
            tracing::warn!(policy = %name, error = %e, "Policy not found, skipping");
            continue;
        }
        match fixture.clean_up().await {
            Ok(()) => tracing::info!(policy = %name, state = %fixture.state(), "Policy removed"),
            Err(e) => {
                tracing::error!(policy = %name, error = %e, "Failed to delete policy");
                failures += 1;
            }
        }
    }
    if failures > 0 {
        bail!("{} policies could not be deleted", failures);
    }
    Ok(())
}
