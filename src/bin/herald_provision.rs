//! herald-provision: Subscription provisioner
//!
//! Creates every configured subscription's resources (error queue, queue with
//! redrive policy, topic, send policy, topic subscription) and exits. Safe to
//! run repeatedly: existing resources are left untouched.
//!
//! ## Configuration
//! - First argument: path to a YAML configuration file (optional)
//! - HERALD_CONFIG: path to a YAML configuration file (optional)
//! - HERALD__*: overrides, e.g. HERALD__AWS__REGION=eu-west-1
//! - HERALD_LOG: tracing filter (default: info)

use tracing::{error, info};

use herald::config::HeraldConfig;
use herald::interfaces::QueueService;
use herald::provisioning::QueueProvisioner;
use herald::utils::bootstrap::init_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let path = std::env::args().nth(1);
    let config = HeraldConfig::load(path.as_deref())?;
    let subscriptions = config.subscription_configs()?;
    if subscriptions.is_empty() {
        info!("No subscriptions configured");
        return Ok(());
    }

    let (queues, topics) = herald::aws::connect(&config.aws).await?;
    let region = queues.region().to_string();
    let provisioner = QueueProvisioner::new(queues, topics);

    for subscription in &subscriptions {
        if let Err(e) = provisioner.verify_or_create_queue(&region, subscription).await {
            error!(topic = %subscription.topic(), error = %e, "Provisioning failed");
            return Err(e.into());
        }
    }

    info!(subscriptions = subscriptions.len(), "herald-provision finished");
    Ok(())
}
