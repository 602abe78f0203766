use std::sync::Arc;
use tracing::info;

use janitor::cluster::KubeCluster;
use janitor::service::State;
use janitor::source::GitLabClient;
use janitor::util::{settings::Settings, telemetry};

mod handlers;
mod server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env();
    telemetry::init(settings.log_format);

    let client = kube::Client::try_default().await?;
    let gitlab = GitLabClient::new(
        &settings.gitlab_api_url,
        settings.gitlab_token.clone(),
        &settings.gitlab_project_prefix,
    )?;

    let state = State::default();
    let service = state.to_service(
        Arc::new(KubeCluster::new(client)),
        Arc::new(gitlab),
        settings.config_update_strategy,
        &settings.gitlab_ref,
    )?;

    info!(
        "Starting janitor on {} (GitLab {}, ref {}, config updates {:?})",
        settings.listen_addr, settings.gitlab_api_url, settings.gitlab_ref, settings.config_update_strategy
    );
    server::start_server(state, service, &settings.listen_addr).await
}
