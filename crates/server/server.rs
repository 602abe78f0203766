use actix_web::{middleware, web, web::Data, App, HttpServer};
use anyhow::Result;

use janitor::service::{JanitorService, State};

use crate::handlers::{health, instances, metrics};

/// Register every route of the service.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health::index)
        .service(health::health)
        .service(metrics::metrics)
        .service(instances::config_create_or_replace)
        .service(instances::config_delete)
        .service(instances::basic_auth_create_or_replace)
        .service(instances::basic_auth_delete)
        .service(instances::cert_manager_delete)
        .service(instances::check_if_ready)
        .service(instances::retrieve_service_ip)
        .service(instances::check_service_exists)
        .service(instances::retrieve_pod_list)
        .service(instances::retrieve_pod_logs)
        .service(instances::create_namespace);
}

/// Configure and start the HTTP server
pub async fn start_server(state: State, service: JanitorService, listen_addr: &str) -> Result<()> {
    let service = Data::new(service);
    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(state.clone()))
            .app_data(service.clone())
            .wrap(middleware::Logger::default().exclude("/health"))
            .configure(configure)
    })
    .bind(listen_addr)?
    .shutdown_timeout(5);

    server.run().await?;
    Ok(())
}
