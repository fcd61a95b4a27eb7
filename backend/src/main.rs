mod config;
mod detection;
mod routes;
mod stats;
mod storage;

use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::{App, HttpServer, http::header, web};
use config::Config;
use detection::service::DetectionService;
use routes::{configure_routes, not_found};
use stats::StatsService;
use storage::upload_store::UploadStore;

fn cors(origins: &[String]) -> Cors {
    origins
        .iter()
        .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
        .allowed_methods(vec!["GET", "POST", "OPTIONS"])
        .allowed_headers(vec![
            header::AUTHORIZATION,
            header::ACCEPT,
            header::CONTENT_TYPE,
        ])
        .max_age(3600)
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = Config::load().map_err(|e| {
        log::error!("Invalid configuration: {}", e);
        std::io::Error::other(e)
    })?;

    let store = UploadStore::new(&config.upload);
    store.ensure_dirs().map_err(|e| {
        log::error!(
            "Cannot prepare upload directory {}: {}",
            config.upload.dir.display(),
            e
        );
        std::io::Error::other(e)
    })?;
    std::fs::create_dir_all(&config.model.dir)?;

    let service = DetectionService::from_config(&config).map_err(|e| {
        log::error!("Detection service failed to start: {}", e);
        std::io::Error::other(e)
    })?;

    let service = web::Data::new(service);
    let store = web::Data::new(store);
    let stats = web::Data::new(StatsService::new());
    let bind_address = config.bind_address();
    let workers = config.server.workers;
    let config = web::Data::new(config);

    log::info!(
        "Starting server on {} with {} workers (model loaded: {}, face detector loaded: {})",
        bind_address,
        workers,
        service.is_model_loaded(),
        service.is_face_detector_loaded()
    );

    HttpServer::new(move || {
        App::new()
            .wrap(cors(&config.server.cors_origins))
            .wrap(Logger::default())
            .app_data(config.clone())
            .app_data(service.clone())
            .app_data(store.clone())
            .app_data(stats.clone())
            .configure(configure_routes)
            .default_service(web::to(not_found))
    })
    .workers(workers)
    .bind(&bind_address)?
    .run()
    .await?;

    log::info!("Server stopped");
    Ok(())
}
