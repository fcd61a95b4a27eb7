use actix_web::{HttpResponse, web};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use sysinfo::{Disks, ProcessesToUpdate, System};

use super::error::ApiError;
use crate::config::Config;
use crate::detection::service::DetectionService;
use crate::storage::upload_store::UploadStore;

pub const SERVICE_NAME: &str = "deepfake-detection-api";

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/health")
            .route("", web::get().to(health))
            .route("/", web::get().to(health))
            .route("/live", web::get().to(live))
            .route("/ready", web::get().to(ready))
            .route("/detailed", web::get().to(detailed)),
    );
}

#[derive(Serialize)]
struct BasicHealth {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
struct Liveness {
    alive: bool,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, PartialEq)]
struct ReadinessChecks {
    upload_directory_exists: bool,
    model_directory_exists: bool,
    model_loaded: bool,
    face_detector_loaded: bool,
    upload_writable: bool,
}

impl ReadinessChecks {
    fn collect(config: &Config, store: &UploadStore, service: &DetectionService) -> Self {
        let upload_directory_exists = store.root().is_dir();
        Self {
            upload_directory_exists,
            model_directory_exists: config.model.dir.is_dir(),
            model_loaded: service.is_model_loaded(),
            face_detector_loaded: service.is_face_detector_loaded(),
            upload_writable: upload_directory_exists && store.is_writable(),
        }
    }

    fn all_passed(&self) -> bool {
        self.upload_directory_exists
            && self.model_directory_exists
            && self.model_loaded
            && self.face_detector_loaded
            && self.upload_writable
    }
}

#[derive(Serialize)]
struct Readiness {
    ready: bool,
    checks: ReadinessChecks,
    timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
struct SystemReport {
    cpu_percent: f32,
    memory_total: u64,
    memory_available: u64,
    memory_percent: f64,
    disk_total: u64,
    disk_free: u64,
    disk_percent: f64,
}

#[derive(Serialize)]
struct ProcessReport {
    pid: u32,
    memory_rss: u64,
    memory_vms: u64,
    cpu_percent: f32,
}

#[derive(Serialize)]
struct DetailedHealth {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    system: SystemReport,
    process: Option<ProcessReport>,
    checks: ReadinessChecks,
    timestamp: DateTime<Utc>,
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(BasicHealth {
        status: "healthy",
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now(),
    })
}

async fn live() -> HttpResponse {
    HttpResponse::Ok().json(Liveness {
        alive: true,
        timestamp: Utc::now(),
    })
}

async fn ready(
    config: web::Data<Config>,
    store: web::Data<UploadStore>,
    service: web::Data<DetectionService>,
) -> HttpResponse {
    let checks = ReadinessChecks::collect(&config, &store, &service);
    let ready = checks.all_passed();
    if !ready {
        log::warn!("Readiness check failed: {:?}", checks);
    }

    let body = Readiness {
        ready,
        checks,
        timestamp: Utc::now(),
    };
    if ready {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

async fn detailed(
    config: web::Data<Config>,
    store: web::Data<UploadStore>,
    service: web::Data<DetectionService>,
) -> Result<HttpResponse, ApiError> {
    let upload_dir = store.root().to_path_buf();
    let (system, process) = web::block(move || sample_system(&upload_dir)).await?;
    let checks = ReadinessChecks::collect(&config, &store, &service);

    Ok(HttpResponse::Ok().json(DetailedHealth {
        status: if checks.all_passed() { "healthy" } else { "degraded" },
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        system,
        process,
        checks,
        timestamp: Utc::now(),
    }))
}

fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        used as f64 / total as f64 * 100.0
    }
}

/// Blocks for one CPU sampling interval.
fn sample_system(upload_dir: &Path) -> (SystemReport, Option<ProcessReport>) {
    let pid = sysinfo::get_current_pid().ok();
    let mut sys = System::new();
    sys.refresh_memory();
    sys.refresh_cpu_usage();
    if let Some(pid) = pid {
        sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    }
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    sys.refresh_cpu_usage();
    if let Some(pid) = pid {
        sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    }

    let (disk_total, disk_free) = disk_usage(upload_dir);
    let memory_total = sys.total_memory();
    let memory_available = sys.available_memory();
    let system = SystemReport {
        cpu_percent: sys.global_cpu_usage(),
        memory_total,
        memory_available,
        memory_percent: percent(memory_total.saturating_sub(memory_available), memory_total),
        disk_total,
        disk_free,
        disk_percent: percent(disk_total.saturating_sub(disk_free), disk_total),
    };

    let process = pid.and_then(|pid| sys.process(pid)).map(|p| ProcessReport {
        pid: p.pid().as_u32(),
        memory_rss: p.memory(),
        memory_vms: p.virtual_memory(),
        cpu_percent: p.cpu_usage(),
    });

    (system, process)
}

/// Total and free bytes of the disk holding `dir`.
fn disk_usage(dir: &Path) -> (u64, u64) {
    let target = std::fs::canonicalize(dir).unwrap_or_else(|_| PathBuf::from(dir));
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| target.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| (disk.total_space(), disk.available_space()))
        .unwrap_or((0, 0))
}
