// handlers/actuator.rs - GET / and GET /status

use serde::Serialize;

use crate::error::AppError;
use crate::router::{RequestContext, Router};

#[derive(Debug, Serialize)]
pub struct AppStatus {
    pub name: String,
    pub version: String,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct Status {
    pub status: &'static str,
}

/// GET / - application name and version from the environment
pub async fn info(rc: RequestContext) -> Result<AppStatus, AppError> {
    let app = rc.env().app();
    Ok(AppStatus {
        name: app.name.clone(),
        version: app.version.clone(),
        status: "UP",
    })
}

/// GET /status - liveness
pub async fn status(_rc: RequestContext) -> Result<Status, AppError> {
    Ok(Status { status: "UP" })
}

pub fn register(router: &mut Router) {
    router.get("/", info).get("/status", status);
}
