pub mod app;
pub mod auth;
pub mod config;
pub mod database;
pub mod env;
pub mod error;
pub mod handlers;
pub mod ids;
pub mod middleware;
pub mod notify;
pub mod router;
pub mod validation;

pub use app::App;
pub use auth::{Auth, Roles};
pub use env::{AppInfo, Ctx, Env};
pub use error::{AppError, AppResult};
pub use router::{RequestContext, RouteGroup, Router};
