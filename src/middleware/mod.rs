pub mod auth;
pub mod response;

pub use auth::{authenticate, AuthSettings};
pub use response::{normalize, normalize_error, Normalized};
