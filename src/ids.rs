use uuid::Uuid;

/// `<prefix>_<32 hex chars>`, unique per call
pub fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}
