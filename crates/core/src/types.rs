/// Projects are identified by opaque string ids (e.g. `p_3f2a...`).
pub type ProjectId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Generate a fresh project id.
pub fn new_project_id() -> ProjectId {
    format!("p_{}", uuid::Uuid::new_v4().simple())
}
