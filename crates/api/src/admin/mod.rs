//! Runtime-change producers: the admin dashboard and the metadata manager.
//! Both forward completed actions to the same listener.

pub mod dashboard;
pub mod meta_manager;

pub use dashboard::AdminDashboard;
pub use meta_manager::{MetaApiManager, MetaManager};
