use serde::{Deserialize, Serialize};

pub mod bookmark;
pub mod cache;
pub mod codec;
pub mod journal;
pub mod kafka;
pub mod model;
pub mod publisher;
pub mod rebuild;
pub mod reconcile;
pub mod recovery;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreHealth {
    pub service: String,
    pub status: String,
}

pub fn health() -> CoreHealth {
    CoreHealth {
        service: "recall-recovery".to_string(),
        status: "ok".to_string(),
    }
}
