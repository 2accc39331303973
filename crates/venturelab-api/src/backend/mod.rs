//! Seam to the hosted database. Handlers only ever see `dyn Backend`.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;
use venturelab_core::{
    BackendConfig, BackendMode, Coupon, MissionProgress, MissionStatus, Plan, StudentProfile,
    TankSubmission,
};

pub mod memory;
pub mod rest;

pub use memory::InMemoryBackend;
pub use rest::RestBackend;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unexpected backend payload: {0}")]
    Decode(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Backend misconfigured: {0}")]
    Config(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

#[async_trait]
pub trait Backend: Send + Sync {
    async fn get_profile(&self, user_id: Uuid) -> BackendResult<Option<StudentProfile>>;

    /// Adds `amount` XP and returns the profile with its level recomputed.
    /// Fails with `NotFound` when the profile does not exist.
    async fn add_xp(&self, user_id: Uuid, amount: u64) -> BackendResult<StudentProfile>;

    async fn get_mission_progress(
        &self,
        user_id: Uuid,
        mission_id: Uuid,
    ) -> BackendResult<Option<MissionProgress>>;

    /// Stores `next` only while the row for the same user and mission is
    /// still in status `expected` (`None`: no row exists yet). Returns `None`
    /// when the row moved on first and nothing was written.
    async fn transition_mission_progress(
        &self,
        next: &MissionProgress,
        expected: Option<MissionStatus>,
    ) -> BackendResult<Option<MissionProgress>>;

    async fn insert_tank_submission(&self, submission: &TankSubmission) -> BackendResult<()>;

    async fn get_plan(&self, plan_id: Uuid) -> BackendResult<Option<Plan>>;

    /// Looks up an already normalised coupon code.
    async fn find_coupon(&self, code: &str) -> BackendResult<Option<Coupon>>;

    fn backend_name(&self) -> &str;
}

pub fn backend_from_settings(config: &BackendConfig) -> BackendResult<Arc<dyn Backend>> {
    match config.mode {
        BackendMode::Rest => Ok(Arc::new(RestBackend::from_settings(config)?)),
        BackendMode::Memory => Ok(Arc::new(InMemoryBackend::from_seed(&config.seed))),
    }
}
