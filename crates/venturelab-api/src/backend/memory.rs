use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;
use venturelab_core::{
    Coupon, MissionProgress, MissionStatus, Plan, SeedConfig, StudentProfile, TankSubmission,
};

use super::{Backend, BackendError, BackendResult};

#[derive(Default)]
struct Tables {
    profiles: HashMap<Uuid, StudentProfile>,
    progress: HashMap<(Uuid, Uuid), MissionProgress>,
    submissions: Vec<TankSubmission>,
    plans: HashMap<Uuid, Plan>,
    coupons: HashMap<String, Coupon>,
}

/// Process-local backend for development and tests.
///
/// With `provision_profiles` set, the first read of an unknown user creates
/// an empty profile, the way the hosted database does on sign-up.
#[derive(Default)]
pub struct InMemoryBackend {
    tables: RwLock<Tables>,
    provision_profiles: bool,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: &SeedConfig) -> Self {
        let backend = Self {
            tables: RwLock::new(Tables::default()),
            provision_profiles: true,
        };
        {
            let mut tables = backend.tables.write();
            for plan in &seed.plans {
                tables.plans.insert(plan.id, plan.clone());
            }
            for coupon in &seed.coupons {
                tables
                    .coupons
                    .insert(coupon.code.trim().to_uppercase(), coupon.clone());
            }
        }
        backend
    }

    pub fn with_profile(self, profile: StudentProfile) -> Self {
        self.tables.write().profiles.insert(profile.user_id, profile);
        self
    }

    pub fn with_plan(self, plan: Plan) -> Self {
        self.tables.write().plans.insert(plan.id, plan);
        self
    }

    pub fn with_coupon(self, coupon: Coupon) -> Self {
        self.tables
            .write()
            .coupons
            .insert(coupon.code.trim().to_uppercase(), coupon);
        self
    }

    pub fn with_progress(self, progress: MissionProgress) -> Self {
        self.tables
            .write()
            .progress
            .insert((progress.user_id, progress.mission_id), progress);
        self
    }

    pub fn submissions(&self) -> Vec<TankSubmission> {
        self.tables.read().submissions.clone()
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn get_profile(&self, user_id: Uuid) -> BackendResult<Option<StudentProfile>> {
        if let Some(profile) = self.tables.read().profiles.get(&user_id) {
            return Ok(Some(profile.clone()));
        }
        if !self.provision_profiles {
            return Ok(None);
        }

        debug!(%user_id, "Provisioning in-memory profile");
        let mut tables = self.tables.write();
        let profile = tables
            .profiles
            .entry(user_id)
            .or_insert_with(|| StudentProfile::new(user_id, "Student"));
        Ok(Some(profile.clone()))
    }

    async fn add_xp(&self, user_id: Uuid, amount: u64) -> BackendResult<StudentProfile> {
        let mut tables = self.tables.write();
        let profile = tables
            .profiles
            .get_mut(&user_id)
            .ok_or_else(|| BackendError::NotFound(format!("profile {}", user_id)))?;
        profile.award_xp(amount);
        Ok(profile.clone())
    }

    async fn get_mission_progress(
        &self,
        user_id: Uuid,
        mission_id: Uuid,
    ) -> BackendResult<Option<MissionProgress>> {
        Ok(self
            .tables
            .read()
            .progress
            .get(&(user_id, mission_id))
            .cloned())
    }

    async fn transition_mission_progress(
        &self,
        next: &MissionProgress,
        expected: Option<MissionStatus>,
    ) -> BackendResult<Option<MissionProgress>> {
        let key = (next.user_id, next.mission_id);
        let mut tables = self.tables.write();
        if tables.progress.get(&key).map(|row| row.status) != expected {
            return Ok(None);
        }
        tables.progress.insert(key, next.clone());
        Ok(Some(next.clone()))
    }

    async fn insert_tank_submission(&self, submission: &TankSubmission) -> BackendResult<()> {
        self.tables.write().submissions.push(submission.clone());
        Ok(())
    }

    async fn get_plan(&self, plan_id: Uuid) -> BackendResult<Option<Plan>> {
        Ok(self.tables.read().plans.get(&plan_id).cloned())
    }

    async fn find_coupon(&self, code: &str) -> BackendResult<Option<Coupon>> {
        Ok(self.tables.read().coupons.get(code).cloned())
    }

    fn backend_name(&self) -> &str {
        "memory"
    }
}
