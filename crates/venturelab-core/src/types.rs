use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::progression::{level_for_xp, xp_to_next_level, MissionStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Mentor,
    SchoolAdmin,
    Admin,
}

impl Role {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "student" => Some(Role::Student),
            "mentor" => Some(Role::Mentor),
            "school_admin" => Some(Role::SchoolAdmin),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Student => write!(f, "student"),
            Role::Mentor => write!(f, "mentor"),
            Role::SchoolAdmin => write!(f, "school_admin"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentProfile {
    pub user_id: Uuid,
    pub display_name: String,
    #[serde(default)]
    pub school_id: Option<Uuid>,
    #[serde(default)]
    pub xp: u64,
    #[serde(default = "default_level")]
    pub level: u32,
    pub updated_at: DateTime<Utc>,
}

fn default_level() -> u32 {
    1
}

impl StudentProfile {
    pub fn new(user_id: Uuid, display_name: impl Into<String>) -> Self {
        Self {
            user_id,
            display_name: display_name.into(),
            school_id: None,
            xp: 0,
            level: 1,
            updated_at: Utc::now(),
        }
    }

    /// Adds XP and keeps `level` consistent with the new total.
    pub fn award_xp(&mut self, amount: u64) {
        self.xp = self.xp.saturating_add(amount);
        self.level = level_for_xp(self.xp);
        self.updated_at = Utc::now();
    }

    pub fn xp_to_next_level(&self) -> u64 {
        xp_to_next_level(self.xp)
    }

    /// First word of the display name, used to address the student.
    pub fn first_name(&self) -> &str {
        self.display_name
            .split_whitespace()
            .next()
            .unwrap_or("there")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionProgress {
    pub user_id: Uuid,
    pub mission_id: Uuid,
    pub status: MissionStatus,
    #[serde(default)]
    pub score: Option<u8>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl MissionProgress {
    pub fn new(user_id: Uuid, mission_id: Uuid, status: MissionStatus) -> Self {
        Self {
            user_id,
            mission_id,
            status,
            score: None,
            started_at: None,
            completed_at: None,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PitchScore {
    pub overall: u8,
    pub clarity: u8,
    pub problem: u8,
    pub solution: u8,
    pub market: u8,
    pub ask: u8,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub improvements: Vec<String>,
    #[serde(default)]
    pub feedback: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TankSubmission {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(default)]
    pub mission_id: Option<Uuid>,
    pub pitch: String,
    #[serde(default)]
    pub duration_secs: Option<f64>,
    #[serde(default)]
    pub video_url: Option<String>,
    pub score: PitchScore,
    pub xp_awarded: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub id: Uuid,
    pub name: String,
    pub price_cents: u64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    "usd".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_award_xp_recomputes_level() {
        let mut profile = StudentProfile::new(Uuid::new_v4(), "Ada Lovelace");
        profile.award_xp(120);
        assert_eq!(profile.xp, 120);
        assert_eq!(profile.level, 2);
        assert_eq!(profile.xp_to_next_level(), 280);

        profile.award_xp(u64::MAX);
        assert_eq!(profile.xp, u64::MAX);
    }

    #[test]
    fn test_first_name() {
        assert_eq!(StudentProfile::new(Uuid::nil(), "Ada Lovelace").first_name(), "Ada");
        assert_eq!(StudentProfile::new(Uuid::nil(), "   ").first_name(), "there");
    }

    #[test]
    fn test_role_round_trip_names() {
        for role in [Role::Student, Role::Mentor, Role::SchoolAdmin, Role::Admin] {
            assert_eq!(Role::parse(&role.to_string()), Some(role));
        }
        assert_eq!(Role::parse("owner"), None);
    }
}
