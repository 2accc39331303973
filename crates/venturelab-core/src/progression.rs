use serde::{Deserialize, Serialize};
use std::fmt;

use crate::validation::ValidationError;

pub const XP_PER_LEVEL_UNIT: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
    Locked,
    Available,
    InProgress,
    Completed,
}

impl MissionStatus {
    pub const ALL: [MissionStatus; 4] = [
        MissionStatus::Locked,
        MissionStatus::Available,
        MissionStatus::InProgress,
        MissionStatus::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MissionStatus::Locked => "locked",
            MissionStatus::Available => "available",
            MissionStatus::InProgress => "in_progress",
            MissionStatus::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == value)
            .ok_or_else(|| ValidationError::InvalidChoice {
                field: "status".to_string(),
                value: value.to_string(),
                allowed: Self::ALL.map(|s| s.as_str()).join(", "),
            })
    }

    /// Forward-only. Staying put is allowed so retries stay idempotent, but
    /// nothing leaves `Locked` except an unlock to `Available`.
    pub fn can_transition_to(&self, next: MissionStatus) -> bool {
        use MissionStatus::*;
        match (self, next) {
            (a, b) if *a == b => true,
            (Locked, Available) => true,
            (Locked, _) => false,
            (from, to) => to > *from,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MissionStatus::Completed)
    }
}

impl fmt::Display for MissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Level 1 starts at 0 XP; level `n` needs `100 * (n - 1)^2`.
pub fn level_for_xp(xp: u64) -> u32 {
    let units = xp / XP_PER_LEVEL_UNIT;
    let mut root = (units as f64).sqrt() as u64;
    // Correct float drift around perfect squares.
    while root * root > units {
        root -= 1;
    }
    while (root + 1) * (root + 1) <= units {
        root += 1;
    }
    u32::try_from(root + 1).unwrap_or(u32::MAX)
}

pub fn xp_for_level(level: u32) -> u64 {
    let steps = u64::from(level.saturating_sub(1));
    steps.saturating_mul(steps).saturating_mul(XP_PER_LEVEL_UNIT)
}

pub fn xp_to_next_level(xp: u64) -> u64 {
    let next = level_for_xp(xp).saturating_add(1);
    xp_for_level(next).saturating_sub(xp)
}

/// XP for a scored pitch: ten per point of the overall 0-10 score.
pub fn pitch_xp(overall: u8) -> u64 {
    u64::from(overall.min(10)) * 10
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SprintProgress {
    pub completed: u32,
    pub total: u32,
}

impl SprintProgress {
    pub fn percent(&self) -> u32 {
        if self.total == 0 {
            return 0;
        }
        let completed = self.completed.min(self.total);
        ((u64::from(completed) * 100) / u64::from(self.total)) as u32
    }

    pub fn is_finished(&self) -> bool {
        self.total > 0 && self.completed >= self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use MissionStatus::*;

    #[test]
    fn test_forward_only_transitions() {
        assert!(Locked.can_transition_to(Available));
        assert!(Available.can_transition_to(InProgress));
        assert!(Available.can_transition_to(Completed));
        assert!(InProgress.can_transition_to(Completed));

        assert!(!Locked.can_transition_to(InProgress));
        assert!(!Locked.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(InProgress));
        assert!(!InProgress.can_transition_to(Available));
        assert!(!Available.can_transition_to(Locked));
    }

    #[test]
    fn test_same_status_is_idempotent() {
        for status in MissionStatus::ALL {
            assert!(status.can_transition_to(status));
        }
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(MissionStatus::parse("in_progress"), Ok(InProgress));
        assert_eq!(Completed.to_string(), "completed");
        assert!(MissionStatus::parse("done").is_err());
        assert_eq!(
            serde_json::to_string(&InProgress).unwrap(),
            "\"in_progress\""
        );
    }

    #[test]
    fn test_level_thresholds() {
        assert_eq!(level_for_xp(0), 1);
        assert_eq!(level_for_xp(99), 1);
        assert_eq!(level_for_xp(100), 2);
        assert_eq!(level_for_xp(399), 2);
        assert_eq!(level_for_xp(400), 3);
        assert_eq!(level_for_xp(900), 4);
        assert_eq!(level_for_xp(u64::MAX), 429_496_730);

        for level in 1..50 {
            assert_eq!(level_for_xp(xp_for_level(level)), level);
        }
    }

    #[test]
    fn test_xp_to_next_level() {
        assert_eq!(xp_to_next_level(0), 100);
        assert_eq!(xp_to_next_level(150), 250);
        assert_eq!(xp_to_next_level(400), 500);
    }

    #[test]
    fn test_pitch_xp_caps_at_ten_points() {
        assert_eq!(pitch_xp(0), 0);
        assert_eq!(pitch_xp(7), 70);
        assert_eq!(pitch_xp(42), 100);
    }

    #[test]
    fn test_sprint_percent() {
        assert_eq!(SprintProgress { completed: 0, total: 0 }.percent(), 0);
        assert_eq!(SprintProgress { completed: 1, total: 3 }.percent(), 33);
        assert_eq!(SprintProgress { completed: 5, total: 3 }.percent(), 100);
        assert!(SprintProgress { completed: 3, total: 3 }.is_finished());
        assert!(!SprintProgress { completed: 0, total: 0 }.is_finished());
    }
}
