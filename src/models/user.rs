use serde::{Deserialize, Serialize};

use super::ids::UserId;

/// Aggregate per-user marketplace statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStats {
    pub user_id: UserId,
    /// Tacks this user posted that reached FINISHED
    pub tacks_completed_as_tacker: i64,
    /// Tacks this user fulfilled that reached FINISHED
    pub tacks_completed_as_runner: i64,
    pub rating_sum: i64,
    pub rating_count: i64,
}

impl UserStats {
    pub fn empty(user_id: UserId) -> Self {
        Self {
            user_id,
            tacks_completed_as_tacker: 0,
            tacks_completed_as_runner: 0,
            rating_sum: 0,
            rating_count: 0,
        }
    }

    /// Average rating received, `None` until the first review
    pub fn rating(&self) -> Option<f64> {
        if self.rating_count == 0 {
            None
        } else {
            Some(self.rating_sum as f64 / self.rating_count as f64)
        }
    }

    pub fn apply(&mut self, update: &StatsUpdate) {
        match update {
            StatsUpdate::CompletedAsTacker(_) => self.tacks_completed_as_tacker += 1,
            StatsUpdate::CompletedAsRunner(_) => self.tacks_completed_as_runner += 1,
            StatsUpdate::Rated { rating, .. } => {
                self.rating_sum += i64::from(*rating);
                self.rating_count += 1;
            }
        }
    }
}

/// Incremental statistics change committed alongside a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatsUpdate {
    CompletedAsTacker(UserId),
    CompletedAsRunner(UserId),
    Rated { user_id: UserId, rating: i16 },
}

impl StatsUpdate {
    pub fn user_id(&self) -> UserId {
        match self {
            Self::CompletedAsTacker(user_id) | Self::CompletedAsRunner(user_id) => *user_id,
            Self::Rated { user_id, .. } => *user_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rating_average() {
        let user = UserId::new();
        let mut stats = UserStats::empty(user);
        assert_eq!(stats.rating(), None);

        stats.apply(&StatsUpdate::Rated {
            user_id: user,
            rating: 5,
        });
        stats.apply(&StatsUpdate::Rated {
            user_id: user,
            rating: 2,
        });
        assert_eq!(stats.rating(), Some(3.5));

        stats.apply(&StatsUpdate::CompletedAsRunner(user));
        assert_eq!(stats.tacks_completed_as_runner, 1);
        assert_eq!(stats.tacks_completed_as_tacker, 0);
    }
}
