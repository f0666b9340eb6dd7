use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{ReviewId, TackId, UserId};
use crate::error::{MarketplaceError, MarketplaceResult};

pub const MIN_RATING: i16 = 1;
pub const MAX_RATING: i16 = 5;

/// A participant's rating of the other participant for one tack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: ReviewId,
    pub tack_id: TackId,
    pub reviewer_id: UserId,
    pub reviewee_id: UserId,
    pub rating: i16,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReview {
    pub rating: i16,
    #[serde(default)]
    pub description: String,
}

impl NewReview {
    pub fn validate(&self) -> MarketplaceResult<()> {
        if !(MIN_RATING..=MAX_RATING).contains(&self.rating) {
            return Err(MarketplaceError::validation(
                "rating",
                format!("must be between {MIN_RATING} and {MAX_RATING}"),
            ));
        }
        Ok(())
    }

    pub fn into_review(
        self,
        tack_id: TackId,
        reviewer_id: UserId,
        reviewee_id: UserId,
        now: DateTime<Utc>,
    ) -> Review {
        Review {
            id: ReviewId::new(),
            tack_id,
            reviewer_id,
            reviewee_id,
            rating: self.rating,
            description: self.description,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rating_bounds() {
        for rating in MIN_RATING..=MAX_RATING {
            let review = NewReview {
                rating,
                description: String::new(),
            };
            assert!(review.validate().is_ok());
        }
        for rating in [0, 6, -3] {
            let review = NewReview {
                rating,
                description: String::new(),
            };
            assert!(review.validate().is_err());
        }
    }
}
