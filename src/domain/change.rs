//! Price change audit records emitted by the differential sync engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction of a price movement, including the degenerate cases
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PriceDirection {
    Up,
    Down,
    None,
    New,
}

impl PriceDirection {
    /// Classify a movement from the optional prior price and the delta
    pub fn from_delta(delta: Option<i64>) -> Self {
        match delta {
            Some(d) if d > 0 => PriceDirection::Up,
            Some(d) if d < 0 => PriceDirection::Down,
            Some(_) => PriceDirection::None,
            None => PriceDirection::New,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PriceDirection::Up => "up",
            PriceDirection::Down => "down",
            PriceDirection::None => "none",
            PriceDirection::New => "new",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "up" => Some(PriceDirection::Up),
            "down" => Some(PriceDirection::Down),
            "none" => Some(PriceDirection::None),
            "new" => Some(PriceDirection::New),
            _ => None,
        }
    }
}

/// One entry in the auditable price change log.
///
/// Emitted only when the snapshot holds a differing prior price for the id,
/// or the id is absent from the snapshot entirely (`direction == New`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeRecord {
    pub business_id: String,
    pub old_price: Option<u64>,
    pub new_price: u64,
    /// `new_price - old_price`; `None` when there was no prior price
    pub delta: Option<i64>,
    pub direction: PriceDirection,
    pub session_id: String,
    pub recorded_at: DateTime<Utc>,
}

impl ChangeRecord {
    /// Build a change record for a listing whose prior price is known
    pub fn price_changed(
        business_id: &str,
        old_price: u64,
        new_price: u64,
        session_id: &str,
    ) -> Self {
        let delta = new_price as i64 - old_price as i64;
        Self {
            business_id: business_id.to_string(),
            old_price: Some(old_price),
            new_price,
            delta: Some(delta),
            direction: PriceDirection::from_delta(Some(delta)),
            session_id: session_id.to_string(),
            recorded_at: Utc::now(),
        }
    }

    /// Build a change record for a listing absent from the snapshot
    pub fn first_seen(business_id: &str, new_price: u64, session_id: &str) -> Self {
        Self {
            business_id: business_id.to_string(),
            old_price: None,
            new_price,
            delta: None,
            direction: PriceDirection::New,
            session_id: session_id.to_string(),
            recorded_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_from_delta() {
        assert_eq!(PriceDirection::from_delta(Some(10_000)), PriceDirection::Up);
        assert_eq!(PriceDirection::from_delta(Some(-1)), PriceDirection::Down);
        assert_eq!(PriceDirection::from_delta(Some(0)), PriceDirection::None);
        assert_eq!(PriceDirection::from_delta(None), PriceDirection::New);
    }

    #[test]
    fn test_price_changed_delta() {
        let change = ChangeRecord::price_changed("A111AA77", 50_000, 60_000, "s1");
        assert_eq!(change.delta, Some(10_000));
        assert_eq!(change.direction, PriceDirection::Up);

        let drop = ChangeRecord::price_changed("A111AA77", 60_000, 50_000, "s1");
        assert_eq!(drop.delta, Some(-10_000));
        assert_eq!(drop.direction, PriceDirection::Down);
    }
}
