use serde::{Deserialize, Serialize};

use crate::models::Role;
use crate::snapshot::PricedLine;

/// Service surcharge applied on top of the room total, by caller role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SurchargePolicy {
    pub guest_multiplier: f64,
    /// Reduced rate for business admins booking for their company.
    pub business_admin_multiplier: f64,
}

impl Default for SurchargePolicy {
    fn default() -> Self {
        Self {
            guest_multiplier: 1.08,
            business_admin_multiplier: 1.04,
        }
    }
}

impl SurchargePolicy {
    pub fn multiplier_for(&self, role: Role) -> f64 {
        match role {
            Role::BusinessAdmin => self.business_admin_multiplier,
            Role::Guest | Role::Operator => self.guest_multiplier,
        }
    }

    /// Sum of line totals times the role multiplier, rounded to the minor unit.
    pub fn charge_total(&self, lines: &[PricedLine], role: Role) -> i64 {
        let subtotal: i64 = lines.iter().map(PricedLine::total).sum();
        (subtotal as f64 * self.multiplier_for(role)).round() as i64
    }
}

/// Owner share of a charge, rounded down.
pub fn payout_amount(charge: i64, payout_percent: u32) -> i64 {
    charge * i64::from(payout_percent) / 100
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn line(price: i64, quantity: i32) -> PricedLine {
        PricedLine {
            room_id: Uuid::new_v4(),
            quantity,
            price,
            original_price: price,
        }
    }

    #[test]
    fn guest_pays_full_surcharge() {
        let policy = SurchargePolicy::default();
        let lines = [line(100, 2), line(50, 1)];
        // (200 + 50) * 1.08
        assert_eq!(policy.charge_total(&lines, Role::Guest), 270);
    }

    #[test]
    fn business_admin_gets_reduced_surcharge() {
        let policy = SurchargePolicy::default();
        let lines = [line(100, 2), line(50, 1)];
        assert_eq!(policy.charge_total(&lines, Role::BusinessAdmin), 260);
        assert!(
            policy.multiplier_for(Role::BusinessAdmin) < policy.multiplier_for(Role::Guest)
        );
    }

    #[test]
    fn payout_rounds_down() {
        assert_eq!(payout_amount(270, 90), 243);
        assert_eq!(payout_amount(999, 90), 899);
        assert_eq!(payout_amount(0, 90), 0);
    }
}
