use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

use crate::model::*;

/// Hourly pricing for sessions. Promo bookings are priced by their package instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tariff {
    pub seat_hourly: Decimal,
    pub room_hourly: Decimal,
    /// Time at the start of a stopped session that is not charged.
    pub free_allowance_ms: Ms,
}

impl Default for Tariff {
    fn default() -> Self {
        Self {
            seat_hourly: dec!(50),
            room_hourly: dec!(300),
            free_allowance_ms: 0,
        }
    }
}

impl Tariff {
    /// Cost of occupying `resources` in `area` for `elapsed_ms`, free allowance applied.
    /// Seats are charged per seat; the room is one unit.
    pub fn session_cost(&self, area: Area, resources: usize, elapsed_ms: Ms) -> Decimal {
        let (rate, units) = match area {
            Area::Common => (self.seat_hourly, resources.max(1)),
            Area::Room => (self.room_hourly, 1),
        };
        let chargeable = (elapsed_ms - self.free_allowance_ms).max(0);
        let hours = Decimal::from(chargeable) / Decimal::from(HOUR_MS);
        round_money(hours * rate * Decimal::from(units as u64))
    }
}

pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// What the customer sees: either money still owed or change to hand back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outstanding {
    Balance(Decimal),
    Change(Decimal),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    pub discount_amount: Decimal,
    pub discounted_cost: Decimal,
    pub due: Decimal,
    pub outstanding: Outstanding,
}

pub fn discount_amount(base_cost: Decimal, discount: &Discount) -> Decimal {
    match discount.kind {
        DiscountKind::None => Decimal::ZERO,
        DiscountKind::Percent => {
            let pct = discount.value.clamp(Decimal::ZERO, Decimal::ONE_HUNDRED);
            round_money(pct / Decimal::ONE_HUNDRED * base_cost)
        }
        DiscountKind::Amount => discount.value.max(Decimal::ZERO).min(base_cost),
    }
}

/// Pure settlement of `(base_cost, discount, down_payment)`.
pub fn settle(bill: &Bill) -> Settlement {
    let discount_amount = discount_amount(bill.base_cost, &bill.discount);
    let discounted_cost = (bill.base_cost - discount_amount).max(Decimal::ZERO);
    let due = (discounted_cost - bill.down_payment).max(Decimal::ZERO);
    let outstanding = if due > Decimal::ZERO {
        Outstanding::Balance(due)
    } else {
        Outstanding::Change(bill.down_payment - discounted_cost)
    };
    Settlement {
        discount_amount,
        discounted_cost,
        due,
        outstanding,
    }
}

/// True exactly when something is due and the split covers it.
pub fn auto_paid(bill: &Bill) -> bool {
    let due = settle(bill).due;
    due > Decimal::ZERO && bill.gcash + bill.cash >= due
}

/// A staff edit to the payment split. The side left out is derived from the due balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentEdit {
    /// GCash is the lead figure; cash makes up the rest.
    Gcash(Decimal),
    /// Cash is the lead figure; GCash makes up the rest.
    Cash(Decimal),
    Split { gcash: Decimal, cash: Decimal },
}

/// Apply a payment edit. A change to the split clears any manual paid flag.
pub fn apply_payment(bill: &Bill, edit: PaymentEdit) -> Bill {
    let due = settle(bill).due;
    let (gcash, cash) = match edit {
        PaymentEdit::Gcash(g) => {
            let g = g.max(Decimal::ZERO);
            (g, (due - g).max(Decimal::ZERO))
        }
        PaymentEdit::Cash(c) => {
            let c = c.max(Decimal::ZERO);
            ((due - c).max(Decimal::ZERO), c)
        }
        PaymentEdit::Split { gcash, cash } => (gcash.max(Decimal::ZERO), cash.max(Decimal::ZERO)),
    };
    let mut next = bill.clone();
    let changed = gcash != bill.gcash || cash != bill.cash;
    next.gcash = gcash;
    next.cash = cash;
    if changed {
        next.paid_override = false;
    }
    refresh_paid(&mut next);
    next
}

pub fn apply_down_payment(bill: &Bill, amount: Decimal) -> Bill {
    let mut next = bill.clone();
    let amount = amount.max(Decimal::ZERO);
    if amount != bill.down_payment {
        next.down_payment = amount;
        next.paid_override = false;
    }
    refresh_paid(&mut next);
    next
}

/// Replace the discount. Payment fields are untouched, so a manual paid flag survives.
pub fn apply_discount(bill: &Bill, discount: Discount) -> Bill {
    let mut next = bill.clone();
    next.discount = discount;
    refresh_paid(&mut next);
    next
}

pub fn apply_base_cost(bill: &Bill, base_cost: Decimal) -> Bill {
    let mut next = bill.clone();
    next.base_cost = base_cost;
    refresh_paid(&mut next);
    next
}

pub fn set_paid(bill: &Bill, paid: bool) -> Bill {
    let mut next = bill.clone();
    next.paid = paid;
    next.paid_override = true;
    next
}

fn refresh_paid(bill: &mut Bill) {
    if !bill.paid_override {
        bill.paid = auto_paid(bill);
    }
}
