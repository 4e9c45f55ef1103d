use ulid::Ulid;

use crate::clock::local_day;
use crate::model::*;
use crate::promo_code::normalize;

use super::{Engine, EngineError, PromoError, SharedBooking};

impl Engine {
    /// A code that still resolves. Superseded codes do not.
    fn live_code(&self, code: &str) -> Result<PromoCode, PromoError> {
        self.codes
            .get(code)
            .map(|e| e.value().clone())
            .filter(|c| !c.superseded)
            .ok_or(PromoError::NotFound)
    }

    fn code_booking(&self, code: &str) -> Result<SharedBooking, PromoError> {
        let promo = self.live_code(code)?;
        self.booking_handle(&promo.booking_id).ok_or(PromoError::NotFound)
    }

    pub fn promo_code(&self, code: &str) -> Option<PromoCode> {
        self.codes.get(&normalize(code)).map(|e| e.value().clone())
    }

    pub fn attendance(&self, booking_id: Ulid) -> Vec<AttendanceEntry> {
        self.attendance
            .get(&booking_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    fn open_entry(&self, booking_id: Ulid, day: chrono::NaiveDate) -> Option<AttendanceEntry> {
        self.attendance.get(&booking_id).and_then(|entries| {
            entries
                .iter()
                .find(|e| e.local_day == day && e.is_open())
                .cloned()
        })
    }

    /// Check-IN by code. Consumes one attempt.
    pub async fn check_in(&self, code: &str, now: Ms) -> Result<AttendanceEntry, EngineError> {
        let code = normalize(code);
        let shared = self.code_booking(&code)?;
        let mut b = shared.write().await;
        if b.is_cancelled() {
            return Err(PromoError::NotFound.into());
        }
        // Re-read under the booking lock; a concurrent check-in may have spent an attempt.
        let promo = self.live_code(&code)?;
        if now > promo.validity_end_at {
            return Err(PromoError::Expired.into());
        }
        if promo.attempts_left == 0 {
            return Err(PromoError::NoAttemptsLeft.into());
        }
        let day = local_day(now, self.settings.timezone);
        if self.open_entry(b.id, day).is_some() {
            return Err(PromoError::AlreadyCheckedIn.into());
        }

        let entry = AttendanceEntry {
            id: Ulid::new(),
            booking_id: b.id,
            code,
            local_day: day,
            in_at: now,
            out_at: None,
        };
        self.commit_booking(
            &mut b,
            Event::CheckedIn {
                entry: entry.clone(),
                attempts_left: promo.attempts_left - 1,
            },
        )
        .await?;
        tracing::info!(
            "booking {} checked in for {day}, {} attempts left",
            entry.booking_id,
            promo.attempts_left - 1
        );
        Ok(entry)
    }

    /// Check-OUT by code, closing today's open entry.
    pub async fn check_out(&self, code: &str, now: Ms) -> Result<AttendanceEntry, EngineError> {
        let code = normalize(code);
        let shared = self.code_booking(&code)?;
        let mut b = shared.write().await;
        let day = local_day(now, self.settings.timezone);
        let Some(mut entry) = self.open_entry(b.id, day) else {
            return Err(PromoError::NoOpenCheckIn.into());
        };
        let booking_id = b.id;
        self.commit_booking(
            &mut b,
            Event::CheckedOut {
                booking_id,
                entry_id: entry.id,
                at: now,
            },
        )
        .await?;
        entry.out_at = Some(now);
        Ok(entry)
    }
}
