use ulid::Ulid;

use crate::billing::{Settlement, settle};
use crate::model::*;

use super::{Engine, EngineError};

/// A booking as shown at read time: status and money are computed, never stored.
#[derive(Debug, Clone)]
pub struct BookingView {
    pub booking: Booking,
    pub status: Status,
    pub elapsed_ms: Ms,
    pub settlement: Settlement,
}

impl BookingView {
    pub fn at(booking: Booking, now: Ms) -> Self {
        Self {
            status: booking.status(now),
            elapsed_ms: booking.elapsed_ms(now),
            settlement: settle(&booking.bill),
            booking,
        }
    }
}

/// An ongoing booking with a known end, as fed to the alert scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Countdown {
    pub booking_id: Ulid,
    pub customer: String,
    pub resources: Vec<ResourceKey>,
    pub end: Ms,
}

impl Engine {
    pub async fn get_booking(&self, id: Ulid) -> Option<Booking> {
        let shared = self.booking_handle(&id)?;
        let b = shared.read().await;
        Some(b.clone())
    }

    pub async fn booking_view(&self, id: Ulid, now: Ms) -> Result<BookingView, EngineError> {
        let b = self
            .get_booking(id)
            .await
            .ok_or_else(|| EngineError::not_found(id))?;
        Ok(BookingView::at(b, now))
    }

    async fn all_bookings(&self) -> Vec<Booking> {
        let handles: Vec<_> = self.bookings.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(handles.len());
        for shared in handles {
            out.push(shared.read().await.clone());
        }
        out
    }

    /// Every booking ordered by start. Cancelled ones only on request.
    pub async fn list_bookings(&self, now: Ms, include_cancelled: bool) -> Vec<BookingView> {
        let mut views: Vec<BookingView> = self
            .all_bookings()
            .await
            .into_iter()
            .filter(|b| include_cancelled || !b.is_cancelled())
            .map(|b| BookingView::at(b, now))
            .collect();
        views.sort_by(|a, b| {
            a.booking
                .start
                .cmp(&b.booking.start)
                .then(a.booking.id.cmp(&b.booking.id))
        });
        views
    }

    /// Ongoing, uncancelled bookings with a known end.
    pub async fn countdowns(&self, now: Ms) -> Vec<Countdown> {
        self.all_bookings()
            .await
            .into_iter()
            .filter(|b| !b.is_cancelled() && !b.open && b.status(now) == Status::Ongoing)
            .map(|b| Countdown {
                booking_id: b.id,
                customer: b.customer.name,
                resources: b.resources,
                end: b.end,
            })
            .collect()
    }
}
