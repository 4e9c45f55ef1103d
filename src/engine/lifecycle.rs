use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::billing::{self, PaymentEdit};
use crate::limits::*;
use crate::model::*;
use crate::promo_code::{self, CodeError};

use super::availability::{Availability, resolve_resources};
use super::conflict::validate_span;
use super::ledger::RecordMatch;
use super::reconcile::Repair;
use super::{Engine, EngineError, PromoError};

/// A walk-in or scheduled session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBooking {
    pub id: Ulid,
    pub reservation: bool,
    pub customer: Customer,
    pub created_by: Option<String>,
    pub area: Area,
    pub resources: Vec<ResourceKey>,
    /// Ignored for walk-ins, which start at `now`.
    pub start: Ms,
    /// `None` books open-ended.
    pub end: Option<Ms>,
    pub down_payment: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPromoBooking {
    pub id: Ulid,
    pub customer: Customer,
    pub created_by: Option<String>,
    pub area: Area,
    pub resources: Vec<ResourceKey>,
    pub start: Ms,
    pub terms: PackageTerms,
    pub down_payment: Decimal,
}

fn validate_customer(customer: &Customer) -> Result<Customer, EngineError> {
    let name = customer.name.trim();
    if name.is_empty() {
        return Err(EngineError::Validation("customer name is required".into()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("customer name too long"));
    }
    let phone = customer
        .phone
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty());
    if phone.is_some_and(|p| p.len() > MAX_PHONE_LEN) {
        return Err(EngineError::LimitExceeded("phone number too long"));
    }
    Ok(Customer {
        name: name.to_string(),
        phone: phone.map(str::to_string),
    })
}

fn validate_staff(created_by: &Option<String>) -> Result<(), EngineError> {
    if created_by.as_ref().is_some_and(|s| s.len() > MAX_STAFF_ID_LEN) {
        return Err(EngineError::LimitExceeded("staff id too long"));
    }
    Ok(())
}

fn validate_amount(what: &str, amount: Decimal) -> Result<(), EngineError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(EngineError::Validation(format!("{what} cannot be negative")));
    }
    Ok(())
}

fn validate_terms(terms: &PackageTerms) -> Result<(), EngineError> {
    if terms.name.trim().is_empty() {
        return Err(EngineError::Validation("package name is required".into()));
    }
    if terms.name.len() > MAX_PACKAGE_NAME_LEN {
        return Err(EngineError::LimitExceeded("package name too long"));
    }
    validate_amount("package price", terms.price)?;
    if terms.duration_ms <= 0 {
        return Err(EngineError::Validation("package duration must be positive".into()));
    }
    if terms.duration_ms > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("package duration too long"));
    }
    if terms.validity_ms <= 0 {
        return Err(EngineError::Validation("package validity must be positive".into()));
    }
    if terms.validity_ms > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("package validity too long"));
    }
    if terms.max_attempts > MAX_ATTEMPTS {
        return Err(EngineError::LimitExceeded("too many check-in attempts"));
    }
    Ok(())
}

/// Same booking id, same request. Walk-in start is `now` and can differ between retries.
fn same_request(existing: &Booking, candidate: &Booking) -> bool {
    existing.kind == candidate.kind
        && existing.customer == candidate.customer
        && existing.area == candidate.area
        && existing.resources == candidate.resources
        && existing.open == candidate.open
        && (existing.open || existing.end == candidate.end)
        && (existing.start == candidate.start || candidate.kind == BookingKind::Walkin)
        && existing.bill.down_payment == candidate.bill.down_payment
}

fn code_error(e: CodeError) -> EngineError {
    tracing::error!("promo code generation failed: {e}");
    EngineError::LimitExceeded("could not generate a unique promo code")
}

impl Engine {
    /// Create a walk-in or reservation session.
    pub async fn create_booking(&self, req: NewBooking, now: Ms) -> Result<Booking, EngineError> {
        let customer = validate_customer(&req.customer)?;
        validate_staff(&req.created_by)?;
        validate_amount("down payment", req.down_payment)?;
        let resources = resolve_resources(&self.settings.catalog, req.area, &req.resources)?;

        let (kind, start) = if req.reservation {
            if req.start < now {
                return Err(EngineError::Validation(
                    "a reservation cannot start in the past".into(),
                ));
            }
            (BookingKind::Reservation, req.start)
        } else {
            (BookingKind::Walkin, now)
        };
        let (end, open) = match req.end {
            Some(end) => (end, false),
            None => (OPEN_END, true),
        };
        validate_span(&Span { start, end })?;

        let base_cost = if open {
            Decimal::ZERO
        } else {
            self.settings
                .tariff
                .session_cost(req.area, resources.len(), end - start)
        };
        let booking = Booking {
            id: req.id,
            kind,
            customer,
            created_by: req.created_by,
            area: req.area,
            ledger: ledger_refs(&resources),
            resources,
            start,
            end,
            open,
            bill: Bill::new(base_cost, req.down_payment),
            promo_code: None,
            created_at: now,
            cancelled_at: None,
        };
        self.create(booking, false).await
    }

    /// Create a promo booking. Long packages get a check-in code.
    pub async fn create_promo_booking(
        &self,
        req: NewPromoBooking,
        now: Ms,
    ) -> Result<Booking, EngineError> {
        let customer = validate_customer(&req.customer)?;
        validate_staff(&req.created_by)?;
        validate_amount("down payment", req.down_payment)?;
        validate_terms(&req.terms)?;
        let resources = resolve_resources(&self.settings.catalog, req.area, &req.resources)?;

        let end = req
            .start
            .checked_add(req.terms.duration_ms)
            .ok_or(EngineError::LimitExceeded("package end out of range"))?;
        validate_span(&Span {
            start: req.start,
            end,
        })?;
        if end <= now {
            return Err(EngineError::Validation("package would already be over".into()));
        }

        let needs_code = req.terms.duration_ms >= self.settings.promo_code_min_ms;
        if needs_code && req.terms.max_attempts == 0 {
            return Err(EngineError::Validation(
                "packages with a check-in code need at least one attempt".into(),
            ));
        }

        let booking = Booking {
            id: req.id,
            customer,
            created_by: req.created_by,
            area: req.area,
            ledger: ledger_refs(&resources),
            resources,
            start: req.start,
            end,
            open: false,
            bill: Bill::new(req.terms.price, req.down_payment),
            promo_code: None,
            created_at: now,
            cancelled_at: None,
            kind: BookingKind::Promo(req.terms),
        };
        self.create(booking, needs_code).await
    }

    async fn create(&self, booking: Booking, with_code: bool) -> Result<Booking, EngineError> {
        let id = booking.id;
        if let Some(handle) = self.booking_handle(&id) {
            let existing = handle.read().await;
            // A create that failed while we waited has rolled back and dropped the handle.
            let live = self
                .booking_handle(&id)
                .is_some_and(|current| Arc::ptr_eq(&current, &handle));
            if live {
                if matches!(self.pending.get(&id).as_deref(), Some(Repair::Rollback)) {
                    return Err(EngineError::InconsistentState {
                        booking_id: id,
                        detail: "an earlier create with this id is still rolling back".into(),
                    });
                }
                if same_request(&existing, &booking) && !existing.is_cancelled() {
                    return Ok(existing.clone());
                }
                return Err(EngineError::AlreadyExists(id));
            }
        }

        let span = Span {
            start: booking.start,
            end: booking.end,
        };
        if let Availability::Conflict(reason) = self
            .is_available(booking.area, &booking.resources, span, None)
            .await?
        {
            metrics::counter!(crate::observability::CONFLICTS_TOTAL, "stage" => "precheck")
                .increment(1);
            return Err(EngineError::Conflict(reason));
        }

        // Claim the id before writing so a concurrent create with the same id waits on us.
        let shared = Arc::new(RwLock::new(booking.clone()));
        let mut guard = shared.clone().write_owned().await;
        match self.bookings.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(shared);
            }
        }

        let created = Event::BookingCreated {
            booking: Box::new(booking.clone()),
        };
        if let Err(e) = self.wal_append(&created).await {
            self.bookings.remove(&id);
            return Err(e);
        }
        self.announce(created);

        let records: Vec<(ResourceKey, BlockRecord)> = booking
            .ledger
            .iter()
            .map(|r| {
                (
                    r.resource.clone(),
                    BlockRecord {
                        id: r.record_id,
                        span,
                        source: booking.source(),
                        note: booking.note(),
                        booking_id: Some(id),
                    },
                )
            })
            .collect();
        if let Err(e) = self.block_many(records).await {
            return Err(self.undo_create(&mut guard, e).await);
        }

        if with_code && let Err(e) = self.issue_code(&mut guard).await {
            return Err(self.undo_create(&mut guard, e).await);
        }

        metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL, "kind" => guard.kind.as_str())
            .increment(1);
        tracing::info!(
            "booking {id} created: {} {} on {}",
            guard.kind.as_str(),
            guard.customer.name,
            guard.resources.join(",")
        );
        Ok(guard.clone())
    }

    /// Compensate a create whose ledger step failed. Returns the error to surface.
    async fn undo_create(&self, b: &mut Booking, cause: EngineError) -> EngineError {
        match self.discard(b).await {
            Ok(()) => cause,
            Err(undo) => self.flag(
                b.id,
                Repair::Rollback,
                format!("create failed ({cause}) and rollback failed ({undo})"),
            ),
        }
    }

    async fn issue_code(&self, b: &mut Booking) -> Result<PromoCode, EngineError> {
        let BookingKind::Promo(terms) = &b.kind else {
            return Err(EngineError::Validation("only promo bookings carry codes".into()));
        };
        let validity_end_at = b
            .start
            .checked_add(terms.validity_ms)
            .ok_or(EngineError::LimitExceeded("package validity out of range"))?;
        let code = promo_code::generate_unique(|c| self.codes.contains_key(c)).map_err(code_error)?;
        let code = PromoCode {
            code,
            booking_id: b.id,
            max_attempts: terms.max_attempts,
            attempts_left: terms.max_attempts,
            validity_end_at,
            superseded: false,
        };
        self.commit_booking(b, Event::CodeIssued { code: code.clone() })
            .await?;
        Ok(code)
    }

    /// End an open booking at `now`, price it, and cut its ledger records.
    pub async fn stop_booking(&self, id: Ulid, now: Ms) -> Result<Booking, EngineError> {
        let shared = self.booking_handle(&id).ok_or_else(|| EngineError::not_found(id))?;
        let mut b = shared.write().await;
        if b.is_cancelled() {
            return Err(EngineError::Validation("booking is cancelled".into()));
        }
        if !b.open {
            return Err(EngineError::Validation(
                "only open-ended bookings can be stopped".into(),
            ));
        }
        if now < b.start {
            return Err(EngineError::Validation("booking has not started yet".into()));
        }

        let base_cost = self
            .settings
            .tariff
            .session_cost(b.area, b.resources.len(), now - b.start);
        self.commit_booking(
            &mut b,
            Event::BookingStopped {
                id,
                end: now,
                base_cost,
            },
        )
        .await?;
        metrics::counter!(crate::observability::BOOKINGS_STOPPED_TOTAL).increment(1);

        if let Err(e) = self.cut_ledger(&b, now).await {
            return Err(self.flag(id, Repair::Sync, format!("truncate after stop failed: {e}")));
        }
        Ok(b.clone())
    }

    async fn cut_ledger(&self, b: &Booking, end: Ms) -> Result<(), EngineError> {
        for r in &b.ledger {
            let target = RecordMatch {
                record_id: Some(r.record_id),
                booking_id: Some(b.id),
                source: b.source(),
                start: b.start,
            };
            self.truncate(&r.resource, target, end).await?;
        }
        Ok(())
    }

    /// Cancel a booking. Time already used stays in the ledger; the rest is released.
    pub async fn cancel_booking(&self, id: Ulid, now: Ms) -> Result<Booking, EngineError> {
        let shared = self.booking_handle(&id).ok_or_else(|| EngineError::not_found(id))?;
        let mut b = shared.write().await;
        if b.is_cancelled() {
            return Ok(b.clone());
        }
        self.commit_booking(&mut b, Event::BookingCancelled { id, at: now })
            .await?;
        metrics::counter!(crate::observability::BOOKINGS_CANCELLED_TOTAL).increment(1);

        let released = if now <= b.start {
            self.release_all(&b).await
        } else if b.open || now < b.end {
            self.cut_ledger(&b, now).await
        } else {
            Ok(())
        };
        if let Err(e) = released {
            return Err(self.flag(id, Repair::Sync, format!("release after cancel failed: {e}")));
        }
        Ok(b.clone())
    }

    async fn release_all(&self, b: &Booking) -> Result<(), EngineError> {
        for r in &b.ledger {
            self.release(&r.resource, r.record_id).await?;
        }
        Ok(())
    }

    /// Hard-delete a booking and whatever ledger records it still holds.
    pub async fn purge_booking(&self, id: Ulid, staff: Option<&str>) -> Result<(), EngineError> {
        let shared = self.booking_handle(&id).ok_or_else(|| EngineError::not_found(id))?;
        let mut b = shared.write().await;
        let summary = serde_json::to_string(&*b).unwrap_or_else(|_| {
            format!("{} for {} on {}", b.kind.as_str(), b.customer.name, b.resources.join(","))
        });
        self.discard(&mut b).await?;
        self.pending.remove(&id);
        tracing::info!(
            "audit: booking {id} purged by {}: {summary}",
            staff.unwrap_or("unknown")
        );
        Ok(())
    }

    async fn update_bill(
        &self,
        id: Ulid,
        edit: impl FnOnce(&Bill) -> Bill,
    ) -> Result<Booking, EngineError> {
        let shared = self.booking_handle(&id).ok_or_else(|| EngineError::not_found(id))?;
        let mut b = shared.write().await;
        if b.is_cancelled() {
            return Err(EngineError::Validation("booking is cancelled".into()));
        }
        let bill = edit(&b.bill);
        if bill != b.bill {
            self.commit_booking(&mut b, Event::BillUpdated { id, bill }).await?;
        }
        Ok(b.clone())
    }

    pub async fn record_payment(&self, id: Ulid, edit: PaymentEdit) -> Result<Booking, EngineError> {
        match edit {
            PaymentEdit::Gcash(g) => validate_amount("gcash amount", g)?,
            PaymentEdit::Cash(c) => validate_amount("cash amount", c)?,
            PaymentEdit::Split { gcash, cash } => {
                validate_amount("gcash amount", gcash)?;
                validate_amount("cash amount", cash)?;
            }
        }
        self.update_bill(id, |bill| billing::apply_payment(bill, edit)).await
    }

    pub async fn set_down_payment(&self, id: Ulid, amount: Decimal) -> Result<Booking, EngineError> {
        validate_amount("down payment", amount)?;
        self.update_bill(id, |bill| billing::apply_down_payment(bill, amount))
            .await
    }

    pub async fn apply_discount(&self, id: Ulid, discount: Discount) -> Result<Booking, EngineError> {
        validate_amount("discount", discount.value)?;
        self.update_bill(id, |bill| billing::apply_discount(bill, discount))
            .await
    }

    pub async fn set_paid(&self, id: Ulid, paid: bool) -> Result<Booking, EngineError> {
        self.update_bill(id, |bill| billing::set_paid(bill, paid)).await
    }

    /// Replace a promo booking's code. The old code stops resolving; terms and
    /// remaining attempts carry over.
    pub async fn regenerate_code(&self, booking_id: Ulid) -> Result<PromoCode, EngineError> {
        let shared = self
            .booking_handle(&booking_id)
            .ok_or_else(|| EngineError::not_found(booking_id))?;
        let mut b = shared.write().await;
        if b.is_cancelled() {
            return Err(EngineError::Validation("booking is cancelled".into()));
        }
        let old = b
            .promo_code
            .as_ref()
            .and_then(|c| self.codes.get(c).map(|e| e.value().clone()))
            .ok_or(PromoError::NotFound)?;

        let code = promo_code::generate_unique(|c| self.codes.contains_key(c)).map_err(code_error)?;
        let fresh = PromoCode {
            code,
            superseded: false,
            ..old.clone()
        };
        // Issue first: if retiring the old code fails, the booking still has a working code.
        self.commit_booking(
            &mut b,
            Event::CodeIssued {
                code: fresh.clone(),
            },
        )
        .await?;
        if let Err(e) = self
            .commit_booking(&mut b, Event::CodeSuperseded { code: old.code.clone() })
            .await
        {
            tracing::error!(
                "booking {booking_id}: new code {} issued but old code {} still resolves: {e}",
                fresh.code,
                old.code
            );
            return Err(e);
        }
        tracing::info!("booking {booking_id} promo code regenerated");
        Ok(fresh)
    }
}

fn ledger_refs(resources: &[ResourceKey]) -> Vec<LedgerRef> {
    resources
        .iter()
        .map(|r| LedgerRef {
            resource: r.clone(),
            record_id: Ulid::new(),
        })
        .collect()
}
