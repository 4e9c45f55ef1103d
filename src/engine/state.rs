use std::collections::BTreeMap;

use ulid::Ulid;

use crate::billing;
use crate::model::*;

/// Apply a ledger event to one resource. Caller holds the lock.
pub(super) fn apply_to_resource(rs: &mut ResourceState, event: &Event) {
    match event {
        Event::Blocked { record, .. } => {
            if rs.record(record.id).is_none() {
                rs.insert_record(record.clone());
            }
        }
        Event::Truncated { id, end, .. } => {
            rs.set_end(*id, *end);
        }
        Event::Released { id, .. } => {
            rs.remove_record(*id);
        }
        _ => {}
    }
}

/// Apply a booking-scoped event. Caller holds the booking lock.
pub(super) fn apply_to_booking(b: &mut Booking, event: &Event) {
    match event {
        Event::BookingStopped { end, base_cost, .. } => {
            b.end = *end;
            b.open = false;
            b.bill = billing::apply_base_cost(&b.bill, *base_cost);
        }
        Event::BookingCancelled { at, .. } => b.cancelled_at = Some(*at),
        Event::BillUpdated { bill, .. } => b.bill = bill.clone(),
        Event::CodeIssued { code } if !code.superseded => b.promo_code = Some(code.code.clone()),
        _ => {}
    }
}

pub(super) fn apply_to_code(code: &mut PromoCode, event: &Event) {
    match event {
        Event::CodeSuperseded { .. } => code.superseded = true,
        Event::CheckedIn { attempts_left, .. } => code.attempts_left = *attempts_left,
        _ => {}
    }
}

pub(super) fn apply_to_attendance(entries: &mut Vec<AttendanceEntry>, event: &Event) {
    match event {
        Event::CheckedIn { entry, .. } => {
            if !entries.iter().any(|e| e.id == entry.id) {
                entries.push(entry.clone());
            }
        }
        Event::CheckedOut { entry_id, at, .. } => {
            if let Some(e) = entries.iter_mut().find(|e| e.id == *entry_id) {
                e.out_at = Some(*at);
            }
        }
        _ => {}
    }
}

/// Whole-store state folded from an event stream. Used to rebuild the engine
/// at startup and to rewrite the log during compaction.
#[derive(Debug, Default)]
pub(super) struct Snapshot {
    pub resources: BTreeMap<ResourceKey, ResourceState>,
    pub bookings: BTreeMap<Ulid, Booking>,
    pub codes: BTreeMap<String, PromoCode>,
    pub attendance: BTreeMap<Ulid, Vec<AttendanceEntry>>,
}

impl Snapshot {
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a Event>) -> Self {
        let mut snapshot = Self::default();
        for event in events {
            snapshot.apply(event);
        }
        snapshot
    }

    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::Blocked { resource, .. }
            | Event::Truncated { resource, .. }
            | Event::Released { resource, .. } => {
                let rs = self
                    .resources
                    .entry(resource.clone())
                    .or_insert_with(|| ResourceState::new(resource.clone()));
                apply_to_resource(rs, event);
            }
            Event::BookingCreated { booking } => {
                self.bookings.insert(booking.id, (**booking).clone());
            }
            Event::BookingPurged { id } => {
                self.bookings.remove(id);
                self.codes.retain(|_, c| c.booking_id != *id);
                self.attendance.remove(id);
            }
            Event::BookingStopped { id, .. }
            | Event::BookingCancelled { id, .. }
            | Event::BillUpdated { id, .. } => {
                if let Some(b) = self.bookings.get_mut(id) {
                    apply_to_booking(b, event);
                }
            }
            Event::CodeIssued { code } => {
                self.codes.insert(code.code.clone(), code.clone());
                if let Some(b) = self.bookings.get_mut(&code.booking_id) {
                    apply_to_booking(b, event);
                }
            }
            Event::CodeSuperseded { code } => {
                if let Some(c) = self.codes.get_mut(code) {
                    apply_to_code(c, event);
                }
            }
            Event::CheckedIn { entry, .. } => {
                if let Some(c) = self.codes.get_mut(&entry.code) {
                    apply_to_code(c, event);
                }
                apply_to_attendance(self.attendance.entry(entry.booking_id).or_default(), event);
            }
            Event::CheckedOut { booking_id, .. } => {
                if let Some(entries) = self.attendance.get_mut(booking_id) {
                    apply_to_attendance(entries, event);
                }
            }
        }
    }

    /// The shortest event list that folds back into this state.
    pub fn into_events(self) -> Vec<Event> {
        let mut events = Vec::new();
        for (_, booking) in self.bookings {
            events.push(Event::BookingCreated {
                booking: Box::new(booking),
            });
        }
        for (resource, rs) in self.resources {
            for record in rs.records {
                events.push(Event::Blocked {
                    resource: resource.clone(),
                    record,
                });
            }
        }
        for (_, entries) in self.attendance {
            for entry in entries {
                let attempts_left = self
                    .codes
                    .get(&entry.code)
                    .map_or(0, |c| c.attempts_left);
                events.push(Event::CheckedIn {
                    entry,
                    attempts_left,
                });
            }
        }
        // Codes last: a superseded code must not win the booking's `promo_code`.
        let (old, live): (Vec<_>, Vec<_>) = self.codes.into_values().partition(|c| c.superseded);
        for code in old.into_iter().chain(live) {
            events.push(Event::CodeIssued { code });
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn booking(id: Ulid) -> Booking {
        Booking {
            id,
            kind: BookingKind::Walkin,
            customer: Customer {
                name: "Bea".into(),
                phone: None,
            },
            created_by: None,
            area: Area::Common,
            resources: vec!["2".into()],
            start: 1_000,
            end: OPEN_END,
            open: true,
            ledger: vec![],
            bill: Bill::new(Decimal::ZERO, Decimal::ZERO),
            promo_code: None,
            created_at: 1_000,
            cancelled_at: None,
        }
    }

    fn code(code: &str, booking_id: Ulid, superseded: bool) -> PromoCode {
        PromoCode {
            code: code.into(),
            booking_id,
            max_attempts: 3,
            attempts_left: 3,
            validity_end_at: 10_000,
            superseded,
        }
    }

    #[test]
    fn stop_closes_window_and_sets_cost() {
        let id = Ulid::new();
        let mut b = booking(id);
        apply_to_booking(
            &mut b,
            &Event::BookingStopped {
                id,
                end: 5_000,
                base_cost: dec!(25),
            },
        );
        assert!(!b.open);
        assert_eq!(b.end, 5_000);
        assert_eq!(b.bill.base_cost, dec!(25));
    }

    #[test]
    fn blocked_is_idempotent_per_record_id() {
        let mut rs = ResourceState::new("2".into());
        let event = Event::Blocked {
            resource: "2".into(),
            record: BlockRecord {
                id: Ulid::new(),
                span: Span::new(0, 10),
                source: Source::Regular,
                note: Note::None,
                booking_id: None,
            },
        };
        apply_to_resource(&mut rs, &event);
        apply_to_resource(&mut rs, &event);
        assert_eq!(rs.records.len(), 1);
    }

    #[test]
    fn purge_drops_codes_and_attendance() {
        let id = Ulid::new();
        let mut snap = Snapshot::default();
        snap.apply(&Event::BookingCreated {
            booking: Box::new(booking(id)),
        });
        snap.apply(&Event::CodeIssued {
            code: code("ABCD2345", id, false),
        });
        snap.apply(&Event::BookingPurged { id });
        assert!(snap.bookings.is_empty());
        assert!(snap.codes.is_empty());
    }

    #[test]
    fn compacted_events_fold_to_same_state() {
        let id = Ulid::new();
        let entry = AttendanceEntry {
            id: Ulid::new(),
            booking_id: id,
            code: "NEWCODE2".into(),
            local_day: chrono::NaiveDate::from_ymd_opt(2025, 1, 2).unwrap(),
            in_at: 2_000,
            out_at: None,
        };
        let events = vec![
            Event::BookingCreated {
                booking: Box::new(booking(id)),
            },
            Event::CodeIssued {
                code: code("OLDCODE2", id, false),
            },
            Event::CodeSuperseded {
                code: "OLDCODE2".into(),
            },
            Event::CodeIssued {
                code: code("NEWCODE2", id, false),
            },
            Event::CheckedIn {
                entry: entry.clone(),
                attempts_left: 2,
            },
            Event::CheckedOut {
                booking_id: id,
                entry_id: entry.id,
                at: 3_000,
            },
        ];
        let original = Snapshot::from_events(&events);
        let compacted = Snapshot::from_events(&original_clone(&original).into_events());

        assert_eq!(compacted.bookings, original.bookings);
        assert_eq!(compacted.codes, original.codes);
        assert_eq!(compacted.attendance, original.attendance);
        assert_eq!(compacted.bookings[&id].promo_code.as_deref(), Some("NEWCODE2"));
        assert_eq!(compacted.codes["NEWCODE2"].attempts_left, 2);
        assert_eq!(compacted.attendance[&id][0].out_at, Some(3_000));
    }

    fn original_clone(s: &Snapshot) -> Snapshot {
        Snapshot {
            resources: s.resources.clone(),
            bookings: s.bookings.clone(),
            codes: s.codes.clone(),
            attendance: s.attendance.clone(),
        }
    }
}
