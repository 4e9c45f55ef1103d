use super::*;
use crate::billing::{Outstanding, PaymentEdit};
use crate::notify::{BOOKINGS_CHANNEL, resource_channel};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const H: Ms = HOUR_MS;
const M: Ms = MINUTE_MS;
/// 2025-06-02T10:00:00+08:00, venue time.
const T10: Ms = 1_748_829_600_000;
/// Well before any booking in these tests.
const EARLY: Ms = T10 - 2 * H;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("deskbook_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn settings() -> EngineSettings {
    EngineSettings {
        catalog: Catalog::with_seats(6),
        ..EngineSettings::default()
    }
}

fn open_engine(path: &std::path::Path) -> Engine {
    Engine::new(path.to_path_buf(), Arc::new(NotifyHub::new()), settings()).unwrap()
}

fn engine(name: &str) -> Engine {
    open_engine(&test_wal_path(name))
}

fn seats(keys: &[&str]) -> Vec<ResourceKey> {
    keys.iter().map(|k| k.to_string()).collect()
}

fn customer(name: &str) -> Customer {
    Customer {
        name: name.into(),
        phone: None,
    }
}

fn reservation(keys: &[&str], start: Ms, end: Ms) -> NewBooking {
    NewBooking {
        id: Ulid::new(),
        reservation: true,
        customer: customer("Ana"),
        created_by: Some("desk-1".into()),
        area: Area::Common,
        resources: seats(keys),
        start,
        end: Some(end),
        down_payment: Decimal::ZERO,
    }
}

fn walkin(keys: &[&str]) -> NewBooking {
    NewBooking {
        reservation: false,
        start: 0,
        end: None,
        ..reservation(keys, 0, 0)
    }
}

fn promo(days: Ms, attempts: u32) -> NewPromoBooking {
    NewPromoBooking {
        id: Ulid::new(),
        customer: customer("Ben"),
        created_by: None,
        area: Area::Common,
        resources: seats(&["5"]),
        start: T10,
        terms: PackageTerms {
            name: "Monthly desk".into(),
            price: dec!(3000),
            duration_ms: days * DAY_MS,
            max_attempts: attempts,
            validity_ms: days * DAY_MS,
        },
        down_payment: Decimal::ZERO,
    }
}

async fn ledger_on(engine: &Engine, key: &str) -> Vec<BlockInfo> {
    engine
        .query_overlaps(&seats(&[key]), Span::new(T10 - 30 * DAY_MS, T10 + 90 * DAY_MS))
        .await
        .unwrap()
}

// ── Ledger & availability ────────────────────────────────

#[tokio::test]
async fn half_open_boundary_scenario() {
    let engine = engine("half_open.wal");
    engine
        .create_booking(reservation(&["3"], T10, T10 + H), EARLY)
        .await
        .unwrap();

    let inside = engine
        .is_available(Area::Common, &seats(&["3"]), Span::new(T10 + 30 * M, T10 + 45 * M), None)
        .await
        .unwrap();
    match inside {
        Availability::Conflict(reason) => {
            assert_eq!(reason.resource, "3");
            assert_eq!(reason.occupied, Span::new(T10, T10 + H));
        }
        Availability::Ok => panic!("overlap accepted"),
    }

    let after = engine
        .is_available(Area::Common, &seats(&["3"]), Span::new(T10 + H, T10 + 90 * M), None)
        .await
        .unwrap();
    assert!(after.is_ok());

    let err = engine
        .create_booking(reservation(&["3"], T10 + 30 * M, T10 + 45 * M), EARLY)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));
    assert!(err.user_message().starts_with("not available for the selected schedule"));

    engine
        .create_booking(reservation(&["3"], T10 + H, T10 + 90 * M), EARLY)
        .await
        .unwrap();
}

#[tokio::test]
async fn multi_seat_request_is_all_or_nothing() {
    let engine = engine("all_or_nothing.wal");
    engine
        .create_booking(reservation(&["2"], T10, T10 + H), EARLY)
        .await
        .unwrap();

    let err = engine
        .create_booking(reservation(&["1", "2"], T10, T10 + H), EARLY)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(ref r) if r.resource == "2"));
    assert!(ledger_on(&engine, "1").await.is_empty());
    assert_eq!(engine.list_bookings(EARLY, true).await.len(), 1);
}

#[tokio::test]
async fn room_is_a_separate_resource() {
    let engine = engine("room_separate.wal");
    engine
        .create_booking(reservation(&["1"], T10, T10 + H), EARLY)
        .await
        .unwrap();
    let room = NewBooking {
        area: Area::Room,
        resources: vec![],
        ..reservation(&[], T10, T10 + H)
    };
    let b = engine.create_booking(room.clone(), EARLY).await.unwrap();
    assert_eq!(b.resources, vec![ROOM_KEY.to_string()]);

    let again = NewBooking {
        id: Ulid::new(),
        ..room
    };
    assert!(matches!(
        engine.create_booking(again, EARLY).await,
        Err(EngineError::Conflict(ref r)) if r.resource == ROOM_KEY
    ));
}

#[tokio::test]
async fn concurrent_creates_admit_exactly_one() {
    let engine = Arc::new(engine("concurrent_create.wal"));
    let mut handles = Vec::new();
    for _ in 0..16 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .create_booking(reservation(&["4"], T10, T10 + H), EARLY)
                .await
        }));
    }
    let mut ok = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => ok += 1,
            Err(EngineError::Conflict(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(ledger_on(&engine, "4").await.len(), 1);
    assert_eq!(engine.list_bookings(EARLY, true).await.len(), 1);
}

#[tokio::test]
async fn accepted_windows_never_overlap() {
    let engine = Arc::new(engine("no_double_booking.wal"));
    let mut seed: i64 = 7;
    let mut handles = Vec::new();
    for _ in 0..40 {
        seed = (seed * 1_103_515_245 + 12_345) % 2_147_483_648;
        let start = T10 + (seed % 48) * 15 * M;
        let len = (1 + seed % 8) * 15 * M;
        let key = if seed % 2 == 0 { "1" } else { "2" };
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let _ = engine
                .create_booking(reservation(&[key], start, start + len), EARLY)
                .await;
        }));
    }
    for h in handles {
        h.await.unwrap();
    }
    for key in ["1", "2"] {
        let records = ledger_on(&engine, key).await;
        assert!(!records.is_empty());
        for pair in records.windows(2) {
            assert!(pair[0].end <= pair[1].start, "overlap on seat {key}");
        }
    }
}

#[tokio::test]
async fn mirror_records_do_not_block() {
    let engine = engine("mirror.wal");
    engine
        .block(
            "3",
            BlockRecord {
                id: Ulid::new(),
                span: Span::new(T10, T10 + H),
                source: Source::Regular,
                note: Note::Mirror,
                booking_id: None,
            },
        )
        .await
        .unwrap();
    engine
        .create_booking(reservation(&["3"], T10, T10 + H), EARLY)
        .await
        .unwrap();
    // Mirrors are not reported as overlaps either.
    assert_eq!(ledger_on(&engine, "3").await.len(), 1);
}

#[tokio::test]
async fn block_retry_with_same_record_is_a_noop() {
    let engine = engine("block_idempotent.wal");
    let record = BlockRecord {
        id: Ulid::new(),
        span: Span::new(T10, T10 + H),
        source: Source::Reserved,
        note: Note::None,
        booking_id: None,
    };
    engine.block("2", record.clone()).await.unwrap();
    engine.block("2", record.clone()).await.unwrap();
    assert_eq!(ledger_on(&engine, "2").await.len(), 1);

    let moved = BlockRecord {
        span: Span::new(T10 + 2 * H, T10 + 3 * H),
        ..record
    };
    assert!(matches!(
        engine.block("2", moved).await,
        Err(EngineError::AlreadyExists(_))
    ));
}

#[tokio::test]
async fn degraded_truncate_falls_back_to_latest_open_record() {
    let engine = engine("degraded_truncate.wal");
    let record = BlockRecord {
        id: Ulid::new(),
        span: Span::open_from(T10),
        source: Source::Regular,
        note: Note::None,
        booking_id: None,
    };
    engine.block("6", record.clone()).await.unwrap();

    let target = RecordMatch {
        record_id: None,
        booking_id: None,
        source: Source::Regular,
        start: T10 + 5 * M,
    };
    let outcome = engine.truncate("6", target, T10 + H).await.unwrap();
    assert_eq!(outcome, TruncateOutcome::Degraded(record.id));
    assert_eq!(ledger_on(&engine, "6").await[0].end, T10 + H);

    // Exact match now, already short enough.
    let exact = RecordMatch {
        start: T10,
        ..target
    };
    assert_eq!(
        engine.truncate("6", exact, T10 + 2 * H).await.unwrap(),
        TruncateOutcome::Unchanged
    );
}

#[tokio::test]
async fn degraded_truncate_never_cuts_another_bookings_record() {
    let engine = engine("degraded_other_owner.wal");
    let b = engine.create_booking(walkin(&["6"]), T10).await.unwrap();
    let target = RecordMatch {
        record_id: None,
        booking_id: Some(Ulid::new()),
        source: Source::Regular,
        start: T10 - H,
    };
    assert!(matches!(
        engine.truncate("6", target, T10 + H).await,
        Err(EngineError::NotFound(_))
    ));
    let records = ledger_on(&engine, "6").await;
    assert_eq!(records[0].booking_id, Some(b.id));
    assert_eq!(records[0].end, OPEN_END);
}

#[tokio::test]
async fn exact_truncate_never_cuts_another_bookings_record() {
    let engine = engine("exact_other_owner.wal");
    let b = engine
        .create_booking(reservation(&["3"], T10, T10 + H), EARLY)
        .await
        .unwrap();
    let target = RecordMatch {
        record_id: None,
        booking_id: Some(Ulid::new()),
        source: Source::Reserved,
        start: T10,
    };
    assert!(matches!(
        engine.truncate("3", target, T10 + 30 * M).await,
        Err(EngineError::NotFound(_))
    ));
    let records = ledger_on(&engine, "3").await;
    assert_eq!(records[0].booking_id, Some(b.id));
    assert_eq!(records[0].end, T10 + H);

    // The owner still matches exactly without naming the record.
    let owned = RecordMatch {
        booking_id: Some(b.id),
        ..target
    };
    assert_eq!(
        engine.truncate("3", owned, T10 + 30 * M).await.unwrap(),
        TruncateOutcome::Exact
    );
}

#[tokio::test]
async fn free_slots_and_occupancy() {
    let engine = engine("free_slots.wal");
    engine
        .create_booking(reservation(&["1"], T10, T10 + H), EARLY)
        .await
        .unwrap();
    engine
        .create_booking(reservation(&["1"], T10 + 2 * H, T10 + 3 * H), EARLY)
        .await
        .unwrap();

    let free = engine
        .free_slots("1", Span::new(T10 - H, T10 + 4 * H), 30 * M)
        .await
        .unwrap();
    assert_eq!(
        free,
        vec![
            Span::new(T10 - H, T10),
            Span::new(T10 + H, T10 + 2 * H),
            Span::new(T10 + 3 * H, T10 + 4 * H),
        ]
    );

    let snap = engine.occupancy(T10 + 10 * M).await;
    assert_eq!(snap.records.len(), 1);
    assert_eq!(snap.records[0].resource, "1");
    assert_eq!(snap.revision, engine.revision());
}

// ── Lifecycle ────────────────────────────────────────────

#[tokio::test]
async fn stop_truncates_to_exactly_now() {
    let engine = engine("stop_truncate.wal");
    let b = engine.create_booking(walkin(&["2"]), T10).await.unwrap();
    assert!(b.open);
    assert_eq!(b.start, T10);
    assert_eq!(b.status(T10 + 100 * DAY_MS), Status::Ongoing);

    let stopped = engine.stop_booking(b.id, T10 + 90 * M).await.unwrap();
    assert!(!stopped.open);
    assert_eq!(stopped.end, T10 + 90 * M);
    assert_eq!(stopped.elapsed_ms(T10 + 5 * H), 90 * M);
    // 1.5h at the default seat rate of 50/h.
    assert_eq!(stopped.bill.base_cost, dec!(75));

    let records = ledger_on(&engine, "2").await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].end, T10 + 90 * M);
    assert_eq!(stopped.status(T10 + 91 * M), Status::Finished);

    // Seat is free again right after.
    engine
        .create_booking(reservation(&["2"], T10 + 90 * M, T10 + 3 * H), T10 + 90 * M)
        .await
        .unwrap();
}

#[tokio::test]
async fn stop_rules() {
    let engine = engine("stop_rules.wal");
    let future = NewBooking {
        end: None,
        ..reservation(&["3"], T10 + H, T10 + 2 * H)
    };
    let b = engine.create_booking(future, T10).await.unwrap();
    assert!(matches!(
        engine.stop_booking(b.id, T10 + 30 * M).await,
        Err(EngineError::Validation(_))
    ));

    let closed = engine
        .create_booking(reservation(&["4"], T10, T10 + H), T10)
        .await
        .unwrap();
    assert!(matches!(
        engine.stop_booking(closed.id, T10 + 30 * M).await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        engine.stop_booking(Ulid::new(), T10).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn stop_at_start_releases_the_record() {
    let engine = engine("stop_at_start.wal");
    let b = engine.create_booking(walkin(&["1"]), T10).await.unwrap();
    let stopped = engine.stop_booking(b.id, T10).await.unwrap();
    assert_eq!(stopped.bill.base_cost, Decimal::ZERO);
    assert!(ledger_on(&engine, "1").await.is_empty());
}

#[tokio::test]
async fn cancelling_future_reservation_releases_seat() {
    let engine = engine("cancel_future.wal");
    let b = engine
        .create_booking(reservation(&["3"], T10, T10 + H), EARLY)
        .await
        .unwrap();
    let cancelled = engine.cancel_booking(b.id, EARLY + M).await.unwrap();
    assert_eq!(cancelled.cancelled_at, Some(EARLY + M));
    assert!(ledger_on(&engine, "3").await.is_empty());
    assert!(engine.list_bookings(EARLY, false).await.is_empty());
    assert_eq!(engine.list_bookings(EARLY, true).await.len(), 1);

    engine
        .create_booking(reservation(&["3"], T10, T10 + H), EARLY + 2 * M)
        .await
        .unwrap();

    // A second cancel is harmless.
    engine.cancel_booking(b.id, EARLY + 3 * M).await.unwrap();
}

#[tokio::test]
async fn cancelling_ongoing_keeps_elapsed_time_only() {
    let engine = engine("cancel_ongoing.wal");
    let open = engine.create_booking(walkin(&["1"]), T10).await.unwrap();
    let closed = engine
        .create_booking(reservation(&["2"], T10, T10 + 2 * H), T10)
        .await
        .unwrap();
    engine.cancel_booking(open.id, T10 + 20 * M).await.unwrap();
    engine.cancel_booking(closed.id, T10 + 30 * M).await.unwrap();

    assert_eq!(ledger_on(&engine, "1").await[0].end, T10 + 20 * M);
    assert_eq!(ledger_on(&engine, "2").await[0].end, T10 + 30 * M);
}

#[tokio::test]
async fn cancelling_finished_booking_leaves_history() {
    let engine = engine("cancel_finished.wal");
    let b = engine
        .create_booking(reservation(&["5"], T10, T10 + H), EARLY)
        .await
        .unwrap();
    engine.cancel_booking(b.id, T10 + 2 * H).await.unwrap();
    assert_eq!(ledger_on(&engine, "5").await[0].end, T10 + H);
}

#[tokio::test]
async fn validation_errors_never_touch_the_ledger() {
    let engine = engine("validation.wal");
    let nameless = NewBooking {
        customer: customer("   "),
        ..reservation(&["1"], T10, T10 + H)
    };
    assert!(matches!(
        engine.create_booking(nameless, EARLY).await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        engine.create_booking(reservation(&[], T10, T10 + H), EARLY).await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        engine
            .create_booking(reservation(&["1"], T10, T10 + H), T10 + M)
            .await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        engine
            .create_booking(reservation(&["1"], T10, T10 - H), EARLY)
            .await,
        Err(EngineError::Validation(_))
    ));
    assert!(ledger_on(&engine, "1").await.is_empty());
    assert_eq!(engine.revision(), 0);
}

#[tokio::test]
async fn create_retry_is_idempotent() {
    let engine = engine("create_retry.wal");
    let req = reservation(&["2"], T10, T10 + H);
    let first = engine.create_booking(req.clone(), EARLY).await.unwrap();
    let again = engine.create_booking(req.clone(), EARLY + M).await.unwrap();
    assert_eq!(first, again);
    assert_eq!(ledger_on(&engine, "2").await.len(), 1);

    let changed = NewBooking {
        end: Some(T10 + 2 * H),
        ..req
    };
    assert!(matches!(
        engine.create_booking(changed, EARLY).await,
        Err(EngineError::AlreadyExists(_))
    ));
}

#[tokio::test]
async fn create_retry_after_rollback_creates_afresh() {
    let engine = Arc::new(engine("create_retry_rollback.wal"));
    let req = reservation(&["3"], T10, T10 + H);
    let first = engine.create_booking(req.clone(), EARLY).await.unwrap();

    // Hold the booking the way a failing create does, so the retry queues behind it.
    let handle = engine.booking_handle(&first.id).unwrap();
    let mut guard = handle.clone().write_owned().await;
    let retry = tokio::spawn({
        let engine = engine.clone();
        let req = req.clone();
        async move { engine.create_booking(req, EARLY + M).await }
    });
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
    engine.discard(&mut guard).await.unwrap();
    drop(guard);

    let again = retry.await.unwrap().unwrap();
    assert_eq!(again.id, first.id);
    assert_eq!(engine.get_booking(first.id).await, Some(again));
    let records = ledger_on(&engine, "3").await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].booking_id, Some(first.id));
}

#[tokio::test]
async fn create_retry_during_pending_rollback_is_refused() {
    let engine = engine("create_retry_pending_rollback.wal");
    let req = reservation(&["4"], T10, T10 + H);
    let first = engine.create_booking(req.clone(), EARLY).await.unwrap();
    engine.pending.insert(first.id, Repair::Rollback);
    assert!(matches!(
        engine.create_booking(req, EARLY).await,
        Err(EngineError::InconsistentState { booking_id, .. }) if booking_id == first.id
    ));
}

#[tokio::test]
async fn closed_session_priced_per_seat() {
    let engine = engine("closed_price.wal");
    let b = engine
        .create_booking(reservation(&["1", "2"], T10, T10 + 2 * H), EARLY)
        .await
        .unwrap();
    assert_eq!(b.bill.base_cost, dec!(200));
}

#[tokio::test]
async fn purge_removes_booking_and_records() {
    let engine = engine("purge.wal");
    let b = engine
        .create_booking(reservation(&["6"], T10, T10 + H), EARLY)
        .await
        .unwrap();
    engine.purge_booking(b.id, Some("admin")).await.unwrap();
    assert!(engine.get_booking(b.id).await.is_none());
    assert!(ledger_on(&engine, "6").await.is_empty());
    assert!(matches!(
        engine.purge_booking(b.id, None).await,
        Err(EngineError::NotFound(_))
    ));
}

// ── Billing through the engine ───────────────────────────

#[tokio::test]
async fn discount_down_payment_and_payment() {
    let engine = engine("billing.wal");
    let req = NewBooking {
        down_payment: dec!(50),
        ..reservation(&["1"], T10, T10 + 2 * H)
    };
    let b = engine.create_booking(req, EARLY).await.unwrap();
    assert_eq!(b.bill.base_cost, dec!(100));

    let b = engine
        .apply_discount(
            b.id,
            Discount {
                kind: DiscountKind::Percent,
                value: dec!(10),
            },
        )
        .await
        .unwrap();
    let view = engine.booking_view(b.id, EARLY).await.unwrap();
    assert_eq!(view.settlement.discounted_cost, dec!(90));
    assert_eq!(view.settlement.outstanding, Outstanding::Balance(dec!(40)));
    assert!(!b.bill.paid);

    let b = engine
        .record_payment(b.id, PaymentEdit::Gcash(dec!(15)))
        .await
        .unwrap();
    assert_eq!(b.bill.cash, dec!(25));
    assert!(b.bill.paid);

    let b = engine.set_paid(b.id, false).await.unwrap();
    assert!(!b.bill.paid);
    // Unrelated discount edit keeps the manual flag.
    let b = engine
        .apply_discount(
            b.id,
            Discount {
                kind: DiscountKind::Amount,
                value: dec!(5),
            },
        )
        .await
        .unwrap();
    assert!(!b.bill.paid);

    assert!(matches!(
        engine.set_down_payment(b.id, dec!(-1)).await,
        Err(EngineError::Validation(_))
    ));
}

// ── Promo codes & attendance ─────────────────────────────

#[tokio::test]
async fn three_attempt_code_runs_out() {
    let engine = engine("promo_attempts.wal");
    let b = engine.create_promo_booking(promo(30, 3), T10).await.unwrap();
    let code = b.promo_code.clone().expect("30-day package issues a code");
    assert_eq!(engine.promo_code(&code).unwrap().attempts_left, 3);

    for day in 0..3 {
        let t = T10 + day * DAY_MS;
        engine.check_in(&code, t).await.unwrap();
        engine.check_out(&code, t + 2 * H).await.unwrap();
    }
    assert_eq!(engine.promo_code(&code).unwrap().attempts_left, 0);
    assert!(matches!(
        engine.check_in(&code, T10 + 3 * DAY_MS).await,
        Err(EngineError::Promo(PromoError::NoAttemptsLeft))
    ));
    assert_eq!(engine.attendance(b.id).len(), 3);
}

#[tokio::test]
async fn one_open_entry_per_local_day() {
    let engine = engine("promo_daily.wal");
    let b = engine.create_promo_booking(promo(30, 5), T10).await.unwrap();
    let code = b.promo_code.unwrap().to_lowercase();

    engine.check_in(&code, T10).await.unwrap();
    assert!(matches!(
        engine.check_in(&code, T10 + H).await,
        Err(EngineError::Promo(PromoError::AlreadyCheckedIn))
    ));
    engine.check_out(&code, T10 + 2 * H).await.unwrap();
    assert!(matches!(
        engine.check_out(&code, T10 + 3 * H).await,
        Err(EngineError::Promo(PromoError::NoOpenCheckIn))
    ));
    // Checked out, so the same day may start a new cycle.
    engine.check_in(&code, T10 + 4 * H).await.unwrap();
    let open: Vec<_> = engine
        .attendance(b.id)
        .into_iter()
        .filter(|e| e.is_open())
        .collect();
    assert_eq!(open.len(), 1);
}

#[tokio::test]
async fn local_day_follows_venue_timezone() {
    let engine = engine("promo_timezone.wal");
    let b = engine.create_promo_booking(promo(30, 5), T10).await.unwrap();
    let code = b.promo_code.unwrap();

    // 23:30 and 00:10 Manila time straddle a local midnight but not a UTC one.
    let late = T10 + 13 * H + 30 * M;
    let after_midnight = T10 + 14 * H + 10 * M;
    let entry = engine.check_in(&code, late).await.unwrap();
    assert_eq!(entry.local_day, chrono::NaiveDate::from_ymd_opt(2025, 6, 2).unwrap());
    assert!(matches!(
        engine.check_out(&code, after_midnight).await,
        Err(EngineError::Promo(PromoError::NoOpenCheckIn))
    ));
    let next = engine.check_in(&code, after_midnight).await.unwrap();
    assert_eq!(next.local_day, chrono::NaiveDate::from_ymd_opt(2025, 6, 3).unwrap());
}

#[tokio::test]
async fn unknown_and_expired_codes() {
    let engine = engine("promo_expired.wal");
    assert!(matches!(
        engine.check_in("NOPE2345", T10).await,
        Err(EngineError::Promo(PromoError::NotFound))
    ));
    let b = engine.create_promo_booking(promo(10, 5), T10).await.unwrap();
    let code = b.promo_code.unwrap();
    assert!(matches!(
        engine.check_in(&code, T10 + 10 * DAY_MS + 1).await,
        Err(EngineError::Promo(PromoError::Expired))
    ));
}

#[tokio::test]
async fn short_packages_have_no_code() {
    let engine = engine("promo_short.wal");
    let b = engine.create_promo_booking(promo(1, 0), T10).await.unwrap();
    assert!(b.promo_code.is_none());
    assert_eq!(b.bill.base_cost, dec!(3000));
    assert_eq!(b.end, T10 + DAY_MS);
    assert_eq!(ledger_on(&engine, "5").await[0].source, Source::Promo);
}

#[tokio::test]
async fn promo_terms_out_of_range_are_rejected() {
    let engine = engine("promo_out_of_range.wal");
    let far_start = NewPromoBooking {
        start: i64::MAX - 1000,
        ..promo(30, 3)
    };
    assert!(matches!(
        engine.create_promo_booking(far_start, T10).await,
        Err(EngineError::LimitExceeded(_))
    ));

    let mut long_validity = promo(30, 3);
    long_validity.terms.validity_ms = i64::MAX;
    assert!(matches!(
        engine.create_promo_booking(long_validity, T10).await,
        Err(EngineError::LimitExceeded(_))
    ));

    let mut long_duration = promo(30, 3);
    long_duration.terms.duration_ms = 400 * DAY_MS;
    assert!(matches!(
        engine.create_promo_booking(long_duration, T10).await,
        Err(EngineError::LimitExceeded(_))
    ));

    assert!(ledger_on(&engine, "5").await.is_empty());
    assert_eq!(engine.revision(), 0);
}

#[tokio::test]
async fn regenerate_issues_new_code_before_retiring_old() {
    let engine = engine("promo_regen_order.wal");
    let b = engine.create_promo_booking(promo(30, 3), T10).await.unwrap();
    let old = b.promo_code.unwrap();
    let mut rx = engine.notify.subscribe(BOOKINGS_CHANNEL);

    let fresh = engine.regenerate_code(b.id).await.unwrap();
    let issued = rx.recv().await.unwrap();
    let retired = rx.recv().await.unwrap();
    assert!(matches!(issued.event, Event::CodeIssued { ref code } if code.code == fresh.code));
    assert!(matches!(retired.event, Event::CodeSuperseded { ref code } if *code == old));
    assert!(issued.revision < retired.revision);
}

#[tokio::test]
async fn regenerated_code_carries_remaining_attempts() {
    let engine = engine("promo_regen.wal");
    let b = engine.create_promo_booking(promo(30, 3), T10).await.unwrap();
    let old = b.promo_code.unwrap();
    engine.check_in(&old, T10).await.unwrap();

    let fresh = engine.regenerate_code(b.id).await.unwrap();
    assert_ne!(fresh.code, old);
    assert_eq!(fresh.attempts_left, 2);
    assert_eq!(
        engine.get_booking(b.id).await.unwrap().promo_code,
        Some(fresh.code.clone())
    );
    assert!(matches!(
        engine.check_in(&old, T10 + DAY_MS).await,
        Err(EngineError::Promo(PromoError::NotFound))
    ));
    // Today's entry is still open under the booking, whichever code closes it.
    engine.check_out(&fresh.code, T10 + H).await.unwrap();
    engine.check_in(&fresh.code, T10 + DAY_MS).await.unwrap();
    assert_eq!(engine.promo_code(&fresh.code).unwrap().attempts_left, 1);
}

// ── Durability & reconciliation ──────────────────────────

#[tokio::test]
async fn state_survives_restart() {
    let path = test_wal_path("restart.wal");
    let (kept, stopped, promo_id, code) = {
        let engine = open_engine(&path);
        let kept = engine
            .create_booking(reservation(&["1"], T10, T10 + H), EARLY)
            .await
            .unwrap();
        let walk = engine.create_booking(walkin(&["2"]), T10).await.unwrap();
        let stopped = engine.stop_booking(walk.id, T10 + 45 * M).await.unwrap();
        let p = engine.create_promo_booking(promo(30, 3), T10).await.unwrap();
        let code = p.promo_code.clone().unwrap();
        engine.check_in(&code, T10).await.unwrap();
        (kept, stopped, p.id, code)
    };

    let engine = open_engine(&path);
    assert_eq!(engine.get_booking(kept.id).await.unwrap(), kept);
    assert_eq!(engine.get_booking(stopped.id).await.unwrap(), stopped);
    assert_eq!(ledger_on(&engine, "2").await[0].end, T10 + 45 * M);
    assert_eq!(engine.promo_code(&code).unwrap().attempts_left, 2);
    assert_eq!(engine.attendance(promo_id).len(), 1);
    assert_eq!(engine.verify_ledger().await, 0);
    assert!(matches!(
        engine
            .create_booking(reservation(&["1"], T10, T10 + H), EARLY)
            .await,
        Err(EngineError::Conflict(_))
    ));
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compaction.wal");
    let survivor = {
        let engine = open_engine(&path);
        for i in 0..10 {
            let b = engine
                .create_booking(reservation(&["3"], T10 + i * H, T10 + i * H + 30 * M), EARLY)
                .await
                .unwrap();
            engine.cancel_booking(b.id, EARLY + M).await.unwrap();
        }
        let survivor = engine
            .create_booking(reservation(&["3"], T10, T10 + H), EARLY)
            .await
            .unwrap();
        assert!(engine.wal_appends_since_compact().await > 20);
        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        survivor
    };

    let engine = open_engine(&path);
    assert_eq!(engine.get_booking(survivor.id).await.unwrap(), survivor);
    assert_eq!(ledger_on(&engine, "3").await.len(), 1);
    assert_eq!(engine.list_bookings(EARLY, true).await.len(), 11);
}

#[tokio::test]
async fn drifted_booking_is_detected_and_repaired() {
    let engine = engine("reconcile_sync.wal");
    let b = engine
        .create_booking(reservation(&["4"], T10, T10 + H), EARLY)
        .await
        .unwrap();
    // Lose the ledger record behind the booking's back.
    assert!(engine.release("4", b.ledger[0].record_id).await.unwrap());

    assert_eq!(engine.verify_ledger().await, 1);
    assert_eq!(engine.pending_repairs(), vec![(b.id, Repair::Sync)]);

    // Still unavailable while the repair is queued.
    let check = engine
        .is_available(Area::Common, &seats(&["4"]), Span::new(T10, T10 + H), None)
        .await
        .unwrap();
    assert!(matches!(check, Availability::Conflict(ref r) if r.booking_id == Some(b.id)));

    let report = engine.reconcile_pending().await;
    assert_eq!(report, ReconcileReport { repaired: 1, failed: 0 });
    assert!(engine.pending_repairs().is_empty());
    let records = ledger_on(&engine, "4").await;
    assert_eq!(records[0].id, b.ledger[0].record_id);
    assert_eq!(records[0].end, T10 + H);
}

#[tokio::test]
async fn orphaned_records_are_released() {
    let engine = engine("reconcile_orphan.wal");
    engine
        .block(
            "5",
            BlockRecord {
                id: Ulid::new(),
                span: Span::new(T10, T10 + H),
                source: Source::Reserved,
                note: Note::Reservation,
                booking_id: Some(Ulid::new()),
            },
        )
        .await
        .unwrap();
    assert_eq!(engine.verify_ledger().await, 1);
    engine.reconcile_pending().await;
    assert!(ledger_on(&engine, "5").await.is_empty());
}

#[tokio::test]
async fn committed_changes_are_announced_with_revisions() {
    let engine = engine("announce.wal");
    let mut rx = engine.notify.subscribe(&resource_channel("2"));
    let b = engine
        .create_booking(reservation(&["2"], T10, T10 + H), EARLY)
        .await
        .unwrap();
    let change = rx.recv().await.unwrap();
    assert!(matches!(change.event, Event::Blocked { ref record, .. } if record.booking_id == Some(b.id)));
    // BookingCreated was revision 1.
    assert_eq!(change.revision, 2);
    assert_eq!(engine.revision(), 2);
}

#[tokio::test]
async fn countdowns_list_ongoing_closed_bookings() {
    let engine = engine("countdowns.wal");
    let closed = engine
        .create_booking(reservation(&["1"], T10, T10 + H), EARLY)
        .await
        .unwrap();
    engine.create_booking(walkin(&["2"]), T10).await.unwrap();
    engine
        .create_booking(reservation(&["3"], T10 + 2 * H, T10 + 3 * H), EARLY)
        .await
        .unwrap();

    let active = engine.countdowns(T10 + 10 * M).await;
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].booking_id, closed.id);
    assert_eq!(active[0].end, T10 + H);
    assert!(engine.countdowns(T10 + 2 * H - 1).await.is_empty());
}
