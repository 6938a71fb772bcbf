//! End-to-end session scenarios through the public API: live-bar range
//! construction, both breakout directions, break-even management, the
//! close-cutoff flatten, and restart behavior.

use std::io::Write;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};

use rangebreak::config::RobotConfig;
use rangebreak::events::EventLog;
use rangebreak::execution::{Direction, ExitReason, IntentStatus, SimAdapter, SimHandle};
use rangebreak::feed::CsvBarSource;
use rangebreak::journal::{self, Journal, JournalEntry};
use rangebreak::registry::InstanceRegistry;
use rangebreak::robot::{
    ExecutionPlan, PlanEntry, RobotEngine, StreamState, UnavailableBarSource,
};
use rangebreak::types::{Bar, CanonicalInstrument, SessionId};

fn utc(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
}

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
}

/// One NQ stream, slot 08:35 Chicago (14:35 UTC under CST), range from
/// 02:00 (08:00 UTC), cutoff 15:00 (21:00 UTC).
fn plan() -> ExecutionPlan {
    ExecutionPlan {
        trading_date: date(),
        streams: vec![PlanEntry {
            stream_id: "NQ/US_OPEN".to_string(),
            canonical_instrument: CanonicalInstrument("NQ".to_string()),
            session: SessionId("US_OPEN".to_string()),
            slot_time: NaiveTime::from_hms_opt(8, 35, 0).unwrap(),
            enabled: true,
            block_reason: None,
        }],
    }
}

struct Rig {
    engine: RobotEngine<SimAdapter>,
    handle: SimHandle,
    journal_path: std::path::PathBuf,
    _dir: tempfile::TempDir,
}

fn rig() -> Rig {
    let dir = tempfile::tempdir().unwrap();
    let journal_path = dir.path().join("journal.jsonl");
    let sim = SimAdapter::new(std::time::Duration::ZERO);
    let handle = sim.handle();
    let engine = RobotEngine::new(
        RobotConfig::default(),
        &plan(),
        sim,
        Arc::new(UnavailableBarSource),
        Journal::open(&journal_path).unwrap(),
        EventLog::tracing_only(),
        &InstanceRegistry::new(),
    )
    .unwrap();
    Rig { engine, handle, journal_path, _dir: dir }
}

/// Live bars only (hydration is unavailable): 08:00Z start, two range
/// bars giving high 4010 / low 4000, then lock at the slot.
async fn arm_via_live_bars(rig: &mut Rig) {
    let start = utc(8, 0);
    rig.engine.start(start).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    rig.engine.pump(start).await;

    let bars = [
        Bar::new(utc(9, 0), 4004.0, 4005.0, 4000.0, 4004.0),
        Bar::new(utc(10, 0), 4006.0, 4010.0, 4003.0, 4004.5),
    ];
    for bar in &bars {
        let now = bar.timestamp_open_utc + Duration::seconds(60);
        rig.engine.on_bar("MNQ", bar, now).await;
        rig.engine.pump(now).await;
    }
    assert_eq!(
        rig.engine.stream("NQ/US_OPEN").unwrap().state(),
        StreamState::RangeBuilding
    );

    // slot passes: range locks off live bars alone
    rig.handle.on_price(4006.0);
    rig.engine.on_tick("NQ", 4006.0, utc(14, 36)).await;
    rig.engine.pump(utc(14, 36)).await;
    assert_eq!(
        rig.engine.stream("NQ/US_OPEN").unwrap().state(),
        StreamState::Armed
    );
}

async fn tick(rig: &mut Rig, price: f64, now: DateTime<Utc>) {
    rig.handle.on_price(price);
    rig.engine.on_tick("NQ", price, now).await;
    rig.engine.pump(now).await;
    rig.engine.pump(now).await;
}

#[tokio::test(start_paused = true)]
async fn long_breakout_rides_to_breakeven_stop() {
    let mut rig = rig();
    arm_via_live_bars(&mut rig).await;

    let t1 = utc(14, 40);
    tick(&mut rig, 4010.30, t1).await;
    {
        let intent = rig.engine.stream("NQ/US_OPEN").unwrap().intent().unwrap();
        assert_eq!(intent.direction, Direction::Long);
        assert_eq!(intent.entry_price, 4010.25);
        assert_eq!(intent.stop_price, 3999.75);
    }

    // 65% of the 10-point target moves the stop one tick above entry
    tick(&mut rig, 4016.75, t1 + Duration::seconds(1)).await;
    {
        let intent = rig.engine.stream("NQ/US_OPEN").unwrap().intent().unwrap();
        assert_eq!(intent.stop_price, 4010.50);
        assert_eq!(intent.status, IntentStatus::StopAtBreakEven);
    }

    // retrace takes out the break-even stop for a scratch
    tick(&mut rig, 4010.40, t1 + Duration::seconds(2)).await;
    let stream = rig.engine.stream("NQ/US_OPEN").unwrap();
    assert_eq!(stream.state(), StreamState::Committed);
    assert_eq!(
        stream.intent().unwrap().status,
        IntentStatus::Closed(ExitReason::StopHit)
    );

    let entries = journal::replay(&rig.journal_path).unwrap();
    assert!(journal::open_intents(&entries).is_empty());
}

#[tokio::test(start_paused = true)]
async fn short_breakout_mirrors_the_long_side() {
    let mut rig = rig();
    arm_via_live_bars(&mut rig).await;

    let t1 = utc(14, 40);
    tick(&mut rig, 3999.70, t1).await;
    {
        let intent = rig.engine.stream("NQ/US_OPEN").unwrap().intent().unwrap();
        assert_eq!(intent.direction, Direction::Short);
        assert_eq!(intent.entry_price, 3999.75);
        // natural stop at the opposite breakout level, inside the cap
        assert_eq!(intent.stop_price, 4010.25);
    }

    tick(&mut rig, 3993.25, t1 + Duration::seconds(1)).await;
    let intent = rig.engine.stream("NQ/US_OPEN").unwrap().intent().unwrap();
    assert_eq!(intent.stop_price, 3999.50);
    assert_eq!(intent.status, IntentStatus::StopAtBreakEven);
}

#[tokio::test(start_paused = true)]
async fn close_cutoff_flattens_whatever_is_open() {
    let mut rig = rig();
    arm_via_live_bars(&mut rig).await;

    tick(&mut rig, 4010.30, utc(14, 40)).await;
    assert_eq!(
        rig.engine.stream("NQ/US_OPEN").unwrap().state(),
        StreamState::Managing
    );

    // 21:00 UTC = 15:00 Chicago
    tick(&mut rig, 4012.0, utc(21, 0)).await;
    let stream = rig.engine.stream("NQ/US_OPEN").unwrap();
    assert_eq!(stream.state(), StreamState::Committed);
    assert_eq!(
        stream.intent().unwrap().status,
        IntentStatus::Closed(ExitReason::Flattened)
    );

    let entries = journal::replay(&rig.journal_path).unwrap();
    assert!(journal::open_intents(&entries).is_empty());
}

#[tokio::test(start_paused = true)]
async fn breach_after_cutoff_never_trades() {
    let mut rig = rig();
    arm_via_live_bars(&mut rig).await;

    tick(&mut rig, 4006.0, utc(21, 0)).await;
    assert_eq!(
        rig.engine.stream("NQ/US_OPEN").unwrap().state(),
        StreamState::Committed
    );

    tick(&mut rig, 4010.50, utc(21, 1)).await;
    assert!(rig.engine.stream("NQ/US_OPEN").unwrap().intent().is_none());
}

#[tokio::test(start_paused = true)]
async fn restart_after_slot_rebuilds_the_range_from_hydration() {
    let dir = tempfile::tempdir().unwrap();
    let csv_path = dir.path().join("bars.csv");
    let mut f = std::fs::File::create(&csv_path).unwrap();
    writeln!(f, "symbol,ts_open,open,high,low,close").unwrap();
    writeln!(f, "MNQ,2026-03-02T09:00:00Z,4004,4005,4000,4004").unwrap();
    writeln!(f, "MNQ,2026-03-02T10:00:00Z,4006,4010,4003,4004.5").unwrap();

    let sim = SimAdapter::new(std::time::Duration::ZERO);
    let handle = sim.handle();
    let mut engine = RobotEngine::new(
        RobotConfig::default(),
        &plan(),
        sim,
        Arc::new(CsvBarSource::from_path(&csv_path).unwrap()),
        Journal::open(&dir.path().join("journal.jsonl")).unwrap(),
        EventLog::tracing_only(),
        &InstanceRegistry::new(),
    )
    .unwrap();

    // process comes up mid-session, past the slot
    let now = utc(14, 45);
    engine.start(now).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    engine.pump(now).await;

    let stream = engine.stream("NQ/US_OPEN").unwrap();
    assert_eq!(stream.state(), StreamState::Armed);
    let levels = stream.levels().unwrap();
    assert_eq!(levels.brk_long, 4010.25);
    assert_eq!(levels.brk_short, 3999.75);

    // and the armed stream still trades normally
    handle.on_price(4010.30);
    engine.on_tick("MNQ", 4010.30, utc(14, 46)).await;
    engine.pump(utc(14, 46)).await;
    assert_eq!(
        engine.stream("NQ/US_OPEN").unwrap().state(),
        StreamState::Managing
    );
}

#[tokio::test(start_paused = true)]
async fn journal_with_open_intent_blocks_the_stream_on_restart() {
    let dir = tempfile::tempdir().unwrap();
    let journal_path = dir.path().join("journal.jsonl");
    {
        let mut j = Journal::open(&journal_path).unwrap();
        j.append(&JournalEntry {
            intent_id: uuid::Uuid::new_v4(),
            stream_id: "NQ/US_OPEN".to_string(),
            timestamp_utc: utc(13, 0),
            status: IntentStatus::StopWorking,
            direction: Direction::Long,
            entry_price: 4010.25,
            stop_price: 3999.75,
            fill_price: Some(4010.50),
            exit_price: None,
        })
        .unwrap();
    }
    let recovered = journal::replay(&journal_path).unwrap();

    let sim = SimAdapter::new(std::time::Duration::ZERO);
    let mut engine = RobotEngine::new(
        RobotConfig::default(),
        &plan(),
        sim,
        Arc::new(UnavailableBarSource),
        Journal::open(&journal_path).unwrap(),
        EventLog::tracing_only(),
        &InstanceRegistry::new(),
    )
    .unwrap();

    engine.apply_recovered(&recovered, utc(14, 0)).await;
    let stream = engine.stream("NQ/US_OPEN").unwrap();
    assert_eq!(stream.state(), StreamState::StandDown);
    assert_eq!(stream.stand_down_reason().unwrap().code(), "CONTRACT_VIOLATION");
}

#[test]
fn plan_for_the_wrong_date_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plan.json");
    std::fs::write(&path, serde_json::to_vec(&plan()).unwrap()).unwrap();

    let wrong_date = NaiveDate::from_ymd_opt(2026, 3, 3).unwrap();
    assert!(ExecutionPlan::load(&path, wrong_date, &RobotConfig::default()).is_err());
    assert!(ExecutionPlan::load(&path, date(), &RobotConfig::default()).is_ok());
}
