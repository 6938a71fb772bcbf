//! Robot engine
//!
//! Owns the adapter, the streams, and every ambient service. All
//! stream callbacks run on this single task, so each stream sees a
//! serialized view of bars, ticks, order callbacks and hydration
//! outcomes. The driver loop feeds market data in and calls `pump`
//! to drain the async channels between feed events.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde_json::json;
use tracing::{error, info, warn};

use super::hydration::{BarSource, HydrationOutcome, HydrationPool, HydrationState};
use super::plan::ExecutionPlan;
use super::stream::{Stream, StreamEffect, StreamOrderEvent, StreamParams};
use crate::config::RobotConfig;
use crate::events::{EventLog, EventRecord, EventType};
use crate::execution::{AdapterEvent, ExecutionAdapter};
use crate::journal::{Journal, JournalEntry};
use crate::rate_limit::RateLimiter;
use crate::registry::{InstanceClaim, InstanceRegistry};
use crate::time_service;
use crate::types::{Bar, ExecutionInstrument, TradingSession};

/// What a venue tag was attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OrderRole {
    Entry,
    Stop,
    Flatten,
}

pub struct RobotEngine<A: ExecutionAdapter> {
    config: RobotConfig,
    trading_date: NaiveDate,
    adapter: A,
    adapter_rx: tokio::sync::mpsc::Receiver<AdapterEvent>,
    streams: HashMap<String, Stream>,
    /// canonical and execution symbols both route here
    routes: HashMap<String, Vec<String>>,
    tags: HashMap<String, (String, OrderRole)>,
    stop_refs: HashMap<String, String>,
    hydration: HydrationPool,
    hydration_rx: tokio::sync::mpsc::Receiver<HydrationOutcome>,
    hydration_states: HashMap<String, HydrationState>,
    journal: Journal,
    event_log: EventLog,
    limiter: RateLimiter,
    last_bar_open: HashMap<String, DateTime<Utc>>,
    _claims: Vec<InstanceClaim>,
}

impl<A: ExecutionAdapter> RobotEngine<A> {
    pub fn new(
        config: RobotConfig,
        plan: &ExecutionPlan,
        mut adapter: A,
        bar_source: Arc<dyn BarSource>,
        journal: Journal,
        event_log: EventLog,
        registry: &InstanceRegistry,
    ) -> Result<Self> {
        config.validate()?;
        plan.validate(plan.trading_date, &config)?;

        let adapter_rx = adapter
            .take_event_receiver()
            .context("adapter event receiver already taken")?;

        let (hydration, hydration_rx) = HydrationPool::new(
            bar_source,
            config.hydration_workers,
            std::time::Duration::from_secs(config.hydration_timeout_secs.max(1) as u64),
        );

        let mut streams = HashMap::new();
        let mut routes: HashMap<String, Vec<String>> = HashMap::new();
        let mut claims = Vec::new();
        let mut claimed: Vec<ExecutionInstrument> = Vec::new();

        for entry in plan.enabled_streams() {
            let spec = config
                .instrument(&entry.canonical_instrument)
                .with_context(|| format!("unknown instrument {}", entry.canonical_instrument))?;
            let session = config
                .session(&entry.session)
                .with_context(|| format!("unknown session {}", entry.session))?;
            let tz = spec.timezone()?;
            let bounds =
                time_service::session_bounds(tz, plan.trading_date, session, entry.slot_time)?;

            if !claimed.contains(&spec.execution) {
                claims.push(registry.claim(&config.account, &spec.execution)?);
                claimed.push(spec.execution.clone());
            }

            let params = StreamParams {
                stream_id: entry.stream_id.clone(),
                session: TradingSession {
                    trading_date: plan.trading_date,
                    session: entry.session.clone(),
                    canonical_instrument: spec.canonical.clone(),
                    execution_instrument: spec.execution.clone(),
                },
                bounds,
                tick_size: spec.tick_size,
                quantity: spec.quantity,
                point_value: spec.point_value,
                target_points: spec.target_points,
                breakeven_trigger_ratio: config.breakeven_trigger_ratio,
                stop_cap_multiple: config.stop_cap_multiple,
                scan_interval: Duration::milliseconds(config.breakeven_scan_interval_ms),
                retry_interval: Duration::milliseconds(config.stop_modify_retry_ms),
                ack_timeout: Duration::seconds(config.trigger_ack_timeout_secs),
            };

            let stream = Stream::new(
                params,
                tz,
                Duration::seconds(config.bar_width_secs),
            );
            routes
                .entry(spec.canonical.0.clone())
                .or_default()
                .push(entry.stream_id.clone());
            routes
                .entry(spec.execution.0.clone())
                .or_default()
                .push(entry.stream_id.clone());
            streams.insert(entry.stream_id.clone(), stream);
        }

        if streams.is_empty() {
            bail!("execution plan enables no streams for {}", plan.trading_date);
        }

        let hydration_states = streams
            .keys()
            .map(|id| (id.clone(), HydrationState::Idle))
            .collect();

        Ok(Self {
            config,
            trading_date: plan.trading_date,
            adapter,
            adapter_rx,
            streams,
            routes,
            tags: HashMap::new(),
            stop_refs: HashMap::new(),
            hydration,
            hydration_rx,
            hydration_states,
            journal,
            event_log,
            limiter: RateLimiter::new(Duration::seconds(60)),
            last_bar_open: HashMap::new(),
            _claims: claims,
        })
    }

    pub fn stream(&self, stream_id: &str) -> Option<&Stream> {
        self.streams.get(stream_id)
    }

    pub fn all_terminal(&self) -> bool {
        self.streams.values().all(|s| s.is_terminal())
    }

    /// Connect and kick off hydration for every stream.
    pub async fn start(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.adapter
            .connect()
            .await
            .map_err(|e| anyhow::anyhow!("adapter connect: {}", e))?;

        let caps = self.adapter.capabilities();
        info!(
            "engine up for {} with {} stream(s), adapter v{}",
            self.trading_date,
            self.streams.len(),
            caps.version
        );
        self.event_log.emit(
            EventRecord::new(EventType::EngineStarted, now).payload(json!({
                "trading_date": self.trading_date,
                "streams": self.streams.len(),
                "adapter_version": caps.version,
                "stop_diagnostics": caps.supports_stop_diagnostics,
            })),
        );

        let ids: Vec<String> = self.streams.keys().cloned().collect();
        for id in ids {
            self.request_hydration(&id, now).await;
        }
        Ok(())
    }

    /// Hydrate [range_start, min(now, slot)). A window that has not
    /// opened yet completes empty immediately; live bars will build
    /// the range.
    async fn request_hydration(&mut self, stream_id: &str, now: DateTime<Utc>) {
        if self.hydration_states.get(stream_id) == Some(&HydrationState::Pending) {
            return;
        }
        let Some(stream) = self.streams.get_mut(stream_id) else { return };
        if !stream.needs_hydration() {
            return;
        }
        let bounds = *stream.bounds();
        let to = now.min(bounds.slot_utc);

        if to <= bounds.range_start_utc {
            let effects = stream.hydration_completed(Some(Vec::new()), now);
            self.hydration_states
                .insert(stream_id.to_string(), HydrationState::Completed);
            self.apply_effects(stream_id.to_string(), effects, now).await;
            return;
        }

        let execution = stream.session().execution_instrument.clone();
        self.hydration_states
            .insert(stream_id.to_string(), HydrationState::Pending);
        self.event_log.emit(self.stream_record(
            stream_id,
            EventType::HydrationRequested,
            json!({ "from": bounds.range_start_utc, "to": to }),
            now,
        ));
        self.hydration
            .request(stream_id, &execution, bounds.range_start_utc, to);
    }

    /// Journal entries recovered from a previous run. Streams with an
    /// intent still open cannot safely resume and stand down.
    pub async fn apply_recovered(
        &mut self,
        entries: &[JournalEntry],
        now: DateTime<Utc>,
    ) {
        let open = crate::journal::open_intents(entries);
        for entry in open {
            let stream_id = entry.stream_id.clone();
            let Some(stream) = self.streams.get_mut(&stream_id) else {
                warn!(
                    "journal holds open intent {} for unplanned stream {}",
                    entry.intent_id, stream_id
                );
                continue;
            };
            warn!(
                "stream {} has unresolved intent {} from a previous run",
                stream_id, entry.intent_id
            );
            let effects = stream.refuse("unresolved open intent from previous run");
            self.apply_effects(stream_id, effects, now).await;
        }
    }

    /// Route a bar by canonical or execution symbol. A bar that breaks
    /// the feed contract refuses every stream it routes to.
    pub async fn on_bar(&mut self, symbol: &str, bar: &Bar, now: DateTime<Utc>) {
        let Some(ids) = self.routes.get(symbol).cloned() else {
            if self.limiter.allow("unrouted_symbol", symbol, now) {
                warn!("bar for unrouted symbol {}", symbol);
            }
            return;
        };

        if let Some(violation) = self.bar_contract_violation(symbol, bar) {
            error!("feed contract broken for {}: {}", symbol, violation);
            self.event_log.emit(
                EventRecord::new(EventType::ContractViolation, now).payload(json!({
                    "symbol": symbol,
                    "violation": violation,
                })),
            );
            for id in ids {
                let Some(stream) = self.streams.get_mut(&id) else { continue };
                if !stream.is_terminal() {
                    let effects = stream.refuse(&violation);
                    self.apply_effects(id, effects, now).await;
                }
            }
            return;
        }

        for id in ids {
            let Some(stream) = self.streams.get_mut(&id) else { continue };
            let effects = stream.on_bar(bar, now);
            self.apply_effects(id, effects, now).await;
        }
    }

    pub async fn on_tick(&mut self, symbol: &str, price: f64, now: DateTime<Utc>) {
        let Some(ids) = self.routes.get(symbol).cloned() else { return };
        for id in ids {
            let Some(stream) = self.streams.get_mut(&id) else { continue };
            let effects = stream.on_tick(price, now);
            self.apply_effects(id, effects, now).await;
        }
    }

    /// Drain adapter callbacks and hydration outcomes without blocking.
    pub async fn pump(&mut self, now: DateTime<Utc>) {
        while let Ok(event) = self.adapter_rx.try_recv() {
            self.handle_adapter_event(event, now).await;
        }
        while let Ok(outcome) = self.hydration_rx.try_recv() {
            self.handle_hydration_outcome(outcome, now).await;
        }
    }

    pub async fn shutdown(&mut self, now: DateTime<Utc>) {
        if let Err(e) = self.adapter.disconnect().await {
            warn!("adapter disconnect failed: {}", e);
        }
        self.event_log.emit(
            EventRecord::new(EventType::EngineShutdown, now).payload(json!({
                "terminal_streams": self
                    .streams
                    .values()
                    .filter(|s| s.is_terminal())
                    .count(),
            })),
        );
        self._claims.clear();
    }

    /// Feed contract: fixed bar width, and bars stamped on the engine's
    /// trading date. The engine is built per date; the scheduler
    /// restarts it daily.
    fn bar_contract_violation(&mut self, symbol: &str, bar: &Bar) -> Option<String> {
        if bar.timestamp_open_utc.date_naive() != self.trading_date {
            return Some(format!(
                "bar dated {} on a {} engine",
                bar.timestamp_open_utc.date_naive(),
                self.trading_date
            ));
        }

        let width = Duration::seconds(self.config.bar_width_secs);
        let prev = self.last_bar_open.get(symbol).copied();
        let entry = self
            .last_bar_open
            .entry(symbol.to_string())
            .or_insert(bar.timestamp_open_utc);
        if bar.timestamp_open_utc > *entry {
            *entry = bar.timestamp_open_utc;
        }

        if let Some(prev) = prev {
            let gap = bar.timestamp_open_utc - prev;
            if gap > Duration::zero() && gap < width {
                return Some(format!(
                    "{}s bar gap against a {}s width",
                    gap.num_seconds(),
                    width.num_seconds()
                ));
            }
        }
        None
    }

    async fn handle_adapter_event(&mut self, event: AdapterEvent, now: DateTime<Utc>) {
        let routed: Option<(String, StreamOrderEvent)> = match event {
            AdapterEvent::OrderAccepted { tag, order_ref } => {
                match self.tags.get(&tag).cloned() {
                    Some((id, OrderRole::Entry)) => {
                        Some((id, StreamOrderEvent::EntryAccepted { order_ref }))
                    }
                    Some((id, OrderRole::Stop)) => {
                        self.stop_refs.insert(order_ref.0.clone(), id.clone());
                        Some((id, StreamOrderEvent::StopAccepted { order_ref }))
                    }
                    Some((_, OrderRole::Flatten)) => None,
                    None => {
                        warn!("accept for unknown tag {}", tag);
                        None
                    }
                }
            }
            AdapterEvent::OrderRejected { tag, reason } => match self.tags.get(&tag).cloned() {
                Some((id, OrderRole::Entry)) => {
                    Some((id, StreamOrderEvent::EntryRejected { reason }))
                }
                Some((id, OrderRole::Stop)) => {
                    Some((id, StreamOrderEvent::StopRejected { reason }))
                }
                Some((id, OrderRole::Flatten)) => {
                    error!("flatten rejected for {}: {}", id, reason);
                    self.event_log.emit(self.stream_record(
                        &id,
                        EventType::AdapterError,
                        json!({ "flatten_rejected": reason }),
                        now,
                    ));
                    None
                }
                None => {
                    warn!("reject for unknown tag {}", tag);
                    None
                }
            },
            AdapterEvent::Fill { tag, price, .. } => match self.tags.get(&tag).cloned() {
                Some((id, OrderRole::Entry)) => {
                    Some((id, StreamOrderEvent::EntryFilled { price }))
                }
                Some((id, OrderRole::Stop)) => {
                    Some((id, StreamOrderEvent::StopFilled { price }))
                }
                Some((id, OrderRole::Flatten)) => {
                    Some((id, StreamOrderEvent::FlattenFilled { price }))
                }
                None => {
                    warn!("fill for unknown tag {}", tag);
                    None
                }
            },
            AdapterEvent::StopModifyAck { order_ref, price } => self
                .stop_refs
                .get(&order_ref.0)
                .cloned()
                .map(|id| (id, StreamOrderEvent::StopModifyAcked { price })),
            AdapterEvent::Disconnected { reason } => {
                warn!("adapter disconnected: {}", reason);
                self.event_log.emit(
                    EventRecord::new(EventType::AdapterError, now)
                        .payload(json!({ "disconnected": reason })),
                );
                None
            }
        };

        if let Some((id, order_event)) = routed {
            let Some(stream) = self.streams.get_mut(&id) else { return };
            let effects = stream.on_order_event(order_event, now);
            self.apply_effects(id, effects, now).await;
        }
    }

    async fn handle_hydration_outcome(
        &mut self,
        outcome: HydrationOutcome,
        now: DateTime<Utc>,
    ) {
        let id = outcome.stream_id;
        let bars = match outcome.result {
            Ok(bars) => {
                self.hydration_states
                    .insert(id.clone(), HydrationState::Completed);
                Some(bars)
            }
            Err(reason) => {
                warn!("hydration failed for {}: {}", id, reason);
                self.hydration_states
                    .insert(id.clone(), HydrationState::Failed);
                None
            }
        };
        let Some(stream) = self.streams.get_mut(&id) else { return };
        let effects = stream.hydration_completed(bars, now);
        self.apply_effects(id, effects, now).await;
    }

    /// Execute effects in order. Submit failures are fed back to the
    /// stream as rejections; every follow-up effect joins the queue so
    /// nothing recurses.
    async fn apply_effects(
        &mut self,
        stream_id: String,
        effects: Vec<StreamEffect>,
        now: DateTime<Utc>,
    ) {
        let mut queue: VecDeque<(String, StreamEffect)> = effects
            .into_iter()
            .map(|e| (stream_id.clone(), e))
            .collect();

        while let Some((id, effect)) = queue.pop_front() {
            match effect {
                StreamEffect::Journal(entry) => {
                    if let Err(e) = self.journal.append(&entry) {
                        error!("journal append failed for {}: {:#}", id, e);
                        self.event_log.emit(self.stream_record(
                            &id,
                            EventType::InvariantViolation,
                            json!({ "journal_append_failed": e.to_string() }),
                            now,
                        ));
                    }
                }
                StreamEffect::Event { event_type, payload } => {
                    let category = match event_type {
                        EventType::BarAgeAnomaly => Some("bar_age"),
                        EventType::ContractViolation => Some("contract"),
                        _ => None,
                    };
                    if let Some(category) = category {
                        if !self.limiter.allow(category, &id, now) {
                            continue;
                        }
                    }
                    self.event_log
                        .emit(self.stream_record(&id, event_type, payload, now));
                }
                StreamEffect::SubmitEntry { direction, quantity, tag, .. } => {
                    self.tags.insert(tag.clone(), (id.clone(), OrderRole::Entry));
                    let execution = self.execution_of(&id);
                    if let Err(e) = self
                        .adapter
                        .submit_entry(&execution, direction, quantity, &tag)
                        .await
                    {
                        error!("entry submit failed for {}: {}", id, e);
                        self.feed_back(
                            &id,
                            StreamOrderEvent::EntryRejected { reason: e.to_string() },
                            now,
                            &mut queue,
                        );
                    }
                }
                StreamEffect::SubmitStop {
                    closing_side,
                    quantity,
                    stop_price,
                    tag,
                    ..
                } => {
                    self.tags.insert(tag.clone(), (id.clone(), OrderRole::Stop));
                    let execution = self.execution_of(&id);
                    if let Err(e) = self
                        .adapter
                        .submit_protective_stop(
                            &execution,
                            closing_side,
                            quantity,
                            stop_price,
                            &tag,
                        )
                        .await
                    {
                        error!("stop submit failed for {}: {}", id, e);
                        self.feed_back(
                            &id,
                            StreamOrderEvent::StopRejected { reason: e.to_string() },
                            now,
                            &mut queue,
                        );
                    }
                }
                StreamEffect::ModifyStop { order_ref, new_price } => {
                    match self.adapter.modify_stop(&order_ref, new_price).await {
                        Ok(()) => {}
                        Err(e) if e.is_retryable() => {
                            self.event_log.emit(self.stream_record(
                                &id,
                                EventType::StopRetry,
                                json!({ "error": e.to_string(), "price": new_price }),
                                now,
                            ));
                        }
                        Err(e) => {
                            error!("stop modify failed for {}: {}", id, e);
                            self.event_log.emit(self.stream_record(
                                &id,
                                EventType::AdapterError,
                                json!({ "modify_failed": e.to_string() }),
                                now,
                            ));
                        }
                    }
                }
                StreamEffect::CancelOrder { order_ref } => {
                    if let Err(e) = self.adapter.cancel(&order_ref).await {
                        warn!("cancel {} failed for {}: {}", order_ref, id, e);
                    }
                }
                StreamEffect::FlattenPosition { closing_side, quantity, tag } => {
                    self.tags
                        .insert(tag.clone(), (id.clone(), OrderRole::Flatten));
                    let execution = self.execution_of(&id);
                    if let Err(e) = self
                        .adapter
                        .submit_entry(&execution, closing_side, quantity, &tag)
                        .await
                    {
                        // nothing automated left to try
                        error!("FLATTEN FAILED for {}: {}", id, e);
                        self.event_log.emit(self.stream_record(
                            &id,
                            EventType::AdapterError,
                            json!({ "flatten_failed": e.to_string() }),
                            now,
                        ));
                    }
                }
                StreamEffect::RequestLateHydration => {
                    self.request_late_hydration(&id, now);
                }
            }
        }
    }

    fn feed_back(
        &mut self,
        stream_id: &str,
        event: StreamOrderEvent,
        now: DateTime<Utc>,
        queue: &mut VecDeque<(String, StreamEffect)>,
    ) {
        let Some(stream) = self.streams.get_mut(stream_id) else { return };
        for effect in stream.on_order_event(event, now) {
            queue.push_back((stream_id.to_string(), effect));
        }
    }

    fn request_late_hydration(&mut self, stream_id: &str, now: DateTime<Utc>) {
        if self.hydration_states.get(stream_id) == Some(&HydrationState::Pending) {
            return;
        }
        let Some(stream) = self.streams.get(stream_id) else { return };
        let bounds = *stream.bounds();
        let execution = stream.session().execution_instrument.clone();
        self.hydration_states
            .insert(stream_id.to_string(), HydrationState::Pending);
        self.event_log.emit(self.stream_record(
            stream_id,
            EventType::HydrationRequested,
            json!({ "late": true, "from": bounds.range_start_utc, "to": bounds.slot_utc }),
            now,
        ));
        self.hydration
            .request(stream_id, &execution, bounds.range_start_utc, bounds.slot_utc);
    }

    fn execution_of(&self, stream_id: &str) -> ExecutionInstrument {
        self.streams
            .get(stream_id)
            .map(|s| s.session().execution_instrument.clone())
            .unwrap_or_else(|| ExecutionInstrument(String::new()))
    }

    fn stream_record(
        &self,
        stream_id: &str,
        event_type: EventType,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> EventRecord {
        let record = EventRecord::new(event_type, now);
        match self.streams.get(stream_id) {
            Some(stream) => {
                let session = stream.session();
                record
                    .stream(
                        stream_id,
                        &session.canonical_instrument,
                        &session.execution_instrument,
                    )
                    .payload(payload)
            }
            None => record.payload(payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RobotConfig;
    use crate::execution::{IntentStatus, SimAdapter, StopKind};
    use crate::journal;
    use crate::robot::hydration::BarSource;
    use crate::robot::plan::PlanEntry;
    use crate::robot::stream::StreamState;
    use crate::types::{CanonicalInstrument, SessionId};
    use async_trait::async_trait;
    use chrono::{NaiveTime, TimeZone};

    struct CannedBars(Vec<Bar>);

    #[async_trait]
    impl BarSource for CannedBars {
        async fn fetch(
            &self,
            _instrument: &ExecutionInstrument,
            from: DateTime<Utc>,
            to: DateTime<Utc>,
        ) -> Result<Vec<Bar>> {
            Ok(self
                .0
                .iter()
                .filter(|b| b.timestamp_open_utc >= from && b.timestamp_open_utc < to)
                .copied()
                .collect())
        }
    }

    fn utc(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
    }

    fn plan() -> ExecutionPlan {
        ExecutionPlan {
            trading_date: chrono::NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            streams: vec![PlanEntry {
                stream_id: "NQ/US_OPEN".to_string(),
                canonical_instrument: CanonicalInstrument("NQ".to_string()),
                session: SessionId("US_OPEN".to_string()),
                // 08:35 Chicago = 14:35 UTC in March (CST)
                slot_time: NaiveTime::from_hms_opt(8, 35, 0).unwrap(),
                enabled: true,
                block_reason: None,
            }],
        }
    }

    /// Range bars inside 08:00..14:35 UTC: high 4010, low 4000.
    fn range_bars() -> Vec<Bar> {
        vec![
            Bar::new(utc(9, 0), 4004.0, 4005.0, 4000.0, 4004.0),
            Bar::new(utc(10, 0), 4006.0, 4010.0, 4003.0, 4004.5),
        ]
    }

    async fn engine_with(
        bars: Vec<Bar>,
        journal_path: &std::path::Path,
    ) -> (RobotEngine<SimAdapter>, crate::execution::SimHandle) {
        let sim = SimAdapter::new(std::time::Duration::ZERO);
        let handle = sim.handle();
        let engine = RobotEngine::new(
            RobotConfig::default(),
            &plan(),
            sim,
            Arc::new(CannedBars(bars)),
            Journal::open(journal_path).unwrap(),
            EventLog::tracing_only(),
            &InstanceRegistry::new(),
        )
        .unwrap();
        (engine, handle)
    }

    async fn hydrate(engine: &mut RobotEngine<SimAdapter>, now: DateTime<Utc>) {
        engine.start(now).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        engine.pump(now).await;
    }

    #[tokio::test(start_paused = true)]
    async fn inflight_hydration_is_never_requested_twice() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _handle) =
            engine_with(range_bars(), &dir.path().join("journal.jsonl")).await;

        let t0 = utc(14, 36);
        engine.start(t0).await.unwrap();
        assert_eq!(
            engine.hydration_states.get("NQ/US_OPEN"),
            Some(&HydrationState::Pending)
        );

        // a second request while the first is in flight is a no-op
        engine.request_hydration("NQ/US_OPEN", t0).await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(engine.hydration_rx.try_recv().is_ok());
        assert!(engine.hydration_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn full_breakout_to_breakeven_stop_out() {
        let dir = tempfile::tempdir().unwrap();
        let journal_path = dir.path().join("journal.jsonl");
        let (mut engine, handle) = engine_with(range_bars(), &journal_path).await;

        // restart-style start after the slot: hydration rebuilds the range
        let t0 = utc(14, 36);
        hydrate(&mut engine, t0).await;
        assert_eq!(
            engine.stream("NQ/US_OPEN").unwrap().state(),
            StreamState::Armed
        );

        // inside the range: nothing happens
        handle.on_price(4008.0);
        engine.on_tick("NQ", 4008.0, t0).await;
        engine.pump(t0).await;
        assert_eq!(
            engine.stream("NQ/US_OPEN").unwrap().state(),
            StreamState::Armed
        );

        // breach above 4010.25: entry fills, protective stop goes in
        let t1 = t0 + Duration::seconds(1);
        handle.on_price(4010.30);
        engine.on_tick("MNQ", 4010.30, t1).await;
        engine.pump(t1).await;
        engine.pump(t1).await;
        let intent = engine.stream("NQ/US_OPEN").unwrap().intent().unwrap().clone();
        assert_eq!(intent.entry_price, 4010.25);
        assert_eq!(intent.stop_price, 3999.75);
        assert_eq!(intent.status, IntentStatus::StopWorking);
        assert_eq!(
            engine.stream("NQ/US_OPEN").unwrap().state(),
            StreamState::Managing
        );

        // 6.5 points of favorable excursion moves the stop to break-even
        let t2 = t1 + Duration::seconds(1);
        handle.on_price(4016.75);
        engine.on_tick("NQ", 4016.75, t2).await;
        engine.pump(t2).await;
        let intent = engine.stream("NQ/US_OPEN").unwrap().intent().unwrap().clone();
        assert_eq!(intent.stop_price, 4010.50);
        assert_eq!(intent.stop_kind, StopKind::BreakEven);
        assert_eq!(intent.status, IntentStatus::StopAtBreakEven);

        // price falls back through the break-even stop
        let t3 = t2 + Duration::seconds(1);
        handle.on_price(4010.50);
        engine.on_tick("NQ", 4010.50, t3).await;
        engine.pump(t3).await;
        let stream = engine.stream("NQ/US_OPEN").unwrap();
        assert_eq!(stream.state(), StreamState::Committed);
        assert_eq!(
            stream.intent().unwrap().status,
            IntentStatus::Closed(crate::execution::ExitReason::StopHit)
        );

        engine.shutdown(t3).await;

        // journal replays cleanly with no intent left open
        let entries = journal::replay(&journal_path).unwrap();
        assert!(!entries.is_empty());
        assert!(journal::open_intents(&entries).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_hydration_stands_stream_down() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _handle) =
            engine_with(Vec::new(), &dir.path().join("journal.jsonl")).await;

        let t0 = utc(14, 36);
        hydrate(&mut engine, t0).await;
        // first completion is empty, one late attempt goes out
        engine.on_tick("NQ", 4005.0, t0).await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        engine.pump(t0).await;

        let stream = engine.stream("NQ/US_OPEN").unwrap();
        assert_eq!(stream.state(), StreamState::StandDown);
        assert_eq!(
            stream.stand_down_reason().unwrap().code(),
            "NO_TRADE_RANGE_DATA_MISSING"
        );
        assert!(engine.all_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn narrow_bar_gap_refuses_the_stream() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _handle) =
            engine_with(Vec::new(), &dir.path().join("journal.jsonl")).await;

        let t0 = utc(8, 0);
        hydrate(&mut engine, t0).await;

        let first = Bar::new(utc(9, 0), 4004.0, 4005.0, 4000.0, 4004.0);
        engine.on_bar("MNQ", &first, utc(9, 1)).await;
        assert_eq!(
            engine.stream("NQ/US_OPEN").unwrap().state(),
            StreamState::RangeBuilding
        );

        // 30s after a 60s-width bar: the feed is not honoring its width
        let narrow = Bar::new(
            utc(9, 0) + Duration::seconds(30),
            4004.0,
            4006.0,
            4003.0,
            4005.0,
        );
        engine.on_bar("MNQ", &narrow, utc(9, 1)).await;

        let stream = engine.stream("NQ/US_OPEN").unwrap();
        assert_eq!(stream.state(), StreamState::StandDown);
        assert_eq!(
            stream.stand_down_reason().unwrap().code(),
            "CONTRACT_VIOLATION"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn off_date_bar_refuses_the_stream() {
        let dir = tempfile::tempdir().unwrap();
        let (mut engine, _handle) =
            engine_with(Vec::new(), &dir.path().join("journal.jsonl")).await;

        // at the range open, hydration completes empty and the stream
        // waits on live bars
        let t0 = utc(8, 0);
        hydrate(&mut engine, t0).await;
        assert_eq!(
            engine.stream("NQ/US_OPEN").unwrap().state(),
            StreamState::RangeBuilding
        );

        let stale = Bar::new(
            Utc.with_ymd_and_hms(2026, 3, 3, 9, 0, 0).unwrap(),
            4004.0,
            4005.0,
            4000.0,
            4004.0,
        );
        engine.on_bar("MNQ", &stale, utc(9, 1)).await;

        let stream = engine.stream("NQ/US_OPEN").unwrap();
        assert_eq!(stream.state(), StreamState::StandDown);
        assert_eq!(
            stream.stand_down_reason().unwrap().code(),
            "CONTRACT_VIOLATION"
        );
    }

    #[tokio::test]
    async fn duplicate_account_instrument_is_refused() {
        let registry = InstanceRegistry::new();
        let dir = tempfile::tempdir().unwrap();

        let first = RobotEngine::new(
            RobotConfig::default(),
            &plan(),
            SimAdapter::new(std::time::Duration::ZERO),
            Arc::new(CannedBars(Vec::new())),
            Journal::open(&dir.path().join("a.jsonl")).unwrap(),
            EventLog::tracing_only(),
            &registry,
        );
        assert!(first.is_ok());

        let second = RobotEngine::new(
            RobotConfig::default(),
            &plan(),
            SimAdapter::new(std::time::Duration::ZERO),
            Arc::new(CannedBars(Vec::new())),
            Journal::open(&dir.path().join("b.jsonl")).unwrap(),
            EventLog::tracing_only(),
            &registry,
        );
        assert!(second.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn recovered_open_intent_stands_stream_down() {
        let dir = tempfile::tempdir().unwrap();
        let journal_path = dir.path().join("journal.jsonl");

        let stale = JournalEntry {
            intent_id: uuid::Uuid::new_v4(),
            stream_id: "NQ/US_OPEN".to_string(),
            timestamp_utc: utc(13, 0),
            status: IntentStatus::StopWorking,
            direction: crate::execution::Direction::Long,
            entry_price: 4010.25,
            stop_price: 3999.75,
            fill_price: Some(4010.30),
            exit_price: None,
        };
        {
            let mut j = Journal::open(&journal_path).unwrap();
            j.append(&stale).unwrap();
        }

        let recovered = journal::replay(&journal_path).unwrap();
        let (mut engine, _handle) = engine_with(range_bars(), &journal_path).await;
        engine.apply_recovered(&recovered, utc(14, 0)).await;

        let stream = engine.stream("NQ/US_OPEN").unwrap();
        assert_eq!(stream.state(), StreamState::StandDown);
    }
}
