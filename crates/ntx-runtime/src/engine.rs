//! Execution Engine: the top-level coordinator that owns every background
//! task for one (account, user, strategy) run — tick ingestion, bar close,
//! the per-user queue drain, the outbox-first broker dispatch, the two
//! reconcile cadences, and the mark-to-market tick.
//!
//! Tier A constrains a [`ntx_strategy::StrategyHost`] to exactly one
//! strategy, so one [`ExecutionEngine`] is scoped to exactly one
//! (user, strategy) pair trading a fixed symbol universe on a single
//! timeframe. Running several strategies side by side means running
//! several engines, each with its own `run_id`.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::PgPool;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use uuid::Uuid;

use ntx_conflict::{ConflictConfig, ConflictState};
use ntx_execution::{BrokerAdapter, OrderIntent, PositionBook, Side};
use ntx_integrity::{ArmState, CalendarSpec};
use ntx_md::aggregator::{Bar, BarAggregator, Tick, Timeframe};
use ntx_portfolio::{MarkMap, PortfolioSnapshot};
use ntx_queue::{PerUserOrderQueue, QueueConfig, QueueItem};
use ntx_reconcile::BrokerSnapshot;
use ntx_strategy::{BarStub, RecentBarsWindow, StrategyContext, StrategyHost};

use crate::config::EngineConfig;
use crate::executor::OrderExecutor;
use crate::gates::{new_reconcile_gate, IntegrityGateImpl, RiskGateImpl, RiskRuntimeState};
use crate::mtm::MtmEngine;
use crate::pipeline::{BarPipeline, PipelineOutcome};
use crate::reconciler::{Reconciler, RetryTickOutcome, ScanOutcome};

/// Bounded recent-bars window handed to the strategy each call.
const STRATEGY_WINDOW_CAP: usize = 200;

fn parse_side(s: &str) -> Side {
    if s.eq_ignore_ascii_case("SELL") {
        Side::Sell
    } else {
        Side::Buy
    }
}

fn opposite(side: Side) -> Side {
    match side {
        Side::Buy => Side::Sell,
        Side::Sell => Side::Buy,
    }
}

/// Coarse run state, surfaced to the daemon's status endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineStatus {
    Idle,
    Armed,
    Running,
    Halted,
    Stopped,
}

/// Cheap `Arc`-backed handle to a running engine. Cloning is free; every
/// clone controls the same background tasks.
#[derive(Clone)]
pub struct EngineHandle<B: BrokerAdapter + Send + Sync + 'static> {
    inner: Arc<ExecutionEngine<B>>,
}

impl<B: BrokerAdapter + Send + Sync + 'static> EngineHandle<B> {
    pub fn status(&self) -> EngineStatus {
        *self.inner.status.lock().expect("status mutex poisoned")
    }

    pub fn portfolio_snapshot(&self) -> Option<PortfolioSnapshot> {
        self.inner.latest_portfolio.lock().expect("portfolio mutex poisoned").clone()
    }

    pub async fn arm(&self) -> Result<()> {
        self.inner.arm().await
    }

    pub async fn start(&self) -> Result<()> {
        self.inner.start().await
    }

    pub async fn stop(&self) -> Result<()> {
        self.inner.stop().await
    }

    /// Idempotent: cancels every open order and flattens every nonzero
    /// position, then disarms and halts the run. Safe to call more than
    /// once — a second call simply finds nothing left to cancel or flatten.
    pub async fn emergency_stop(&self) -> Result<()> {
        self.inner.emergency_stop().await
    }

    pub fn tick_sender(&self) -> mpsc::Sender<Tick> {
        self.inner.tick_tx.clone()
    }
}

/// One (user, strategy) trading session: the strategy host, its gate state,
/// the bar aggregator feeding it, and the broker-facing executor.
pub struct ExecutionEngine<B: BrokerAdapter + Send + Sync + 'static> {
    config: EngineConfig,
    pool: PgPool,
    run_id: Uuid,
    engine_id: String,
    symbols: Vec<String>,
    timeframe: Timeframe,

    arm_state: Arc<Mutex<ArmState>>,
    executor: Arc<OrderExecutor<B>>,
    pipeline: Mutex<BarPipeline>,
    risk_state: Arc<Mutex<RiskRuntimeState>>,
    conflict_cfg: ConflictConfig,
    conflict_state: Mutex<ConflictState>,
    queue: Mutex<PerUserOrderQueue>,
    reconciler: Arc<Reconciler>,
    mtm: MtmEngine,
    aggregator: Mutex<BarAggregator>,
    marks: Mutex<MarkMap>,
    bar_history: Mutex<BTreeMap<String, VecDeque<BarStub>>>,
    last_conflict_clear_bucket: Mutex<i64>,

    broker_snapshot_fn: Arc<dyn Fn() -> BrokerSnapshot + Send + Sync>,
    status: Mutex<EngineStatus>,
    latest_portfolio: Mutex<Option<PortfolioSnapshot>>,
    shutdown_tx: watch::Sender<bool>,
    tick_tx: mpsc::Sender<Tick>,
    tick_rx: Mutex<Option<mpsc::Receiver<Tick>>>,
}

impl<B: BrokerAdapter + Send + Sync + 'static> ExecutionEngine<B> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EngineConfig,
        pool: PgPool,
        run_id: Uuid,
        engine_id: impl Into<String>,
        user_id: impl Into<String>,
        strategy_id: impl Into<String>,
        host: StrategyHost,
        calendar: CalendarSpec,
        symbols: Vec<String>,
        timeframe: Timeframe,
        broker: B,
        integrity_gate: IntegrityGateImpl,
        risk_gate: RiskGateImpl,
        risk_state: Arc<Mutex<RiskRuntimeState>>,
        arm_state: Arc<Mutex<ArmState>>,
        broker_snapshot_fn: Arc<dyn Fn() -> BrokerSnapshot + Send + Sync>,
    ) -> Self {
        let user_id = user_id.into();
        let strategy_id = strategy_id.into();

        let reconcile_gate = new_reconcile_gate(config.cadences.reconcile_freshness_bound_ms);
        let trade_gate_cfg = config.risk_limits.to_trade_gate_config();

        let executor = Arc::new(OrderExecutor::new(
            broker,
            integrity_gate,
            risk_gate,
            reconcile_gate,
            risk_state.clone(),
            config.initial_capital_micros,
            trade_gate_cfg,
        ));

        let reconciler = Arc::new(Reconciler::new(pool.clone(), run_id, arm_state.clone()));
        let mtm = MtmEngine::new(0, config.initial_capital_micros, config.risk_limits.margin_rate_bps);
        mtm.set_strategy_symbols(strategy_id.clone(), symbols.clone());

        let (shutdown_tx, _rx) = watch::channel(false);
        let (tick_tx, tick_rx) = mpsc::channel(1_024);

        Self {
            config,
            pool,
            run_id,
            engine_id: engine_id.into(),
            symbols,
            timeframe,
            arm_state,
            executor,
            pipeline: Mutex::new(BarPipeline::new(user_id, strategy_id, host, calendar)),
            risk_state,
            conflict_cfg: ConflictConfig::sane_defaults(),
            conflict_state: Mutex::new(ConflictState::new()),
            queue: Mutex::new(PerUserOrderQueue::new(QueueConfig::sane_defaults())),
            reconciler,
            mtm,
            aggregator: Mutex::new(BarAggregator::new(vec![timeframe])),
            marks: Mutex::new(MarkMap::new()),
            bar_history: Mutex::new(BTreeMap::new()),
            last_conflict_clear_bucket: Mutex::new(i64::MIN),
            broker_snapshot_fn,
            status: Mutex::new(EngineStatus::Idle),
            latest_portfolio: Mutex::new(None),
            shutdown_tx,
            tick_tx,
            tick_rx: Mutex::new(Some(tick_rx)),
        }
    }

    fn set_status(&self, status: EngineStatus) {
        *self.status.lock().expect("status mutex poisoned") = status;
    }

    // -----------------------------------------------------------------
    // Run lifecycle
    // -----------------------------------------------------------------

    pub async fn arm(&self) -> Result<()> {
        ntx_db::arm_preflight(&self.pool, self.run_id).await.context("arm_preflight")?;
        ntx_db::arm_run(&self.pool, self.run_id).await.context("arm_run")?;
        *self.arm_state.lock().expect("arm state mutex poisoned") = ArmState::arm();
        self.set_status(EngineStatus::Armed);
        Ok(())
    }

    pub async fn start(&self) -> Result<()> {
        ntx_db::begin_run(&self.pool, self.run_id).await.context("begin_run")?;
        self.set_status(EngineStatus::Running);
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        ntx_db::stop_run(&self.pool, self.run_id).await.context("stop_run")?;
        self.set_status(EngineStatus::Stopped);
        let _ = self.shutdown_tx.send(true);
        Ok(())
    }

    pub async fn halt(&self, reason: &str) -> Result<()> {
        ntx_db::halt_run(&self.pool, self.run_id).await.context("halt_run")?;
        let disarmed = ArmState::manual_disarm();
        *self.arm_state.lock().expect("arm state mutex poisoned") = disarmed;
        ntx_db::persist_arm_state(&self.pool, "DISARMED", Some(reason)).await.context("persist_arm_state")?;
        self.set_status(EngineStatus::Halted);
        Ok(())
    }

    /// Idempotent emergency stop: cancel every open order, flatten every
    /// nonzero position via direct outbox submission (bypassing the
    /// per-user queue's throttling — an emergency flatten cannot wait on
    /// `min_handler_gap_ms`), then halt and disarm.
    pub async fn emergency_stop(&self) -> Result<()> {
        for watched in self.executor.watched_orders() {
            if let Err(e) = self.executor.cancel_intent(&watched.internal_id) {
                warn!(internal_id = %watched.internal_id, error = %e, "emergency_stop: cancel failed");
            }
        }

        let positions: Vec<(String, i64)> = self
            .executor
            .ledger_snapshot()
            .positions
            .into_iter()
            .map(|(symbol, pos)| (symbol, pos.qty_signed()))
            .filter(|(_, qty)| *qty != 0)
            .collect();

        for (symbol, qty) in positions {
            let side = if qty > 0 { Side::Sell } else { Side::Buy };
            let intent = OrderIntent {
                symbol: symbol.clone(),
                side,
                qty: qty.abs(),
            };
            let tag = format!("flatten-{}-{}", self.engine_id, symbol);
            if let Err(e) = self.submit_via_outbox(&intent, None, &tag).await {
                error!(symbol = %symbol, error = %e, "emergency_stop: flatten submit failed");
            }
        }

        self.halt("manual_emergency_stop").await
    }

    // -----------------------------------------------------------------
    // Background tasks
    // -----------------------------------------------------------------

    /// Spawn every background task and return a cheap handle to control
    /// them. Consumes the tick receiver set up in [`Self::new`] — calling
    /// this twice on the same engine is a logic error (the second call's
    /// tick-consumer loop would see an already-empty receiver slot).
    pub fn spawn(self: Arc<Self>) -> EngineHandle<B> {
        let tick_rx = self.tick_rx.lock().expect("tick rx mutex poisoned").take();

        if let Some(rx) = tick_rx {
            let engine = self.clone();
            tokio::spawn(async move { engine.tick_consumer_loop(rx).await });
        }

        self.clone().spawn_interval_loop(
            Duration::from_millis(self.config.cadences.bar_close_sweep_ms.max(1) as u64),
            |engine| Box::pin(async move { engine.bar_close_sweep_tick() }),
        );
        self.clone().spawn_interval_loop(
            Duration::from_millis(self.config.cadences.reconcile_retry_tick_ms.max(1) as u64),
            |engine| Box::pin(async move { engine.retry_tick().await }),
        );
        self.clone().spawn_interval_loop(
            Duration::from_millis(self.config.cadences.reconcile_full_scan_ms.max(1) as u64),
            |engine| Box::pin(async move { engine.reconcile_full_scan().await }),
        );
        self.clone().spawn_interval_loop(
            Duration::from_millis(self.config.cadences.mtm_ms.max(1) as u64),
            |engine| Box::pin(async move { engine.mtm_tick() }),
        );
        self.clone().spawn_interval_loop(Duration::from_millis(250), |engine| {
            Box::pin(async move { engine.dispatch_tick().await })
        });

        EngineHandle { inner: self }
    }

    fn spawn_interval_loop<F>(self: Arc<Self>, period: Duration, mut work: F)
    where
        F: FnMut(Arc<Self>) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> + Send + 'static,
    {
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        work(self.clone()).await;
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                }
            }
        });
    }

    async fn tick_consumer_loop(self: Arc<Self>, mut rx: mpsc::Receiver<Tick>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                maybe_tick = rx.recv() => {
                    match maybe_tick {
                        Some(tick) => {
                            let closed = self.aggregator.lock().expect("aggregator mutex poisoned").on_tick(&tick);
                            for bar in closed {
                                self.handle_closed_bar(bar);
                            }
                        }
                        None => return,
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    fn bar_close_sweep_tick(&self) {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let closed = self.aggregator.lock().expect("aggregator mutex poisoned").close_elapsed(now_ms);
        for bar in closed {
            self.handle_closed_bar(bar);
        }
    }

    fn handle_closed_bar(&self, bar: Bar) {
        self.marks.lock().expect("marks mutex poisoned").insert(bar.symbol.clone(), bar.close_micros);

        {
            let mut hist = self.bar_history.lock().expect("bar history mutex poisoned");
            let entry = hist.entry(bar.symbol.clone()).or_default();
            entry.push_back(BarStub::new(bar.end_ms / 1000, bar.is_complete, bar.close_micros, bar.volume));
            while entry.len() > STRATEGY_WINDOW_CAP {
                entry.pop_front();
            }
        }

        if bar.timeframe != self.timeframe || !bar.is_complete || !self.symbols.contains(&bar.symbol) {
            return;
        }

        let minute_bucket = bar.start_ms / 60_000;
        {
            let mut last = self.last_conflict_clear_bucket.lock().expect("conflict bucket mutex poisoned");
            if *last != minute_bucket {
                self.conflict_state.lock().expect("conflict state mutex poisoned").clear_bar_signals();
                *last = minute_bucket;
            }
        }

        let recent_bars: Vec<BarStub> = self
            .bar_history
            .lock()
            .expect("bar history mutex poisoned")
            .get(&bar.symbol)
            .map(|d| d.iter().cloned().collect())
            .unwrap_or_default();
        let recent = RecentBarsWindow::new(STRATEGY_WINDOW_CAP, recent_bars);
        let ctx = StrategyContext::new(self.timeframe.as_ms() / 1_000, bar.end_ms.max(0) as u64, recent);

        let current_positions: PositionBook = self
            .executor
            .ledger_snapshot()
            .positions
            .into_iter()
            .map(|(symbol, pos)| (symbol, pos.qty_signed()))
            .collect();

        let now_ts = bar.end_ms / 1_000;
        let bypass_market_hours = self.config.mode.bypasses_market_hours_gate();
        let risk_cfg = self.config.risk_limits.to_risk_config();
        let trade_gate_cfg = self.config.risk_limits.to_trade_gate_config();

        let stop_loss_bps = 0;
        let available_margin_micros = self
            .latest_portfolio
            .lock()
            .expect("portfolio mutex poisoned")
            .as_ref()
            .map(|p| p.available_margin_micros)
            .unwrap_or(self.config.initial_capital_micros);

        let mut pipeline = self.pipeline.lock().expect("pipeline mutex poisoned");
        let mut risk_state = self.risk_state.lock().expect("risk state mutex poisoned");
        let mut conflict_state = self.conflict_state.lock().expect("conflict state mutex poisoned");
        let mut queue = self.queue.lock().expect("queue mutex poisoned");

        let outcomes = pipeline.process_bar(
            &ctx,
            &current_positions,
            bypass_market_hours,
            now_ts,
            minute_bucket,
            &risk_cfg,
            &mut risk_state,
            &trade_gate_cfg,
            available_margin_micros,
            stop_loss_bps,
            &self.conflict_cfg,
            &mut conflict_state,
            &mut queue,
        );

        match outcomes {
            Ok(outcomes) => {
                for outcome in outcomes {
                    if !matches!(outcome, PipelineOutcome::NoOrders) {
                        info!(symbol = %bar.symbol, ?outcome, "bar pipeline outcome");
                    }
                }
            }
            Err(e) => warn!(symbol = %bar.symbol, error = ?e, "bar pipeline evaluation failed"),
        }
    }

    async fn dispatch_tick(&self) {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let item = self.queue.lock().expect("queue mutex poisoned").try_dequeue(now_ms);
        let Some(item) = item else {
            return;
        };

        if let Err(e) = self.dispatch_item(item, now_ms / 1_000).await {
            error!(error = %e, "queue dispatch failed");
        }
    }

    async fn dispatch_item(&self, item: QueueItem, now_ts: i64) -> Result<()> {
        let queued: crate::pipeline::QueuedIntent =
            serde_json::from_slice(&item.payload).context("decode queued intent")?;

        let side = parse_side(&queued.side);
        let intent = OrderIntent {
            symbol: queued.symbol.clone(),
            side,
            qty: queued.qty,
        };

        let idempotency_key = format!(
            "{}-{}-{}-{}-{}-{}",
            item.dedup_key.user_id, item.dedup_key.strategy_id, item.dedup_key.symbol, item.dedup_key.side,
            item.dedup_key.minute_bucket, item.seq
        );

        self.submit_via_outbox_with_key(&intent, queued.limit_price_micros, &idempotency_key, now_ts).await
    }

    async fn submit_via_outbox(&self, intent: &OrderIntent, limit_price_micros: Option<i64>, tag: &str) -> Result<()> {
        let now_ts = chrono::Utc::now().timestamp();
        let idempotency_key = format!("{}-{}", tag, now_ts);
        self.submit_via_outbox_with_key(intent, limit_price_micros, &idempotency_key, now_ts).await
    }

    async fn submit_via_outbox_with_key(
        &self,
        intent: &OrderIntent,
        limit_price_micros: Option<i64>,
        idempotency_key: &str,
        now_ts: i64,
    ) -> Result<()> {
        let order_json = serde_json::json!({
            "symbol": intent.symbol,
            "side": intent.side.to_string(),
            "qty": intent.qty,
            "limit_price_micros": limit_price_micros,
        });

        ntx_db::outbox_enqueue(&self.pool, self.run_id, idempotency_key, order_json)
            .await
            .context("outbox_enqueue")?;

        let claimed = ntx_db::outbox_claim_batch(&self.pool, 1, &self.engine_id).await.context("outbox_claim_batch")?;
        let Some(row) = claimed.into_iter().find(|r| r.idempotency_key == idempotency_key) else {
            // Another dispatcher already claimed this row (or a prior one
            // ahead of it in FIFO order) — nothing to do this tick.
            return Ok(());
        };

        let claim = ntx_execution::OutboxClaimToken::from_claimed_row(row.outbox_id, &row.idempotency_key);
        let order_type = if limit_price_micros.is_some() { "LIMIT" } else { "MARKET" };

        match self.executor.submit_intent(intent, &claim, order_type, limit_price_micros, "DAY", now_ts) {
            Ok(()) => {
                ntx_db::outbox_mark_sent(&self.pool, idempotency_key).await.context("outbox_mark_sent")?;
                ntx_db::outbox_mark_acked(&self.pool, idempotency_key).await.context("outbox_mark_acked")?;
                Ok(())
            }
            Err(e) => {
                ntx_db::outbox_mark_failed(&self.pool, idempotency_key).await.context("outbox_mark_failed")?;
                Err(anyhow::anyhow!("broker submit failed: {e}"))
            }
        }
    }

    async fn retry_tick(&self) {
        let now_ts = chrono::Utc::now().timestamp();
        for watched in self.executor.watched_orders() {
            match self.reconciler.retry_tick(&watched, now_ts) {
                RetryTickOutcome::Wait => {}
                RetryTickOutcome::Resubmit { internal_id, attempt } => {
                    info!(internal_id = %internal_id, attempt, "reconciler requested resubmit");
                    self.executor.record_retry_attempt(&internal_id);
                }
                RetryTickOutcome::Cancel { internal_id, reason } => {
                    warn!(internal_id = %internal_id, ?reason, "reconciler requested cancel");
                    if let Err(e) = self.executor.cancel_intent(&internal_id) {
                        warn!(internal_id = %internal_id, error = %e, "retry-tick cancel failed");
                    }
                }
            }
        }
    }

    async fn reconcile_full_scan(&self) {
        let local = self.executor.local_snapshot();
        let broker = (self.broker_snapshot_fn)();

        match self.reconciler.full_scan(&local, &broker).await {
            Ok(ScanOutcome::Clean) => {}
            Ok(ScanOutcome::StaleSnapshot) => {
                warn!("reconcile full scan: broker snapshot stale, deferring verdict");
            }
            Ok(ScanOutcome::Drifted(report)) => {
                error!(?report, "reconcile drift detected — halting");
                if let Err(e) = self.halt("reconcile_drift").await {
                    error!(error = %e, "failed to halt after reconcile drift");
                }
            }
            Err(e) => error!(error = %e, "reconcile full scan failed"),
        }
    }

    fn mtm_tick(&self) {
        let ledger = self.executor.ledger_snapshot();
        let marks = self.marks.lock().expect("marks mutex poisoned").clone();
        let snapshot = self.mtm.tick(&ledger, &marks);
        *self.latest_portfolio.lock().expect("portfolio mutex poisoned") = Some(snapshot);
    }

    /// Reset per-day accumulator state (peak equity, trade gate counters,
    /// kill-switch day window) at session start for a new trading day.
    pub fn reset_for_day(&self, day_id: u32, capital_micros: i64) {
        self.mtm.reset_for_day(day_id, capital_micros);
        let mut risk_state = self.risk_state.lock().expect("risk state mutex poisoned");
        risk_state.risk = ntx_risk::RiskState::new(day_id, capital_micros, day_id);
        risk_state.trade_gate.reset_for_day(day_id);
    }
}
