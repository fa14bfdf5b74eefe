//! S1-style happy path: an MA-crossover strategy's BUY target clears every
//! gate (risk, trade gate, conflict) and lands in the user's order queue.

use ntx_conflict::{ConflictConfig, ConflictState};
use ntx_execution::PositionBook;
use ntx_integrity::CalendarSpec;
use ntx_queue::{PerUserOrderQueue, QueueConfig};
use ntx_risk::{RiskConfig, TradeGateConfig};
use ntx_runtime::gates::RiskRuntimeState;
use ntx_runtime::pipeline::{BarPipeline, PipelineOutcome};
use ntx_strategy::{
    BarStub, MaCrossoverConfig, MaCrossoverStrategy, MaKind, RecentBarsWindow, ShadowMode,
    StrategyContext, StrategyHost,
};

const DAY_START_TS: i64 = 1_771_230_900; // a Monday, well inside NSE hours at bar close

fn ctx_with_closes(closes: &[i64]) -> StrategyContext {
    let bars: Vec<BarStub> = closes
        .iter()
        .enumerate()
        .map(|(i, c)| BarStub::new(DAY_START_TS + i as i64 * 60, true, *c * 1_000_000, 1_000))
        .collect();
    StrategyContext::new(60, closes.len() as u64, RecentBarsWindow::new(200, bars))
}

fn lenient_risk_cfg() -> RiskConfig {
    RiskConfig {
        daily_loss_limit_micros: 1_000_000 * 1_000_000,
        max_drawdown_limit_micros: 0,
        reject_storm_max_rejects_in_window: 1_000,
        pdt_auto_enabled: false,
        missing_protective_stop_flattens: false,
    }
}

fn lenient_trade_gate_cfg() -> TradeGateConfig {
    TradeGateConfig {
        consecutive_loss_limit: 1_000,
        max_risk_per_trade_micros: 1_000_000 * 1_000_000,
        max_open_positions: 100,
        ..TradeGateConfig::sane_defaults()
    }
}

#[test]
fn ma_crossover_buy_signal_reaches_the_queue() {
    let mut host = StrategyHost::new(ShadowMode::Off);
    host.register(Box::new(MaCrossoverStrategy::new(
        "NIFTY",
        MaCrossoverConfig {
            name: "ma_9_21".to_string(),
            timeframe_secs: 60,
            fast_period: 2,
            slow_period: 3,
            kind: MaKind::Sma,
            order_qty: 1,
        },
    )))
    .unwrap();

    let mut pipeline = BarPipeline::new("u1", "strat-1", host, CalendarSpec::AlwaysOn);
    let mut risk_state = RiskRuntimeState::new(20260216, 100_000 * 1_000_000);
    let mut conflict_state = ConflictState::new();
    let mut queue = PerUserOrderQueue::new(QueueConfig::sane_defaults());
    let positions = PositionBook::new();

    // Flat fast/slow SMA, then a sharp move up crosses fast above slow.
    let ctx = ctx_with_closes(&[21_500, 21_500, 21_500, 21_600]);

    let outcomes = pipeline
        .process_bar(
            &ctx,
            &positions,
            true, // paper mode bypasses market hours
            DAY_START_TS + 180,
            (DAY_START_TS + 180) / 60,
            &lenient_risk_cfg(),
            &mut risk_state,
            &lenient_trade_gate_cfg(),
            1_000_000 * 1_000_000,
            200, // 2% stop loss
            &ConflictConfig::sane_defaults(),
            &mut conflict_state,
            &mut queue,
        )
        .expect("strategy evaluation must not error");

    assert_eq!(outcomes.len(), 1);
    match &outcomes[0] {
        PipelineOutcome::Enqueued(ntx_queue::EnqueueOutcome::Enqueued) => {}
        other => panic!("expected a fresh enqueue, got {other:?}"),
    }
    assert_eq!(queue.depth(), 1);
}

#[test]
fn flat_market_produces_no_orders() {
    let mut host = StrategyHost::new(ShadowMode::Off);
    host.register(Box::new(MaCrossoverStrategy::new(
        "NIFTY",
        MaCrossoverConfig {
            name: "ma_9_21".to_string(),
            timeframe_secs: 60,
            fast_period: 2,
            slow_period: 3,
            kind: MaKind::Sma,
            order_qty: 1,
        },
    )))
    .unwrap();

    let mut pipeline = BarPipeline::new("u1", "strat-1", host, CalendarSpec::AlwaysOn);
    let mut risk_state = RiskRuntimeState::new(20260216, 100_000 * 1_000_000);
    let mut conflict_state = ConflictState::new();
    let mut queue = PerUserOrderQueue::new(QueueConfig::sane_defaults());
    let positions = PositionBook::new();

    let ctx = ctx_with_closes(&[21_500, 21_500, 21_500]);

    let outcomes = pipeline
        .process_bar(
            &ctx,
            &positions,
            true,
            DAY_START_TS + 120,
            (DAY_START_TS + 120) / 60,
            &lenient_risk_cfg(),
            &mut risk_state,
            &lenient_trade_gate_cfg(),
            1_000_000 * 1_000_000,
            200,
            &ConflictConfig::sane_defaults(),
            &mut conflict_state,
            &mut queue,
        )
        .unwrap();

    assert_eq!(outcomes, vec![PipelineOutcome::NoOrders]);
    assert_eq!(queue.depth(), 0);
}
