use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use trendline_bot_orchestrator::{spawn, ControllerHandle};
use trendline_core::{
    AppConfig, CloseReason, Crossing, ExchangeError, Journal, MilestoneAction, MilestoneSpec, OperationState,
    Side, Tick, TradingEvent, TrendConfig, TrendLimits, TrendMode,
};
use trendline_execution::{PaperExchange, SignalOutcome};
use trendline_strategy::Bias;

const SYMBOL: &str = "BTCUSDT";

fn start(config: AppConfig) -> (Arc<PaperExchange>, ControllerHandle) {
    let paper = Arc::new(PaperExchange::new());
    paper.set_price(dec!(100));
    let (handle, _task) = spawn(config, paper.clone(), Journal::disabled(), None).unwrap();
    (paper, handle)
}

fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

async fn tick(handle: &ControllerHandle, paper: &PaperExchange, price: Decimal, at: DateTime<Utc>) {
    paper.set_price(price);
    handle.submit_tick(Tick::new(price, at)).await.unwrap();
}

fn drain(rx: &mut broadcast::Receiver<TradingEvent>) -> Vec<TradingEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn closes_with(events: &[TradingEvent], wanted: CloseReason) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, TradingEvent::PositionClosed { reason, .. } if *reason == wanted))
        .count()
}

fn no_limits() -> TrendLimits {
    TrendLimits {
        max_trades: None,
        max_duration_minutes: None,
        tp_roi_pct: None,
        sl_roi_pct: None,
    }
}

#[tokio::test]
async fn session_take_profit_stops_both_sides_in_one_cycle() {
    let mut config = AppConfig::default();
    config.session.tp_roi_pct = dec!(1);
    let (paper, handle) = start(config);
    let mut events = handle.subscribe();

    handle.manual_open(Side::Long).await.unwrap();
    handle.manual_open(Side::Long).await.unwrap();
    handle.manual_open(Side::Short).await.unwrap();

    // longs +0.6, short -0.3 over 10 capital: 3%
    tick(&handle, &paper, dec!(103), t0()).await;
    let status = handle.settle().await.unwrap();

    assert!(!status.session_running);
    assert_eq!(status.stop_reason, Some(CloseReason::SessionTpRoi));
    for side in Side::ALL {
        let side_status = status.sides.get(side);
        assert_eq!(side_status.state, OperationState::Stopped);
        assert_eq!(side_status.active_positions, 0);
        assert_eq!(paper.position_size(SYMBOL, side), dec!(0));
    }
    let events = drain(&mut events);
    assert_eq!(closes_with(&events, CloseReason::SessionTpRoi), 3);
    assert!(events
        .iter()
        .any(|e| matches!(e, TradingEvent::SessionBreach { reason: CloseReason::SessionTpRoi, .. })));

    // later ticks are ignored once the session stopped
    tick(&handle, &paper, dec!(90), t0() + Duration::seconds(1)).await;
    let status = handle.settle().await.unwrap();
    assert_eq!(status.ticks_processed, 2);
    assert_eq!(status.sides.long.total_trades, 2);
    assert_eq!(status.sides.long.active_positions, 0);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn failed_session_closeout_is_retried_on_later_ticks() {
    let mut config = AppConfig::default();
    config.session.sl_roi_pct = dec!(5);
    let (paper, handle) = start(config);
    let mut events = handle.subscribe();

    handle.manual_open(Side::Long).await.unwrap();
    handle.manual_open(Side::Long).await.unwrap();
    tick(&handle, &paper, dec!(100), t0()).await;
    handle.settle().await.unwrap();

    // longs -0.6 over 10 capital: -6%, first close is refused
    paper.fail_next(ExchangeError::Network("connection reset".to_string()));
    tick(&handle, &paper, dec!(97), t0() + Duration::seconds(1)).await;
    let status = handle.settle().await.unwrap();
    assert!(!status.session_running);
    assert_eq!(status.stop_reason, Some(CloseReason::SessionSlRoi));
    assert_eq!(status.sides.long.active_positions, 1);
    assert_eq!(paper.position_size(SYMBOL, Side::Long), dec!(0.1));

    tick(&handle, &paper, dec!(96), t0() + Duration::seconds(2)).await;
    let status = handle.settle().await.unwrap();
    assert_eq!(status.sides.long.active_positions, 0);
    assert_eq!(status.sides.long.total_trades, 2);
    assert_eq!(paper.position_size(SYMBOL, Side::Long), dec!(0));
    assert_eq!(closes_with(&drain(&mut events), CloseReason::SessionSlRoi), 2);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn liquidated_short_side_is_reconciled_without_touching_long() {
    let mut config = AppConfig::default();
    config.session.heartbeat_interval_secs = 10;
    let (paper, handle) = start(config);
    let mut events = handle.subscribe();

    handle.manual_open(Side::Long).await.unwrap();
    handle.manual_open(Side::Short).await.unwrap();
    handle.manual_open(Side::Short).await.unwrap();
    tick(&handle, &paper, dec!(100), t0()).await;
    handle.settle().await.unwrap();

    paper.liquidate(SYMBOL, Side::Short);
    tick(&handle, &paper, dec!(100), t0() + Duration::seconds(11)).await;
    let status = handle.settle().await.unwrap();

    assert_eq!(status.sides.short.active_positions, 0);
    assert_eq!(status.sides.short.state, OperationState::Active);
    assert_eq!(status.sides.long.active_positions, 1);

    let events = drain(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        TradingEvent::ReconciliationCorrection { side: Side::Short, closed: 2, .. }
    )));
    let estimated = events
        .iter()
        .filter(|e| matches!(
            e,
            TradingEvent::PositionClosed { side: Side::Short, reason: CloseReason::Reconciliation, estimated: true, .. }
        ))
        .count();
    assert_eq!(estimated, 2);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn queued_ticks_are_all_processed_in_order() {
    let mut config = AppConfig::default();
    config.session.tick_queue_capacity = 2;
    let (paper, handle) = start(config);

    let mut last = t0();
    for i in 0..300 {
        last = t0() + Duration::seconds(i);
        tick(&handle, &paper, dec!(100), last).await;
    }
    let status = handle.settle().await.unwrap();

    assert_eq!(status.ticks_processed, 300);
    assert_eq!(status.last_tick_at, Some(last));
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn trailing_stop_closes_after_retrace_from_high() {
    let mut config = AppConfig::default();
    config.long.trend = TrendConfig {
        mode: TrendMode::Both,
        trailing_activation_pct: dec!(2),
        trailing_distance_pct: dec!(2),
        limits: no_limits(),
        ..TrendConfig::default()
    };
    let (paper, handle) = start(config);
    let mut events = handle.subscribe();

    handle.manual_open(Side::Long).await.unwrap();
    tick(&handle, &paper, dec!(105), t0()).await;
    tick(&handle, &paper, dec!(103), t0() + Duration::seconds(1)).await;
    let status = handle.settle().await.unwrap();
    assert_eq!(status.sides.long.active_positions, 1);

    tick(&handle, &paper, dec!(102.8), t0() + Duration::seconds(2)).await;
    let status = handle.settle().await.unwrap();
    assert_eq!(status.sides.long.active_positions, 0);

    let events = drain(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        TradingEvent::PositionClosed { reason: CloseReason::TrailingStop, exit_price, .. }
            if *exit_price == dec!(102.8)
    )));
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn bias_flip_closes_only_the_opposed_side() {
    let mut config = AppConfig::default();
    config.bias.enabled = true;
    config.bias.interval_secs = 60;
    config.bias.atr_period = 2;
    config.bias.close_on_flip = true;
    let wide = TrendConfig {
        mode: TrendMode::Both,
        stop_loss_pct: dec!(50),
        trailing_activation_pct: dec!(50),
        limits: no_limits(),
        ..TrendConfig::default()
    };
    config.long.trend = wide.clone();
    config.short.trend = wide;
    let (paper, handle) = start(config);
    let mut events = handle.subscribe();
    let minute = |m: i64| t0() + Duration::minutes(m);

    handle.manual_open(Side::Long).await.unwrap();
    handle.manual_open(Side::Short).await.unwrap();
    for (m, price) in [dec!(100), dec!(102), dec!(104), dec!(106), dec!(96)]
        .into_iter()
        .enumerate()
    {
        tick(&handle, &paper, price, minute(m as i64)).await;
    }
    let status = handle.settle().await.unwrap();
    assert_eq!(status.bias, None);
    assert_eq!(status.sides.long.active_positions, 1);

    // closing the 96 bar crosses the stop downwards
    tick(&handle, &paper, dec!(110), minute(5)).await;
    let status = handle.settle().await.unwrap();
    assert_eq!(status.bias, Some(Bias::Bearish));
    assert_eq!(status.sides.long.active_positions, 0);
    assert_eq!(status.sides.short.active_positions, 1);
    assert_eq!(paper.position_size(SYMBOL, Side::Short), dec!(0.1));
    let flipped = drain(&mut events);
    assert!(flipped.iter().any(|e| matches!(
        e,
        TradingEvent::PositionClosed { side: Side::Long, reason: CloseReason::BiasFlip, .. }
    )));
    assert!(!flipped
        .iter()
        .any(|e| matches!(e, TradingEvent::PositionClosed { side: Side::Short, .. })));

    tick(&handle, &paper, dec!(110), minute(6)).await;
    let status = handle.settle().await.unwrap();
    assert_eq!(status.bias, Some(Bias::Bullish));
    assert_eq!(status.sides.short.active_positions, 0);
    assert_eq!(closes_with(&drain(&mut events), CloseReason::BiasFlip), 1);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn milestone_fires_once_per_session() {
    let mut config = AppConfig::default();
    config.long.trend = TrendConfig::default();
    let (paper, handle) = start(config);
    let mut events = handle.subscribe();

    handle
        .add_milestone(
            Side::Long,
            MilestoneSpec {
                crossing: Crossing::Above,
                threshold: dec!(105),
                action: MilestoneAction::ActivateTrend(TrendConfig {
                    mode: TrendMode::LongOnly,
                    limits: no_limits(),
                    ..TrendConfig::default()
                }),
                parent: None,
            },
        )
        .await
        .unwrap();

    for (i, price) in [dec!(104), dec!(106), dec!(107), dec!(104), dec!(108)]
        .into_iter()
        .enumerate()
    {
        tick(&handle, &paper, price, t0() + Duration::seconds(i as i64)).await;
    }
    handle.settle().await.unwrap();

    let fired = drain(&mut events)
        .iter()
        .filter(|e| matches!(e, TradingEvent::MilestoneFired { .. }))
        .count();
    assert_eq!(fired, 1);
    assert_eq!(
        handle.get_operation(Side::Long).await.trend.mode(),
        TrendMode::LongOnly
    );
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn hot_reload_rejects_slot_shrink_but_applies_other_side() {
    let config = AppConfig::default();
    let paper = Arc::new(PaperExchange::new());
    paper.set_price(dec!(100));
    let (config_tx, config_rx) = watch::channel(config.clone());
    let (handle, _task) = spawn(config.clone(), paper.clone(), Journal::disabled(), Some(config_rx)).unwrap();
    let mut events = handle.subscribe();

    handle.manual_open(Side::Long).await.unwrap();
    handle.manual_open(Side::Long).await.unwrap();

    let mut reloaded = config;
    reloaded.long.max_slots = 1;
    reloaded.short.leverage = dec!(5);
    config_tx.send(reloaded).unwrap();
    tick(&handle, &paper, dec!(100), t0()).await;
    handle.settle().await.unwrap();

    let long = handle.get_operation(Side::Long).await;
    assert_eq!(long.config.max_slots, 5);
    assert_eq!(long.active_count(), 2);
    assert_eq!(handle.get_operation(Side::Short).await.config.leverage, dec!(5));
    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        TradingEvent::ConfigRejected { side: Some(Side::Long), .. }
    )));
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn file_reload_overrides_operator_update() {
    let config = AppConfig::default();
    let paper = Arc::new(PaperExchange::new());
    paper.set_price(dec!(100));
    let (config_tx, config_rx) = watch::channel(config.clone());
    let (handle, _task) = spawn(config.clone(), paper.clone(), Journal::disabled(), Some(config_rx)).unwrap();

    let mut operator = config.long.clone();
    operator.leverage = dec!(5);
    handle.update_operation(Side::Long, operator).await.unwrap();
    assert_eq!(handle.get_operation(Side::Long).await.config.leverage, dec!(5));

    // the file still holds the startup long config
    let mut reloaded = config;
    reloaded.short.max_slots = 3;
    config_tx.send(reloaded).unwrap();
    tick(&handle, &paper, dec!(100), t0()).await;
    handle.settle().await.unwrap();

    assert_eq!(handle.get_operation(Side::Long).await.config.leverage, dec!(10));
    assert_eq!(handle.get_operation(Side::Short).await.config.max_slots, 3);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_drains_ticks_snapshots_and_closes() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.session.log_dir = dir.path().to_path_buf();
    let paper = Arc::new(PaperExchange::new());
    paper.set_price(dec!(100));
    let (journal, _writer) = Journal::spawn(dir.path(), 1000);
    let (handle, task) = spawn(config, paper.clone(), journal, None).unwrap();

    handle.manual_open(Side::Long).await.unwrap();
    for i in 0..5 {
        tick(&handle, &paper, dec!(100), t0() + Duration::seconds(i)).await;
    }
    let report = handle.shutdown().await.unwrap();
    task.await.unwrap();

    assert_eq!(report.closed.long, 1);
    assert_eq!(report.closed.short, 0);
    assert!(report.errors.is_empty());
    assert_eq!(paper.position_size(SYMBOL, Side::Long), dec!(0));

    let read = |name: &str| std::fs::read_to_string(dir.path().join(name)).unwrap();
    assert_eq!(read("signals_log.jsonl").lines().count(), 5);
    assert_eq!(read("open_positions_snapshot.jsonl").lines().count(), 1);
    let closed = read("closed_positions.jsonl");
    assert_eq!(closed.lines().count(), 1);
    assert!(closed.contains("\"shutdown\""));
    assert!(handle.submit_tick(Tick::new(dec!(100), t0())).await.is_err());
}

#[tokio::test]
async fn fatal_error_halts_one_side_until_resumed() {
    let (paper, handle) = start(AppConfig::default());
    // leverage setup has run once the actor answers a fence
    handle.settle().await.unwrap();
    paper.fail_next(ExchangeError::Unauthorized("key revoked".to_string()));

    assert!(handle.manual_open(Side::Long).await.is_err());
    let long = handle.get_operation(Side::Long).await;
    assert!(long.halt_reason.is_some());
    assert!(handle.manual_open(Side::Long).await.is_err());

    assert!(matches!(
        handle.manual_open(Side::Short).await.unwrap(),
        SignalOutcome::Opened { .. }
    ));

    assert_eq!(handle.resume(Side::Long).await, OperationState::Active);
    assert!(handle.get_operation(Side::Long).await.halt_reason.is_none());
    handle.shutdown().await.unwrap();
}
