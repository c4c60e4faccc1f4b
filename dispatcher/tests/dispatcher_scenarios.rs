use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use dispatcher::clients::{MarketSnapshotProvider, OrderPlacementClient, PlacementReceipt, PlacementRequest};
use dispatcher::repositories::{CancelOutcome, InMemoryStore, OrderStore, SchedulerStore, Stores};
use dispatcher::services::{Dispatcher, OrderIntake, OrderRequest, ScheduleRequest};
use rust_decimal_macros::dec;
use shared::config::{DispatcherSettings, RetrySettings, TwapSettings};
use shared::error::{EngineError, EngineResult};
use shared::models::{
    AdvanceCondition, CrossDirection, MarketMetric, OrderSide, OrderStatus, SchedulerStatus, TwapParams,
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

struct FakeMarket {
    price: Mutex<f64>,
    figure: Mutex<f64>,
    down: AtomicBool,
}

impl FakeMarket {
    fn new() -> Self {
        Self {
            price: Mutex::new(100.0),
            figure: Mutex::new(0.0),
            down: AtomicBool::new(false),
        }
    }

    fn set_figure(&self, figure: f64) {
        *self.figure.lock().unwrap() = figure;
    }

    fn check(&self) -> EngineResult<()> {
        if self.down.load(Ordering::SeqCst) {
            Err(EngineError::MarketData("info endpoint unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MarketSnapshotProvider for FakeMarket {
    async fn get_price(&self, _asset: &str) -> EngineResult<f64> {
        self.check()?;
        Ok(*self.price.lock().unwrap())
    }

    async fn get_volume_or_oi(&self, _asset: &str, _metric: MarketMetric) -> EngineResult<f64> {
        self.check()?;
        Ok(*self.figure.lock().unwrap())
    }

    async fn get_tick_precision(&self, _asset: &str) -> EngineResult<u32> {
        self.check()?;
        Ok(1)
    }
}

#[derive(Default)]
struct FakePlacement {
    placed: Mutex<Vec<PlacementRequest>>,
    calls: AtomicU32,
    hang: AtomicBool,
}

impl FakePlacement {
    fn placed(&self) -> Vec<PlacementRequest> {
        self.placed.lock().unwrap().clone()
    }
}

#[async_trait]
impl OrderPlacementClient for FakePlacement {
    async fn place(&self, request: &PlacementRequest) -> EngineResult<PlacementReceipt> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang.load(Ordering::SeqCst) {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        }
        self.placed.lock().unwrap().push(request.clone());
        Ok(PlacementReceipt {
            txn_hash: format!("0xhash-{}", request.client_order_id),
        })
    }
}

fn settings(id: &str) -> DispatcherSettings {
    DispatcherSettings {
        dispatcher_id: id.to_string(),
        placement_timeout: std::time::Duration::from_millis(30),
        retry: RetrySettings {
            max_attempts: 3,
            backoff_base: std::time::Duration::from_millis(1),
            backoff_max: std::time::Duration::from_millis(4),
        },
        ..DispatcherSettings::default()
    }
}

struct Harness {
    store: Arc<InMemoryStore>,
    stores: Stores,
    market: Arc<FakeMarket>,
    placement: Arc<FakePlacement>,
    dispatcher: Dispatcher,
    intake: OrderIntake,
}

impl Harness {
    fn new() -> Self {
        Self::with_settings(settings("dispatcher-a"))
    }

    fn with_settings(settings: DispatcherSettings) -> Self {
        let (stores, store) = Stores::in_memory();
        let market = Arc::new(FakeMarket::new());
        let placement = Arc::new(FakePlacement::default());
        let dispatcher = Dispatcher::new(stores.clone(), placement.clone(), market.clone(), settings.clone());
        let intake = OrderIntake::new(stores.orders.clone(), settings);
        Self {
            store,
            stores,
            market,
            placement,
            dispatcher,
            intake,
        }
    }

    /// Second dispatcher over the same store and clients
    fn peer(&self, id: &str) -> Dispatcher {
        Dispatcher::new(
            self.stores.clone(),
            self.placement.clone(),
            self.market.clone(),
            settings(id),
        )
    }

    async fn submit(&self, schedule: ScheduleRequest, twap: Option<TwapParams>, now: DateTime<Utc>) -> (u64, u64) {
        let submitted = self
            .intake
            .submit(
                OrderRequest {
                    user_address: "0xfeed".to_string(),
                    side: OrderSide::Long,
                    asset: "ETH".to_string(),
                    usdc_size: dec!(1000),
                    leverage: 2,
                    slippage: None,
                    twap,
                    schedule,
                },
                now,
            )
            .await
            .unwrap();
        (submitted.order.id, submitted.scheduler.map(|s| s.id).unwrap_or_default())
    }

    async fn order_status(&self, id: u64) -> OrderStatus {
        self.store.get_order(id).await.unwrap().unwrap().status
    }

    async fn scheduler_status(&self, id: u64) -> SchedulerStatus {
        self.store.get(id).await.unwrap().unwrap().status
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap()
}

#[tokio::test]
async fn at_time_fires_once_at_its_time() {
    let h = Harness::new();
    let due = t0() + Duration::minutes(10);
    let (order_id, scheduler_id) = h.submit(ScheduleRequest::At(due), None, t0()).await;

    let early = h.dispatcher.poll_once(due - Duration::seconds(1)).await;
    assert_eq!(early.fired, 0);
    assert_eq!(h.scheduler_status(scheduler_id).await, SchedulerStatus::Active);

    let on_time = h.dispatcher.poll_once(due).await;
    assert_eq!(on_time.fired, 1);

    let late = h.dispatcher.poll_once(due + Duration::seconds(1)).await;
    assert_eq!(late.due, 0);
    assert_eq!(late.fired, 0);

    let placed = h.placement.placed();
    assert_eq!(placed.len(), 1);
    assert_eq!(placed[0].client_order_id, format!("sched-{}-0", scheduler_id));
    assert_eq!(placed[0].limit_price, dec!(108));
    assert_eq!(placed[0].size, dec!(1000));

    let scheduler = h.store.get(scheduler_id).await.unwrap().unwrap();
    assert_eq!(scheduler.status, SchedulerStatus::Executed);
    assert_eq!(scheduler.fire_count, 1);
    assert_eq!(scheduler.last_executed_at, Some(due));
    assert!(scheduler.lease.is_none());

    let order = h.store.get_order(order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Executed);
    assert_eq!(order.external_txn_hash, Some(format!("0xhash-sched-{}-0", scheduler_id)));
}

#[tokio::test]
async fn twap_runs_four_even_slices() {
    let mut settings = settings("dispatcher-a");
    settings.twap = TwapSettings {
        min_slice_notional: dec!(250),
        ..TwapSettings::default()
    };
    let h = Harness::with_settings(settings);
    let twap = TwapParams {
        running_time_minutes: 60,
        randomize: false,
    };
    let (order_id, scheduler_id) = h.submit(ScheduleRequest::Immediate, Some(twap), t0()).await;

    for (slice, minute) in [0i64, 15, 30, 45].into_iter().enumerate() {
        let at = t0() + Duration::minutes(minute);
        if minute > 0 {
            let before = h.dispatcher.poll_once(at - Duration::seconds(1)).await;
            assert_eq!(before.fired, 0, "slice {} fired early", slice);
        }
        let report = h.dispatcher.poll_once(at).await;
        assert_eq!(report.fired, 1, "slice {} did not fire", slice);

        let scheduler = h.store.get(scheduler_id).await.unwrap().unwrap();
        if slice < 3 {
            assert_eq!(scheduler.status, SchedulerStatus::Active);
            assert_eq!(scheduler.next_execution_at, at + Duration::minutes(15));
            assert_eq!(h.order_status(order_id).await, OrderStatus::Executing);
        }
    }

    let placed = h.placement.placed();
    let sizes: Vec<_> = placed.iter().map(|p| p.size).collect();
    assert_eq!(sizes, vec![dec!(250); 4]);
    let ids: Vec<_> = placed.iter().map(|p| p.client_order_id.clone()).collect();
    assert_eq!(
        ids,
        (0..4).map(|i| format!("sched-{}-{}", scheduler_id, i)).collect::<Vec<_>>()
    );

    let scheduler = h.store.get(scheduler_id).await.unwrap().unwrap();
    assert_eq!(scheduler.status, SchedulerStatus::Executed);
    assert_eq!(scheduler.fire_count, 4);
    assert_eq!(h.order_status(order_id).await, OrderStatus::Executed);

    let after = h.dispatcher.poll_once(t0() + Duration::minutes(90)).await;
    assert_eq!(after.due, 0);
}

#[tokio::test]
async fn placement_timeouts_fail_the_order() {
    let h = Harness::new();
    h.placement.hang.store(true, Ordering::SeqCst);
    let due = t0() + Duration::minutes(1);
    let (order_id, scheduler_id) = h.submit(ScheduleRequest::At(due), None, t0()).await;

    let report = h.dispatcher.poll_once(due).await;
    assert_eq!(report.failed, 1);
    assert_eq!(h.placement.calls.load(Ordering::SeqCst), 3);

    let scheduler = h.store.get(scheduler_id).await.unwrap().unwrap();
    assert_eq!(scheduler.status, SchedulerStatus::Failed);
    assert!(scheduler.failure_reason.unwrap().contains("timed out"));
    assert_eq!(scheduler.fire_count, 0);

    let order = h.store.get_order(order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Failed);
    assert!(order.external_txn_hash.is_none());
}

#[tokio::test]
async fn two_dispatchers_fire_a_row_once() {
    let h = Harness::new();
    let peer = h.peer("dispatcher-b");
    let due = t0() + Duration::minutes(1);
    h.submit(ScheduleRequest::At(due), None, t0()).await;

    let (a, b) = tokio::join!(h.dispatcher.poll_once(due), peer.poll_once(due));
    assert_eq!(a.fired + b.fired, 1);
    assert_eq!(h.placement.placed().len(), 1);
}

#[tokio::test]
async fn cron_rearms_to_the_next_occurrence() {
    let h = Harness::new();
    let start = t0() + Duration::minutes(2);
    let schedule = ScheduleRequest::Cron {
        expression: "*/5 * * * *".to_string(),
        timezone: "UTC".to_string(),
    };
    let (order_id, scheduler_id) = h.submit(schedule, None, start).await;
    let first = t0() + Duration::minutes(5);
    assert_eq!(h.store.get(scheduler_id).await.unwrap().unwrap().next_execution_at, first);

    let now = first + Duration::seconds(20);
    assert_eq!(h.dispatcher.poll_once(now).await.fired, 1);
    let scheduler = h.store.get(scheduler_id).await.unwrap().unwrap();
    assert_eq!(scheduler.status, SchedulerStatus::Active);
    assert!(scheduler.next_execution_at > now);
    assert_eq!(scheduler.next_execution_at, t0() + Duration::minutes(10));
    assert_eq!(h.order_status(order_id).await, OrderStatus::Executing);

    assert_eq!(h.dispatcher.poll_once(t0() + Duration::minutes(7)).await.fired, 0);
    assert_eq!(h.dispatcher.poll_once(t0() + Duration::minutes(10)).await.fired, 1);

    let scheduler = h.store.get(scheduler_id).await.unwrap().unwrap();
    assert_eq!(scheduler.fire_count, 2);
    let ids: Vec<_> = h.placement.placed().into_iter().map(|p| p.client_order_id).collect();
    assert_eq!(
        ids,
        vec![format!("sched-{}-0", scheduler_id), format!("sched-{}-1", scheduler_id)]
    );

    // stopping a running schedule cancels the order too
    let outcome = h.dispatcher.cancel(scheduler_id, t0() + Duration::minutes(11)).await.unwrap();
    assert_eq!(outcome, CancelOutcome::Cancelled);
    assert_eq!(h.order_status(order_id).await, OrderStatus::Cancelled);
    assert_eq!(h.dispatcher.poll_once(t0() + Duration::minutes(15)).await.due, 0);
}

#[tokio::test]
async fn cancel_waits_for_claimed_rows() {
    let h = Harness::new();
    let due = t0() + Duration::minutes(1);
    let (order_id, scheduler_id) = h.submit(ScheduleRequest::At(due), None, t0()).await;

    assert!(h
        .store
        .try_claim(scheduler_id, due, "dispatcher-b", due + Duration::minutes(2))
        .await
        .unwrap());
    assert_eq!(
        h.dispatcher.cancel(scheduler_id, due).await.unwrap(),
        CancelOutcome::Executing
    );
    assert_eq!(h.order_status(order_id).await, OrderStatus::Pending);

    h.store.release_claim(scheduler_id, "dispatcher-b").await.unwrap();
    assert_eq!(
        h.dispatcher.cancel(scheduler_id, due).await.unwrap(),
        CancelOutcome::Cancelled
    );
    assert_eq!(h.scheduler_status(scheduler_id).await, SchedulerStatus::Cancelled);
    assert_eq!(h.order_status(order_id).await, OrderStatus::Cancelled);

    assert_eq!(h.dispatcher.poll_once(due + Duration::minutes(5)).await.fired, 0);
    assert!(h.placement.placed().is_empty());
}

#[tokio::test]
async fn expired_lease_is_reclaimed() {
    let h = Harness::new();
    let due = t0() + Duration::minutes(1);
    let (order_id, scheduler_id) = h.submit(ScheduleRequest::At(due), None, t0()).await;

    // a dispatcher that claimed the row and died
    h.store
        .try_claim(scheduler_id, due, "crashed", due + Duration::minutes(2))
        .await
        .unwrap();

    let held = h.dispatcher.poll_once(due + Duration::minutes(1)).await;
    assert_eq!(held.due, 0);

    let reclaimed = h.dispatcher.poll_once(due + Duration::minutes(3)).await;
    assert_eq!(reclaimed.fired, 1);
    assert_eq!(
        h.placement.placed()[0].client_order_id,
        format!("sched-{}-0", scheduler_id)
    );
    assert_eq!(h.order_status(order_id).await, OrderStatus::Executed);
}

#[tokio::test]
async fn single_shot_advance_fires_once_when_crossed() {
    let h = Harness::new();
    let condition = AdvanceCondition {
        metric: MarketMetric::Volume,
        direction: CrossDirection::Above,
        threshold: 1_000_000.0,
        single_shot: true,
    };
    let (order_id, scheduler_id) = h.submit(ScheduleRequest::Advance(condition), None, t0()).await;

    h.market.set_figure(500_000.0);
    let quiet = h.dispatcher.poll_once(t0()).await;
    assert_eq!(quiet.released, 1);
    assert_eq!(h.scheduler_status(scheduler_id).await, SchedulerStatus::Active);
    assert_eq!(h.order_status(order_id).await, OrderStatus::Pending);

    h.market.set_figure(1_200_000.0);
    assert_eq!(h.dispatcher.poll_once(t0() + Duration::seconds(5)).await.fired, 1);
    assert_eq!(h.scheduler_status(scheduler_id).await, SchedulerStatus::Executed);
    assert_eq!(h.order_status(order_id).await, OrderStatus::Executed);

    assert_eq!(h.dispatcher.poll_once(t0() + Duration::minutes(5)).await.due, 0);
}

#[tokio::test]
async fn repeating_advance_rearms_after_cooldown() {
    let h = Harness::new();
    let condition = AdvanceCondition {
        metric: MarketMetric::OpenInterest,
        direction: CrossDirection::Below,
        threshold: 10_000.0,
        single_shot: false,
    };
    let (order_id, scheduler_id) = h.submit(ScheduleRequest::Advance(condition), None, t0()).await;
    h.market.set_figure(9_000.0);

    assert_eq!(h.dispatcher.poll_once(t0()).await.fired, 1);
    let scheduler = h.store.get(scheduler_id).await.unwrap().unwrap();
    assert_eq!(scheduler.status, SchedulerStatus::Active);
    assert_eq!(scheduler.next_execution_at, t0() + Duration::seconds(60));
    assert_eq!(h.order_status(order_id).await, OrderStatus::Executing);

    assert_eq!(h.dispatcher.poll_once(t0() + Duration::seconds(30)).await.fired, 0);
    assert_eq!(h.dispatcher.poll_once(t0() + Duration::seconds(60)).await.fired, 1);
    assert_eq!(h.placement.placed().len(), 2);
}

#[tokio::test]
async fn market_outage_releases_and_retries() {
    let h = Harness::new();
    let due = t0() + Duration::minutes(1);
    let (order_id, scheduler_id) = h.submit(ScheduleRequest::At(due), None, t0()).await;

    h.market.down.store(true, Ordering::SeqCst);
    let report = h.dispatcher.poll_once(due).await;
    assert_eq!(report.released, 1);
    assert_eq!(h.scheduler_status(scheduler_id).await, SchedulerStatus::Active);
    assert_eq!(h.order_status(order_id).await, OrderStatus::Pending);

    h.market.down.store(false, Ordering::SeqCst);
    assert_eq!(h.dispatcher.poll_once(due + Duration::seconds(5)).await.fired, 1);
    assert_eq!(h.order_status(order_id).await, OrderStatus::Executed);
}

#[tokio::test]
async fn unpriceable_order_fails_without_placing() {
    let h = Harness::new();
    *h.market.price.lock().unwrap() = 0.0;
    let due = t0() + Duration::minutes(1);
    let (order_id, scheduler_id) = h.submit(ScheduleRequest::At(due), None, t0()).await;

    assert_eq!(h.dispatcher.poll_once(due).await.failed, 1);
    assert_eq!(h.scheduler_status(scheduler_id).await, SchedulerStatus::Failed);
    assert_eq!(h.order_status(order_id).await, OrderStatus::Failed);
    assert_eq!(h.placement.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancelled_order_closes_its_scheduler() {
    let h = Harness::new();
    let due = t0() + Duration::minutes(1);
    let (order_id, scheduler_id) = h.submit(ScheduleRequest::At(due), None, t0()).await;

    assert!(h
        .store
        .update_order_status(order_id, OrderStatus::Pending, OrderStatus::Cancelled, None)
        .await
        .unwrap());

    let report = h.dispatcher.poll_once(due).await;
    assert_eq!(report.cancelled, 1);
    assert_eq!(h.scheduler_status(scheduler_id).await, SchedulerStatus::Cancelled);
    assert!(h.placement.placed().is_empty());
}

#[tokio::test]
async fn immediate_order_executes_without_scheduler() {
    let h = Harness::new();
    let (order_id, scheduler_id) = h.submit(ScheduleRequest::Immediate, None, t0()).await;
    assert_eq!(scheduler_id, 0);

    let order = h.dispatcher.execute_now(order_id, t0()).await.unwrap();
    assert_eq!(order.status, OrderStatus::Executed);
    assert_eq!(order.external_txn_hash, Some(format!("0xhash-order-{}", order_id)));

    // a second run is refused
    assert!(h.dispatcher.execute_now(order_id, t0()).await.is_err());
    assert_eq!(h.placement.placed().len(), 1);
}

#[tokio::test]
async fn pending_immediate_order_runs_after_restart() {
    let h = Harness::new();
    // accepted, then the process died before execute_now
    let (order_id, _) = h.submit(ScheduleRequest::Immediate, None, t0()).await;

    // polling never sees it
    assert_eq!(h.dispatcher.poll_once(t0() + Duration::seconds(5)).await.due, 0);
    assert_eq!(h.order_status(order_id).await, OrderStatus::Pending);

    let restarted = h.peer("dispatcher-b");
    let order = restarted.execute_now(order_id, t0() + Duration::seconds(10)).await.unwrap();
    assert_eq!(order.status, OrderStatus::Executed);
    assert_eq!(h.placement.placed().len(), 1);
}

/// Venue that takes `delay` per order and records, for each placement, the
/// claim expiry next to the time the placement finished
struct SlowVenue {
    store: Arc<InMemoryStore>,
    poll_now: DateTime<Utc>,
    started: std::time::Instant,
    delay: std::time::Duration,
    seen: Mutex<Vec<(String, DateTime<Utc>, DateTime<Utc>)>>,
}

#[async_trait]
impl OrderPlacementClient for SlowVenue {
    async fn place(&self, request: &PlacementRequest) -> EngineResult<PlacementReceipt> {
        tokio::time::sleep(self.delay).await;
        let finished = self.poll_now + Duration::from_std(self.started.elapsed()).unwrap();

        let scheduler_id: u64 = request.client_order_id.split('-').nth(1).unwrap().parse().unwrap();
        let lease = self.store.get(scheduler_id).await.unwrap().unwrap().lease.unwrap();
        self.seen
            .lock()
            .unwrap()
            .push((request.client_order_id.clone(), lease.expires_at, finished));

        Ok(PlacementReceipt {
            txn_hash: format!("0xslow-{}", request.client_order_id),
        })
    }
}

#[tokio::test]
async fn late_rows_in_a_batch_get_a_full_lease() {
    let poll_now = t0() + Duration::minutes(1);
    let (stores, store) = Stores::in_memory();
    let venue = Arc::new(SlowVenue {
        store: store.clone(),
        poll_now,
        started: std::time::Instant::now(),
        delay: std::time::Duration::from_millis(600),
        seen: Mutex::new(Vec::new()),
    });

    let mut settings = settings("dispatcher-a");
    settings.worker_concurrency = 1;
    settings.lease = std::time::Duration::from_secs(1);
    settings.placement_timeout = std::time::Duration::from_secs(5);
    settings.retry.max_attempts = 1;

    let intake = OrderIntake::new(stores.orders.clone(), settings.clone());
    for _ in 0..3 {
        intake
            .submit(
                OrderRequest {
                    user_address: "0xfeed".to_string(),
                    side: OrderSide::Short,
                    asset: "BTC".to_string(),
                    usdc_size: dec!(50),
                    leverage: 1,
                    slippage: None,
                    twap: None,
                    schedule: ScheduleRequest::At(poll_now),
                },
                t0(),
            )
            .await
            .unwrap();
    }

    let dispatcher = Dispatcher::new(stores, venue.clone(), Arc::new(FakeMarket::new()), settings);
    let report = dispatcher.poll_once(poll_now).await;
    assert_eq!(report.fired, 3);

    let seen = venue.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 3);
    for (client_order_id, expires_at, finished) in seen {
        // the row was still ours while the venue worked on it
        assert!(
            expires_at > finished,
            "{} lease ended at {} but placement finished at {}",
            client_order_id,
            expires_at,
            finished
        );
    }
}

#[tokio::test]
async fn run_loop_fires_and_stops_on_shutdown() {
    let h = Harness::new();
    let mut settings = settings("dispatcher-a");
    settings.poll_interval = std::time::Duration::from_millis(10);
    let dispatcher = Arc::new(Dispatcher::new(
        h.stores.clone(),
        h.placement.clone(),
        h.market.clone(),
        settings,
    ));
    let now = Utc::now();
    let (order_id, _) = h.submit(ScheduleRequest::At(now), None, now).await;

    // the loop runs as a background task, as the binary does
    let (tx, rx) = tokio::sync::watch::channel(false);
    let runner = Arc::clone(&dispatcher);
    let handle = tokio::spawn(async move { runner.run(rx).await });

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    tx.send(true).unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .expect("run loop did not stop")
        .unwrap();

    assert_eq!(h.order_status(order_id).await, OrderStatus::Executed);
}
