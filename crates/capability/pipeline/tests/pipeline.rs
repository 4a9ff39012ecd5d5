use chrono::{DateTime, Duration, TimeZone, Utc};
use domain::{AccountStatus, CalcMode, ConsumptionStatus, DeductionStatus};
use prepay_filestore::FileStore;
use prepay_pipeline::{
    BillingError, BillingPipeline, CachedRateResolver, Generation, PipelineConfig, ProcessOutcome,
    RateResolver, StoreRateResolver, UnbilledReason,
};
use prepay_protocol::encode_frame;
use prepay_storage::{
    AccountRecord, BillingStore, BillingTx, InMemoryBillingStore, MeterRecord, RateRecord,
};
use prepay_wal::{WalConfig, WalStatus, WriteAheadLog};
use rust_decimal::Decimal;
use std::sync::Arc;
use tempfile::TempDir;

const DEVICE: &str = "collector-01";
const SUB: u8 = 3;
const METER: i64 = 1;
const ACCOUNT: i64 = 100;
const RATE: i64 = 7;

struct Harness {
    store: InMemoryBillingStore,
    wal: Arc<WriteAheadLog>,
    files: Arc<FileStore>,
    pipeline: Arc<BillingPipeline>,
    _dir: TempDir,
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
}

fn meter(current: Decimal) -> MeterRecord {
    MeterRecord {
        meter_id: METER,
        meter_no: "M-001".to_string(),
        comm_addr: format!("{DEVICE}:{SUB}"),
        current_reading: current,
        multiplier: Decimal::ONE,
        rate_id: Some(RATE),
        account_id: Some(ACCOUNT),
        online_status: false,
        last_collect_at: None,
        merchant_id: Some(9),
        merchant_name: Some("Market Hall".to_string()),
        shop_id: Some(12),
        shop_name: Some("Stall 12".to_string()),
    }
}

fn account(balance: Decimal, status: AccountStatus) -> AccountRecord {
    AccountRecord {
        account_id: ACCOUNT,
        account_name: "Stall 12 prepaid".to_string(),
        balance,
        total_consumption: Decimal::ZERO,
        status,
    }
}

fn fixed_rate(price: Decimal) -> RateRecord {
    RateRecord {
        rate_id: RATE,
        rate_name: "commercial flat".to_string(),
        calc_mode: CalcMode::Fixed,
        unit_price: price,
        tou_bands: Vec::new(),
        service_fees: Vec::new(),
    }
}

/// 读保持寄存器应答：两个寄存器承载 value × 100
fn frame(address: u8, hundredths: u32) -> Vec<u8> {
    let hi = (hundredths >> 16) as u16;
    let lo = (hundredths & 0xFFFF) as u16;
    let payload = [
        4,
        (hi >> 8) as u8,
        (hi & 0xFF) as u8,
        (lo >> 8) as u8,
        (lo & 0xFF) as u8,
    ];
    encode_frame(address, 0x03, &payload)
}

fn harness_with(store: InMemoryBillingStore, config: PipelineConfig, default_rate: Option<i64>) -> Harness {
    let dir = TempDir::new().unwrap();
    let wal = Arc::new(WriteAheadLog::open(WalConfig::new(dir.path().join("wal"))).unwrap());
    let files = Arc::new(FileStore::open(dir.path().join("store")).unwrap());
    let shared: Arc<dyn BillingStore> = Arc::new(store.clone());
    let rates: Arc<dyn RateResolver> = Arc::new(StoreRateResolver::new(shared.clone(), default_rate));
    let pipeline = Arc::new(BillingPipeline::new(
        shared,
        rates,
        wal.clone(),
        files.clone(),
        config,
    ));
    Harness {
        store,
        wal,
        files,
        pipeline,
        _dir: dir,
    }
}

/// 电表 M1：当前读数 100.00（T0 已有读数），费率 0.60，账户余额 1.00
fn scenario_harness() -> Harness {
    let store = InMemoryBillingStore::new();
    store.insert_meter(meter(Decimal::new(10_000, 2)));
    store.insert_account(account(Decimal::new(100, 2), AccountStatus::Normal));
    store.insert_rate(fixed_rate(Decimal::new(60, 2)));
    store.insert_reading(METER, Decimal::new(10_000, 2), t0());
    harness_with(store, PipelineConfig::default(), None)
}

#[tokio::test]
async fn partial_deduction_scenario() {
    let h = scenario_harness();
    let t1 = t0() + Duration::minutes(15);

    let outcome = h
        .pipeline
        .process_reading(DEVICE, SUB, &frame(SUB, 10_250), t1)
        .await
        .expect("process reading");

    let ProcessOutcome::Deducted(summary) = outcome else {
        panic!("expected deduction, got {outcome:?}");
    };
    assert_eq!(summary.consumption, Decimal::new(250, 2));
    assert_eq!(summary.amount, Decimal::new(150, 2));
    assert_eq!(summary.status, DeductionStatus::Partial);
    assert_eq!(summary.balance_before, Decimal::new(100, 2));
    assert_eq!(summary.balance_after, Decimal::new(-50, 2));
    assert_eq!(summary.account_status, AccountStatus::Arrears);

    let account = h.store.account(ACCOUNT).unwrap();
    assert_eq!(account.balance, Decimal::new(-50, 2));
    assert_eq!(account.status, AccountStatus::Arrears);
    assert_eq!(account.total_consumption, Decimal::new(250, 2));

    let meter = h.store.meter(METER).unwrap();
    assert_eq!(meter.current_reading, Decimal::new(10_250, 2));
    assert!(meter.online_status);
    assert_eq!(meter.last_collect_at, Some(t1));

    let consumptions = h.store.consumptions(METER);
    assert_eq!(consumptions.len(), 1);
    assert_eq!(consumptions[0].status, ConsumptionStatus::Deducted);

    let deductions = h.store.deductions();
    assert_eq!(deductions.len(), 1);
    assert_eq!(deductions[0].merchant_name.as_deref(), Some("Market Hall"));
    assert_eq!(deductions[0].rate_name, "commercial flat");
    assert_eq!(deductions[0].unit_price, Decimal::new(60, 2));

    // WAL：读数与扣费两条，均已完成
    let entries = h.wal.entries().unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.status == WalStatus::Completed));

    // 文件备份
    let readings = h.files.read_readings(t1.date_naive(), t1.date_naive()).unwrap();
    assert_eq!(readings.len(), 1);
    assert_eq!(readings[0].value, Decimal::new(10_250, 2));
    let today = Utc::now().date_naive();
    let backed_up = h
        .files
        .read_deductions(today - Duration::days(1), today + Duration::days(1))
        .unwrap();
    assert_eq!(backed_up.len(), 1);
    assert_eq!(backed_up[0].deduction_no, summary.deduction_no);
    assert_eq!(backed_up[0].balance_after, Decimal::new(-50, 2));
}

#[tokio::test]
async fn lower_reading_is_rejected_without_wal() {
    let h = scenario_harness();
    h.pipeline
        .process_reading(DEVICE, SUB, &frame(SUB, 10_250), t0() + Duration::minutes(15))
        .await
        .unwrap();
    let wal_before = h.wal.entries().unwrap().len();

    let err = h
        .pipeline
        .process_reading(DEVICE, SUB, &frame(SUB, 10_100), t0() + Duration::minutes(30))
        .await
        .expect_err("lower reading");
    assert!(matches!(err, BillingError::ReadingTooLow { .. }));

    assert_eq!(h.store.readings(METER).len(), 2);
    assert_eq!(h.wal.entries().unwrap().len(), wal_before);
    assert_eq!(
        h.store.meter(METER).unwrap().current_reading,
        Decimal::new(10_250, 2)
    );
}

#[tokio::test]
async fn exact_duplicate_is_rejected() {
    let h = scenario_harness();
    let at = t0() + Duration::minutes(15);
    let bytes = frame(SUB, 10_250);
    h.pipeline
        .process_reading(DEVICE, SUB, &bytes, at)
        .await
        .unwrap();
    let err = h
        .pipeline
        .process_reading(DEVICE, SUB, &bytes, at)
        .await
        .expect_err("duplicate");
    assert!(matches!(err, BillingError::ReadingTooLow { .. }));
    assert_eq!(h.store.deductions().len(), 1);
}

#[tokio::test]
async fn first_reading_creates_no_consumption() {
    let store = InMemoryBillingStore::new();
    store.insert_meter(meter(Decimal::ZERO));
    store.insert_account(account(Decimal::TEN, AccountStatus::Normal));
    store.insert_rate(fixed_rate(Decimal::ONE));
    let h = harness_with(store, PipelineConfig::default(), None);

    let outcome = h
        .pipeline
        .process_reading(DEVICE, SUB, &frame(SUB, 5_000), t0())
        .await
        .unwrap();
    assert!(matches!(outcome, ProcessOutcome::FirstReading { meter_id: METER, .. }));
    assert_eq!(h.store.readings(METER).len(), 1);
    assert!(h.store.consumptions(METER).is_empty());
    assert!(h.store.deductions().is_empty());
    assert_eq!(h.store.meter(METER).unwrap().current_reading, Decimal::new(50, 0));
    assert_eq!(h.store.account(ACCOUNT).unwrap().balance, Decimal::TEN);
    assert!(h.wal.pending_entries().unwrap().is_empty());
}

#[tokio::test]
async fn missing_rate_leaves_consumption_pending() {
    let store = InMemoryBillingStore::new();
    let mut unrated = meter(Decimal::new(10_000, 2));
    unrated.rate_id = None;
    store.insert_meter(unrated);
    store.insert_account(account(Decimal::TEN, AccountStatus::Normal));
    store.insert_reading(METER, Decimal::new(10_000, 2), t0());
    let h = harness_with(store, PipelineConfig::default(), None);

    let outcome = h
        .pipeline
        .process_reading(DEVICE, SUB, &frame(SUB, 10_500), t0() + Duration::hours(1))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        ProcessOutcome::Unbilled {
            reason: UnbilledReason::NoRate,
            ..
        }
    ));
    let consumptions = h.store.consumptions(METER);
    assert_eq!(consumptions.len(), 1);
    assert_eq!(consumptions[0].status, ConsumptionStatus::Pending);
    assert_eq!(consumptions[0].consumption, Decimal::new(500, 2));
    assert_eq!(h.store.account(ACCOUNT).unwrap().balance, Decimal::TEN);
}

#[tokio::test]
async fn default_rate_applies_when_meter_has_none() {
    let store = InMemoryBillingStore::new();
    let mut unrated = meter(Decimal::new(10_000, 2));
    unrated.rate_id = None;
    store.insert_meter(unrated);
    store.insert_account(account(Decimal::TEN, AccountStatus::Normal));
    store.insert_rate(fixed_rate(Decimal::ONE));
    store.insert_reading(METER, Decimal::new(10_000, 2), t0());
    let h = harness_with(store, PipelineConfig::default(), Some(RATE));

    let outcome = h
        .pipeline
        .process_reading(DEVICE, SUB, &frame(SUB, 10_300), t0() + Duration::hours(1))
        .await
        .unwrap();
    let ProcessOutcome::Deducted(summary) = outcome else {
        panic!("expected deduction");
    };
    assert_eq!(summary.status, DeductionStatus::Success);
    assert_eq!(summary.balance_after, Decimal::new(7, 0));
    assert_eq!(summary.account_status, AccountStatus::Normal);
}

#[tokio::test]
async fn missing_account_leaves_consumption_pending() {
    let store = InMemoryBillingStore::new();
    let mut orphan = meter(Decimal::new(10_000, 2));
    orphan.account_id = None;
    store.insert_meter(orphan);
    store.insert_rate(fixed_rate(Decimal::ONE));
    store.insert_reading(METER, Decimal::new(10_000, 2), t0());
    let h = harness_with(store, PipelineConfig::default(), None);

    let outcome = h
        .pipeline
        .process_reading(DEVICE, SUB, &frame(SUB, 10_100), t0() + Duration::hours(1))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        ProcessOutcome::Unbilled {
            reason: UnbilledReason::NoAccount,
            ..
        }
    ));
    assert_eq!(
        h.store.consumptions(METER)[0].status,
        ConsumptionStatus::Pending
    );
}

#[tokio::test]
async fn frozen_account_is_charged_but_stays_frozen() {
    let store = InMemoryBillingStore::new();
    store.insert_meter(meter(Decimal::new(10_000, 2)));
    store.insert_account(account(Decimal::ZERO, AccountStatus::Frozen));
    store.insert_rate(fixed_rate(Decimal::ONE));
    store.insert_reading(METER, Decimal::new(10_000, 2), t0());
    let h = harness_with(store, PipelineConfig::default(), None);

    let outcome = h
        .pipeline
        .process_reading(DEVICE, SUB, &frame(SUB, 10_200), t0() + Duration::hours(1))
        .await
        .unwrap();
    let ProcessOutcome::Deducted(summary) = outcome else {
        panic!("expected deduction");
    };
    assert_eq!(summary.status, DeductionStatus::Failed);
    assert_eq!(summary.balance_after, Decimal::new(-2, 0));
    let account = h.store.account(ACCOUNT).unwrap();
    assert_eq!(account.status, AccountStatus::Frozen);
    assert_eq!(account.balance, Decimal::new(-2, 0));
}

#[tokio::test]
async fn undecodable_frame_has_no_side_effects() {
    let h = scenario_harness();
    let mut bytes = frame(SUB, 10_250);
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;

    let err = h
        .pipeline
        .process_reading(DEVICE, SUB, &bytes, t0() + Duration::minutes(15))
        .await
        .expect_err("bad checksum");
    assert!(matches!(err, BillingError::Decode(_)));
    assert!(h.wal.entries().unwrap().is_empty());
    assert_eq!(h.store.readings(METER).len(), 1);
}

#[tokio::test]
async fn unknown_address_is_meter_not_found() {
    let h = scenario_harness();
    let err = h
        .pipeline
        .process_reading("collector-99", 42, &frame(42, 10_250), t0())
        .await
        .expect_err("unknown meter");
    assert!(matches!(err, BillingError::MeterNotFound(addr) if addr == "collector-99:42"));
    assert!(h.wal.entries().unwrap().is_empty());
}

#[tokio::test]
async fn sub_address_fallback_resolves_meter() {
    let store = InMemoryBillingStore::new();
    let mut legacy = meter(Decimal::ZERO);
    legacy.comm_addr = SUB.to_string();
    store.insert_meter(legacy);
    let h = harness_with(store, PipelineConfig::default(), None);

    let outcome = h
        .pipeline
        .process_reading("any-collector", SUB, &frame(SUB, 100), t0())
        .await
        .unwrap();
    assert!(matches!(outcome, ProcessOutcome::FirstReading { .. }));
}

#[tokio::test]
async fn history_behind_current_reading_aborts_as_negative() {
    // 换表后当前读数被重置，但历史读数仍在：新读数低于上一条历史读数
    let store = InMemoryBillingStore::new();
    store.insert_meter(meter(Decimal::new(50, 0)));
    store.insert_account(account(Decimal::TEN, AccountStatus::Normal));
    store.insert_rate(fixed_rate(Decimal::ONE));
    store.insert_reading(METER, Decimal::new(100, 0), t0());
    let h = harness_with(store, PipelineConfig::default(), None);

    let err = h
        .pipeline
        .process_reading(DEVICE, SUB, &frame(SUB, 6_000), t0() + Duration::hours(1))
        .await
        .expect_err("negative consumption");
    assert!(matches!(err, BillingError::ConsumptionNegative { .. }));
    assert_eq!(h.store.readings(METER).len(), 1);
    assert_eq!(h.store.meter(METER).unwrap().current_reading, Decimal::new(50, 0));

    let entries = h.wal.entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, WalStatus::Failed);
    assert!(entries[0].error.is_some());
}

#[tokio::test]
async fn same_timestamp_readings_are_charged_once() {
    let store = InMemoryBillingStore::new();
    store.insert_meter(meter(Decimal::new(10_000, 2)));
    store.insert_account(account(Decimal::new(100, 0), AccountStatus::Normal));
    store.insert_rate(fixed_rate(Decimal::ONE));
    store.insert_reading(METER, Decimal::new(10_000, 2), t0());
    let h = harness_with(store, PipelineConfig::default(), None);

    let at = t0() + Duration::hours(1);
    for hundredths in [10_100, 10_200] {
        h.pipeline
            .process_reading(DEVICE, SUB, &frame(SUB, hundredths), at)
            .await
            .expect("process reading");
    }

    let consumptions = h.store.consumptions(METER);
    assert_eq!(consumptions.len(), 2);
    assert!(
        consumptions
            .iter()
            .any(|c| c.start_value == Decimal::new(10_100, 2) && c.end_value == Decimal::new(10_200, 2))
    );
    let total: Decimal = consumptions.iter().map(|c| c.consumption).sum();
    assert_eq!(total, Decimal::new(200, 2));

    let charged: Decimal = h.store.deductions().iter().map(|d| d.amount).sum();
    assert_eq!(charged, Decimal::new(200, 2));
    assert_eq!(h.store.account(ACCOUNT).unwrap().balance, Decimal::new(9_800, 2));
}

#[tokio::test]
async fn stuck_transaction_times_out_and_marks_wal_failed() {
    let store = InMemoryBillingStore::new();
    store.insert_meter(meter(Decimal::new(10_000, 2)));
    store.insert_reading(METER, Decimal::new(10_000, 2), t0());
    let config = PipelineConfig {
        tx_timeout: std::time::Duration::from_millis(50),
        ..PipelineConfig::default()
    };
    let h = harness_with(store.clone(), config, None);

    let mut holder = store.begin().await.unwrap();
    holder.lock_meter_for_update(METER).await.unwrap();

    let err = h
        .pipeline
        .process_reading(DEVICE, SUB, &frame(SUB, 10_100), t0() + Duration::hours(1))
        .await
        .expect_err("timeout");
    assert!(matches!(err, BillingError::TransactionTimeout(_)));
    holder.rollback().await.unwrap();

    let entries = h.wal.entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, WalStatus::Failed);
    assert_eq!(h.store.readings(METER).len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_readings_keep_current_at_maximum() {
    let store = InMemoryBillingStore::new();
    store.insert_meter(meter(Decimal::new(10_000, 2)));
    store.insert_account(account(Decimal::new(1_000, 0), AccountStatus::Normal));
    store.insert_rate(fixed_rate(Decimal::new(60, 2)));
    store.insert_reading(METER, Decimal::new(10_000, 2), t0());
    let h = harness_with(store, PipelineConfig::default(), None);

    // 读数与采集时间同向递增，交错提交
    let steps: Vec<u32> = vec![7, 2, 9, 4, 1, 8, 3, 10, 6, 5];
    let mut handles = Vec::new();
    for step in steps {
        let pipeline = h.pipeline.clone();
        handles.push(tokio::spawn(async move {
            let at = t0() + Duration::minutes(i64::from(step));
            pipeline
                .process_reading(DEVICE, SUB, &frame(SUB, 10_000 + step * 10), at)
                .await
        }));
    }
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) | Err(BillingError::ReadingTooLow { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    let meter = h.store.meter(METER).unwrap();
    assert_eq!(meter.current_reading, Decimal::new(10_100, 2));

    // 被接受的读数按提交顺序严格递增
    let values: Vec<Decimal> = h
        .store
        .readings(METER)
        .into_iter()
        .map(|reading| reading.value)
        .collect();
    assert!(values.windows(2).all(|pair| pair[0] < pair[1]));

    // 用电量首尾相接：总电量 0.10，总扣费 0.06
    let charged: Decimal = h.store.deductions().iter().map(|d| d.amount).sum();
    let account = h.store.account(ACCOUNT).unwrap();
    assert_eq!(account.balance, Decimal::new(1_000, 0) - charged);
    assert_eq!(charged, Decimal::new(6, 2));
}

#[tokio::test]
async fn cached_resolver_swaps_generations_on_reload() {
    let store = InMemoryBillingStore::new();
    store.insert_rate(fixed_rate(Decimal::new(60, 2)));
    let shared: Arc<dyn BillingStore> = Arc::new(store.clone());
    let resolver = CachedRateResolver::load(shared, None).await.unwrap();
    let first = resolver.active_generation().unwrap();

    let target = meter(Decimal::ZERO);
    let rate = resolver.resolve(&target).await.unwrap().unwrap();
    assert_eq!(rate.unit_price, Decimal::new(60, 2));

    store.insert_rate(fixed_rate(Decimal::new(75, 2)));
    // 重新加载之前仍使用旧代次
    let stale = resolver.resolve(&target).await.unwrap().unwrap();
    assert_eq!(stale.unit_price, Decimal::new(60, 2));

    let second = resolver.reload().await.unwrap();
    assert_ne!(first, second);
    assert!(matches!(second, Generation::A | Generation::B));
    let fresh = resolver.resolve(&target).await.unwrap().unwrap();
    assert_eq!(fresh.unit_price, Decimal::new(75, 2));
}
