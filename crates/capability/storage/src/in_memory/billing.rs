//! 计费内存存储实现

use crate::error::StorageError;
use crate::models::{
    AccountRecord, ConsumptionRecord, DeductionRecord, MeterRecord, NewConsumption, NewReading,
    RateRecord, ReadingRecord,
};
use crate::traits::{BillingStore, BillingTx};
use chrono::{DateTime, Utc};
use domain::{AccountStatus, CollectType, ConsumptionStatus};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};

#[derive(Default)]
struct Tables {
    meters: BTreeMap<i64, MeterRecord>,
    readings: Vec<ReadingRecord>,
    consumptions: BTreeMap<i64, ConsumptionRecord>,
    rates: BTreeMap<i64, RateRecord>,
    accounts: BTreeMap<i64, AccountRecord>,
    deductions: Vec<(i64, DeductionRecord)>,
}

type LockMap = Mutex<HashMap<i64, Arc<RowLock<()>>>>;

struct Shared {
    tables: RwLock<Tables>,
    meter_locks: LockMap,
    account_locks: LockMap,
    next_id: AtomicI64,
    available: AtomicBool,
}

impl Shared {
    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn ensure_available(&self) -> Result<(), StorageError> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StorageError::new("database unavailable"))
        }
    }

    fn tables(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>, StorageError> {
        self.tables
            .read()
            .map_err(|_| StorageError::new("lock failed"))
    }

    fn tables_mut(&self) -> Result<std::sync::RwLockWriteGuard<'_, Tables>, StorageError> {
        self.tables
            .write()
            .map_err(|_| StorageError::new("lock failed"))
    }
}

fn row_lock(locks: &LockMap, id: i64) -> Result<Arc<RowLock<()>>, StorageError> {
    let mut locks = locks.lock().map_err(|_| StorageError::new("lock failed"))?;
    Ok(locks.entry(id).or_default().clone())
}

/// 计费内存存储
///
/// 克隆共享同一份数据。
#[derive(Clone)]
pub struct InMemoryBillingStore {
    shared: Arc<Shared>,
}

impl Default for InMemoryBillingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBillingStore {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: RwLock::new(Tables::default()),
                meter_locks: Mutex::new(HashMap::new()),
                account_locks: Mutex::new(HashMap::new()),
                next_id: AtomicI64::new(1),
                available: AtomicBool::new(true),
            }),
        }
    }

    /// 模拟数据库不可用（测试用）
    pub fn set_available(&self, available: bool) {
        self.shared.available.store(available, Ordering::Release);
    }

    pub fn insert_meter(&self, meter: MeterRecord) {
        if let Ok(mut tables) = self.shared.tables.write() {
            tables.meters.insert(meter.meter_id, meter);
        }
    }

    pub fn insert_account(&self, account: AccountRecord) {
        if let Ok(mut tables) = self.shared.tables.write() {
            tables.accounts.insert(account.account_id, account);
        }
    }

    pub fn insert_rate(&self, rate: RateRecord) {
        if let Ok(mut tables) = self.shared.tables.write() {
            tables.rates.insert(rate.rate_id, rate);
        }
    }

    /// 写入一条历史读数（不更新电表当前读数）
    pub fn insert_reading(&self, meter_id: i64, value: Decimal, at: DateTime<Utc>) -> i64 {
        let reading_id = self.shared.next_id();
        if let Ok(mut tables) = self.shared.tables.write() {
            tables.readings.push(ReadingRecord {
                reading_id,
                meter_id,
                value,
                collect_time: at,
                collect_type: CollectType::Auto,
            });
        }
        reading_id
    }

    pub fn meter(&self, meter_id: i64) -> Option<MeterRecord> {
        self.shared
            .tables
            .read()
            .ok()
            .and_then(|tables| tables.meters.get(&meter_id).cloned())
    }

    pub fn account(&self, account_id: i64) -> Option<AccountRecord> {
        self.shared
            .tables
            .read()
            .ok()
            .and_then(|tables| tables.accounts.get(&account_id).cloned())
    }

    pub fn readings(&self, meter_id: i64) -> Vec<ReadingRecord> {
        self.shared
            .tables
            .read()
            .map(|tables| {
                tables
                    .readings
                    .iter()
                    .filter(|reading| reading.meter_id == meter_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn consumptions(&self, meter_id: i64) -> Vec<ConsumptionRecord> {
        self.shared
            .tables
            .read()
            .map(|tables| {
                tables
                    .consumptions
                    .values()
                    .filter(|consumption| consumption.meter_id == meter_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn deductions(&self) -> Vec<DeductionRecord> {
        self.shared
            .tables
            .read()
            .map(|tables| tables.deductions.iter().map(|(_, d)| d.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl BillingStore for InMemoryBillingStore {
    async fn find_meter_by_comm_addr(
        &self,
        comm_addr: &str,
    ) -> Result<Option<MeterRecord>, StorageError> {
        self.shared.ensure_available()?;
        let tables = self.shared.tables()?;
        Ok(tables
            .meters
            .values()
            .find(|meter| meter.comm_addr == comm_addr)
            .cloned())
    }

    async fn get_applicable_rate(
        &self,
        meter_id: i64,
        default_rate_id: Option<i64>,
    ) -> Result<Option<RateRecord>, StorageError> {
        self.shared.ensure_available()?;
        let tables = self.shared.tables()?;
        let assigned = tables
            .meters
            .get(&meter_id)
            .and_then(|meter| meter.rate_id)
            .and_then(|rate_id| tables.rates.get(&rate_id));
        let rate = assigned.or_else(|| default_rate_id.and_then(|id| tables.rates.get(&id)));
        Ok(rate.cloned())
    }

    async fn list_rates(&self) -> Result<Vec<RateRecord>, StorageError> {
        self.shared.ensure_available()?;
        let tables = self.shared.tables()?;
        Ok(tables.rates.values().cloned().collect())
    }

    async fn begin(&self) -> Result<Box<dyn BillingTx>, StorageError> {
        self.shared.ensure_available()?;
        Ok(Box::new(InMemoryBillingTx {
            shared: self.shared.clone(),
            guards: Vec::new(),
            meters: HashMap::new(),
            readings: Vec::new(),
            consumptions: BTreeMap::new(),
            accounts: HashMap::new(),
            deductions: Vec::new(),
        }))
    }

    async fn reading_exists(
        &self,
        meter_id: i64,
        value: Decimal,
        at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        self.shared.ensure_available()?;
        let tables = self.shared.tables()?;
        Ok(tables.readings.iter().any(|reading| {
            reading.meter_id == meter_id && reading.value == value && reading.collect_time == at
        }))
    }

    async fn deduction_exists(&self, deduction_no: &str) -> Result<bool, StorageError> {
        self.shared.ensure_available()?;
        let tables = self.shared.tables()?;
        Ok(tables
            .deductions
            .iter()
            .any(|(_, deduction)| deduction.deduction_no == deduction_no))
    }

    async fn insert_deduction_direct(&self, record: &DeductionRecord) -> Result<i64, StorageError> {
        self.shared.ensure_available()?;
        let mut tables = self.shared.tables_mut()?;
        ensure_unique_deduction(&tables.deductions, &record.deduction_no)?;
        let deduction_id = self.shared.next_id();
        tables.deductions.push((deduction_id, record.clone()));
        Ok(deduction_id)
    }

    async fn ping(&self) -> Result<(), StorageError> {
        self.shared.ensure_available()
    }
}

fn ensure_unique_deduction(
    existing: &[(i64, DeductionRecord)],
    deduction_no: &str,
) -> Result<(), StorageError> {
    if existing
        .iter()
        .any(|(_, deduction)| deduction.deduction_no == deduction_no)
    {
        return Err(StorageError::new(format!(
            "duplicate deduction_no: {deduction_no}"
        )));
    }
    Ok(())
}

/// 内存事务句柄
///
/// 持有已锁定行的 guard；句柄释放时行锁随之释放。
pub struct InMemoryBillingTx {
    shared: Arc<Shared>,
    guards: Vec<OwnedMutexGuard<()>>,
    meters: HashMap<i64, MeterRecord>,
    readings: Vec<ReadingRecord>,
    consumptions: BTreeMap<i64, ConsumptionRecord>,
    accounts: HashMap<i64, AccountRecord>,
    deductions: Vec<(i64, DeductionRecord)>,
}

#[async_trait::async_trait]
impl BillingTx for InMemoryBillingTx {
    async fn lock_meter_for_update(
        &mut self,
        meter_id: i64,
    ) -> Result<Option<MeterRecord>, StorageError> {
        if let Some(meter) = self.meters.get(&meter_id) {
            return Ok(Some(meter.clone()));
        }
        let lock = row_lock(&self.shared.meter_locks, meter_id)?;
        self.guards.push(lock.lock_owned().await);
        self.shared.ensure_available()?;

        let meter = self.shared.tables()?.meters.get(&meter_id).cloned();
        if let Some(meter) = &meter {
            self.meters.insert(meter_id, meter.clone());
        }
        Ok(meter)
    }

    async fn update_meter_reading(
        &mut self,
        meter_id: i64,
        value: Decimal,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let meter = self
            .meters
            .get_mut(&meter_id)
            .ok_or_else(|| StorageError::new(format!("meter {meter_id} not locked")))?;
        meter.current_reading = value;
        meter.last_collect_at = Some(at);
        meter.online_status = true;
        Ok(())
    }

    async fn create_reading(&mut self, reading: &NewReading) -> Result<ReadingRecord, StorageError> {
        let record = ReadingRecord {
            reading_id: self.shared.next_id(),
            meter_id: reading.meter_id,
            value: reading.value,
            collect_time: reading.collect_time,
            collect_type: reading.collect_type,
        };
        self.readings.push(record.clone());
        Ok(record)
    }

    async fn find_last_reading_before(
        &mut self,
        meter_id: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<ReadingRecord>, StorageError> {
        let tables = self.shared.tables()?;
        Ok(tables
            .readings
            .iter()
            .chain(self.readings.iter())
            .filter(|reading| reading.meter_id == meter_id && reading.collect_time <= at)
            .max_by_key(|reading| (reading.collect_time, reading.reading_id))
            .cloned())
    }

    async fn create_consumption(
        &mut self,
        consumption: &NewConsumption,
    ) -> Result<ConsumptionRecord, StorageError> {
        let record = ConsumptionRecord {
            consumption_id: self.shared.next_id(),
            meter_id: consumption.meter_id,
            start_reading_id: consumption.start_reading_id,
            end_reading_id: consumption.end_reading_id,
            start_value: consumption.start_value,
            end_value: consumption.end_value,
            consumption: consumption.consumption,
            period_start: consumption.period_start,
            period_end: consumption.period_end,
            status: ConsumptionStatus::Pending,
        };
        self.consumptions
            .insert(record.consumption_id, record.clone());
        Ok(record)
    }

    async fn update_consumption_status(
        &mut self,
        consumption_id: i64,
        status: ConsumptionStatus,
    ) -> Result<(), StorageError> {
        if !self.consumptions.contains_key(&consumption_id) {
            let committed = self
                .shared
                .tables()?
                .consumptions
                .get(&consumption_id)
                .cloned()
                .ok_or_else(|| {
                    StorageError::new(format!("consumption {consumption_id} not found"))
                })?;
            self.consumptions.insert(consumption_id, committed);
        }
        if let Some(consumption) = self.consumptions.get_mut(&consumption_id) {
            consumption.status = status;
        }
        Ok(())
    }

    async fn lock_account_for_update(
        &mut self,
        account_id: i64,
    ) -> Result<Option<AccountRecord>, StorageError> {
        if let Some(account) = self.accounts.get(&account_id) {
            return Ok(Some(account.clone()));
        }
        let lock = row_lock(&self.shared.account_locks, account_id)?;
        self.guards.push(lock.lock_owned().await);
        self.shared.ensure_available()?;

        let account = self.shared.tables()?.accounts.get(&account_id).cloned();
        if let Some(account) = &account {
            self.accounts.insert(account_id, account.clone());
        }
        Ok(account)
    }

    async fn update_account_balance(
        &mut self,
        account_id: i64,
        balance: Decimal,
        total_consumption: Decimal,
        status: AccountStatus,
    ) -> Result<(), StorageError> {
        let account = self
            .accounts
            .get_mut(&account_id)
            .ok_or_else(|| StorageError::new(format!("account {account_id} not locked")))?;
        account.balance = balance;
        account.total_consumption = total_consumption;
        account.status = status;
        Ok(())
    }

    async fn create_deduction(&mut self, record: &DeductionRecord) -> Result<i64, StorageError> {
        ensure_unique_deduction(&self.shared.tables()?.deductions, &record.deduction_no)?;
        ensure_unique_deduction(&self.deductions, &record.deduction_no)?;
        let deduction_id = self.shared.next_id();
        self.deductions.push((deduction_id, record.clone()));
        Ok(deduction_id)
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let this = *self;
        this.shared.ensure_available()?;
        let mut tables = this.shared.tables_mut()?;
        for (_, deduction) in &this.deductions {
            ensure_unique_deduction(&tables.deductions, &deduction.deduction_no)?;
        }
        tables.meters.extend(this.meters);
        tables.readings.extend(this.readings);
        tables.consumptions.extend(this.consumptions);
        tables.accounts.extend(this.accounts);
        tables.deductions.extend(this.deductions);
        drop(tables);
        drop(this.guards);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        Ok(())
    }
}
