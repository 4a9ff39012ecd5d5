//! 费率解析与电费计算

use async_trait::async_trait;
use domain::{CalcMode, ServiceFeeKind};
use prepay_storage::{BillingStore, MeterRecord, RateRecord, StorageError};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::info;

/// 分时电费的保留小数位
const TOU_SCALE: u32 = 6;

/// 电费明细
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeBreakdown {
    /// 有效单价（分时模式下为 base_amount / consumption）
    pub unit_price: Decimal,
    pub base_amount: Decimal,
    pub service_amount: Decimal,
    pub total: Decimal,
}

/// 计算电费
///
/// - 固定单价：`consumption × unit_price`，不做舍入
/// - 分时：用电量平均分摊到各时段后按时段单价求和（简化处理，不按实际时段切分）
/// - 服务费仅在 `include_service_fees` 为真时计入
pub fn calculate_fee(
    rate: &RateRecord,
    consumption: Decimal,
    include_service_fees: bool,
) -> FeeBreakdown {
    let (unit_price, base_amount) = match rate.calc_mode {
        CalcMode::TimeOfUse if !rate.tou_bands.is_empty() => {
            let share = consumption / Decimal::from(rate.tou_bands.len());
            let base = rate
                .tou_bands
                .iter()
                .map(|band| band.unit_price * share)
                .sum::<Decimal>()
                .round_dp(TOU_SCALE);
            let unit_price = if consumption.is_zero() {
                Decimal::ZERO
            } else {
                (base / consumption).round_dp(TOU_SCALE)
            };
            (unit_price, base)
        }
        _ => (rate.unit_price, consumption * rate.unit_price),
    };

    let service_amount = if include_service_fees {
        rate.service_fees
            .iter()
            .map(|fee| match fee.kind {
                ServiceFeeKind::Flat => fee.value,
                ServiceFeeKind::Percentage => base_amount * fee.value / Decimal::ONE_HUNDRED,
            })
            .sum()
    } else {
        Decimal::ZERO
    };

    FeeBreakdown {
        unit_price,
        base_amount,
        service_amount,
        total: base_amount + service_amount,
    }
}

/// 费率解析策略
#[async_trait]
pub trait RateResolver: Send + Sync {
    /// 电表自身费率优先，否则默认费率；都没有时返回 None
    async fn resolve(&self, meter: &MeterRecord) -> Result<Option<RateRecord>, StorageError>;
}

/// 每次查询存储的费率解析
pub struct StoreRateResolver {
    store: Arc<dyn BillingStore>,
    default_rate_id: Option<i64>,
}

impl StoreRateResolver {
    pub fn new(store: Arc<dyn BillingStore>, default_rate_id: Option<i64>) -> Self {
        Self {
            store,
            default_rate_id,
        }
    }
}

#[async_trait]
impl RateResolver for StoreRateResolver {
    async fn resolve(&self, meter: &MeterRecord) -> Result<Option<RateRecord>, StorageError> {
        self.store
            .get_applicable_rate(meter.meter_id, self.default_rate_id)
            .await
    }
}

/// 缓存代次
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generation {
    A,
    B,
}

impl Generation {
    fn other(self) -> Self {
        match self {
            Generation::A => Generation::B,
            Generation::B => Generation::A,
        }
    }
}

struct RateTables {
    active: Generation,
    a: HashMap<i64, RateRecord>,
    b: HashMap<i64, RateRecord>,
}

impl RateTables {
    fn slot(&self, generation: Generation) -> &HashMap<i64, RateRecord> {
        match generation {
            Generation::A => &self.a,
            Generation::B => &self.b,
        }
    }

    fn slot_mut(&mut self, generation: Generation) -> &mut HashMap<i64, RateRecord> {
        match generation {
            Generation::A => &mut self.a,
            Generation::B => &mut self.b,
        }
    }
}

/// 双缓冲费率缓存
///
/// `reload()` 把全部费率装入非活动代次后在锁内切换指针；
/// 读取总是使用调用时刻的活动代次。
pub struct CachedRateResolver {
    store: Arc<dyn BillingStore>,
    default_rate_id: Option<i64>,
    tables: RwLock<RateTables>,
}

impl CachedRateResolver {
    /// 创建并完成首次加载
    pub async fn load(
        store: Arc<dyn BillingStore>,
        default_rate_id: Option<i64>,
    ) -> Result<Self, StorageError> {
        let resolver = Self {
            store,
            default_rate_id,
            tables: RwLock::new(RateTables {
                active: Generation::B,
                a: HashMap::new(),
                b: HashMap::new(),
            }),
        };
        resolver.reload().await?;
        Ok(resolver)
    }

    /// 重新加载费率并切换代次，返回新的活动代次
    pub async fn reload(&self) -> Result<Generation, StorageError> {
        let rates = self.store.list_rates().await?;
        let count = rates.len();
        let mut tables = self
            .tables
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let next = tables.active.other();
        let slot = tables.slot_mut(next);
        slot.clear();
        slot.extend(rates.into_iter().map(|rate| (rate.rate_id, rate)));
        tables.active = next;
        drop(tables);
        info!(target: "prepay.billing", generation = ?next, rates = count, "rate_cache_reloaded");
        Ok(next)
    }

    pub fn active_generation(&self) -> Option<Generation> {
        self.tables.read().ok().map(|tables| tables.active)
    }
}

#[async_trait]
impl RateResolver for CachedRateResolver {
    async fn resolve(&self, meter: &MeterRecord) -> Result<Option<RateRecord>, StorageError> {
        let tables = self
            .tables
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        let active = tables.slot(tables.active);
        let rate = meter
            .rate_id
            .and_then(|id| active.get(&id))
            .or_else(|| self.default_rate_id.and_then(|id| active.get(&id)));
        Ok(rate.cloned())
    }
}
