//! Postgres 计费存储实现

use crate::error::StorageError;
use crate::models::{
    AccountRecord, ConsumptionRecord, DeductionRecord, MeterRecord, NewConsumption, NewReading,
    RateRecord, ReadingRecord, ServiceFee, TouBand,
};
use crate::traits::{BillingStore, BillingTx};
use chrono::{DateTime, Utc};
use domain::{AccountStatus, ConsumptionStatus};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};

const METER_COLUMNS: &str = "m.meter_id, m.meter_no, m.comm_addr, m.current_reading, m.multiplier, \
     m.rate_id, m.account_id, m.online_status, m.last_collect_at, \
     s.merchant_id, mc.merchant_name, m.shop_id, s.shop_name";

const METER_JOINS: &str = "from meters m \
     left join shops s on s.shop_id = m.shop_id \
     left join merchants mc on mc.merchant_id = s.merchant_id";

const READING_COLUMNS: &str = "reading_id, meter_id, value, collect_time, collect_type";

pub struct PgBillingStore {
    pub pool: PgPool,
}

impl PgBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = crate::connection::connect_pool(database_url).await?;
        Ok(Self { pool })
    }

    async fn find_rate(&self, rate_id: i64) -> Result<Option<RateRecord>, StorageError> {
        let row = sqlx::query(
            "select rate_id, rate_name, calc_mode, unit_price from rates where rate_id = $1",
        )
        .bind(rate_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(self.load_rate(&row).await?)),
            None => Ok(None),
        }
    }

    async fn load_rate(&self, row: &PgRow) -> Result<RateRecord, StorageError> {
        let rate_id: i64 = row.try_get("rate_id")?;
        let calc_mode: String = row.try_get("calc_mode")?;

        let tou_bands = sqlx::query(
            "select band_name, start_time, end_time, unit_price from rate_tou_bands \
             where rate_id = $1 order by start_time, band_id",
        )
        .bind(rate_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|band| -> Result<TouBand, StorageError> {
            Ok(TouBand {
                name: band.try_get("band_name")?,
                start_time: band.try_get("start_time")?,
                end_time: band.try_get("end_time")?,
                unit_price: band.try_get("unit_price")?,
            })
        })
        .collect::<Result<Vec<_>, StorageError>>()?;

        let service_fees = sqlx::query(
            "select fee_name, fee_kind, value from rate_service_fees \
             where rate_id = $1 order by fee_id",
        )
        .bind(rate_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|fee| -> Result<ServiceFee, StorageError> {
            let kind: String = fee.try_get("fee_kind")?;
            Ok(ServiceFee {
                name: fee.try_get("fee_name")?,
                kind: kind.parse()?,
                value: fee.try_get("value")?,
            })
        })
        .collect::<Result<Vec<_>, StorageError>>()?;

        Ok(RateRecord {
            rate_id,
            rate_name: row.try_get("rate_name")?,
            calc_mode: calc_mode.parse()?,
            unit_price: row.try_get("unit_price")?,
            tou_bands,
            service_fees,
        })
    }
}

fn meter_from_row(row: &PgRow) -> Result<MeterRecord, StorageError> {
    Ok(MeterRecord {
        meter_id: row.try_get("meter_id")?,
        meter_no: row.try_get("meter_no")?,
        comm_addr: row.try_get("comm_addr")?,
        current_reading: row.try_get("current_reading")?,
        multiplier: row.try_get("multiplier")?,
        rate_id: row.try_get("rate_id")?,
        account_id: row.try_get("account_id")?,
        online_status: row.try_get("online_status")?,
        last_collect_at: row.try_get("last_collect_at")?,
        merchant_id: row.try_get("merchant_id")?,
        merchant_name: row.try_get("merchant_name")?,
        shop_id: row.try_get("shop_id")?,
        shop_name: row.try_get("shop_name")?,
    })
}

fn reading_from_row(row: &PgRow) -> Result<ReadingRecord, StorageError> {
    let collect_type: String = row.try_get("collect_type")?;
    Ok(ReadingRecord {
        reading_id: row.try_get("reading_id")?,
        meter_id: row.try_get("meter_id")?,
        value: row.try_get("value")?,
        collect_time: row.try_get("collect_time")?,
        collect_type: collect_type.parse()?,
    })
}

const INSERT_DEDUCTION: &str = "insert into deductions (deduction_no, consumption_id, meter_id, meter_no, \
     account_id, account_name, merchant_id, merchant_name, shop_id, shop_name, rate_id, rate_name, \
     consumption, unit_price, base_amount, service_amount, amount, balance_before, balance_after, \
     status, deduction_time, remark) \
     values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, \
     $20, $21, $22) returning deduction_id";

fn bind_deduction<'q>(
    query: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
    record: &'q DeductionRecord,
) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
    query
        .bind(&record.deduction_no)
        .bind(record.consumption_id)
        .bind(record.meter_id)
        .bind(&record.meter_no)
        .bind(record.account_id)
        .bind(&record.account_name)
        .bind(record.merchant_id)
        .bind(&record.merchant_name)
        .bind(record.shop_id)
        .bind(&record.shop_name)
        .bind(record.rate_id)
        .bind(&record.rate_name)
        .bind(record.consumption)
        .bind(record.unit_price)
        .bind(record.base_amount)
        .bind(record.service_amount)
        .bind(record.amount)
        .bind(record.balance_before)
        .bind(record.balance_after)
        .bind(record.status.as_str())
        .bind(record.deduction_time)
        .bind(&record.remark)
}

#[async_trait::async_trait]
impl BillingStore for PgBillingStore {
    async fn find_meter_by_comm_addr(
        &self,
        comm_addr: &str,
    ) -> Result<Option<MeterRecord>, StorageError> {
        let sql = format!("select {METER_COLUMNS} {METER_JOINS} where m.comm_addr = $1");
        let row = sqlx::query(&sql)
            .bind(comm_addr)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(meter_from_row).transpose()
    }

    async fn get_applicable_rate(
        &self,
        meter_id: i64,
        default_rate_id: Option<i64>,
    ) -> Result<Option<RateRecord>, StorageError> {
        let meter_rate =
            sqlx::query_scalar::<_, Option<i64>>("select rate_id from meters where meter_id = $1")
                .bind(meter_id)
                .fetch_optional(&self.pool)
                .await?
                .flatten();
        if let Some(rate_id) = meter_rate {
            if let Some(rate) = self.find_rate(rate_id).await? {
                return Ok(Some(rate));
            }
        }
        match default_rate_id {
            Some(rate_id) => self.find_rate(rate_id).await,
            None => Ok(None),
        }
    }

    async fn list_rates(&self) -> Result<Vec<RateRecord>, StorageError> {
        let rows = sqlx::query(
            "select rate_id, rate_name, calc_mode, unit_price from rates order by rate_id",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut rates = Vec::with_capacity(rows.len());
        for row in &rows {
            rates.push(self.load_rate(row).await?);
        }
        Ok(rates)
    }

    async fn begin(&self) -> Result<Box<dyn BillingTx>, StorageError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgBillingTx { tx }))
    }

    async fn reading_exists(
        &self,
        meter_id: i64,
        value: Decimal,
        at: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        let exists: bool = sqlx::query_scalar(
            "select exists(select 1 from readings \
             where meter_id = $1 and value = $2 and collect_time = $3)",
        )
        .bind(meter_id)
        .bind(value)
        .bind(at)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn deduction_exists(&self, deduction_no: &str) -> Result<bool, StorageError> {
        let exists: bool = sqlx::query_scalar(
            "select exists(select 1 from deductions where deduction_no = $1)",
        )
        .bind(deduction_no)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn insert_deduction_direct(&self, record: &DeductionRecord) -> Result<i64, StorageError> {
        let id: i64 = bind_deduction(sqlx::query(INSERT_DEDUCTION), record)
            .fetch_one(&self.pool)
            .await?
            .try_get("deduction_id")?;
        Ok(id)
    }

    async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("select 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Postgres 事务句柄
///
/// 丢弃时 sqlx 自动回滚未提交的事务。
pub struct PgBillingTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait::async_trait]
impl BillingTx for PgBillingTx {
    async fn lock_meter_for_update(
        &mut self,
        meter_id: i64,
    ) -> Result<Option<MeterRecord>, StorageError> {
        let sql = format!(
            "select {METER_COLUMNS} {METER_JOINS} where m.meter_id = $1 for update of m"
        );
        let row = sqlx::query(&sql)
            .bind(meter_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(meter_from_row).transpose()
    }

    async fn update_meter_reading(
        &mut self,
        meter_id: i64,
        value: Decimal,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "update meters set current_reading = $2, last_collect_at = $3, online_status = true \
             where meter_id = $1",
        )
        .bind(meter_id)
        .bind(value)
        .bind(at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn create_reading(&mut self, reading: &NewReading) -> Result<ReadingRecord, StorageError> {
        let sql = format!(
            "insert into readings (meter_id, value, collect_time, collect_type) \
             values ($1, $2, $3, $4) returning {READING_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(reading.meter_id)
            .bind(reading.value)
            .bind(reading.collect_time)
            .bind(reading.collect_type.as_str())
            .fetch_one(&mut *self.tx)
            .await?;
        reading_from_row(&row)
    }

    async fn find_last_reading_before(
        &mut self,
        meter_id: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<ReadingRecord>, StorageError> {
        let sql = format!(
            "select {READING_COLUMNS} from readings \
             where meter_id = $1 and collect_time <= $2 \
             order by collect_time desc, reading_id desc limit 1"
        );
        let row = sqlx::query(&sql)
            .bind(meter_id)
            .bind(at)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.as_ref().map(reading_from_row).transpose()
    }

    async fn create_consumption(
        &mut self,
        consumption: &NewConsumption,
    ) -> Result<ConsumptionRecord, StorageError> {
        let consumption_id: i64 = sqlx::query_scalar(
            "insert into consumptions (meter_id, start_reading_id, end_reading_id, start_value, \
             end_value, consumption, period_start, period_end, status) \
             values ($1, $2, $3, $4, $5, $6, $7, $8, $9) returning consumption_id",
        )
        .bind(consumption.meter_id)
        .bind(consumption.start_reading_id)
        .bind(consumption.end_reading_id)
        .bind(consumption.start_value)
        .bind(consumption.end_value)
        .bind(consumption.consumption)
        .bind(consumption.period_start)
        .bind(consumption.period_end)
        .bind(ConsumptionStatus::Pending.as_str())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(ConsumptionRecord {
            consumption_id,
            meter_id: consumption.meter_id,
            start_reading_id: consumption.start_reading_id,
            end_reading_id: consumption.end_reading_id,
            start_value: consumption.start_value,
            end_value: consumption.end_value,
            consumption: consumption.consumption,
            period_start: consumption.period_start,
            period_end: consumption.period_end,
            status: ConsumptionStatus::Pending,
        })
    }

    async fn update_consumption_status(
        &mut self,
        consumption_id: i64,
        status: ConsumptionStatus,
    ) -> Result<(), StorageError> {
        sqlx::query("update consumptions set status = $2 where consumption_id = $1")
            .bind(consumption_id)
            .bind(status.as_str())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn lock_account_for_update(
        &mut self,
        account_id: i64,
    ) -> Result<Option<AccountRecord>, StorageError> {
        let row = sqlx::query(
            "select account_id, account_name, balance, total_consumption, status \
             from accounts where account_id = $1 for update",
        )
        .bind(account_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let status: String = row.try_get("status")?;
        Ok(Some(AccountRecord {
            account_id: row.try_get("account_id")?,
            account_name: row.try_get("account_name")?,
            balance: row.try_get("balance")?,
            total_consumption: row.try_get("total_consumption")?,
            status: status.parse()?,
        }))
    }

    async fn update_account_balance(
        &mut self,
        account_id: i64,
        balance: Decimal,
        total_consumption: Decimal,
        status: AccountStatus,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "update accounts set balance = $2, total_consumption = $3, status = $4 \
             where account_id = $1",
        )
        .bind(account_id)
        .bind(balance)
        .bind(total_consumption)
        .bind(status.as_str())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn create_deduction(&mut self, record: &DeductionRecord) -> Result<i64, StorageError> {
        let id: i64 = bind_deduction(sqlx::query(INSERT_DEDUCTION), record)
            .fetch_one(&mut *self.tx)
            .await?
            .try_get("deduction_id")?;
        Ok(id)
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
