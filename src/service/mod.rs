pub mod bill_generator;
pub mod bulk;
pub mod cost_aggregator;
pub mod export;
pub mod money;
pub mod query;
pub mod verification;

pub use bill_generator::BillGenerator;
pub use bulk::BulkOperationsController;
pub use cost_aggregator::CostAggregator;
pub use export::export_bills;
pub use query::QueryLayer;
pub use verification::VerificationTracker;

use crate::config::BillingConfig;
use crate::db::MessStore;
use crate::error::{BillingError, Result};
use crate::models::{BillFilters, BillId, BillPatch, Department, IndividualBillRecord};
use chrono::NaiveDate;
use std::sync::Arc;

/// 食堂账单服务: 组合各组件, 供 API 层共享
pub struct MessBillingService {
    store: Arc<dyn MessStore>,
    pub costs: CostAggregator,
    pub generator: BillGenerator,
    pub tracker: Arc<VerificationTracker>,
    pub bulk: Arc<BulkOperationsController>,
    pub query: QueryLayer,
    pub config: BillingConfig,
}

impl MessBillingService {
    pub fn new(store: Arc<dyn MessStore>, config: BillingConfig) -> Self {
        let tracker = Arc::new(VerificationTracker::new(store.clone(), config.bulk_concurrency));
        let bulk = Arc::new(BulkOperationsController::new(
            store.clone(),
            tracker.clone(),
            config.bulk_concurrency,
        ));
        Self {
            costs: CostAggregator::new(store.clone()),
            generator: BillGenerator::new(store.clone()),
            query: QueryLayer::new(store.clone(), config.max_page_size),
            tracker,
            bulk,
            store,
            config,
        }
    }

    pub async fn departments(&self) -> Result<Vec<Department>> {
        self.store.fetch_departments().await
    }

    /// 支付回调: Unpaid -> Paid, 与审核状态无关
    pub async fn record_payment(
        &self,
        bill_id: &BillId,
        order_id: String,
        paid_date: NaiveDate,
    ) -> Result<IndividualBillRecord> {
        if order_id.trim().is_empty() {
            return Err(BillingError::validation("order_id", "is required"));
        }
        let mut bill = self
            .store
            .get_bill(bill_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("bill {}", bill_id)))?;

        let patch = BillPatch::paid(order_id, paid_date);
        // 支付修改无状态条件, 总会写入
        self.store.persist_bill_mutation(bill_id, &patch).await?;
        patch.apply_to(&mut bill);

        tracing::info!("[MessBill] {} paid on {} (order {:?})", bill_id, paid_date, bill.latest_order_id);
        Ok(bill)
    }

    /// 导出筛选范围内的全部账单
    pub async fn export(&self, filters: &BillFilters) -> Result<Vec<u8>> {
        let bills = self.query.all_bills(filters).await?;
        export_bills(&bills)
    }
}
