use crate::db::MessStore;
use crate::error::{BillingError, Result};
use crate::models::{BillFilters, IndividualBillRecord, Page};
use std::sync::Arc;

/// 筛选并分页 (page 从 1 开始)
pub fn query_bills(
    bills: &[IndividualBillRecord],
    filters: &BillFilters,
    page: usize,
    page_size: usize,
) -> Result<Page<IndividualBillRecord>> {
    if page == 0 {
        return Err(BillingError::validation("page", "starts at 1"));
    }
    if page_size == 0 {
        return Err(BillingError::validation("page_size", "must be positive"));
    }

    let matched: Vec<&IndividualBillRecord> = bills.iter().filter(|b| filters.matches(b)).collect();
    let total = matched.len();
    let items = matched
        .into_iter()
        .skip((page - 1).saturating_mul(page_size))
        .take(page_size)
        .cloned()
        .collect();

    Ok(Page {
        items,
        total,
        page,
        page_size,
    })
}

/// 账单查询层
pub struct QueryLayer {
    store: Arc<dyn MessStore>,
    max_page_size: usize,
}

impl QueryLayer {
    pub fn new(store: Arc<dyn MessStore>, max_page_size: usize) -> Self {
        Self { store, max_page_size }
    }

    pub async fn query_bills(
        &self,
        filters: &BillFilters,
        page: usize,
        page_size: usize,
    ) -> Result<Page<IndividualBillRecord>> {
        if page_size > self.max_page_size {
            return Err(BillingError::Range {
                field: "page_size".to_string(),
                value: i64::try_from(page_size).unwrap_or(i64::MAX),
                min: 1,
                max: i64::try_from(self.max_page_size).unwrap_or(i64::MAX),
            });
        }
        // 每次都重新拉取, 分页只在一次拉取内稳定
        let bills = self.store.list_bills(filters).await?;
        tracing::debug!("[MessBill] query {:?}: {} rows fetched", filters, bills.len());
        query_bills(&bills, filters, page, page_size)
    }

    /// 不分页的完整结果 (导出、选择集使用)
    pub async fn all_bills(&self, filters: &BillFilters) -> Result<Vec<IndividualBillRecord>> {
        self.store.list_bills(filters).await
    }
}
