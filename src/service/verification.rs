use crate::db::MessStore;
use crate::error::{BillingError, Result};
use crate::models::{
    BillFilters, BillId, BillPatch, BillStatus, BulkAction, BulkResult, IndividualBillRecord,
    MonthYear, PublishScope, SliceKey, VerificationBoard, VerificationCell,
};
use crate::service::bulk::run_mutations;
use std::sync::Arc;

/// 审核跟踪器: 单张审核、切片审核状态、发布门禁
pub struct VerificationTracker {
    store: Arc<dyn MessStore>,
    concurrency: usize,
}

impl VerificationTracker {
    pub fn new(store: Arc<dyn MessStore>, concurrency: usize) -> Self {
        Self {
            store,
            concurrency: concurrency.max(1),
        }
    }

    /// PendingVerification -> Verified
    pub async fn verify_bill(&self, bill_id: &BillId) -> Result<IndividualBillRecord> {
        let mut bill = self
            .store
            .get_bill(bill_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("bill {}", bill_id)))?;

        if !bill.status.can_advance_to(BillStatus::Verified) {
            return Err(BillingError::AlreadyVerified(bill_id.clone()));
        }

        let patch = BillPatch::transition(BillStatus::PendingVerification, BillStatus::Verified);
        if !self.store.persist_bill_mutation(bill_id, &patch).await? {
            return Err(BillingError::AlreadyVerified(bill_id.clone()));
        }
        patch.apply_to(&mut bill);

        tracing::info!("[MessBill] {} verified", bill_id);
        Ok(bill)
    }

    /// 当前筛选范围内每个切片的审核状态
    pub async fn verification_cells(&self, filters: &BillFilters) -> Result<Vec<VerificationCell>> {
        // 切片状态按整个切片计算, 不受搜索词影响
        let slice_filters = BillFilters {
            search: None,
            ..filters.clone()
        };
        let bills = self.store.list_bills(&slice_filters).await?;
        Ok(VerificationBoard::from_bills(&bills).cells().cloned().collect())
    }

    pub async fn verification_cell(&self, key: &SliceKey) -> Result<VerificationCell> {
        let filters = BillFilters::for_slice(key.month_year, Some(key.department.clone()), Some(key.academic_year));
        let bills = self.store.list_bills(&filters).await?;
        Ok(VerificationBoard::from_bills(&bills).cell(key))
    }

    /// 未指定切片时的发布范围: 该账期内实际有账单的切片
    ///
    /// 账期内没有任何账单时返回 `Validation`, 避免空发布。
    pub async fn month_scope(&self, month_year: MonthYear, years: &[u8]) -> Result<PublishScope> {
        let bills = self
            .store
            .list_bills(&BillFilters::for_slice(month_year, None, None))
            .await?;
        let scope = PublishScope::occupied(month_year, &bills, years);
        if scope.is_empty() {
            return Err(BillingError::validation(
                "month_year",
                format!("no bills to publish for {}", month_year),
            ));
        }
        Ok(scope)
    }

    /// 发布门禁: 范围内每个切片都必须 all_verified, 否则返回 IncompletePublish 且不做任何修改
    pub async fn check_publish_gate(&self, scope: &PublishScope) -> Result<Vec<IndividualBillRecord>> {
        let month_bills = self
            .store
            .list_bills(&BillFilters {
                month_year: Some(scope.month_year),
                ..BillFilters::default()
            })
            .await?;

        let board = VerificationBoard::from_bills(month_bills.iter().filter(|b| scope.contains(b)));
        let incomplete = board.incomplete_slices(scope);
        if !incomplete.is_empty() {
            tracing::warn!(
                "[MessBill] publish of {} rejected, {} unverified slice(s)",
                scope.month_year,
                incomplete.len()
            );
            return Err(BillingError::IncompletePublish { slices: incomplete });
        }

        Ok(month_bills.into_iter().filter(|b| scope.contains(b)).collect())
    }

    /// Verified -> Published, 作用于整个发布范围
    pub async fn publish(&self, scope: &PublishScope) -> Result<BulkResult> {
        let bills = self.check_publish_gate(scope).await?;

        let mut result = BulkResult::new(BulkAction::Publish);
        let mut patches = Vec::new();
        for bill in bills {
            if bill.status.can_advance_to(BillStatus::Published) {
                patches.push((bill.id, BillPatch::transition(BillStatus::Verified, BillStatus::Published)));
            } else {
                result.skipped.push(bill.id);
            }
        }

        run_mutations(&self.store, patches, self.concurrency)
            .await
            .merge_into(&mut result);

        tracing::info!(
            "[MessBill] {} published: {} bills, {} skipped, {} failed",
            scope.month_year,
            result.succeeded.len(),
            result.skipped.len(),
            result.failed.len()
        );
        Ok(result)
    }
}
