use crate::db::MessStore;
use crate::error::Result;
use crate::models::{
    BillFilters, BillId, BillPatch, BillStatus, BulkAction, BulkFailure, BulkResult,
    IndividualBillRecord, PublishScope, Selection,
};
use crate::service::verification::VerificationTracker;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// 逐条提交的结果, 各列表保持输入顺序
#[derive(Debug, Default)]
pub(crate) struct MutationOutcomes {
    pub succeeded: Vec<BillId>,
    /// 状态条件已不成立 (被并发修改抢先), 未写入
    pub stale: Vec<BillId>,
    pub failed: Vec<BulkFailure>,
}

impl MutationOutcomes {
    /// 合并到批量结果; 被抢先的记录计入 skipped
    pub fn merge_into(self, result: &mut BulkResult) {
        result.succeeded.extend(self.succeeded);
        result.skipped.extend(self.stale);
        result.failed.extend(self.failed);
    }
}

/// 逐条并发提交修改, 最多 `concurrency` 条同时进行
///
/// 单条失败不影响其他记录。
pub(crate) async fn run_mutations(
    store: &Arc<dyn MessStore>,
    patches: Vec<(BillId, BillPatch)>,
    concurrency: usize,
) -> MutationOutcomes {
    let outcomes: Vec<(BillId, Result<bool>)> = stream::iter(patches)
        .map(|(bill_id, patch)| {
            let store = Arc::clone(store);
            async move {
                let outcome = store.persist_bill_mutation(&bill_id, &patch).await;
                (bill_id, outcome)
            }
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut result = MutationOutcomes::default();
    for (bill_id, outcome) in outcomes {
        match outcome {
            Ok(true) => result.succeeded.push(bill_id),
            Ok(false) => {
                tracing::debug!("[MessBill] {} changed concurrently, update skipped", bill_id);
                result.stale.push(bill_id);
            }
            Err(e) => {
                tracing::warn!("[MessBill] update of {} failed: {}", bill_id, e);
                result.failed.push(BulkFailure {
                    bill_id,
                    reason: e.to_string(),
                });
            }
        }
    }
    result
}

/// 批量操作控制器
pub struct BulkOperationsController {
    store: Arc<dyn MessStore>,
    tracker: Arc<VerificationTracker>,
    concurrency: usize,
}

impl BulkOperationsController {
    pub fn new(store: Arc<dyn MessStore>, tracker: Arc<VerificationTracker>, concurrency: usize) -> Self {
        Self {
            store,
            tracker,
            concurrency: concurrency.max(1),
        }
    }

    /// 对 "选中且在筛选范围内" 的账单执行批量操作
    ///
    /// - Verify: 只处理待审核账单, 已审核的计入 skipped
    /// - ShowHide: 与审核状态无关, 已是目标值的计入 skipped
    /// - Send: 只发送已审核账单, 未审核的计入 excluded
    /// - Publish: 发布选中账单所在的全部切片, 经过审核门禁
    pub async fn apply_bulk_action(
        &self,
        action: BulkAction,
        selection: &Selection,
        filters: &BillFilters,
    ) -> Result<BulkResult> {
        let in_filter = self.store.list_bills(filters).await?;
        let targets: Vec<IndividualBillRecord> = in_filter
            .into_iter()
            .filter(|b| selection.contains(&b.id))
            .collect();
        let out_of_scope = selection.len().saturating_sub(targets.len());

        if let BulkAction::Publish = action {
            let mut result = self.publish_selected(&targets).await?;
            result.out_of_scope = out_of_scope;
            return Ok(result);
        }

        let mut result = BulkResult::new(action);
        result.out_of_scope = out_of_scope;

        let sent_at = Utc::now();
        let mut patches = Vec::new();
        for bill in targets {
            match action {
                BulkAction::Verify => {
                    if bill.status == BillStatus::PendingVerification {
                        patches.push((
                            bill.id,
                            BillPatch::transition(BillStatus::PendingVerification, BillStatus::Verified),
                        ));
                    } else {
                        result.skipped.push(bill.id);
                    }
                }
                BulkAction::ShowHide { show } => {
                    if bill.show != show {
                        patches.push((bill.id, BillPatch::show(show)));
                    } else {
                        result.skipped.push(bill.id);
                    }
                }
                BulkAction::Send => {
                    if bill.verified() {
                        patches.push((bill.id, BillPatch::sent(sent_at)));
                    } else {
                        result.excluded += 1;
                    }
                }
                BulkAction::Publish => {}
            }
        }

        run_mutations(&self.store, patches, self.concurrency)
            .await
            .merge_into(&mut result);

        tracing::info!(
            "[MessBill] bulk {}: {} succeeded, {} failed, {} skipped, {} excluded, {} out of scope",
            action.name(),
            result.succeeded.len(),
            result.failed.len(),
            result.skipped.len(),
            result.excluded,
            result.out_of_scope
        );
        Ok(result)
    }

    async fn publish_selected(&self, targets: &[IndividualBillRecord]) -> Result<BulkResult> {
        let months: BTreeSet<_> = targets.iter().map(|b| b.month_year).collect();
        let mut combined = BulkResult::new(BulkAction::Publish);

        // 门禁先对所有账期检查, 任何一个不通过都不做修改
        let mut scopes = Vec::with_capacity(months.len());
        for month in months {
            let slices: BTreeSet<(String, u8)> = targets
                .iter()
                .filter(|b| b.month_year == month)
                .map(|b| (b.department.clone(), b.academic_year))
                .collect();
            let scope = PublishScope::new(month, slices.into_iter().collect());
            self.tracker.check_publish_gate(&scope).await?;
            scopes.push(scope);
        }

        for scope in scopes {
            let result = self.tracker.publish(&scope).await?;
            combined.succeeded.extend(result.succeeded);
            combined.failed.extend(result.failed);
            combined.skipped.extend(result.skipped);
        }
        Ok(combined)
    }

    /// 在独立任务中执行批量操作: 调用方放弃等待时已发出的请求仍会完成
    pub fn spawn_bulk_action(
        self: &Arc<Self>,
        action: BulkAction,
        selection: Selection,
        filters: BillFilters,
    ) -> JoinHandle<Result<BulkResult>> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let result = controller.apply_bulk_action(action, &selection, &filters).await;
            if let Err(e) = &result {
                tracing::warn!("[MessBill] bulk {} aborted: {}", action.name(), e);
            }
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::{
        Department, MonthYear, MonthlyCostRecord, RateSnapshot, StudentAttendanceRecord,
    };
    use crate::service::bill_generator::compute_bill;
    use async_trait::async_trait;
    use bigdecimal::BigDecimal;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// 只记录同时在途的修改数
    #[derive(Default)]
    struct InFlightStore {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl MessStore for InFlightStore {
        async fn fetch_departments(&self) -> Result<Vec<Department>> {
            Ok(Vec::new())
        }

        async fn fetch_roster(&self, _filters: &BillFilters) -> Result<Vec<StudentAttendanceRecord>> {
            Ok(Vec::new())
        }

        async fn persist_monthly_cost_record(&self, _record: &MonthlyCostRecord) -> Result<()> {
            Ok(())
        }

        async fn load_monthly_cost_record(&self, _month_year: &MonthYear) -> Result<Option<MonthlyCostRecord>> {
            Ok(None)
        }

        async fn insert_bills(&self, _bills: &[IndividualBillRecord]) -> Result<()> {
            Ok(())
        }

        async fn get_bill(&self, _bill_id: &BillId) -> Result<Option<IndividualBillRecord>> {
            Ok(None)
        }

        async fn list_bills(&self, _filters: &BillFilters) -> Result<Vec<IndividualBillRecord>> {
            Ok(Vec::new())
        }

        async fn persist_bill_mutation(&self, _bill_id: &BillId, _patch: &BillPatch) -> Result<bool> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    fn october() -> MonthYear {
        "October 2025".parse().unwrap()
    }

    fn bill(student_id: &str, status: BillStatus) -> IndividualBillRecord {
        let rates = RateSnapshot {
            mess_fee_per_day: BigDecimal::from(82),
            veg_extra_per_day: BigDecimal::from(30),
            nonveg_extra_per_day: BigDecimal::from(50),
        };
        let student = StudentAttendanceRecord {
            student_id: student_id.to_string(),
            student_name: student_id.to_string(),
            department: "CSE".to_string(),
            academic_year: 1,
            days_present: 28,
            is_veg: true,
            veg_days: 0,
            non_veg_days: 0,
            reduction_days: 0,
        };
        let mut bill = compute_bill(&rates, october(), &student).unwrap();
        bill.status = status;
        bill
    }

    #[tokio::test]
    async fn mutations_respect_the_concurrency_limit() {
        let counting = Arc::new(InFlightStore::default());
        let store: Arc<dyn MessStore> = counting.clone();
        let patches: Vec<(BillId, BillPatch)> = (0..8)
            .map(|i| (BillId::new(&format!("S{}", i), &october()), BillPatch::show(true)))
            .collect();

        let outcomes = run_mutations(&store, patches, 3).await;

        assert_eq!(outcomes.succeeded.len(), 8);
        let peak = counting.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak in-flight {}", peak);
        assert!(peak > 1, "mutations ran sequentially");
        // 结果保持输入顺序
        assert_eq!(outcomes.succeeded[0], BillId::new("S0", &october()));
        assert_eq!(outcomes.succeeded[7], BillId::new("S7", &october()));
    }

    #[tokio::test]
    async fn stale_transition_is_skipped_not_applied() {
        let store: Arc<dyn MessStore> = Arc::new(MemoryStore::new());
        let published = bill("S1", BillStatus::Published);
        let pending = bill("S2", BillStatus::PendingVerification);
        store.insert_bills(&[published.clone(), pending.clone()]).await.unwrap();

        // 基于过期读取的审核: S1 已被发布, 不能被改回 Verified
        let verify = BillPatch::transition(BillStatus::PendingVerification, BillStatus::Verified);
        let patches = vec![
            (published.id.clone(), verify.clone()),
            (pending.id.clone(), verify),
        ];
        let outcomes = run_mutations(&store, patches, 2).await;

        assert_eq!(outcomes.succeeded, vec![pending.id.clone()]);
        assert_eq!(outcomes.stale, vec![published.id.clone()]);
        assert!(outcomes.failed.is_empty());

        let s1 = store.get_bill(&published.id).await.unwrap().unwrap();
        assert_eq!(s1.status, BillStatus::Published);
        let s2 = store.get_bill(&pending.id).await.unwrap().unwrap();
        assert_eq!(s2.status, BillStatus::Verified);
    }

    #[tokio::test]
    async fn missing_bill_is_a_failure_not_a_skip() {
        let store: Arc<dyn MessStore> = Arc::new(MemoryStore::new());
        let patches = vec![(BillId::new("ghost", &october()), BillPatch::show(true))];
        let outcomes = run_mutations(&store, patches, 2).await;
        assert!(outcomes.succeeded.is_empty());
        assert_eq!(outcomes.failed.len(), 1);
    }
}
