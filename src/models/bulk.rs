use super::{BillFilters, BillId, IndividualBillRecord};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

/// 批量操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BulkAction {
    Verify,
    ShowHide { show: bool },
    Send,
    /// 发布 (由 VerificationTracker 在门禁通过后发起)
    Publish,
}

impl BulkAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Verify => "verify",
            Self::ShowHide { .. } => "show_hide",
            Self::Send => "send",
            Self::Publish => "publish",
        }
    }
}

/// 选择集: 显式账单ID集合, 与当前筛选视图无关
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    ids: IndexSet<BillId>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ids(ids: impl IntoIterator<Item = BillId>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    pub fn select(&mut self, id: BillId) {
        self.ids.insert(id);
    }

    pub fn deselect(&mut self, id: &BillId) {
        self.ids.shift_remove(id);
    }

    pub fn toggle(&mut self, id: BillId) {
        if !self.ids.shift_remove(&id) {
            self.ids.insert(id);
        }
    }

    /// 全选给定列表
    pub fn select_all<'a>(&mut self, bills: impl IntoIterator<Item = &'a IndividualBillRecord>) {
        self.ids.extend(bills.into_iter().map(|b| b.id.clone()));
    }

    /// 仅选中满足筛选条件的账单 (保留已有选择)
    pub fn select_all_in_filter<'a>(
        &mut self,
        bills: impl IntoIterator<Item = &'a IndividualBillRecord>,
        filters: &BillFilters,
    ) {
        self.ids.extend(
            bills
                .into_iter()
                .filter(|b| filters.matches(b))
                .map(|b| b.id.clone()),
        );
    }

    pub fn deselect_all(&mut self) {
        self.ids.clear();
    }

    /// 反选: 在 `universe` 内, 已选变未选, 未选变已选; 范围外的选择被丢弃
    pub fn select_complement<'a>(
        &mut self,
        universe: impl IntoIterator<Item = &'a IndividualBillRecord>,
    ) {
        let next: IndexSet<BillId> = universe
            .into_iter()
            .filter(|b| !self.ids.contains(&b.id))
            .map(|b| b.id.clone())
            .collect();
        self.ids = next;
    }

    pub fn contains(&self, id: &BillId) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BillId> {
        self.ids.iter()
    }
}

/// 单条失败记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkFailure {
    pub bill_id: BillId,
    pub reason: String,
}

/// 批量操作结果 (逐条)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkResult {
    pub action: BulkAction,
    pub succeeded: Vec<BillId>,
    pub failed: Vec<BulkFailure>,
    /// 已处于目标状态而跳过的账单
    pub skipped: Vec<BillId>,
    /// Send 时因未审核被排除的数量
    pub excluded: usize,
    /// 选择集中不在当前筛选范围内或不存在的ID
    pub out_of_scope: usize,
}

impl BulkResult {
    pub fn new(action: BulkAction) -> Self {
        Self {
            action,
            succeeded: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            excluded: 0,
            out_of_scope: 0,
        }
    }

    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// 有失败时转为 PartialBulkFailure
    pub fn into_result(self) -> crate::error::Result<Self> {
        if self.failed.is_empty() {
            Ok(self)
        } else {
            Err(crate::error::BillingError::PartialBulkFailure {
                succeeded: self.succeeded.len(),
                failed: self.failed,
            })
        }
    }
}
