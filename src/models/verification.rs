use super::{IndividualBillRecord, MonthYear};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// 审核切片键 (院系, 学年, 账期)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SliceKey {
    pub department: String,
    pub academic_year: u8,
    pub month_year: MonthYear,
}

impl SliceKey {
    pub fn of(bill: &IndividualBillRecord) -> Self {
        Self {
            department: bill.department.clone(),
            academic_year: bill.academic_year,
            month_year: bill.month_year,
        }
    }
}

/// 切片审核状态, 完全由切片内账单派生
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationCell {
    pub key: SliceKey,
    pub all_verified: bool,
    pub bill_count: usize,
    pub verified_count: usize,
}

impl VerificationCell {
    fn empty(key: SliceKey) -> Self {
        Self {
            key,
            all_verified: false,
            bill_count: 0,
            verified_count: 0,
        }
    }

    fn refresh(&mut self) {
        // 空切片不算已审核
        self.all_verified = self.bill_count > 0 && self.verified_count == self.bill_count;
    }
}

/// 一批账单的审核看板
#[derive(Debug, Clone, Default)]
pub struct VerificationBoard {
    cells: BTreeMap<SliceKey, VerificationCell>,
}

impl VerificationBoard {
    pub fn from_bills<'a>(bills: impl IntoIterator<Item = &'a IndividualBillRecord>) -> Self {
        let mut board = Self::default();
        for bill in bills {
            let key = SliceKey::of(bill);
            let cell = board
                .cells
                .entry(key.clone())
                .or_insert_with(|| VerificationCell::empty(key));
            cell.bill_count += 1;
            if bill.verified() {
                cell.verified_count += 1;
            }
            cell.refresh();
        }
        board
    }

    /// 查询切片; 没有账单的切片返回空单元 (all_verified = false)
    pub fn cell(&self, key: &SliceKey) -> VerificationCell {
        self.cells
            .get(key)
            .cloned()
            .unwrap_or_else(|| VerificationCell::empty(key.clone()))
    }

    pub fn cells(&self) -> impl Iterator<Item = &VerificationCell> {
        self.cells.values()
    }

    /// 返回范围内所有未完成审核的切片
    pub fn incomplete_slices(&self, scope: &PublishScope) -> Vec<SliceKey> {
        scope
            .slice_keys()
            .filter(|key| !self.cell(key).all_verified)
            .collect()
    }
}

/// 发布范围: 某账期下的一组 (院系, 学年)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishScope {
    pub month_year: MonthYear,
    pub slices: Vec<(String, u8)>,
}

impl PublishScope {
    pub fn new(month_year: MonthYear, slices: Vec<(String, u8)>) -> Self {
        Self { month_year, slices }
    }

    /// 某账期下实际有账单的切片; `years` 非空时只取这些学年
    ///
    /// 没有学生的 (院系, 学年) 不会进入范围。显式指定的范围仍按空切片未审核处理。
    pub fn occupied<'a>(
        month_year: MonthYear,
        bills: impl IntoIterator<Item = &'a IndividualBillRecord>,
        years: &[u8],
    ) -> Self {
        let slices: BTreeSet<(String, u8)> = bills
            .into_iter()
            .filter(|b| b.month_year == month_year)
            .filter(|b| years.is_empty() || years.contains(&b.academic_year))
            .map(|b| (b.department.clone(), b.academic_year))
            .collect();
        Self {
            month_year,
            slices: slices.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn slice_keys(&self) -> impl Iterator<Item = SliceKey> + '_ {
        self.slices.iter().map(|(department, year)| SliceKey {
            department: department.clone(),
            academic_year: *year,
            month_year: self.month_year,
        })
    }

    pub fn contains(&self, bill: &IndividualBillRecord) -> bool {
        bill.month_year == self.month_year
            && self
                .slices
                .iter()
                .any(|(d, y)| *d == bill.department && *y == bill.academic_year)
    }
}
