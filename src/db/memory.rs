use super::MessStore;
use crate::error::{BillingError, Result};
use crate::models::{
    BillFilters, BillId, BillPatch, Department, IndividualBillRecord, MonthYear,
    MonthlyCostRecord, StudentAttendanceRecord,
};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

/// 进程内存储 (本地运行与测试使用)
#[derive(Default)]
pub struct MemoryStore {
    departments: RwLock<Vec<Department>>,
    rosters: DashMap<MonthYear, Vec<StudentAttendanceRecord>>,
    monthly: DashMap<MonthYear, MonthlyCostRecord>,
    superseded: DashMap<MonthYear, Vec<MonthlyCostRecord>>,
    bills: DashMap<BillId, IndividualBillRecord>,
    failing_mutations: DashSet<BillId>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_departments(self, departments: Vec<Department>) -> Self {
        if let Ok(mut guard) = self.departments.write() {
            *guard = departments;
        }
        self
    }

    /// 设置某账期的学生出勤名单 (整体替换)
    pub fn set_roster(&self, month_year: MonthYear, roster: Vec<StudentAttendanceRecord>) {
        self.rosters.insert(month_year, roster);
    }

    /// 让指定账单的后续修改失败, 用于模拟部分失败
    pub fn fail_mutations_for(&self, bill_id: BillId) {
        self.failing_mutations.insert(bill_id);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// 被覆盖的历史月度记录 (旧的在前)
    pub fn superseded_records(&self, month_year: &MonthYear) -> Vec<MonthlyCostRecord> {
        self.superseded
            .get(month_year)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    fn ensure_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(BillingError::Transient("memory store is offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MessStore for MemoryStore {
    async fn fetch_departments(&self) -> Result<Vec<Department>> {
        self.ensure_online()?;
        self.departments
            .read()
            .map(|d| d.clone())
            .map_err(|_| BillingError::Transient("departments lock poisoned".to_string()))
    }

    async fn fetch_roster(&self, filters: &BillFilters) -> Result<Vec<StudentAttendanceRecord>> {
        self.ensure_online()?;
        let Some(month) = filters.month_year else {
            return Err(BillingError::validation("month_year", "required to fetch roster"));
        };
        let roster = self.rosters.get(&month).map(|r| r.clone()).unwrap_or_default();
        Ok(roster
            .into_iter()
            .filter(|s| filters.department.as_ref().map_or(true, |d| *d == s.department))
            .filter(|s| filters.academic_year.map_or(true, |y| y == s.academic_year))
            .collect())
    }

    async fn persist_monthly_cost_record(&self, record: &MonthlyCostRecord) -> Result<()> {
        self.ensure_online()?;
        if let Some(previous) = self.monthly.insert(record.month_year, record.clone()) {
            self.superseded
                .entry(record.month_year)
                .or_default()
                .push(previous);
        }
        Ok(())
    }

    async fn load_monthly_cost_record(&self, month_year: &MonthYear) -> Result<Option<MonthlyCostRecord>> {
        self.ensure_online()?;
        Ok(self.monthly.get(month_year).map(|r| r.clone()))
    }

    async fn insert_bills(&self, bills: &[IndividualBillRecord]) -> Result<()> {
        self.ensure_online()?;
        for bill in bills {
            self.bills
                .entry(bill.id.clone())
                .or_insert_with(|| bill.clone());
        }
        Ok(())
    }

    async fn get_bill(&self, bill_id: &BillId) -> Result<Option<IndividualBillRecord>> {
        self.ensure_online()?;
        Ok(self.bills.get(bill_id).map(|b| b.clone()))
    }

    async fn list_bills(&self, filters: &BillFilters) -> Result<Vec<IndividualBillRecord>> {
        self.ensure_online()?;
        let mut bills: Vec<IndividualBillRecord> = self
            .bills
            .iter()
            .filter(|entry| filters.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        bills.sort_by(|a, b| {
            a.month_year
                .cmp(&b.month_year)
                .then_with(|| a.department.cmp(&b.department))
                .then_with(|| a.academic_year.cmp(&b.academic_year))
                .then_with(|| a.student_id.cmp(&b.student_id))
        });
        Ok(bills)
    }

    async fn persist_bill_mutation(&self, bill_id: &BillId, patch: &BillPatch) -> Result<bool> {
        self.ensure_online()?;
        if self.failing_mutations.contains(bill_id) {
            return Err(BillingError::Transient(format!("update of bill {} rejected", bill_id)));
        }
        // get_mut 持有分片写锁, 检查与写入之间不会被其他修改插入
        let mut bill = self
            .bills
            .get_mut(bill_id)
            .ok_or_else(|| BillingError::NotFound(format!("bill {}", bill_id)))?;
        if !patch.holds_for(bill.value()) {
            return Ok(false);
        }
        patch.apply_to(bill.value_mut());
        Ok(true)
    }
}
