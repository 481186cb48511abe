pub mod memory;
pub mod pool;
pub mod queries;

use crate::error::Result;
use crate::models::{
    BillFilters, BillId, BillPatch, Department, IndividualBillRecord, MonthYear,
    MonthlyCostRecord, StudentAttendanceRecord,
};
use async_trait::async_trait;

pub use memory::MemoryStore;
pub use pool::create_pool;
pub use queries::PgMessStore;

/// 远端存储协作方
///
/// 计费核心只通过这个接口读写数据, 不读取任何全局状态。
/// 每次调用都可能独立失败 (返回 `BillingError::Transient`), 核心不做自动重试。
#[async_trait]
pub trait MessStore: Send + Sync {
    /// fetchDepartments
    async fn fetch_departments(&self) -> Result<Vec<Department>>;

    /// fetchRoster: 按账期/院系/学年取学生出勤
    async fn fetch_roster(&self, filters: &BillFilters) -> Result<Vec<StudentAttendanceRecord>>;

    /// persistMonthlyCostRecord: 同一账期后写覆盖先写
    async fn persist_monthly_cost_record(&self, record: &MonthlyCostRecord) -> Result<()>;

    async fn load_monthly_cost_record(&self, month_year: &MonthYear) -> Result<Option<MonthlyCostRecord>>;

    /// 写入新生成的账单; 已存在的 (student_id, month_year) 保持不变
    async fn insert_bills(&self, bills: &[IndividualBillRecord]) -> Result<()>;

    async fn get_bill(&self, bill_id: &BillId) -> Result<Option<IndividualBillRecord>>;

    async fn list_bills(&self, filters: &BillFilters) -> Result<Vec<IndividualBillRecord>>;

    /// persistBillMutation
    ///
    /// 返回 `Ok(false)` 表示 `patch.expected_status` 已不成立, 未做修改。
    async fn persist_bill_mutation(&self, bill_id: &BillId, patch: &BillPatch) -> Result<bool>;
}
