use super::{MonthYear, RateSnapshot};
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 账单ID: "学号:账期键", 由 (student_id, month_year) 唯一确定
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BillId(pub String);

impl BillId {
    pub fn new(student_id: &str, month_year: &MonthYear) -> Self {
        Self(format!("{}:{}", student_id, month_year.key()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BillId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BillId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// 账单审核状态 (只能前进)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillStatus {
    PendingVerification,
    Verified,
    Published,
}

impl BillStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingVerification => "pending_verification",
            Self::Verified => "verified",
            Self::Published => "published",
        }
    }

    pub fn is_verified(&self) -> bool {
        !matches!(self, Self::PendingVerification)
    }

    /// 是否允许迁移到 `next` (不允许回退, 不允许跳过审核)
    pub fn can_advance_to(&self, next: BillStatus) -> bool {
        matches!(
            (self, next),
            (Self::PendingVerification, Self::Verified) | (Self::Verified, Self::Published)
        )
    }
}

impl FromStr for BillStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_verification" => Ok(Self::PendingVerification),
            "verified" => Ok(Self::Verified),
            "published" => Ok(Self::Published),
            other => Err(format!("unknown bill status '{}'", other)),
        }
    }
}

/// 院系 (外部接口 fetchDepartments 返回)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Department {
    pub department: String,
    pub department_id: i64,
}

/// 学生出勤记录 (外部接口 fetchRoster 返回)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentAttendanceRecord {
    pub student_id: String,
    pub student_name: String,
    pub department: String,
    pub academic_year: u8,
    pub days_present: u32,
    pub is_veg: bool,
    #[serde(default)]
    pub veg_days: u32,
    #[serde(default)]
    pub non_veg_days: u32,
    /// 个人减免天数
    #[serde(default)]
    pub reduction_days: u32,
}

/// 学生个人月度账单
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndividualBillRecord {
    pub id: BillId,
    pub student_id: String,
    pub student_name: String,
    pub department: String,
    pub academic_year: u8,
    pub month_year: MonthYear,

    // 生成时冻结的单价
    pub mess_fee_per_day: BigDecimal,
    pub veg_extra_per_day: BigDecimal,
    pub nonveg_extra_per_day: BigDecimal,

    // 出勤
    pub days_present: u32,
    pub reduction_days: u32,
    pub is_veg: bool,
    pub veg_days: u32,
    pub non_veg_days: u32,

    // 计算结果
    pub mess_charges: BigDecimal,
    pub meal_extra: BigDecimal,
    pub total_amount: BigDecimal,

    pub status: BillStatus,
    pub show: bool,
    pub ispaid: bool,
    pub paid_date: Option<NaiveDate>,
    pub latest_order_id: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub edited: bool,
}

impl IndividualBillRecord {
    pub fn verified(&self) -> bool {
        self.status.is_verified()
    }

    pub fn rates(&self) -> RateSnapshot {
        RateSnapshot {
            mess_fee_per_day: self.mess_fee_per_day.clone(),
            veg_extra_per_day: self.veg_extra_per_day.clone(),
            nonveg_extra_per_day: self.nonveg_extra_per_day.clone(),
        }
    }
}

/// 单张账单的局部修改 (对应外部接口 persistBillMutation)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BillPatch {
    /// 仅当账单当前处于该状态时才写入 (条件更新)
    pub expected_status: Option<BillStatus>,
    pub status: Option<BillStatus>,
    pub show: Option<bool>,
    pub ispaid: Option<bool>,
    pub paid_date: Option<NaiveDate>,
    pub latest_order_id: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    /// 重新计算后的出勤与金额 (仅 edit_bill 使用)
    pub recalculated: Option<Box<IndividualBillRecord>>,
}

impl BillPatch {
    /// 状态迁移 `from -> to`; 账单已不在 `from` 时不写入
    pub fn transition(from: BillStatus, to: BillStatus) -> Self {
        Self {
            expected_status: Some(from),
            status: Some(to),
            ..Self::default()
        }
    }

    pub fn show(show: bool) -> Self {
        Self {
            show: Some(show),
            ..Self::default()
        }
    }

    pub fn sent(at: DateTime<Utc>) -> Self {
        Self {
            sent_at: Some(at),
            ..Self::default()
        }
    }

    pub fn paid(order_id: String, paid_date: NaiveDate) -> Self {
        Self {
            ispaid: Some(true),
            paid_date: Some(paid_date),
            latest_order_id: Some(order_id),
            ..Self::default()
        }
    }

    /// 人工修正后的结果, 只写入仍待审核的账单
    pub fn recalculated(bill: IndividualBillRecord) -> Self {
        Self {
            expected_status: Some(BillStatus::PendingVerification),
            recalculated: Some(Box::new(bill)),
            ..Self::default()
        }
    }

    /// 条件是否成立 (无条件的修改总是成立)
    pub fn holds_for(&self, bill: &IndividualBillRecord) -> bool {
        self.expected_status.map_or(true, |expected| bill.status == expected)
    }

    /// 应用到账单 (存储实现共用, 调用方先检查 `holds_for`)
    pub fn apply_to(&self, bill: &mut IndividualBillRecord) {
        if let Some(next) = &self.recalculated {
            bill.days_present = next.days_present;
            bill.reduction_days = next.reduction_days;
            bill.is_veg = next.is_veg;
            bill.veg_days = next.veg_days;
            bill.non_veg_days = next.non_veg_days;
            bill.mess_charges = next.mess_charges.clone();
            bill.meal_extra = next.meal_extra.clone();
            bill.total_amount = next.total_amount.clone();
            bill.edited = true;
        }
        if let Some(status) = self.status {
            bill.status = status;
        }
        if let Some(show) = self.show {
            bill.show = show;
        }
        if let Some(ispaid) = self.ispaid {
            bill.ispaid = ispaid;
        }
        if let Some(date) = self.paid_date {
            bill.paid_date = Some(date);
        }
        if let Some(order_id) = &self.latest_order_id {
            bill.latest_order_id = Some(order_id.clone());
        }
        if let Some(at) = self.sent_at {
            bill.sent_at = Some(at);
        }
    }
}

/// 单张账单的人工修正 (仅待审核账单可改)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BillEdit {
    pub days_present: Option<u32>,
    pub reduction_days: Option<u32>,
    pub is_veg: Option<bool>,
    pub veg_days: Option<u32>,
    pub non_veg_days: Option<u32>,
}

impl BillEdit {
    /// 合并到账单对应的出勤记录上
    pub fn merge_into(&self, bill: &IndividualBillRecord) -> StudentAttendanceRecord {
        StudentAttendanceRecord {
            student_id: bill.student_id.clone(),
            student_name: bill.student_name.clone(),
            department: bill.department.clone(),
            academic_year: bill.academic_year,
            days_present: self.days_present.unwrap_or(bill.days_present),
            is_veg: self.is_veg.unwrap_or(bill.is_veg),
            veg_days: self.veg_days.unwrap_or(bill.veg_days),
            non_veg_days: self.non_veg_days.unwrap_or(bill.non_veg_days),
            reduction_days: self.reduction_days.unwrap_or(bill.reduction_days),
        }
    }
}
