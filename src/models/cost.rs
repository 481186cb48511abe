use super::MonthYear;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

/// 学年数 (一至四年级)
pub const ACADEMIC_YEARS: u8 = 4;

/// 单个学年的出勤汇总
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearAttendance {
    pub students: u32,
    pub days: u32,
}

impl YearAttendance {
    pub fn student_days(&self) -> u64 {
        u64::from(self.students) * u64::from(self.days)
    }
}

/// 学年出勤原始输入 (表单文本)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct YearAttendanceInput {
    pub students: Option<String>,
    pub days: Option<String>,
}

/// 月度成本原始输入
///
/// 所有字段都是表单文本, 由 `CostAggregator` 清洗、校验后计算。
/// `veg_extra_per_day`、`nonveg_extra_per_day`、`reduction_days` 缺省为 0,
/// 其余字段必填。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonthlyCostInputs {
    pub month_year: Option<String>,
    pub grocery_cost: Option<String>,
    pub vegetable_cost: Option<String>,
    pub gas_charges: Option<String>,
    pub milk_litres: Option<String>,
    pub milk_cost_per_litre: Option<String>,
    pub other_costs: Option<String>,
    pub deductions_income: Option<String>,
    pub veg_extra_per_day: Option<String>,
    pub nonveg_extra_per_day: Option<String>,
    pub reduction_days: Option<String>,
    /// 下标 0..4 对应一至四年级
    #[serde(default)]
    pub attendance: [YearAttendanceInput; ACADEMIC_YEARS as usize],
}

/// 月度成本记录 (每个账期一条, 确认后不可局部修改)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyCostRecord {
    pub month_year: MonthYear,

    // 输入
    pub grocery_cost: BigDecimal,
    pub vegetable_cost: BigDecimal,
    pub gas_charges: BigDecimal,
    pub milk_litres: BigDecimal,
    pub milk_cost_per_litre: BigDecimal,
    pub other_costs: BigDecimal,
    pub deductions_income: BigDecimal,
    pub veg_extra_per_day: BigDecimal,
    pub nonveg_extra_per_day: BigDecimal,
    pub reduction_days: u32,
    pub attendance: [YearAttendance; ACADEMIC_YEARS as usize],

    // 派生字段
    pub milk_charges: BigDecimal,
    pub total_expenditure: BigDecimal,
    pub net_expenditure: BigDecimal,
    pub total_possible_student_days: u64,
    pub applicable_student_days: u64,
    pub mess_fee_per_day: BigDecimal,
}

/// 计费时从月度记录冻结下来的单价快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateSnapshot {
    pub mess_fee_per_day: BigDecimal,
    pub veg_extra_per_day: BigDecimal,
    pub nonveg_extra_per_day: BigDecimal,
}

impl MonthlyCostRecord {
    pub fn rates(&self) -> RateSnapshot {
        RateSnapshot {
            mess_fee_per_day: self.mess_fee_per_day.clone(),
            veg_extra_per_day: self.veg_extra_per_day.clone(),
            nonveg_extra_per_day: self.nonveg_extra_per_day.clone(),
        }
    }
}
