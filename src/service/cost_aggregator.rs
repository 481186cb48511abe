use crate::db::MessStore;
use crate::error::{BillingError, FieldErrors, Result};
use crate::models::{
    MonthYear, MonthlyCostInputs, MonthlyCostRecord, YearAttendance, ACADEMIC_YEARS,
};
use crate::service::money::{clamp_non_negative, round_currency, round_to_unit};
use bigdecimal::{BigDecimal, Zero};
use std::str::FromStr;
use std::sync::Arc;

/// 清洗金额类文本: 只保留数字和第一个小数点, 前导小数点补 "0."
pub fn sanitize_decimal(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut seen_dot = false;
    for c in raw.chars() {
        if c.is_ascii_digit() {
            out.push(c);
        } else if c == '.' && !seen_dot {
            seen_dot = true;
            out.push(c);
        }
    }
    if out.starts_with('.') {
        out.insert(0, '0');
    }
    out
}

/// 清洗整数类文本 (天数、人数): 只保留数字
pub fn sanitize_integer(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// 校验后的输入
#[derive(Debug, Clone)]
struct ParsedCostInputs {
    month_year: MonthYear,
    grocery_cost: BigDecimal,
    vegetable_cost: BigDecimal,
    gas_charges: BigDecimal,
    milk_litres: BigDecimal,
    milk_cost_per_litre: BigDecimal,
    other_costs: BigDecimal,
    deductions_income: BigDecimal,
    veg_extra_per_day: BigDecimal,
    nonveg_extra_per_day: BigDecimal,
    reduction_days: u32,
    attendance: [YearAttendance; ACADEMIC_YEARS as usize],
}

/// 逐字段收集错误的解析器
struct InputReader {
    errors: FieldErrors,
}

impl InputReader {
    fn present<'a>(&mut self, field: &str, raw: &'a Option<String>) -> Option<&'a str> {
        match raw.as_deref().map(str::trim) {
            Some(v) if !v.is_empty() => Some(v),
            _ => {
                self.errors.add(field, "is required");
                None
            }
        }
    }

    fn decimal(&mut self, field: &str, raw: &Option<String>) -> BigDecimal {
        let Some(value) = self.present(field, raw) else {
            return BigDecimal::zero();
        };
        self.parse_decimal(field, value)
    }

    fn optional_decimal(&mut self, field: &str, raw: &Option<String>) -> BigDecimal {
        match raw.as_deref().map(str::trim) {
            Some(v) if !v.is_empty() => self.parse_decimal(field, v),
            _ => BigDecimal::zero(),
        }
    }

    fn parse_decimal(&mut self, field: &str, value: &str) -> BigDecimal {
        let cleaned = sanitize_decimal(value);
        let cleaned = cleaned.trim_end_matches('.');
        if cleaned.is_empty() {
            self.errors.add(field, "must be a number");
            return BigDecimal::zero();
        }
        match BigDecimal::from_str(cleaned) {
            Ok(v) => v,
            Err(_) => {
                self.errors.add(field, "must be a number");
                BigDecimal::zero()
            }
        }
    }

    fn integer(&mut self, field: &str, raw: &Option<String>) -> u32 {
        let Some(value) = self.present(field, raw) else {
            return 0;
        };
        self.parse_integer(field, value)
    }

    fn optional_integer(&mut self, field: &str, raw: &Option<String>) -> u32 {
        match raw.as_deref().map(str::trim) {
            Some(v) if !v.is_empty() => self.parse_integer(field, v),
            _ => 0,
        }
    }

    fn parse_integer(&mut self, field: &str, value: &str) -> u32 {
        // 整数字段先去掉小数点再取数字
        let cleaned = sanitize_integer(value);
        if cleaned.is_empty() {
            self.errors.add(field, "must be a whole number");
            return 0;
        }
        match cleaned.parse::<u32>() {
            Ok(v) => v,
            Err(_) => {
                self.errors.add(field, "is too large");
                0
            }
        }
    }
}

fn parse_inputs(inputs: &MonthlyCostInputs) -> Result<ParsedCostInputs> {
    let mut r = InputReader {
        errors: FieldErrors::new(),
    };

    let month_year = r.present("month_year", &inputs.month_year).and_then(|raw| {
        raw.parse::<MonthYear>().ok()
    });
    if month_year.is_none() && !r.errors.contains("month_year") {
        r.errors.add("month_year", "must look like \"October 2025\"");
    }

    let grocery_cost = r.decimal("grocery_cost", &inputs.grocery_cost);
    let vegetable_cost = r.decimal("vegetable_cost", &inputs.vegetable_cost);
    let gas_charges = r.decimal("gas_charges", &inputs.gas_charges);
    let milk_litres = r.decimal("milk_litres", &inputs.milk_litres);
    let milk_cost_per_litre = r.decimal("milk_cost_per_litre", &inputs.milk_cost_per_litre);
    let other_costs = r.decimal("other_costs", &inputs.other_costs);
    let deductions_income = r.decimal("deductions_income", &inputs.deductions_income);
    let veg_extra_per_day = r.optional_decimal("veg_extra_per_day", &inputs.veg_extra_per_day);
    let nonveg_extra_per_day = r.optional_decimal("nonveg_extra_per_day", &inputs.nonveg_extra_per_day);
    let reduction_days = r.optional_integer("reduction_days", &inputs.reduction_days);

    let mut attendance = [YearAttendance::default(); ACADEMIC_YEARS as usize];
    for (idx, year) in inputs.attendance.iter().enumerate() {
        let prefix = format!("attendance.year{}", idx + 1);
        attendance[idx] = YearAttendance {
            students: r.integer(&format!("{}.students", prefix), &year.students),
            days: r.integer(&format!("{}.days", prefix), &year.days),
        };
    }

    if let Some(month) = month_year {
        let limit = month.days_in_month();
        for (idx, year) in attendance.iter().enumerate() {
            if year.days > limit {
                r.errors.add(
                    format!("attendance.year{}.days", idx + 1),
                    format!("cannot exceed {} days in {}", limit, month),
                );
            }
        }
    }

    match month_year {
        Some(month_year) if r.errors.is_empty() => Ok(ParsedCostInputs {
            month_year,
            grocery_cost,
            vegetable_cost,
            gas_charges,
            milk_litres,
            milk_cost_per_litre,
            other_costs,
            deductions_income,
            veg_extra_per_day,
            nonveg_extra_per_day,
            reduction_days,
            attendance,
        }),
        _ => Err(BillingError::Validation(r.errors)),
    }
}

/// 由输入计算全部派生字段
fn derive_record(p: ParsedCostInputs) -> MonthlyCostRecord {
    // 中间结果保持精确值, 只在写入记录时按两位小数展示
    let milk_charges = &p.milk_litres * &p.milk_cost_per_litre;
    let total_expenditure =
        &p.grocery_cost + &p.vegetable_cost + &p.gas_charges + &milk_charges + &p.other_costs;
    let net_expenditure = &total_expenditure - &p.deductions_income;

    let total_possible_student_days: u64 = p.attendance.iter().map(YearAttendance::student_days).sum();
    let applicable_student_days = total_possible_student_days.saturating_sub(u64::from(p.reduction_days));

    // 分母为 0 时日伙食费为 0; 净支出为负时不产生负费率
    let mess_fee_per_day = if applicable_student_days > 0 {
        let raw = &net_expenditure / BigDecimal::from(applicable_student_days);
        clamp_non_negative(round_to_unit(&raw))
    } else {
        BigDecimal::zero()
    };

    MonthlyCostRecord {
        month_year: p.month_year,
        grocery_cost: p.grocery_cost,
        vegetable_cost: p.vegetable_cost,
        gas_charges: p.gas_charges,
        milk_litres: p.milk_litres,
        milk_cost_per_litre: p.milk_cost_per_litre,
        other_costs: p.other_costs,
        deductions_income: p.deductions_income,
        veg_extra_per_day: p.veg_extra_per_day,
        nonveg_extra_per_day: p.nonveg_extra_per_day,
        reduction_days: p.reduction_days,
        attendance: p.attendance,
        milk_charges: round_currency(&milk_charges),
        total_expenditure: round_currency(&total_expenditure),
        net_expenditure: round_currency(&net_expenditure),
        total_possible_student_days,
        applicable_student_days,
        mess_fee_per_day,
    }
}

/// 纯计算: 校验并生成月度记录, 不落库
pub fn calculate_monthly_record(inputs: &MonthlyCostInputs) -> Result<MonthlyCostRecord> {
    parse_inputs(inputs).map(derive_record)
}

/// 成本汇总器
pub struct CostAggregator {
    store: Arc<dyn MessStore>,
}

impl CostAggregator {
    pub fn new(store: Arc<dyn MessStore>) -> Self {
        Self { store }
    }

    /// 确认计算: 校验、计算并持久化; 同一账期后确认的覆盖先确认的
    pub async fn confirm_monthly_calculation(&self, inputs: &MonthlyCostInputs) -> Result<MonthlyCostRecord> {
        let record = calculate_monthly_record(inputs)?;

        self.store.persist_monthly_cost_record(&record).await?;

        tracing::info!(
            "[MessCost] {} confirmed: net expenditure {}, applicable student-days {}, fee/day {}",
            record.month_year, record.net_expenditure, record.applicable_student_days, record.mess_fee_per_day
        );
        Ok(record)
    }

    pub async fn monthly_record(&self, month_year: &MonthYear) -> Result<MonthlyCostRecord> {
        self.store
            .load_monthly_cost_record(month_year)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("monthly cost record for {}", month_year)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::YearAttendanceInput;

    fn s(v: &str) -> Option<String> {
        Some(v.to_string())
    }

    fn year(students: &str, days: &str) -> YearAttendanceInput {
        YearAttendanceInput {
            students: s(students),
            days: s(days),
        }
    }

    fn october_inputs() -> MonthlyCostInputs {
        MonthlyCostInputs {
            month_year: s("October 2025"),
            grocery_cost: s("40000"),
            vegetable_cost: s("15000"),
            gas_charges: s("5000"),
            milk_litres: s("500"),
            milk_cost_per_litre: s("40"),
            other_costs: s("2000"),
            deductions_income: s("2000"),
            veg_extra_per_day: s("30"),
            nonveg_extra_per_day: s("50"),
            reduction_days: s("0"),
            attendance: [year("20", "28"), year("15", "28"), year("0", "0"), year("0", "0")],
        }
    }

    #[test]
    fn computes_reference_month() {
        let record = calculate_monthly_record(&october_inputs()).unwrap();
        assert_eq!(record.milk_charges, BigDecimal::from(20000));
        assert_eq!(record.total_expenditure, BigDecimal::from(82000));
        assert_eq!(record.net_expenditure, BigDecimal::from(80000));
        assert_eq!(record.total_possible_student_days, 980);
        assert_eq!(record.applicable_student_days, 980);
        assert_eq!(record.mess_fee_per_day, BigDecimal::from(82));
    }

    #[test]
    fn fee_uses_unrounded_expenditure() {
        let mut inputs = october_inputs();
        for field in [
            &mut inputs.grocery_cost,
            &mut inputs.vegetable_cost,
            &mut inputs.gas_charges,
            &mut inputs.other_costs,
            &mut inputs.deductions_income,
        ] {
            *field = s("0");
        }
        inputs.milk_litres = s("0.4951");
        inputs.milk_cost_per_litre = s("1");
        inputs.attendance = [year("1", "1"), year("0", "0"), year("0", "0"), year("0", "0")];

        let record = calculate_monthly_record(&inputs).unwrap();
        // 展示值 0.50, 但 0.4951 / 1 四舍五入为 0
        assert_eq!(record.milk_charges, BigDecimal::from_str("0.50").unwrap());
        assert_eq!(record.mess_fee_per_day, BigDecimal::zero());
    }

    #[test]
    fn negative_net_expenditure_clamps_fee_to_zero() {
        let mut inputs = october_inputs();
        inputs.deductions_income = s("100000");
        let record = calculate_monthly_record(&inputs).unwrap();
        assert_eq!(record.net_expenditure, BigDecimal::from(-18000));
        assert_eq!(record.mess_fee_per_day, BigDecimal::zero());
    }

    #[test]
    fn zero_student_days_gives_zero_fee() {
        let mut inputs = october_inputs();
        inputs.attendance = [year("0", "28"), year("0", "0"), year("0", "0"), year("0", "0")];
        let record = calculate_monthly_record(&inputs).unwrap();
        assert_eq!(record.applicable_student_days, 0);
        assert_eq!(record.mess_fee_per_day, BigDecimal::zero());
    }

    #[test]
    fn reduction_days_never_make_student_days_negative() {
        let mut inputs = october_inputs();
        inputs.reduction_days = s("5000");
        let record = calculate_monthly_record(&inputs).unwrap();
        assert_eq!(record.total_possible_student_days, 980);
        assert_eq!(record.applicable_student_days, 0);
        assert_eq!(record.mess_fee_per_day, BigDecimal::zero());

        inputs.reduction_days = s("180");
        let record = calculate_monthly_record(&inputs).unwrap();
        assert_eq!(record.applicable_student_days, 800);
        assert_eq!(record.mess_fee_per_day, BigDecimal::from(100));
    }

    #[test]
    fn missing_fields_are_reported_per_field() {
        let mut inputs = october_inputs();
        inputs.grocery_cost = None;
        inputs.gas_charges = s("   ");
        inputs.attendance[2].days = None;

        let err = calculate_monthly_record(&inputs).unwrap_err();
        let BillingError::Validation(fields) = err else {
            panic!("expected validation error");
        };
        assert_eq!(fields.get("grocery_cost"), Some("is required"));
        assert_eq!(fields.get("gas_charges"), Some("is required"));
        assert!(fields.contains("attendance.year3.days"));
        assert!(!fields.contains("vegetable_cost"));
    }

    #[test]
    fn optional_extras_default_to_zero() {
        let mut inputs = october_inputs();
        inputs.veg_extra_per_day = None;
        inputs.reduction_days = None;
        let record = calculate_monthly_record(&inputs).unwrap();
        assert_eq!(record.veg_extra_per_day, BigDecimal::zero());
        assert_eq!(record.reduction_days, 0);
    }

    #[test]
    fn sanitizes_numeric_text() {
        assert_eq!(sanitize_decimal("₹40,000.50"), "40000.50");
        assert_eq!(sanitize_decimal("1.2.3"), "1.23");
        assert_eq!(sanitize_decimal(".5"), "0.5");
        assert_eq!(sanitize_integer("2.8"), "28");
        assert_eq!(sanitize_integer("20 students"), "20");
    }

    #[test]
    fn non_numeric_text_is_rejected_not_defaulted() {
        let mut inputs = october_inputs();
        inputs.other_costs = s("abc");
        let err = calculate_monthly_record(&inputs).unwrap_err();
        let BillingError::Validation(fields) = err else {
            panic!("expected validation error");
        };
        assert_eq!(fields.get("other_costs"), Some("must be a number"));
    }

    #[test]
    fn attendance_days_cannot_exceed_month_length() {
        let mut inputs = october_inputs();
        inputs.attendance[0] = year("20", "32");
        let err = calculate_monthly_record(&inputs).unwrap_err();
        let BillingError::Validation(fields) = err else {
            panic!("expected validation error");
        };
        assert!(fields.contains("attendance.year1.days"));
    }

    #[test]
    fn bad_month_is_a_field_error() {
        let mut inputs = october_inputs();
        inputs.month_year = s("Smarch 2025");
        let err = calculate_monthly_record(&inputs).unwrap_err();
        let BillingError::Validation(fields) = err else {
            panic!("expected validation error");
        };
        assert!(fields.contains("month_year"));
    }
}
