use crate::db::MessStore;
use crate::error::{BillingError, FieldErrors, Result};
use crate::models::{
    BillEdit, BillFilters, BillId, BillPatch, BillStatus, IndividualBillRecord, MonthYear,
    MonthlyCostRecord, RateSnapshot, StudentAttendanceRecord, ACADEMIC_YEARS,
};
use crate::service::money::{clamp_non_negative, round_currency};
use bigdecimal::BigDecimal;
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

fn check_days(field: String, value: u32, max: u32) -> Result<()> {
    if value > max {
        return Err(BillingError::Range {
            field,
            value: i64::from(value),
            min: 0,
            max: i64::from(max),
        });
    }
    Ok(())
}

/// 按冻结单价计算单个学生的账单
///
/// 出勤天数超出当月天数返回 `Range`, 不做静默截断。
/// 素食/非素食天数同时非零时无法判断计费口径, 返回 `Validation`。
pub fn compute_bill(
    rates: &RateSnapshot,
    month_year: MonthYear,
    student: &StudentAttendanceRecord,
) -> Result<IndividualBillRecord> {
    let sid = &student.student_id;
    let max_days = month_year.days_in_month();

    if !(1..=ACADEMIC_YEARS).contains(&student.academic_year) {
        return Err(BillingError::Range {
            field: format!("{}.academic_year", sid),
            value: i64::from(student.academic_year),
            min: 1,
            max: i64::from(ACADEMIC_YEARS),
        });
    }
    check_days(format!("{}.days_present", sid), student.days_present, max_days)?;
    check_days(format!("{}.veg_days", sid), student.veg_days, max_days)?;
    check_days(format!("{}.non_veg_days", sid), student.non_veg_days, max_days)?;
    check_days(format!("{}.reduction_days", sid), student.reduction_days, max_days)?;

    if student.veg_days > 0 && student.non_veg_days > 0 {
        return Err(BillingError::validation(
            format!("{}.meal_days", sid),
            "veg_days and non_veg_days are both non-zero",
        ));
    }

    let charged_days = student.days_present.saturating_sub(student.reduction_days);
    let mess_charges = clamp_non_negative(round_currency(
        &(&rates.mess_fee_per_day * BigDecimal::from(charged_days)),
    ));
    let meal_extra = if student.is_veg {
        &rates.veg_extra_per_day * BigDecimal::from(student.veg_days)
    } else {
        &rates.nonveg_extra_per_day * BigDecimal::from(student.non_veg_days)
    };
    let meal_extra = round_currency(&meal_extra);
    let total_amount = &mess_charges + &meal_extra;

    Ok(IndividualBillRecord {
        id: BillId::new(sid, &month_year),
        student_id: sid.clone(),
        student_name: student.student_name.clone(),
        department: student.department.clone(),
        academic_year: student.academic_year,
        month_year,
        mess_fee_per_day: rates.mess_fee_per_day.clone(),
        veg_extra_per_day: rates.veg_extra_per_day.clone(),
        nonveg_extra_per_day: rates.nonveg_extra_per_day.clone(),
        days_present: student.days_present,
        reduction_days: student.reduction_days,
        is_veg: student.is_veg,
        veg_days: student.veg_days,
        non_veg_days: student.non_veg_days,
        mess_charges,
        meal_extra,
        total_amount,
        status: BillStatus::PendingVerification,
        show: false,
        ispaid: false,
        paid_date: None,
        latest_order_id: None,
        sent_at: None,
        edited: false,
    })
}

/// 同一账期内学号不能重复
fn check_unique_roster(roster: &[StudentAttendanceRecord]) -> Result<()> {
    let mut seen = HashSet::with_capacity(roster.len());
    let mut duplicates = FieldErrors::new();
    for student in roster {
        if !seen.insert(student.student_id.as_str()) {
            duplicates.add(format!("{}.student_id", student.student_id), "duplicate roster entry");
        }
    }
    if duplicates.is_empty() {
        Ok(())
    } else {
        Err(BillingError::Validation(duplicates))
    }
}

/// 为名单中每个学生生成账单 (纯函数, 结果保持名单顺序)
pub fn generate_bills(
    record: &MonthlyCostRecord,
    roster: &[StudentAttendanceRecord],
) -> Result<Vec<IndividualBillRecord>> {
    check_unique_roster(roster)?;

    let rates = record.rates();
    let computed: Vec<Result<IndividualBillRecord>> = roster
        .par_iter()
        .map(|student| compute_bill(&rates, record.month_year, student))
        .collect();

    // 按名单顺序返回第一个错误
    computed.into_iter().collect()
}

/// 以账单自身冻结的单价重新计算
pub fn recalculate_bill(bill: &IndividualBillRecord, edit: &BillEdit) -> Result<IndividualBillRecord> {
    let student = edit.merge_into(bill);
    let mut next = compute_bill(&bill.rates(), bill.month_year, &student)?;
    next.status = bill.status;
    next.show = bill.show;
    next.ispaid = bill.ispaid;
    next.paid_date = bill.paid_date;
    next.latest_order_id = bill.latest_order_id.clone();
    next.sent_at = bill.sent_at;
    next.edited = true;
    Ok(next)
}

/// 账单生成器
pub struct BillGenerator {
    store: Arc<dyn MessStore>,
}

impl BillGenerator {
    pub fn new(store: Arc<dyn MessStore>) -> Self {
        Self { store }
    }

    /// 按 (账期, 院系, 学年) 取账单, 缺失的按当前月度记录补生成
    ///
    /// 是否已存在按账单ID在整个账期内判断 (学生换了院系也不会重复生成),
    /// 返回的总是存储中的记录, 所以重复调用结果不变。
    pub async fn generate_for_slice(&self, filters: &BillFilters) -> Result<Vec<IndividualBillRecord>> {
        let month_year = filters
            .month_year
            .ok_or_else(|| BillingError::validation("month_year", "is required"))?;
        let slice = BillFilters::for_slice(month_year, filters.department.clone(), filters.academic_year);
        let whole_month = BillFilters::for_slice(month_year, None, None);

        let record = self
            .store
            .load_monthly_cost_record(&month_year)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("monthly cost record for {}", month_year)))?;

        let roster = self.store.fetch_roster(&slice).await?;
        check_unique_roster(&roster)?;
        let existing = self.stored_bills(&whole_month).await?;

        let missing: Vec<StudentAttendanceRecord> = roster
            .iter()
            .filter(|s| !existing.contains_key(&BillId::new(&s.student_id, &month_year)))
            .cloned()
            .collect();

        let created = generate_bills(&record, &missing)?;
        let stored = if created.is_empty() {
            existing
        } else {
            self.store.insert_bills(&created).await?;
            self.stored_bills(&whole_month).await?
        };

        tracing::info!(
            "[MessBill] {} dept={:?} year={:?}: roster {}, generated {}",
            month_year, slice.department, slice.academic_year, roster.len(), created.len()
        );

        let mut stored = stored;
        let mut bills = Vec::with_capacity(roster.len());
        for student in &roster {
            let id = BillId::new(&student.student_id, &month_year);
            match stored.remove(&id) {
                Some(bill) => bills.push(bill),
                None => {
                    return Err(BillingError::Transient(format!("bill {} missing after insert", id)));
                }
            }
        }
        // 名单中已不存在但已生成过的本切片账单也保留
        let mut leftovers: Vec<IndividualBillRecord> =
            stored.into_values().filter(|b| slice.matches(b)).collect();
        leftovers.sort_by(|a, b| a.student_id.cmp(&b.student_id));
        bills.extend(leftovers);
        Ok(bills)
    }

    async fn stored_bills(&self, filters: &BillFilters) -> Result<HashMap<BillId, IndividualBillRecord>> {
        Ok(self
            .store
            .list_bills(filters)
            .await?
            .into_iter()
            .map(|b| (b.id.clone(), b))
            .collect())
    }

    /// 人工修正单张账单, 仅限待审核状态
    pub async fn edit_bill(&self, bill_id: &BillId, edit: &BillEdit) -> Result<IndividualBillRecord> {
        let bill = self
            .store
            .get_bill(bill_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("bill {}", bill_id)))?;

        if bill.status != BillStatus::PendingVerification {
            return Err(BillingError::AlreadyVerified(bill_id.clone()));
        }

        let next = recalculate_bill(&bill, edit)?;
        let applied = self
            .store
            .persist_bill_mutation(bill_id, &BillPatch::recalculated(next.clone()))
            .await?;
        if !applied {
            return Err(BillingError::AlreadyVerified(bill_id.clone()));
        }

        tracing::info!("[MessBill] {} edited: total {} -> {}", bill_id, bill.total_amount, next.total_amount);
        Ok(next)
    }
}
