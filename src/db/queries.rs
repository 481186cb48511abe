use super::MessStore;
use crate::error::{BillingError, Result};
use crate::models::{
    BillFilters, BillId, BillPatch, Department, IndividualBillRecord, MonthYear,
    MonthlyCostRecord, StudentAttendanceRecord, YearAttendance,
};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use std::time::Duration;

const BILL_COLUMNS: &str = "id, student_id, student_name, department, academic_year, month_key, \
    mess_fee_per_day, veg_extra_per_day, nonveg_extra_per_day, \
    days_present, reduction_days, is_veg, veg_days, non_veg_days, \
    mess_charges, meal_extra, total_amount, \
    status, show, ispaid, paid_date, latest_order_id, sent_at, edited";

/// PostgreSQL 存储
pub struct PgMessStore {
    pool: PgPool,
}

impl PgMessStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct DepartmentRow {
    department: String,
    department_id: i64,
}

#[derive(Debug, FromRow)]
struct RosterRow {
    student_id: String,
    student_name: String,
    department: String,
    academic_year: i32,
    days_present: i32,
    is_veg: bool,
    veg_days: i32,
    non_veg_days: i32,
    reduction_days: i32,
}

/// 月度成本表 (mess_monthly_cost)
#[derive(Debug, FromRow)]
struct MonthlyCostRow {
    month_key: String,
    grocery_cost: BigDecimal,
    vegetable_cost: BigDecimal,
    gas_charges: BigDecimal,
    milk_litres: BigDecimal,
    milk_cost_per_litre: BigDecimal,
    other_costs: BigDecimal,
    deductions_income: BigDecimal,
    veg_extra_per_day: BigDecimal,
    nonveg_extra_per_day: BigDecimal,
    reduction_days: i32,
    y1_students: i32,
    y1_days: i32,
    y2_students: i32,
    y2_days: i32,
    y3_students: i32,
    y3_days: i32,
    y4_students: i32,
    y4_days: i32,
    milk_charges: BigDecimal,
    total_expenditure: BigDecimal,
    net_expenditure: BigDecimal,
    total_possible_student_days: i64,
    applicable_student_days: i64,
    mess_fee_per_day: BigDecimal,
}

/// 个人账单表 (mess_bill)
#[derive(Debug, FromRow)]
struct BillRow {
    id: String,
    student_id: String,
    student_name: String,
    department: String,
    academic_year: i32,
    month_key: String,
    mess_fee_per_day: BigDecimal,
    veg_extra_per_day: BigDecimal,
    nonveg_extra_per_day: BigDecimal,
    days_present: i32,
    reduction_days: i32,
    is_veg: bool,
    veg_days: i32,
    non_veg_days: i32,
    mess_charges: BigDecimal,
    meal_extra: BigDecimal,
    total_amount: BigDecimal,
    status: String,
    show: bool,
    ispaid: bool,
    paid_date: Option<NaiveDate>,
    latest_order_id: Option<String>,
    sent_at: Option<DateTime<Utc>>,
    edited: bool,
}

fn corrupt(what: &str, detail: impl std::fmt::Display) -> BillingError {
    BillingError::Transient(format!("corrupt {} row: {}", what, detail))
}

fn to_u32(value: i32, field: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| corrupt(field, value))
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn parse_month(key: &str) -> Result<MonthYear> {
    MonthYear::from_key(key).ok_or_else(|| corrupt("month_key", key))
}

impl TryFrom<RosterRow> for StudentAttendanceRecord {
    type Error = BillingError;

    fn try_from(row: RosterRow) -> Result<Self> {
        Ok(Self {
            student_id: row.student_id,
            student_name: row.student_name,
            department: row.department,
            academic_year: u8::try_from(row.academic_year).map_err(|_| corrupt("academic_year", row.academic_year))?,
            days_present: to_u32(row.days_present, "days_present")?,
            is_veg: row.is_veg,
            veg_days: to_u32(row.veg_days, "veg_days")?,
            non_veg_days: to_u32(row.non_veg_days, "non_veg_days")?,
            reduction_days: to_u32(row.reduction_days, "reduction_days")?,
        })
    }
}

impl TryFrom<MonthlyCostRow> for MonthlyCostRecord {
    type Error = BillingError;

    fn try_from(row: MonthlyCostRow) -> Result<Self> {
        let year = |students: i32, days: i32| -> Result<YearAttendance> {
            Ok(YearAttendance {
                students: to_u32(students, "students")?,
                days: to_u32(days, "days")?,
            })
        };
        Ok(Self {
            month_year: parse_month(&row.month_key)?,
            grocery_cost: row.grocery_cost,
            vegetable_cost: row.vegetable_cost,
            gas_charges: row.gas_charges,
            milk_litres: row.milk_litres,
            milk_cost_per_litre: row.milk_cost_per_litre,
            other_costs: row.other_costs,
            deductions_income: row.deductions_income,
            veg_extra_per_day: row.veg_extra_per_day,
            nonveg_extra_per_day: row.nonveg_extra_per_day,
            reduction_days: to_u32(row.reduction_days, "reduction_days")?,
            attendance: [
                year(row.y1_students, row.y1_days)?,
                year(row.y2_students, row.y2_days)?,
                year(row.y3_students, row.y3_days)?,
                year(row.y4_students, row.y4_days)?,
            ],
            milk_charges: row.milk_charges,
            total_expenditure: row.total_expenditure,
            net_expenditure: row.net_expenditure,
            total_possible_student_days: u64::try_from(row.total_possible_student_days)
                .map_err(|_| corrupt("total_possible_student_days", row.total_possible_student_days))?,
            applicable_student_days: u64::try_from(row.applicable_student_days)
                .map_err(|_| corrupt("applicable_student_days", row.applicable_student_days))?,
            mess_fee_per_day: row.mess_fee_per_day,
        })
    }
}

impl TryFrom<BillRow> for IndividualBillRecord {
    type Error = BillingError;

    fn try_from(row: BillRow) -> Result<Self> {
        Ok(Self {
            id: BillId(row.id),
            student_id: row.student_id,
            student_name: row.student_name,
            department: row.department,
            academic_year: u8::try_from(row.academic_year).map_err(|_| corrupt("academic_year", row.academic_year))?,
            month_year: parse_month(&row.month_key)?,
            mess_fee_per_day: row.mess_fee_per_day,
            veg_extra_per_day: row.veg_extra_per_day,
            nonveg_extra_per_day: row.nonveg_extra_per_day,
            days_present: to_u32(row.days_present, "days_present")?,
            reduction_days: to_u32(row.reduction_days, "reduction_days")?,
            is_veg: row.is_veg,
            veg_days: to_u32(row.veg_days, "veg_days")?,
            non_veg_days: to_u32(row.non_veg_days, "non_veg_days")?,
            mess_charges: row.mess_charges,
            meal_extra: row.meal_extra,
            total_amount: row.total_amount,
            status: row.status.parse().map_err(|e: String| corrupt("status", e))?,
            show: row.show,
            ispaid: row.ispaid,
            paid_date: row.paid_date,
            latest_order_id: row.latest_order_id,
            sent_at: row.sent_at,
            edited: row.edited,
        })
    }
}

/// 子串匹配的 ILIKE 模式, 用户输入中的 `\`、`%`、`_` 按字面匹配
fn contains_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// 按筛选条件拼接 WHERE 子句
fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, filters: &BillFilters, with_search: bool) {
    builder.push(" WHERE 1 = 1");
    if let Some(month) = &filters.month_year {
        builder.push(" AND month_key = ").push_bind(month.key());
    }
    if let Some(dept) = &filters.department {
        builder.push(" AND department = ").push_bind(dept.clone());
    }
    if let Some(year) = filters.academic_year {
        builder.push(" AND academic_year = ").push_bind(i32::from(year));
    }
    if with_search {
        if let Some(term) = filters.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            let pattern = contains_pattern(term);
            builder
                .push(" AND (student_name ILIKE ")
                .push_bind(pattern.clone())
                .push(r" ESCAPE '\' OR student_id ILIKE ")
                .push_bind(pattern)
                .push(r" ESCAPE '\')");
        }
    }
}

#[async_trait]
impl MessStore for PgMessStore {
    async fn fetch_departments(&self) -> Result<Vec<Department>> {
        let rows = sqlx::query_as::<_, DepartmentRow>(
            r#"
            SELECT department, department_id
            FROM mess_departments
            ORDER BY department
            "#
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| Department {
                department: r.department,
                department_id: r.department_id,
            })
            .collect())
    }

    async fn fetch_roster(&self, filters: &BillFilters) -> Result<Vec<StudentAttendanceRecord>> {
        if filters.month_year.is_none() {
            return Err(BillingError::validation("month_year", "required to fetch roster"));
        }
        let mut builder = QueryBuilder::<Postgres>::new(
            "SELECT student_id, student_name, department, academic_year, days_present, \
             is_veg, veg_days, non_veg_days, reduction_days FROM mess_roster",
        );
        push_filters(&mut builder, filters, false);
        builder.push(" ORDER BY department, academic_year, student_id");

        let rows = builder.build_query_as::<RosterRow>().fetch_all(&self.pool).await?;
        rows.into_iter().map(StudentAttendanceRecord::try_from).collect()
    }

    async fn persist_monthly_cost_record(&self, record: &MonthlyCostRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // 旧记录转入历史表 (被覆盖而非删除)
        sqlx::query(
            r#"
            INSERT INTO mess_monthly_cost_history
            SELECT *, now() AS superseded_at FROM mess_monthly_cost WHERE month_key = $1
            "#
        )
        .bind(record.month_year.key())
        .execute(&mut *tx)
        .await?;

        let a = &record.attendance;
        sqlx::query(
            r#"
            INSERT INTO mess_monthly_cost (
                month_key, grocery_cost, vegetable_cost, gas_charges, milk_litres,
                milk_cost_per_litre, other_costs, deductions_income,
                veg_extra_per_day, nonveg_extra_per_day, reduction_days,
                y1_students, y1_days, y2_students, y2_days,
                y3_students, y3_days, y4_students, y4_days,
                milk_charges, total_expenditure, net_expenditure,
                total_possible_student_days, applicable_student_days, mess_fee_per_day
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25
            )
            ON CONFLICT (month_key) DO UPDATE SET
                grocery_cost = EXCLUDED.grocery_cost,
                vegetable_cost = EXCLUDED.vegetable_cost,
                gas_charges = EXCLUDED.gas_charges,
                milk_litres = EXCLUDED.milk_litres,
                milk_cost_per_litre = EXCLUDED.milk_cost_per_litre,
                other_costs = EXCLUDED.other_costs,
                deductions_income = EXCLUDED.deductions_income,
                veg_extra_per_day = EXCLUDED.veg_extra_per_day,
                nonveg_extra_per_day = EXCLUDED.nonveg_extra_per_day,
                reduction_days = EXCLUDED.reduction_days,
                y1_students = EXCLUDED.y1_students, y1_days = EXCLUDED.y1_days,
                y2_students = EXCLUDED.y2_students, y2_days = EXCLUDED.y2_days,
                y3_students = EXCLUDED.y3_students, y3_days = EXCLUDED.y3_days,
                y4_students = EXCLUDED.y4_students, y4_days = EXCLUDED.y4_days,
                milk_charges = EXCLUDED.milk_charges,
                total_expenditure = EXCLUDED.total_expenditure,
                net_expenditure = EXCLUDED.net_expenditure,
                total_possible_student_days = EXCLUDED.total_possible_student_days,
                applicable_student_days = EXCLUDED.applicable_student_days,
                mess_fee_per_day = EXCLUDED.mess_fee_per_day
            "#
        )
        .bind(record.month_year.key())
        .bind(&record.grocery_cost)
        .bind(&record.vegetable_cost)
        .bind(&record.gas_charges)
        .bind(&record.milk_litres)
        .bind(&record.milk_cost_per_litre)
        .bind(&record.other_costs)
        .bind(&record.deductions_income)
        .bind(&record.veg_extra_per_day)
        .bind(&record.nonveg_extra_per_day)
        .bind(to_i32(record.reduction_days))
        .bind(to_i32(a[0].students))
        .bind(to_i32(a[0].days))
        .bind(to_i32(a[1].students))
        .bind(to_i32(a[1].days))
        .bind(to_i32(a[2].students))
        .bind(to_i32(a[2].days))
        .bind(to_i32(a[3].students))
        .bind(to_i32(a[3].days))
        .bind(&record.milk_charges)
        .bind(&record.total_expenditure)
        .bind(&record.net_expenditure)
        .bind(i64::try_from(record.total_possible_student_days).unwrap_or(i64::MAX))
        .bind(i64::try_from(record.applicable_student_days).unwrap_or(i64::MAX))
        .bind(&record.mess_fee_per_day)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn load_monthly_cost_record(&self, month_year: &MonthYear) -> Result<Option<MonthlyCostRecord>> {
        let row = sqlx::query_as::<_, MonthlyCostRow>(
            r#"
            SELECT month_key, grocery_cost, vegetable_cost, gas_charges, milk_litres,
                   milk_cost_per_litre, other_costs, deductions_income,
                   veg_extra_per_day, nonveg_extra_per_day, reduction_days,
                   y1_students, y1_days, y2_students, y2_days,
                   y3_students, y3_days, y4_students, y4_days,
                   milk_charges, total_expenditure, net_expenditure,
                   total_possible_student_days, applicable_student_days, mess_fee_per_day
            FROM mess_monthly_cost
            WHERE month_key = $1
            "#
        )
        .bind(month_year.key())
        .fetch_optional(&self.pool)
        .await?;

        row.map(MonthlyCostRecord::try_from).transpose()
    }

    async fn insert_bills(&self, bills: &[IndividualBillRecord]) -> Result<()> {
        if bills.is_empty() {
            return Ok(());
        }

        tracing::debug!("开始批量写入账单, {} 条记录", bills.len());
        let start_time = std::time::Instant::now();

        for chunk in bills.chunks(1000) {
            let mut query_builder = QueryBuilder::<Postgres>::new(format!("INSERT INTO mess_bill ({}) ", BILL_COLUMNS));

            query_builder.push_values(chunk, |mut b, bill| {
                b.push_bind(bill.id.0.clone())
                    .push_bind(&bill.student_id)
                    .push_bind(&bill.student_name)
                    .push_bind(&bill.department)
                    .push_bind(i32::from(bill.academic_year))
                    .push_bind(bill.month_year.key())
                    .push_bind(&bill.mess_fee_per_day)
                    .push_bind(&bill.veg_extra_per_day)
                    .push_bind(&bill.nonveg_extra_per_day)
                    .push_bind(to_i32(bill.days_present))
                    .push_bind(to_i32(bill.reduction_days))
                    .push_bind(bill.is_veg)
                    .push_bind(to_i32(bill.veg_days))
                    .push_bind(to_i32(bill.non_veg_days))
                    .push_bind(&bill.mess_charges)
                    .push_bind(&bill.meal_extra)
                    .push_bind(&bill.total_amount)
                    .push_bind(bill.status.as_str())
                    .push_bind(bill.show)
                    .push_bind(bill.ispaid)
                    .push_bind(bill.paid_date)
                    .push_bind(&bill.latest_order_id)
                    .push_bind(bill.sent_at)
                    .push_bind(bill.edited);
            });
            query_builder.push(" ON CONFLICT (id) DO NOTHING");

            // 超时控制: 30秒
            let execute_result = tokio::time::timeout(
                Duration::from_secs(30),
                query_builder.build().execute(&self.pool),
            )
            .await;

            match execute_result {
                Ok(Ok(result)) => {
                    tracing::debug!("✓ INSERT mess_bill 影响 {} 行", result.rows_affected());
                }
                Ok(Err(e)) => {
                    tracing::error!("✗ INSERT mess_bill 失败: {:?}", e);
                    return Err(e.into());
                }
                Err(_) => {
                    tracing::error!("✗ INSERT mess_bill 超时 (>30秒)!");
                    return Err(BillingError::Transient("bill insert timed out".to_string()));
                }
            }
        }

        tracing::info!("账单写入完成, {} 条, 耗时: {:?}", bills.len(), start_time.elapsed());
        Ok(())
    }

    async fn get_bill(&self, bill_id: &BillId) -> Result<Option<IndividualBillRecord>> {
        let row = sqlx::query_as::<_, BillRow>(&format!(
            "SELECT {} FROM mess_bill WHERE id = $1",
            BILL_COLUMNS
        ))
        .bind(bill_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(IndividualBillRecord::try_from).transpose()
    }

    async fn list_bills(&self, filters: &BillFilters) -> Result<Vec<IndividualBillRecord>> {
        let mut builder = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM mess_bill", BILL_COLUMNS));
        push_filters(&mut builder, filters, true);
        builder.push(" ORDER BY month_key, department, academic_year, student_id");

        let rows = builder.build_query_as::<BillRow>().fetch_all(&self.pool).await?;
        rows.into_iter().map(IndividualBillRecord::try_from).collect()
    }

    async fn persist_bill_mutation(&self, bill_id: &BillId, patch: &BillPatch) -> Result<bool> {
        let recalculated = patch.recalculated.as_deref();
        let result = sqlx::query(
            r#"
            UPDATE mess_bill SET
                status = COALESCE($2, status),
                show = COALESCE($3, show),
                ispaid = COALESCE($4, ispaid),
                paid_date = COALESCE($5, paid_date),
                latest_order_id = COALESCE($6, latest_order_id),
                sent_at = COALESCE($7, sent_at),
                days_present = COALESCE($8, days_present),
                reduction_days = COALESCE($9, reduction_days),
                is_veg = COALESCE($10, is_veg),
                veg_days = COALESCE($11, veg_days),
                non_veg_days = COALESCE($12, non_veg_days),
                mess_charges = COALESCE($13, mess_charges),
                meal_extra = COALESCE($14, meal_extra),
                total_amount = COALESCE($15, total_amount),
                edited = edited OR $16
            WHERE id = $1
              AND ($17::VARCHAR IS NULL OR status = $17)
            "#
        )
        .bind(bill_id.as_str())
        .bind(patch.status.map(|s| s.as_str()))
        .bind(patch.show)
        .bind(patch.ispaid)
        .bind(patch.paid_date)
        .bind(patch.latest_order_id.as_deref())
        .bind(patch.sent_at)
        .bind(recalculated.map(|b| to_i32(b.days_present)))
        .bind(recalculated.map(|b| to_i32(b.reduction_days)))
        .bind(recalculated.map(|b| b.is_veg))
        .bind(recalculated.map(|b| to_i32(b.veg_days)))
        .bind(recalculated.map(|b| to_i32(b.non_veg_days)))
        .bind(recalculated.map(|b| b.mess_charges.clone()))
        .bind(recalculated.map(|b| b.meal_extra.clone()))
        .bind(recalculated.map(|b| b.total_amount.clone()))
        .bind(recalculated.is_some())
        .bind(patch.expected_status.map(|s| s.as_str()))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        // 0 行: 区分账单不存在与状态条件不成立
        let exists: Option<i32> = sqlx::query_scalar("SELECT 1 FROM mess_bill WHERE id = $1")
            .bind(bill_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        match exists {
            Some(_) => Ok(false),
            None => Err(BillingError::NotFound(format!("bill {}", bill_id))),
        }
    }
}
