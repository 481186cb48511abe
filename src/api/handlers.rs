use crate::error::BillingError;
use crate::models::{
    BillEdit, BillFilters, BillId, BulkAction, MonthYear, MonthlyCostInputs, PublishScope,
    Selection,
};
use crate::service::MessBillingService;
use axum::{
    extract::{Json, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub type SharedService = Arc<MessBillingService>;

/// 统一响应体
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
}

fn ok<T: Serialize>(message: impl Into<String>, data: T) -> Response {
    let body = ApiResponse {
        success: true,
        message: message.into(),
        data: Some(data),
    };
    (StatusCode::OK, Json(body)).into_response()
}

/// 错误响应: 字段错误、失败明细放在 data 里
impl IntoResponse for BillingError {
    fn into_response(self) -> Response {
        let status = match &self {
            BillingError::Validation(_) | BillingError::Range { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            BillingError::AlreadyVerified(_) | BillingError::IncompletePublish { .. } => StatusCode::CONFLICT,
            BillingError::NotFound(_) => StatusCode::NOT_FOUND,
            BillingError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            BillingError::PartialBulkFailure { .. } => StatusCode::MULTI_STATUS,
        };
        let data = match &self {
            BillingError::Validation(fields) => serde_json::to_value(fields).ok(),
            BillingError::IncompletePublish { slices } => serde_json::to_value(slices).ok(),
            BillingError::PartialBulkFailure { failed, .. } => serde_json::to_value(failed).ok(),
            _ => None,
        };
        let body = ApiResponse {
            success: false,
            message: self.to_string(),
            data,
        };
        (status, Json(body)).into_response()
    }
}

/// 健康检查
pub async fn health_check() -> &'static str {
    "OK"
}

pub async fn list_departments(State(service): State<SharedService>) -> Response {
    match service.departments().await {
        Ok(departments) => ok(format!("{} departments", departments.len()), departments),
        Err(e) => e.into_response(),
    }
}

/// 确认月度计算
pub async fn confirm_monthly(
    State(service): State<SharedService>,
    Json(inputs): Json<MonthlyCostInputs>,
) -> Response {
    match service.costs.confirm_monthly_calculation(&inputs).await {
        Ok(record) => ok(format!("Monthly cost for {} confirmed", record.month_year), record),
        Err(e) => e.into_response(),
    }
}

pub async fn get_monthly(
    State(service): State<SharedService>,
    Path(month_year): Path<String>,
) -> Response {
    let month: MonthYear = match month_year.parse() {
        Ok(m) => m,
        Err(e) => return BillingError::validation("month_year", e.to_string()).into_response(),
    };
    match service.costs.monthly_record(&month).await {
        Ok(record) => ok(format!("Monthly cost for {}", month), record),
        Err(e) => e.into_response(),
    }
}

/// 查询参数 (GET 接口)
#[derive(Debug, Default, Deserialize)]
pub struct BillQueryParams {
    pub month_year: Option<MonthYear>,
    pub department: Option<String>,
    pub academic_year: Option<u8>,
    pub search: Option<String>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

impl BillQueryParams {
    fn filters(&self) -> BillFilters {
        BillFilters {
            month_year: self.month_year,
            department: self.department.clone().filter(|d| !d.is_empty()),
            academic_year: self.academic_year,
            search: self.search.clone(),
        }
    }
}

pub async fn generate_bills(
    State(service): State<SharedService>,
    Json(filters): Json<BillFilters>,
) -> Response {
    match service.generator.generate_for_slice(&filters).await {
        Ok(bills) => ok(format!("{} bills in slice", bills.len()), bills),
        Err(e) => e.into_response(),
    }
}

pub async fn query_bills(
    State(service): State<SharedService>,
    Query(params): Query<BillQueryParams>,
) -> Response {
    let page = params.page.unwrap_or(1);
    let page_size = params.page_size.unwrap_or(service.config.default_page_size);
    match service.query.query_bills(&params.filters(), page, page_size).await {
        Ok(page) => ok(format!("{} bills matched", page.total), page),
        Err(e) => e.into_response(),
    }
}

pub async fn verify_bill(
    State(service): State<SharedService>,
    Path(bill_id): Path<String>,
) -> Response {
    match service.tracker.verify_bill(&BillId(bill_id)).await {
        Ok(bill) => ok(format!("Bill {} verified", bill.id), bill),
        Err(e) => e.into_response(),
    }
}

pub async fn edit_bill(
    State(service): State<SharedService>,
    Path(bill_id): Path<String>,
    Json(edit): Json<BillEdit>,
) -> Response {
    match service.generator.edit_bill(&BillId(bill_id), &edit).await {
        Ok(bill) => ok(format!("Bill {} updated", bill.id), bill),
        Err(e) => e.into_response(),
    }
}

/// 支付回调请求体
#[derive(Debug, Deserialize)]
pub struct PaymentRequest {
    pub order_id: String,
    pub paid_date: NaiveDate,
}

pub async fn record_payment(
    State(service): State<SharedService>,
    Path(bill_id): Path<String>,
    Json(req): Json<PaymentRequest>,
) -> Response {
    match service.record_payment(&BillId(bill_id), req.order_id, req.paid_date).await {
        Ok(bill) => ok(format!("Bill {} marked paid", bill.id), bill),
        Err(e) => e.into_response(),
    }
}

/// 批量操作请求体
#[derive(Debug, Deserialize)]
pub struct BulkRequest {
    pub action: BulkAction,
    pub bill_ids: Vec<BillId>,
    #[serde(default)]
    pub filters: BillFilters,
}

/// 批量操作; 在独立任务中执行, 客户端断开不影响已发出的请求
pub async fn bulk_action(
    State(service): State<SharedService>,
    Json(req): Json<BulkRequest>,
) -> Response {
    let selection = Selection::from_ids(req.bill_ids);
    let handle = service.bulk.spawn_bulk_action(req.action, selection, req.filters);
    match handle.await {
        Ok(Ok(result)) if result.is_complete_success() => ok(
            format!("{} {} bills", req.action.name(), result.succeeded.len()),
            result,
        ),
        Ok(Ok(result)) => {
            let body = ApiResponse {
                success: false,
                message: format!(
                    "{}: {} succeeded, {} failed",
                    req.action.name(),
                    result.succeeded.len(),
                    result.failed.len()
                ),
                data: Some(result),
            };
            (StatusCode::MULTI_STATUS, Json(body)).into_response()
        }
        Ok(Err(e)) => e.into_response(),
        Err(e) => BillingError::Transient(format!("bulk task failed: {}", e)).into_response(),
    }
}

/// 发布请求体; slices 为空时取该账期内有账单的切片 (可按学年收窄)
#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    pub month_year: MonthYear,
    #[serde(default)]
    pub slices: Vec<(String, u8)>,
    #[serde(default)]
    pub academic_years: Vec<u8>,
}

pub async fn publish(
    State(service): State<SharedService>,
    Json(req): Json<PublishRequest>,
) -> Response {
    let scope = if req.slices.is_empty() {
        match service.tracker.month_scope(req.month_year, &req.academic_years).await {
            Ok(scope) => scope,
            Err(e) => return e.into_response(),
        }
    } else {
        PublishScope::new(req.month_year, req.slices)
    };
    match service.tracker.publish(&scope).await.and_then(|r| r.into_result()) {
        Ok(result) => ok(format!("Published {} bills", result.succeeded.len()), result),
        Err(e) => e.into_response(),
    }
}

pub async fn verification_status(
    State(service): State<SharedService>,
    Query(params): Query<BillQueryParams>,
) -> Response {
    match service.tracker.verification_cells(&params.filters()).await {
        Ok(cells) => ok(format!("{} slices", cells.len()), cells),
        Err(e) => e.into_response(),
    }
}

pub async fn export_bills(
    State(service): State<SharedService>,
    Query(params): Query<BillQueryParams>,
) -> Response {
    match service.export(&params.filters()).await {
        Ok(bytes) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
                (header::CONTENT_DISPOSITION, "attachment; filename=\"mess-bills.csv\""),
            ],
            bytes,
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}
