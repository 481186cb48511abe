use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use hostel_mess_billing::config::BillingConfig;
use hostel_mess_billing::models::{
    BillEdit, BillFilters, BillId, BillStatus, BulkAction, Department, MonthYear,
    MonthlyCostInputs, PublishScope, Selection, SliceKey, StudentAttendanceRecord,
    YearAttendanceInput,
};
use hostel_mess_billing::{BillingError, MemoryStore, MessBillingService};
use std::sync::Arc;
use std::time::Duration;

fn october() -> MonthYear {
    "October 2025".parse().unwrap()
}

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

fn student(id: &str, name: &str, dept: &str, year: u8, days: u32, is_veg: bool, meal_days: u32) -> StudentAttendanceRecord {
    StudentAttendanceRecord {
        student_id: id.to_string(),
        student_name: name.to_string(),
        department: dept.to_string(),
        academic_year: year,
        days_present: days,
        is_veg,
        veg_days: if is_veg { meal_days } else { 0 },
        non_veg_days: if is_veg { 0 } else { meal_days },
        reduction_days: 0,
    }
}

fn roster() -> Vec<StudentAttendanceRecord> {
    vec![
        student("CSE-101", "Anita Rao", "CSE", 1, 28, true, 20),
        student("CSE-102", "Binu Thomas", "CSE", 1, 25, false, 10),
        student("ECE-101", "Chitra Nair", "ECE", 1, 30, true, 0),
    ]
}

struct Fixture {
    store: Arc<MemoryStore>,
    service: MessBillingService,
}

async fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new().with_departments(vec![
        Department {
            department: "CSE".to_string(),
            department_id: 1,
        },
        Department {
            department: "ECE".to_string(),
            department_id: 2,
        },
    ]));
    store.set_roster(october(), roster());
    let config = BillingConfig {
        bulk_concurrency: 2,
        ..BillingConfig::default()
    };
    let service = MessBillingService::new(store.clone(), config);
    service
        .costs
        .confirm_monthly_calculation(&october_inputs())
        .await
        .unwrap();
    Fixture { store, service }
}

fn month_filter() -> BillFilters {
    BillFilters {
        month_year: Some(october()),
        ..BillFilters::default()
    }
}

fn id(student_id: &str) -> BillId {
    BillId::new(student_id, &october())
}

async fn status_of(f: &Fixture, student_id: &str) -> BillStatus {
    f.service
        .query
        .all_bills(&month_filter())
        .await
        .unwrap()
        .into_iter()
        .find(|b| b.student_id == student_id)
        .map(|b| b.status)
        .unwrap()
}

#[tokio::test]
async fn generates_bills_from_confirmed_month() {
    let f = fixture().await;
    let bills = f.service.generator.generate_for_slice(&month_filter()).await.unwrap();
    assert_eq!(bills.len(), 3);

    let anita = bills.iter().find(|b| b.student_id == "CSE-101").unwrap();
    assert_eq!(anita.mess_fee_per_day, BigDecimal::from(82));
    assert_eq!(anita.mess_charges, BigDecimal::from(2296));
    assert_eq!(anita.meal_extra, BigDecimal::from(600));
    assert_eq!(anita.total_amount, BigDecimal::from(2896));

    let binu = bills.iter().find(|b| b.student_id == "CSE-102").unwrap();
    assert_eq!(binu.meal_extra, BigDecimal::from(500));
    assert!(bills.iter().all(|b| b.status == BillStatus::PendingVerification));
}

#[tokio::test]
async fn regenerating_a_slice_is_idempotent() {
    let f = fixture().await;
    let first = f.service.generator.generate_for_slice(&month_filter()).await.unwrap();
    let second = f.service.generator.generate_for_slice(&month_filter()).await.unwrap();
    assert_eq!(first, second);

    let cse = BillFilters::for_slice(october(), Some("CSE".to_string()), Some(1));
    let slice = f.service.generator.generate_for_slice(&cse).await.unwrap();
    assert_eq!(slice.len(), 2);
}

#[tokio::test]
async fn edited_bills_survive_regeneration() {
    let f = fixture().await;
    f.service.generator.generate_for_slice(&month_filter()).await.unwrap();

    let edit = BillEdit {
        days_present: Some(10),
        ..BillEdit::default()
    };
    let edited = f.service.generator.edit_bill(&id("CSE-101"), &edit).await.unwrap();
    assert_eq!(edited.mess_charges, BigDecimal::from(820));

    let again = f.service.generator.generate_for_slice(&month_filter()).await.unwrap();
    let anita = again.iter().find(|b| b.student_id == "CSE-101").unwrap();
    assert!(anita.edited);
    assert_eq!(anita.days_present, 10);
    assert_eq!(anita.total_amount, BigDecimal::from(1420));
}

#[tokio::test]
async fn later_monthly_confirm_does_not_touch_generated_bills() {
    let f = fixture().await;
    f.service.generator.generate_for_slice(&month_filter()).await.unwrap();

    let mut inputs = october_inputs();
    inputs.grocery_cost = s("80000");
    let record = f.service.costs.confirm_monthly_calculation(&inputs).await.unwrap();
    assert!(record.mess_fee_per_day > BigDecimal::from(82));
    assert_eq!(f.store.superseded_records(&october()).len(), 1);

    let bills = f.service.generator.generate_for_slice(&month_filter()).await.unwrap();
    assert!(bills.iter().all(|b| b.mess_fee_per_day == BigDecimal::from(82)));
}

#[tokio::test]
async fn department_change_returns_the_stored_bill() {
    let f = fixture().await;
    f.service.generator.generate_for_slice(&month_filter()).await.unwrap();

    let mut moved = roster();
    moved[0].department = "ECE".to_string();
    moved[0].days_present = 10;
    f.store.set_roster(october(), moved);

    let ece = BillFilters::for_slice(october(), Some("ECE".to_string()), Some(1));
    let bills = f.service.generator.generate_for_slice(&ece).await.unwrap();
    let anita = bills.iter().find(|b| b.student_id == "CSE-101").unwrap();
    let stored = f
        .service
        .query
        .all_bills(&month_filter())
        .await
        .unwrap()
        .into_iter()
        .find(|b| b.student_id == "CSE-101")
        .unwrap();

    assert_eq!(*anita, stored);
    assert_eq!(anita.department, "CSE");
    assert_eq!(anita.days_present, 28);
    assert_eq!(anita.total_amount, BigDecimal::from(2896));
    assert_eq!(f.service.query.all_bills(&month_filter()).await.unwrap().len(), 3);
}

#[tokio::test]
async fn duplicate_roster_entries_reject_the_slice() {
    let f = fixture().await;
    let mut doubled = roster();
    doubled.push(student("CSE-101", "Anita Rao", "CSE", 1, 12, true, 0));
    f.store.set_roster(october(), doubled);

    let err = f.service.generator.generate_for_slice(&month_filter()).await.unwrap_err();
    assert!(matches!(err, BillingError::Validation(_)));
    assert!(f.service.query.all_bills(&month_filter()).await.unwrap().is_empty());
}

#[tokio::test]
async fn generation_without_monthly_record_is_not_found() {
    let f = fixture().await;
    let november: MonthYear = "November 2025".parse().unwrap();
    let err = f
        .service
        .generator
        .generate_for_slice(&BillFilters::for_slice(november, None, None))
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::NotFound(_)));
}

#[tokio::test]
async fn out_of_range_attendance_rejects_the_slice() {
    let f = fixture().await;
    let mut bad = roster();
    bad[2].days_present = 40;
    f.store.set_roster(october(), bad);

    let err = f.service.generator.generate_for_slice(&month_filter()).await.unwrap_err();
    assert!(matches!(err, BillingError::Range { .. }));
    assert!(f.service.query.all_bills(&month_filter()).await.unwrap().is_empty());
}

#[tokio::test]
async fn verifying_twice_is_a_gate_error() {
    let f = fixture().await;
    f.service.generator.generate_for_slice(&month_filter()).await.unwrap();

    let bill = f.service.tracker.verify_bill(&id("CSE-101")).await.unwrap();
    assert_eq!(bill.status, BillStatus::Verified);

    let err = f.service.tracker.verify_bill(&id("CSE-101")).await.unwrap_err();
    assert!(matches!(err, BillingError::AlreadyVerified(_)));
    assert!(err.is_workflow_gate());

    let err = f
        .service
        .generator
        .edit_bill(&id("CSE-101"), &BillEdit::default())
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::AlreadyVerified(_)));
}

#[tokio::test]
async fn publish_is_blocked_until_every_slice_is_verified() {
    let f = fixture().await;
    f.service.generator.generate_for_slice(&month_filter()).await.unwrap();
    f.service.tracker.verify_bill(&id("CSE-101")).await.unwrap();
    f.service.tracker.verify_bill(&id("CSE-102")).await.unwrap();

    let scope = PublishScope::new(october(), vec![("CSE".to_string(), 1), ("ECE".to_string(), 1)]);
    let err = f.service.tracker.publish(&scope).await.unwrap_err();
    match &err {
        BillingError::IncompletePublish { slices } => {
            assert_eq!(slices.len(), 1);
            assert_eq!(slices[0].department, "ECE");
            assert_eq!(slices[0].academic_year, 1);
        }
        other => panic!("unexpected error {other:?}"),
    }
    // 门禁失败时状态不变
    assert_eq!(status_of(&f, "CSE-101").await, BillStatus::Verified);
    assert_eq!(status_of(&f, "ECE-101").await, BillStatus::PendingVerification);

    f.service.tracker.verify_bill(&id("ECE-101")).await.unwrap();
    let result = f.service.tracker.publish(&scope).await.unwrap();
    assert_eq!(result.succeeded.len(), 3);
    assert_eq!(status_of(&f, "ECE-101").await, BillStatus::Published);

    // 再次发布: 全部跳过
    let again = f.service.tracker.publish(&scope).await.unwrap();
    assert!(again.succeeded.is_empty());
    assert_eq!(again.skipped.len(), 3);

    // 已发布的账单不能再审核
    let err = f.service.tracker.verify_bill(&id("ECE-101")).await.unwrap_err();
    assert!(matches!(err, BillingError::AlreadyVerified(_)));
    assert_eq!(status_of(&f, "ECE-101").await, BillStatus::Published);
}

#[tokio::test]
async fn empty_slice_cannot_be_published() {
    let f = fixture().await;
    f.service.generator.generate_for_slice(&month_filter()).await.unwrap();

    let scope = PublishScope::new(october(), vec![("CSE".to_string(), 4)]);
    let err = f.service.tracker.publish(&scope).await.unwrap_err();
    assert!(matches!(err, BillingError::IncompletePublish { .. }));

    let cell = f
        .service
        .tracker
        .verification_cell(&SliceKey {
            department: "CSE".to_string(),
            academic_year: 4,
            month_year: october(),
        })
        .await
        .unwrap();
    assert_eq!(cell.bill_count, 0);
    assert!(!cell.all_verified);
}

#[tokio::test]
async fn default_publish_covers_only_occupied_slices() {
    let f = fixture().await;
    f.service.generator.generate_for_slice(&month_filter()).await.unwrap();
    let selection = Selection::from_ids([id("CSE-101"), id("CSE-102"), id("ECE-101")]);
    f.service
        .bulk
        .apply_bulk_action(BulkAction::Verify, &selection, &month_filter())
        .await
        .unwrap();

    // 二至四年级没有学生, 不应阻塞发布
    let scope = f.service.tracker.month_scope(october(), &[]).await.unwrap();
    assert_eq!(scope.slices, vec![("CSE".to_string(), 1), ("ECE".to_string(), 1)]);

    let result = f.service.tracker.publish(&scope).await.unwrap();
    assert_eq!(result.succeeded.len(), 3);
    assert_eq!(status_of(&f, "CSE-102").await, BillStatus::Published);
}

#[tokio::test]
async fn default_publish_of_an_empty_month_is_rejected() {
    let f = fixture().await;
    let november: MonthYear = "November 2025".parse().unwrap();
    let err = f.service.tracker.month_scope(november, &[]).await.unwrap_err();
    assert!(matches!(err, BillingError::Validation(_)));

    f.service.generator.generate_for_slice(&month_filter()).await.unwrap();
    let err = f.service.tracker.month_scope(october(), &[3]).await.unwrap_err();
    assert!(matches!(err, BillingError::Validation(_)));
}

#[tokio::test]
async fn bulk_verify_only_touches_pending_bills() {
    let f = fixture().await;
    f.service.generator.generate_for_slice(&month_filter()).await.unwrap();
    f.service.tracker.verify_bill(&id("CSE-101")).await.unwrap();

    let selection = Selection::from_ids([id("CSE-101"), id("CSE-102"), id("ECE-101")]);
    let result = f
        .service
        .bulk
        .apply_bulk_action(BulkAction::Verify, &selection, &month_filter())
        .await
        .unwrap();

    assert_eq!(result.succeeded, vec![id("CSE-102"), id("ECE-101")]);
    assert_eq!(result.skipped, vec![id("CSE-101")]);
    assert!(result.failed.is_empty());

    let cells = f.service.tracker.verification_cells(&month_filter()).await.unwrap();
    assert!(cells.iter().all(|c| c.all_verified));
}

#[tokio::test]
async fn bulk_respects_filters_over_selection() {
    let f = fixture().await;
    f.service.generator.generate_for_slice(&month_filter()).await.unwrap();

    let selection = Selection::from_ids([id("CSE-101"), id("ECE-101")]);
    let cse_only = BillFilters::for_slice(october(), Some("CSE".to_string()), None);
    let result = f
        .service
        .bulk
        .apply_bulk_action(BulkAction::ShowHide { show: true }, &selection, &cse_only)
        .await
        .unwrap();

    assert_eq!(result.succeeded, vec![id("CSE-101")]);
    assert_eq!(result.out_of_scope, 1);

    let bills = f.service.query.all_bills(&month_filter()).await.unwrap();
    let shown: Vec<&str> = bills.iter().filter(|b| b.show).map(|b| b.student_id.as_str()).collect();
    assert_eq!(shown, vec!["CSE-101"]);
}

#[tokio::test]
async fn show_hide_skips_bills_already_at_target() {
    let f = fixture().await;
    f.service.generator.generate_for_slice(&month_filter()).await.unwrap();

    let first = Selection::from_ids([id("CSE-101")]);
    f.service
        .bulk
        .apply_bulk_action(BulkAction::ShowHide { show: true }, &first, &month_filter())
        .await
        .unwrap();

    let both = Selection::from_ids([id("CSE-101"), id("CSE-102")]);
    let result = f
        .service
        .bulk
        .apply_bulk_action(BulkAction::ShowHide { show: true }, &both, &month_filter())
        .await
        .unwrap();
    assert_eq!(result.succeeded, vec![id("CSE-102")]);
    assert_eq!(result.skipped, vec![id("CSE-101")]);

    // 与审核状态无关
    f.service.tracker.verify_bill(&id("CSE-101")).await.unwrap();
    let hide = f
        .service
        .bulk
        .apply_bulk_action(BulkAction::ShowHide { show: false }, &both, &month_filter())
        .await
        .unwrap();
    assert_eq!(hide.succeeded, vec![id("CSE-101"), id("CSE-102")]);
}

#[tokio::test]
async fn send_excludes_unverified_bills() {
    let f = fixture().await;
    f.service.generator.generate_for_slice(&month_filter()).await.unwrap();
    f.service.tracker.verify_bill(&id("CSE-101")).await.unwrap();

    let selection = Selection::from_ids([id("CSE-101"), id("CSE-102")]);
    let result = f
        .service
        .bulk
        .apply_bulk_action(BulkAction::Send, &selection, &month_filter())
        .await
        .unwrap();

    assert_eq!(result.succeeded, vec![id("CSE-101")]);
    assert_eq!(result.excluded, 1);

    let bills = f.service.query.all_bills(&month_filter()).await.unwrap();
    let sent: Vec<&str> = bills
        .iter()
        .filter(|b| b.sent_at.is_some())
        .map(|b| b.student_id.as_str())
        .collect();
    assert_eq!(sent, vec!["CSE-101"]);
}

#[tokio::test]
async fn one_failing_record_does_not_abort_the_batch() {
    let f = fixture().await;
    f.service.generator.generate_for_slice(&month_filter()).await.unwrap();
    f.store.fail_mutations_for(id("CSE-102"));

    let selection = Selection::from_ids([id("CSE-101"), id("CSE-102"), id("ECE-101")]);
    let result = f
        .service
        .bulk
        .apply_bulk_action(BulkAction::Verify, &selection, &month_filter())
        .await
        .unwrap();

    assert_eq!(result.succeeded, vec![id("CSE-101"), id("ECE-101")]);
    assert_eq!(result.failed.len(), 1);
    assert_eq!(result.failed[0].bill_id, id("CSE-102"));
    assert_eq!(status_of(&f, "ECE-101").await, BillStatus::Verified);
    assert_eq!(status_of(&f, "CSE-102").await, BillStatus::PendingVerification);

    match result.into_result() {
        Err(BillingError::PartialBulkFailure { succeeded, failed }) => {
            assert_eq!(succeeded, 2);
            assert_eq!(failed.len(), 1);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn bulk_publish_goes_through_the_gate() {
    let f = fixture().await;
    f.service.generator.generate_for_slice(&month_filter()).await.unwrap();
    f.service.tracker.verify_bill(&id("CSE-101")).await.unwrap();

    let selection = Selection::from_ids([id("CSE-101")]);
    let err = f
        .service
        .bulk
        .apply_bulk_action(BulkAction::Publish, &selection, &month_filter())
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::IncompletePublish { .. }));

    f.service.tracker.verify_bill(&id("CSE-102")).await.unwrap();
    let result = f
        .service
        .bulk
        .apply_bulk_action(BulkAction::Publish, &selection, &month_filter())
        .await
        .unwrap();
    assert_eq!(result.succeeded.len(), 2);
    assert_eq!(status_of(&f, "ECE-101").await, BillStatus::PendingVerification);
}

#[tokio::test]
async fn dropped_bulk_handle_still_completes() {
    let f = fixture().await;
    f.service.generator.generate_for_slice(&month_filter()).await.unwrap();

    let selection = Selection::from_ids([id("CSE-101"), id("CSE-102"), id("ECE-101")]);
    let handle = f
        .service
        .bulk
        .spawn_bulk_action(BulkAction::Verify, selection, month_filter());
    drop(handle);

    let mut done = false;
    for _ in 0..50 {
        let bills = f.service.query.all_bills(&month_filter()).await.unwrap();
        if bills.iter().all(|b| b.verified()) {
            done = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(done);
}

#[tokio::test]
async fn payment_is_independent_of_status() {
    let f = fixture().await;
    f.service.generator.generate_for_slice(&month_filter()).await.unwrap();

    let paid_on = NaiveDate::from_ymd_opt(2025, 11, 3).unwrap();
    let bill = f
        .service
        .record_payment(&id("ECE-101"), "order_123".to_string(), paid_on)
        .await
        .unwrap();
    assert!(bill.ispaid);
    assert_eq!(bill.paid_date, Some(paid_on));
    assert_eq!(bill.latest_order_id.as_deref(), Some("order_123"));
    assert_eq!(bill.status, BillStatus::PendingVerification);
}

#[tokio::test]
async fn store_outage_surfaces_as_transient() {
    let f = fixture().await;
    f.store.set_offline(true);
    let err = f
        .service
        .costs
        .confirm_monthly_calculation(&october_inputs())
        .await
        .unwrap_err();
    assert!(err.is_retriable());
}

#[tokio::test]
async fn selection_helpers_follow_the_filter_view() {
    let f = fixture().await;
    let bills = f.service.generator.generate_for_slice(&month_filter()).await.unwrap();
    let cse = BillFilters::for_slice(october(), Some("CSE".to_string()), None);

    let mut selection = Selection::new();
    selection.select_all_in_filter(&bills, &cse);
    assert_eq!(selection.len(), 2);

    selection.select_complement(&bills);
    assert_eq!(selection.len(), 1);
    assert!(selection.contains(&id("ECE-101")));

    selection.toggle(id("CSE-101"));
    assert_eq!(selection.len(), 2);

    selection.deselect_all();
    assert!(selection.is_empty());

    selection.select_all(&bills);
    assert_eq!(selection.len(), 3);
}

#[tokio::test]
async fn export_covers_filtered_bills() {
    let f = fixture().await;
    f.service.generator.generate_for_slice(&month_filter()).await.unwrap();
    let bytes = f.service.export(&month_filter()).await.unwrap();
    let text = String::from_utf8(bytes).unwrap();
    assert_eq!(text.lines().count(), 4);
    assert!(text.contains("CSE-101,Anita Rao,28,82,2296,20,0,2896"));
}
