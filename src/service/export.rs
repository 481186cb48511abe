use crate::error::Result;
use crate::models::IndividualBillRecord;
use csv::Writer;

/// 导出表头 (列顺序固定)
pub const EXPORT_HEADER: [&str; 8] = [
    "Student ID",
    "Student Name",
    "Days Present",
    "Mess Fee per Day",
    "Mess Charges",
    "Veg Days",
    "Non-Veg Days",
    "Total",
];

/// 导出账单为 CSV 字节流, 数值不带货币符号和千分位
pub fn export_bills(records: &[IndividualBillRecord]) -> Result<Vec<u8>> {
    let mut writer = Writer::from_writer(Vec::new());
    writer.write_record(EXPORT_HEADER)?;

    for bill in records {
        writer.write_record(&[
            bill.student_id.clone(),
            bill.student_name.clone(),
            bill.days_present.to_string(),
            bill.mess_fee_per_day.to_string(),
            bill.mess_charges.to_string(),
            bill.veg_days.to_string(),
            bill.non_veg_days.to_string(),
            bill.total_amount.to_string(),
        ])?;
    }

    writer.flush()?;
    writer.into_inner().map_err(|e| e.into_error().into())
}
