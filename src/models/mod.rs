pub mod bill;
pub mod bulk;
pub mod cost;
pub mod month;
pub mod query;
pub mod verification;

pub use bill::{
    BillEdit, BillId, BillPatch, BillStatus, Department, IndividualBillRecord,
    StudentAttendanceRecord,
};
pub use bulk::{BulkAction, BulkFailure, BulkResult, Selection};
pub use cost::{
    MonthlyCostInputs, MonthlyCostRecord, RateSnapshot, YearAttendance, YearAttendanceInput,
    ACADEMIC_YEARS,
};
pub use month::{MonthYear, ParseMonthYearError};
pub use query::{BillFilters, Page};
pub use verification::{PublishScope, SliceKey, VerificationBoard, VerificationCell};
