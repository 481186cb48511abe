use super::{IndividualBillRecord, MonthYear};
use serde::{Deserialize, Serialize};

/// 账单筛选条件 (各条件取交集, 缺省条件匹配全部)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillFilters {
    pub month_year: Option<MonthYear>,
    pub department: Option<String>,
    pub academic_year: Option<u8>,
    pub search: Option<String>,
}

impl BillFilters {
    pub fn for_slice(month_year: MonthYear, department: Option<String>, academic_year: Option<u8>) -> Self {
        Self {
            month_year: Some(month_year),
            department,
            academic_year,
            search: None,
        }
    }

    pub fn matches(&self, bill: &IndividualBillRecord) -> bool {
        if let Some(month) = &self.month_year {
            if bill.month_year != *month {
                return false;
            }
        }
        if let Some(dept) = &self.department {
            if bill.department != *dept {
                return false;
            }
        }
        if let Some(year) = self.academic_year {
            if bill.academic_year != year {
                return false;
            }
        }
        match self.search.as_deref().map(str::trim) {
            Some(term) if !term.is_empty() => {
                let term = term.to_lowercase();
                bill.student_name.to_lowercase().contains(&term)
                    || bill.student_id.to_lowercase().contains(&term)
            }
            _ => true,
        }
    }
}

/// 分页结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}
