use tabled::Tabled;

use crate::stats::CategoryStats;
use crate::RequestCategory;

#[derive(Tabled)]
pub struct CategoryRow {
    pub category: String,
    pub requests: u64,
    #[tabled(display = "float2")]
    pub avg_time_ms: f64,
    pub minute_buckets: usize,
    pub second_buckets: usize,
}

impl CategoryRow {
    pub fn new(category: &RequestCategory, stats: &CategoryStats) -> Self {
        Self {
            category: category.label().to_string(),
            requests: stats.count,
            avg_time_ms: stats.avg_ms as f64,
            minute_buckets: stats.per_minute.len(),
            second_buckets: stats.per_second.len(),
        }
    }

    pub fn total(stats: &CategoryStats) -> Self {
        Self {
            category: "TOTAL".to_string(),
            requests: stats.count,
            avg_time_ms: stats.avg_ms as f64,
            minute_buckets: stats.per_minute.len(),
            second_buckets: stats.per_second.len(),
        }
    }
}

fn float2(n: &f64) -> String {
    format!("{:.2}", n)
}
