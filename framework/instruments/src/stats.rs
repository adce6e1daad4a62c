use std::collections::BTreeMap;

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{RequestCategory, RequestSample};

/// Summary of the samples that fell into one fixed-width time window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBucket {
    pub start: DateTime<Utc>,
    pub count: u64,
    pub avg_ms: u64,
}

/// Aggregated view over the samples matching one category.
///
/// Averages are integer milliseconds with truncating division, applied consistently at the
/// total, per-category and per-bucket level. Windows with no samples are absent from the
/// bucket lists rather than emitted as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryStats {
    pub count: u64,
    pub avg_ms: u64,
    pub per_minute: Vec<TimeBucket>,
    pub per_second: Vec<TimeBucket>,
}

/// The aggregated statistics for one run: a synthetic total over all samples plus one entry
/// per request category, including categories that saw no traffic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub total: CategoryStats,
    pub by_category: BTreeMap<RequestCategory, CategoryStats>,
}

/// Turn the raw samples collected during a run into per-category and per-time-bucket summaries.
///
/// Pure function of its input; persistence of the result is the caller's concern.
pub fn aggregate(samples: &[RequestSample]) -> RunStats {
    let total = summarise(samples.iter().collect());
    let by_category = RequestCategory::ALL
        .iter()
        .map(|category| {
            let filtered = samples
                .iter()
                .filter(|sample| sample.category == *category)
                .collect();
            (*category, summarise(filtered))
        })
        .collect();

    RunStats { total, by_category }
}

fn summarise(samples: Vec<&RequestSample>) -> CategoryStats {
    CategoryStats {
        count: samples.len() as u64,
        avg_ms: avg_ms(&samples),
        per_minute: buckets(&samples, TimeDelta::minutes(1)),
        per_second: buckets(&samples, TimeDelta::seconds(1)),
    }
}

fn avg_ms(samples: &[&RequestSample]) -> u64 {
    if samples.is_empty() {
        return 0;
    }

    let sum: u128 = samples
        .iter()
        .map(|sample| sample.duration.as_millis())
        .sum();
    (sum / samples.len() as u128) as u64
}

fn buckets(samples: &[&RequestSample], width: TimeDelta) -> Vec<TimeBucket> {
    samples
        .iter()
        .map(|sample| {
            let start = sample
                .timestamp
                .duration_trunc(width)
                .expect("Sample timestamp out of range for bucket truncation");
            (start, *sample)
        })
        .into_group_map()
        .into_iter()
        .map(|(start, group)| TimeBucket {
            start,
            count: group.len() as u64,
            avg_ms: avg_ms(&group),
        })
        .sorted_by_key(|bucket| bucket.start)
        .collect()
}
