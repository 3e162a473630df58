//! Cumulative-to-incremental conversion.
//!
//! Deltas are computed over a table sorted globally by (group, date). The
//! naive first difference is taken across the whole sequence and the first
//! bucket of every group is then masked, whatever value the subtraction
//! happened to produce at the group seam.

use chrono::NaiveDate;
use serde::{Serialize, Serializer};

use crate::domain::Metric;
use crate::table::{LongTable, Observation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delta {
    /// First observed date of a group.
    Boundary,
    /// The counter, or its predecessor, was absent.
    Missing,
    Change(i64),
    /// Increment supplied directly by the source.
    Reported(i64),
}

impl Delta {
    /// Value written to documents; unknown deltas fill as zero.
    pub fn value(&self) -> i64 {
        match self {
            Delta::Change(value) | Delta::Reported(value) => *value,
            Delta::Boundary | Delta::Missing => 0,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Delta::Change(_) | Delta::Reported(_))
    }

    pub fn reported(value: Option<i64>) -> Self {
        value.map(Delta::Reported).unwrap_or(Delta::Missing)
    }
}

impl Serialize for Delta {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.value())
    }
}

struct Bucket<K> {
    group: K,
    date: NaiveDate,
    start: usize,
    end: usize,
}

fn sorted_by_group<K, F>(table: LongTable, group_key: F) -> Vec<(K, Observation)>
where
    K: Ord,
    F: Fn(&Observation) -> K,
{
    let mut keyed: Vec<(K, Observation)> = table
        .into_iter()
        .map(|row| (group_key(&row), row))
        .collect();
    keyed.sort_by(|(left_key, left), (right_key, right)| {
        left_key.cmp(right_key).then(left.date.cmp(&right.date))
    });
    keyed
}

fn buckets<K: Ord + Clone>(keyed: &[(K, Observation)]) -> Vec<Bucket<K>> {
    let mut buckets: Vec<Bucket<K>> = Vec::new();
    for (position, (key, row)) in keyed.iter().enumerate() {
        match buckets.last_mut() {
            Some(bucket) if bucket.group == *key && bucket.date == row.date => {
                bucket.end = position + 1;
            }
            _ => buckets.push(Bucket {
                group: key.clone(),
                date: row.date,
                start: position,
                end: position + 1,
            }),
        }
    }
    buckets
}

fn bucket_total<K>(keyed: &[(K, Observation)], bucket: &Bucket<K>, metric: Metric) -> Option<i64> {
    keyed[bucket.start..bucket.end]
        .iter()
        .map(|(_, row)| row.counter(metric))
        .fold(None, |total, value| match (total, value) {
            (None, value) => value,
            (total, None) => total,
            (Some(total), Some(value)) => Some(total + value),
        })
}

/// Adds a `Delta` per metric to every row. The returned table is sorted by
/// (group, date); rows sharing a (group, date) bucket share its delta.
pub fn compute_deltas<K, F>(table: LongTable, group_key: F, metrics: &[Metric]) -> LongTable
where
    K: Ord + Clone,
    F: Fn(&Observation) -> K,
{
    let mut keyed = sorted_by_group(table, group_key);
    let buckets = buckets(&keyed);

    for metric in metrics {
        let totals: Vec<Option<i64>> = buckets
            .iter()
            .map(|bucket| bucket_total(&keyed, bucket, *metric))
            .collect();

        let naive: Vec<Option<i64>> = (0..buckets.len())
            .map(|position| match position {
                0 => None,
                _ => match (totals[position], totals[position - 1]) {
                    (Some(current), Some(previous)) => Some(current - previous),
                    _ => None,
                },
            })
            .collect();

        for (position, bucket) in buckets.iter().enumerate() {
            let first_of_group = position == 0 || buckets[position - 1].group != bucket.group;
            let delta = if first_of_group {
                Delta::Boundary
            } else {
                naive[position].map(Delta::Change).unwrap_or(Delta::Missing)
            };
            for (_, row) in &mut keyed[bucket.start..bucket.end] {
                row.deltas.insert(*metric, delta);
            }
        }
    }

    keyed.into_iter().map(|(_, row)| row).collect()
}

/// Writes the running total of the reported `from` increments into the
/// `into` counter. Rows without a known increment leave the counter absent.
pub fn cumulative_sum<K, F>(table: LongTable, group_key: F, from: Metric, into: Metric) -> LongTable
where
    K: Ord + Clone,
    F: Fn(&Observation) -> K,
{
    let keyed = sorted_by_group(table, group_key);
    let mut current: Option<K> = None;
    let mut running = 0i64;
    keyed
        .into_iter()
        .map(|(key, mut row)| {
            if current.as_ref() != Some(&key) {
                current = Some(key);
                running = 0;
            }
            let value = match row.delta(from) {
                Some(delta) if delta.is_known() => {
                    running += delta.value();
                    Some(running)
                }
                _ => None,
            };
            row.counters.insert(into, value);
            row
        })
        .collect()
}

/// Carries the last seen value of `metric` forward within each group.
pub fn forward_fill<K, F>(table: LongTable, group_key: F, metric: Metric) -> LongTable
where
    K: Ord + Clone,
    F: Fn(&Observation) -> K,
{
    let keyed = sorted_by_group(table, group_key);
    let mut current: Option<K> = None;
    let mut last: Option<i64> = None;
    keyed
        .into_iter()
        .map(|(key, mut row)| {
            if current.as_ref() != Some(&key) {
                current = Some(key);
                last = None;
            }
            match row.counter(metric) {
                Some(value) => last = Some(value),
                None => {
                    if last.is_some() {
                        row.counters.insert(metric, last);
                    }
                }
            }
            row
        })
        .collect()
}
