use assert_matches::assert_matches;
use chrono::NaiveDate;

use epiflow::delta::{Delta, compute_deltas};
use epiflow::domain::{Entity, Metric, SourceTag};
use epiflow::table::{LongTable, Observation};

fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 1, day).unwrap()
}

fn entity(id: &str) -> Entity {
    Entity {
        id: id.to_string(),
        name: id.to_string(),
        ..Entity::unknown(id)
    }
}

fn cases(id: &str, day: u32, value: i64) -> Observation {
    Observation::new(date(day), entity(id), SourceTag::Jhu).with_counter(Metric::Cases, Some(value))
}

#[test]
fn two_entity_scenario() {
    let table = LongTable::new(vec![cases("B", 2, 5), cases("A", 2, 15), cases("A", 1, 10)]);
    let table = compute_deltas(table, Observation::entity_key, &[Metric::Cases]);

    let rows: Vec<(String, NaiveDate, Delta)> = table
        .rows()
        .iter()
        .map(|row| (row.entity.id.clone(), row.date, row.delta(Metric::Cases).unwrap()))
        .collect();
    assert_eq!(
        rows,
        vec![
            ("A".to_string(), date(1), Delta::Boundary),
            ("A".to_string(), date(2), Delta::Change(5)),
            ("B".to_string(), date(2), Delta::Boundary),
        ]
    );
    assert_eq!(rows[2].2.value(), 0);
    assert!(rows.iter().all(|(_, _, delta)| *delta != Delta::Change(-10)));
}

#[test]
fn boundary_rows_never_difference_across_groups() {
    let mut observations = Vec::new();
    for (index, id) in ["AT", "BE", "CY", "DK"].iter().enumerate() {
        for day in 1..=4 {
            let value = (index as i64 + 1) * 1000 + i64::from(day) * (index as i64 + 2);
            observations.push(cases(id, day, value));
        }
    }
    observations.reverse();
    let table = compute_deltas(
        LongTable::new(observations),
        Observation::entity_key,
        &[Metric::Cases],
    );

    let rows = table.rows();
    for pair in rows.windows(2) {
        let (previous, current) = (&pair[0], &pair[1]);
        let delta = current.delta(Metric::Cases).unwrap();
        if previous.entity.id != current.entity.id {
            assert_eq!(delta, Delta::Boundary, "{} on {}", current.entity.id, current.date);
        } else {
            assert_eq!(
                delta,
                Delta::Change(current.count(Metric::Cases) - previous.count(Metric::Cases))
            );
        }
    }
    assert_eq!(rows[0].delta(Metric::Cases), Some(Delta::Boundary));
}

#[test]
fn absent_counter_is_missing_not_zero_change() {
    let table = LongTable::new(vec![
        cases("A", 1, 10),
        Observation::new(date(2), entity("A"), SourceTag::Jhu).with_counter(Metric::Cases, None),
        cases("A", 3, 12),
    ]);
    let table = compute_deltas(table, Observation::entity_key, &[Metric::Cases]);
    let deltas: Vec<_> = table
        .rows()
        .iter()
        .map(|row| row.delta(Metric::Cases).unwrap())
        .collect();
    assert_matches!(deltas.as_slice(), [Delta::Boundary, Delta::Missing, Delta::Missing]);
    assert!(deltas.iter().all(|delta| delta.value() == 0));
}

#[test]
fn unresolved_labels_keep_separate_groups() {
    let table = LongTable::new(vec![
        Observation::new(date(1), Entity::unknown("Atlantis"), SourceTag::Jhu)
            .with_counter(Metric::Cases, Some(3)),
        Observation::new(date(2), Entity::unknown("Lemuria"), SourceTag::Jhu)
            .with_counter(Metric::Cases, Some(9)),
    ]);
    let table = compute_deltas(table, Observation::entity_key, &[Metric::Cases]);
    assert!(
        table
            .rows()
            .iter()
            .all(|row| row.delta(Metric::Cases) == Some(Delta::Boundary))
    );
}
