use crate::domain::Metric;
use crate::table::{LongTable, Observation};

/// Rounds to four decimal places through the decimal formatter, which rounds
/// the exact binary value the same way a correctly-rounded `round(x, 4)` does.
pub fn round4(value: f64) -> f64 {
    if !value.is_finite() {
        return value;
    }
    format!("{value:.4}").parse().unwrap_or(value)
}

/// Deaths per hundred cases; zero when there are no cases.
pub fn case_fatality_ratio(cases: i64, deaths: i64) -> f64 {
    if cases == 0 {
        return 0.0;
    }
    round4(deaths as f64 / cases as f64 * 100.0)
}

/// Cases per hundred thousand inhabitants; zero when the population is unknown.
pub fn incidence_rate(cases: i64, population: u64) -> f64 {
    if population == 0 {
        return 0.0;
    }
    round4(cases as f64 * 100_000.0 / population as f64)
}

/// Sets both ratios on every row from its cases, deaths and entity population.
pub fn with_ratios(table: LongTable) -> LongTable {
    table.map(|mut row: Observation| {
        let cases = row.count(Metric::Cases);
        row.case_fatality_ratio = Some(case_fatality_ratio(cases, row.count(Metric::Deaths)));
        row.incidence_rate = Some(incidence_rate(cases, row.entity.population));
        row
    })
}

/// `active = cases - deaths - recovered`, absent counters read as zero.
pub fn with_active(table: LongTable) -> LongTable {
    table.map(|row| {
        let active =
            row.count(Metric::Cases) - row.count(Metric::Deaths) - row.count(Metric::Recovered);
        row.with_counter(Metric::Active, Some(active))
    })
}
