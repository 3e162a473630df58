//! Client for the data.gov.gr vaccination dataset (`mdg_emvolio`).

use std::time::Duration;

use chrono::{Datelike, NaiveDate};
use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::EpiError;

pub const GOVGR_ENDPOINT: &str = "https://data.gov.gr/api/v1/query/mdg_emvolio";

/// First day the dataset has figures for.
pub fn campaign_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 12, 27).unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaccinationRecord {
    pub areaid: i64,
    #[serde(default)]
    pub area: String,
    pub referencedate: String,
    #[serde(default)]
    pub totaldistinctpersons: Option<i64>,
    #[serde(default)]
    pub totalvaccinations: Option<i64>,
    #[serde(default)]
    pub daytotal: Option<i64>,
    #[serde(default)]
    pub daydiff: Option<i64>,
}

impl VaccinationRecord {
    /// Reference dates arrive as `YYYY-MM-DDTHH:MM:SS`; only the date part
    /// is kept.
    pub fn date(&self) -> Option<NaiveDate> {
        let day = self.referencedate.get(..10).unwrap_or(&self.referencedate);
        NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
    }
}

pub trait GovGrClient: Send + Sync {
    /// Records with a reference date in `[from, to]`.
    fn fetch_vaccinations(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<VaccinationRecord>, EpiError>;
}

#[derive(Clone)]
pub struct GovGrHttpClient {
    client: Client,
    endpoint: String,
}

impl GovGrHttpClient {
    pub fn new(token: &str) -> Result<Self, EpiError> {
        Self::with_endpoint(token, GOVGR_ENDPOINT)
    }

    pub fn with_endpoint(token: &str, endpoint: &str) -> Result<Self, EpiError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("epiflow/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| EpiError::Filesystem(err.to_string()))?,
        );
        let mut authorization = HeaderValue::from_str(&format!("Token {token}"))
            .map_err(|err| EpiError::InvalidConfig(format!("govgr token: {err}")))?;
        authorization.set_sensitive(true);
        headers.insert(AUTHORIZATION, authorization);
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| EpiError::GovGrHttp(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }
}

impl GovGrClient for GovGrHttpClient {
    fn fetch_vaccinations(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<VaccinationRecord>, EpiError> {
        let date_from = from.format("%Y-%m-%d").to_string();
        let date_to = to.format("%Y-%m-%d").to_string();
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("date_from", date_from.as_str()), ("date_to", date_to.as_str())])
            .send()
            .map_err(|err| EpiError::GovGrHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "data.gov.gr request failed".to_string());
            return Err(EpiError::GovGrStatus { status, message });
        }
        response
            .json::<Vec<VaccinationRecord>>()
            .map_err(|err| EpiError::GovGrHttp(err.to_string()))
    }
}

/// Splits `[from, to]` into calendar-month windows, clipped at both ends.
pub fn month_windows(from: NaiveDate, to: NaiveDate) -> Vec<(NaiveDate, NaiveDate)> {
    let mut windows = Vec::new();
    let mut start = from;
    while start <= to {
        let end = last_day_of_month(start).min(to);
        windows.push((start, end));
        match end.succ_opt() {
            Some(next) => start = next,
            None => break,
        }
    }
    windows
}

fn last_day_of_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first| first.pred_opt())
        .unwrap_or(date)
}

/// Fetches every month window in turn; any failed window fails the whole set.
pub fn fetch_range(
    client: &dyn GovGrClient,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Vec<VaccinationRecord>, EpiError> {
    let mut records = Vec::new();
    for (start, end) in month_windows(from, to) {
        let page = client.fetch_vaccinations(start, end)?;
        debug!(%start, %end, records = page.len(), "govgr window fetched");
        records.extend(page);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn windows_follow_calendar_months() {
        let windows = month_windows(date(2020, 12, 27), date(2021, 3, 10));
        assert_eq!(
            windows,
            vec![
                (date(2020, 12, 27), date(2020, 12, 31)),
                (date(2021, 1, 1), date(2021, 1, 31)),
                (date(2021, 2, 1), date(2021, 2, 28)),
                (date(2021, 3, 1), date(2021, 3, 10)),
            ]
        );
    }

    #[test]
    fn empty_range_has_no_windows() {
        assert!(month_windows(date(2021, 3, 10), date(2021, 3, 9)).is_empty());
    }

    #[test]
    fn record_date_ignores_time() {
        let record: VaccinationRecord = serde_json::from_str(
            r#"{"areaid": 104, "area": "ΑΙΤΩΛΟΑΚΑΡΝΑΝΙΑΣ", "referencedate": "2021-01-05T00:00:00",
                "totaldistinctpersons": 120, "totalvaccinations": 130, "daytotal": 10, "daydiff": 2}"#,
        )
        .unwrap();
        assert_eq!(record.date(), Some(date(2021, 1, 5)));
        assert_eq!(record.totalvaccinations, Some(130));
    }
}
