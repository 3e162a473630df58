use std::path::Path;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::error::EpiError;
use crate::sink::write_atomic;

const JHU_RAW_BASE: &str =
    "https://raw.githubusercontent.com/CSSEGISandData/COVID-19/master/csse_covid_19_data/csse_covid_19_time_series";
const IMEDD_RAW_BASE: &str = "https://raw.githubusercontent.com/iMEdD-Lab/open-data/master/COVID-19";

pub const JHU_TIME_SERIES_DIR: &str = "jhu/csse_covid_19_data/csse_covid_19_time_series";
pub const IMEDD_DIR: &str = "imedd/COVID-19";

pub trait ExtractFetcher: Send + Sync {
    fn download(&self, url: &str, destination: &Path) -> Result<(), EpiError>;
}

#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, EpiError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("epiflow/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| EpiError::Filesystem(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|err| EpiError::FetchHttp(err.to_string()))?;
        Ok(Self { client })
    }
}

impl ExtractFetcher for HttpFetcher {
    fn download(&self, url: &str, destination: &Path) -> Result<(), EpiError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| EpiError::FetchHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| format!("download of {url} failed"));
            return Err(EpiError::FetchStatus { status, message });
        }
        let bytes = response
            .bytes()
            .map_err(|err| EpiError::FetchHttp(err.to_string()))?;
        write_atomic(destination, &bytes)
    }
}

/// A raw extract file and the path it is kept at under the tmp tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractFile {
    pub url: String,
    pub relative_path: Utf8PathBuf,
}

impl ExtractFile {
    fn new(base_url: &str, dir: &str, name: &str) -> Self {
        Self {
            url: format!("{base_url}/{name}"),
            relative_path: Utf8PathBuf::from(dir).join(name),
        }
    }

    pub fn local_path(&self, tmp: &Utf8Path) -> Utf8PathBuf {
        tmp.join(&self.relative_path)
    }
}

pub fn jhu_extracts() -> Vec<ExtractFile> {
    ["confirmed", "deaths", "recovered"]
        .into_iter()
        .map(|kind| {
            ExtractFile::new(
                JHU_RAW_BASE,
                JHU_TIME_SERIES_DIR,
                &format!("time_series_covid19_{kind}_global.csv"),
            )
        })
        .collect()
}

pub fn imedd_extracts() -> Vec<ExtractFile> {
    [
        "greece_cases_v2.csv",
        "greece_deaths_v2.csv",
        "greeceTimeline.csv",
        "greece_latest.csv",
    ]
    .into_iter()
    .map(|name| ExtractFile::new(IMEDD_RAW_BASE, IMEDD_DIR, name))
    .collect()
}

/// Downloads every file, stopping at the first failure.
pub fn fetch_all(
    fetcher: &dyn ExtractFetcher,
    files: &[ExtractFile],
    tmp: &Utf8Path,
) -> Result<usize, EpiError> {
    for file in files {
        fetcher.download(&file.url, file.local_path(tmp).as_std_path())?;
    }
    Ok(files.len())
}
