use std::io;
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use serde_json::json;
use tracing_subscriber::fmt::MakeWriter;

use epiflow::domain::{Collection, SourceTag, WriteMode};
use epiflow::persist::{Window, WritePlan, write};
use epiflow::resolver::{EntityIndex, LookupSchema, LookupTable};
use epiflow::sink::{Document, MemorySink};

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for Captured {
    type Writer = Captured;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn captured<T>(f: impl FnOnce() -> T) -> (T, String) {
    let captured = Captured::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(captured.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    let value = tracing::subscriber::with_default(subscriber, f);
    (value, captured.text())
}

#[test]
fn unresolved_label_is_warned() {
    let table = LookupTable::from_reader(
        "name_en,iso2,iso3,uid,population,lat,long,country,wom_map\nGreece,gr,grc,300,1,1,1,Greece,Greece\n"
            .as_bytes(),
        &LookupSchema::countries(),
        "countries",
    )
    .unwrap();
    let index = EntityIndex::build(&table);

    let (resolved, logs) = captured(|| index.resolve("Atlantis"));
    assert!(!resolved.matched);
    let line = logs
        .lines()
        .find(|line| line.contains("unknown entity"))
        .unwrap_or_else(|| panic!("no warning in {logs:?}"));
    assert!(line.contains("WARN"));
    assert!(line.contains("Atlantis"));

    let (resolved, logs) = captured(|| index.resolve("Greece"));
    assert!(resolved.matched);
    assert!(!logs.contains("unknown entity"));
}

#[test]
fn write_reports_its_counts() {
    let documents: Vec<Document> = ["2021-03-06", "2021-03-07"]
        .into_iter()
        .map(|date| {
            json!({"date": date, "uid": "300", "iso3": "GRC", "country": "Greece", "source": "jhu"})
                .as_object()
                .unwrap()
                .clone()
        })
        .collect();
    let plan = WritePlan::for_source(
        Collection::Global,
        SourceTag::Jhu,
        &["date", "uid", "iso3", "country"],
    );
    let window = Window::new(NaiveDate::from_ymd_opt(2021, 3, 7).unwrap(), 5);
    let sink = MemorySink::new();

    let (report, logs) =
        captured(|| write(documents, WriteMode::Incremental, &plan, &sink, window).unwrap());
    assert_eq!(report.inserted, 2);
    let line = logs
        .lines()
        .find(|line| line.contains("write complete"))
        .unwrap_or_else(|| panic!("no completion event in {logs:?}"));
    assert!(line.contains("INFO"));
    assert!(line.contains("deleted=0"));
    assert!(line.contains("inserted=2"));
    assert!(line.contains("modified=0"));
    assert!(line.contains("elapsed_seconds="));
    assert!(line.contains("global"));
}
