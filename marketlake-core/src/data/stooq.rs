//! Stooq bulk download adapter.
//!
//! Stooq bulk archives hold nested folders of per-ticker CSV files
//! (`.../nasdaq stocks/1/aapl.us.txt` style names, here `*.csv`). The source
//! is either the unpacked directory or the `.zip` itself; entries are
//! indexed once by upper-cased stem. A fetch reads whole files, so the
//! window is ignored.

use super::provider::{FetchError, FetchWindow, Selector, SourceAdapter};
use crate::timeframe::Timeframe;
use polars::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use ::zip::ZipArchive;

/// Where one ticker's CSV lives.
#[derive(Debug, Clone)]
enum Location {
    File(PathBuf),
    /// Entry name inside the archive at `root`.
    Entry(String),
}

pub struct StooqDirectory {
    root: PathBuf,
    files: BTreeMap<String, Location>,
    native: Timeframe,
}

impl StooqDirectory {
    /// Index every `*.csv` under `root`, recursively. A `root` ending in
    /// `.zip` is read as an archive without unpacking it.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, FetchError> {
        let root = root.into();
        let mut files = BTreeMap::new();
        if root.is_dir() {
            index_dir(&root, &mut files)?;
        } else if root.is_file() && is_zip(&root) {
            index_archive(&root, &mut files)?;
        } else {
            return Err(FetchError::Permanent(format!(
                "stooq directory or .zip archive not found: {}",
                root.display()
            )));
        }
        tracing::debug!(root = %root.display(), files = files.len(), "indexed stooq source");
        Ok(Self {
            root,
            files,
            native: Timeframe::FIVE_MINUTES,
        })
    }

    /// Bar width of the files (Stooq intraday bulk is 5-minute).
    pub fn with_native_timeframe(mut self, native: Timeframe) -> Self {
        self.native = native;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_archive(&self) -> bool {
        self.root.is_file()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.files.contains_key(&symbol.to_ascii_uppercase())
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    fn read_symbol(&self, symbol: &str) -> Result<DataFrame, FetchError> {
        let key = symbol.to_ascii_uppercase();
        let location = self
            .files
            .get(&key)
            .ok_or_else(|| FetchError::Permanent(format!("no stooq file for {key}")))?;
        match location {
            Location::File(path) => read_stooq_csv(path, &key),
            Location::Entry(name) => {
                let mut archive = open_archive(&self.root)?;
                let entry = archive.by_name(name).map_err(|e| {
                    FetchError::Permanent(format!("{name} in {}: {e}", self.root.display()))
                })?;
                let origin = format!("{}:{name}", self.root.display());
                read_stooq_from(entry, &origin, &key)
            }
        }
    }
}

fn is_zip(path: &Path) -> bool {
    has_extension(path, "zip")
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

fn index_dir(dir: &Path, files: &mut BTreeMap<String, Location>) -> Result<(), FetchError> {
    let entries = fs::read_dir(dir)
        .map_err(|e| FetchError::Permanent(format!("read dir {}: {e}", dir.display())))?;
    let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
    paths.sort();
    for path in paths {
        if path.is_dir() {
            index_dir(&path, files)?;
        } else if has_extension(&path, "csv") {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                files
                    .entry(stem.to_ascii_uppercase())
                    .or_insert(Location::File(path));
            }
        }
    }
    Ok(())
}

fn open_archive(path: &Path) -> Result<ZipArchive<fs::File>, FetchError> {
    let file = fs::File::open(path)
        .map_err(|e| FetchError::Permanent(format!("open {}: {e}", path.display())))?;
    ZipArchive::new(file)
        .map_err(|e| FetchError::Permanent(format!("read archive {}: {e}", path.display())))
}

fn index_archive(path: &Path, files: &mut BTreeMap<String, Location>) -> Result<(), FetchError> {
    let archive = open_archive(path)?;
    let mut names: Vec<&str> = archive.file_names().filter(|n| !n.ends_with('/')).collect();
    names.sort_unstable();
    for name in names {
        let entry = Path::new(name);
        if !has_extension(entry, "csv") {
            continue;
        }
        if let Some(stem) = entry.file_stem().and_then(|s| s.to_str()) {
            files
                .entry(stem.to_ascii_uppercase())
                .or_insert_with(|| Location::Entry(name.to_string()));
        }
    }
    Ok(())
}

/// Read a Stooq CSV as text columns plus a `symbol` column. Any ticker
/// column in the file is dropped in favour of `symbol`.
pub fn read_stooq_csv(path: &Path, symbol: &str) -> Result<DataFrame, FetchError> {
    let file = fs::File::open(path)
        .map_err(|e| FetchError::Permanent(format!("open {}: {e}", path.display())))?;
    read_stooq_from(file, &path.display().to_string(), symbol)
}

fn read_stooq_from<R: Read>(input: R, origin: &str, symbol: &str) -> Result<DataFrame, FetchError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(input);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| FetchError::Permanent(format!("read header of {origin}: {e}")))?
        .iter()
        .map(str::to_string)
        .collect();
    let mut columns: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];

    for record in reader.records() {
        let record = record.map_err(|e| FetchError::Permanent(format!("parse {origin}: {e}")))?;
        for (i, column) in columns.iter_mut().enumerate() {
            column.push(record.get(i).filter(|v| !v.is_empty()).map(str::to_string));
        }
    }

    let height = columns.first().map_or(0, Vec::len);
    let mut out = vec![Column::new("symbol".into(), vec![symbol.to_string(); height])];
    for (name, values) in headers.iter().zip(columns) {
        if is_ticker_header(name) {
            continue;
        }
        out.push(Column::new(name.as_str().into(), values));
    }
    DataFrame::new(out).map_err(|e| FetchError::Permanent(format!("frame from {origin}: {e}")))
}

fn is_ticker_header(name: &str) -> bool {
    let folded: String = name
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect::<String>()
        .to_ascii_lowercase();
    matches!(folded.as_str(), "ticker" | "symbol")
}

impl SourceAdapter for StooqDirectory {
    fn name(&self) -> &str {
        "stooq"
    }

    fn fetch(&self, selector: &Selector, _window: &FetchWindow) -> Result<DataFrame, FetchError> {
        let Selector::Bars { symbols, .. } = selector else {
            return Err(FetchError::Permanent(format!("stooq cannot serve {}", selector.label())));
        };
        let mut out: Option<DataFrame> = None;
        for symbol in symbols {
            let df = self.read_symbol(symbol)?;
            match out.as_mut() {
                Some(acc) => {
                    acc.vstack_mut(&df)
                        .map_err(|e| FetchError::Permanent(format!("stooq files disagree on columns: {e}")))?;
                }
                None => out = Some(df),
            }
        }
        Ok(out.unwrap_or_default())
    }

    fn feed(&self) -> Option<&str> {
        Some("bulk")
    }

    fn native_timeframe(&self, _requested: Timeframe) -> Timeframe {
        self.native
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::normalize::normalize;
    use crate::schema::DatasetKind;

    const AAPL: &str = "<TICKER>,<PER>,<DATE>,<TIME>,<OPEN>,<HIGH>,<LOW>,<CLOSE>,<VOL>,<OPENINT>\n\
AAPL.US,5,20240102,093000,100,101,99,100,10,0\n\
AAPL.US,5,20240102,093500,100,102,100,101,20,0\n\
AAPL.US,5,20240102,094000,101,oops,100,101,5,0\n";

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("5 min/us/nasdaq stocks/1");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("aapl.us.csv"), AAPL).unwrap();
        fs::write(dir.path().join("readme.txt"), "not data").unwrap();
        dir
    }

    #[test]
    fn indexes_nested_files_by_upper_stem() {
        let dir = fixture();
        let stooq = StooqDirectory::open(dir.path()).unwrap();
        assert_eq!(stooq.symbols().collect::<Vec<_>>(), vec!["AAPL.US"]);
        assert!(stooq.contains("aapl.us"));
    }

    #[test]
    fn fetch_normalizes_with_combined_date_and_time() {
        let dir = fixture();
        let stooq = StooqDirectory::open(dir.path()).unwrap();
        let selector = Selector::Bars {
            symbols: vec!["AAPL.US".into()],
            timeframe: Timeframe::TEN_MINUTES,
        };
        let window = FetchWindow::new(chrono::Utc::now(), chrono::Utc::now());
        let raw = stooq.fetch(&selector, &window).unwrap();
        let prov = stooq.provenance(&selector);
        assert_eq!(prov.defaults.get("timeframe").map(String::as_str), Some("5min"));
        assert_eq!(prov.feed.as_deref(), Some("bulk"));

        let bars = normalize(DatasetKind::Bar, &raw, &prov).unwrap();
        // Unparseable high drops the third row.
        assert_eq!(bars.height(), 2);
    }

    fn zip_fixture() -> tempfile::TempDir {
        use std::io::Write;
        use ::zip::write::SimpleFileOptions;

        let dir = tempfile::tempdir().unwrap();
        let file = fs::File::create(dir.path().join("5_us_txt.zip")).unwrap();
        let mut zip = ::zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default();
        zip.add_directory("data/5 min/us/nasdaq stocks/1/", options).unwrap();
        zip.start_file("data/5 min/us/nasdaq stocks/1/aapl.us.csv", options).unwrap();
        zip.write_all(AAPL.as_bytes()).unwrap();
        zip.start_file("data/readme.txt", options).unwrap();
        zip.write_all(b"not data").unwrap();
        zip.finish().unwrap();
        dir
    }

    #[test]
    fn reads_entries_straight_from_a_zip_archive() {
        let dir = zip_fixture();
        let stooq = StooqDirectory::open(dir.path().join("5_us_txt.zip")).unwrap();
        assert!(stooq.is_archive());
        assert_eq!(stooq.symbols().collect::<Vec<_>>(), vec!["AAPL.US"]);

        let selector = Selector::Bars {
            symbols: vec!["aapl.us".into()],
            timeframe: Timeframe::TEN_MINUTES,
        };
        let raw = stooq
            .fetch(&selector, &FetchWindow::new(chrono::Utc::now(), chrono::Utc::now()))
            .unwrap();
        assert_eq!(raw.height(), 3);
        let bars = normalize(DatasetKind::Bar, &raw, &stooq.provenance(&selector)).unwrap();
        assert_eq!(bars.height(), 2);
    }

    #[test]
    fn non_zip_file_is_rejected() {
        let dir = fixture();
        let readme = dir.path().join("readme.txt");
        assert!(StooqDirectory::open(readme).is_err());
    }

    #[test]
    fn unknown_symbol_is_permanent() {
        let dir = fixture();
        let stooq = StooqDirectory::open(dir.path()).unwrap();
        let err = stooq
            .fetch(
                &Selector::Bars {
                    symbols: vec!["MSFT.US".into()],
                    timeframe: Timeframe::TEN_MINUTES,
                },
                &FetchWindow::new(chrono::Utc::now(), chrono::Utc::now()),
            )
            .unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn missing_directory_is_an_error() {
        assert!(StooqDirectory::open("/definitely/not/here").is_err());
    }
}
