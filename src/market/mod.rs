use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("failed to open price file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse price CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("price CSV has no usable price column")]
    MissingPriceColumn,
    #[error("no prices found for {0}")]
    EmptySeries(String),
}

/// Supplies a time-ordered series of closing prices for a symbol.
pub trait PriceSource {
    fn closing_prices(&self, symbol: &str) -> Result<Vec<f64>, MarketDataError>;
}

#[derive(Debug, Clone)]
enum CsvLocation {
    Directory(PathBuf),
    File(PathBuf),
}

/// Reads prices from CSV exports, either `<dir>/<SYMBOL>.csv` or one fixed file.
///
/// The price column is `Adj Close` when present, then `Close`, then the
/// last column. Rows whose price does not parse are skipped.
#[derive(Debug, Clone)]
pub struct CsvPriceSource {
    location: CsvLocation,
    lookback: Option<usize>,
}

impl CsvPriceSource {
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            location: CsvLocation::Directory(dir.into()),
            lookback: None,
        }
    }

    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            location: CsvLocation::File(path.into()),
            lookback: None,
        }
    }

    /// Keeps only the most recent `periods` prices.
    pub fn with_lookback(mut self, periods: Option<usize>) -> Self {
        self.lookback = periods;
        self
    }

    fn path_for(&self, symbol: &str) -> PathBuf {
        match &self.location {
            CsvLocation::Directory(dir) => dir.join(format!("{symbol}.csv")),
            CsvLocation::File(path) => path.clone(),
        }
    }
}

impl PriceSource for CsvPriceSource {
    fn closing_prices(&self, symbol: &str) -> Result<Vec<f64>, MarketDataError> {
        let path = self.path_for(symbol);
        let file = open(&path)?;
        let mut prices = read_closing_prices(BufReader::new(file))?;

        if let Some(lookback) = self.lookback {
            let skip = prices.len().saturating_sub(lookback);
            prices.drain(..skip);
        }

        if prices.is_empty() {
            return Err(MarketDataError::EmptySeries(symbol.to_string()));
        }

        tracing::debug!(symbol, count = prices.len(), path = ?path, "loaded closing prices");
        Ok(prices)
    }
}

fn open(path: &Path) -> Result<File, MarketDataError> {
    File::open(path).map_err(|source| MarketDataError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn read_closing_prices<R: Read>(reader: R) -> Result<Vec<f64>, MarketDataError> {
    let mut csv_reader = csv::Reader::from_reader(reader);
    let headers = csv_reader.headers()?.clone();
    let column = price_column(&headers).ok_or(MarketDataError::MissingPriceColumn)?;

    let mut prices = Vec::new();
    for record in csv_reader.records() {
        let record = record?;
        let Some(raw) = record.get(column) else {
            continue;
        };
        if let Ok(price) = raw.trim().parse::<f64>() {
            if price.is_finite() {
                prices.push(price);
            }
        }
    }
    Ok(prices)
}

fn price_column(headers: &csv::StringRecord) -> Option<usize> {
    let find = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
    };
    find("Adj Close")
        .or_else(|| find("Close"))
        .or_else(|| headers.len().checked_sub(1))
}
