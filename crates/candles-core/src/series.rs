use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::candle::CandleRecord;

/// Candles accumulated by one range fetch.
///
/// Records keep the order they were fetched in: each page newest-first, pages
/// walking backwards in time, so the series as a whole runs newest to oldest.
/// Use [`CandleSeries::into_ascending`] for chronological order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandleSeries {
    records: Vec<CandleRecord>,
}

impl CandleSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[CandleRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CandleRecord> {
        self.records.iter()
    }

    pub fn first(&self) -> Option<&CandleRecord> {
        self.records.first()
    }

    pub fn last(&self) -> Option<&CandleRecord> {
        self.records.last()
    }

    /// Oldest local timestamp in the series, regardless of order.
    pub fn earliest(&self) -> Option<NaiveDateTime> {
        self.records.iter().map(CandleRecord::local_timestamp).min()
    }

    /// Newest local timestamp in the series, regardless of order.
    pub fn latest(&self) -> Option<NaiveDateTime> {
        self.records.iter().map(CandleRecord::local_timestamp).max()
    }

    /// Reorder oldest-first. The sort is stable, so records sharing a
    /// timestamp keep their relative order.
    pub fn into_ascending(mut self) -> Self {
        self.records.sort_by_key(CandleRecord::local_timestamp);
        self
    }

    pub fn into_vec(self) -> Vec<CandleRecord> {
        self.records
    }
}

impl From<Vec<CandleRecord>> for CandleSeries {
    fn from(records: Vec<CandleRecord>) -> Self {
        Self { records }
    }
}

impl FromIterator<CandleRecord> for CandleSeries {
    fn from_iter<I: IntoIterator<Item = CandleRecord>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

impl Extend<CandleRecord> for CandleSeries {
    fn extend<I: IntoIterator<Item = CandleRecord>>(&mut self, iter: I) {
        self.records.extend(iter);
    }
}

impl IntoIterator for CandleSeries {
    type Item = CandleRecord;
    type IntoIter = std::vec::IntoIter<CandleRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl<'a> IntoIterator for &'a CandleSeries {
    type Item = &'a CandleRecord;
    type IntoIter = std::slice::Iter<'a, CandleRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
