//! Per-year metadata table: one row per retrieved profile.
//!
//! On disk the table is split in two halves that are re-joined on load:
//! the numeric columns packed into one column container, and the string
//! `profid` column in a gzip text file. Each column is also mirrored into its
//! own metadata [`VariableStore`](crate::store::VariableStore) so single
//! variables can be read without the whole table.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::io::{Read, Write};

use chrono::{DateTime, NaiveDateTime, TimeDelta};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tracing::{debug, info};

use crate::container::{self, Array};
use crate::error::{ArchiveError, fs_err};
use crate::keys::{self, ProfileKey};
use crate::store::Archive;
use crate::variables::{PRODID, PROFIDINT, VariableKind};

const IDS_HEADER: &str = "profid";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalType {
    Float,
    Int,
    Timestamp,
    Duration,
}

impl LogicalType {
    /// Date and time columns are stored as integer nanoseconds; their names
    /// decide how they are restored.
    pub fn for_stored_column(name: &str, array: &Array) -> Self {
        match array {
            Array::Float(_) => LogicalType::Float,
            Array::Int(_) if name == "UTC" || name.starts_with("ref_utc_") => LogicalType::Duration,
            Array::Int(_) if name.to_ascii_lowercase().contains("date") => LogicalType::Timestamp,
            Array::Int(_) => LogicalType::Int,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Float(Vec<f64>),
    Int(Vec<i64>),
    Timestamp(Vec<NaiveDateTime>),
    Duration(Vec<TimeDelta>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Float(v) => v.len(),
            Column::Int(v) => v.len(),
            Column::Timestamp(v) => v.len(),
            Column::Duration(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn logical_type(&self) -> LogicalType {
        match self {
            Column::Float(_) => LogicalType::Float,
            Column::Int(_) => LogicalType::Int,
            Column::Timestamp(_) => LogicalType::Timestamp,
            Column::Duration(_) => LogicalType::Duration,
        }
    }

    pub fn as_float(&self) -> Option<&[f64]> {
        match self {
            Column::Float(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_timestamps(&self) -> Option<&[NaiveDateTime]> {
        match self {
            Column::Timestamp(v) => Some(v),
            _ => None,
        }
    }

    /// Numeric view used by predicates; integers widen to `f64`.
    pub fn value_f64(&self, index: usize) -> Option<f64> {
        match self {
            Column::Float(v) => v.get(index).copied(),
            Column::Int(v) => v.get(index).map(|x| *x as f64),
            Column::Timestamp(_) | Column::Duration(_) => None,
        }
    }

    fn take(&self, order: &[usize]) -> Column {
        match self {
            Column::Float(v) => Column::Float(order.iter().map(|&i| v[i]).collect()),
            Column::Int(v) => Column::Int(order.iter().map(|&i| v[i]).collect()),
            Column::Timestamp(v) => Column::Timestamp(order.iter().map(|&i| v[i]).collect()),
            Column::Duration(v) => Column::Duration(order.iter().map(|&i| v[i]).collect()),
        }
    }

    fn extend_from(&mut self, other: &Column) -> bool {
        match (self, other) {
            (Column::Float(a), Column::Float(b)) => a.extend_from_slice(b),
            (Column::Int(a), Column::Int(b)) => a.extend_from_slice(b),
            (Column::Timestamp(a), Column::Timestamp(b)) => a.extend_from_slice(b),
            (Column::Duration(a), Column::Duration(b)) => a.extend_from_slice(b),
            _ => return false,
        }
        true
    }

    pub fn to_array(&self, year: i32, name: &str) -> Result<Array, ArchiveError> {
        Ok(match self {
            Column::Float(v) => Array::Float(v.clone()),
            Column::Int(v) => Array::Int(v.clone()),
            Column::Timestamp(v) => Array::Int(
                v.iter()
                    .map(|ts| {
                        ts.and_utc().timestamp_nanos_opt().ok_or_else(|| {
                            ArchiveError::SchemaMismatch {
                                year,
                                detail: format!(
                                    "{name}: timestamp {ts} does not fit in nanoseconds"
                                ),
                            }
                        })
                    })
                    .collect::<Result<_, _>>()?,
            ),
            Column::Duration(v) => Array::Int(
                v.iter()
                    .map(|d| {
                        d.num_nanoseconds().ok_or_else(|| ArchiveError::SchemaMismatch {
                            year,
                            detail: format!("{name}: duration {d} does not fit in nanoseconds"),
                        })
                    })
                    .collect::<Result<_, _>>()?,
            ),
        })
    }

    pub fn from_array(name: &str, array: Array) -> Column {
        match (LogicalType::for_stored_column(name, &array), array) {
            (_, Array::Float(v)) => Column::Float(v),
            (LogicalType::Timestamp, Array::Int(v)) => Column::Timestamp(
                v.into_iter()
                    .map(|ns| DateTime::from_timestamp_nanos(ns).naive_utc())
                    .collect(),
            ),
            (LogicalType::Duration, Array::Int(v)) => {
                Column::Duration(v.into_iter().map(TimeDelta::nanoseconds).collect())
            }
            (_, Array::Int(v)) => Column::Int(v),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataTable {
    ids: Vec<String>,
    keys: Vec<ProfileKey>,
    columns: BTreeMap<String, Column>,
}

impl MetadataTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from its id/key columns and attribute columns. Every
    /// column must have one value per id.
    pub fn from_parts(
        ids: Vec<String>,
        keys: Vec<ProfileKey>,
        columns: BTreeMap<String, Column>,
    ) -> Result<Self, ArchiveError> {
        let year = keys.first().map(|k| keys::year_of_profile(*k)).unwrap_or(0);
        if ids.len() != keys.len() {
            return Err(ArchiveError::ShapeMismatch {
                year,
                detail: format!("{} profile ids for {} profile keys", ids.len(), keys.len()),
            });
        }
        if let Some((name, column)) = columns.iter().find(|(_, c)| c.len() != keys.len()) {
            return Err(ArchiveError::ShapeMismatch {
                year,
                detail: format!("column {name} has {} rows, expected {}", column.len(), keys.len()),
            });
        }
        Ok(Self { ids, keys, columns })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn keys(&self) -> &[ProfileKey] {
        &self.keys
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn float(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).and_then(Column::as_float)
    }

    /// Row index of `profid`, the table's lookup key.
    pub fn position(&self, profid: &str) -> Option<usize> {
        self.ids.iter().position(|id| id == profid)
    }

    pub fn drop_column(&mut self, name: &str) -> Option<Column> {
        self.columns.remove(name)
    }

    /// Calendar years touched by the rows, derived from the profile keys.
    pub fn years(&self) -> BTreeSet<i32> {
        self.keys.iter().map(|k| keys::year_of_profile(*k)).collect()
    }

    /// The single year of the table; `None` when empty.
    pub fn year(&self) -> Result<Option<i32>, ArchiveError> {
        let years = self.years();
        match years.len() {
            0 => Ok(None),
            1 => Ok(years.into_iter().next()),
            _ => Err(ArchiveError::MixedYear {
                years: years.into_iter().collect(),
            }),
        }
    }

    pub fn take(&self, order: &[usize]) -> MetadataTable {
        MetadataTable {
            ids: order.iter().map(|&i| self.ids[i].clone()).collect(),
            keys: order.iter().map(|&i| self.keys[i]).collect(),
            columns: self
                .columns
                .iter()
                .map(|(name, column)| (name.clone(), column.take(order)))
                .collect(),
        }
    }

    /// Rows where `mask` is true. Missing mask entries count as false.
    pub fn select(&self, mask: &[bool]) -> MetadataTable {
        let order: Vec<usize> = (0..self.len())
            .filter(|&i| mask.get(i).copied().unwrap_or(false))
            .collect();
        self.take(&order)
    }

    /// Stable ordering of rows by ascending profile key.
    pub fn sort_permutation(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by_key(|&i| self.keys[i]);
        order
    }

    /// Copy of the table ordered by `profidint`. The sort is stable.
    pub fn sort_by_key(&self) -> MetadataTable {
        self.take(&self.sort_permutation())
    }

    pub fn is_sorted_by_key(&self) -> bool {
        self.keys.windows(2).all(|pair| pair[0] <= pair[1])
    }

    /// Appends `other` below `self`. Column sets must agree unless `self`
    /// has never held any rows.
    pub fn concat(&mut self, other: &MetadataTable) -> Result<(), ArchiveError> {
        if self.keys.is_empty() && self.columns.is_empty() {
            *self = other.clone();
            return Ok(());
        }
        if other.keys.is_empty() && other.columns.is_empty() {
            return Ok(());
        }
        let year = self
            .keys
            .first()
            .or(other.keys.first())
            .map(|k| keys::year_of_profile(*k))
            .unwrap_or(0);
        let ours: Vec<&String> = self.columns.keys().collect();
        let theirs: Vec<&String> = other.columns.keys().collect();
        if ours != theirs {
            return Err(ArchiveError::SchemaMismatch {
                year,
                detail: format!("columns {ours:?} vs {theirs:?}"),
            });
        }
        for (name, column) in self.columns.iter_mut() {
            let incoming = &other.columns[name];
            if !column.extend_from(incoming) {
                return Err(ArchiveError::SchemaMismatch {
                    year,
                    detail: format!(
                        "column {name} is {:?} but incoming rows are {:?}",
                        column.logical_type(),
                        incoming.logical_type()
                    ),
                });
            }
        }
        self.ids.extend(other.ids.iter().cloned());
        self.keys.extend_from_slice(&other.keys);
        Ok(())
    }

    /// Checks that every id string encodes to its packed key.
    pub fn verify_ids(&self) -> Result<(), ArchiveError> {
        for (id, key) in self.ids.iter().zip(&self.keys) {
            let encoded = keys::encode_profile_key(id)?;
            if encoded != *key {
                return Err(ArchiveError::KeyMismatch {
                    year: keys::year_of_profile(*key),
                    profile_key: *key,
                    row_key: encoded,
                });
            }
        }
        Ok(())
    }
}

/// Combines stored rows with incoming rows, refusing any profile key that
/// is already present (or repeated within `incoming`).
pub fn merge_unique(
    existing: &MetadataTable,
    incoming: &MetadataTable,
) -> Result<MetadataTable, ArchiveError> {
    let mut seen: HashSet<ProfileKey> = existing.keys.iter().copied().collect();
    for &key in &incoming.keys {
        if !seen.insert(key) {
            return Err(ArchiveError::DuplicateKey {
                year: keys::year_of_profile(key),
                series: PROFIDINT,
                key,
            });
        }
    }
    let mut merged = existing.clone();
    merged.drop_column(PRODID);
    let mut incoming = incoming.clone();
    incoming.drop_column(PRODID);
    merged.concat(&incoming)?;
    Ok(merged)
}

/// Persistence for [`MetadataTable`]s, one per calendar year.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    archive: Archive,
}

impl MetadataStore {
    pub fn new(archive: Archive) -> Self {
        Self { archive }
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    pub fn exists(&self, year: i32) -> bool {
        self.archive.metadata_container_path(year).as_std_path().exists()
            && self.archive.metadata_ids_path(year).as_std_path().exists()
    }

    pub fn load(&self, year: i32) -> Result<MetadataTable, ArchiveError> {
        let container_path = self.archive.metadata_container_path(year);
        let ids_path = self.archive.metadata_ids_path(year);
        if !container_path.as_std_path().exists() || !ids_path.as_std_path().exists() {
            return Err(ArchiveError::NotFound {
                year,
                what: "metadata table".to_string(),
            });
        }

        let bytes = fs::read(container_path.as_std_path()).map_err(fs_err)?;
        let mut keys = None;
        let mut columns = BTreeMap::new();
        for (name, array) in container::decode_columns(&container_path, &bytes)? {
            if name == PROFIDINT {
                keys = array.as_int().map(<[i64]>::to_vec);
                continue;
            }
            let column = Column::from_array(&name, array);
            columns.insert(name, column);
        }
        let keys = keys.ok_or_else(|| ArchiveError::SchemaMismatch {
            year,
            detail: format!("{container_path} has no integer {PROFIDINT} column"),
        })?;
        debug!(path = %container_path, rows = keys.len(), "loaded metadata columns");

        let ids = read_ids(&ids_path)?;
        debug!(path = %ids_path, rows = ids.len(), "loaded profile ids");
        if ids.len() != keys.len() {
            return Err(ArchiveError::ShapeMismatch {
                year,
                detail: format!("{} profile ids for {} profile keys", ids.len(), keys.len()),
            });
        }

        MetadataTable::from_parts(ids, keys, columns)
    }

    pub fn load_or_empty(&self, year: i32) -> Result<MetadataTable, ArchiveError> {
        match self.load(year) {
            Ok(table) => Ok(table),
            Err(err) if err.is_not_found() => Ok(MetadataTable::new()),
            Err(err) => Err(err),
        }
    }

    /// Tables of several years stacked in the order given. Years with
    /// nothing stored contribute no rows.
    pub fn load_years(&self, years: &[i32]) -> Result<MetadataTable, ArchiveError> {
        let mut combined = MetadataTable::new();
        for &year in years {
            combined.concat(&self.load_or_empty(year)?)?;
        }
        Ok(combined)
    }

    /// Writes `table` as the complete state of its year and returns that
    /// year. An empty table has no year and is not written.
    pub fn save(&self, table: &MetadataTable) -> Result<Option<i32>, ArchiveError> {
        let Some(year) = table.year()? else {
            return Ok(None);
        };

        let mut arrays = vec![(PROFIDINT.to_string(), Array::Int(table.keys.clone()))];
        for (name, column) in &table.columns {
            if name == PRODID {
                continue;
            }
            arrays.push((name.clone(), column.to_array(year, name)?));
        }

        for (name, array) in &arrays {
            self.archive
                .variable(year, name, VariableKind::Metadata)
                .overwrite(array)?;
        }
        let container_path = self.archive.metadata_container_path(year);
        Archive::write_bytes_atomic(&container_path, &container::encode_columns(&arrays)?)?;
        let ids_path = self.archive.metadata_ids_path(year);
        Archive::write_bytes_atomic(&ids_path, &encode_ids(&table.ids)?)?;

        info!(year, rows = table.len(), columns = arrays.len(), "saved metadata table");
        Ok(Some(year))
    }

    /// `save(merge_unique(load_or_empty(year), new_rows))`. On failure the
    /// stored table is left untouched.
    pub fn append(&self, new_rows: &MetadataTable) -> Result<Option<i32>, ArchiveError> {
        let Some(year) = new_rows.year()? else {
            return Ok(None);
        };
        let existing = self.load_or_empty(year)?;
        let merged = merge_unique(&existing, new_rows)?;
        self.save(&merged)
    }

    /// Product keys (`profidint / 10^4`) already represented for `year`.
    pub fn imported_products(&self, year: i32) -> Result<BTreeSet<i64>, ArchiveError> {
        let table = self.load_or_empty(year)?;
        Ok(table
            .keys()
            .iter()
            .map(|k| keys::product_of_profile(*k))
            .collect())
    }
}

fn encode_ids(ids: &[String]) -> Result<Vec<u8>, ArchiveError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    writeln!(encoder, "{IDS_HEADER}").map_err(fs_err)?;
    for id in ids {
        writeln!(encoder, "{id}").map_err(fs_err)?;
    }
    encoder.finish().map_err(fs_err)
}

fn read_ids(path: &camino::Utf8Path) -> Result<Vec<String>, ArchiveError> {
    let bytes = fs::read(path.as_std_path()).map_err(fs_err)?;
    let mut text = String::new();
    GzDecoder::new(bytes.as_slice())
        .read_to_string(&mut text)
        .map_err(|err| ArchiveError::UnsupportedFormat {
            path: path.to_owned(),
            detail: err.to_string(),
        })?;
    let mut lines = text.lines();
    if lines.next() != Some(IDS_HEADER) {
        return Err(ArchiveError::UnsupportedFormat {
            path: path.to_owned(),
            detail: format!("missing {IDS_HEADER} header"),
        });
    }
    Ok(lines
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}
