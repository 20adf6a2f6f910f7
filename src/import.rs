use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use flate2::read::GzDecoder;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::check::{CheckReport, check_year};
use crate::config::{BatchGranularity, ResolvedConfig};
use crate::container::Array;
use crate::error::{ArchiveError, fs_err};
use crate::keys::{ProductId, ProductKey};
use crate::parse::{ProductParser, ProfileRows};
use crate::store::{Archive, YearLock, walk_dir};
use crate::table::{MetadataStore, MetadataTable};
use crate::variables::{LEVELS, ROWIDINT, VariableKind};

static PRODUCT_FILE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{10})_DDR\.TAB(?:\.gz)?$").expect("product file pattern is valid")
});

#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub year: i32,
    pub products_found: usize,
    pub products_imported: usize,
    pub batches: usize,
    pub skipped_batches: usize,
    pub profiles_added: usize,
    pub rows_added: usize,
    pub check: CheckReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct SortReport {
    pub year: i32,
    pub profiles_reordered: bool,
    pub rows_reordered: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MissingReport {
    pub year: i32,
    pub products: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchReport {
    pub fetched: Vec<String>,
    pub present: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Places the raw bytes of one product at `destination` (gzip compressed).
pub trait RawFetcher: Send + Sync {
    fn fetch_raw(&self, product: &ProductId, destination: &Utf8Path) -> Result<(), ArchiveError>;
}

/// A raw product found on local disk.
#[derive(Debug, Clone)]
pub struct LocalProduct {
    pub id: ProductId,
    pub path: Utf8PathBuf,
}

pub struct Importer<P: ProductParser> {
    archive: Archive,
    tables: MetadataStore,
    parser: P,
    granularity: BatchGranularity,
}

impl<P: ProductParser> Importer<P> {
    pub fn new(archive: Archive, parser: P) -> Self {
        Self {
            tables: MetadataStore::new(archive.clone()),
            archive,
            parser,
            granularity: BatchGranularity::default(),
        }
    }

    pub fn from_config(config: &ResolvedConfig, parser: P) -> Self {
        Self::new(Archive::from_config(config), parser).with_granularity(config.batch_granularity)
    }

    pub fn with_granularity(mut self, granularity: BatchGranularity) -> Self {
        self.granularity = granularity;
        self
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    /// Imports every local product of `year` that is not yet archived,
    /// re-sorts the year and verifies it.
    pub fn import_year(
        &self,
        year: i32,
        sink: &dyn ProgressSink,
    ) -> Result<ImportReport, ArchiveError> {
        let started = Instant::now();
        let _lock = YearLock::acquire(&self.archive, year)?;

        sink.event(ProgressEvent {
            message: format!("phase=Scan; scanning raw products for {year}"),
            elapsed: None,
        });
        let local = self.local_products(year)?;
        let missing = self.missing_from(year, &local)?;
        info!(year, found = local.len(), missing = missing.len(), "scanned raw products");

        let mut batches: BTreeMap<i64, Vec<&LocalProduct>> = BTreeMap::new();
        for product in &missing {
            batches
                .entry(self.granularity.batch_of(product.id.key()))
                .or_default()
                .push(product);
        }

        let mut report = ImportReport {
            year,
            products_found: local.len(),
            products_imported: 0,
            batches: batches.len(),
            skipped_batches: 0,
            profiles_added: 0,
            rows_added: 0,
            check: CheckReport {
                year,
                profile_count: 0,
                row_count: 0,
            },
        };

        for (batch, products) in &batches {
            let batch_started = Instant::now();
            let mut metadata = MetadataTable::new();
            let mut profiles = ProfileRows::new();
            for product in products {
                let parsed = self.parser.parse(&product.path)?;
                metadata.concat(&parsed.metadata)?;
                profiles.concat(&parsed.profiles)?;
            }

            if metadata.is_empty() && profiles.is_empty() {
                warn!(year, batch, products = products.len(), "batch has no usable retrievals");
                report.skipped_batches += 1;
                continue;
            }
            if profiles.len() != LEVELS * metadata.len() {
                return Err(ArchiveError::ShapeMismatch {
                    year,
                    detail: format!(
                        "batch {batch}: {} level rows for {} profiles",
                        profiles.len(),
                        metadata.len()
                    ),
                });
            }

            self.commit_batch(year, &metadata, &profiles)?;
            report.products_imported += products.len();
            report.profiles_added += metadata.len();
            report.rows_added += profiles.len();
            info!(
                year,
                batch,
                profiles = metadata.len(),
                rows = profiles.len(),
                "appended batch"
            );
            sink.event(ProgressEvent {
                message: format!(
                    "phase=Store; batch {batch}: {} products, {} profiles",
                    products.len(),
                    metadata.len()
                ),
                elapsed: Some(batch_started.elapsed()),
            });
        }

        sink.event(ProgressEvent {
            message: format!("phase=Sort; sorting {year}"),
            elapsed: None,
        });
        self.sort_locked(year)?;

        sink.event(ProgressEvent {
            message: format!("phase=Check; checking {year}"),
            elapsed: None,
        });
        report.check = check_year(&self.archive, year)?;

        sink.event(ProgressEvent {
            message: format!(
                "phase=Done; {} profiles added to {year}",
                report.profiles_added
            ),
            elapsed: Some(started.elapsed()),
        });
        Ok(report)
    }

    /// Restores ascending key order for the year's metadata table and profile
    /// variables. Already sorted data is left untouched.
    pub fn sort_year(&self, year: i32) -> Result<SortReport, ArchiveError> {
        let _lock = YearLock::acquire(&self.archive, year)?;
        self.sort_locked(year)
    }

    fn sort_locked(&self, year: i32) -> Result<SortReport, ArchiveError> {
        let table = self.tables.load_or_empty(year)?;
        let profiles_reordered = !table.is_sorted_by_key();
        if profiles_reordered {
            let sorted = table.sort_by_key();
            self.tables.save(&sorted)?;
            info!(year, profiles = sorted.len(), "re-sorted metadata table");
        }

        let rows = self.archive.variable(year, ROWIDINT, VariableKind::Profile);
        let order = match rows.read_or_empty()? {
            Some(data) => {
                let keys = data.values.as_int().ok_or_else(|| ArchiveError::SchemaMismatch {
                    year,
                    detail: format!("{ROWIDINT} is not stored as integers"),
                })?;
                let mut order: Vec<usize> = (0..keys.len()).collect();
                order.sort_by_key(|&i| keys[i]);
                order
            }
            None => Vec::new(),
        };
        let rows_reordered = order.iter().enumerate().any(|(i, &j)| i != j);
        if rows_reordered {
            for name in self.archive.profile_variables(year)? {
                let store = self.archive.variable(year, &name, VariableKind::Profile);
                let data = store.read()?;
                if data.values.len() != order.len() {
                    return Err(ArchiveError::ShapeMismatch {
                        year,
                        detail: format!(
                            "profile variable {name} has {} rows, {ROWIDINT} has {}",
                            data.values.len(),
                            order.len()
                        ),
                    });
                }
                store.overwrite(&data.values.take(&order))?;
            }
            info!(year, rows = order.len(), "re-sorted profile variables");
        }

        Ok(SortReport {
            year,
            profiles_reordered,
            rows_reordered,
        })
    }

    /// Local products of `year` that are not yet in the metadata table.
    pub fn missing_products(&self, year: i32) -> Result<Vec<LocalProduct>, ArchiveError> {
        let local = self.local_products(year)?;
        self.missing_from(year, &local)
    }

    /// Materialises each product that is not yet on disk, next to where the
    /// importer will look for it. Empty or truncated copies are discarded and
    /// fetched again. Downloads land in a sibling temp file and only reach
    /// the final path once complete.
    pub fn fetch_products(
        &self,
        fetcher: &dyn RawFetcher,
        products: &[ProductId],
        sink: &dyn ProgressSink,
    ) -> Result<FetchReport, ArchiveError> {
        let mut report = FetchReport::default();
        for product in products {
            let plain = self.archive.raw_product_path(product);
            let compressed = Utf8PathBuf::from(format!("{plain}.gz"));
            if is_complete_raw(&plain) || is_complete_raw(&compressed) {
                report.present.push(product.to_string());
                continue;
            }
            for stale in [&plain, &compressed] {
                if stale.as_std_path().exists() {
                    warn!(product = %product, path = %stale, "discarding incomplete raw product");
                    fs::remove_file(stale.as_std_path()).map_err(fs_err)?;
                }
            }

            let parent = compressed
                .parent()
                .ok_or_else(|| ArchiveError::Filesystem("invalid destination path".to_string()))?;
            fs::create_dir_all(parent.as_std_path()).map_err(fs_err)?;
            let temp = tempfile::Builder::new()
                .prefix(".mcs-fetch")
                .suffix(".gz")
                .tempfile_in(parent.as_std_path())
                .map_err(fs_err)?;
            let temp_path = Utf8Path::from_path(temp.path())
                .ok_or_else(|| ArchiveError::Filesystem(format!("non UTF-8 temp path in {parent}")))?
                .to_path_buf();

            let started = Instant::now();
            fetcher.fetch_raw(product, &temp_path)?;
            if !is_complete_raw(&temp_path) {
                return Err(ArchiveError::Fetch {
                    product: product.to_string(),
                    detail: "download is empty or truncated".to_string(),
                });
            }
            temp.persist(compressed.as_std_path()).map_err(fs_err)?;
            debug!(product = %product, path = %compressed, "fetched raw product");
            sink.event(ProgressEvent {
                message: format!("phase=Fetch; {product}"),
                elapsed: Some(started.elapsed()),
            });
            report.fetched.push(product.to_string());
        }
        Ok(report)
    }

    /// Raw products stored under `DATA/{year}`, ordered by key. A plain file
    /// wins over its gzip twin.
    pub fn local_products(&self, year: i32) -> Result<Vec<LocalProduct>, ArchiveError> {
        let dir = self.archive.year_dir(year);
        if !dir.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let mut found: BTreeMap<ProductKey, LocalProduct> = BTreeMap::new();
        for path in walk_dir(dir.as_std_path())? {
            let Ok(path) = Utf8PathBuf::from_path_buf(path) else {
                continue;
            };
            let Some(name) = path.file_name() else {
                continue;
            };
            let Some(captures) = PRODUCT_FILE_PATTERN.captures(name) else {
                continue;
            };
            let id: ProductId = format!("{}_DDR.TAB", &captures[1]).parse()?;
            if id.year() != year {
                continue;
            }
            let plain = !name.ends_with(".gz");
            match found.get(&id.key()) {
                Some(existing) if !plain || !existing.path.as_str().ends_with(".gz") => {}
                _ => {
                    found.insert(id.key(), LocalProduct { id, path });
                }
            }
        }
        Ok(found.into_values().collect())
    }

    fn missing_from(
        &self,
        year: i32,
        local: &[LocalProduct],
    ) -> Result<Vec<LocalProduct>, ArchiveError> {
        let imported: BTreeSet<ProductKey> = self.tables.imported_products(year)?;
        Ok(local
            .iter()
            .filter(|product| !imported.contains(&product.id.key()))
            .cloned()
            .collect())
    }

    fn commit_batch(
        &self,
        year: i32,
        metadata: &MetadataTable,
        profiles: &ProfileRows,
    ) -> Result<(), ArchiveError> {
        self.tables.append(metadata)?;
        self.archive
            .variable(year, ROWIDINT, VariableKind::Profile)
            .append(&Array::Int(profiles.keys().to_vec()))?;
        for (name, values) in profiles.columns() {
            self.archive
                .variable(year, name, VariableKind::Profile)
                .append(&Array::Float(values.to_vec()))?;
        }
        Ok(())
    }
}

/// A raw product is usable when it is non-empty and, if gzip compressed,
/// decompresses to the end of a non-empty stream.
fn is_complete_raw(path: &Utf8Path) -> bool {
    let Ok(file) = fs::File::open(path.as_std_path()) else {
        return false;
    };
    if !file.metadata().is_ok_and(|meta| meta.is_file() && meta.len() > 0) {
        return false;
    }
    if !path.as_str().ends_with(".gz") {
        return true;
    }
    matches!(io::copy(&mut GzDecoder::new(file), &mut io::sink()), Ok(n) if n > 0)
}

impl MissingReport {
    pub fn new(year: i32, products: &[LocalProduct]) -> Self {
        Self {
            year,
            products: products.iter().map(|p| p.id.to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::ParsedProduct;

    struct NoParser;

    impl ProductParser for NoParser {
        fn parse(&self, _path: &Utf8Path) -> Result<ParsedProduct, ArchiveError> {
            Ok(ParsedProduct::default())
        }
    }

    fn touch(path: &Utf8Path) {
        fs::create_dir_all(path.parent().unwrap().as_std_path()).unwrap();
        fs::write(path.as_std_path(), b"").unwrap();
    }

    #[test]
    fn local_products_match_names_and_prefer_plain_files() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let importer = Importer::new(Archive::new(root.clone()), NoParser);
        let data = root.join("DATA/2007/200703/20070301");
        touch(&data.join("2007030106_DDR.TAB.gz"));
        touch(&data.join("2007030106_DDR.TAB"));
        touch(&data.join("2007030112_DDR.TAB.gz"));
        touch(&data.join("2007030112_DDR.TAB.txt"));
        touch(&data.join("notes.txt"));

        let products = importer.local_products(2007).unwrap();
        let names: Vec<&str> = products.iter().map(|p| p.path.file_name().unwrap()).collect();
        assert_eq!(names, vec!["2007030106_DDR.TAB", "2007030112_DDR.TAB.gz"]);
        assert!(importer.local_products(2008).unwrap().is_empty());
    }
}
