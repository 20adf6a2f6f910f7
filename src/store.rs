use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use fs2::FileExt;
use tracing::debug;

use crate::config::ResolvedConfig;
use crate::container::{self, Array};
use crate::error::{ArchiveError, fs_err};
use crate::keys::ProductId;
use crate::variables::{LEVELS, PRESSURE, VariableKind, pressure_grid};

/// Root of an on-disk archive. All paths are derived from it; nothing is
/// read from process-wide state.
#[derive(Debug, Clone)]
pub struct Archive {
    root: Utf8PathBuf,
}

impl Archive {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self::new(config.archive_root.clone())
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn data_dir(&self) -> Utf8PathBuf {
        self.root.join("DATA")
    }

    pub fn year_dir(&self, year: i32) -> Utf8PathBuf {
        self.data_dir().join(year.to_string())
    }

    pub fn variable_path(&self, year: i32, name: &str, kind: VariableKind) -> Utf8PathBuf {
        self.year_dir(year)
            .join(kind.dir_name())
            .join(format!("{year}_{name}_{}.bin.gz", kind.file_suffix()))
    }

    pub fn metadata_container_path(&self, year: i32) -> Utf8PathBuf {
        self.year_dir(year)
            .join("indexdata")
            .join(format!("{year}_mixvars.bin.gz"))
    }

    pub fn metadata_ids_path(&self, year: i32) -> Utf8PathBuf {
        self.year_dir(year)
            .join("indexdata")
            .join(format!("{year}_profids.csv.gz"))
    }

    pub fn lock_path(&self, year: i32) -> Utf8PathBuf {
        self.year_dir(year).join(".lock")
    }

    /// Where a raw product lives locally: `DATA/YYYY/YYYYMM/YYYYMMDD/<prodid>`.
    pub fn raw_product_path(&self, product: &ProductId) -> Utf8PathBuf {
        let date = &product.as_str()[..8];
        self.data_dir()
            .join(&date[..4])
            .join(&date[..6])
            .join(date)
            .join(product.as_str())
    }

    pub fn ensure_root(&self) -> Result<(), ArchiveError> {
        fs::create_dir_all(self.root.as_std_path()).map_err(fs_err)
    }

    pub fn variable(&self, year: i32, name: &str, kind: VariableKind) -> VariableStore {
        VariableStore::open_or_create(self, year, name, kind)
    }

    /// Names of the profile variables stored for `year`, sorted.
    pub fn profile_variables(&self, year: i32) -> Result<Vec<String>, ArchiveError> {
        let dir = self.year_dir(year).join(VariableKind::Profile.dir_name());
        if !dir.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let prefix = format!("{year}_");
        let suffix = format!("_{}.bin.gz", VariableKind::Profile.file_suffix());
        let mut names = Vec::new();
        for entry in fs::read_dir(dir.as_std_path()).map_err(fs_err)? {
            let entry = entry.map_err(fs_err)?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if let Some(name) = file_name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(&suffix))
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Concatenates one variable across several years, in the given order.
    pub fn read_years(
        &self,
        years: &[i32],
        name: &str,
        kind: VariableKind,
    ) -> Result<VariableData, ArchiveError> {
        if kind == VariableKind::Profile && name == PRESSURE {
            return Ok(VariableData::pressure());
        }
        let mut merged: Option<VariableData> = None;
        for &year in years {
            let data = self.variable(year, name, kind).read()?;
            match merged.as_mut() {
                None => merged = Some(data),
                Some(acc) => {
                    if !acc.values.extend_from(&data.values) {
                        return Err(ArchiveError::SchemaMismatch {
                            year,
                            detail: format!("{name} changes element type across years"),
                        });
                    }
                }
            }
        }
        merged.ok_or_else(|| ArchiveError::NotFound {
            year: 0,
            what: format!("{kind} variable {name} (no years requested)"),
        })
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), ArchiveError> {
        let parent = path
            .parent()
            .ok_or_else(|| ArchiveError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path()).map_err(fs_err)?;
        let mut temp = tempfile::Builder::new()
            .prefix(".mcs-archive")
            .tempfile_in(parent.as_std_path())
            .map_err(fs_err)?;
        temp.write_all(content).map_err(fs_err)?;
        temp.as_file().sync_all().map_err(fs_err)?;
        temp.persist(path.as_std_path()).map_err(fs_err)?;
        debug!(path = %path, bytes = content.len(), "wrote container");
        Ok(())
    }
}

/// Values of one variable for one year. Profile variables are laid out row
/// major with `width == 105`.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableData {
    pub values: Array,
    pub width: usize,
}

impl VariableData {
    pub fn pressure() -> Self {
        Self {
            values: Array::Float(pressure_grid()),
            width: LEVELS,
        }
    }

    pub fn rows(&self) -> usize {
        self.values.len() / self.width.max(1)
    }

    pub fn float_row(&self, index: usize) -> Option<&[f64]> {
        let values = self.values.as_float()?;
        values.get(index * self.width..(index + 1) * self.width)
    }
}

/// Handle on the container for one (year, variable) pair.
#[derive(Debug, Clone)]
pub struct VariableStore {
    year: i32,
    name: String,
    kind: VariableKind,
    path: Utf8PathBuf,
}

impl VariableStore {
    /// Never touches the disk; a store that was never written reads as
    /// `NotFound` and appends start fresh.
    pub fn open_or_create(archive: &Archive, year: i32, name: &str, kind: VariableKind) -> Self {
        Self {
            year,
            name: name.to_string(),
            kind,
            path: archive.variable_path(year, name, kind),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> VariableKind {
        self.kind
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn is_pressure(&self) -> bool {
        self.kind == VariableKind::Profile && self.name == PRESSURE
    }

    pub fn exists(&self) -> bool {
        self.is_pressure() || self.path.as_std_path().exists()
    }

    pub fn read(&self) -> Result<VariableData, ArchiveError> {
        if self.is_pressure() {
            return Ok(VariableData::pressure());
        }
        if !self.path.as_std_path().exists() {
            return Err(ArchiveError::NotFound {
                year: self.year,
                what: format!("{} variable {}", self.kind, self.name),
            });
        }
        let bytes = fs::read(self.path.as_std_path()).map_err(fs_err)?;
        let (values, width) = container::decode_array(&self.path, &bytes)?;
        let expected = self.kind.width();
        if width as usize != expected {
            return Err(ArchiveError::ShapeMismatch {
                year: self.year,
                detail: format!(
                    "{} stored with width {width}, expected {expected}",
                    self.name
                ),
            });
        }
        self.check_shape(&values)?;
        debug!(path = %self.path, len = values.len(), "loaded variable");
        Ok(VariableData {
            values,
            width: expected,
        })
    }

    /// Like [`read`](Self::read) but maps a never-written store to `None`.
    pub fn read_or_empty(&self) -> Result<Option<VariableData>, ArchiveError> {
        match self.read() {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Number of rows (profiles) currently stored; zero if never written.
    pub fn len(&self) -> Result<usize, ArchiveError> {
        Ok(self.read_or_empty()?.map(|data| data.rows()).unwrap_or(0))
    }

    pub fn is_empty(&self) -> Result<bool, ArchiveError> {
        Ok(self.len()? == 0)
    }

    /// Concatenates `values` onto whatever is stored, in arrival order.
    pub fn append(&self, values: &Array) -> Result<(), ArchiveError> {
        if values.is_empty() {
            return Ok(());
        }
        self.check_shape(values)?;
        let combined = match self.read_or_empty()? {
            None => values.clone(),
            Some(mut existing) => {
                if !existing.values.extend_from(values) {
                    return Err(ArchiveError::SchemaMismatch {
                        year: self.year,
                        detail: format!(
                            "cannot append {} values to {} variable {}",
                            values.dtype_name(),
                            existing.values.dtype_name(),
                            self.name
                        ),
                    });
                }
                existing.values
            }
        };
        self.overwrite(&combined)
    }

    /// Replaces the stored array wholesale.
    pub fn overwrite(&self, values: &Array) -> Result<(), ArchiveError> {
        if self.is_pressure() {
            return Err(ArchiveError::SchemaMismatch {
                year: self.year,
                detail: "pressure is derived from the level grid and is never stored".to_string(),
            });
        }
        self.check_shape(values)?;
        let bytes = container::encode_array(values, self.kind.width() as u32)?;
        Archive::write_bytes_atomic(&self.path, &bytes)
    }

    fn check_shape(&self, values: &Array) -> Result<(), ArchiveError> {
        let width = self.kind.width();
        if values.len() % width != 0 {
            return Err(ArchiveError::ShapeMismatch {
                year: self.year,
                detail: format!(
                    "{} has {} values, not a multiple of {width}",
                    self.name,
                    values.len()
                ),
            });
        }
        Ok(())
    }
}

/// Exclusive writer lock on one year of the archive. Released on drop.
#[derive(Debug)]
pub struct YearLock {
    #[allow(dead_code)]
    file: File,
    path: Utf8PathBuf,
}

impl YearLock {
    pub fn acquire(archive: &Archive, year: i32) -> Result<Self, ArchiveError> {
        let path = archive.lock_path(year);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path()).map_err(fs_err)?;
        }
        let file = File::create(path.as_std_path()).map_err(fs_err)?;
        if file.try_lock_exclusive().is_err() {
            return Err(ArchiveError::Locked { year, path });
        }
        debug!(path = %path, "acquired year lock");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl Drop for YearLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

pub(crate) fn walk_dir(root: &Path) -> Result<Vec<PathBuf>, ArchiveError> {
    let mut items = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries = fs::read_dir(&path).map_err(fs_err)?;
        for entry in entries {
            let entry = entry.map_err(fs_err)?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path.clone());
            }
            items.push(path);
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn temp_archive() -> (tempfile::TempDir, Archive) {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().join("archive")).unwrap();
        (temp, Archive::new(root))
    }

    #[test]
    fn layout_paths() {
        let archive = Archive::new(Utf8PathBuf::from("/data/mcs"));
        let path = archive.variable_path(2007, "temperature", VariableKind::Profile);
        assert!(path.ends_with("DATA/2007/profdata/2007_temperature_profiles.bin.gz"));
        let path = archive.variable_path(2007, "lat", VariableKind::Metadata);
        assert!(path.ends_with("DATA/2007/indexdata/2007_lat_index.bin.gz"));
        let product: ProductId = "2007010203_DDR.TAB".parse().unwrap();
        assert!(
            archive
                .raw_product_path(&product)
                .ends_with("DATA/2007/200701/20070102/2007010203_DDR.TAB")
        );
    }

    #[test]
    fn read_of_never_written_variable_is_not_found() {
        let (_temp, archive) = temp_archive();
        let store = archive.variable(2008, "dust", VariableKind::Profile);
        assert!(!store.exists());
        assert_matches!(store.read(), Err(ArchiveError::NotFound { year: 2008, .. }));
        assert_eq!(store.len().unwrap(), 0);
    }

    #[test]
    fn pressure_is_synthetic() {
        let (_temp, archive) = temp_archive();
        let data = archive.variable(2010, PRESSURE, VariableKind::Profile).read().unwrap();
        assert_eq!(data.rows(), 1);
        assert_eq!(data.width, LEVELS);
        assert!(!archive.year_dir(2010).as_std_path().exists());
    }

    #[test]
    fn append_concatenates_in_arrival_order() {
        let (_temp, archive) = temp_archive();
        let store = archive.variable(2009, "lat", VariableKind::Metadata);
        store.append(&Array::Float(vec![3.0, 1.0])).unwrap();
        store.append(&Array::Float(vec![2.0])).unwrap();
        assert_eq!(store.read().unwrap().values, Array::Float(vec![3.0, 1.0, 2.0]));
    }

    #[test]
    fn empty_append_leaves_file_untouched() {
        let (_temp, archive) = temp_archive();
        let store = archive.variable(2009, "lat", VariableKind::Metadata);
        store.append(&Array::Float(vec![1.0])).unwrap();
        let before = fs::read(store.path().as_std_path()).unwrap();
        store.append(&Array::Float(Vec::new())).unwrap();
        assert_eq!(fs::read(store.path().as_std_path()).unwrap(), before);

        let fresh = archive.variable(2009, "lon", VariableKind::Metadata);
        fresh.append(&Array::Float(Vec::new())).unwrap();
        assert!(!fresh.exists());
    }

    #[test]
    fn profile_data_must_fill_whole_rows() {
        let (_temp, archive) = temp_archive();
        let store = archive.variable(2011, "temperature", VariableKind::Profile);
        let err = store.append(&Array::Float(vec![150.0; LEVELS + 1])).unwrap_err();
        assert_matches!(err, ArchiveError::ShapeMismatch { year: 2011, .. });
        store.append(&Array::Float(vec![150.0; LEVELS * 2])).unwrap();
        let data = store.read().unwrap();
        assert_eq!(data.rows(), 2);
        assert_eq!(data.float_row(1).unwrap().len(), LEVELS);
    }

    #[test]
    fn append_rejects_type_change() {
        let (_temp, archive) = temp_archive();
        let store = archive.variable(2011, "profidint", VariableKind::Metadata);
        store.append(&Array::Int(vec![1])).unwrap();
        assert_matches!(
            store.append(&Array::Float(vec![1.0])),
            Err(ArchiveError::SchemaMismatch { .. })
        );
    }

    #[test]
    fn profile_variables_lists_stored_names() {
        let (_temp, archive) = temp_archive();
        for name in ["temperature", "dust"] {
            archive
                .variable(2012, name, VariableKind::Profile)
                .overwrite(&Array::Float(vec![0.0; LEVELS]))
                .unwrap();
        }
        archive
            .variable(2012, "lat", VariableKind::Metadata)
            .overwrite(&Array::Float(vec![0.0]))
            .unwrap();
        assert_eq!(archive.profile_variables(2012).unwrap(), vec!["dust", "temperature"]);
        assert!(archive.profile_variables(2013).unwrap().is_empty());
    }

    #[test]
    fn read_years_concatenates() {
        let (_temp, archive) = temp_archive();
        archive
            .variable(2006, "lat", VariableKind::Metadata)
            .overwrite(&Array::Float(vec![1.0]))
            .unwrap();
        archive
            .variable(2007, "lat", VariableKind::Metadata)
            .overwrite(&Array::Float(vec![2.0, 3.0]))
            .unwrap();
        let data = archive
            .read_years(&[2006, 2007], "lat", VariableKind::Metadata)
            .unwrap();
        assert_eq!(data.values, Array::Float(vec![1.0, 2.0, 3.0]));
    }

    #[test]
    fn year_lock_is_exclusive() {
        let (_temp, archive) = temp_archive();
        let lock = YearLock::acquire(&archive, 2014).unwrap();
        assert_matches!(
            YearLock::acquire(&archive, 2014),
            Err(ArchiveError::Locked { year: 2014, .. })
        );
        drop(lock);
        YearLock::acquire(&archive, 2014).unwrap();
    }
}
