//! University dataset: loading, column normalization, derived costs and the
//! per-file manifest.

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

mod record;

pub use record::{RawUniversity, University, ACADEMIC_MONTHS};
use record::{parse_num, parse_text};

pub const COL_NAME: &str = "school.name";
pub const COL_CITY: &str = "school.city";
pub const COL_STATE: &str = "school.state";
pub const COL_LATITUDE: &str = "latitude";
pub const COL_LONGITUDE: &str = "longitude";
pub const COL_TUITION: &str = "latest.cost.tuition.out_of_state";
pub const COL_MONTHLY_COST: &str = "avg_monthly_cost_usd";
pub const COL_ENROLLMENT: &str = "latest.student.size";
pub const COL_PROGRAM: &str = "latest.programs.cip_4_digit";

pub const REQUIRED_COLUMNS: [&str; 9] = [
    COL_NAME,
    COL_CITY,
    COL_STATE,
    COL_LATITUDE,
    COL_LONGITUDE,
    COL_TUITION,
    COL_MONTHLY_COST,
    COL_ENROLLMENT,
    COL_PROGRAM,
];

pub const BUDGET_MIN: u64 = 10_000;
pub const BUDGET_DEFAULT: u64 = 40_000;
pub const BUDGET_STEP: u64 = 1_000;

/// Trim, lower-case and replace spaces with underscores.
pub fn normalize_column(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "_")
}

/// Immutable in-memory table of universities.
#[derive(Debug)]
pub struct Dataset {
    path: PathBuf,
    columns: Vec<String>,
    records: Vec<University>,
    skipped_rows: u64,
}

/// Values that seed the filter form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterBounds {
    pub states: Vec<String>,
    pub size_min: u64,
    pub size_max: u64,
    pub budget_min: u64,
    pub budget_max: u64,
    pub budget_default: u64,
    pub budget_step: u64,
}

impl Dataset {
    /// Table built from records already in memory.
    pub fn from_records(records: Vec<University>) -> Self {
        Self {
            path: PathBuf::new(),
            columns: REQUIRED_COLUMNS.iter().map(|c| c.to_string()).collect(),
            records,
            skipped_rows: 0,
        }
    }

    pub fn records(&self) -> &[University] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn skipped_rows(&self) -> u64 {
        self.skipped_rows
    }

    /// Manifest of the file this table was loaded from. Counts come from the
    /// loaded records; only the hash rereads the file.
    pub fn manifest(&self, now_ts: u64) -> Result<DatasetManifest> {
        let counts = Completeness::of(&self.records);
        Ok(DatasetManifest {
            path: self.path.display().to_string(),
            hash_sha256: file_sha256(&self.path)?,
            row_count: self.records.len() as u64,
            skipped_rows: self.skipped_rows,
            columns: self.columns.clone(),
            missing_columns: Vec::new(),
            rows_missing_coordinates: counts.missing_coordinates,
            rows_missing_name: counts.missing_name,
            rows_missing_total_cost: counts.missing_total_cost,
            generated_at_epoch: now_ts,
        })
    }

    pub fn filter_bounds(&self) -> FilterBounds {
        let states: BTreeSet<&str> = self
            .records
            .iter()
            .filter_map(|r| r.state.as_deref())
            .collect();

        let sizes = self.records.iter().filter_map(|r| r.enrollment);
        let (size_min, size_max) = sizes.fold(None, |acc: Option<(f64, f64)>, s| match acc {
            None => Some((s, s)),
            Some((lo, hi)) => Some((lo.min(s), hi.max(s))),
        })
        .unwrap_or((0.0, 0.0));

        let budget_max = self
            .records
            .iter()
            .filter_map(|r| r.total_estimated_cost())
            .fold(None, |acc: Option<f64>, c| Some(acc.map_or(c, |m| m.max(c))))
            .map(|m| m.max(0.0) as u64)
            .unwrap_or(BUDGET_MIN)
            .max(BUDGET_MIN);

        FilterBounds {
            states: states.into_iter().map(str::to_string).collect(),
            size_min: size_min.max(0.0) as u64,
            size_max: size_max.max(0.0) as u64,
            budget_min: BUDGET_MIN,
            budget_max,
            budget_default: BUDGET_DEFAULT.clamp(BUDGET_MIN, budget_max),
            budget_step: BUDGET_STEP,
        }
    }
}

struct ColumnIndex {
    name: usize,
    city: usize,
    state: usize,
    latitude: usize,
    longitude: usize,
    tuition: usize,
    monthly_cost: usize,
    enrollment: usize,
    program: usize,
}

impl ColumnIndex {
    fn resolve(columns: &[String]) -> std::result::Result<Self, Vec<&'static str>> {
        let missing: Vec<&'static str> = REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|req| !columns.iter().any(|c| c.as_str() == *req))
            .collect();
        if !missing.is_empty() {
            return Err(missing);
        }
        let at = |name: &str| columns.iter().position(|c| c == name).unwrap_or(0);
        Ok(Self {
            name: at(COL_NAME),
            city: at(COL_CITY),
            state: at(COL_STATE),
            latitude: at(COL_LATITUDE),
            longitude: at(COL_LONGITUDE),
            tuition: at(COL_TUITION),
            monthly_cost: at(COL_MONTHLY_COST),
            enrollment: at(COL_ENROLLMENT),
            program: at(COL_PROGRAM),
        })
    }

    fn read(&self, row: &csv::StringRecord) -> University {
        University::from(RawUniversity {
            name: parse_text(row.get(self.name)),
            city: parse_text(row.get(self.city)),
            state: parse_text(row.get(self.state)),
            latitude: parse_num(row.get(self.latitude)),
            longitude: parse_num(row.get(self.longitude)),
            tuition_out_of_state: parse_num(row.get(self.tuition)),
            avg_monthly_cost: parse_num(row.get(self.monthly_cost)),
            program_code: parse_text(row.get(self.program)),
            enrollment: parse_num(row.get(self.enrollment)),
        })
    }
}

struct ParsedCsv {
    columns: Vec<String>,
    missing: Vec<&'static str>,
    records: Vec<University>,
    row_count: u64,
    skipped_rows: u64,
}

fn parse_csv(path: &Path) -> Result<ParsedCsv> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("cannot open dataset {}", path.display()))?;
    let columns: Vec<String> = reader
        .headers()
        .with_context(|| format!("cannot read header of {}", path.display()))?
        .iter()
        .map(normalize_column)
        .collect();

    let index = ColumnIndex::resolve(&columns);
    let missing = match &index {
        Ok(_) => Vec::new(),
        Err(missing) => missing.clone(),
    };

    let mut records = Vec::new();
    let mut row_count = 0u64;
    let mut skipped_rows = 0u64;
    for row in reader.records() {
        match row {
            Ok(row) => {
                row_count += 1;
                if let Ok(index) = &index {
                    records.push(index.read(&row));
                }
            }
            Err(_) => skipped_rows += 1,
        }
    }

    Ok(ParsedCsv {
        columns,
        missing,
        records,
        row_count,
        skipped_rows,
    })
}

/// Read and normalize the dataset. Missing file or required columns is fatal.
pub fn load_dataset(path: &Path) -> Result<Dataset> {
    let parsed = parse_csv(path)?;
    if !parsed.missing.is_empty() {
        bail!(
            "{}: missing required columns: {}",
            path.display(),
            parsed.missing.join(", ")
        );
    }
    Ok(Dataset {
        path: path.to_path_buf(),
        columns: parsed.columns,
        records: parsed.records,
        skipped_rows: parsed.skipped_rows,
    })
}

static DATASET_CACHE: OnceLock<Mutex<HashMap<PathBuf, Arc<Dataset>>>> = OnceLock::new();

/// Load once per path for the lifetime of the process.
pub fn load_cached(path: &Path) -> Result<Arc<Dataset>> {
    let cache = DATASET_CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    let mut cache = cache.lock().map_err(|_| anyhow!("dataset cache poisoned"))?;
    if let Some(dataset) = cache.get(path) {
        return Ok(Arc::clone(dataset));
    }
    let dataset = Arc::new(load_dataset(path)?);
    cache.insert(path.to_path_buf(), Arc::clone(&dataset));
    Ok(dataset)
}

// =============================================================================
// Manifest
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetManifest {
    pub path: String,
    pub hash_sha256: String,
    pub row_count: u64,
    pub skipped_rows: u64,
    pub columns: Vec<String>,
    pub missing_columns: Vec<String>,
    pub rows_missing_coordinates: u64,
    pub rows_missing_name: u64,
    pub rows_missing_total_cost: u64,
    pub generated_at_epoch: u64,
}

impl DatasetManifest {
    pub fn schema_ok(&self) -> bool {
        self.missing_columns.is_empty()
    }
}

struct Completeness {
    missing_coordinates: u64,
    missing_name: u64,
    missing_total_cost: u64,
}

impl Completeness {
    fn of(records: &[University]) -> Self {
        let count = |pred: fn(&University) -> bool| records.iter().filter(|r| pred(r)).count() as u64;
        Self {
            missing_coordinates: count(|r| r.coordinates().is_none()),
            missing_name: count(|r| r.name.is_none()),
            missing_total_cost: count(|r| r.total_estimated_cost().is_none()),
        }
    }
}

/// Manifest straight from a file, including one whose schema is incomplete.
pub fn analyze_csv(path: &Path, now_ts: u64) -> Result<DatasetManifest> {
    let hash = file_sha256(path)?;
    let parsed = parse_csv(path)?;
    let counts = Completeness::of(&parsed.records);

    Ok(DatasetManifest {
        path: path.display().to_string(),
        hash_sha256: hash,
        row_count: parsed.row_count,
        skipped_rows: parsed.skipped_rows,
        missing_columns: parsed.missing.iter().map(|c| c.to_string()).collect(),
        rows_missing_coordinates: counts.missing_coordinates,
        rows_missing_name: counts.missing_name,
        rows_missing_total_cost: counts.missing_total_cost,
        columns: parsed.columns,
        generated_at_epoch: now_ts,
    })
}

pub fn file_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn default_manifest_path(dataset_path: &Path) -> PathBuf {
    let mut p = dataset_path.to_path_buf();
    let fname = dataset_path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("dataset.csv");
    p.set_file_name(format!("{}.manifest.json", fname));
    p
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uni(state: &str, size: f64, tuition: f64, monthly: f64) -> University {
        University::from(RawUniversity {
            name: Some(format!("{} U", state)),
            state: Some(state.to_string()),
            enrollment: Some(size),
            tuition_out_of_state: Some(tuition),
            avg_monthly_cost: Some(monthly),
            ..Default::default()
        })
    }

    #[test]
    fn normalize_trims_lowercases_and_underscores() {
        assert_eq!(normalize_column("  School Name "), "school_name");
        assert_eq!(normalize_column("Latest.Student.Size"), "latest.student.size");
        assert_eq!(normalize_column("avg monthly cost usd"), "avg_monthly_cost_usd");
    }

    #[test]
    fn bounds_cover_sorted_states_and_extremes() {
        let ds = Dataset::from_records(vec![
            uni("NY", 5_000.0, 40_000.0, 2_000.0),
            uni("CA", 800.0, 20_000.0, 1_000.0),
            uni("CA", 30_000.0, 30_000.0, 1_200.0),
        ]);
        let b = ds.filter_bounds();
        assert_eq!(b.states, vec!["CA".to_string(), "NY".to_string()]);
        assert_eq!((b.size_min, b.size_max), (800, 30_000));
        assert_eq!(b.budget_max, 58_000);
        assert_eq!(b.budget_default, BUDGET_DEFAULT);
    }

    #[test]
    fn budget_bounds_never_invert() {
        let ds = Dataset::from_records(vec![uni("CA", 10.0, 1_000.0, 100.0)]);
        let b = ds.filter_bounds();
        assert_eq!(b.budget_max, BUDGET_MIN);
        assert_eq!(b.budget_default, BUDGET_MIN);
    }

    #[test]
    fn manifest_path_sits_next_to_dataset() {
        let p = default_manifest_path(Path::new("data/unis.csv"));
        assert_eq!(p, PathBuf::from("data/unis.csv.manifest.json"));
    }
}
