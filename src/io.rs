//! Delimited-text dataset reader used by the command-line caller.
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use csv::StringRecord;
use ndarray::{Array1, Array2};

/// A feature matrix with encoded class labels.
#[derive(Debug)]
pub struct Dataset {
    pub x: Array2<f64>,
    pub y: Array1<usize>,
    pub feature_names: Vec<String>,
    /// Original label text for each class id.
    pub class_names: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DatasetReaderConfig {
    /// Column holding the class label.
    pub target_column: String,
    pub delimiter: u8,
    /// Feature columns to load, in order. `None` loads every other column.
    pub feature_columns: Option<Vec<String>>,
    /// Columns to skip when auto-selecting features.
    pub ignore_columns: Vec<String>,
}

impl Default for DatasetReaderConfig {
    fn default() -> Self {
        Self {
            target_column: "target".to_string(),
            delimiter: b',',
            feature_columns: None,
            ignore_columns: vec!["id".to_string()],
        }
    }
}

/// Read a comma-separated dataset with the default configuration.
pub fn read_dataset<P: AsRef<Path>>(path: P) -> Result<Dataset> {
    read_dataset_with_config(path, &DatasetReaderConfig::default())
}

/// Read a delimited dataset.
///
/// Labels that are all non-negative integers are used as class ids directly.
/// Any other labels are encoded in sorted order, so `"no"/"yes"` become `0/1`.
pub fn read_dataset_with_config<P: AsRef<Path>>(path: P, config: &DatasetReaderConfig) -> Result<Dataset> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(config.delimiter)
        .has_headers(true)
        .from_path(&path)
        .with_context(|| format!("Failed to open dataset: {}", path.as_ref().display()))?;

    let headers = reader
        .headers()
        .context("Failed to read dataset header row")?
        .clone();

    let target_idx = find_column(&headers, &config.target_column)
        .ok_or_else(|| anyhow!("Missing target column '{}'", config.target_column))?;
    let feature_indices = resolve_feature_indices(&headers, config, target_idx)?;
    if feature_indices.is_empty() {
        return Err(anyhow!("No feature columns detected in dataset header"));
    }

    let mut features = Vec::new();
    let mut raw_labels = Vec::new();
    for (row_idx, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Failed to read row {}", row_idx + 1))?;

        let label = record
            .get(target_idx)
            .ok_or_else(|| anyhow!("Missing label value at row {}", row_idx + 1))?
            .trim();
        if label.is_empty() {
            return Err(anyhow!("Empty label at row {}", row_idx + 1));
        }
        raw_labels.push(label.to_string());

        for &idx in &feature_indices {
            let value = record
                .get(idx)
                .ok_or_else(|| anyhow!("Missing feature value at row {}", row_idx + 1))?;
            let parsed = value.trim().parse::<f64>().with_context(|| {
                format!(
                    "Invalid feature '{}' at row {}",
                    headers.get(idx).unwrap_or(""),
                    row_idx + 1
                )
            })?;
            features.push(parsed);
        }
    }

    let (y, class_names) = encode_labels(&raw_labels);
    let x = Array2::from_shape_vec((raw_labels.len(), feature_indices.len()), features)
        .context("Failed to build feature matrix")?;
    let feature_names = feature_indices
        .iter()
        .map(|&idx| headers.get(idx).unwrap_or("").to_string())
        .collect();

    log::info!(
        "Loaded {} rows, {} features, {} classes from {}",
        x.nrows(),
        x.ncols(),
        class_names.len(),
        path.as_ref().display()
    );
    Ok(Dataset {
        x,
        y,
        feature_names,
        class_names,
    })
}

fn encode_labels(raw: &[String]) -> (Array1<usize>, Vec<String>) {
    let numeric: Option<Vec<usize>> = raw.iter().map(|s| s.parse::<usize>().ok()).collect();
    if let Some(ids) = numeric {
        let max = ids.iter().copied().max().unwrap_or(0);
        let names = if ids.is_empty() {
            Vec::new()
        } else {
            (0..=max).map(|c| c.to_string()).collect()
        };
        return (Array1::from_vec(ids), names);
    }

    let classes: BTreeSet<&str> = raw.iter().map(String::as_str).collect();
    let ids: BTreeMap<&str, usize> = classes.iter().enumerate().map(|(i, &c)| (c, i)).collect();
    let y = raw.iter().map(|s| ids[s.as_str()]).collect();
    (y, classes.into_iter().map(str::to_string).collect())
}

fn find_column(headers: &StringRecord, name: &str) -> Option<usize> {
    headers
        .iter()
        .position(|header| header.trim().eq_ignore_ascii_case(name))
}

fn resolve_feature_indices(
    headers: &StringRecord,
    config: &DatasetReaderConfig,
    target_idx: usize,
) -> Result<Vec<usize>> {
    if let Some(names) = &config.feature_columns {
        let mut indices = Vec::with_capacity(names.len());
        for name in names {
            let idx = find_column(headers, name).ok_or_else(|| anyhow!("Missing feature column '{}'", name))?;
            indices.push(idx);
        }
        return Ok(indices);
    }

    let ignore: HashSet<String> = config
        .ignore_columns
        .iter()
        .map(|name| name.to_ascii_lowercase())
        .collect();

    Ok(headers
        .iter()
        .enumerate()
        .filter(|&(idx, header)| idx != target_idx && !ignore.contains(&header.trim().to_ascii_lowercase()))
        .map(|(idx, _)| idx)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn reads_numeric_labels_and_skips_ignored_columns() {
        let file = write_temp("id,a,b,target\n1,0.5,2,0\n2,1.5,3,1\n3,2.5,4,1\n");
        let data = read_dataset(file.path()).unwrap();
        assert_eq!(data.x.dim(), (3, 2));
        assert_eq!(data.feature_names, vec!["a", "b"]);
        assert_eq!(data.y.to_vec(), vec![0, 1, 1]);
        assert_eq!(data.x[(1, 0)], 1.5);
    }

    #[test]
    fn text_labels_are_encoded_in_sorted_order() {
        let file = write_temp("x,Outcome\n1,yes\n2,no\n3,yes\n");
        let config = DatasetReaderConfig {
            target_column: "outcome".to_string(),
            ..Default::default()
        };
        let data = read_dataset_with_config(file.path(), &config).unwrap();
        assert_eq!(data.class_names, vec!["no", "yes"]);
        assert_eq!(data.y.to_vec(), vec![1, 0, 1]);
    }

    #[test]
    fn bad_feature_value_reports_row() {
        let file = write_temp("a,target\n1,0\nabc,1\n");
        let err = read_dataset(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("row 2"));
    }

    #[test]
    fn missing_target_column_is_an_error() {
        let file = write_temp("a,b\n1,2\n");
        assert!(read_dataset(file.path()).is_err());
    }
}
