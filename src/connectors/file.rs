use super::{FileFormat, FileSource};
use crate::dataset::TabularDataset;
use crate::error::{ReconError, Result};
use polars::prelude::*;
use std::fs::File;

const INFER_SCHEMA_ROWS: usize = 1000;

/// Read a local file into a dataset using polars.
pub fn load_file(source: &FileSource) -> Result<TabularDataset> {
    let format = source.resolved_format()?;
    let path = &source.path;
    if !path.exists() {
        return Err(ReconError::Load(format!("File not found: {}", path.display())));
    }

    let frame = match format {
        FileFormat::Csv => LazyCsvReader::new(path)
            .with_has_header(true)
            .with_infer_schema_length(Some(INFER_SCHEMA_ROWS))
            .finish()?
            .collect()?,
        FileFormat::Parquet => {
            LazyFrame::scan_parquet(path, ScanArgsParquet::default())?.collect()?
        }
        FileFormat::Ndjson => LazyJsonLineReader::new(path).finish()?.collect()?,
        FileFormat::Json => {
            let file = File::open(path)?;
            JsonReader::new(file).finish()?
        }
    };

    TabularDataset::new(frame)
        .select(&source.columns)
        .map_err(|e| ReconError::Load(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::ColumnType;
    use std::io::Write;

    fn write_temp(suffix: &str, body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_csv_with_column_subset() {
        let file = write_temp(".csv", "emp_id,salary,city\n1,100.0,Pune\n2,200.5,Oslo\n");
        let source = FileSource {
            path: file.path().to_path_buf(),
            format: None,
            columns: vec!["emp_id".to_string(), "salary".to_string()],
        };
        let dataset = load_file(&source).unwrap();
        assert_eq!(dataset.height(), 2);
        assert_eq!(dataset.column_names(), vec!["emp_id", "salary"]);
        assert_eq!(dataset.classify_columns()["salary"], ColumnType::Numeric);
    }

    #[test]
    fn test_load_json_array_with_lists() {
        let file = write_temp(
            ".json",
            r#"[{"id": 1, "tags": ["x", "y"]}, {"id": 2, "tags": ["z"]}]"#,
        );
        let source = FileSource {
            path: file.path().to_path_buf(),
            format: None,
            columns: vec![],
        };
        let dataset = load_file(&source).unwrap();
        let types = dataset.classify_columns();
        assert_eq!(types["id"], ColumnType::Numeric);
        assert_eq!(types["tags"], ColumnType::Array);
    }

    #[test]
    fn test_load_ndjson() {
        let file = write_temp(".jsonl", "{\"id\": 1, \"name\": \"a\"}\n{\"id\": 2, \"name\": \"b\"}\n");
        let source = FileSource {
            path: file.path().to_path_buf(),
            format: None,
            columns: vec![],
        };
        let dataset = load_file(&source).unwrap();
        assert_eq!(dataset.height(), 2);
        assert_eq!(dataset.classify_columns()["name"], ColumnType::String);
    }

    #[test]
    fn test_missing_file_is_load_error() {
        let source = FileSource {
            path: "/definitely/not/here.csv".into(),
            format: None,
            columns: vec![],
        };
        assert!(matches!(load_file(&source), Err(ReconError::Load(_))));
    }

    #[test]
    fn test_unknown_column_is_load_error() {
        let file = write_temp(".csv", "a,b\n1,2\n");
        let source = FileSource {
            path: file.path().to_path_buf(),
            format: Some(FileFormat::Csv),
            columns: vec!["nope".to_string()],
        };
        assert!(matches!(load_file(&source), Err(ReconError::Load(_))));
    }
}
