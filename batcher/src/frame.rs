// Polars helpers: pulling typed columns out of a DataFrame and reading
// datasets or card tables from disk through polars' own readers.

use std::fs::File;
use std::path::Path;

use polars::prelude::*;
use tracing::debug;

use crate::error::{BatchError, Result};
use crate::types::{is_basic_land, CardMatrix};

/// True if the frame has a column with this name.
pub fn has_column(df: &DataFrame, name: &str) -> bool {
    df.schema().iter_fields().any(|f| f.name().as_str() == name)
}

fn cast_column(df: &DataFrame, name: &str, dtype: &DataType) -> Result<polars::prelude::Column> {
    let col = df
        .column(name)
        .map_err(|_| BatchError::MissingColumn(name.to_string()))?;
    Ok(col.cast(dtype)?)
}

/// Column values as f32 (nulls become 0).
pub fn f32_values(df: &DataFrame, name: &str) -> Result<Vec<f32>> {
    let casted = cast_column(df, name, &DataType::Float32)?;
    let ca = casted.f32()?;
    Ok(ca.into_iter().map(|v| v.unwrap_or(0.0)).collect())
}

/// Column values as i64 (nulls become 0).
pub fn i64_values(df: &DataFrame, name: &str) -> Result<Vec<i64>> {
    let casted = cast_column(df, name, &DataType::Int64)?;
    let ca = casted.i64()?;
    Ok(ca.into_iter().map(|v| v.unwrap_or(0)).collect())
}

/// Column values rendered as strings (nulls become empty strings).
///
/// Used for ids, so integer and string id columns behave the same.
pub fn str_values(df: &DataFrame, name: &str) -> Result<Vec<String>> {
    let casted = cast_column(df, name, &DataType::String)?;
    let ca = casted.str()?;
    Ok(ca
        .into_iter()
        .map(|v| v.unwrap_or_default().to_string())
        .collect())
}

/// Names of the `<prefix>_<card>` columns, in frame order.
///
/// With `exclude_basics`, columns whose card part is a basic land are skipped.
pub fn card_columns(df: &DataFrame, prefix: &str, exclude_basics: bool) -> Vec<String> {
    let head = format!("{}_", prefix);
    df.schema()
        .iter_fields()
        .map(|f| f.name().to_string())
        .filter(|name| match name.strip_prefix(&head) {
            Some(card) => !(exclude_basics && is_basic_land(card)),
            None => false,
        })
        .collect()
}

/// Names of the `<prefix>_<basic land>` columns, in frame order.
pub fn basic_columns(df: &DataFrame, prefix: &str) -> Vec<String> {
    let head = format!("{}_", prefix);
    df.schema()
        .iter_fields()
        .map(|f| f.name().to_string())
        .filter(|name| name.strip_prefix(&head).is_some_and(is_basic_land))
        .collect()
}

/// Gather the named columns into a dense row-major matrix.
pub fn card_matrix(df: &DataFrame, prefix: &str, columns: &[String]) -> Result<CardMatrix> {
    let rows = df.height();
    let cols = columns.len();
    let mut data = vec![0.0f32; rows * cols];

    for (c, name) in columns.iter().enumerate() {
        for (r, v) in f32_values(df, name)?.into_iter().enumerate() {
            data[r * cols + c] = v;
        }
    }

    let head_len = prefix.len() + 1;
    let cards = columns.iter().map(|n| n[head_len..].to_string()).collect();
    Ok(CardMatrix { cards, rows, data })
}

/// Select rows by position, in the given order.
pub fn take_rows(df: &DataFrame, rows: &[usize]) -> Result<DataFrame> {
    let idx: Vec<IdxSize> = rows.iter().map(|&r| r as IdxSize).collect();
    let idx = IdxCa::from_vec("rows".into(), idx);
    Ok(df.take(&idx)?)
}

/// Read a dataset or card table. The reader is chosen by file extension.
pub fn read_frame(path: &Path) -> Result<DataFrame> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    let df = match ext.as_deref() {
        Some("parquet") => {
            let file = File::open(path)?;
            ParquetReader::new(file).finish()?
        }
        Some("csv") => CsvReadOptions::default()
            .with_has_header(true)
            .try_into_reader_with_file_path(Some(path.to_path_buf()))?
            .finish()?,
        _ => return Err(BatchError::UnsupportedInput(path.display().to_string())),
    };

    debug!(
        "Read {:?}: {} rows, {} columns",
        path,
        df.height(),
        df.width()
    );
    Ok(df)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> DataFrame {
        df!(
            "draft_id" => [7i64, 7, 9],
            "pool_plains" => [1i64, 0, 0],
            "pool_opt" => [0i64, 2, 1],
            "pool_island_fish" => [3i64, 0, 1],
            "pack_card_opt" => [1.0f32, 0.0, 0.0]
        )
        .unwrap()
    }

    #[test]
    fn test_card_columns_excludes_exact_basics() {
        let df = frame();
        assert_eq!(
            card_columns(&df, "pool", true),
            vec!["pool_opt".to_string(), "pool_island_fish".to_string()]
        );
        assert_eq!(card_columns(&df, "pool", false).len(), 3);
        assert_eq!(basic_columns(&df, "pool"), vec!["pool_plains".to_string()]);
        assert!(card_columns(&df, "deck", true).is_empty());
    }

    #[test]
    fn test_card_matrix_row_major() {
        let df = frame();
        let cols = card_columns(&df, "pool", true);
        let m = card_matrix(&df, "pool", &cols).unwrap();
        assert_eq!(m.rows, 3);
        assert_eq!(m.cards, vec!["opt".to_string(), "island_fish".to_string()]);
        assert_eq!(m.data, vec![0.0, 3.0, 2.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_ids_as_strings() {
        let df = frame();
        assert_eq!(str_values(&df, "draft_id").unwrap(), vec!["7", "7", "9"]);
        assert!(matches!(
            str_values(&df, "nope"),
            Err(BatchError::MissingColumn(_))
        ));
    }

    #[test]
    fn test_take_rows() {
        let df = frame();
        let sub = take_rows(&df, &[2, 0]).unwrap();
        assert_eq!(i64_values(&sub, "draft_id").unwrap(), vec![9, 7]);
    }

    #[test]
    fn test_unsupported_extension() {
        assert!(matches!(
            read_frame(Path::new("cards.json")),
            Err(BatchError::UnsupportedInput(_))
        ));
    }
}
