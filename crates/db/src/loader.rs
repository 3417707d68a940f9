//! Loads the supply-chain CSV export into the `supply_chain` table.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use csv::ReaderBuilder;
use sqlx::{Postgres, QueryBuilder};
use thiserror::Error;
use tracing::info;

use supplyq_core::policy::SUPPLY_CHAIN_TABLE;

use crate::DbPool;

const MAX_BIND_PARAMS: usize = 65_535;
const MAX_ROWS_PER_INSERT: usize = 1_000;

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("could not read dataset `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse dataset: {0}")]
    Csv(#[from] csv::Error),
    #[error("dataset has no header row")]
    MissingHeaders,
    #[error("invalid reader role `{0}`")]
    InvalidRole(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnType {
    BigInt,
    Double,
    Text,
}

impl ColumnType {
    pub fn sql_type(&self) -> &'static str {
        match self {
            Self::BigInt => "BIGINT",
            Self::Double => "DOUBLE PRECISION",
            Self::Text => "TEXT",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CsvDataset {
    pub columns: Vec<String>,
    pub types: Vec<ColumnType>,
    pub records: Vec<Vec<String>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadSummary {
    pub table: String,
    pub columns: usize,
    pub rows: usize,
    pub granted_to: Option<String>,
}

/// UTF-8 when valid, otherwise Latin-1 (every byte maps to the same code point).
pub fn decode_bytes(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.trim_start_matches('\u{feff}').to_string(),
        Err(_) => bytes.iter().map(|byte| char::from(*byte)).collect(),
    }
}

pub fn sanitize_header(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|ch| !matches!(ch, '(' | ')'))
        .map(|ch| match ch {
            ' ' | '/' | '-' => '_',
            other => other.to_ascii_lowercase(),
        })
        .filter(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
        .collect()
}

pub fn infer_column_type<'a>(values: impl IntoIterator<Item = &'a str>) -> ColumnType {
    let mut inferred = None;
    for value in values.into_iter().map(str::trim).filter(|value| !value.is_empty()) {
        let current = if value.parse::<i64>().is_ok() {
            ColumnType::BigInt
        } else if value.parse::<f64>().is_ok() {
            ColumnType::Double
        } else {
            return ColumnType::Text;
        };
        inferred = match (inferred, current) {
            (Some(ColumnType::Double), _) | (_, ColumnType::Double) => Some(ColumnType::Double),
            _ => Some(ColumnType::BigInt),
        };
    }
    inferred.unwrap_or(ColumnType::Text)
}

pub fn parse_dataset(bytes: &[u8]) -> Result<CsvDataset, LoaderError> {
    let text = decode_bytes(bytes);
    let mut reader =
        ReaderBuilder::new().has_headers(true).flexible(true).from_reader(text.as_bytes());

    let headers = reader.headers()?.iter().map(sanitize_header).collect::<Vec<_>>();
    if headers.is_empty() || headers.iter().all(String::is_empty) {
        return Err(LoaderError::MissingHeaders);
    }
    let columns = dedupe_columns(headers);

    let mut records = Vec::new();
    for result in reader.records() {
        let record = result?;
        records.push(
            (0..columns.len())
                .map(|index| record.get(index).unwrap_or("").to_string())
                .collect::<Vec<_>>(),
        );
    }

    let types = (0..columns.len())
        .map(|index| infer_column_type(records.iter().map(|record| record[index].as_str())))
        .collect();

    Ok(CsvDataset { columns, types, records })
}

pub fn read_dataset(path: &Path) -> Result<CsvDataset, LoaderError> {
    let bytes = fs::read(path)
        .map_err(|source| LoaderError::ReadFile { path: path.to_path_buf(), source })?;
    parse_dataset(&bytes)
}

/// Replaces `supply_chain` with the dataset in one transaction.
pub async fn load_supply_chain(
    pool: &DbPool,
    dataset: &CsvDataset,
    reader_role: Option<&str>,
) -> Result<LoadSummary, LoaderError> {
    if let Some(role) = reader_role {
        if !role.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_') || role.is_empty() {
            return Err(LoaderError::InvalidRole(role.to_string()));
        }
    }

    let mut tx = pool.begin().await?;

    sqlx::query(&format!("DROP TABLE IF EXISTS {SUPPLY_CHAIN_TABLE}")).execute(&mut *tx).await?;
    sqlx::query(&create_table_sql(dataset)).execute(&mut *tx).await?;

    let per_insert =
        (MAX_BIND_PARAMS / dataset.columns.len().max(1)).clamp(1, MAX_ROWS_PER_INSERT);
    let insert_prefix = format!("INSERT INTO {SUPPLY_CHAIN_TABLE} ({}) ", column_list(dataset));
    for chunk in dataset.records.chunks(per_insert) {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(insert_prefix.as_str());
        builder.push_values(chunk, |mut row, record| {
            for (value, column_type) in record.iter().zip(&dataset.types) {
                let value = value.trim();
                match column_type {
                    ColumnType::BigInt => {
                        row.push_bind(value.parse::<i64>().ok());
                    }
                    ColumnType::Double => {
                        row.push_bind(value.parse::<f64>().ok());
                    }
                    ColumnType::Text => {
                        row.push_bind((!value.is_empty()).then(|| value.to_string()));
                    }
                }
            }
        });
        builder.build().execute(&mut *tx).await?;
    }

    if let Some(role) = reader_role {
        sqlx::query(&format!("GRANT SELECT ON {SUPPLY_CHAIN_TABLE} TO \"{role}\""))
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    info!(
        event_name = "system.loader.completed",
        table = SUPPLY_CHAIN_TABLE,
        rows = dataset.records.len(),
        columns = dataset.columns.len(),
        "dataset loaded"
    );

    Ok(LoadSummary {
        table: SUPPLY_CHAIN_TABLE.to_string(),
        columns: dataset.columns.len(),
        rows: dataset.records.len(),
        granted_to: reader_role.map(ToString::to_string),
    })
}

pub fn create_table_sql(dataset: &CsvDataset) -> String {
    let columns = dataset
        .columns
        .iter()
        .zip(&dataset.types)
        .map(|(name, column_type)| format!("\"{name}\" {}", column_type.sql_type()))
        .collect::<Vec<_>>();
    format!("CREATE TABLE {SUPPLY_CHAIN_TABLE} ({})", columns.join(", "))
}

fn column_list(dataset: &CsvDataset) -> String {
    dataset.columns.iter().map(|name| format!("\"{name}\"")).collect::<Vec<_>>().join(", ")
}

fn dedupe_columns(headers: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    headers
        .into_iter()
        .enumerate()
        .map(|(index, header)| {
            let base = if header.is_empty() { format!("column_{}", index + 1) } else { header };
            let mut candidate = base.clone();
            let mut suffix = 2;
            while !seen.insert(candidate.clone()) {
                candidate = format!("{base}_{suffix}");
                suffix += 1;
            }
            candidate
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::{
        create_table_sql, decode_bytes, infer_column_type, parse_dataset, read_dataset,
        sanitize_header, ColumnType,
    };

    #[test]
    fn headers_are_sanitized_like_the_dataco_export() {
        assert_eq!(sanitize_header("Order Item Quantity"), "order_item_quantity");
        assert_eq!(sanitize_header("order date (DateOrders)"), "order_date_dateorders");
        assert_eq!(sanitize_header("Days for shipping (real)"), "days_for_shipping_real");
        assert_eq!(sanitize_header("Order Item Profit/Ratio"), "order_item_profit_ratio");
        assert_eq!(sanitize_header("Late-delivery-risk"), "late_delivery_risk");
    }

    #[test]
    fn latin1_bytes_are_decoded_without_loss() {
        assert_eq!(decode_bytes(b"Sao Paulo"), "Sao Paulo");
        assert_eq!(decode_bytes(&[b'S', 0xE3, b'o']), "S\u{e3}o");
        assert_eq!(decode_bytes("\u{feff}a,b".as_bytes()), "a,b");
    }

    #[test]
    fn column_types_widen_from_integer_to_text() {
        assert_eq!(infer_column_type(["1", "2", ""]), ColumnType::BigInt);
        assert_eq!(infer_column_type(["1", "2.5"]), ColumnType::Double);
        assert_eq!(infer_column_type(["2.5", "7"]), ColumnType::Double);
        assert_eq!(infer_column_type(["1", "Standard Class"]), ColumnType::Text);
        assert_eq!(infer_column_type(["", " "]), ColumnType::Text);
    }

    #[test]
    fn dataset_parses_and_renders_create_table() {
        let dataset = parse_dataset(
            b"Order Id,Sales,Order Country,Order Country\n1,10.5,India,x\n2,,Mexico,y\n",
        )
        .expect("dataset parses");

        assert_eq!(
            dataset.columns,
            vec!["order_id", "sales", "order_country", "order_country_2"]
        );
        assert_eq!(
            dataset.types,
            vec![ColumnType::BigInt, ColumnType::Double, ColumnType::Text, ColumnType::Text]
        );
        assert_eq!(dataset.records.len(), 2);
        assert_eq!(
            create_table_sql(&dataset),
            "CREATE TABLE supply_chain (\"order_id\" BIGINT, \"sales\" DOUBLE PRECISION, \
             \"order_country\" TEXT, \"order_country_2\" TEXT)"
        );
    }

    #[test]
    fn short_records_are_padded() -> Result<(), String> {
        let dir = TempDir::new().map_err(|error| error.to_string())?;
        let path = dir.path().join("dataco.csv");
        fs::write(&path, "Type,Sales\nDEBIT\n").map_err(|error| error.to_string())?;

        let dataset = read_dataset(&path).map_err(|error| error.to_string())?;
        assert_eq!(dataset.records, vec![vec!["DEBIT".to_string(), String::new()]]);
        Ok(())
    }
}
