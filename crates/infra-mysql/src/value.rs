// Value binding and row decoding

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use migra_core::domain::{ResultSet, SqlValue};
use sqlx::mysql::{MySql, MySqlArguments, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, Row, TypeInfo, ValueRef};

pub(crate) type MySqlQuery<'q> = Query<'q, MySql, MySqlArguments>;

/// Build a prepared query with every argument bound in order
pub(crate) fn bind_all<'q>(statement: &'q str, args: &'q [SqlValue]) -> MySqlQuery<'q> {
    args.iter()
        .fold(sqlx::query(statement), |query, value| bind_value(query, value))
}

fn bind_value<'q>(query: MySqlQuery<'q>, value: &'q SqlValue) -> MySqlQuery<'q> {
    match value {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Int(v) => query.bind(*v),
        SqlValue::UInt(v) => query.bind(*v),
        SqlValue::Float(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.as_str()),
        SqlValue::Bytes(v) => query.bind(v.as_slice()),
    }
}

/// Decode fully fetched rows
pub(crate) fn decode_rows(rows: &[MySqlRow]) -> Result<ResultSet, sqlx::Error> {
    let columns = match rows.first() {
        Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
        None => Vec::new(),
    };

    let mut decoded = Vec::with_capacity(rows.len());
    for row in rows {
        let values = (0..row.len())
            .map(|idx| decode_column(row, idx))
            .collect::<Result<Vec<_>, _>>()?;
        decoded.push(values);
    }
    Ok(ResultSet::new(columns, decoded))
}

fn decode_column(row: &MySqlRow, idx: usize) -> Result<SqlValue, sqlx::Error> {
    let type_name = {
        let raw = row.try_get_raw(idx)?;
        if raw.is_null() {
            return Ok(SqlValue::Null);
        }
        raw.type_info().name().to_ascii_uppercase()
    };

    let value = match type_name.as_str() {
        "BOOLEAN" | "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
            SqlValue::Int(row.try_get_unchecked::<i64, _>(idx)?)
        }
        name if name.ends_with("UNSIGNED") => SqlValue::UInt(row.try_get_unchecked::<u64, _>(idx)?),
        "FLOAT" => SqlValue::Float(f64::from(row.try_get_unchecked::<f32, _>(idx)?)),
        "DOUBLE" => SqlValue::Float(row.try_get_unchecked::<f64, _>(idx)?),
        "DATE" => SqlValue::Text(row.try_get::<NaiveDate, _>(idx)?.to_string()),
        "DATETIME" | "TIMESTAMP" => SqlValue::Text(
            row.try_get::<NaiveDateTime, _>(idx)?
                .format("%Y-%m-%d %H:%M:%S%.f")
                .to_string(),
        ),
        "TIME" => SqlValue::Text(row.try_get::<NaiveTime, _>(idx)?.to_string()),
        "BINARY" | "VARBINARY" | "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT"
        | "GEOMETRY" => SqlValue::Bytes(row.try_get_unchecked::<Vec<u8>, _>(idx)?),
        // DECIMAL, character types, JSON, ENUM, SET
        _ => match row.try_get_unchecked::<String, _>(idx) {
            Ok(text) => SqlValue::Text(text),
            Err(_) => SqlValue::Bytes(row.try_get_unchecked::<Vec<u8>, _>(idx)?),
        },
    };
    Ok(value)
}
