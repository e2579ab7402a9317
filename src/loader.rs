// Loader - append a cleaned batch to sales_records
//
// Each batch is written inside its own transaction using multi-row INSERTs of
// at most `insert_batch_size` rows. A failed batch is rolled back as a whole;
// batches committed before it stay committed.

use crate::config::{INSERT_COLUMNS, MAX_INSERT_BATCH_SIZE};
use crate::error::{EtlError, Result};
use crate::schema::{Field, SalesRecord};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use tracing::debug;

/// Persists one transformed batch and reports rows written
pub trait BatchLoader {
    fn load(&mut self, batch_index: usize, records: &[SalesRecord]) -> Result<usize>;
}

pub struct SqliteLoader<'c> {
    conn: &'c Connection,
    insert_batch_size: usize,
}

impl<'c> SqliteLoader<'c> {
    /// `insert_batch_size` is clamped to what one statement can bind
    pub fn new(conn: &'c Connection, insert_batch_size: usize) -> Self {
        SqliteLoader {
            conn,
            insert_batch_size: insert_batch_size.clamp(1, MAX_INSERT_BATCH_SIZE),
        }
    }

    fn write(&self, records: &[SalesRecord]) -> rusqlite::Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut written = 0;

        for chunk in records.chunks(self.insert_batch_size) {
            let mut stmt = tx.prepare_cached(&insert_sql(chunk.len()))?;
            let values: Vec<Value> = chunk.iter().flat_map(record_values).collect();
            written += stmt.execute(params_from_iter(values.iter()))?;
        }

        tx.commit()?;
        Ok(written)
    }
}

impl BatchLoader for SqliteLoader<'_> {
    fn load(&mut self, batch_index: usize, records: &[SalesRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let written = self
            .write(records)
            .map_err(|source| EtlError::StoreWrite {
                batch_index,
                source,
            })?;

        debug!(batch_index, rows = written, "batch committed");
        Ok(written)
    }
}

/// `INSERT INTO sales_records (...) VALUES (?, ...), ...` for `rows` rows
fn insert_sql(rows: usize) -> String {
    let columns: Vec<&str> = Field::ALL.iter().map(|f| f.name()).collect();
    let placeholders = format!("({})", vec!["?"; columns.len()].join(", "));

    format!(
        "INSERT INTO sales_records ({}) VALUES {}",
        columns.join(", "),
        vec![placeholders.as_str(); rows].join(", ")
    )
}

/// Bound values in `Field::ALL` order
fn record_values(record: &SalesRecord) -> [Value; INSERT_COLUMNS] {
    Field::ALL.map(|field| match field {
        Field::OrderId => Value::Integer(record.order_id),
        Field::UnitsSold => Value::Integer(record.units_sold),
        other => Value::Text(record.field_text(other)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ensure_schema, verify_count};
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn record(order_id: i64) -> SalesRecord {
        SalesRecord {
            region: "Sub-Saharan Africa".to_string(),
            country: "Chad".to_string(),
            item_type: "Office Supplies".to_string(),
            sales_channel: "Online".to_string(),
            order_priority: "L".to_string(),
            order_date: NaiveDate::from_ymd_opt(2011, 1, 27).unwrap(),
            order_id,
            ship_date: NaiveDate::from_ymd_opt(2011, 2, 12).unwrap(),
            units_sold: 4484,
            unit_price: Decimal::from_str("651.21").unwrap(),
            unit_cost: Decimal::from_str("524.96").unwrap(),
            total_revenue: Decimal::from_str("2920025.64").unwrap(),
            total_cost: Decimal::from_str("2353920.64").unwrap(),
            total_profit: Decimal::from_str("566105.00").unwrap(),
        }
    }

    fn memory_store() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn test_load_writes_in_sub_batches() {
        let conn = memory_store();
        let records: Vec<SalesRecord> = (1..=7).map(record).collect();
        let mut loader = SqliteLoader::new(&conn, 3);

        let written = loader.load(0, &records).unwrap();

        assert_eq!(written, 7);
        assert_eq!(verify_count(&conn).unwrap(), 7);
    }

    #[test]
    fn test_persisted_values_and_inserted_at() {
        let conn = memory_store();
        SqliteLoader::new(&conn, 100).load(0, &[record(686800706)]).unwrap();

        let (order_id, order_date, unit_price, units, inserted_at): (i64, String, f64, i64, Option<String>) = conn
            .query_row(
                "SELECT order_id, order_date, unit_price, units_sold, inserted_at FROM sales_records",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .unwrap();

        assert_eq!(order_id, 686800706);
        assert_eq!(order_date, "2011-01-27");
        assert!((unit_price - 651.21).abs() < 1e-9);
        assert_eq!(units, 4484);
        assert!(inserted_at.is_some());
    }

    #[test]
    fn test_empty_batch_touches_nothing() {
        // No schema: any store interaction would fail
        let conn = Connection::open_in_memory().unwrap();
        let mut loader = SqliteLoader::new(&conn, 10);

        assert_eq!(loader.load(0, &[]).unwrap(), 0);
        assert!(loader.load(1, &[record(1)]).is_err());
    }

    #[test]
    fn test_rerun_appends_duplicates() {
        let conn = memory_store();
        let records: Vec<SalesRecord> = (1..=3).map(record).collect();
        let mut loader = SqliteLoader::new(&conn, 10);

        loader.load(0, &records).unwrap();
        loader.load(0, &records).unwrap();

        assert_eq!(verify_count(&conn).unwrap(), 6);
    }

    #[test]
    fn test_failed_batch_rolls_back_and_reports_store_write() {
        let conn = memory_store();
        conn.execute_batch(
            "CREATE TRIGGER reject_order BEFORE INSERT ON sales_records
             WHEN NEW.order_id = 5
             BEGIN SELECT RAISE(ABORT, 'rejected order'); END;",
        )
        .unwrap();
        let mut loader = SqliteLoader::new(&conn, 2);

        assert_eq!(loader.load(0, &[record(1), record(2)]).unwrap(), 2);
        let result = loader.load(1, &(3..=6).map(record).collect::<Vec<_>>());

        match result {
            Err(EtlError::StoreWrite { batch_index, .. }) => assert_eq!(batch_index, 1),
            other => panic!("expected StoreWrite, got {:?}", other),
        }
        // Rows 3 and 4 were in an earlier sub-batch of the failed batch
        assert_eq!(verify_count(&conn).unwrap(), 2);
    }

    #[test]
    fn test_oversized_insert_batch_is_clamped() {
        let conn = memory_store();
        let mut loader = SqliteLoader::new(&conn, 1_000_000);
        assert_eq!(loader.insert_batch_size, MAX_INSERT_BATCH_SIZE);
        assert_eq!(SqliteLoader::new(&conn, 0).insert_batch_size, 1);

        // One unclamped statement would need more than 32766 parameters
        let records: Vec<SalesRecord> = (1..=2_400).map(record).collect();
        let written = loader.load(0, &records).unwrap();

        assert_eq!(written, 2_400);
        assert_eq!(verify_count(&conn).unwrap(), 2_400);
    }

    #[test]
    fn test_money_values_read_back_exactly() {
        let conn = memory_store();
        let original = record(1);
        SqliteLoader::new(&conn, 10).load(0, &[original.clone()]).unwrap();

        let texts: Vec<String> = conn
            .query_row(
                "SELECT CAST(unit_price AS TEXT), CAST(unit_cost AS TEXT),
                        CAST(total_revenue AS TEXT), CAST(total_cost AS TEXT),
                        CAST(total_profit AS TEXT)
                 FROM sales_records",
                [],
                |row| (0..5).map(|i| row.get(i)).collect(),
            )
            .unwrap();
        let read_back: Vec<Decimal> = texts.iter().map(|t| Decimal::from_str(t).unwrap()).collect();

        assert_eq!(
            read_back,
            vec![
                original.unit_price,
                original.unit_cost,
                original.total_revenue,
                original.total_cost,
                original.total_profit,
            ]
        );
    }

    #[test]
    fn test_insert_sql_shape() {
        let sql = insert_sql(2);

        assert!(sql.starts_with("INSERT INTO sales_records (region, country, item_type"));
        assert_eq!(sql.matches('?').count(), 28);
    }
}
