// Transformer - normalize, coerce, repair, deduplicate and validate one batch
//
// Steps run in a fixed order because later steps depend on earlier repairs:
//   1. column normalization   (source header -> canonical field)
//   2. type coercion          (invalid -> null)
//   3. missing-value repair   (defaults + negative order_id synthesis)
//   4. deduplication          (first occurrence of an order_id wins)
//   5. validation / repair    (drop null ids and negative units, fix ship dates)
//
// Pure with respect to the batch: no I/O, deterministic for a given input.

use crate::error::{EtlError, Result};
use crate::reader::{RawBatch, RawRecord};
use crate::schema::{default_date, Field, SalesRecord, UNKNOWN};
use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use tracing::debug;

/// Cell values treated as missing, in addition to the empty string
const NULL_TOKENS: &[&str] = &[
    "NA", "N/A", "n/a", "NULL", "null", "NaN", "nan", "-nan", "None", "<NA>", "#N/A",
];

// ============================================================================
// DIAGNOSTICS
// ============================================================================

/// Per-batch counts of every repair, removal and drop
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformReport {
    pub rows_in: usize,
    pub malformed_rows: usize,
    pub invalid_dates: usize,
    pub invalid_numbers: usize,
    pub categorical_filled: usize,
    pub numeric_filled: usize,
    pub dates_filled: usize,
    pub ids_synthesized: usize,
    pub duplicates_removed: usize,
    pub missing_id_dropped: usize,
    pub negative_units_dropped: usize,
    pub ship_dates_repaired: usize,
    pub rows_out: usize,
}

impl TransformReport {
    pub fn rows_dropped(&self) -> usize {
        self.missing_id_dropped + self.negative_units_dropped
    }

    pub fn summary(&self) -> String {
        format!(
            "{} in, {} out | {} duplicates, {} dropped, {} ship dates repaired, {} ids synthesized",
            self.rows_in,
            self.rows_out,
            self.duplicates_removed,
            self.rows_dropped(),
            self.ship_dates_repaired,
            self.ids_synthesized
        )
    }
}

#[derive(Debug, Clone)]
pub struct TransformedBatch {
    pub index: usize,
    pub records: Vec<SalesRecord>,
    pub report: TransformReport,
}

// ============================================================================
// STEP 1: COLUMN NORMALIZATION
// ============================================================================

/// Position of each canonical field in the batch headers
#[derive(Debug, Clone, PartialEq, Eq)]
struct ColumnMap {
    positions: [Option<usize>; 14],
}

impl ColumnMap {
    fn resolve(headers: &[String]) -> Result<Self> {
        let mut positions = [None; 14];

        for (index, header) in headers.iter().enumerate() {
            if let Some(field) = Field::from_header(header) {
                let slot = &mut positions[field as usize];
                // Duplicate headers: first one wins
                if slot.is_none() {
                    *slot = Some(index);
                }
            }
        }

        if positions.iter().all(Option::is_none) {
            return Err(EtlError::MissingColumns {
                headers: headers.to_vec(),
            });
        }

        Ok(ColumnMap { positions })
    }

    fn position(&self, field: Field) -> Option<usize> {
        self.positions[field as usize]
    }

    fn missing(&self) -> Vec<&'static str> {
        Field::ALL
            .iter()
            .filter(|f| self.position(**f).is_none())
            .map(|f| f.name())
            .collect()
    }
}

// ============================================================================
// STAGED ROW (nullable until validation)
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
struct StagedRow {
    region: Option<String>,
    country: Option<String>,
    item_type: Option<String>,
    sales_channel: Option<String>,
    order_priority: Option<String>,
    order_date: Option<NaiveDate>,
    order_id: Option<i64>,
    ship_date: Option<NaiveDate>,
    units_sold: Option<i64>,
    unit_price: Option<Decimal>,
    unit_cost: Option<Decimal>,
    total_revenue: Option<Decimal>,
    total_cost: Option<Decimal>,
    total_profit: Option<Decimal>,
}

impl StagedRow {
    /// None if any field is still null
    fn into_record(self) -> Option<SalesRecord> {
        Some(SalesRecord {
            region: self.region?,
            country: self.country?,
            item_type: self.item_type?,
            sales_channel: self.sales_channel?,
            order_priority: self.order_priority?,
            order_date: self.order_date?,
            order_id: self.order_id?,
            ship_date: self.ship_date?,
            units_sold: self.units_sold?,
            unit_price: self.unit_price?,
            unit_cost: self.unit_cost?,
            total_revenue: self.total_revenue?,
            total_cost: self.total_cost?,
            total_profit: self.total_profit?,
        })
    }
}

// ============================================================================
// TRANSFORMER
// ============================================================================

pub struct Transformer {
    /// Accepted date layouts, tried in order
    date_formats: Vec<&'static str>,
}

impl Default for Transformer {
    fn default() -> Self {
        Self::new()
    }
}

impl Transformer {
    pub fn new() -> Self {
        Transformer {
            date_formats: vec!["%m/%d/%Y", "%Y-%m-%d"],
        }
    }

    /// Transform one raw batch. The only error is a header with no
    /// recognised columns; every row-level problem is repaired and counted.
    pub fn transform(&self, batch: RawBatch) -> Result<TransformedBatch> {
        let columns = ColumnMap::resolve(&batch.headers)?;
        let missing = columns.missing();
        if !missing.is_empty() {
            debug!(batch_index = batch.index, missing = ?missing, "columns absent, defaults apply");
        }

        let mut report = TransformReport {
            rows_in: batch.records.len(),
            malformed_rows: batch.malformed_rows,
            ..TransformReport::default()
        };

        // Step 2
        let mut rows: Vec<StagedRow> = batch
            .records
            .into_iter()
            .map(|record| self.coerce(&columns, record, &mut report))
            .collect();

        // Step 3
        repair_missing(&mut rows, &mut report);

        // Step 4
        report.duplicates_removed = deduplicate(&mut rows);

        // Step 5
        let records = validate(rows, &mut report);
        report.rows_out = records.len();

        debug!(batch_index = batch.index, "{}", report.summary());

        Ok(TransformedBatch {
            index: batch.index,
            records,
            report,
        })
    }

    fn coerce(&self, columns: &ColumnMap, record: RawRecord, report: &mut TransformReport) -> StagedRow {
        let mut values = record.into_values();
        let mut take = |field: Field| -> Option<String> {
            let value = std::mem::take(values.get_mut(columns.position(field)?)?);
            if is_null(&value) {
                None
            } else {
                Some(value)
            }
        };

        StagedRow {
            region: take(Field::Region),
            country: take(Field::Country),
            item_type: take(Field::ItemType),
            sales_channel: take(Field::SalesChannel),
            order_priority: take(Field::OrderPriority),
            order_date: self.coerce_date(take(Field::OrderDate), report),
            order_id: coerce_integer(take(Field::OrderId), report),
            ship_date: self.coerce_date(take(Field::ShipDate), report),
            units_sold: coerce_integer(take(Field::UnitsSold), report),
            unit_price: coerce_decimal(take(Field::UnitPrice), report),
            unit_cost: coerce_decimal(take(Field::UnitCost), report),
            total_revenue: coerce_decimal(take(Field::TotalRevenue), report),
            total_cost: coerce_decimal(take(Field::TotalCost), report),
            total_profit: coerce_decimal(take(Field::TotalProfit), report),
        }
    }

    fn coerce_date(&self, raw: Option<String>, report: &mut TransformReport) -> Option<NaiveDate> {
        let raw = raw?;
        let parsed = self.parse_date(&raw);
        if parsed.is_none() {
            report.invalid_dates += 1;
        }
        parsed
    }

    /// Parse a calendar date; a trailing time component is ignored
    pub fn parse_date(&self, value: &str) -> Option<NaiveDate> {
        let date_part = value.trim().split(|c: char| c == ' ' || c == 'T').next()?;
        self.date_formats
            .iter()
            .find_map(|format| NaiveDate::parse_from_str(date_part, format).ok())
    }
}

fn is_null(value: &str) -> bool {
    value.is_empty() || NULL_TOKENS.contains(&value)
}

fn coerce_integer(raw: Option<String>, report: &mut TransformReport) -> Option<i64> {
    let raw = raw?;
    let parsed = parse_integer(&raw);
    if parsed.is_none() {
        report.invalid_numbers += 1;
    }
    parsed
}

fn coerce_decimal(raw: Option<String>, report: &mut TransformReport) -> Option<Decimal> {
    let raw = raw?;
    let parsed = parse_decimal(&raw);
    if parsed.is_none() {
        report.invalid_numbers += 1;
    }
    parsed
}

pub fn parse_decimal(value: &str) -> Option<Decimal> {
    let value = value.trim();
    Decimal::from_str(value)
        .or_else(|_| Decimal::from_scientific(value))
        .ok()
}

/// Integers, or decimals with no fractional part ("10.0")
pub fn parse_integer(value: &str) -> Option<i64> {
    let value = value.trim();
    if let Ok(n) = value.parse::<i64>() {
        return Some(n);
    }
    let decimal = parse_decimal(value)?;
    if decimal.fract().is_zero() {
        decimal.to_i64()
    } else {
        None
    }
}

// ============================================================================
// STEP 3: MISSING-VALUE REPAIR
// ============================================================================

fn repair_missing(rows: &mut [StagedRow], report: &mut TransformReport) {
    let default_day = default_date();

    for row in rows.iter_mut() {
        for slot in [
            &mut row.region,
            &mut row.country,
            &mut row.item_type,
            &mut row.sales_channel,
            &mut row.order_priority,
        ] {
            if slot.is_none() {
                *slot = Some(UNKNOWN.to_string());
                report.categorical_filled += 1;
            }
        }

        if row.units_sold.is_none() {
            row.units_sold = Some(0);
            report.numeric_filled += 1;
        }
        for slot in [
            &mut row.unit_price,
            &mut row.unit_cost,
            &mut row.total_revenue,
            &mut row.total_cost,
            &mut row.total_profit,
        ] {
            if slot.is_none() {
                *slot = Some(Decimal::ZERO);
                report.numeric_filled += 1;
            }
        }

        for slot in [&mut row.order_date, &mut row.ship_date] {
            if slot.is_none() {
                *slot = Some(default_day);
                report.dates_filled += 1;
            }
        }
    }

    report.ids_synthesized = synthesize_order_ids(rows);
}

/// Assign negative ids to rows missing order_id, in row order.
///
/// The first synthesized id is strictly below min(-1, max_id - 1), and also
/// below every existing id. Ids already present in the batch are never
/// handed out, even once the walk runs past `i64::MIN`.
/// Returns the number of ids assigned.
fn synthesize_order_ids(rows: &mut [StagedRow]) -> usize {
    let mut taken: HashSet<i64> = rows.iter().filter_map(|r| r.order_id).collect();
    let ceiling = taken
        .iter()
        .fold(-1_i64, |ceiling, &id| ceiling.min(id.saturating_sub(1)));

    let mut cursor = ceiling.checked_sub(1);
    let mut synthesized = 0;
    for row in rows.iter_mut().filter(|r| r.order_id.is_none()) {
        let id = next_free_id(&mut cursor, &taken);
        taken.insert(id);
        row.order_id = Some(id);
        synthesized += 1;
    }
    synthesized
}

/// Next id at or below the cursor that is not taken. Below `i64::MIN` the
/// walk restarts at -2 and fills gaps between existing negative ids.
fn next_free_id(cursor: &mut Option<i64>, taken: &HashSet<i64>) -> i64 {
    loop {
        let id = cursor.unwrap_or(-2);
        *cursor = id.checked_sub(1);
        if !taken.contains(&id) {
            return id;
        }
    }
}

// ============================================================================
// STEP 4: DEDUPLICATION
// ============================================================================

/// Keep the first row per order_id; returns how many rows were removed
fn deduplicate(rows: &mut Vec<StagedRow>) -> usize {
    let before = rows.len();
    let mut seen = HashSet::with_capacity(before);
    rows.retain(|row| match row.order_id {
        Some(id) => seen.insert(id),
        None => true,
    });
    before - rows.len()
}

// ============================================================================
// STEP 5: VALIDATION / REPAIR
// ============================================================================

fn validate(rows: Vec<StagedRow>, report: &mut TransformReport) -> Vec<SalesRecord> {
    let mut records = Vec::with_capacity(rows.len());

    for mut row in rows {
        if row.order_id.is_none() {
            report.missing_id_dropped += 1;
            continue;
        }

        if row.units_sold.map_or(false, |units| units < 0) {
            report.negative_units_dropped += 1;
            continue;
        }

        if let (Some(order_date), Some(ship_date)) = (row.order_date, row.ship_date) {
            if ship_date < order_date {
                row.ship_date = Some(order_date);
                report.ship_dates_repaired += 1;
            }
        }

        // Only order_id can still be null after repair
        match row.into_record() {
            Some(record) => {
                debug_assert!(record.is_consistent(), "inconsistent record {}", record.order_id);
                records.push(record)
            }
            None => report.missing_id_dropped += 1,
        }
    }

    records
}
