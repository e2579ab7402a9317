// Record Schema - canonical shape of a sales record after transformation
// Every other module keys off Field; column names live here and nowhere else.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Default for missing categorical values
pub const UNKNOWN: &str = "Unknown";

/// Default for missing or unparseable dates (1900-01-01)
pub fn default_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1900, 1, 1).unwrap_or(NaiveDate::MIN)
}

// ============================================================================
// FIELDS
// ============================================================================

/// Canonical fields in table column order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Region,
    Country,
    ItemType,
    SalesChannel,
    OrderPriority,
    OrderDate,
    OrderId,
    ShipDate,
    UnitsSold,
    UnitPrice,
    UnitCost,
    TotalRevenue,
    TotalCost,
    TotalProfit,
}

impl Field {
    pub const ALL: [Field; 14] = [
        Field::Region,
        Field::Country,
        Field::ItemType,
        Field::SalesChannel,
        Field::OrderPriority,
        Field::OrderDate,
        Field::OrderId,
        Field::ShipDate,
        Field::UnitsSold,
        Field::UnitPrice,
        Field::UnitCost,
        Field::TotalRevenue,
        Field::TotalCost,
        Field::TotalProfit,
    ];

    /// Canonical (column) name
    pub fn name(&self) -> &'static str {
        match self {
            Field::Region => "region",
            Field::Country => "country",
            Field::ItemType => "item_type",
            Field::SalesChannel => "sales_channel",
            Field::OrderPriority => "order_priority",
            Field::OrderDate => "order_date",
            Field::OrderId => "order_id",
            Field::ShipDate => "ship_date",
            Field::UnitsSold => "units_sold",
            Field::UnitPrice => "unit_price",
            Field::UnitCost => "unit_cost",
            Field::TotalRevenue => "total_revenue",
            Field::TotalCost => "total_cost",
            Field::TotalProfit => "total_profit",
        }
    }

    /// Header as it appears in the sales export
    pub fn source_header(&self) -> &'static str {
        match self {
            Field::Region => "Region",
            Field::Country => "Country",
            Field::ItemType => "Item Type",
            Field::SalesChannel => "Sales Channel",
            Field::OrderPriority => "Order Priority",
            Field::OrderDate => "Order Date",
            Field::OrderId => "Order ID",
            Field::ShipDate => "Ship Date",
            Field::UnitsSold => "Units Sold",
            Field::UnitPrice => "Unit Price",
            Field::UnitCost => "Unit Cost",
            Field::TotalRevenue => "Total Revenue",
            Field::TotalCost => "Total Cost",
            Field::TotalProfit => "Total Profit",
        }
    }

    /// Map a source header to its canonical field.
    /// Matches the export header or the canonical name, ignoring ASCII case
    /// and surrounding whitespace. Unmapped headers return None.
    pub fn from_header(header: &str) -> Option<Field> {
        let header = header.trim().trim_start_matches('\u{feff}');
        Field::ALL.iter().copied().find(|field| {
            header.eq_ignore_ascii_case(field.source_header())
                || header.eq_ignore_ascii_case(field.name())
        })
    }
}

// ============================================================================
// SALES RECORD
// ============================================================================

/// Canonical sales record handed to the loader.
/// `inserted_at` is assigned by the store and is not part of this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesRecord {
    pub region: String,
    pub country: String,
    pub item_type: String,
    pub sales_channel: String,
    pub order_priority: String,
    pub order_date: NaiveDate,
    pub order_id: i64,
    pub ship_date: NaiveDate,
    pub units_sold: i64,
    pub unit_price: Decimal,
    pub unit_cost: Decimal,
    pub total_revenue: Decimal,
    pub total_cost: Decimal,
    pub total_profit: Decimal,
}

impl SalesRecord {
    /// Field value rendered as text, in the form the transformer accepts back
    pub fn field_text(&self, field: Field) -> String {
        match field {
            Field::Region => self.region.clone(),
            Field::Country => self.country.clone(),
            Field::ItemType => self.item_type.clone(),
            Field::SalesChannel => self.sales_channel.clone(),
            Field::OrderPriority => self.order_priority.clone(),
            Field::OrderDate => self.order_date.format("%Y-%m-%d").to_string(),
            Field::OrderId => self.order_id.to_string(),
            Field::ShipDate => self.ship_date.format("%Y-%m-%d").to_string(),
            Field::UnitsSold => self.units_sold.to_string(),
            Field::UnitPrice => self.unit_price.to_string(),
            Field::UnitCost => self.unit_cost.to_string(),
            Field::TotalRevenue => self.total_revenue.to_string(),
            Field::TotalCost => self.total_cost.to_string(),
            Field::TotalProfit => self.total_profit.to_string(),
        }
    }

    /// Batch invariants: ship date never precedes order date, units non-negative
    pub fn is_consistent(&self) -> bool {
        self.units_sold >= 0 && self.ship_date >= self.order_date
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_mapping_accepts_export_and_canonical_names() {
        assert_eq!(Field::from_header("Order ID"), Some(Field::OrderId));
        assert_eq!(Field::from_header("  order id "), Some(Field::OrderId));
        assert_eq!(Field::from_header("order_id"), Some(Field::OrderId));
        assert_eq!(Field::from_header("\u{feff}Region"), Some(Field::Region));
        assert_eq!(Field::from_header("Discount"), None);
    }

    #[test]
    fn test_every_field_round_trips_through_its_names() {
        for field in Field::ALL {
            assert_eq!(Field::from_header(field.source_header()), Some(field));
            assert_eq!(Field::from_header(field.name()), Some(field));
        }
    }

    #[test]
    fn test_default_date_is_1900() {
        assert_eq!(default_date().to_string(), "1900-01-01");
    }

    #[test]
    fn test_is_consistent_checks_units_and_ship_date() {
        let day = NaiveDate::from_ymd_opt(2020, 2, 1).unwrap();
        let mut record = SalesRecord {
            region: UNKNOWN.to_string(),
            country: UNKNOWN.to_string(),
            item_type: UNKNOWN.to_string(),
            sales_channel: UNKNOWN.to_string(),
            order_priority: UNKNOWN.to_string(),
            order_date: day,
            order_id: 1,
            ship_date: day,
            units_sold: 0,
            unit_price: Decimal::ZERO,
            unit_cost: Decimal::ZERO,
            total_revenue: Decimal::ZERO,
            total_cost: Decimal::ZERO,
            total_profit: Decimal::ZERO,
        };
        assert!(record.is_consistent());

        record.ship_date = default_date();
        assert!(!record.is_consistent());

        record.ship_date = day;
        record.units_sold = -1;
        assert!(!record.is_consistent());
    }
}
