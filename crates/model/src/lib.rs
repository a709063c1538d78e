//! Core domain model for RFM customer segmentation.
//!
//! This crate defines the fundamental types used throughout the system:
//! - `Order` / `OrderItem`: typed order history consumed by the engine
//! - `OrderRecord` / `OrderItemRecord`: raw rows as exported to CSV
//! - `Customer`, `Product`, `CategoryTranslation`, `Payment`, `Review`: the
//!   other Olist tables used by descriptive insights
//! - `CustomerRfm`: one scored and classified customer
//! - `Segment`, `Level`, `CustomerCategory`: the derived labels
//! - `RfmError`: the error taxonomy shared by every stage

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Broad class of an [`RfmError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Empty or degenerate input
    Input,
    /// Malformed or missing field
    Data,
    /// Inconsistent derived value
    Computation,
}

/// One of the three RFM dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Recency,
    Frequency,
    Monetary,
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Recency => "recency",
            Self::Frequency => "frequency",
            Self::Monetary => "monetary",
        };
        f.write_str(name)
    }
}

/// Errors raised while preparing or segmenting order data.
///
/// Any error aborts the whole computation; no partial output is produced.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RfmError {
    #[error("no orders supplied")]
    EmptyOrders,

    #[error("no order matched any order item")]
    EmptyJoin,

    #[error("{dimension} quantile edges are not unique: {edges:?}")]
    DegenerateBins { dimension: Dimension, edges: Vec<f64> },

    #[error("frequency bounds must be positive and strictly increasing: {edges:?}")]
    InvalidFrequencyEdges { edges: Vec<u32> },

    #[error("{entity} is missing required field `{field}`")]
    MissingField {
        entity: &'static str,
        field: &'static str,
    },

    #[error("invalid timestamp in `{field}`: {value:?}")]
    InvalidTimestamp { field: &'static str, value: String },

    #[error("invalid number in `{field}`: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("order {order_id} has an invalid item price {price}")]
    InvalidPrice { order_id: String, price: f64 },

    #[error("order {order_id} appears more than once")]
    DuplicateOrder { order_id: String },

    #[error("customer {customer_id} purchased after the reference date ({days} days)")]
    NegativeRecency { customer_id: String, days: i64 },
}

impl RfmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyOrders
            | Self::EmptyJoin
            | Self::DegenerateBins { .. }
            | Self::InvalidFrequencyEdges { .. } => ErrorKind::Input,
            Self::MissingField { .. }
            | Self::InvalidTimestamp { .. }
            | Self::InvalidNumber { .. }
            | Self::InvalidPrice { .. }
            | Self::DuplicateOrder { .. } => ErrorKind::Data,
            Self::NegativeRecency { .. } => ErrorKind::Computation,
        }
    }
}

/// A customer order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Unique order identifier
    pub order_id: String,

    /// Customer who placed the order
    pub customer_id: String,

    /// When the order was placed
    pub purchase_timestamp: NaiveDateTime,

    /// Order status (delivered, shipped, canceled, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<NaiveDateTime>,

    /// Handed to the carrier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_carrier_date: Option<NaiveDateTime>,

    /// Received by the customer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_customer_date: Option<NaiveDateTime>,

    /// Delivery date promised at purchase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_delivery_date: Option<NaiveDateTime>,
}

impl Order {
    /// Create a minimal order for testing.
    pub fn new(
        order_id: impl Into<String>,
        customer_id: impl Into<String>,
        purchase_timestamp: NaiveDateTime,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            customer_id: customer_id.into(),
            purchase_timestamp,
            status: None,
            approved_at: None,
            delivered_carrier_date: None,
            delivered_customer_date: None,
            estimated_delivery_date: None,
        }
    }

    pub fn with_delivery(
        mut self,
        delivered: Option<NaiveDateTime>,
        estimated: Option<NaiveDateTime>,
    ) -> Self {
        self.delivered_customer_date = delivered;
        self.estimated_delivery_date = estimated;
        self
    }

    pub fn purchase_date(&self) -> NaiveDate {
        self.purchase_timestamp.date()
    }

    /// Whether the order reached the customer after the promised date.
    ///
    /// `None` when either date is unknown.
    pub fn is_late(&self) -> Option<bool> {
        match (self.delivered_customer_date, self.estimated_delivery_date) {
            (Some(delivered), Some(estimated)) => Some(delivered > estimated),
            _ => None,
        }
    }
}

/// A single line item of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    /// Order this line belongs to
    pub order_id: String,

    /// Line number within the order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_item_id: Option<u32>,

    pub product_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seller_id: Option<String>,

    /// Unit price of the item
    pub price: f64,

    #[serde(default)]
    pub freight_value: f64,
}

impl OrderItem {
    /// Create a minimal item for testing.
    pub fn new(order_id: impl Into<String>, product_id: impl Into<String>, price: f64) -> Self {
        Self {
            order_id: order_id.into(),
            order_item_id: None,
            product_id: product_id.into(),
            seller_id: None,
            price,
            freight_value: 0.0,
        }
    }
}

/// Raw order row as found in the orders CSV export.
///
/// Every column defaults to blank so that a missing column surfaces as a
/// `MissingField` error on conversion rather than a parse failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderRecord {
    #[serde(default)]
    pub order_id: String,
    #[serde(default)]
    pub customer_id: String,
    #[serde(default)]
    pub order_status: String,
    #[serde(default)]
    pub order_purchase_timestamp: String,
    #[serde(default)]
    pub order_approved_at: String,
    #[serde(default)]
    pub order_delivered_carrier_date: String,
    #[serde(default)]
    pub order_delivered_customer_date: String,
    #[serde(default)]
    pub order_estimated_delivery_date: String,
}

impl TryFrom<OrderRecord> for Order {
    type Error = RfmError;

    fn try_from(record: OrderRecord) -> Result<Self, Self::Error> {
        let order_id = required("order", "order_id", record.order_id)?;
        let customer_id = required("order", "customer_id", record.customer_id)?;
        let purchase = required(
            "order",
            "order_purchase_timestamp",
            record.order_purchase_timestamp,
        )?;

        Ok(Self {
            order_id,
            customer_id,
            purchase_timestamp: parse_timestamp("order_purchase_timestamp", &purchase)?,
            status: non_blank(record.order_status),
            approved_at: optional_timestamp("order_approved_at", &record.order_approved_at)?,
            delivered_carrier_date: optional_timestamp(
                "order_delivered_carrier_date",
                &record.order_delivered_carrier_date,
            )?,
            delivered_customer_date: optional_timestamp(
                "order_delivered_customer_date",
                &record.order_delivered_customer_date,
            )?,
            estimated_delivery_date: optional_timestamp(
                "order_estimated_delivery_date",
                &record.order_estimated_delivery_date,
            )?,
        })
    }
}

/// Raw order item row as found in the order items CSV export.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderItemRecord {
    #[serde(default)]
    pub order_id: String,
    #[serde(default)]
    pub order_item_id: String,
    #[serde(default)]
    pub product_id: String,
    #[serde(default)]
    pub seller_id: String,
    #[serde(default)]
    pub shipping_limit_date: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub freight_value: String,
}

impl TryFrom<OrderItemRecord> for OrderItem {
    type Error = RfmError;

    fn try_from(record: OrderItemRecord) -> Result<Self, Self::Error> {
        let order_id = required("order item", "order_id", record.order_id)?;
        let product_id = required("order item", "product_id", record.product_id)?;
        let price = required("order item", "price", record.price)?;

        let order_item_id = optional_count("order_item_id", record.order_item_id)?;

        let freight_value = match non_blank(record.freight_value) {
            Some(raw) => parse_number("freight_value", &raw)?,
            None => 0.0,
        };

        Ok(Self {
            order_id,
            order_item_id,
            product_id,
            seller_id: non_blank(record.seller_id),
            price: parse_number("price", &price)?,
            freight_value,
        })
    }
}

/// Ordinal bucket (1-4) of one RFM dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Segment(u8);

impl Segment {
    pub const MIN: Segment = Segment(1);
    pub const MAX: Segment = Segment(4);

    /// Build a segment, rejecting values outside 1..=4.
    pub fn new(value: u8) -> Option<Self> {
        (1..=4).contains(&value).then_some(Self(value))
    }

    /// Segment for a zero-based bucket index; indexes past 3 saturate.
    pub fn from_index(index: usize) -> Self {
        Self(index.min(3) as u8 + 1)
    }

    /// Mirror the ordinal (1 <-> 4, 2 <-> 3).
    pub fn reversed(self) -> Self {
        Self(5 - self.0)
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Category label for this ordinal.
    pub fn level(self) -> Level {
        match self.0 {
            1 => Level::Low,
            2 => Level::Medium,
            3 => Level::High,
            _ => Level::VeryHigh,
        }
    }

    /// All four segments in ascending order.
    pub fn all() -> [Segment; 4] {
        [Segment(1), Segment(2), Segment(3), Segment(4)]
    }
}

impl TryFrom<u8> for Segment {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("segment must be between 1 and 4, got {}", value))
    }
}

impl From<Segment> for u8 {
    fn from(segment: Segment) -> Self {
        segment.0
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Human-readable label of a segment ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Level {
    Low,
    Medium,
    High,
    #[serde(rename = "Very High")]
    VeryHigh,
}

impl Level {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
            Self::VeryHigh => "Very High",
        }
    }

    /// All levels from lowest to highest.
    pub fn all() -> [Level; 4] {
        [Self::Low, Self::Medium, Self::High, Self::VeryHigh]
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Named behavioural class derived from the three segment ordinals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CustomerCategory {
    Champions,
    #[serde(rename = "Loyal Customers")]
    LoyalCustomers,
    #[serde(rename = "Potential Loyalists")]
    PotentialLoyalists,
    #[serde(rename = "New Customers")]
    NewCustomers,
    Promising,
    #[serde(rename = "Need Attention")]
    NeedAttention,
    #[serde(rename = "About to Sleep")]
    AboutToSleep,
    #[serde(rename = "Can't Lose")]
    CantLose,
    #[serde(rename = "At Risk")]
    AtRisk,
    Hibernating,
}

impl CustomerCategory {
    /// Get a human-readable label for this category.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Champions => "Champions",
            Self::LoyalCustomers => "Loyal Customers",
            Self::PotentialLoyalists => "Potential Loyalists",
            Self::NewCustomers => "New Customers",
            Self::Promising => "Promising",
            Self::NeedAttention => "Need Attention",
            Self::AboutToSleep => "About to Sleep",
            Self::CantLose => "Can't Lose",
            Self::AtRisk => "At Risk",
            Self::Hibernating => "Hibernating",
        }
    }

    /// All categories in rule order.
    pub fn all() -> [CustomerCategory; 10] {
        [
            Self::Champions,
            Self::LoyalCustomers,
            Self::PotentialLoyalists,
            Self::NewCustomers,
            Self::Promising,
            Self::NeedAttention,
            Self::AboutToSleep,
            Self::CantLose,
            Self::AtRisk,
            Self::Hibernating,
        ]
    }
}

impl fmt::Display for CustomerCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Scored and classified customer, one per distinct customer id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerRfm {
    pub customer_id: String,

    /// Whole days since the latest purchase
    pub recency: i64,

    /// Distinct orders placed
    pub frequency: u32,

    /// Total spend
    pub monetary: f64,

    pub r_segment: Segment,
    pub f_segment: Segment,
    pub m_segment: Segment,

    /// Sum of the three segments (3-12)
    pub rfm_score: u8,

    pub recency_category: Level,
    pub frequency_category: Level,
    pub monetary_category: Level,

    pub customer_category: CustomerCategory,
}

/// A customer as listed in the customers export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    /// Id referenced by orders
    pub customer_id: String,

    /// Id shared by every order-level id of the same person
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_unique_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,

    /// Two-letter state code
    pub state: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomerRecord {
    #[serde(default)]
    pub customer_id: String,
    #[serde(default)]
    pub customer_unique_id: String,
    #[serde(default)]
    pub customer_zip_code_prefix: String,
    #[serde(default)]
    pub customer_city: String,
    #[serde(default)]
    pub customer_state: String,
}

impl TryFrom<CustomerRecord> for Customer {
    type Error = RfmError;

    fn try_from(record: CustomerRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            customer_id: required("customer", "customer_id", record.customer_id)?,
            customer_unique_id: non_blank(record.customer_unique_id),
            city: non_blank(record.customer_city),
            state: required("customer", "customer_state", record.customer_state)?,
        })
    }
}

/// A product and its (untranslated) category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub product_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// Raw product row; dimension and photo columns are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductRecord {
    #[serde(default)]
    pub product_id: String,
    #[serde(default)]
    pub product_category_name: String,
}

impl TryFrom<ProductRecord> for Product {
    type Error = RfmError;

    fn try_from(record: ProductRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            product_id: required("product", "product_id", record.product_id)?,
            category: non_blank(record.product_category_name),
        })
    }
}

/// English name of a product category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryTranslation {
    pub name: String,
    pub english: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoryTranslationRecord {
    #[serde(default)]
    pub product_category_name: String,
    #[serde(default)]
    pub product_category_name_english: String,
}

impl TryFrom<CategoryTranslationRecord> for CategoryTranslation {
    type Error = RfmError;

    fn try_from(record: CategoryTranslationRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            name: required("category", "product_category_name", record.product_category_name)?,
            english: required(
                "category",
                "product_category_name_english",
                record.product_category_name_english,
            )?,
        })
    }
}

/// One payment towards an order. Orders may be paid in several parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub order_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequential: Option<u32>,

    /// credit_card, boleto, voucher, debit_card, ...
    pub payment_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installments: Option<u32>,

    pub value: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaymentRecord {
    #[serde(default)]
    pub order_id: String,
    #[serde(default)]
    pub payment_sequential: String,
    #[serde(default)]
    pub payment_type: String,
    #[serde(default)]
    pub payment_installments: String,
    #[serde(default)]
    pub payment_value: String,
}

impl TryFrom<PaymentRecord> for Payment {
    type Error = RfmError;

    fn try_from(record: PaymentRecord) -> Result<Self, Self::Error> {
        let raw_value = required("payment", "payment_value", record.payment_value)?;
        let value = parse_number("payment_value", &raw_value)?;
        if !value.is_finite() || value < 0.0 {
            return Err(RfmError::InvalidNumber {
                field: "payment_value",
                value: raw_value,
            });
        }

        Ok(Self {
            order_id: required("payment", "order_id", record.order_id)?,
            sequential: optional_count("payment_sequential", record.payment_sequential)?,
            payment_type: required("payment", "payment_type", record.payment_type)?,
            installments: optional_count("payment_installments", record.payment_installments)?,
            value,
        })
    }
}

/// A customer review of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub review_id: String,
    pub order_id: String,

    /// 1 (worst) to 5 (best)
    pub score: u8,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<NaiveDateTime>,
}

impl Review {
    /// Lowest score still counted as negative.
    pub const NEGATIVE_MAX: u8 = 2;

    pub fn is_negative(&self) -> bool {
        self.score <= Self::NEGATIVE_MAX
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewRecord {
    #[serde(default)]
    pub review_id: String,
    #[serde(default)]
    pub order_id: String,
    #[serde(default)]
    pub review_score: String,
    #[serde(default)]
    pub review_comment_title: String,
    #[serde(default)]
    pub review_comment_message: String,
    #[serde(default)]
    pub review_creation_date: String,
    #[serde(default)]
    pub review_answer_timestamp: String,
}

impl TryFrom<ReviewRecord> for Review {
    type Error = RfmError;

    fn try_from(record: ReviewRecord) -> Result<Self, Self::Error> {
        let raw_score = required("review", "review_score", record.review_score)?;
        let score = raw_score
            .parse::<u8>()
            .ok()
            .filter(|score| (1..=5).contains(score))
            .ok_or(RfmError::InvalidNumber {
                field: "review_score",
                value: raw_score,
            })?;

        Ok(Self {
            review_id: required("review", "review_id", record.review_id)?,
            order_id: required("review", "order_id", record.order_id)?,
            score,
            comment_title: non_blank(record.review_comment_title),
            comment_message: non_blank(record.review_comment_message),
            created_at: optional_timestamp("review_creation_date", &record.review_creation_date)?,
        })
    }
}

/// Parse a timestamp in any of the accepted export formats.
pub fn parse_timestamp(field: &'static str, value: &str) -> Result<NaiveDateTime, RfmError> {
    let value = value.trim();
    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
    ];

    for format in FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(ts);
        }
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .ok_or_else(|| RfmError::InvalidTimestamp {
            field,
            value: value.to_string(),
        })
}

fn optional_timestamp(
    field: &'static str,
    value: &str,
) -> Result<Option<NaiveDateTime>, RfmError> {
    if value.trim().is_empty() {
        Ok(None)
    } else {
        parse_timestamp(field, value).map(Some)
    }
}

fn parse_number(field: &'static str, value: &str) -> Result<f64, RfmError> {
    value
        .trim()
        .parse::<f64>()
        .map_err(|_| RfmError::InvalidNumber {
            field,
            value: value.to_string(),
        })
}

fn optional_count(field: &'static str, value: String) -> Result<Option<u32>, RfmError> {
    match non_blank(value) {
        Some(raw) => raw
            .parse::<u32>()
            .map(Some)
            .map_err(|_| RfmError::InvalidNumber { field, value: raw }),
        None => Ok(None),
    }
}

fn required(entity: &'static str, field: &'static str, value: String) -> Result<String, RfmError> {
    non_blank(value).ok_or(RfmError::MissingField { entity, field })
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else if trimmed.len() == value.len() {
        Some(value)
    } else {
        Some(trimmed.to_string())
    }
}
