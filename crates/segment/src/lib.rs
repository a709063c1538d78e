//! RFM segmentation engine.
//!
//! Joins orders with their line items, aggregates per customer, bins each
//! dimension into four ordinals and classifies every customer into one of ten
//! behavioural categories. The engine is a pure function over borrowed data:
//! no I/O, no logging, no shared state.

use chrono::{NaiveDate, NaiveDateTime};
use rfmkit_features::{
    bucket_index, edges_are_unique, elapsed_days, fixed_bucket, quantile_edges, rank_first,
};
use rfmkit_model::{CustomerCategory, CustomerRfm, Dimension, Order, OrderItem, RfmError, Segment};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// How Monetary treats orders with several line items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonetaryScope {
    /// Every line item of every order counts
    #[default]
    AllItems,
    /// Only the first line item of each order counts
    FirstItemPerOrder,
}

/// What to do when a purchase is later than the reference date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegativeRecency {
    /// Fail with a computation error
    #[default]
    Reject,
    /// Report zero days
    Clamp,
    /// Report the negative value as is
    Keep,
}

/// What to do when quartile edges of a dimension collapse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegenerateBins {
    /// Fail with an input error
    #[default]
    Reject,
    /// Bin first-occurrence ranks instead of raw values
    RankFallback,
}

/// Configuration for the segmentation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RfmConfig {
    /// Clock used for Recency
    pub reference_date: NaiveDateTime,
    /// Upper bounds of Frequency segments 1-3; segment 4 is unbounded
    pub frequency_edges: [u32; 3],
    pub monetary_scope: MonetaryScope,
    pub negative_recency: NegativeRecency,
    pub degenerate_bins: DegenerateBins,
}

impl Default for RfmConfig {
    fn default() -> Self {
        Self {
            reference_date: default_reference_date(),
            frequency_edges: [3, 6, 10],
            monetary_scope: MonetaryScope::default(),
            negative_recency: NegativeRecency::default(),
            degenerate_bins: DegenerateBins::default(),
        }
    }
}

impl RfmConfig {
    pub fn with_reference_date(mut self, reference_date: NaiveDateTime) -> Self {
        self.reference_date = reference_date;
        self
    }

    pub fn with_monetary_scope(mut self, scope: MonetaryScope) -> Self {
        self.monetary_scope = scope;
        self
    }

    pub fn with_negative_recency(mut self, policy: NegativeRecency) -> Self {
        self.negative_recency = policy;
        self
    }

    /// Check the settings that deserialization cannot enforce.
    ///
    /// Frequency bounds must be non-zero and strictly increasing, otherwise
    /// the fixed buckets overlap or swallow every count.
    pub fn validate(&self) -> Result<(), RfmError> {
        let edges = &self.frequency_edges;
        if edges[0] == 0 || edges.windows(2).any(|w| w[0] >= w[1]) {
            return Err(RfmError::InvalidFrequencyEdges {
                edges: edges.to_vec(),
            });
        }
        Ok(())
    }

    pub fn with_degenerate_bins(mut self, policy: DegenerateBins) -> Self {
        self.degenerate_bins = policy;
        self
    }
}

/// 2018-10-17 00:00:00, the day after the last purchase in the reference dataset.
pub fn default_reference_date() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2018, 10, 17)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .expect("valid calendar date")
}

/// What the quartile edges of a dimension were computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeBasis {
    Values,
    Ranks,
}

/// Quartile edges used to bin one dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantileEdges {
    pub basis: EdgeBasis,
    pub edges: [f64; 5],
}

/// Full engine output: one row per customer plus the bin edges used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segmentation {
    pub customers: Vec<CustomerRfm>,
    pub recency_edges: QuantileEdges,
    pub monetary_edges: QuantileEdges,
}

/// Compute the RFM table with default settings and an explicit reference date.
pub fn compute_rfm(
    orders: &[Order],
    order_items: &[OrderItem],
    reference_date: NaiveDateTime,
) -> Result<Vec<CustomerRfm>, RfmError> {
    let config = RfmConfig::default().with_reference_date(reference_date);
    segment(orders, order_items, &config).map(|segmentation| segmentation.customers)
}

/// Segment every customer found in `orders` joined with `order_items`.
///
/// Rows are ordered by customer id. Fails without partial output on invalid
/// settings, empty or degenerate input, malformed records, or (by default)
/// purchases after the reference date.
pub fn segment(
    orders: &[Order],
    order_items: &[OrderItem],
    config: &RfmConfig,
) -> Result<Segmentation, RfmError> {
    config.validate()?;
    let totals = aggregate(orders, order_items, config.monetary_scope)?;

    let mut recency = Vec::with_capacity(totals.len());
    for (customer_id, customer) in &totals {
        let days = elapsed_days(config.reference_date, customer.latest);
        let days = match (days < 0, config.negative_recency) {
            (true, NegativeRecency::Reject) => {
                return Err(RfmError::NegativeRecency {
                    customer_id: customer_id.to_string(),
                    days,
                })
            }
            (true, NegativeRecency::Clamp) => 0,
            _ => days,
        };
        recency.push(days);
    }

    let recency_values: Vec<f64> = recency.iter().map(|&days| days as f64).collect();
    let monetary_values: Vec<f64> = totals.values().map(|c| c.monetary).collect();

    let (recency_edges, recency_buckets) =
        quartile_buckets(Dimension::Recency, &recency_values, config.degenerate_bins)?;
    let (monetary_edges, monetary_buckets) =
        quartile_buckets(Dimension::Monetary, &monetary_values, config.degenerate_bins)?;

    let customers = totals
        .into_iter()
        .zip(recency)
        .zip(recency_buckets.into_iter().zip(monetary_buckets))
        .map(|(((customer_id, customer), recency), (r_bucket, m_bucket))| {
            // Smallest recency gets the highest ordinal.
            let r_segment = Segment::from_index(r_bucket).reversed();
            let f_segment = frequency_segment(customer.orders, &config.frequency_edges);
            let m_segment = Segment::from_index(m_bucket);

            CustomerRfm {
                customer_id: customer_id.to_string(),
                recency,
                frequency: customer.orders,
                monetary: customer.monetary,
                r_segment,
                f_segment,
                m_segment,
                rfm_score: r_segment.get() + f_segment.get() + m_segment.get(),
                recency_category: r_segment.level(),
                frequency_category: f_segment.level(),
                monetary_category: m_segment.level(),
                customer_category: classify(r_segment, f_segment, m_segment),
            }
        })
        .collect();

    Ok(Segmentation {
        customers,
        recency_edges,
        monetary_edges,
    })
}

/// Frequency segment from fixed right-closed bounds.
pub fn frequency_segment(frequency: u32, edges: &[u32; 3]) -> Segment {
    fixed_bucket(frequency, edges)
        .map(Segment::from_index)
        .unwrap_or(Segment::MIN)
}

type Rule = (fn(u8, u8, u8) -> bool, CustomerCategory);

/// Classification rules, evaluated in order. Rules overlap; the first match wins.
const RULES: [Rule; 9] = [
    (|r: u8, f: u8, m: u8| r == 4 && f == 4 && m == 4, CustomerCategory::Champions),
    (|r: u8, f: u8, _: u8| r >= 3 && f >= 3, CustomerCategory::LoyalCustomers),
    (|r: u8, f: u8, _: u8| r >= 3 && f >= 2, CustomerCategory::PotentialLoyalists),
    (|r: u8, f: u8, _: u8| r == 4 && f <= 2, CustomerCategory::NewCustomers),
    (|r: u8, f: u8, _: u8| r >= 3 && f == 1, CustomerCategory::Promising),
    (|r: u8, f: u8, _: u8| r == 2 && f >= 2, CustomerCategory::NeedAttention),
    (|r: u8, f: u8, _: u8| r == 2 && f == 1, CustomerCategory::AboutToSleep),
    (|r: u8, f: u8, m: u8| r == 1 && (f >= 3 || m >= 3), CustomerCategory::CantLose),
    (|r: u8, f: u8, _: u8| r == 1 && f >= 2, CustomerCategory::AtRisk),
];

/// Classify a customer from its three segment ordinals.
pub fn classify(r: Segment, f: Segment, m: Segment) -> CustomerCategory {
    let (r, f, m) = (r.get(), f.get(), m.get());
    RULES
        .iter()
        .find(|(matches, _)| matches(r, f, m))
        .map(|&(_, category)| category)
        .unwrap_or(CustomerCategory::Hibernating)
}

/// Per-customer running totals.
#[derive(Debug)]
struct CustomerTotals {
    latest: NaiveDateTime,
    orders: u32,
    monetary: f64,
}

/// Validate the input, inner-join orders with items and fold per customer.
///
/// Order ids are unique, so keeping the first joined row per order leaves
/// exactly one row per matched order; Frequency counts those rows.
fn aggregate<'a>(
    orders: &'a [Order],
    order_items: &[OrderItem],
    scope: MonetaryScope,
) -> Result<BTreeMap<&'a str, CustomerTotals>, RfmError> {
    if orders.is_empty() {
        return Err(RfmError::EmptyOrders);
    }

    let mut seen: HashSet<&str> = HashSet::with_capacity(orders.len());
    for order in orders {
        if order.order_id.trim().is_empty() {
            return Err(RfmError::MissingField {
                entity: "order",
                field: "order_id",
            });
        }
        if order.customer_id.trim().is_empty() {
            return Err(RfmError::MissingField {
                entity: "order",
                field: "customer_id",
            });
        }
        if !seen.insert(order.order_id.as_str()) {
            return Err(RfmError::DuplicateOrder {
                order_id: order.order_id.clone(),
            });
        }
    }

    let mut lines: HashMap<&str, Vec<f64>> = HashMap::new();
    for item in order_items {
        if item.order_id.trim().is_empty() {
            return Err(RfmError::MissingField {
                entity: "order item",
                field: "order_id",
            });
        }
        if !item.price.is_finite() || item.price < 0.0 {
            return Err(RfmError::InvalidPrice {
                order_id: item.order_id.clone(),
                price: item.price,
            });
        }
        lines.entry(item.order_id.as_str()).or_default().push(item.price);
    }

    let mut totals: BTreeMap<&str, CustomerTotals> = BTreeMap::new();
    for order in orders {
        let Some(prices) = lines.get(order.order_id.as_str()) else {
            continue;
        };

        let spend = match scope {
            MonetaryScope::AllItems => prices.iter().sum(),
            MonetaryScope::FirstItemPerOrder => prices[0],
        };

        let customer = totals
            .entry(order.customer_id.as_str())
            .or_insert(CustomerTotals {
                latest: order.purchase_timestamp,
                orders: 0,
                monetary: 0.0,
            });
        customer.latest = customer.latest.max(order.purchase_timestamp);
        customer.orders += 1;
        customer.monetary += spend;
    }

    if totals.is_empty() {
        return Err(RfmError::EmptyJoin);
    }

    Ok(totals)
}

/// Bin values into quartiles, returning the edges and a zero-based bucket per value.
fn quartile_buckets(
    dimension: Dimension,
    values: &[f64],
    policy: DegenerateBins,
) -> Result<(QuantileEdges, Vec<usize>), RfmError> {
    let degenerate = |edges: &[f64]| RfmError::DegenerateBins {
        dimension,
        edges: edges.to_vec(),
    };

    let edges = quantile_edges(values).ok_or(RfmError::EmptyJoin)?;
    if edges_are_unique(&edges) {
        let buckets = assign(values, &edges).ok_or_else(|| degenerate(&edges))?;
        return Ok((
            QuantileEdges {
                basis: EdgeBasis::Values,
                edges,
            },
            buckets,
        ));
    }

    if policy == DegenerateBins::Reject {
        return Err(degenerate(&edges));
    }

    let ranks = rank_first(values);
    let rank_edges = quantile_edges(&ranks).ok_or(RfmError::EmptyJoin)?;
    if !edges_are_unique(&rank_edges) {
        return Err(degenerate(&edges));
    }

    let buckets = assign(&ranks, &rank_edges).ok_or_else(|| degenerate(&rank_edges))?;
    Ok((
        QuantileEdges {
            basis: EdgeBasis::Ranks,
            edges: rank_edges,
        },
        buckets,
    ))
}

fn assign(values: &[f64], edges: &[f64]) -> Option<Vec<usize>> {
    values.iter().map(|&v| bucket_index(v, edges)).collect()
}
