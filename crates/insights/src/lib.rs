//! Descriptive analytics over order history.
//!
//! Key metrics, revenue trend, weekday volume, delivery timeliness, top
//! products and categories, customer states, payment mix and review scores.
//! Items, payments and reviews count only when their order is present, so
//! passing a filtered order set restricts every figure to that subset.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rfmkit_model::{CategoryTranslation, Customer, Order, OrderItem, Payment, Product, Review};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// Headline numbers for a set of orders.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyMetrics {
    pub customers: usize,
    pub orders: usize,
    /// Sum of item prices of the orders
    pub revenue: f64,
    pub average_order_value: f64,
    /// Customers with more than one order
    pub repeat_customers: usize,
    /// Fraction of customers with more than one order (0.0 - 1.0)
    pub repeat_rate: f64,
}

/// Bucket size of the revenue trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendInterval {
    Daily,
    Weekly,
    #[default]
    Monthly,
}

impl FromStr for TrendInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "daily" | "d" => Ok(Self::Daily),
            "weekly" | "w" => Ok(Self::Weekly),
            "monthly" | "m" => Ok(Self::Monthly),
            other => Err(format!("unknown interval '{}'", other)),
        }
    }
}

impl fmt::Display for TrendInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Daily => "Daily",
            Self::Weekly => "Weekly",
            Self::Monthly => "Monthly",
        };
        f.write_str(name)
    }
}

/// Revenue of one period.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    /// `YYYY-MM-DD`, `YYYY-MM-DD/YYYY-MM-DD` (Monday to Sunday) or `YYYY-MM`
    pub period: String,
    pub revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeekdayCount {
    /// Three-letter day name
    pub day: String,
    pub orders: usize,
}

/// Delivered-on-time breakdown.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeliveryStats {
    pub on_time: usize,
    /// Delivered after the estimated date
    pub late: usize,
    /// Missing delivery or estimate
    pub undelivered: usize,
}

impl DeliveryStats {
    /// Late share of delivered orders.
    pub fn late_rate(&self) -> f64 {
        let delivered = self.on_time + self.late;
        if delivered == 0 {
            0.0
        } else {
            self.late as f64 / delivered as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductRevenue {
    pub product_id: String,
    pub revenue: f64,
    pub items_sold: usize,
}

/// Revenue of one product category.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryRevenue {
    /// English name when a translation exists
    pub category: String,
    pub revenue: f64,
    pub items_sold: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateCount {
    pub state: String,
    pub customers: usize,
}

/// Amount paid with one payment type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentShare {
    pub payment_type: String,
    pub value: f64,
    /// Fraction of all payment value (0.0 - 1.0)
    pub share: f64,
    pub payments: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreCount {
    pub score: u8,
    pub reviews: usize,
}

/// Compute headline metrics.
pub fn key_metrics(orders: &[Order], items: &[OrderItem]) -> KeyMetrics {
    let mut orders_per_customer: HashMap<&str, usize> = HashMap::new();
    for order in orders {
        *orders_per_customer.entry(order.customer_id.as_str()).or_default() += 1;
    }

    let revenue: f64 = joined(orders, items).map(|(_, item)| item.price).sum();
    let customers = orders_per_customer.len();
    let repeat_customers = orders_per_customer.values().filter(|&&n| n > 1).count();

    KeyMetrics {
        customers,
        orders: orders.len(),
        revenue,
        average_order_value: ratio(revenue, orders.len()),
        repeat_customers,
        repeat_rate: ratio(repeat_customers as f64, customers),
    }
}

/// Revenue per period, ascending.
pub fn revenue_trend(
    orders: &[Order],
    items: &[OrderItem],
    interval: TrendInterval,
) -> Vec<TrendPoint> {
    let mut buckets: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for (order, item) in joined(orders, items) {
        *buckets
            .entry(period_start(order.purchase_date(), interval))
            .or_default() += item.price;
    }

    buckets
        .into_iter()
        .map(|(start, revenue)| TrendPoint {
            period: period_label(start, interval),
            revenue,
        })
        .collect()
}

/// Order counts Monday to Sunday.
pub fn orders_by_weekday(orders: &[Order]) -> Vec<WeekdayCount> {
    let mut counts = [0usize; 7];
    for order in orders {
        counts[order.purchase_date().weekday().num_days_from_monday() as usize] += 1;
    }

    let mut day = Weekday::Mon;
    counts
        .into_iter()
        .map(|orders| {
            let entry = WeekdayCount {
                day: day.to_string(),
                orders,
            };
            day = day.succ();
            entry
        })
        .collect()
}

/// Count on-time, late and undelivered orders.
pub fn delivery_timeliness(orders: &[Order]) -> DeliveryStats {
    let mut stats = DeliveryStats::default();
    for order in orders {
        match order.is_late() {
            Some(true) => stats.late += 1,
            Some(false) => stats.on_time += 1,
            None => stats.undelivered += 1,
        }
    }
    stats
}

/// The `n` products with the highest revenue; ties by product id.
pub fn top_products(orders: &[Order], items: &[OrderItem], n: usize) -> Vec<ProductRevenue> {
    let mut by_product: HashMap<&str, (f64, usize)> = HashMap::new();
    for (_, item) in joined(orders, items) {
        let entry = by_product.entry(item.product_id.as_str()).or_default();
        entry.0 += item.price;
        entry.1 += 1;
    }

    let mut products: Vec<ProductRevenue> = by_product
        .into_iter()
        .map(|(product_id, (revenue, items_sold))| ProductRevenue {
            product_id: product_id.to_string(),
            revenue,
            items_sold,
        })
        .collect();

    products.sort_by(|a, b| {
        b.revenue
            .total_cmp(&a.revenue)
            .then_with(|| a.product_id.cmp(&b.product_id))
    });
    products.truncate(n);
    products
}

/// The `n` categories with the highest item revenue; ties by name.
///
/// Categories are named in English when `translations` has an entry and by
/// their raw name otherwise. Items of unknown or uncategorised products are
/// left out.
pub fn top_categories(
    orders: &[Order],
    items: &[OrderItem],
    products: &[Product],
    translations: &[CategoryTranslation],
    n: usize,
) -> Vec<CategoryRevenue> {
    let english: HashMap<&str, &str> = translations
        .iter()
        .map(|t| (t.name.as_str(), t.english.as_str()))
        .collect();
    let category_of: HashMap<&str, &str> = products
        .iter()
        .filter_map(|p| {
            let name = p.category.as_deref()?;
            Some((
                p.product_id.as_str(),
                english.get(name).copied().unwrap_or(name),
            ))
        })
        .collect();

    let mut by_category: HashMap<&str, (f64, usize)> = HashMap::new();
    for (_, item) in joined(orders, items) {
        if let Some(&category) = category_of.get(item.product_id.as_str()) {
            let entry = by_category.entry(category).or_default();
            entry.0 += item.price;
            entry.1 += 1;
        }
    }

    let mut categories: Vec<CategoryRevenue> = by_category
        .into_iter()
        .map(|(category, (revenue, items_sold))| CategoryRevenue {
            category: category.to_string(),
            revenue,
            items_sold,
        })
        .collect();

    categories.sort_by(|a, b| {
        b.revenue
            .total_cmp(&a.revenue)
            .then_with(|| a.category.cmp(&b.category))
    });
    categories.truncate(n);
    categories
}

/// Distinct customers of the orders per state, most customers first.
pub fn customer_states(orders: &[Order], customers: &[Customer]) -> Vec<StateCount> {
    let state_of: HashMap<&str, &str> = customers
        .iter()
        .map(|c| (c.customer_id.as_str(), c.state.as_str()))
        .collect();
    let ordering: HashSet<&str> = orders.iter().map(|o| o.customer_id.as_str()).collect();

    let mut by_state: HashMap<&str, usize> = HashMap::new();
    for customer_id in ordering {
        if let Some(&state) = state_of.get(customer_id) {
            *by_state.entry(state).or_default() += 1;
        }
    }

    let mut states: Vec<StateCount> = by_state
        .into_iter()
        .map(|(state, customers)| StateCount {
            state: state.to_string(),
            customers,
        })
        .collect();
    states.sort_by(|a, b| b.customers.cmp(&a.customers).then_with(|| a.state.cmp(&b.state)));
    states
}

/// Payment value per payment type, largest first.
pub fn payment_mix(orders: &[Order], payments: &[Payment]) -> Vec<PaymentShare> {
    let selected = order_ids(orders);

    let mut by_type: HashMap<&str, (f64, usize)> = HashMap::new();
    for payment in payments.iter().filter(|p| selected.contains(p.order_id.as_str())) {
        let entry = by_type.entry(payment.payment_type.as_str()).or_default();
        entry.0 += payment.value;
        entry.1 += 1;
    }

    let total: f64 = by_type.values().map(|(value, _)| value).sum();
    let mut mix: Vec<PaymentShare> = by_type
        .into_iter()
        .map(|(payment_type, (value, payments))| PaymentShare {
            payment_type: payment_type.to_string(),
            value,
            share: if total > 0.0 { value / total } else { 0.0 },
            payments,
        })
        .collect();

    mix.sort_by(|a, b| {
        b.value
            .total_cmp(&a.value)
            .then_with(|| a.payment_type.cmp(&b.payment_type))
    });
    mix
}

/// Review counts for scores 1 to 5; every score is present.
pub fn review_distribution(orders: &[Order], reviews: &[Review]) -> Vec<ScoreCount> {
    let selected = order_ids(orders);
    let mut counts = [0usize; 5];
    for review in reviews.iter().filter(|r| selected.contains(r.order_id.as_str())) {
        let slot = usize::from(review.score).checked_sub(1);
        if let Some(count) = slot.and_then(|i| counts.get_mut(i)) {
            *count += 1;
        }
    }

    (1u8..=5)
        .zip(counts)
        .map(|(score, reviews)| ScoreCount { score, reviews })
        .collect()
}

/// Reviews of the orders scored at or below `Review::NEGATIVE_MAX`, in input order.
pub fn negative_reviews<'a>(orders: &[Order], reviews: &'a [Review]) -> Vec<&'a Review> {
    let selected = order_ids(orders);
    reviews
        .iter()
        .filter(|r| r.is_negative() && selected.contains(r.order_id.as_str()))
        .collect()
}

fn order_ids(orders: &[Order]) -> HashSet<&str> {
    orders.iter().map(|o| o.order_id.as_str()).collect()
}

/// Items paired with their order, skipping items of unknown orders.
fn joined<'a>(
    orders: &'a [Order],
    items: &'a [OrderItem],
) -> impl Iterator<Item = (&'a Order, &'a OrderItem)> {
    let by_id: HashMap<&str, &Order> = orders.iter().map(|o| (o.order_id.as_str(), o)).collect();
    items
        .iter()
        .filter_map(move |item| by_id.get(item.order_id.as_str()).map(|&order| (order, item)))
}

fn period_start(date: NaiveDate, interval: TrendInterval) -> NaiveDate {
    match interval {
        TrendInterval::Daily => date,
        TrendInterval::Weekly => {
            date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
        }
        TrendInterval::Monthly => date.with_day(1).unwrap_or(date),
    }
}

fn period_label(start: NaiveDate, interval: TrendInterval) -> String {
    match interval {
        TrendInterval::Daily => start.format("%Y-%m-%d").to_string(),
        TrendInterval::Weekly => format!(
            "{}/{}",
            start.format("%Y-%m-%d"),
            (start + Duration::days(6)).format("%Y-%m-%d")
        ),
        TrendInterval::Monthly => start.format("%Y-%m").to_string(),
    }
}

fn ratio(numerator: f64, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator / denominator as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use pretty_assertions::assert_eq;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn sample() -> (Vec<Order>, Vec<OrderItem>) {
        let orders = vec![
            // Monday
            Order::new("o1", "c1", ts("2018-01-01 10:00:00"))
                .with_delivery(Some(ts("2018-01-05 12:00:00")), Some(ts("2018-01-10 00:00:00"))),
            // Sunday
            Order::new("o2", "c1", ts("2018-01-07 18:30:00"))
                .with_delivery(Some(ts("2018-01-20 09:00:00")), Some(ts("2018-01-15 00:00:00"))),
            // Thursday
            Order::new("o3", "c2", ts("2018-02-01 08:00:00")),
        ];
        let items = vec![
            OrderItem::new("o1", "p1", 100.0),
            OrderItem::new("o1", "p2", 20.0),
            OrderItem::new("o2", "p2", 30.0),
            OrderItem::new("o3", "p3", 50.0),
            OrderItem::new("o-unknown", "p9", 1000.0),
        ];
        (orders, items)
    }

    #[test]
    fn test_key_metrics() {
        let (orders, items) = sample();
        let metrics = key_metrics(&orders, &items);
        assert_eq!(
            metrics,
            KeyMetrics {
                customers: 2,
                orders: 3,
                revenue: 200.0,
                average_order_value: 200.0 / 3.0,
                repeat_customers: 1,
                repeat_rate: 0.5,
            }
        );

        let empty = key_metrics(&[], &items);
        assert_eq!(empty.average_order_value, 0.0);
        assert_eq!(empty.revenue, 0.0);
    }

    #[test]
    fn test_revenue_trend_intervals() {
        let (orders, items) = sample();

        let monthly = revenue_trend(&orders, &items, TrendInterval::Monthly);
        assert_eq!(
            monthly,
            vec![
                TrendPoint { period: "2018-01".into(), revenue: 150.0 },
                TrendPoint { period: "2018-02".into(), revenue: 50.0 },
            ]
        );

        let weekly = revenue_trend(&orders, &items, TrendInterval::Weekly);
        assert_eq!(weekly.len(), 2);
        assert_eq!(weekly[0].period, "2018-01-01/2018-01-07");
        assert_eq!(weekly[0].revenue, 150.0);
        assert_eq!(weekly[1].period, "2018-01-29/2018-02-04");

        let daily = revenue_trend(&orders, &items, TrendInterval::Daily);
        let periods: Vec<&str> = daily.iter().map(|p| p.period.as_str()).collect();
        assert_eq!(periods, vec!["2018-01-01", "2018-01-07", "2018-02-01"]);
    }

    #[test]
    fn test_interval_parsing() {
        assert_eq!("Weekly".parse::<TrendInterval>(), Ok(TrendInterval::Weekly));
        assert_eq!("m".parse::<TrendInterval>(), Ok(TrendInterval::Monthly));
        assert!("hourly".parse::<TrendInterval>().is_err());
    }

    #[test]
    fn test_orders_by_weekday() {
        let (orders, _) = sample();
        let counts: Vec<(String, usize)> = orders_by_weekday(&orders)
            .into_iter()
            .map(|w| (w.day, w.orders))
            .collect();
        assert_eq!(counts[0], ("Mon".to_string(), 1));
        assert_eq!(counts[3], ("Thu".to_string(), 1));
        assert_eq!(counts[6], ("Sun".to_string(), 1));
        assert_eq!(counts.iter().map(|(_, n)| n).sum::<usize>(), 3);
    }

    #[test]
    fn test_delivery_timeliness() {
        let (orders, _) = sample();
        let stats = delivery_timeliness(&orders);
        assert_eq!(
            stats,
            DeliveryStats {
                on_time: 1,
                late: 1,
                undelivered: 1
            }
        );
        assert_eq!(stats.late_rate(), 0.5);
        assert_eq!(DeliveryStats::default().late_rate(), 0.0);
    }

    #[test]
    fn test_top_products() {
        let (orders, items) = sample();
        let top = top_products(&orders, &items, 2);
        assert_eq!(
            top,
            vec![
                ProductRevenue { product_id: "p1".into(), revenue: 100.0, items_sold: 1 },
                ProductRevenue { product_id: "p2".into(), revenue: 50.0, items_sold: 2 },
            ]
        );
        assert_eq!(top_products(&orders, &items, 10).len(), 3);
    }

    fn review(id: &str, order_id: &str, score: u8) -> Review {
        Review {
            review_id: id.into(),
            order_id: order_id.into(),
            score,
            comment_title: None,
            comment_message: Some(format!("review {id}")),
            created_at: None,
        }
    }

    #[test]
    fn test_top_categories_prefers_english_names() {
        let (orders, items) = sample();
        let products = vec![
            Product { product_id: "p1".into(), category: Some("perfumaria".into()) },
            Product { product_id: "p2".into(), category: Some("perfumaria".into()) },
            Product { product_id: "p3".into(), category: Some("pet_shop".into()) },
            Product { product_id: "p9".into(), category: None },
        ];
        let translations = vec![CategoryTranslation {
            name: "perfumaria".into(),
            english: "perfumery".into(),
        }];

        let top = top_categories(&orders, &items, &products, &translations, 10);
        assert_eq!(
            top,
            vec![
                CategoryRevenue { category: "perfumery".into(), revenue: 150.0, items_sold: 3 },
                CategoryRevenue { category: "pet_shop".into(), revenue: 50.0, items_sold: 1 },
            ]
        );
        assert_eq!(top_categories(&orders, &items, &products, &translations, 1).len(), 1);
        assert!(top_categories(&orders, &items, &[], &translations, 10).is_empty());
    }

    #[test]
    fn test_customer_states_counts_distinct_customers() {
        let (orders, _) = sample();
        let customers = vec![
            Customer { customer_id: "c1".into(), customer_unique_id: None, city: None, state: "SP".into() },
            Customer { customer_id: "c2".into(), customer_unique_id: None, city: None, state: "RJ".into() },
            Customer { customer_id: "c3".into(), customer_unique_id: None, city: None, state: "SP".into() },
        ];

        // c1 has two orders, c3 none in the selection.
        assert_eq!(
            customer_states(&orders, &customers),
            vec![
                StateCount { state: "RJ".into(), customers: 1 },
                StateCount { state: "SP".into(), customers: 1 },
            ]
        );
        assert!(customer_states(&orders, &[]).is_empty());
    }

    #[test]
    fn test_payment_mix() {
        let (orders, _) = sample();
        let payment = |order_id: &str, payment_type: &str, value: f64| Payment {
            order_id: order_id.into(),
            sequential: None,
            payment_type: payment_type.into(),
            installments: None,
            value,
        };
        let payments = vec![
            payment("o1", "credit_card", 90.0),
            payment("o1", "voucher", 30.0),
            payment("o2", "credit_card", 30.0),
            payment("o3", "boleto", 50.0),
            payment("o-unknown", "boleto", 1000.0),
        ];

        assert_eq!(
            payment_mix(&orders, &payments),
            vec![
                PaymentShare { payment_type: "credit_card".into(), value: 120.0, share: 0.6, payments: 2 },
                PaymentShare { payment_type: "boleto".into(), value: 50.0, share: 0.25, payments: 1 },
                PaymentShare { payment_type: "voucher".into(), value: 30.0, share: 0.15, payments: 1 },
            ]
        );
        assert!(payment_mix(&[], &payments).is_empty());
    }

    #[test]
    fn test_review_scores_and_negatives() {
        let (orders, _) = sample();
        let reviews = vec![
            review("r1", "o1", 5),
            review("r2", "o2", 1),
            review("r3", "o3", 2),
            review("r4", "o3", 3),
            review("r5", "o-unknown", 1),
        ];

        let counts: Vec<usize> = review_distribution(&orders, &reviews)
            .into_iter()
            .map(|c| c.reviews)
            .collect();
        assert_eq!(counts, vec![1, 1, 1, 0, 1]);
        assert_eq!(review_distribution(&[], &reviews).len(), 5);

        let negative: Vec<&str> = negative_reviews(&orders, &reviews)
            .into_iter()
            .map(|r| r.review_id.as_str())
            .collect();
        assert_eq!(negative, vec!["r2", "r3"]);
    }
}
