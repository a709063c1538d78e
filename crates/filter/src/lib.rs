//! Order filters applied before segmentation.
//!
//! A filter selects the subset of orders the engine sees, e.g. a purchase
//! date range picked on a dashboard. Filters never touch order items; the
//! engine's inner join drops items whose order was filtered out.

use chrono::NaiveDate;
use rfmkit_model::Order;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum FilterError {
    #[error("Range start {start} is after end {end}")]
    InvertedRange { start: NaiveDate, end: NaiveDate },
    #[error("No orders match {0}")]
    NoMatches(String),
}

/// Trait for selecting orders.
pub trait OrderFilter {
    /// Whether the order is kept
    fn matches(&self, order: &Order) -> bool;

    /// Short description for logs and error messages
    fn describe(&self) -> String;
}

/// Purchase date range, both ends inclusive whole days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, FilterError> {
        if start > end {
            return Err(FilterError::InvertedRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Range covering every purchase date in `orders`.
    pub fn spanning(orders: &[Order]) -> Option<Self> {
        let start = orders.iter().map(Order::purchase_date).min()?;
        let end = orders.iter().map(Order::purchase_date).max()?;
        Some(Self { start, end })
    }

    /// Build from optional bounds, defaulting to the span of `orders`.
    ///
    /// A single bound lying entirely past the data is reported as
    /// `NoMatches`; only two explicit bounds can be inverted.
    pub fn from_bounds(
        orders: &[Order],
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Option<Self>, FilterError> {
        let Some(span) = Self::spanning(orders) else {
            return Ok(None);
        };

        match (start, end) {
            (Some(start), None) if start > span.end => Err(FilterError::NoMatches(format!(
                "purchases from {} onwards (latest purchase is {})",
                start, span.end
            ))),
            (None, Some(end)) if end < span.start => Err(FilterError::NoMatches(format!(
                "purchases up to {} (earliest purchase is {})",
                end, span.start
            ))),
            _ => Self::new(start.unwrap_or(span.start), end.unwrap_or(span.end)).map(Some),
        }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl OrderFilter for DateRange {
    fn matches(&self, order: &Order) -> bool {
        self.contains(order.purchase_date())
    }

    fn describe(&self) -> String {
        format!("purchases from {} to {}", self.start, self.end)
    }
}

/// Filter that keeps every order.
#[derive(Debug, Default)]
pub struct AllOrders;

impl OrderFilter for AllOrders {
    fn matches(&self, _order: &Order) -> bool {
        true
    }

    fn describe(&self) -> String {
        "all orders".to_string()
    }
}

/// Copy the orders matching `filter`.
///
/// Fails when nothing matches, since segmentation needs a non-empty subset.
pub fn apply_filter<F: OrderFilter + ?Sized>(
    orders: &[Order],
    filter: &F,
) -> Result<Vec<Order>, FilterError> {
    let kept: Vec<Order> = orders.iter().filter(|o| filter.matches(o)).cloned().collect();

    if kept.is_empty() {
        return Err(FilterError::NoMatches(filter.describe()));
    }

    Ok(kept)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn orders() -> Vec<Order> {
        vec![
            Order::new("o1", "c1", date("2018-01-05").and_hms_opt(9, 0, 0).unwrap()),
            Order::new("o2", "c2", date("2018-01-31").and_hms_opt(23, 59, 59).unwrap()),
            Order::new("o3", "c1", date("2018-02-01").and_hms_opt(0, 0, 0).unwrap()),
        ]
    }

    #[test]
    fn test_end_day_is_inclusive() {
        let range = DateRange::new(date("2018-01-01"), date("2018-01-31")).unwrap();
        let kept = apply_filter(&orders(), &range).unwrap();
        let ids: Vec<&str> = kept.iter().map(|o| o.order_id.as_str()).collect();
        assert_eq!(ids, vec!["o1", "o2"]);
    }

    #[test]
    fn test_inverted_range() {
        assert_eq!(
            DateRange::new(date("2018-02-01"), date("2018-01-01")),
            Err(FilterError::InvertedRange {
                start: date("2018-02-01"),
                end: date("2018-01-01"),
            })
        );
    }

    #[test]
    fn test_no_matches_error() {
        let range = DateRange::new(date("2019-01-01"), date("2019-12-31")).unwrap();
        assert!(matches!(
            apply_filter(&orders(), &range),
            Err(FilterError::NoMatches(_))
        ));
    }

    #[test]
    fn test_spanning_and_bounds() {
        let all = orders();
        let span = DateRange::spanning(&all).unwrap();
        assert_eq!(span.start(), date("2018-01-05"));
        assert_eq!(span.end(), date("2018-02-01"));
        assert!(DateRange::spanning(&[]).is_none());

        let open_end = DateRange::from_bounds(&all, Some(date("2018-01-10")), None)
            .unwrap()
            .unwrap();
        assert_eq!(open_end.end(), date("2018-02-01"));
        assert_eq!(apply_filter(&all, &open_end).unwrap().len(), 2);
    }

    #[test]
    fn test_all_orders() {
        assert_eq!(apply_filter(&orders(), &AllOrders).unwrap().len(), 3);
        assert!(apply_filter(&[], &AllOrders).is_err());
    }

    #[test]
    fn test_open_bound_past_the_data_is_no_matches() {
        let all = orders();

        let err = DateRange::from_bounds(&all, Some(date("2019-01-01")), None).unwrap_err();
        assert_eq!(
            err,
            FilterError::NoMatches(
                "purchases from 2019-01-01 onwards (latest purchase is 2018-02-01)".to_string()
            )
        );

        let err = DateRange::from_bounds(&all, None, Some(date("2017-12-31"))).unwrap_err();
        assert!(matches!(err, FilterError::NoMatches(_)));

        // Both bounds given by the caller can still be inverted.
        assert!(matches!(
            DateRange::from_bounds(&all, Some(date("2018-02-01")), Some(date("2018-01-01"))),
            Err(FilterError::InvertedRange { .. })
        ));
    }
}
