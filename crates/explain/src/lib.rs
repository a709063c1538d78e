//! Explanations and summaries for RFM segmentations.
//!
//! Converts customer categories into human-readable profiles and aggregates
//! a segmented customer table into the counts a dashboard displays:
//! category distribution, level mix per dimension, recency histogram.

use rfmkit_model::{CustomerCategory, CustomerRfm, Level};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Number of equal-width bins in the recency histogram.
pub const RECENCY_HISTOGRAM_BINS: usize = 20;

/// A structured description of a customer category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryProfile {
    pub category: CustomerCategory,

    /// Short summary (1 line)
    pub summary: String,

    /// What the segment ordinals of these customers look like
    pub detail: String,

    /// Suggested marketing action
    pub action: String,
}

/// Customers in one category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryCount {
    pub category: CustomerCategory,
    pub count: usize,
    /// Fraction of all customers (0.0 - 1.0)
    pub share: f64,
}

/// Customers at one level of a dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelCount {
    pub level: Level,
    pub count: usize,
}

/// One bar of the recency histogram, `[lower, upper)` except the last which is closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

/// Aggregate view of a segmented customer table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentSummary {
    pub total_customers: usize,
    pub total_monetary: f64,
    pub mean_rfm_score: f64,

    /// Present categories, most populated first
    pub categories: Vec<CategoryCount>,

    pub recency_levels: Vec<LevelCount>,
    pub frequency_levels: Vec<LevelCount>,
    pub monetary_levels: Vec<LevelCount>,

    pub recency_histogram: Vec<HistogramBin>,
}

/// Describe a customer category.
pub fn describe_category(category: CustomerCategory) -> CategoryProfile {
    let (summary, detail, action) = match category {
        CustomerCategory::Champions => (
            "Best customers",
            "Bought very recently, buy very often and spend the most. \
             Top segment in all three dimensions.",
            "Reward them; early access to new products, ask for reviews.",
        ),
        CustomerCategory::LoyalCustomers => (
            "Frequent recent buyers",
            "Recent customers in the high frequency segments. \
             Respond well to promotions.",
            "Upsell higher value products and enrol them in loyalty programs.",
        ),
        CustomerCategory::PotentialLoyalists => (
            "Recent buyers with repeat orders",
            "Bought recently and more than a few times, but not yet often enough \
             to count as loyal.",
            "Offer membership or recommendations to build the habit.",
        ),
        CustomerCategory::NewCustomers => (
            "Newly acquired",
            "Most recent recency segment with low purchase frequency.",
            "Onboarding support and a reason to make the next purchase.",
        ),
        CustomerCategory::Promising => (
            "Recent one-off buyers",
            "Bought fairly recently, only a few orders so far.",
            "Build brand awareness; free trials or small incentives.",
        ),
        CustomerCategory::NeedAttention => (
            "Cooling regulars",
            "Repeat customers whose last purchase is getting older.",
            "Limited time offers and recommendations based on past purchases.",
        ),
        CustomerCategory::AboutToSleep => (
            "Fading one-off buyers",
            "Below average recency with few orders.",
            "Share popular products and reconnect before they go dormant.",
        ),
        CustomerCategory::CantLose => (
            "Valuable but gone quiet",
            "Used to order often or spend a lot, but have not purchased for a \
             long time.",
            "Win them back with renewals or new products; talk to them directly.",
        ),
        CustomerCategory::AtRisk => (
            "Lapsing repeat customers",
            "Ordered more than a few times, but long ago.",
            "Personalised emails and helpful reminders.",
        ),
        CustomerCategory::Hibernating => (
            "Dormant customers",
            "Oldest purchases, few orders and low spend.",
            "Offer other relevant products or special discounts; otherwise deprioritise.",
        ),
    };

    CategoryProfile {
        category,
        summary: summary.to_string(),
        detail: detail.to_string(),
        action: action.to_string(),
    }
}

/// Aggregate a segmented customer table.
pub fn summarize(customers: &[CustomerRfm]) -> SegmentSummary {
    let total = customers.len();

    let mut by_category: HashMap<CustomerCategory, usize> = HashMap::new();
    for customer in customers {
        *by_category.entry(customer.customer_category).or_default() += 1;
    }

    let mut categories: Vec<CategoryCount> = CustomerCategory::all()
        .into_iter()
        .filter_map(|category| {
            let count = by_category.get(&category).copied()?;
            Some(CategoryCount {
                category,
                count,
                share: count as f64 / total as f64,
            })
        })
        .collect();
    // Stable sort keeps rule order among equal counts.
    categories.sort_by(|a, b| b.count.cmp(&a.count));

    let mean_rfm_score = if total == 0 {
        0.0
    } else {
        customers.iter().map(|c| f64::from(c.rfm_score)).sum::<f64>() / total as f64
    };

    SegmentSummary {
        total_customers: total,
        total_monetary: customers.iter().map(|c| c.monetary).sum(),
        mean_rfm_score,
        categories,
        recency_levels: level_counts(customers.iter().map(|c| c.recency_category)),
        frequency_levels: level_counts(customers.iter().map(|c| c.frequency_category)),
        monetary_levels: level_counts(customers.iter().map(|c| c.monetary_category)),
        recency_histogram: recency_histogram(customers, RECENCY_HISTOGRAM_BINS),
    }
}

/// Equal-width histogram of recency over `[min, max]`.
pub fn recency_histogram(customers: &[CustomerRfm], bins: usize) -> Vec<HistogramBin> {
    let Some(min) = customers.iter().map(|c| c.recency).min() else {
        return Vec::new();
    };
    let max = customers.iter().map(|c| c.recency).max().unwrap_or(min);
    let (min, max) = (min as f64, max as f64);

    if bins == 0 {
        return Vec::new();
    }
    if min == max {
        return vec![HistogramBin {
            lower: min,
            upper: max,
            count: customers.len(),
        }];
    }

    let width = (max - min) / bins as f64;
    let mut histogram: Vec<HistogramBin> = (0..bins)
        .map(|i| HistogramBin {
            lower: min + width * i as f64,
            upper: if i + 1 == bins { max } else { min + width * (i + 1) as f64 },
            count: 0,
        })
        .collect();

    for customer in customers {
        let index = (((customer.recency as f64 - min) / width) as usize).min(bins - 1);
        histogram[index].count += 1;
    }

    histogram
}

fn level_counts(levels: impl Iterator<Item = Level>) -> Vec<LevelCount> {
    let mut counts = [0usize; 4];
    for level in levels {
        counts[level as usize] += 1;
    }

    Level::all()
        .into_iter()
        .zip(counts)
        .map(|(level, count)| LevelCount { level, count })
        .collect()
}

/// Render a plain-text report of a summary.
pub fn render_text(summary: &SegmentSummary) -> String {
    let mut lines = vec![
        format!("Customers: {}", summary.total_customers),
        format!("Total monetary: {:.2}", summary.total_monetary),
        format!("Mean RFM score: {:.2}", summary.mean_rfm_score),
        String::new(),
        "Customer categories:".to_string(),
    ];

    lines.extend(summary.categories.iter().map(|entry| {
        format!(
            "  {:<20} {:>8} ({:>5.1}%)  {}",
            entry.category.label(),
            entry.count,
            entry.share * 100.0,
            describe_category(entry.category).summary
        )
    }));

    for (name, levels) in [
        ("Recency", &summary.recency_levels),
        ("Frequency", &summary.frequency_levels),
        ("Monetary", &summary.monetary_levels),
    ] {
        let mix: Vec<String> = levels
            .iter()
            .map(|l| format!("{}={}", l.level.label(), l.count))
            .collect();
        lines.push(format!("{} levels: {}", name, mix.join(", ")));
    }

    if !summary.recency_histogram.is_empty() {
        lines.push(String::new());
        lines.push("Recency distribution (days):".to_string());
        lines.extend(
            summary
                .recency_histogram
                .iter()
                .map(|bin| format!("  {:>7.1} - {:>7.1}  {}", bin.lower, bin.upper, bin.count)),
        );
    }

    let mut text = lines.join("\n");
    text.push('\n');
    text
}
