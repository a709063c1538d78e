//! Order data sources.
//!
//! Provides the `DataSource` trait and its CSV implementation for the Olist
//! exports (orders and items, plus optional customers, products, category
//! translations, payments and reviews), and an explicit dataset cache keyed by
//! source identity and content version.

mod cache;

pub use cache::{CacheConfig, DatasetCache};

use rfmkit_model::{
    CategoryTranslation, CategoryTranslationRecord, Customer, CustomerRecord, Order, OrderItem,
    OrderItemRecord, OrderRecord, Payment, PaymentRecord, Product, ProductRecord, Review,
    ReviewRecord, RfmError,
};
use serde::de::DeserializeOwned;
use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use thiserror::Error;

/// Errors from loading order data.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error in {path} at line {line}: {message}")]
    Csv {
        path: PathBuf,
        line: u64,
        message: String,
    },

    #[error("Invalid record in {path} at line {line}: {source}")]
    Record {
        path: PathBuf,
        line: u64,
        #[source]
        source: RfmError,
    },
}

/// Orders and their line items, plus whichever side tables were configured.
///
/// Side tables are empty when their file is not part of the source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub orders: Vec<Order>,
    pub items: Vec<OrderItem>,
    pub customers: Vec<Customer>,
    pub products: Vec<Product>,
    pub categories: Vec<CategoryTranslation>,
    pub payments: Vec<Payment>,
    pub reviews: Vec<Review>,
}

/// Identity of a loaded dataset: where it came from and which version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DatasetKey {
    pub source: String,
    pub version: u64,
}

/// Trait for order data sources (CSV files, fixtures, ...).
pub trait DataSource {
    /// Load the full dataset.
    fn load(&self) -> impl Future<Output = Result<Dataset, SourceError>> + Send;

    /// Cheap identity of the current content; changes when the data changes.
    fn fingerprint(&self) -> impl Future<Output = Result<DatasetKey, SourceError>> + Send;

    /// Get the source name for logging.
    fn name(&self) -> &'static str;
}

/// File names of the Olist public dataset.
pub mod olist {
    pub const ORDERS: &str = "orders_dataset.csv";
    pub const ITEMS: &str = "order_items_dataset.csv";
    pub const CUSTOMERS: &str = "customers_dataset.csv";
    pub const PRODUCTS: &str = "products_dataset.csv";
    pub const CATEGORIES: &str = "product_category_name_translation.csv";
    pub const PAYMENTS: &str = "order_payments_dataset.csv";
    pub const REVIEWS: &str = "order_reviews_dataset.csv";
}

/// CSV source configuration.
#[derive(Debug, Clone)]
pub struct CsvSourceConfig {
    /// Path to the orders export
    pub orders_path: PathBuf,
    /// Path to the order items export
    pub items_path: PathBuf,
    pub customers_path: Option<PathBuf>,
    pub products_path: Option<PathBuf>,
    /// Category name translation table
    pub categories_path: Option<PathBuf>,
    pub payments_path: Option<PathBuf>,
    pub reviews_path: Option<PathBuf>,
}

impl CsvSourceConfig {
    /// Orders and items only.
    pub fn new(orders_path: impl Into<PathBuf>, items_path: impl Into<PathBuf>) -> Self {
        Self {
            orders_path: orders_path.into(),
            items_path: items_path.into(),
            customers_path: None,
            products_path: None,
            categories_path: None,
            payments_path: None,
            reviews_path: None,
        }
    }

    /// Every Olist table under `dir`, using the standard file names.
    pub fn olist(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            customers_path: Some(dir.join(olist::CUSTOMERS)),
            products_path: Some(dir.join(olist::PRODUCTS)),
            categories_path: Some(dir.join(olist::CATEGORIES)),
            payments_path: Some(dir.join(olist::PAYMENTS)),
            reviews_path: Some(dir.join(olist::REVIEWS)),
            ..Self::new(dir.join(olist::ORDERS), dir.join(olist::ITEMS))
        }
    }

    /// Drop side tables whose file does not exist. Orders and items stay required.
    pub fn without_missing_tables(mut self) -> Self {
        for slot in self.side_tables_mut() {
            if let Some(path) = slot.as_ref().filter(|p| !p.is_file()) {
                tracing::debug!(path = %path.display(), "Skipping missing table");
                *slot = None;
            }
        }
        self
    }

    fn side_tables_mut(&mut self) -> [&mut Option<PathBuf>; 5] {
        [
            &mut self.customers_path,
            &mut self.products_path,
            &mut self.categories_path,
            &mut self.payments_path,
            &mut self.reviews_path,
        ]
    }

    /// Every configured file, required ones first.
    fn paths(&self) -> Vec<&PathBuf> {
        let side = [
            &self.customers_path,
            &self.products_path,
            &self.categories_path,
            &self.payments_path,
            &self.reviews_path,
        ];
        [&self.orders_path, &self.items_path]
            .into_iter()
            .chain(side.into_iter().flatten())
            .collect()
    }
}

/// Orders and items read from CSV files, with optional side tables.
#[derive(Debug, Clone)]
pub struct CsvSource {
    config: CsvSourceConfig,
}

impl CsvSource {
    pub fn new(config: CsvSourceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CsvSourceConfig {
        &self.config
    }

    fn identity(&self) -> String {
        let paths: Vec<String> = self
            .config
            .paths()
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        format!("csv:{}", paths.join("|"))
    }
}

impl DataSource for CsvSource {
    async fn load(&self) -> Result<Dataset, SourceError> {
        let config = &self.config;

        tracing::debug!(
            orders = %config.orders_path.display(),
            items = %config.items_path.display(),
            "Loading CSV dataset"
        );

        let dataset = Dataset {
            orders: load_table::<OrderRecord, Order>(&config.orders_path).await?,
            items: load_table::<OrderItemRecord, OrderItem>(&config.items_path).await?,
            customers: load_side_table::<CustomerRecord, Customer>(&config.customers_path).await?,
            products: load_side_table::<ProductRecord, Product>(&config.products_path).await?,
            categories: load_side_table::<CategoryTranslationRecord, CategoryTranslation>(
                &config.categories_path,
            )
            .await?,
            payments: load_side_table::<PaymentRecord, Payment>(&config.payments_path).await?,
            reviews: load_side_table::<ReviewRecord, Review>(&config.reviews_path).await?,
        };

        tracing::info!(
            orders = dataset.orders.len(),
            items = dataset.items.len(),
            customers = dataset.customers.len(),
            products = dataset.products.len(),
            payments = dataset.payments.len(),
            reviews = dataset.reviews.len(),
            "Loaded CSV dataset"
        );

        Ok(dataset)
    }

    async fn fingerprint(&self) -> Result<DatasetKey, SourceError> {
        let mut hasher = DefaultHasher::new();
        for path in self.config.paths() {
            let meta = tokio::fs::metadata(path).await.map_err(|source| SourceError::Io {
                path: path.clone(),
                source,
            })?;
            meta.len().hash(&mut hasher);
            meta.modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_nanos())
                .hash(&mut hasher);
        }

        Ok(DatasetKey {
            source: self.identity(),
            version: hasher.finish(),
        })
    }

    fn name(&self) -> &'static str {
        "csv"
    }
}

/// Parse orders from CSV; `origin` is only used in error messages.
pub fn read_orders<R: Read>(reader: R, origin: &Path) -> Result<Vec<Order>, SourceError> {
    read_records::<R, OrderRecord, Order>(reader, origin)
}

/// Parse order items from CSV; `origin` is only used in error messages.
pub fn read_items<R: Read>(reader: R, origin: &Path) -> Result<Vec<OrderItem>, SourceError> {
    read_records::<R, OrderItemRecord, OrderItem>(reader, origin)
}

pub fn read_customers<R: Read>(reader: R, origin: &Path) -> Result<Vec<Customer>, SourceError> {
    read_records::<R, CustomerRecord, Customer>(reader, origin)
}

pub fn read_products<R: Read>(reader: R, origin: &Path) -> Result<Vec<Product>, SourceError> {
    read_records::<R, ProductRecord, Product>(reader, origin)
}

pub fn read_category_translations<R: Read>(
    reader: R,
    origin: &Path,
) -> Result<Vec<CategoryTranslation>, SourceError> {
    read_records::<R, CategoryTranslationRecord, CategoryTranslation>(reader, origin)
}

pub fn read_payments<R: Read>(reader: R, origin: &Path) -> Result<Vec<Payment>, SourceError> {
    read_records::<R, PaymentRecord, Payment>(reader, origin)
}

/// Parse reviews; comment fields may span several lines.
pub fn read_reviews<R: Read>(reader: R, origin: &Path) -> Result<Vec<Review>, SourceError> {
    read_records::<R, ReviewRecord, Review>(reader, origin)
}

/// Read typed rows, reporting the line each bad row starts on.
fn read_records<R, Raw, T>(reader: R, origin: &Path) -> Result<Vec<T>, SourceError>
where
    R: Read,
    Raw: DeserializeOwned,
    T: TryFrom<Raw, Error = RfmError>,
{
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let csv_error = |line: u64, e: &csv::Error| SourceError::Csv {
        path: origin.to_path_buf(),
        line,
        message: e.to_string(),
    };

    let headers = csv_reader.headers().map_err(|e| csv_error(1, &e))?.clone();

    let mut row = csv::StringRecord::new();
    let mut records = Vec::new();
    // Header is line 1.
    let mut next_line = 2;
    loop {
        let more = csv_reader
            .read_record(&mut row)
            .map_err(|e| csv_error(e.position().map_or(next_line, |p| p.line()), &e))?;
        if !more {
            break;
        }

        let line = row.position().map_or(next_line, |p| p.line());
        next_line = line + 1;

        let raw: Raw = row
            .deserialize(Some(&headers))
            .map_err(|e| csv_error(line, &e))?;
        let record = T::try_from(raw).map_err(|source| SourceError::Record {
            path: origin.to_path_buf(),
            line,
            source,
        })?;
        records.push(record);
    }

    Ok(records)
}

async fn load_table<Raw, T>(path: &Path) -> Result<Vec<T>, SourceError>
where
    Raw: DeserializeOwned,
    T: TryFrom<Raw, Error = RfmError>,
{
    let raw = tokio::fs::read(path).await.map_err(|source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    read_records::<_, Raw, T>(raw.as_slice(), path)
}

async fn load_side_table<Raw, T>(path: &Option<PathBuf>) -> Result<Vec<T>, SourceError>
where
    Raw: DeserializeOwned,
    T: TryFrom<Raw, Error = RfmError>,
{
    match path {
        Some(path) => load_table::<Raw, T>(path).await,
        None => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDERS_CSV: &str = "\
order_id,customer_id,order_status,order_purchase_timestamp,order_approved_at,order_delivered_carrier_date,order_delivered_customer_date,order_estimated_delivery_date
e481f51cbdc54678b7cc49136f2d6af7,9ef432eb6251297304e76186b10a928d,delivered,2017-10-02 10:56:33,2017-10-02 11:07:15,2017-10-04 19:55:00,2017-10-10 21:25:13,2017-10-18 00:00:00
53cdb2fc8bc7dce0b6741e2150273451,b0830fb4747a6c6d20dea0b8c802d7ef,delivered,2018-07-24 20:41:37,2018-07-26 03:24:27,2018-07-26 14:31:00,2018-08-07 15:27:45,2018-08-13 00:00:00
136cce7faa42fdb2cefd53fdc79a6098,ed0271e0b7da060a393796590e7b737a,invoiced,2017-04-11 12:22:08,2017-04-13 13:25:17,,,2017-05-09 00:00:00
";

    const ITEMS_CSV: &str = "\
order_id,order_item_id,product_id,seller_id,shipping_limit_date,price,freight_value
e481f51cbdc54678b7cc49136f2d6af7,1,87285b34884572647811a353c7ac498a,3504c0cb71d7fa48d967e0e4c94d59d9,2017-10-06 11:07:15,29.99,8.72
53cdb2fc8bc7dce0b6741e2150273451,1,595fac2a385ac33a80bd5114aec74eb8,289cdb325fb7e7f891c38608bf9e0962,2018-07-30 03:24:27,118.70,22.76
53cdb2fc8bc7dce0b6741e2150273451,2,595fac2a385ac33a80bd5114aec74eb8,289cdb325fb7e7f891c38608bf9e0962,2018-07-30 03:24:27,118.70,22.76
";

    #[test]
    fn test_read_orders() {
        let orders = read_orders(ORDERS_CSV.as_bytes(), Path::new("orders.csv")).unwrap();
        assert_eq!(orders.len(), 3);
        assert_eq!(orders[0].customer_id, "9ef432eb6251297304e76186b10a928d");
        assert_eq!(orders[0].is_late(), Some(false));
        assert_eq!(orders[2].delivered_customer_date, None);
        assert_eq!(orders[2].status.as_deref(), Some("invoiced"));
    }

    #[test]
    fn test_read_items() {
        let items = read_items(ITEMS_CSV.as_bytes(), Path::new("items.csv")).unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[1].order_item_id, Some(1));
        assert_eq!(items[2].order_item_id, Some(2));
        assert_eq!(items[2].price, 118.70);
    }

    #[test]
    fn test_bad_timestamp_reports_line() {
        let csv = "order_id,customer_id,order_purchase_timestamp\n\
                   o1,c1,2017-10-02 10:56:33\n\
                   o2,c2,yesterday\n";

        let err = read_orders(csv.as_bytes(), Path::new("orders.csv")).unwrap_err();
        match err {
            SourceError::Record { line, source, .. } => {
                assert_eq!(line, 3);
                assert!(matches!(source, RfmError::InvalidTimestamp { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_column_is_missing_field() {
        let csv = "order_id,order_purchase_timestamp\no1,2017-10-02 10:56:33\n";
        let err = read_orders(csv.as_bytes(), Path::new("orders.csv")).unwrap_err();
        assert!(matches!(
            err,
            SourceError::Record {
                source: RfmError::MissingField { field: "customer_id", .. },
                ..
            }
        ));
    }

    #[test]
    fn test_ragged_row_is_csv_error() {
        let csv = "order_id,customer_id,order_purchase_timestamp\no1,c1\n";
        let err = read_orders(csv.as_bytes(), Path::new("orders.csv")).unwrap_err();
        assert!(matches!(err, SourceError::Csv { line: 2, .. }));
    }

    #[test]
    fn test_multiline_review_reports_starting_line() {
        let csv = "review_id,order_id,review_score,review_comment_title,review_comment_message\n\
                   r1,o1,5,,\"chegou antes\ndo prazo\"\n\
                   r2,o2,9,,ruim\n";

        let err = read_reviews(csv.as_bytes(), Path::new("reviews.csv")).unwrap_err();
        match err {
            SourceError::Record { line, source, .. } => {
                assert_eq!(line, 4);
                assert!(matches!(source, RfmError::InvalidNumber { field: "review_score", .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_read_side_tables() {
        let payments = "order_id,payment_sequential,payment_type,payment_installments,payment_value\n\
                        o1,1,credit_card,3,120.50\n\
                        o1,2,voucher,1,10.00\n";
        let payments = read_payments(payments.as_bytes(), Path::new("payments.csv")).unwrap();
        assert_eq!(payments.len(), 2);
        assert_eq!(payments[1].payment_type, "voucher");

        let products = "product_id,product_category_name,product_weight_g\n\
                        p1,perfumaria,225\n\
                        p2,,1000\n";
        let products = read_products(products.as_bytes(), Path::new("products.csv")).unwrap();
        assert_eq!(products[0].category.as_deref(), Some("perfumaria"));
        assert_eq!(products[1].category, None);

        let categories = "product_category_name,product_category_name_english\n\
                          perfumaria,perfumery\n";
        let categories =
            read_category_translations(categories.as_bytes(), Path::new("categories.csv")).unwrap();
        assert_eq!(categories[0].english, "perfumery");

        let customers = "customer_id,customer_unique_id,customer_zip_code_prefix,customer_city,customer_state\n\
                         c1,u1,14409,franca,SP\n";
        let customers = read_customers(customers.as_bytes(), Path::new("customers.csv")).unwrap();
        assert_eq!(customers[0].state, "SP");
    }

    #[test]
    fn test_olist_config_paths() {
        let config = CsvSourceConfig::olist("data");
        assert_eq!(config.orders_path, Path::new("data").join(olist::ORDERS));
        assert_eq!(config.paths().len(), 7);
        assert_eq!(CsvSourceConfig::new("o.csv", "i.csv").paths().len(), 2);
    }
}
