use rfmkit_source::{olist, CsvSource, CsvSourceConfig, DataSource, DatasetCache, SourceError};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const ORDERS_HEADER: &str = "order_id,customer_id,order_status,order_purchase_timestamp,order_approved_at,order_delivered_carrier_date,order_delivered_customer_date,order_estimated_delivery_date";
const ITEMS_HEADER: &str = "order_id,order_item_id,product_id,seller_id,shipping_limit_date,price,freight_value";

fn write_dataset(dir: &Path, orders: &[&str], items: &[&str]) -> CsvSourceConfig {
    let orders_path = dir.join("orders_dataset.csv");
    let items_path = dir.join("order_items_dataset.csv");

    let mut orders_csv = vec![ORDERS_HEADER];
    orders_csv.extend_from_slice(orders);
    let mut items_csv = vec![ITEMS_HEADER];
    items_csv.extend_from_slice(items);

    fs::write(&orders_path, orders_csv.join("\n")).unwrap();
    fs::write(&items_path, items_csv.join("\n")).unwrap();

    CsvSourceConfig::new(orders_path, items_path)
}

#[tokio::test]
async fn loads_both_files() {
    let dir = TempDir::new().unwrap();
    let config = write_dataset(
        dir.path(),
        &[
            "o1,c1,delivered,2018-08-01 10:00:00,,,2018-08-05 10:00:00,2018-08-10 00:00:00",
            "o2,c2,shipped,2018-09-01 10:00:00,,,,2018-09-20 00:00:00",
        ],
        &["o1,1,p1,s1,2018-08-03 00:00:00,10.50,2.00", "o2,1,p2,s1,2018-09-03 00:00:00,99.90,5.00"],
    );

    let dataset = CsvSource::new(config).load().await.unwrap();
    assert_eq!(dataset.orders.len(), 2);
    assert_eq!(dataset.items.len(), 2);
    assert_eq!(dataset.orders[1].status.as_deref(), Some("shipped"));
    assert_eq!(dataset.items[1].price, 99.90);
}

#[tokio::test]
async fn missing_file_is_io_error() {
    let dir = TempDir::new().unwrap();
    let config = CsvSourceConfig::new(dir.path().join("nope.csv"), dir.path().join("nope2.csv"));

    let err = CsvSource::new(config).load().await.unwrap_err();
    assert!(matches!(err, SourceError::Io { .. }));
}

#[tokio::test]
async fn invalid_price_reports_file_and_line() {
    let dir = TempDir::new().unwrap();
    let config = write_dataset(
        dir.path(),
        &["o1,c1,delivered,2018-08-01 10:00:00,,,,"],
        &["o1,1,p1,s1,2018-08-03 00:00:00,ten,2.00"],
    );

    let err = CsvSource::new(config).load().await.unwrap_err();
    match err {
        SourceError::Record { path, line, .. } => {
            assert!(path.ends_with("order_items_dataset.csv"));
            assert_eq!(line, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn cache_follows_file_changes() {
    let dir = TempDir::new().unwrap();
    let config = write_dataset(
        dir.path(),
        &["o1,c1,delivered,2018-08-01 10:00:00,,,,"],
        &["o1,1,p1,s1,2018-08-03 00:00:00,10.00,2.00"],
    );
    let source = CsvSource::new(config.clone());
    let cache = DatasetCache::default();

    let first = cache.get_or_load(&source).await.unwrap();
    let again = cache.get_or_load(&source).await.unwrap();
    assert!(Arc::ptr_eq(&first, &again));

    // A longer file always yields a new version, regardless of mtime granularity.
    write_dataset(
        dir.path(),
        &[
            "o1,c1,delivered,2018-08-01 10:00:00,,,,",
            "o2,c1,delivered,2018-08-15 10:00:00,,,,",
        ],
        &[
            "o1,1,p1,s1,2018-08-03 00:00:00,10.00,2.00",
            "o2,1,p1,s1,2018-08-17 00:00:00,10.00,2.00",
        ],
    );

    let reloaded = cache.get_or_load(&source).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &reloaded));
    assert_eq!(reloaded.orders.len(), 2);
}

#[tokio::test]
async fn loads_side_tables_present_in_dir() {
    let dir = TempDir::new().unwrap();
    write_dataset(
        dir.path(),
        &["o1,c1,delivered,2018-08-01 10:00:00,,,,"],
        &["o1,1,p1,s1,2018-08-03 00:00:00,10.00,2.00"],
    );
    fs::write(
        dir.path().join(olist::PAYMENTS),
        "order_id,payment_sequential,payment_type,payment_installments,payment_value\n\
         o1,1,boleto,1,12.00\n",
    )
    .unwrap();
    fs::write(
        dir.path().join(olist::REVIEWS),
        "review_id,order_id,review_score,review_comment_title,review_comment_message,review_creation_date,review_answer_timestamp\n\
         r1,o1,1,,\"produto errado\nveio quebrado\",2018-08-06 00:00:00,2018-08-07 10:00:00\n",
    )
    .unwrap();

    let config = CsvSourceConfig::olist(dir.path()).without_missing_tables();
    assert!(config.customers_path.is_none());
    assert!(config.payments_path.is_some());

    let dataset = CsvSource::new(config).load().await.unwrap();
    assert_eq!(dataset.payments[0].payment_type, "boleto");
    assert!(dataset.reviews[0].is_negative());
    assert_eq!(
        dataset.reviews[0].comment_message.as_deref(),
        Some("produto errado\nveio quebrado")
    );
    assert!(dataset.customers.is_empty());
    assert!(dataset.products.is_empty());
}
