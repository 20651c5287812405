use super::*;

fn settings(topic: &str) -> SubscriptionSettings {
    SubscriptionSettings::for_topic(topic)
}

#[test]
fn test_publish_endpoint_with_prefix_and_environment() {
    let naming = NamingConvention::new(Some("billing"), Some("prod"));
    assert_eq!(
        naming.resolve_publish_endpoint(&settings("orders")),
        "billing-prod-orders"
    );
}

#[test]
fn test_publish_endpoint_without_convention() {
    let naming = NamingConvention::default();
    assert_eq!(naming.resolve_publish_endpoint(&settings("orders")), "orders");
}

#[test]
fn test_queue_name_defaults_to_qualified_topic() {
    let naming = NamingConvention::new(None, Some("staging"));
    assert_eq!(naming.resolve_queue_name(&settings("orders")), "staging-orders");
}

#[test]
fn test_explicit_queue_name_is_not_prefixed() {
    let naming = NamingConvention::new(Some("billing"), Some("prod"));
    let mut s = settings("orders");
    s.queue_name = Some("order-audit".to_string());
    assert_eq!(naming.resolve_queue_name(&s), "order-audit");
    assert_eq!(naming.resolve_publish_endpoint(&s), "billing-prod-orders");
}

#[test]
fn test_instance_position_suffix() {
    let naming = NamingConvention::new(None, Some("prod"));
    let mut s = settings("orders");
    s.instance_position = Some(3);
    assert_eq!(naming.resolve_queue_name(&s), "prod-orders-3");
    assert_eq!(naming.resolve_error_queue_name(&s), "prod-orders-3_error");
}

#[test]
fn test_hierarchical_names_are_flattened() {
    let naming = NamingConvention::new(Some("Shop"), None);
    assert_eq!(
        naming.resolve_publish_endpoint(&settings("Orders.Placed")),
        "shop-orders-placed"
    );
}

#[test]
fn test_queue_name_fits_with_error_suffix() {
    let naming = NamingConvention::new(Some("a-rather-long-application-prefix"), Some("production"));
    let mut s = settings(&"x".repeat(100));
    s.instance_position = Some(12);
    let queue = naming.resolve_queue_name(&s);
    let error_queue = naming.resolve_error_queue_name(&s);
    assert!(queue.ends_with("-12"));
    assert!(error_queue.len() <= MAX_QUEUE_NAME_LEN);
}

#[test]
fn test_empty_topic_resolves_to_empty_names() {
    let naming = NamingConvention::new(Some("billing"), Some("prod"));
    assert_eq!(naming.resolve_publish_endpoint(&settings("  ")), "");
    assert_eq!(naming.resolve_queue_name(&settings("")), "");
}

#[test]
fn test_resolution_is_deterministic() {
    let naming = NamingConvention::new(Some("billing"), Some("prod"));
    let mut s = settings("orders");
    s.instance_position = Some(1);
    assert_eq!(naming.resolve_queue_name(&s), naming.resolve_queue_name(&s));
    assert_eq!(
        naming.resolve_publish_endpoint(&s),
        naming.resolve_publish_endpoint(&s)
    );
}
