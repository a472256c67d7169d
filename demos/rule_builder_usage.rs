// demos/rule_builder_usage.rs
//
// Builds a nested rule tree and commits it into a shared store.
//
// Run with: cargo run --example rule_builder_usage

use rule_builder::{
    to_rule_object, BuilderConfig, BuilderError, Criteria, Operator, RuleBuilder, RuleStore,
    StaticParameterSource,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), BuilderError> {
    println!("=== Rule Builder - Usage Example ===\n");

    let store = RuleStore::new();
    let mut builder = RuleBuilder::start_session(&store, BuilderConfig::default());

    // Field names arrive in the background
    let fetch = builder.attach_parameter_source(Arc::new(StaticParameterSource::new(vec![
        "email".to_string(),
        "city".to_string(),
    ])))?;

    // age > 18
    let adult = builder.add_leaf_rule();
    builder.set_leaf_field(adult, "age")?;
    builder.set_leaf_operator(adult, Operator::GreaterThan)?;
    builder.set_leaf_value(adult, "18")?;

    // any of: city = Paris, city = Lyon
    let cities = builder.add_nested_group();
    builder.set_group_criteria(cities, Criteria::Any)?;
    for city in ["Paris", "Lyon"] {
        let leaf = builder.add_leaf_rule_to(cities)?;
        builder.set_leaf_field(leaf, "city")?;
        builder.set_leaf_operator(leaf, Operator::Equal)?;
        builder.set_leaf_value(leaf, city)?;
    }

    match fetch.await {
        Ok(true) => println!("Parameter fetch completed"),
        Ok(false) => println!("Parameter fetch returned nothing, using defaults"),
        Err(e) => println!("Parameter fetch task failed: {}", e),
    }
    println!("Field options: {:?}", builder.field_options());
    println!("Tree depth: {}", builder.root().depth());
    println!("Rule object: {}", to_rule_object(builder.rules()));

    builder.commit_local(&store);
    builder.commit_root(&store)?;

    println!("\nStore holds {} top-level nodes:", store.len());
    for node in store.snapshot() {
        println!(
            "{}",
            serde_json::to_string_pretty(&node).unwrap_or_else(|e| e.to_string())
        );
    }

    Ok(())
}
