use anyhow::{Context, Result};
use serde_json::json;
use std::env;
use std::sync::Arc;

use usage_measurement::logging::init_tracing;
use usage_measurement::{
    AppConfig, PageContext, SqliteSettingsStore, TargetResolver, TrackerRegistry,
};

fn main() -> Result<()> {
    init_tracing();

    let args: Vec<String> = env::args().collect();
    let config = AppConfig::from_env();

    match args.get(1).map(String::as_str) {
        Some("targets") => run_targets(&config),
        Some("settings") => run_show_settings(&config),
        Some("history") => run_history(&config),
        Some("set") => {
            let key = args.get(2).context("Missing setting name")?;
            let value = args.get(3).map(String::as_str).unwrap_or("");
            run_set(&config, key, value)
        }
        Some("request") => {
            let page_url = args.get(2).context("Missing page url")?;
            run_request(&config, page_url)
        }
        _ => {
            print_usage();
            Ok(())
        }
    }
}

fn print_usage() {
    println!("usage-measurement {}", usage_measurement::VERSION);
    println!();
    println!("Commands:");
    println!("  targets                 Print the targets usage data is sent to");
    println!("  settings                Print the stored settings");
    println!("  history                 Print the settings change log");
    println!("  set <name> [value]      Change a setting (empty value clears it)");
    println!("  request <page-url>      Print the request each tracker would send");
    println!();
    println!("Environment: USAGE_LOCAL_URL, USAGE_SETTINGS_DB, USAGE_LOG");
}

fn open_store(config: &AppConfig) -> Result<SqliteSettingsStore> {
    SqliteSettingsStore::open(&config.settings_db)
}

fn run_targets(config: &AppConfig) -> Result<()> {
    let store = open_store(config)?;
    let settings = store.read()?;
    let targets = TargetResolver::new(&config.local_base_url).resolve(&settings);

    println!("{}", serde_json::to_string_pretty(&targets)?);
    Ok(())
}

fn run_show_settings(config: &AppConfig) -> Result<()> {
    let settings = open_store(config)?.read()?;
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

fn run_history(config: &AppConfig) -> Result<()> {
    for change in open_store(config)?.history()? {
        println!(
            "{}  {}",
            change.changed_at.to_rfc3339(),
            serde_json::to_string(&change.settings)?
        );
    }
    Ok(())
}

fn run_set(config: &AppConfig, key: &str, value: &str) -> Result<()> {
    let store = open_store(config)?;
    let mut settings = store.read()?;
    settings.set_value(key, value)?;
    store.save(&settings)?;

    println!("✓ {} updated", key);
    Ok(())
}

fn run_request(config: &AppConfig, page_url: &str) -> Result<()> {
    let store = Arc::new(open_store(config)?);
    let mut registry = TrackerRegistry::new(TargetResolver::new(&config.local_base_url), store)
        .with_page(PageContext::new(page_url))
        .with_access_variable("user");

    let outcome = registry.dispatch("getRequest", &[json!("")])?;
    if outcome.results.is_empty() {
        println!("No target enabled - nothing would be sent");
        return Ok(());
    }

    for (tracker, request) in registry.trackers().iter().zip(&outcome.results) {
        println!("{}?{}", tracker.tracker_url(), request.as_str().unwrap_or_default());
    }
    Ok(())
}
