//! Two components sharing a persisted counter, with a debounced display

use std::time::Duration;

use slotstate::{detect_backend, use_shared_state, StateConfig, StateProvider, UseOptions};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    println!("=== Shared Counter ===\n");

    let config = StateConfig {
        storage_prefix: Some("demo".into()),
        debounce_ms: 200,
        ..StateConfig::default()
    };
    let provider = StateProvider::builder()
        .backend(detect_backend(&config.app_name))
        .config(config)
        .build();

    let (buttons, display) = provider.provide(|| {
        let options = UseOptions::new().persist();
        (
            use_shared_state("counter", 0i64, options).unwrap(),
            use_shared_state("counter", 0i64, options).unwrap(),
        )
    });

    println!("1. Restored value: {}", display.value().unwrap());

    println!("\n2. Clicking three times quickly");
    for _ in 0..3 {
        buttons.update(|n| n + 1).unwrap();
        println!(
            "   value: {} | debounced: {}",
            display.value().unwrap(),
            display.debounced_value()
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    println!("\n3. Waiting for the display to settle");
    tokio::time::sleep(Duration::from_millis(250)).await;
    println!(
        "   value: {} | debounced: {} | renders: {}",
        display.value().unwrap(),
        display.debounced_value(),
        display.renders()
    );

    println!("\n4. Stored snapshot: {:?}", display.stored_value().unwrap());

    println!("\n✓ Run again to see the counter restored from storage.");
}
