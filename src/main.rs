//! Caravel Retention Stress Runner
//!
//! This binary provides a command-line interface for running stress tests
//! against the configuration-store retention core: concurrent writers,
//! deployment-plan churn, and collection cycles all at once.

pub mod stress_test;

use stress_test::{stress_test_plan_churn, stress_test_retention};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let rt = tokio::runtime::Runtime::new().expect("tokio runtime");

    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 {
        match args[1].as_str() {
            "quick" => rt.block_on(run_quick()),
            "churn" => rt.block_on(run_churn()),
            "plans" => rt.block_on(run_plans()),
            "full" => rt.block_on(run_full()),
            "help" | "--help" | "-h" => print_usage(),
            _ => {
                println!("Unknown test suite: {}", args[1]);
                print_usage();
            }
        }
    } else {
        rt.block_on(run_quick());
    }
}

fn print_usage() {
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║            CARAVEL RETENTION STRESS SUITE                  ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    println!();
    println!("Usage: cargo run [test_suite]");
    println!();
    println!("Available test suites:");
    println!("  quick    - Quick smoke run (default)");
    println!("  churn    - Heavy app/pod/root churn with concurrent cycles");
    println!("  plans    - Deployment-plan pinning under churn");
    println!("  full     - Complete suite (takes longer)");
    println!("  help     - Show this help message");
    println!();
}

async fn run_quick() {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║            QUICK SMOKE RUN                                 ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    let stats = stress_test_retention(4, 100, 5).await;
    stats.print();
    assert!(stats.invariants_held);

    let stats = stress_test_plan_churn(4, 50, 3).await;
    stats.print();
    assert!(stats.invariants_held);

    println!("\n✓ Quick run completed successfully!");
}

async fn run_churn() {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║            RETENTION CHURN STRESS                          ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    for (writers, ops, cap) in [(4, 200, 5), (8, 400, 3), (16, 400, 10)] {
        let stats = stress_test_retention(writers, ops, cap).await;
        stats.print();
        assert!(stats.invariants_held);
    }

    println!("\n✓ Churn stress completed successfully!");
}

async fn run_plans() {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║            PLAN PINNING STRESS                             ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    for (writers, ops, cap) in [(4, 100, 3), (8, 200, 5)] {
        let stats = stress_test_plan_churn(writers, ops, cap).await;
        stats.print();
        assert!(stats.invariants_held);
    }

    println!("\n✓ Plan stress completed successfully!");
}

async fn run_full() {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║            FULL STRESS SUITE                               ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    run_churn().await;
    run_plans().await;

    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║            ✓ FULL SUITE COMPLETED SUCCESSFULLY             ║");
    println!("╚════════════════════════════════════════════════════════════╝");
}
