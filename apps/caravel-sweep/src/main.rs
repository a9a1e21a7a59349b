//! # Caravel Sweep
//!
//! A standalone CLI walkthrough of the configuration-store retention core.
//! Each scenario builds an in-memory store, spawns the collector, drives a
//! cycle, and shows what survived and why.
//!
//! ## Scenarios
//!
//! ```text
//! prune    old roots beyond the cap are swept, newest survive
//! pinning  plan-referenced and current roots survive any cap
//! race     a write landing mid-scan is taken back out of the sweep
//! ```

use std::sync::Arc;
use std::time::Duration;

use caravel_gc::{GcConfigBuilder, GcCoordinator, GcHandle, Repositories};
use caravel_store::{
    GroupRepository, MemoryDeploymentRepository, MemoryGroupRepository, MemoryVersionedRepository,
    PathId, Plan, RootSnapshot, StoreResult, Version,
};
use futures::stream::BoxStream;
use clap::{Parser, Subcommand};
use colored::*;

// ─── CLI ───────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "caravel-sweep")]
#[command(about = "Retention walkthroughs for the Caravel configuration store")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Basic demo: prune old roots beyond the retention cap
    Prune,
    /// Pinning scenario: plans and the current root protect history
    Pinning,
    /// Race scenario: a write during the scan escapes deletion
    Race,
}

// ─── Fixture ───────────────────────────────────────────────────────────────

/// An in-memory store plus a running collector.
struct Sweep {
    groups: MemoryGroupRepository,
    deployments: MemoryDeploymentRepository,
    handle: GcHandle,
}

impl Sweep {
    fn new(max_versions: usize) -> Self {
        let groups = MemoryGroupRepository::new();
        let deployments = MemoryDeploymentRepository::new();

        let repositories = Repositories {
            apps: Arc::new(MemoryVersionedRepository::new()),
            pods: Arc::new(MemoryVersionedRepository::new()),
            groups: Arc::new(groups.clone()),
            deployments: Arc::new(deployments.clone()),
        };
        let config = GcConfigBuilder::new()
            .max_versions(max_versions)
            .cleaning_interval(0)
            .build();
        let handle = GcCoordinator::spawn(config, repositories);

        Sweep {
            groups,
            deployments,
            handle,
        }
    }

    /// Trigger a cycle and wait for it to finish.
    async fn collect(&self) {
        self.handle.run_gc().await.expect("collector alive");
        loop {
            let stats = self.handle.stats().await.expect("collector alive");
            if stats.cycles_completed >= 1 && stats.scans_started == stats.cycles_completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

// ─── Pretty printing ───────────────────────────────────────────────────────

fn header(text: &str) {
    let bar = "═".repeat(60);
    println!("\n{}", bar.bright_cyan());
    println!("  {}", text.bold().bright_white());
    println!("{}", bar.bright_cyan());
}

fn section(text: &str) {
    println!("\n{} {}", "▸".bright_yellow(), text.bold());
}

fn step(text: &str) {
    println!("  {} {}", "•".bright_green(), text);
}

fn show_roots(groups: &MemoryGroupRepository, pinned: &[Version]) {
    let versions = groups.stored_versions();
    let rendered: Vec<String> = versions
        .iter()
        .map(|v| {
            if pinned.contains(v) {
                format!("{}📌", v).bright_yellow().to_string()
            } else {
                v.to_string().bright_white().to_string()
            }
        })
        .collect();
    println!(
        "  {} [{}]",
        "roots:".bright_cyan(),
        rendered.join(", ")
    );
}

fn show_app(apps: &MemoryVersionedRepository, id: &PathId) {
    let versions: Vec<String> = apps
        .versions_of(id)
        .iter()
        .map(|v| v.to_string())
        .collect();
    println!(
        "  {} {} @ [{}]",
        "app:".bright_cyan(),
        id.to_string().bright_magenta(),
        versions.join(", ")
    );
}

// ─── Scenarios ─────────────────────────────────────────────────────────────

async fn run_prune() {
    header("PRUNE — Oldest Roots Beyond the Cap Are Swept");

    let sweep = Sweep::new(2);

    section("Phase 1: Five root versions accumulate, cap is 2");
    for t in 1..=5 {
        sweep.groups.put_root(RootSnapshot::new(Version(t)));
        step(&format!("stored root version {}", t));
    }
    show_roots(&sweep.groups, &[Version(5)]);

    section("Phase 2: Collection cycle");
    sweep.collect().await;
    step("scan picked the three oldest unpinned roots");
    step("compaction deleted them");

    section("Phase 3: Survivors");
    show_roots(&sweep.groups, &[Version(5)]);
    step("newest history survives, the current root (5) is always pinned");
}

async fn run_pinning() {
    header("PINNING — Plans and the Current Root Protect History");

    let sweep = Sweep::new(1);

    section("Phase 1: Three roots, cap of 1, a plan still holds root 1");
    for t in 1..=3 {
        sweep.groups.put_root(RootSnapshot::new(Version(t)));
    }
    let plan = Plan::new(
        "rollback-a1",
        RootSnapshot::new(Version(1)),
        RootSnapshot::new(Version(3)),
    );
    sweep.deployments.put_plan(&plan);
    step("plan 'rollback-a1' pins roots 1 and 3");
    show_roots(&sweep.groups, &[Version(1), Version(3)]);

    section("Phase 2: Collection cycle");
    sweep.collect().await;

    section("Phase 3: Survivors");
    show_roots(&sweep.groups, &[Version(1), Version(3)]);
    step("two roots survive a cap of 1: both are pinned, only root 2 was garbage");
}

/// Group repository that lingers on the current-root read, leaving a window
/// to land a store inside the scanning phase.
#[derive(Clone)]
struct PacedGroups {
    inner: MemoryGroupRepository,
    read_delay: Duration,
}

#[async_trait::async_trait]
impl GroupRepository for PacedGroups {
    fn root_versions(&self) -> BoxStream<'_, StoreResult<Version>> {
        self.inner.root_versions()
    }

    async fn root(&self) -> StoreResult<RootSnapshot> {
        tokio::time::sleep(self.read_delay).await;
        self.inner.root().await
    }

    async fn root_version(&self, version: Version) -> StoreResult<Option<RootSnapshot>> {
        self.inner.root_version(version).await
    }

    async fn delete_root_version(&self, version: Version) -> StoreResult<()> {
        self.inner.delete_root_version(version).await
    }
}

async fn run_race() {
    header("RACE — A Write During the Scan Escapes the Sweep");

    let apps = MemoryVersionedRepository::new();
    let groups = MemoryGroupRepository::new();
    let web = PathId::new("/prod/web");

    section("Phase 1: App history beyond the cap");
    groups.put_root_version(RootSnapshot::new(Version(1)));
    groups.put_root(RootSnapshot::new(Version(2)).with_app("/prod/web", Version(12)));
    for v in [10, 11, 12] {
        apps.put_version("/prod/web", Version(v));
    }
    show_app(&apps, &web);
    step("current root references only version 12; 10 and 11 look like garbage");

    let repositories = Repositories {
        apps: Arc::new(apps.clone()),
        pods: Arc::new(MemoryVersionedRepository::new()),
        groups: Arc::new(PacedGroups {
            inner: groups.clone(),
            read_delay: Duration::from_millis(300),
        }),
        deployments: Arc::new(MemoryDeploymentRepository::new()),
    };
    let config = GcConfigBuilder::new()
        .max_versions(1)
        .cleaning_interval(0)
        .build();
    let handle = GcCoordinator::spawn(config, repositories);

    section("Phase 2: Cycle runs; version 11 is re-announced mid-scan");
    handle.run_gc().await.expect("collector alive");
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle
        .store_app(web.clone(), Some(Version(11)))
        .await
        .expect("collector alive");
    step("writer acknowledged immediately, store recorded against the scan");
    loop {
        let stats = handle.stats().await.expect("collector alive");
        if stats.cycles_completed >= 1 && stats.scans_started == stats.cycles_completed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    section("Phase 3: Survivors");
    show_app(&apps, &web);
    step("version 10 was swept; the re-announced 11 and the referenced 12 survive");
}

// ─── Entry point ───────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Prune => run_prune().await,
        Commands::Pinning => run_pinning().await,
        Commands::Race => run_race().await,
    }
}
