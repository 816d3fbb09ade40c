//! Basic usage example for the versioned tree
//!
//! This example demonstrates:
//! - Writing keys and saving versions
//! - Reading historical versions
//! - Diffing two versions
//! - Pruning old versions
//!
//! Run with: cargo run --example basic_usage

use arbor_core::avl::ChangeType;
use arbor_core::{TreeConfig, VersionedTree};
use arbor_store::MemoryKvStore;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "arbor_core=info,basic_usage=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("🌳 Arbor - Basic Usage Example\n");

    let store = Arc::new(MemoryKvStore::new());
    let mut tree = VersionedTree::new(store.clone(), TreeConfig::default());

    // ==================== Writing Versions ====================

    println!("📝 Writing balances...");
    tree.set("alice", "100")?;
    tree.set("bob", "50")?;
    tree.set("carol", "75")?;
    let (hash, v1) = tree.save_version().await?;
    info!(version = v1, root = %hash, "saved first version");
    println!("   ✅ Saved version {v1} with root {}", hash.short());

    tree.set("alice", "80")?;
    tree.set("bob", "70")?;
    tree.remove(b"carol")?;
    tree.set("dave", "25")?;
    let (hash, v2) = tree.save_version().await?;
    println!("   ✅ Saved version {v2} with root {}", hash.short());

    // ==================== Reading History ====================

    println!("\n📖 Reading 'alice' across versions...");
    for version in tree.available_versions() {
        let value = tree.get_versioned(b"alice", version).await?;
        let shown = value.map(|v| String::from_utf8_lossy(&v).into_owned());
        println!("   v{version}: {shown:?}");
    }

    // ==================== Diffing Versions ====================

    println!("\n🔍 Changes from v{v1} to v{v2}:");
    for change in tree.diff_versions(v1, v2).await? {
        let key = String::from_utf8_lossy(&change.key);
        let text = |v: &Option<bytes::Bytes>| {
            v.as_ref()
                .map(|v| String::from_utf8_lossy(v).into_owned())
                .unwrap_or_default()
        };
        match change.change_type {
            ChangeType::Add => println!("   + {key} = {}", text(&change.new_value)),
            ChangeType::Remove => println!("   - {key} (was {})", text(&change.old_value)),
            ChangeType::Modify => println!(
                "   ~ {key}: {} -> {}",
                text(&change.old_value),
                text(&change.new_value)
            ),
        }
    }

    // ==================== Pruning ====================

    tree.set("erin", "10")?;
    let (_, v3) = tree.save_version().await?;
    println!("\n🧹 Saved v{v3}, now pruning v{v1}...");
    println!("   Store holds {} records before", store.len());
    tree.delete_version(v1).await?;
    info!(version = v1, remaining = ?tree.available_versions(), "pruned version");
    println!("   Store holds {} records after", store.len());
    println!("   Remaining versions: {:?}", tree.available_versions());

    match tree.delete_version(v3).await {
        Ok(()) => println!("   ⚠️  Latest version was deleted"),
        Err(e) => println!("   ✅ Latest version is protected: {e}"),
    }

    // ==================== Reopening ====================

    let reopened = VersionedTree::open(store, TreeConfig::default()).await?;
    println!(
        "\n🔁 Reopened at v{:?} with {} keys",
        reopened.latest_version(),
        reopened.size()
    );

    println!("\n✨ Done");
    Ok(())
}
