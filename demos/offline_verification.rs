//! Offline proof verification example
//!
//! A writer publishes a root hash and hands out proofs. A reader holding
//! only the root checks them without ever seeing the tree.
//!
//! Run with: cargo run --example offline_verification

use arbor_core::proof::{
    codec, verify_absence, verify_existence, verify_op_chain, ProofOperator, TreeProofOp,
};
use arbor_core::{TreeConfig, VersionedTree};
use arbor_crypto::Blake3Hash;
use arbor_store::MemoryKvStore;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "arbor_core=info,offline_verification=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("🔐 Arbor - Offline Verification Example\n");

    // ==================== Writer Side ====================

    let mut tree = VersionedTree::new(Arc::new(MemoryKvStore::new()), TreeConfig::default());
    for i in 0..64u32 {
        tree.set(format!("user/{i:04}"), format!("profile-{i}"))?;
    }
    let (root, version) = tree.save_version().await?;
    let published = root.to_hex();
    info!(version, root = %published, "published root");
    println!("📢 Published root for v{version}: {published}");

    let (value, present) = tree.get_versioned_with_proof(b"user/0042", version).await?;
    let value = value.ok_or_else(|| anyhow::anyhow!("user/0042 missing"))?;
    let present_bytes = codec::encode(&present);
    println!(
        "   Existence proof: {} bytes, {}...",
        present_bytes.len(),
        &hex::encode(&present_bytes)[..32]
    );

    let (_, absent) = tree.get_versioned_with_proof(b"user/0042x", version).await?;
    let absent_bytes = codec::encode(&absent);
    println!("   Absence proof: {} bytes", absent_bytes.len());

    // ==================== Reader Side ====================

    let trusted = Blake3Hash::from_hex(&published)?;

    println!("\n🔎 Verifying with only the root hash...");
    verify_existence(&present_bytes, b"user/0042", &value, &trusted)?;
    println!("   ✅ user/0042 = {}", String::from_utf8_lossy(&value));

    verify_absence(&absent_bytes, b"user/0042x", &trusted)?;
    println!("   ✅ user/0042x is absent");

    match verify_existence(&present_bytes, b"user/0042", b"forged", &trusted) {
        Ok(()) => println!("   ⚠️  Forged value accepted"),
        Err(e) => {
            warn!(error = %e, "forged value rejected");
            println!("   ✅ Forged value rejected: {e}");
        }
    }

    match verify_absence(&absent_bytes, b"user/0041", &trusted) {
        Ok(()) => println!("   ⚠️  Present key proven absent"),
        Err(e) => println!("   ✅ Absence of a present key rejected: {e}"),
    }

    // ==================== Proof Operators ====================

    println!("\n📦 Wrapping the proof as a portable operator...");
    let op = TreeProofOp::from_proof(b"user/0042".to_vec(), present);
    let json = serde_json::to_string_pretty(&op.proof_op())?;
    println!("{json}");

    let decoded = TreeProofOp::decode(&serde_json::from_str(&json)?)?;
    let ops: [&dyn ProofOperator; 1] = [&decoded];
    let keys: [&[u8]; 1] = [b"user/0042"];
    verify_op_chain(&ops, &trusted, &keys, vec![value.to_vec()])?;
    println!("   ✅ Operator chain reaches the published root");

    Ok(())
}
