//! Constructs one sample build graph, drains it through the scheduler with
//! hermetic execution and local caching, verifies the finished graph, and
//! round-trips one blob through the remote CAS and one action through the
//! REAPI adapter — a thin demonstration harness over this workspace's
//! build-engine crates, not a CLI.

use kiln::demo::run_sample_build_twice;
use kiln_cas::{build_router as cas_router, BlobStore, CasClient, ServerConfig as CasServerConfig};
use kiln_hash::{hash_bytes, Action, Platform};
use kiln_reapi::{build_router as reapi_router, ActionRequest, Capabilities, FixedExecutor, ReapiClient};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "kiln=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("\n╔════════════════════════════════════════════════════════╗");
    println!("║                   KILN BUILD ENGINE                     ║");
    println!("║   content-addressed, hermetic, distributable builds     ║");
    println!("╚════════════════════════════════════════════════════════╝\n");

    let workspace = tempfile::tempdir()?;

    println!("🏗️  Building sample graph (parse → compile → link) twice...");
    let (first, second) = run_sample_build_twice(workspace.path())?;

    println!("  Build order: {}", first.order.iter().map(|t| t.as_str()).collect::<Vec<_>>().join(" → "));
    println!("  First pass:  {} executed, {} cached", count_misses(&first), count_hits(&first));
    println!("  Second pass: {} executed, {} cached", count_misses(&second), count_hits(&second));
    println!("  Proof bundle valid: {}", second.proof.is_valid());
    println!("  Proof fingerprint matches across runs: {}", first.proof.fingerprint == second.proof.fingerprint);
    println!();

    println!("📦 Round-tripping one blob through the remote CAS...");
    run_cas_roundtrip().await?;
    println!();

    println!("🌐 Round-tripping one action through the REAPI adapter...");
    run_reapi_roundtrip().await?;
    println!();

    println!("✅ Done.");
    Ok(())
}

fn count_hits(summary: &kiln::demo::BuildSummary) -> usize {
    summary.outcomes.iter().filter(|o| o.cache_hit).count()
}

fn count_misses(summary: &kiln::demo::BuildSummary) -> usize {
    summary.outcomes.iter().filter(|o| !o.cache_hit).count()
}

async fn run_cas_roundtrip() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let store = Arc::new(BlobStore::open(dir.path(), 16 * 1024 * 1024, true)?);
    let router = cas_router(store, CasServerConfig::default());

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>()).await;
    });

    let client = CasClient::new(format!("http://{addr}"))?;
    let blob = b"kiln build artifact".to_vec();
    let digest = hash_bytes(&blob);
    client.put(&digest, blob.clone()).await?;
    let fetched = client.get(&digest).await?;
    println!("  Stored and fetched {} bytes, digest {}", fetched.len(), digest);
    assert_eq!(fetched, blob);
    Ok(())
}

async fn run_reapi_roundtrip() -> Result<(), Box<dyn std::error::Error>> {
    let outcome = kiln_reapi::ActionResult { exit_code: 0, stdout: b"linked kiln-demo\n".to_vec(), stderr: Vec::new(), output_files: Vec::new() };
    let router = reapi_router(Arc::new(FixedExecutor(outcome)));

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });

    let action = Action {
        command: vec!["ld".into(), "-o".into(), "kiln-demo".into()],
        env: vec![],
        inputs: vec![],
        outputs: vec!["kiln-demo".into()],
        platform: Platform(vec![("os-family".into(), "linux".into())]),
        timeout_ms: 30_000,
        salt: None,
    };
    let request = ActionRequest::from_action(&action, Capabilities::from_platform(&action.platform), 128);
    let client = ReapiClient::new(format!("http://{addr}"));
    let result = client.execute(&request, Duration::from_secs(5)).await?;
    println!("  Remote execution exit code {}, stdout: {}", result.exit_code, String::from_utf8_lossy(&result.stdout).trim());
    Ok(())
}
