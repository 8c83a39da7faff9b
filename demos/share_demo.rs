//! Walk-through of a share session
//!
//! Run with: cargo run --example share_demo [STATE_DIR]
//!
//! Uploads a file, redeems its code, lets the code rotate and finally lets
//! the session expire. Short windows are used so the whole lifecycle fits in
//! a few seconds:
//!
//! - code validity: 2s
//! - file retention: 5s
//! - scheduler tick: 250ms
//!
//! Set `RUST_LOG=codeshare_rs=debug` to see every tick.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use codeshare_rs::{RegistryConfig, SessionStore, UploadFile};
use tokio::io::AsyncReadExt;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("codeshare_rs=info".parse()?)
                .add_directive("share_demo=info".parse()?),
        )
        .init();

    let state_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("codeshare-demo"));

    let config = RegistryConfig::in_dir(&state_dir)
        .code_validity(Duration::from_secs(2))
        .file_retention(Duration::from_secs(5))
        .tick_interval(Duration::from_millis(250));
    let store = Arc::new(SessionStore::open(config).await?);
    let scheduler = store.spawn_scheduler();

    println!("State directory: {}", state_dir.display());

    // Upload
    let code = store
        .create(vec![
            UploadFile::new("hello.txt", "Hello from codeshare!\n"),
            UploadFile::new("notes.txt", "Codes rotate, files stay.\n"),
        ])
        .await?;
    println!("Share this code: {}", code);

    // Download
    let view = store.resolve(code.as_str()).await?;
    println!(
        "Code {} -> {:?} (code expires in {}s)",
        view.code,
        view.filenames(),
        view.code_seconds_remaining(Utc::now())
    );
    for name in view.filenames() {
        let mut file = view.open(name).await?;
        let mut content = String::new();
        file.read_to_string(&mut content).await?;
        print!("  {}: {}", name, content);
    }
    let downloads = store.confirm_download(&view).await?;
    println!("Downloads so far: {}", downloads);
    drop(view);

    // Rotation
    tokio::time::sleep(Duration::from_secs(3)).await;
    match store.resolve(code.as_str()).await {
        Ok(_) => println!("Code {} still valid", code),
        Err(e) => println!("Old code rejected: {}", e),
    }
    for active in store.codes().await {
        let view = store.resolve(active.as_str()).await?;
        println!("Now shared as {} ({} downloads)", active, view.downloads);
    }

    // Expiry
    tokio::time::sleep(Duration::from_secs(3)).await;
    let stats = store.stats().await;
    println!(
        "After retention: {} sessions, {} pending deletions",
        stats.sessions, stats.pending_deletions
    );

    scheduler.shutdown().await;
    Ok(())
}
