//! Example: Sync one keylist into a keyring, printing progress
//!
//! Run with: cargo run --example sync_keylist -- <authority-fingerprint> <keylist-url> [keyserver]

use std::sync::Arc;
use std::time::Duration;

use keylist_sync::{
    FetcherOptions, GnuPg, HttpFetcher, KeylistDocument, ProgressEvent, Refresher, Stage,
    SyncStatus,
};

#[tokio::main]
async fn main() -> keylist_sync::Result<()> {
    let mut args = std::env::args().skip(1);
    let (Some(authority), Some(url)) = (args.next(), args.next()) else {
        eprintln!("usage: sync_keylist <authority-fingerprint> <keylist-url> [keyserver]");
        std::process::exit(2);
    };
    let keyserver = args.next().unwrap_or_else(|| "hkps://keys.openpgp.org".to_string());

    let gpg = GnuPg::new().timeout(120);
    if !gpg.is_available().await {
        eprintln!("gpg is not available");
        std::process::exit(1);
    }

    let keylist = KeylistDocument::new(&authority, &keyserver)?
        .with_keylist_url(url)
        .into_shared();
    let refresher = Refresher::new(
        Arc::new(gpg),
        Arc::new(HttpFetcher::new(FetcherOptions::default())?),
    );

    let handle = refresher.start(&keylist, true)?;
    while !handle.is_finished() {
        if let Some(event) = handle.try_recv_progress() {
            println!("{}", format_progress(&event));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    handle.join().await;

    match keylist.lock().status() {
        SyncStatus::Synced(at) => println!("Synced {}", at.format("%B %d, %I:%M %p")),
        SyncStatus::Warning { warning, .. } => println!("Synced with warnings:\n\n{warning}"),
        SyncStatus::Error(error) => println!("Sync error:\n\n{error}"),
        SyncStatus::Never => println!("Sync canceled"),
        SyncStatus::Syncing => println!("Syncing now..."),
    }

    Ok(())
}

fn format_progress(event: &ProgressEvent) -> String {
    match event.stage {
        Stage::FetchingKeys => format!("[{}/{}] fetching", event.current_key, event.total_keys),
        Stage::ValidatingKeys => format!("[{}/{}] validating", event.current_key, event.total_keys),
        stage => format!("{stage:?}"),
    }
}
