// Demonstration driver for the sync provider engine.
//
// Wires a `SyncProvider` to an in-memory `EntryStore` and walks it through
// an initial load, a live write, and a refresh-and-persist search so the
// whole pipeline (write hook -> matcher -> queue -> drainer, search hook ->
// refresh engine) runs end to end without a real directory backend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use syncprov::{
    Csn, EntrySnapshot, Filter, InMemoryEntryStore, Scope, SyncProvider, SyncProviderConfig,
    SyncRequestControl, SyncRequestMode, WriteKind,
};
use tracing::info;
use uuid::Uuid;

fn entry(ndn: &str, uuid: Uuid, csn: &str) -> EntrySnapshot {
    EntrySnapshot {
        dn: ndn.to_string(),
        ndn: ndn.to_string(),
        uuid,
        entry_csn: csn.into(),
        attrs: HashMap::new(),
    }
}

#[tokio::main]
async fn main() -> syncprov::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    info!("syncprovd starting up");

    let suffix = "dc=example,dc=com".to_string();
    let store = Arc::new(InMemoryEntryStore::new());
    store.put(entry(&suffix, Uuid::new_v4(), "c0"));
    store.put(entry(
        "cn=alice,dc=example,dc=com",
        Uuid::new_v4(),
        "c0",
    ));

    let mut config = SyncProviderConfig::default();
    config.checkpoint_ops = 5;
    let provider = SyncProvider::new(suffix.clone(), store.clone(), config, Csn::from("c0"));

    info!(csn = %provider.context_csn(), "initial context csn");

    let (refresh, search) = provider
        .handle_search(
            1,
            suffix.clone(),
            Scope::Subtree,
            Filter::present_objectclass(),
            "(objectClass=*)".to_string(),
            SyncRequestControl {
                mode: SyncRequestMode::RefreshAndPersist,
                cookie: None,
                reload_hint: false,
            },
        )
        .await?;
    info!(entries = refresh.add_entries.len(), "initial refresh delivered");
    let search = search.expect("refresh-and-persist always yields a persistent search");

    let uuid = Uuid::new_v4();
    let ndn = "cn=bob,dc=example,dc=com".to_string();
    store.put(entry(&ndn, uuid, "placeholder"));
    let csn = provider
        .handle_write(
            WriteKind::Add,
            ndn.clone(),
            ndn.clone(),
            uuid,
            false,
            None,
            Some(entry(&ndn, uuid, "placeholder")),
        )
        .await?;
    info!(%csn, dn = %ndn, "wrote a new entry under the watched suffix");

    tokio::time::sleep(Duration::from_millis(50)).await;
    info!(
        pending = search.pending_count(),
        "events queued for the persistent search's subscriber"
    );

    provider.shutdown().await;
    info!("syncprovd shutting down");
    Ok(())
}
