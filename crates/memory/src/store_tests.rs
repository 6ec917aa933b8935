//! Checks every `SessionStore` backend runs through.

use parley_core::error::StoreError;
use parley_core::message::{Message, SessionId};
use parley_core::session::SessionStore;
use std::sync::Arc;

/// Appends race a delete of the same session. Whatever order they land in,
/// the session ends deleted: no messages, no listing, no resurrection.
pub async fn append_racing_delete(store: Arc<dyn SessionStore>) {
    let id = SessionId::from("contested");
    store.append(&id, Message::user("first")).await.unwrap();

    let writers: Vec<_> = (0..16)
        .map(|i| {
            let store = store.clone();
            let id = id.clone();
            tokio::spawn(async move { store.append(&id, Message::user(format!("msg {i}"))).await })
        })
        .collect();
    let deleter = {
        let store = store.clone();
        let id = id.clone();
        tokio::spawn(async move { store.delete(&id).await })
    };

    assert!(deleter.await.unwrap().unwrap());
    for writer in writers {
        match writer.await.unwrap() {
            Ok(_) | Err(StoreError::SessionDeleted(_)) => {}
            Err(other) => panic!("unexpected append error: {other}"),
        }
    }

    assert!(store.is_deleted(&id).await.unwrap());
    assert!(store.meta(&id).await.unwrap().is_none());
    assert!(store.list_sessions().await.unwrap().is_empty());
    assert!(store.get(&id).await.is_err());
    assert!(matches!(
        store.append(&id, Message::assistant("late reply")).await,
        Err(StoreError::SessionDeleted(_))
    ));
}
