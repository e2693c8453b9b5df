use agentllm::model::Message;
use agentllm::persistence::{
    ConversationData, ConversationStore, FileStore, InMemoryStore,
};

async fn exercise_store(store: &dyn ConversationStore) {
    // Saved ids show up in list, deleted ones disappear, resaves do not
    // duplicate.
    store
        .save(&ConversationData::new("chat:1", vec![Message::user("a")]))
        .await
        .unwrap();
    store
        .save(&ConversationData::new("chat:2", vec![Message::user("b")]))
        .await
        .unwrap();
    store
        .save(&ConversationData::new("chat:1", vec![Message::user("a2")]))
        .await
        .unwrap();

    let mut ids = store.list().await.unwrap();
    ids.sort();
    assert_eq!(ids.len(), 2);

    store.delete("chat:2").await.unwrap();
    assert_eq!(store.list().await.unwrap().len(), 1);

    let loaded = store.load("chat:1").await.unwrap().unwrap();
    assert_eq!(loaded.messages[0].content.as_deref(), Some("a2"));
    assert!(store.load("chat:2").await.unwrap().is_none());
}

#[tokio::test]
async fn memory_store_contract() {
    let store = InMemoryStore::new();
    exercise_store(&store).await;
}

#[tokio::test]
async fn file_store_contract() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path().join("conversations"));
    exercise_store(&store).await;

    // The surviving file carries the sanitized name.
    let entries: Vec<String> = std::fs::read_dir(dir.path().join("conversations"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(entries, vec!["chat_1.json"]);
}

#[tokio::test]
async fn file_store_persists_across_instances() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("conversations");

    {
        let store = FileStore::new(&path);
        store
            .save(&ConversationData::new(
                "durable",
                vec![Message::user("hello"), Message::assistant("hi")],
            ))
            .await
            .unwrap();
    }

    let reopened = FileStore::new(&path);
    let loaded = reopened.load("durable").await.unwrap().unwrap();
    assert_eq!(loaded.messages.len(), 2);
    assert_eq!(loaded.session_id, "durable");
}
