//! Common fixtures for indexsync integration tests
//!
//! Blog schema:
//! - `blog.author`: name (display)
//! - `blog.post`: title, author → blog.author, tags ← blog.tag.post, modified_on
//! - `blog.tag`: post → blog.post, tag, count, modified_on
//! - `blog.label`: name, posts ↔ blog.post (many-to-many)

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use indexsync::{
    ChangePropagator, FieldDeclaration, IndexDeclaration, IndexRegistry, IndexRuntime,
    MemorySearchEngine,
};
use indexsync_storage::{AttributeMeta, MemoryRecordStore, Record, RecordTypeMeta};

pub struct Fixture {
    pub store: Arc<MemoryRecordStore>,
    pub engine: Arc<MemorySearchEngine>,
    pub runtime: Arc<IndexRuntime>,
    pub propagator: Arc<ChangePropagator>,
}

impl Fixture {
    /// Document ids upserted for `index`, in call order
    pub fn upserted_ids(&self, index: &str) -> Vec<String> {
        self.engine
            .upserts()
            .into_iter()
            .filter(|u| u.index == index)
            .map(|u| u.id)
            .collect()
    }
}

pub fn blog_store() -> Arc<MemoryRecordStore> {
    let store = Arc::new(MemoryRecordStore::new());
    store.register_type(
        RecordTypeMeta::new("blog.author")
            .attribute(AttributeMeta::text("name"))
            .display("name"),
    );
    store.register_type(
        RecordTypeMeta::new("blog.post")
            .attribute(AttributeMeta::text("title"))
            .attribute(AttributeMeta::foreign_key("author", "blog.author"))
            .attribute(AttributeMeta::reverse_foreign_key("tags", "blog.tag", "post"))
            .attribute(AttributeMeta::reverse_many_to_many(
                "labels",
                "blog.label",
                "blog_label_posts",
            ))
            .attribute(AttributeMeta::datetime("modified_on").auto_now()),
    );
    store.register_type(
        RecordTypeMeta::new("blog.tag")
            .attribute(AttributeMeta::foreign_key("post", "blog.post"))
            .attribute(AttributeMeta::text("tag"))
            .attribute(AttributeMeta::integer("count"))
            .attribute(AttributeMeta::datetime("modified_on").auto_now()),
    );
    store.register_type(
        RecordTypeMeta::new("blog.label")
            .attribute(AttributeMeta::text("name"))
            .attribute(AttributeMeta::many_to_many(
                "posts",
                "blog.post",
                "blog_label_posts",
            ))
            .display("name"),
    );
    store
}

/// Post index with nested tags, kept current when tags change
pub fn post_index() -> IndexDeclaration {
    IndexDeclaration::new("blog.post", "search")
        .attribute_fields(["title", "author.name", "tags"])
        .field("labels", FieldDeclaration::joined(", "))
        .depends_on("blog.tag", "tags")
        .depends_on("blog.label", "labels")
}

/// Registered, schema pushed, propagator subscribed with a zero replay buffer
pub fn fixture(declarations: &[IndexDeclaration]) -> Fixture {
    let store = blog_store();
    let mut registry = IndexRegistry::new();
    for declaration in declarations {
        registry.register(store.as_ref(), declaration).unwrap();
    }

    let engine = Arc::new(MemorySearchEngine::new());
    let runtime = Arc::new(
        IndexRuntime::builder(registry.freeze(), store.clone())
            .connection("default", engine.clone(), "{doc_type}")
            .build()
            .unwrap(),
    );
    for index in runtime.bound_indexes().unwrap() {
        index.push_schema().unwrap();
    }

    let propagator = Arc::new(ChangePropagator::with_buffer(
        runtime.clone(),
        Duration::ZERO,
    ));
    store.subscribe(propagator.clone());
    engine.clear_calls();

    Fixture {
        store,
        engine,
        runtime,
        propagator,
    }
}

pub fn save(store: &MemoryRecordStore, record: Record) -> Record {
    store.save(record).unwrap()
}

/// Let the wall clock move past the last `auto_now` stamp
pub fn tick() {
    std::thread::sleep(Duration::from_millis(5));
}
