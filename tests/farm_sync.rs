//! Two nodes sharing one store, linked by loopback transports.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use infocache::domain::{FieldValue, FullNameResolution, ObjectType, TypeDescriptor};
use infocache::farm::{FarmTask, TaskKind};
use infocache::infra::{LoopbackTransport, MemoryStore};
use infocache::node::NodeContext;
use infocache::provider::{CompositeFullName, IndexStats, ObjectProvider, ObjectStore};
use infocache::registry::{CommandTable, Module, RegistryError};
use serde_json::Value;

struct Peer {
    node: NodeContext,
    link: Arc<LoopbackTransport>,
    users: Arc<ObjectProvider>,
}

struct Cluster {
    a: Peer,
    b: Peer,
    store: Arc<MemoryStore>,
}

fn user_type() -> Arc<TypeDescriptor> {
    TypeDescriptor::builder(ObjectType::new("cms.user").expect("type"))
        .id_column("UserID")
        .name_column("UserName")
        .guid_column("UserGUID")
        .touch_cache_dependencies(true)
        .build()
        .expect("descriptor")
}

fn peer(name: &str, store: &Arc<MemoryStore>) -> Peer {
    let link = Arc::new(LoopbackTransport::new());
    let node = NodeContext::builder(name, link.clone())
        .build()
        .expect("node");
    let store: Arc<dyn ObjectStore> = store.clone();
    let users = node
        .add_provider(node.provider_builder(user_type(), store).build())
        .expect("provider");
    Peer { node, link, users }
}

fn cluster() -> Cluster {
    let store = Arc::new(MemoryStore::new());
    store.seed(
        &ObjectType::new("cms.user").expect("type"),
        [[
            ("UserID".to_string(), FieldValue::Int(1)),
            ("UserName".to_string(), FieldValue::from("alice")),
        ]
        .into_iter()
        .collect()],
    );
    let a = peer("node-a", &store);
    let b = peer("node-b", &store);
    a.link.connect(b.node.inbox().clone());
    b.link.connect(a.node.inbox().clone());
    Cluster { a, b, store }
}

#[tokio::test]
async fn clear_hashtables_reaches_the_peer() {
    let cluster = cluster();
    cluster.b.users.get_by_id(1, true).await.expect("warm peer");
    assert_ne!(cluster.b.users.stats(), IndexStats::default());

    cluster
        .a
        .users
        .clear_hashtables(true)
        .await
        .expect("clear");

    let sent = cluster.a.link.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind(), TaskKind::ClearHashtables);
    assert_eq!(sent[0].target(), "cms.user");

    let report = cluster.b.node.consumer().consume_all().await;
    assert_eq!(report.applied, 1);
    assert_eq!(cluster.b.users.stats(), IndexStats::default());
}

#[tokio::test]
async fn updates_invalidate_the_peer_copy() {
    let cluster = cluster();
    let stale = cluster
        .b
        .users
        .get_by_id(1, true)
        .await
        .expect("lookup")
        .expect("found");
    assert_eq!(stale.code_name(), Some("alice"));

    let alice = cluster
        .a
        .users
        .get_by_id(1, true)
        .await
        .expect("lookup")
        .expect("found");
    let renamed = alice.to_mutable().with("UserName", "alicia").expect("rename");
    cluster.a.users.set(renamed).await.expect("update");

    let sent = cluster.a.link.take_sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind(), TaskKind::InvalidateObject);
    assert_eq!(sent[0].data()[..2], ["1".to_string(), "alicia".to_string()]);

    cluster.b.node.consumer().consume_all().await;
    let fresh = cluster
        .b
        .users
        .get_by_id(1, true)
        .await
        .expect("lookup")
        .expect("found");
    assert_eq!(fresh.code_name(), Some("alicia"));
    assert!(
        cluster
            .b
            .users
            .get_by_name("alice", false)
            .await
            .expect("lookup")
            .is_none()
    );
}

#[tokio::test]
async fn inserts_assign_ids_visible_to_the_peer() {
    let cluster = cluster();
    cluster
        .store
        .set_next_id(&ObjectType::new("cms.user").expect("type"), 7);
    assert!(
        cluster
            .b
            .users
            .get_by_id(7, false)
            .await
            .expect("lookup")
            .is_none()
    );

    let created = cluster
        .a
        .users
        .set(cluster.a.users.new_object().with("UserName", "bob").expect("set"))
        .await
        .expect("insert");
    assert_eq!(created.id(), Some(7));

    cluster.b.node.consumer().consume_all().await;
    let seen = cluster
        .b
        .users
        .get_by_id(7, false)
        .await
        .expect("lookup")
        .expect("negative entry evicted");
    assert_eq!(seen.guid(), created.guid());
}

fn manufacturers(node: &NodeContext, store: &Arc<MemoryStore>) -> Arc<ObjectProvider> {
    let descriptor = TypeDescriptor::builder(ObjectType::new("ecommerce.manufacturer").expect("type"))
        .id_column("ManufacturerID")
        .name_column("ManufacturerName")
        .full_name_resolution(FullNameResolution::PersistedFirst)
        .build()
        .expect("descriptor");
    let store: Arc<dyn ObjectStore> = store.clone();
    node.add_provider(
        node.provider_builder(descriptor, store)
            .full_name_scheme(Arc::new(CompositeFullName::new("SiteName")))
            .build(),
    )
    .expect("provider")
}

#[tokio::test]
async fn manufacturer_lifecycle_across_two_nodes() {
    let cluster = cluster();
    let a = manufacturers(&cluster.a.node, &cluster.store);
    let b = manufacturers(&cluster.b.node, &cluster.store);
    cluster
        .store
        .set_next_id(&ObjectType::new("ecommerce.manufacturer").expect("type"), 7);

    let acme = a
        .new_object()
        .with("ManufacturerName", "Acme")
        .and_then(|object| object.with("SiteName", "site1"))
        .expect("working copy");
    let created = a.set(acme).await.expect("insert");
    assert_eq!(created.id(), Some(7));

    let by_id = a.get_by_id(7, true).await.expect("lookup").expect("found");
    let by_name = a.get_by_name("Acme", true).await.expect("lookup").expect("found");
    let by_full_name = a
        .get_by_full_name("site1.Acme", true)
        .await
        .expect("lookup")
        .expect("found");
    assert!(Arc::ptr_eq(&by_id, &created));
    assert!(Arc::ptr_eq(&by_name, &created));
    assert!(Arc::ptr_eq(&by_full_name, &created));
    let stats = a.stats();
    assert_eq!((stats.by_id, stats.by_name, stats.by_full_name), (1, 1, 1));

    b.get_by_full_name("site1.Acme", true).await.expect("warm peer");
    assert_ne!(b.stats(), IndexStats::default());

    a.clear_hashtables(true).await.expect("clear");
    assert_eq!(a.stats(), IndexStats::default());
    let report = cluster.b.node.consumer().consume_all().await;
    assert_eq!(report.applied, 1);
    assert_eq!(b.stats(), IndexStats::default());
}

#[tokio::test]
async fn own_tasks_are_skipped() {
    let cluster = cluster();
    cluster
        .a
        .users
        .clear_hashtables(true)
        .await
        .expect("clear");
    for task in cluster.a.link.take_sent() {
        cluster.a.node.inbox().push(task);
    }

    let report = cluster.a.node.consumer().consume_all().await;
    assert_eq!(report.received, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.applied, 0);
}

#[tokio::test]
async fn redelivered_tasks_apply_once() {
    let cluster = cluster();
    let task = FarmTask::new(
        TaskKind::ClearHashtables,
        "cms.user",
        Vec::new(),
        None,
        "node-c",
    );

    cluster.b.node.inbox().push(task.clone());
    cluster.b.node.inbox().push(task.clone());
    let first = cluster.b.node.consumer().consume_all().await;
    assert_eq!((first.applied, first.skipped), (1, 1));

    cluster.b.node.inbox().push(task);
    let second = cluster.b.node.consumer().consume_all().await;
    assert_eq!((second.applied, second.skipped), (0, 1));
}

#[tokio::test]
async fn malformed_tasks_fail_without_stopping_the_batch() {
    let cluster = cluster();
    cluster.b.users.get_by_id(1, true).await.expect("warm");
    cluster.b.node.inbox().push(FarmTask::new(
        TaskKind::UpdateFile,
        "logo.png",
        Vec::new(),
        None,
        "node-c",
    ));
    cluster.b.node.inbox().push(FarmTask::new(
        TaskKind::ClearHashtables,
        "",
        Vec::new(),
        None,
        "node-c",
    ));

    let report = cluster.b.node.consumer().consume_all().await;
    assert_eq!(report.failed, 1);
    assert_eq!(report.applied, 1);
    assert_eq!(cluster.b.users.stats(), IndexStats::default());
}

#[tokio::test]
async fn prototype_removal_reaches_the_peer() {
    let cluster = cluster();
    cluster
        .b
        .node
        .read_only_objects()
        .get_read_only_object("cms.user", true)
        .expect("prototype");
    assert_eq!(cluster.b.node.read_only_objects().len(), 1);

    cluster
        .a
        .node
        .read_only_objects()
        .remove_read_only_object("cms.user", true)
        .await
        .expect("remove");
    cluster.b.node.consumer().consume_all().await;

    assert!(cluster.b.node.read_only_objects().is_empty());
}

#[tokio::test]
async fn disabled_farm_sends_nothing() {
    let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
    let link = Arc::new(LoopbackTransport::new());
    let node = NodeContext::builder("solo", link.clone())
        .farm_enabled(false)
        .build()
        .expect("node");
    let users = node
        .add_provider(node.provider_builder(user_type(), store).build())
        .expect("provider");

    users.clear_hashtables(true).await.expect("clear");
    users
        .set(users.new_object().with("UserName", "carol").expect("set"))
        .await
        .expect("insert");

    assert!(link.sent().is_empty());
}

struct Counter {
    total: Arc<AtomicI64>,
}

impl Module for Counter {
    fn name(&self) -> &str {
        "counter"
    }

    fn register_commands(&self, commands: &mut CommandTable) {
        let total = Arc::clone(&self.total);
        commands.register("bump", move |args| {
            let step = args
                .first()
                .and_then(Value::as_str)
                .and_then(|value| value.parse::<i64>().ok())
                .ok_or_else(|| RegistryError::command("expected an integer step"))?;
            Ok(Value::from(total.fetch_add(step, Ordering::SeqCst) + step))
        });
    }
}

#[tokio::test]
async fn commands_replay_on_every_peer() {
    let cluster = cluster();
    let totals = [Arc::new(AtomicI64::new(0)), Arc::new(AtomicI64::new(0))];
    for (peer, total) in [&cluster.a, &cluster.b].into_iter().zip(&totals) {
        peer.node
            .modules()
            .register_module(Arc::new(Counter {
                total: Arc::clone(total),
            }))
            .expect("register");
    }

    let local = cluster
        .a
        .node
        .modules()
        .broadcast_command("counter", "bump", &["3".to_string()])
        .await
        .expect("broadcast");
    assert_eq!(local, Value::from(3));

    let report = cluster.b.node.consumer().consume_all().await;
    assert_eq!(report.applied, 1);
    assert_eq!(totals[0].load(Ordering::SeqCst), 3);
    assert_eq!(totals[1].load(Ordering::SeqCst), 3);
}
