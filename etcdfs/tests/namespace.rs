use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;

use etcdfs::error::{FsError, StoreError};
use etcdfs::ns::{Entry, NamespaceService, NodeKind, Permissions, RetryPolicy};
use etcdfs::store::{KvEntry, KvStore, MemoryStore};

/// Hands control back to the scheduler between a writer's read and its put,
/// so concurrent writers interleave their read-modify-write cycles.
struct YieldingStore {
    inner: MemoryStore,
    puts: AtomicU32,
}

impl YieldingStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            puts: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl KvStore for YieldingStore {
    async fn get(&self, key: &str, prefix: bool) -> Result<Vec<KvEntry>, StoreError> {
        self.inner.get(key, prefix).await
    }

    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        expected_revision: Option<i64>,
    ) -> Result<i64, StoreError> {
        tokio::task::yield_now().await;
        self.puts.fetch_add(1, Ordering::Relaxed);
        self.inner.put(key, value, expected_revision).await
    }

    async fn delete(&self, key: &str, prefix: bool) -> Result<u64, StoreError> {
        self.inner.delete(key, prefix).await
    }

    async fn delete_tree(&self, key: &str) -> Result<u64, StoreError> {
        self.inner.delete_tree(key).await
    }
}

/// Fails every delete once `down` is set, as if the cluster became
/// unreachable mid-operation.
struct UnreachableStore {
    inner: MemoryStore,
    down: AtomicBool,
}

impl UnreachableStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            down: AtomicBool::new(false),
        }
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::Relaxed) {
            return Err(StoreError::InvalidData("transport down".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for UnreachableStore {
    async fn get(&self, key: &str, prefix: bool) -> Result<Vec<KvEntry>, StoreError> {
        self.inner.get(key, prefix).await
    }

    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        expected_revision: Option<i64>,
    ) -> Result<i64, StoreError> {
        self.inner.put(key, value, expected_revision).await
    }

    async fn delete(&self, key: &str, prefix: bool) -> Result<u64, StoreError> {
        self.check()?;
        self.inner.delete(key, prefix).await
    }

    async fn delete_tree(&self, key: &str) -> Result<u64, StoreError> {
        self.check()?;
        self.inner.delete_tree(key).await
    }
}

fn service() -> NamespaceService<MemoryStore> {
    NamespaceService::new(
        Arc::new(MemoryStore::new()),
        Permissions::default(),
        RetryPolicy::immediate(8),
    )
}

fn names(entries: &[Entry]) -> Vec<&str> {
    entries.iter().map(|e| e.name.as_str()).collect()
}

#[tokio::test]
async fn write_then_read_round_trips() {
    let ns = service();
    let h = ns.create("/greeting").await.unwrap();
    assert_eq!(h.write(0, b"hello world").await.unwrap(), 11);
    assert_eq!(h.read(0, 64).await.unwrap(), b"hello world");
    assert_eq!(h.read(6, 5).await.unwrap(), b"world");

    // An empty write leaves the value alone.
    assert_eq!(h.write(3, b"").await.unwrap(), 0);
    assert_eq!(h.read(0, 64).await.unwrap(), b"hello world");
}

#[tokio::test]
async fn write_splices_in_place() {
    let ns = service();
    let h = ns.create("/f").await.unwrap();
    h.write(0, b"abcdef").await.unwrap();
    h.write(2, b"XY").await.unwrap();
    assert_eq!(h.read(0, 64).await.unwrap(), b"abXYef");
    assert_eq!(ns.get_attr("/f").await.unwrap().size, 6);
}

#[tokio::test]
async fn write_past_end_zero_fills_the_gap() {
    let ns = service();
    let h = ns.create("/f").await.unwrap();
    h.write(0, b"ab").await.unwrap();
    h.write(5, b"Z").await.unwrap();
    assert_eq!(h.read(0, 64).await.unwrap(), b"ab\0\0\0Z");
}

#[tokio::test]
async fn read_past_end_is_empty() {
    let ns = service();
    let h = ns.create("/f").await.unwrap();
    h.write(0, b"abc").await.unwrap();
    assert!(h.read(3, 10).await.unwrap().is_empty());
    assert!(h.read(100, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn getattr_agrees_with_parent_listing() {
    let ns = service();
    for p in ["/etc/app/conf", "/etc/app/keys/a", "/etc/hosts", "/etc/hostsfile"] {
        ns.create(p).await.unwrap();
    }
    for dir in ["/", "/etc", "/etc/app"] {
        for e in ns.open_dir(dir).await.unwrap() {
            let child = format!("{}/{}", dir.trim_end_matches('/'), e.name);
            let attrs = ns.get_attr(&child).await.unwrap();
            assert_eq!(attrs.kind, e.kind, "{child}");
        }
    }
    let etc = ns.open_dir("/etc").await.unwrap();
    assert_eq!(names(&etc), vec!["app", "hosts", "hostsfile"]);
}

#[tokio::test]
async fn value_with_children_is_a_directory_in_both_views() {
    let ns = service();
    let h = ns.create("/a").await.unwrap();
    h.write(0, b"hello").await.unwrap();
    ns.create("/a/b").await.unwrap();

    let attrs = ns.get_attr("/a").await.unwrap();
    assert_eq!(attrs.kind, NodeKind::Directory);
    assert_eq!(attrs.size, 0);
    assert_eq!(
        ns.open_dir("/").await.unwrap(),
        vec![Entry {
            name: "a".into(),
            kind: NodeKind::Directory
        }]
    );
    assert_eq!(names(&ns.open_dir("/a").await.unwrap()), vec!["b"]);
}

#[tokio::test]
async fn rmdir_removes_everything_nested() {
    let ns = service();
    for p in ["/d/x", "/d/y/z", "/d/y/w/v", "/keep"] {
        ns.create(p).await.unwrap();
    }
    ns.rmdir("/d").await.unwrap();
    assert!(matches!(ns.get_attr("/d").await, Err(FsError::NotFound(_))));
    assert!(ns.open_dir("/d").await.unwrap().is_empty());
    assert_eq!(names(&ns.open_dir("/").await.unwrap()), vec!["keep"]);
    assert!(matches!(ns.rmdir("/d").await, Err(FsError::NotFound(_))));
}

#[tokio::test]
async fn failed_rmdir_leaves_the_tree_intact() {
    let store = Arc::new(UnreachableStore::new());
    let ns = NamespaceService::new(store.clone(), Permissions::default(), RetryPolicy::immediate(1));
    let h = ns.create("/d").await.unwrap();
    h.write(0, b"content").await.unwrap();
    ns.create("/d/x").await.unwrap();

    store.down.store(true, Ordering::Relaxed);
    assert!(matches!(ns.rmdir("/d").await, Err(FsError::Io(_))));

    let keys: Vec<String> = store
        .get("/", true)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.key)
        .collect();
    assert_eq!(keys, vec!["/d", "/d/x"]);
    assert_eq!(ns.get_attr("/d").await.unwrap().kind, NodeKind::Directory);

    store.down.store(false, Ordering::Relaxed);
    ns.rmdir("/d").await.unwrap();
    assert!(store.get("/", true).await.unwrap().is_empty());
}

#[tokio::test]
async fn oversized_write_is_refused_without_touching_the_value() {
    let ns = service().with_max_value_size(16);
    let h = ns.create("/f").await.unwrap();
    h.write(0, b"abc").await.unwrap();

    for offset in [u64::MAX - 10, 1 << 40, 16] {
        match h.write(offset, b"x").await {
            Err(e @ FsError::TooLarge { .. }) => assert_eq!(e.errno(), libc::EFBIG),
            other => panic!("expected too large, got {other:?}"),
        }
    }
    assert_eq!(h.write(15, b"x").await.unwrap(), 1);
    assert_eq!(ns.get_attr("/f").await.unwrap().size, 16);
}

#[tokio::test]
async fn unlink_then_getattr_is_not_found() {
    let ns = service();
    ns.create("/f").await.unwrap();
    ns.unlink("/f").await.unwrap();
    assert!(matches!(ns.get_attr("/f").await, Err(FsError::NotFound(_))));
}

#[tokio::test]
async fn handle_outlives_unlink_but_reads_not_found() {
    let ns = service();
    let h = ns.create("/f").await.unwrap();
    h.write(0, b"x").await.unwrap();
    ns.unlink("/f").await.unwrap();
    assert!(matches!(h.read(0, 1).await, Err(FsError::NotFound(_))));
    h.release().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_disjoint_writes_all_land() {
    const WRITERS: usize = 8;
    let store = Arc::new(YieldingStore::new());
    let ns = Arc::new(NamespaceService::new(
        store.clone(),
        Permissions::default(),
        RetryPolicy::immediate(32),
    ));
    let h = ns.create("/shared").await.unwrap();
    h.write(0, &[b'.'; WRITERS]).await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..WRITERS {
        let ns = ns.clone();
        tasks.push(tokio::spawn(async move {
            let h = ns.open("/shared").await.unwrap();
            h.write(i as u64, &[b'a' + i as u8]).await.unwrap();
        }));
    }
    for t in tasks {
        t.await.unwrap();
    }

    let value = h.read(0, 64).await.unwrap();
    assert_eq!(value, b"abcdefgh");
    assert!(store.puts.load(Ordering::Relaxed) as usize >= WRITERS + 2);
}

#[tokio::test]
async fn exhausted_retries_report_conflict_and_keep_value() {
    let store = Arc::new(MemoryStore::new());
    let ns = NamespaceService::new(store.clone(), Permissions::default(), RetryPolicy::immediate(3));
    let h = ns.create("/f").await.unwrap();
    h.write(0, b"stable").await.unwrap();

    store.inject_conflicts(3);
    match h.write(0, b"XX").await {
        Err(FsError::Conflict { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("expected conflict, got {other:?}"),
    }
    assert_eq!(h.read(0, 64).await.unwrap(), b"stable");
}
