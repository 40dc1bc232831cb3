//! Coordination Module Tests
//!
//! ## Test Scopes
//! - **Tree**: path rules, versions, single-fire and de-duplicated watches.
//! - **Sessions**: local and TCP sessions, including disconnect delivery.
//! - **Adapter**: replace-on-create, recursive delete, read-and-arm.

#[cfg(test)]
mod tests {
    use crate::coordination::adapter::{CoordinationAdapter, ROOT_PATH, inbox_path, node_path};
    use crate::coordination::remote::RemoteSession;
    use crate::coordination::server::CoordinationServer;
    use crate::coordination::session::{Coordination, LocalSession};
    use crate::coordination::tree::{MemoryTree, split_path};
    use crate::coordination::types::{CoordError, EventKind, WatchedEvent, Watcher};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    async fn next_event(rx: &mut UnboundedReceiver<WatchedEvent>) -> WatchedEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for a watch event")
            .expect("watch channel closed")
    }

    fn assert_quiet(rx: &mut UnboundedReceiver<WatchedEvent>) {
        assert!(rx.try_recv().is_err(), "unexpected extra event");
    }

    async fn start_server(tree: Arc<MemoryTree>) -> String {
        let server = CoordinationServer::bind("127.0.0.1:0", tree).await.unwrap();
        let addr = server.local_addr().unwrap().to_string();
        tokio::spawn(server.run());
        addr
    }

    // ============================================================
    // TREE
    // ============================================================

    #[test]
    fn test_path_rules() {
        assert_eq!(split_path("/").unwrap(), None);
        assert_eq!(split_path("/ecs").unwrap(), Some(("/", "ecs")));
        assert_eq!(
            split_path("/ecs/server1/data").unwrap(),
            Some(("/ecs/server1", "data"))
        );
        for bad in ["", "ecs", "/ecs/", "//ecs", "/ecs//x"] {
            assert!(
                matches!(split_path(bad), Err(CoordError::BadPath(_))),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_create_requires_parent_and_uniqueness() {
        let tree = MemoryTree::new();

        assert!(matches!(
            tree.create("/ecs/server1", b""),
            Err(CoordError::NoParent(_))
        ));
        tree.create("/ecs", b"").unwrap();
        tree.create("/ecs/server1", b"x").unwrap();
        assert!(matches!(
            tree.create("/ecs", b""),
            Err(CoordError::NodeExists(_))
        ));

        assert_eq!(tree.get_children("/ecs", None).unwrap(), vec!["server1"]);
        assert_eq!(tree.exists("/ecs", None).unwrap().unwrap().num_children, 1);
    }

    #[test]
    fn test_set_data_bumps_version() {
        let tree = MemoryTree::new();
        tree.create("/ecs", b"").unwrap();

        let stat = tree.set_data("/ecs", b"ring").unwrap();
        assert_eq!(stat.version, 1);
        let (data, stat) = tree.get_data("/ecs", None).unwrap();
        assert_eq!(data, b"ring");
        assert_eq!(stat.version, 1);

        assert!(matches!(
            tree.set_data("/missing", b""),
            Err(CoordError::NoNode(_))
        ));
    }

    #[test]
    fn test_delete_refuses_non_empty() {
        let tree = MemoryTree::new();
        tree.create("/ecs", b"").unwrap();
        tree.create("/ecs/server1", b"").unwrap();

        assert!(matches!(tree.delete("/ecs"), Err(CoordError::NotEmpty(_))));
        tree.delete("/ecs/server1").unwrap();
        tree.delete("/ecs").unwrap();
        assert!(tree.exists("/ecs", None).unwrap().is_none());
        assert!(matches!(tree.delete("/ecs"), Err(CoordError::NoNode(_))));
    }

    #[tokio::test]
    async fn test_data_watch_fires_once() {
        let tree = MemoryTree::new();
        tree.create("/ecs", b"").unwrap();
        let (watcher, mut rx) = Watcher::channel();

        tree.get_data("/ecs", Some(&watcher)).unwrap();
        // arming twice before it fires must not duplicate the event
        tree.exists("/ecs", Some(&watcher)).unwrap();

        tree.set_data("/ecs", b"one").unwrap();
        tree.set_data("/ecs", b"two").unwrap();

        let event = next_event(&mut rx).await;
        assert_eq!(event, WatchedEvent::node(EventKind::NodeDataChanged, "/ecs"));
        assert_quiet(&mut rx);
        assert_eq!(tree.pending_watches(), 0);
    }

    #[tokio::test]
    async fn test_exists_watch_sees_creation_and_deletion() {
        let tree = MemoryTree::new();
        let (watcher, mut rx) = Watcher::channel();

        assert!(tree.exists("/ecs", Some(&watcher)).unwrap().is_none());
        tree.create("/ecs", b"").unwrap();
        assert_eq!(next_event(&mut rx).await.kind, EventKind::NodeCreated);

        tree.exists("/ecs", Some(&watcher)).unwrap();
        tree.delete("/ecs").unwrap();
        assert_eq!(next_event(&mut rx).await.kind, EventKind::NodeDeleted);
    }

    #[tokio::test]
    async fn test_child_watch() {
        let tree = MemoryTree::new();
        tree.create("/ecs", b"").unwrap();
        let (watcher, mut rx) = Watcher::channel();

        assert!(tree.get_children("/ecs", Some(&watcher)).unwrap().is_empty());
        tree.create("/ecs/server1", b"").unwrap();

        let event = next_event(&mut rx).await;
        assert_eq!(event.kind, EventKind::NodeChildrenChanged);
        assert_eq!(event.path, "/ecs");

        // data changes of a child do not touch the child watch
        tree.get_children("/ecs", Some(&watcher)).unwrap();
        tree.set_data("/ecs/server1", b"x").unwrap();
        assert_quiet(&mut rx);

        tree.delete("/ecs/server1").unwrap();
        assert_eq!(next_event(&mut rx).await.kind, EventKind::NodeChildrenChanged);
    }

    #[tokio::test]
    async fn test_remove_watchers() {
        let tree = MemoryTree::new();
        tree.create("/ecs", b"").unwrap();
        let (watcher, mut rx) = Watcher::channel();

        tree.get_data("/ecs", Some(&watcher)).unwrap();
        tree.get_children("/ecs", Some(&watcher)).unwrap();
        assert_eq!(tree.pending_watches(), 2);

        tree.remove_watchers(&[watcher.id()]);
        tree.set_data("/ecs", b"x").unwrap();
        assert_quiet(&mut rx);
    }

    // ============================================================
    // SESSIONS
    // ============================================================

    #[tokio::test]
    async fn test_local_session_close_disconnects_watchers() {
        let tree = Arc::new(MemoryTree::new());
        tree.create("/ecs", b"").unwrap();
        let session = LocalSession::new(tree.clone());
        let (watcher, mut rx) = Watcher::channel();

        session.get_data("/ecs", Some(&watcher)).await.unwrap();
        session.close().await;

        assert!(next_event(&mut rx).await.is_disconnect());
        assert!(!session.is_connected());
        assert!(matches!(
            session.get_data("/ecs", None).await,
            Err(CoordError::ConnectionLoss(_))
        ));

        // the tree no longer holds the closed session's watcher
        tree.set_data("/ecs", b"x").unwrap();
        assert_quiet(&mut rx);
    }

    #[tokio::test]
    async fn test_remote_session_round_trip() {
        let tree = Arc::new(MemoryTree::new());
        let addr = start_server(tree.clone()).await;
        let session = RemoteSession::connect(&addr, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!session.session_id().is_empty());

        session.create("/ecs", b"").await.unwrap();
        session.create("/ecs/server1", b"hello").await.unwrap();

        let (data, _) = session.get_data("/ecs/server1", None).await.unwrap();
        assert_eq!(data, b"hello");
        assert_eq!(
            session.get_children("/ecs", None).await.unwrap(),
            vec!["server1"]
        );
        assert!(matches!(
            session.create("/ecs", b"").await,
            Err(CoordError::NodeExists(_))
        ));

        // remote writes are visible in the hosted tree
        assert_eq!(tree.get_data("/ecs/server1", None).unwrap().0, b"hello");
    }

    #[tokio::test]
    async fn test_remote_watch_delivery() {
        let tree = Arc::new(MemoryTree::new());
        tree.create("/ecs", b"").unwrap();
        let addr = start_server(tree.clone()).await;
        let session = RemoteSession::connect(&addr, Duration::from_secs(5))
            .await
            .unwrap();
        let (watcher, mut rx) = Watcher::channel();

        session.get_data("/ecs", Some(&watcher)).await.unwrap();
        // a local writer changes the data
        tree.set_data("/ecs", b"ring").unwrap();

        let event = next_event(&mut rx).await;
        assert_eq!(event, WatchedEvent::node(EventKind::NodeDataChanged, "/ecs"));

        // the same watcher can be re-armed
        session.get_data("/ecs", Some(&watcher)).await.unwrap();
        session.set_data("/ecs", b"").await.unwrap();
        assert_eq!(next_event(&mut rx).await.kind, EventKind::NodeDataChanged);
    }

    #[tokio::test]
    async fn test_remote_session_forgets_dropped_watchers() {
        let tree = Arc::new(MemoryTree::new());
        tree.create("/ecs", b"").unwrap();
        let addr = start_server(tree.clone()).await;
        let session = RemoteSession::connect(&addr, Duration::from_secs(5))
            .await
            .unwrap();

        for _ in 0..10 {
            let (watcher, _rx) = Watcher::channel();
            session.exists("/ecs", Some(&watcher)).await.unwrap();
        }
        let (watcher, mut rx) = Watcher::channel();
        session.get_data("/ecs", Some(&watcher)).await.unwrap();
        assert_eq!(session.watcher_count(), 1);

        tree.set_data("/ecs", b"ring").unwrap();
        assert_eq!(next_event(&mut rx).await.kind, EventKind::NodeDataChanged);
    }

    #[tokio::test]
    async fn test_remote_close_disconnects_watchers() {
        let tree = Arc::new(MemoryTree::new());
        tree.create("/ecs", b"").unwrap();
        let addr = start_server(tree.clone()).await;
        let session = RemoteSession::connect(&addr, Duration::from_secs(5))
            .await
            .unwrap();
        let (watcher, mut rx) = Watcher::channel();

        session.exists("/ecs", Some(&watcher)).await.unwrap();
        session.close().await;

        assert!(next_event(&mut rx).await.is_disconnect());
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_connect_failure() {
        // nothing listens on this freshly released port
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let result = RemoteSession::connect(&format!("127.0.0.1:{}", port), Duration::from_secs(2)).await;
        assert!(result.is_err());
    }

    // ============================================================
    // ADAPTER
    // ============================================================

    fn local_adapter() -> (Arc<MemoryTree>, CoordinationAdapter) {
        let tree = Arc::new(MemoryTree::new());
        let adapter = CoordinationAdapter::new(LocalSession::new(tree.clone()));
        (tree, adapter)
    }

    #[test]
    fn test_path_layout() {
        assert_eq!(ROOT_PATH, "/ecs");
        assert_eq!(node_path("server1"), "/ecs/server1");
        assert_eq!(inbox_path("server1"), "/ecs/server1/data");
    }

    #[tokio::test]
    async fn test_create_persistent_replaces_subtree() {
        let (tree, adapter) = local_adapter();
        adapter.ensure_path(ROOT_PATH, "").await.unwrap();
        adapter.ensure_path(ROOT_PATH, "ignored").await.unwrap();

        adapter
            .create_persistent(&node_path("server1"), "stale", None)
            .await
            .unwrap();
        adapter
            .create_persistent(&inbox_path("server1"), "{}", None)
            .await
            .unwrap();

        let (watcher, mut rx) = Watcher::channel();
        adapter
            .create_persistent(&node_path("server1"), "", Some(&watcher))
            .await
            .unwrap();

        assert_eq!(adapter.read(&node_path("server1"), None).await.unwrap(), "");
        assert!(!adapter.exists(&inbox_path("server1"), None).await.unwrap());
        assert_eq!(tree.get_data(ROOT_PATH, None).unwrap().0, b"");

        // the watcher was armed on the fresh node
        adapter.write(&node_path("server1"), "ring").await.unwrap();
        assert_eq!(next_event(&mut rx).await.kind, EventKind::NodeDataChanged);
    }

    #[tokio::test]
    async fn test_delete_recursive_and_idempotent_delete() {
        let (tree, adapter) = local_adapter();
        adapter.ensure_path(ROOT_PATH, "").await.unwrap();
        for name in ["server1", "server2"] {
            adapter.create_persistent(&node_path(name), "", None).await.unwrap();
            adapter.create_persistent(&inbox_path(name), "", None).await.unwrap();
        }

        adapter.delete_recursive(ROOT_PATH).await.unwrap();
        assert!(tree.exists(ROOT_PATH, None).unwrap().is_none());

        adapter.delete(ROOT_PATH).await.unwrap();
        adapter.delete_recursive(ROOT_PATH).await.unwrap();
    }

    #[tokio::test]
    async fn test_read_arms_watch_atomically() {
        let (_tree, adapter) = local_adapter();
        adapter.ensure_path(ROOT_PATH, "").await.unwrap();
        let (watcher, mut rx) = Watcher::channel();

        assert_eq!(adapter.read(ROOT_PATH, Some(&watcher)).await.unwrap(), "");
        adapter.write(ROOT_PATH, "M[]").await.unwrap();
        assert_eq!(next_event(&mut rx).await.path, ROOT_PATH);
        assert_eq!(adapter.read(ROOT_PATH, Some(&watcher)).await.unwrap(), "M[]");

        let children = adapter.watch_children(ROOT_PATH, &watcher).await.unwrap();
        assert!(children.is_empty());
        adapter.create_persistent(&node_path("server1"), "", None).await.unwrap();
        assert_eq!(next_event(&mut rx).await.kind, EventKind::NodeChildrenChanged);
    }
}
