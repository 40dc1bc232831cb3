//! Coordinator Tests
//!
//! ## Test Scopes
//! - **Config**: candidate lines, comments and malformed input.
//! - **CLI**: command parsing and the command loop's exit codes.
//! - **Service**: candidate selection, registration timeouts and a small
//!   in-process cluster. Multi-node scenarios live in `tests/cluster.rs`.

#[cfg(test)]
mod tests {
    use crate::coordination::{CoordinationAdapter, LocalSession, MemoryTree, ROOT_PATH, node_path};
    use crate::ecs::cli::{self, Command};
    use crate::ecs::config::{Candidate, ConfigError, parse_config};
    use crate::ecs::launcher::{InProcessLauncher, NodeLauncher};
    use crate::ecs::service::Ecs;
    use crate::logging::LogLevel;
    use crate::metadata::{CacheStrategy, RingNode};
    use crate::server::ServerState;
    use crate::storage::StorageConfig;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    // ============================================================
    // CONFIG
    // ============================================================

    #[test]
    fn test_parse_config() {
        let text = "\
# name host port [x y]
server1 127.0.0.1 50000
server2 127.0.0.1 50001 10 -20   # with a location

server3 10.0.0.3 50002
";
        let candidates = parse_config(text).unwrap();
        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[0], Candidate::new("server1", "127.0.0.1", 50000));
        assert_eq!(candidates[1].location, Some([10, -20]));
        assert_eq!(candidates[2].host, "10.0.0.3");
    }

    #[test]
    fn test_parse_config_errors() {
        assert!(matches!(
            parse_config("server1 127.0.0.1"),
            Err(ConfigError::Malformed { line: 1, .. })
        ));
        assert!(matches!(
            parse_config("server1 host notaport"),
            Err(ConfigError::Malformed { line: 1, .. })
        ));
        assert!(matches!(
            parse_config("a h 1\n\nb h 2 1"),
            Err(ConfigError::Malformed { line: 3, .. })
        ));
        assert_eq!(
            parse_config("a h 1\na h 2"),
            Err(ConfigError::DuplicateName {
                line: 2,
                name: "a".to_string()
            })
        );
    }

    #[test]
    fn test_candidate_ring_node() {
        let mut candidate = Candidate::new("server1", "127.0.0.1", 50000);
        candidate.location = Some([1, 2]);
        let node = candidate.to_ring_node(CacheStrategy::Lfu, 64);

        assert_eq!(node.cache_strategy, CacheStrategy::Lfu);
        assert_eq!(node.cache_size, 64);
        assert_eq!(node.location, Some([1, 2]));
        assert_eq!(node.address(), "127.0.0.1:50000");
    }

    // ============================================================
    // CLI
    // ============================================================

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            Command::parse("addNodes 3 LRU 100").unwrap(),
            Some(Command::AddNodes {
                count: 3,
                strategy: CacheStrategy::Lru,
                size: 100
            })
        );
        assert_eq!(
            Command::parse("addNode None 0").unwrap(),
            Some(Command::AddNodes {
                count: 1,
                strategy: CacheStrategy::None,
                size: 0
            })
        );
        assert_eq!(
            Command::parse("removeNode server1 server2").unwrap(),
            Some(Command::RemoveNodes(vec!["server1".into(), "server2".into()]))
        );
        assert_eq!(
            Command::parse("logLevel debug").unwrap(),
            Some(Command::LogLevel(LogLevel::Debug))
        );
        assert_eq!(Command::parse("   ").unwrap(), None);
        assert_eq!(Command::parse("quit").unwrap(), Some(Command::Quit));

        assert!(Command::parse("addNodes three LRU 1").is_err());
        assert!(Command::parse("addNodes 1 MRU 1").is_err());
        assert!(Command::parse("removeNode").is_err());
        assert!(Command::parse("launch").is_err());
    }

    struct Recorder {
        launched: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NodeLauncher for Recorder {
        async fn launch(&self, node: &RingNode) -> anyhow::Result<()> {
            self.launched.lock().push(node.name.clone());
            Ok(())
        }
    }

    async fn recording_ecs(candidates: Vec<Candidate>) -> (Arc<MemoryTree>, Arc<Recorder>, Ecs) {
        let tree = Arc::new(MemoryTree::new());
        let coord = CoordinationAdapter::new(LocalSession::new(tree.clone()));
        let recorder = Arc::new(Recorder {
            launched: Mutex::new(Vec::new()),
        });
        let ecs = Ecs::new(coord, recorder.clone(), candidates, Duration::from_millis(200))
            .await
            .unwrap();
        (tree, recorder, ecs)
    }

    #[tokio::test]
    async fn test_cli_loop() {
        let (_tree, _recorder, ecs) = recording_ecs(Vec::new()).await;
        let input = "help\nbogus\n\nstart\nquit\nstop\n".as_bytes();
        let mut output = Vec::new();

        let code = cli::run(&ecs, None, input, &mut output).await.unwrap();
        assert_eq!(code, 0);

        let text = String::from_utf8(output).unwrap();
        assert!(text.contains("Commands:"));
        assert!(text.contains("Error: unknown command"));
        assert!(text.contains("Error: no nodes to start"));
        assert!(!text.contains("Stopped"));
    }

    // ============================================================
    // SERVICE
    // ============================================================

    #[tokio::test]
    async fn test_root_is_prepared_empty() {
        let tree = Arc::new(MemoryTree::new());
        tree.create(ROOT_PATH, b"stale").unwrap();
        let coord = CoordinationAdapter::new(LocalSession::new(tree.clone()));
        let recorder = Arc::new(Recorder {
            launched: Mutex::new(Vec::new()),
        });
        let _ecs = Ecs::new(coord, recorder, Vec::new(), Duration::from_millis(100))
            .await
            .unwrap();

        let (body, _) = tree.get_data(ROOT_PATH, None).unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_setup_nodes_selection() {
        let candidates = vec![
            Candidate::new("server1", "127.0.0.1", 1),
            Candidate::new("server2", "127.0.0.1", 2),
        ];
        let (_tree, _recorder, ecs) = recording_ecs(candidates).await;

        let nodes = ecs.setup_nodes(2, CacheStrategy::Fifo, 10).await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert!(nodes.iter().all(|n| n.cache_strategy == CacheStrategy::Fifo));
        assert!(ecs.setup_nodes(3, CacheStrategy::None, 0).await.is_err());
        assert!(ecs.setup_nodes(0, CacheStrategy::None, 0).await.is_err());
        assert_eq!(ecs.available().await.len(), 2);
    }

    #[tokio::test]
    async fn test_add_nodes_times_out_without_registration() {
        let candidates = vec![Candidate::new("server1", "127.0.0.1", 1)];
        let (tree, recorder, ecs) = recording_ecs(candidates).await;

        let err = ecs.add_nodes(1, CacheStrategy::None, 0).await.unwrap_err();
        assert!(err.to_string().contains("did not register"));
        assert_eq!(recorder.launched.lock().as_slice(), ["server1".to_string()]);

        // the candidate is free again and nothing was published
        assert_eq!(ecs.available().await.len(), 1);
        assert!(ecs.ring().await.is_empty());
        let (body, _) = tree.get_data(ROOT_PATH, None).unwrap();
        assert!(body.is_empty());
    }

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    #[tokio::test]
    async fn test_single_node_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let tree = Arc::new(MemoryTree::new());
        let launcher = Arc::new(InProcessLauncher::new(
            tree.clone(),
            StorageConfig {
                root: dir.path().to_path_buf(),
                blocks_per_file: 32,
                initial_files: 2,
                sync_writes: false,
            },
            Duration::from_secs(2),
        ));
        let coord = CoordinationAdapter::new(LocalSession::new(tree.clone()));
        let candidates = vec![Candidate::new("server1", "127.0.0.1", free_port())];
        let ecs = Ecs::new(coord, launcher.clone(), candidates, Duration::from_secs(5))
            .await
            .unwrap();

        ecs.add_nodes(1, CacheStrategy::Lru, 16).await.unwrap();
        let node = launcher.node("server1").unwrap();
        assert!(ecs.is_running().await);
        assert!(tree.exists(&node_path("server1"), None).unwrap().is_some());

        // root publication is applied asynchronously
        for _ in 0..200 {
            if node.state() == ServerState::Started {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(node.state(), ServerState::Started);

        ecs.stop().await.unwrap();
        for _ in 0..200 {
            if node.state() == ServerState::Stopped {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(node.state(), ServerState::Stopped);

        ecs.shutdown().await.unwrap();
        for _ in 0..200 {
            if node.is_closed() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(node.is_closed());
        assert!(tree.exists(ROOT_PATH, None).unwrap().is_none());
    }
}
