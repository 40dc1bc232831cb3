//! Metadata Module Tests
//!
//! Validates ring construction and every lookup used by the control plane.
//!
//! Ring positions used below (MD5 of the name):
//! - `server3` = `0DDACF35…`
//! - `server2` = `194F9987…`
//! - `server4` = `26AB7BC2…`
//! - `server1` = `A8438DA7…`

#[cfg(test)]
mod tests {
    use crate::metadata::hash::{RING_MAX, RING_MIN, fingerprint};
    use crate::metadata::ring::{MessageTag, Ring, RingError};
    use crate::metadata::types::{CacheStrategy, HashRange, RingNode};

    fn node(name: &str, port: u16) -> RingNode {
        RingNode::new(name, "127.0.0.1", port)
    }

    fn three_node_ring() -> Ring {
        Ring::from_nodes(vec![
            node("server1", 50000),
            node("server2", 50001),
            node("server3", 50002),
        ])
        .unwrap()
    }

    // ============================================================
    // CONSTRUCTION
    // ============================================================

    #[test]
    fn test_nodes_are_ordered_by_position() {
        let ring = three_node_ring();
        assert_eq!(ring.names(), vec!["server3", "server2", "server1"]);
    }

    #[test]
    fn test_starts_come_from_predecessor() {
        let ring = three_node_ring();

        let s3 = ring.get("server3").unwrap();
        let s2 = ring.get("server2").unwrap();
        let s1 = ring.get("server1").unwrap();

        assert_eq!(s3.hash_range.start, s1.hash_range.end);
        assert_eq!(s2.hash_range.start, s3.hash_range.end);
        assert_eq!(s1.hash_range.start, s2.hash_range.end);
        assert_eq!(s1.hash_range.end, fingerprint("server1"));
    }

    #[test]
    fn test_exactly_one_range_wraps() {
        let ring = three_node_ring();
        let wrapping: Vec<_> = ring.nodes().iter().filter(|n| n.hash_range.wraps()).collect();
        assert_eq!(wrapping.len(), 1);
        assert_eq!(wrapping[0].name, "server3");
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let result = Ring::from_nodes(vec![node("server1", 1), node("server1", 2)]);
        assert!(matches!(result, Err(RingError::DuplicateName(name)) if name == "server1"));

        let ring = three_node_ring();
        assert!(matches!(
            ring.with_node(node("server2", 9)),
            Err(RingError::DuplicateName(_))
        ));
    }

    #[test]
    fn test_mutations_rederive_starts() {
        let ring = three_node_ring();
        let grown = ring.with_node(node("server4", 50003)).unwrap();

        // server4 (26AB…) sits between server2 (194F…) and server1 (A843…)
        assert_eq!(grown.names(), vec!["server3", "server2", "server4", "server1"]);
        assert_eq!(
            grown.hash_range("server1").unwrap().start,
            fingerprint("server4")
        );
        assert_eq!(
            grown.hash_range("server4").unwrap().start,
            fingerprint("server2")
        );

        let shrunk = grown.without_node("server4").unwrap();
        assert_eq!(shrunk, ring);

        // the original snapshot is untouched
        assert_eq!(ring.len(), 3);
        assert!(matches!(
            ring.without_node("missing"),
            Err(RingError::UnknownNode(_))
        ));
    }

    // ============================================================
    // OWNERSHIP
    // ============================================================

    #[test]
    fn test_owner_of_known_keys() {
        let ring = three_node_ring();
        // foo2 = 92E0… in (194F…, A843…]
        assert_eq!(ring.owner_of("foo2").unwrap().name, "server1");
        // foo = ACBD… past server1, wraps to server3
        assert_eq!(ring.owner_of("foo").unwrap().name, "server3");
        // gamma = 05B0… below server3's end
        assert_eq!(ring.owner_of("gamma").unwrap().name, "server3");
        // updateTestValue = 0F9D… in (0DDA…, 194F…]
        assert_eq!(ring.owner_of("updateTestValue").unwrap().name, "server2");
    }

    #[test]
    fn test_exactly_one_owner_per_key() {
        let ring = three_node_ring();
        for i in 0..500 {
            let hash = fingerprint(format!("key-{}", i));
            let claims = ring
                .nodes()
                .iter()
                .filter(|n| n.hash_range.contains(&hash))
                .count();
            assert_eq!(claims, 1, "key-{} claimed by {} nodes", i, claims);
        }
    }

    #[test]
    fn test_node_position_belongs_to_node() {
        let ring = three_node_ring();
        for n in ring.nodes() {
            assert_eq!(ring.owner_of_hash(n.position()).unwrap().name, n.name);
        }
    }

    #[test]
    fn test_wrap_boundaries() {
        let ring = three_node_ring();
        assert_eq!(ring.owner_of_hash(RING_MAX).unwrap().name, "server3");
        assert_eq!(ring.owner_of_hash(RING_MIN).unwrap().name, "server3");
    }

    #[test]
    fn test_single_node_owns_everything() {
        let ring = Ring::from_nodes(vec![node("server1", 1)]).unwrap();
        assert_eq!(ring.owner_of("foo").unwrap().name, "server1");
        assert_eq!(ring.owner_of("gamma").unwrap().name, "server1");
        assert!(Ring::empty().owner_of("foo").is_none());
    }

    // ============================================================
    // NEIGHBORS
    // ============================================================

    #[test]
    fn test_predecessor_and_successor_wrap() {
        let ring = three_node_ring();
        assert_eq!(ring.successor("server1").unwrap().name, "server3");
        assert_eq!(ring.predecessor("server3").unwrap().name, "server1");
        assert_eq!(ring.successor("server3").unwrap().name, "server2");
        assert!(ring.successor("missing").is_none());
    }

    #[test]
    fn test_range_between() {
        let ring = three_node_ring()
            .with_node(node("server4", 4))
            .unwrap()
            .with_node(node("server5", 5))
            .unwrap();
        // order: server3, server2, server4, server5, server1
        let names = |v: Vec<&RingNode>| v.into_iter().map(|n| n.name.clone()).collect::<Vec<_>>();

        assert_eq!(
            names(ring.range_between("server2", "server1").unwrap()),
            vec!["server4", "server5"]
        );
        // wrapping walk: after server5 comes server1, then server3
        assert_eq!(
            names(ring.range_between("server5", "server2").unwrap()),
            vec!["server1", "server3"]
        );
        assert!(ring.range_between("server4", "server4").unwrap().is_empty());
        assert!(ring.range_between("server4", "server5").unwrap().is_empty());
        assert!(ring.range_between("nope", "server5").is_err());
    }

    #[test]
    fn test_new_arrivals_before() {
        let old = three_node_ring();
        let new = old.with_node(node("server4", 4)).unwrap();

        let arrivals = new.new_arrivals_before(&old, "server1");
        assert_eq!(arrivals.len(), 1);
        assert_eq!(arrivals[0].name, "server4");

        assert!(new.new_arrivals_before(&old, "server2").is_empty());
        assert!(new.new_arrivals_before(&old, "server4").is_empty());

        let lonely = Ring::from_nodes(vec![node("server1", 1)]).unwrap();
        let joined = lonely.with_node(node("server2", 2)).unwrap();
        let arrivals = joined.new_arrivals_before(&lonely, "server1");
        assert_eq!(arrivals.len(), 1);
        assert_eq!(arrivals[0].name, "server2");
    }

    #[test]
    fn test_replicas_never_include_self() {
        let ring = three_node_ring();
        let replicas: Vec<_> = ring.replicas("server1").iter().map(|n| n.name.clone()).collect();
        assert_eq!(replicas, vec!["server3", "server2"]);

        let pair = Ring::from_nodes(vec![node("server1", 1), node("server2", 2)]).unwrap();
        let replicas: Vec<_> = pair.replicas("server1").iter().map(|n| n.name.clone()).collect();
        assert_eq!(replicas, vec!["server2"]);

        let single = Ring::from_nodes(vec![node("server1", 1)]).unwrap();
        assert!(single.replicas("server1").is_empty());
    }

    #[test]
    fn test_nearest_by_location() {
        let ring = Ring::from_nodes(vec![
            node("server1", 1).with_location(0, 0),
            node("server2", 2).with_location(10, 10),
            node("server3", 3),
        ])
        .unwrap();

        assert_eq!(ring.nearest_by_location(1, 2).unwrap().name, "server1");
        assert_eq!(ring.nearest_by_location(9, 8).unwrap().name, "server2");

        // equidistant: server2 comes before server1 in ring order
        assert_eq!(ring.nearest_by_location(5, 5).unwrap().name, "server2");
    }

    // ============================================================
    // SERIALIZATION
    // ============================================================

    #[test]
    fn test_serialize_round_trip_is_stable() {
        let mut seed = node("server1", 50000).with_location(3, 4);
        seed.cache_strategy = CacheStrategy::Lru;
        seed.cache_size = 100;
        let ring = Ring::from_nodes(vec![seed, node("server2", 50001)]).unwrap();

        let wire = ring.serialize(MessageTag::Metadata).unwrap();
        assert!(wire.starts_with('M'));

        let parsed = Ring::deserialize(&wire).unwrap();
        assert_eq!(parsed, ring);
        assert_eq!(parsed.serialize(MessageTag::Metadata).unwrap(), wire);
    }

    #[test]
    fn test_json_field_names() {
        let ring = Ring::from_nodes(vec![node("server1", 50000)]).unwrap();
        let json: serde_json::Value = serde_json::from_str(&ring.to_json().unwrap()).unwrap();
        let first = &json[0];
        assert_eq!(first["name"], "server1");
        assert_eq!(first["cacheStrategy"], "None");
        assert_eq!(first["cacheSize"], 0);
        assert_eq!(first["hashRange"][1], fingerprint("server1"));
    }

    #[test]
    fn test_deserialize_rejects_garbage() {
        assert!(Ring::deserialize("").is_err());
        assert!(Ring::deserialize("M").is_err());
        assert!(Ring::deserialize("M{not json").is_err());
        // the tag is skipped whatever it is
        assert!(Ring::deserialize("X[]").unwrap().is_empty());
    }

    #[test]
    fn test_hash_range_display() {
        let range = HashRange::new("A", "B");
        assert_eq!(range.to_string(), "(A, B]");
        assert!(!range.wraps());
    }
}
