use archipelago::{EdgeKind, IslandManager, OwnerRef};

fn step(manager: &mut IslandManager) {
    let token = manager.update_islands();
    manager.update_islands_second_pass(token);
}

#[test]
fn kinematics_never_bridge_islands() {
    let mut manager = IslandManager::new();
    let a = manager.add_body(OwnerRef(1), false);
    let b = manager.add_body(OwnerRef(2), false);
    let k = manager.add_body(OwnerRef(3), true);

    // A - K - B: the kinematic cuts connectivity.
    let ak = manager.add_edge(EdgeKind::Contact, Some(a), Some(k));
    let kb = manager.add_edge(EdgeKind::Contact, Some(k), Some(b));
    manager.set_edge_connected(ak);
    manager.set_edge_connected(kb);

    step(&mut manager);

    assert_ne!(manager.island_of(a), manager.island_of(b));
    assert_eq!(manager.island_of(k), None);
    assert_eq!(manager.island_count(), 2);
    manager.free_buffers();
}

#[test]
fn duplication_count_tracks_distinct_islands() {
    let mut manager = IslandManager::new();
    let a = manager.add_body(OwnerRef(1), false);
    let b = manager.add_body(OwnerRef(2), false);
    let k = manager.add_body(OwnerRef(3), true);

    let ak = manager.add_edge(EdgeKind::Contact, Some(a), Some(k));
    let kb = manager.add_edge(EdgeKind::Contact, Some(k), Some(b));
    manager.set_edge_connected(ak);
    manager.set_edge_connected(kb);

    step(&mut manager);
    assert_eq!(manager.duplication_count(k), 2);
    assert_eq!(manager.kinematic_tracker().total_duplicates(), 2);
    assert_eq!(manager.kinematic_tracker().islands_of(k).len(), 2);
    manager.free_buffers();

    // Dropping the last edge from one island retires that duplicate.
    manager.remove_edge(ak);
    step(&mut manager);
    assert_eq!(manager.duplication_count(k), 1);
    assert_eq!(
        manager.kinematic_tracker().islands_of(k),
        &[manager.island_of(b).unwrap()]
    );
    manager.free_buffers();

    manager.remove_edge(kb);
    step(&mut manager);
    assert_eq!(manager.duplication_count(k), 0);
    manager.free_buffers();
}

#[test]
fn duplicates_count_islands_not_edges() {
    let mut manager = IslandManager::new();
    let a = manager.add_body(OwnerRef(1), false);
    let b = manager.add_body(OwnerRef(2), false);
    let k = manager.add_body(OwnerRef(3), true);

    // One island (a-b merged), two edges to the kinematic: one duplicate.
    let ab = manager.add_edge(EdgeKind::Contact, Some(a), Some(b));
    let ak = manager.add_edge(EdgeKind::Contact, Some(a), Some(k));
    let bk = manager.add_edge(EdgeKind::Contact, Some(b), Some(k));
    for e in [ab, ak, bk] {
        manager.set_edge_connected(e);
    }

    step(&mut manager);
    assert_eq!(manager.duplication_count(k), 1);
    manager.free_buffers();

    // Removing one of the two referencing edges keeps the duplicate alive.
    manager.remove_edge(ak);
    step(&mut manager);
    assert_eq!(manager.duplication_count(k), 1);
    manager.free_buffers();
}

#[test]
fn active_kinematics_list_one_entry_per_island() {
    let mut manager = IslandManager::new();
    let a = manager.add_body(OwnerRef(1), false);
    let b = manager.add_body(OwnerRef(2), false);
    let k = manager.add_body(OwnerRef(3), true);

    let ak = manager.add_edge(EdgeKind::Contact, Some(a), Some(k));
    let kb = manager.add_edge(EdgeKind::Contact, Some(k), Some(b));
    manager.set_edge_contact_manager(ak, OwnerRef(100));
    manager.set_edge_contact_manager(kb, OwnerRef(101));
    manager.set_edge_connected(ak);
    manager.set_edge_connected(kb);

    step(&mut manager);

    let kinematics = manager.active_kinematics();
    assert_eq!(kinematics.len(), 2);
    assert!(kinematics.iter().all(|entry| entry.node == k));
    assert_ne!(kinematics[0].island, kinematics[1].island);
    manager.free_buffers();
}

#[test]
fn switching_to_kinematic_cuts_and_back_remerges() {
    let mut manager = IslandManager::new();
    let a = manager.add_body(OwnerRef(1), false);
    let b = manager.add_body(OwnerRef(2), false);
    let c = manager.add_body(OwnerRef(3), false);

    let ab = manager.add_edge(EdgeKind::Contact, Some(a), Some(b));
    let bc = manager.add_edge(EdgeKind::Contact, Some(b), Some(c));
    manager.set_edge_connected(ab);
    manager.set_edge_connected(bc);
    step(&mut manager);
    assert_eq!(manager.island_count(), 1);
    manager.free_buffers();

    // B driven kinematically: A and C fall into separate islands, and B is
    // referenced by both.
    manager.set_kinematic(b, true);
    step(&mut manager);
    assert!(manager.is_kinematic(b));
    assert_eq!(manager.island_of(b), None);
    assert_ne!(manager.island_of(a), manager.island_of(c));
    assert_eq!(manager.duplication_count(b), 2);
    manager.free_buffers();

    // Back to dynamic: the surviving connected edges re-merge everything.
    manager.set_kinematic(b, false);
    step(&mut manager);
    assert_eq!(manager.island_of(a), manager.island_of(b));
    assert_eq!(manager.island_of(b), manager.island_of(c));
    assert_eq!(manager.duplication_count(b), 0);
    manager.free_buffers();
}

#[test]
fn static_anchor_edges_mark_the_island_not_the_partition() {
    let mut manager = IslandManager::new();
    let a = manager.add_body(OwnerRef(1), false);
    let b = manager.add_body(OwnerRef(2), false);

    let ab = manager.add_edge(EdgeKind::Contact, Some(a), Some(b));
    let ground = manager.add_edge(EdgeKind::Contact, Some(a), None);
    manager.set_edge_contact_manager(ab, OwnerRef(100));
    manager.set_edge_contact_manager(ground, OwnerRef(101));
    manager.set_edge_connected(ab);
    manager.set_edge_connected(ground);

    step(&mut manager);

    assert_eq!(manager.island_count(), 1);
    let spans = manager.island_indices();
    // One island plus the sentinel.
    assert_eq!(spans.len(), 2);
    assert!(spans[0].has_static_contact);
    manager.free_buffers();
}
