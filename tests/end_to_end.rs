use archetype_registry::Registry;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Position {
    x: f32,
    y: f32,
    z: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Velocity {
    dx: f32,
    dy: f32,
    dz: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Health {
    current: u32,
    max: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Player;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Enemy;

#[test]
fn create_destroy_recycle() {
    let mut registry = Registry::new();
    let e1 = registry.create_entity().unwrap();
    let e2 = registry.create_entity().unwrap();
    let e3 = registry.create_entity().unwrap();
    registry.destroy_entity(e2);
    let e4 = registry.create_entity().unwrap();

    assert_eq!(e4.index(), e2.index());
    assert_eq!(e4.version(), e2.version() + 1);
    assert!(registry.is_valid(e4));
    assert!(!registry.is_valid(e2));
    assert_eq!(registry.len(), 3);
    let _ = e1;
    let _ = e3;
}

#[test]
fn archetype_transition_preserves_existing_components() {
    let mut registry = Registry::new();
    let e = registry
        .create_entity_with((Position { x: 1.0, y: 2.0, z: 3.0 }, Health { current: 75, max: 100 }))
        .unwrap();
    assert_eq!(registry.archetype_manager().archetypes().len(), 2); // root + {Position, Health}

    registry.add_component(e, Velocity { dx: 5.0, dy: 10.0, dz: 15.0 }).unwrap();
    assert_eq!(registry.archetype_manager().archetypes().len(), 3); // + {Position, Health, Velocity}

    assert_eq!(*registry.get_component::<Position>(e).unwrap(), Position { x: 1.0, y: 2.0, z: 3.0 });
    assert_eq!(*registry.get_component::<Health>(e).unwrap(), Health { current: 75, max: 100 });
    assert_eq!(*registry.get_component::<Velocity>(e).unwrap(), Velocity { dx: 5.0, dy: 10.0, dz: 15.0 });
}

#[test]
fn query_with_any_and_not_modifiers() {
    let mut registry = Registry::new();

    // every subset of {Position, Player, Enemy, Health}
    let mut made = Vec::new();
    for has_pos in [false, true] {
        for has_player in [false, true] {
            for has_enemy in [false, true] {
                for has_health in [false, true] {
                    let e = registry.create_entity().unwrap();
                    if has_pos {
                        registry.add_component(e, Position { x: 0.0, y: 0.0, z: 0.0 }).unwrap();
                    }
                    if has_player {
                        registry.add_component(e, Player).unwrap();
                    }
                    if has_enemy {
                        registry.add_component(e, Enemy).unwrap();
                    }
                    if has_health {
                        registry.add_component(e, Health { current: 1, max: 1 }).unwrap();
                    }
                    made.push((e, has_pos, has_player, has_enemy, has_health));
                }
            }
        }
    }

    let view = registry.view().required::<Position>().any::<Player, Enemy>().not::<Health>().build();
    let mut matched = Vec::new();
    view.for_each_entity(registry.archetype_manager(), |entity, _, _| matched.push(entity));

    let expected: Vec<_> = made
        .iter()
        .filter(|&&(_, pos, player, enemy, health)| pos && (player || enemy) && !health)
        .map(|&(e, ..)| e)
        .collect();

    assert_eq!(expected.len(), 3); // pos & health=false & (player|enemy): 3 of 4 player/enemy combos
    matched.sort_by_key(|e| e.to_bits());
    let mut expected_sorted = expected;
    expected_sorted.sort_by_key(|e| e.to_bits());
    assert_eq!(matched, expected_sorted);
}

#[test]
fn destroy_during_iteration_is_buffered_and_reflected_next_pass() {
    let mut registry = Registry::new();
    let mut entities = Vec::new();
    for i in 0..10 {
        entities.push(registry.create_entity_with((Position { x: i as f32, y: 0.0, z: 0.0 },)).unwrap());
    }

    let view = registry.view().required::<Position>().build();
    let mut collected = Vec::new();
    view.for_each_entity(registry.archetype_manager(), |entity, _, _| collected.push(entity));
    assert_eq!(collected.len(), 10);

    for &e in &collected[..5] {
        registry.destroy_entity(e);
    }

    let mut remaining = Vec::new();
    view.for_each_entity(registry.archetype_manager(), |entity, _, _| remaining.push(entity));
    assert_eq!(remaining.len(), 5);
    for destroyed in &collected[..5] {
        assert!(!remaining.contains(destroyed));
    }
    for kept in &collected[5..] {
        assert!(remaining.contains(kept));
    }
}

#[test]
fn cycle_safe_descendants_terminates() {
    let mut registry = Registry::new();
    let a = registry.create_entity().unwrap();
    let b = registry.create_entity().unwrap();
    let c = registry.create_entity().unwrap();

    registry.set_parent(b, a);
    registry.set_parent(c, b);
    registry.set_parent(a, c); // cyclic: a -> c -> b -> a via parent edges written through set_parent

    let descendants = registry.relationships().descendants(a);
    assert_eq!(descendants.len(), 2);
    assert!(descendants.contains(&b));
    assert!(descendants.contains(&c));
}

#[test]
fn removing_last_component_leaves_entity_in_root_archetype() {
    let mut registry = Registry::new();
    let e = registry.create_entity_with((Position { x: 1.0, y: 1.0, z: 1.0 },)).unwrap();
    assert!(registry.remove_component::<Position>(e).unwrap());
    assert!(registry.is_valid(e));
    assert!(!registry.has_component::<Position>(e));

    let empty_view = registry.view().build();
    let mut seen = Vec::new();
    empty_view.for_each_entity(registry.archetype_manager(), |entity, _, _| seen.push(entity));
    assert!(seen.contains(&e));
}

#[test]
fn save_load_round_trip_preserves_entities_components_and_relationships() {
    let mut registry = Registry::new();
    let mut movers = Vec::new();
    for i in 0..10 {
        movers.push(
            registry
                .create_entity_with((Position { x: i as f32, y: 0.0, z: 0.0 }, Velocity { dx: 1.0, dy: 0.0, dz: 0.0 }))
                .unwrap(),
        );
    }
    let mut still = Vec::new();
    for i in 0..10 {
        still.push(registry.create_entity_with((Position { x: i as f32, y: 9.0, z: 0.0 },)).unwrap());
    }
    let mut healthy = Vec::new();
    for _ in 0..10 {
        healthy.push(registry.create_entity_with((Health { current: 50, max: 100 },)).unwrap());
    }

    registry.set_parent(movers[1], movers[0]);
    registry.set_parent(movers[2], movers[0]);
    registry.add_link(still[0], still[1]);

    let bytes = registry.save_to_vec().unwrap();

    let mut loaded = Registry::with_shared_components(Default::default(), registry.component_registry().clone());
    loaded.load_from_slice(&bytes).unwrap();

    assert_eq!(loaded.len(), registry.len());

    for &e in &movers {
        assert_eq!(loaded.get_component::<Position>(e), registry.get_component::<Position>(e));
        assert_eq!(loaded.get_component::<Velocity>(e), registry.get_component::<Velocity>(e));
    }
    for &e in &still {
        assert_eq!(loaded.get_component::<Position>(e), registry.get_component::<Position>(e));
    }
    for &e in &healthy {
        assert_eq!(loaded.get_component::<Health>(e), registry.get_component::<Health>(e));
    }

    assert_eq!(loaded.relationships().parent_of(movers[1]), Some(movers[0]));
    assert_eq!(loaded.relationships().parent_of(movers[2]), Some(movers[0]));
    assert_eq!(loaded.relationships().links_of(still[0]), &[still[1]]);
}
