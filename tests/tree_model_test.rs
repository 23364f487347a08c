//! Integration tests for the item forest: structural operations, flattening
//! and reparent target filtering.

use rstest::{fixture, rstest};

use itemtree::domain::{
    eligible_target_ids, excluded_set, flatten, DomainError, ExpansionState, ItemArena,
    ItemFields, ItemId, NestedItem, Quantity,
};
use itemtree::util::testing::init_test_setup;

fn id(n: u64) -> ItemId {
    ItemId::Remote(n)
}

fn item(n: u64, name: &str) -> NestedItem {
    NestedItem::new(id(n), ItemFields::new(name))
}

/// A → B → C
#[fixture]
fn chain() -> ItemArena {
    init_test_setup();
    ItemArena::from_nested(vec![
        item(1, "A").with_children(vec![item(2, "B").with_children(vec![item(3, "C")])])
    ])
    .unwrap()
}

// Pantry
// ├── Shelf
// │   ├── Rice
// │   └── Beans
// └── Fridge
//     └── Milk
// Garage
// └── Tools
#[fixture]
fn inventory() -> ItemArena {
    init_test_setup();
    ItemArena::from_nested(vec![
        item(1, "Pantry").with_children(vec![
            item(2, "Shelf").with_children(vec![item(3, "Rice"), item(4, "Beans")]),
            item(5, "Fridge").with_children(vec![item(6, "Milk")]),
        ]),
        item(7, "Garage").with_children(vec![item(8, "Tools")]),
    ])
    .unwrap()
}

// ============================================================
// Chain scenarios
// ============================================================

#[rstest]
fn given_chain_when_filtering_b_then_only_a_is_eligible(chain: ItemArena) {
    assert_eq!(eligible_target_ids(&chain, &id(2)).unwrap(), vec![id(1)]);
}

#[rstest]
fn given_chain_when_moving_c_under_a_then_a_has_b_and_c(mut chain: ItemArena) {
    chain.reparent(&id(3), Some(&id(1))).unwrap();

    assert_eq!(chain.children_ids(&id(1)).unwrap(), vec![id(2), id(3)]);
    assert!(chain.children_ids(&id(2)).unwrap().is_empty());
    chain.check_invariants().unwrap();
}

#[rstest]
fn given_chain_when_moving_a_under_c_then_cycle_rejected_and_unchanged(mut chain: ItemArena) {
    let before = chain.to_nested();

    let result = chain.reparent(&id(1), Some(&id(3)));

    assert_eq!(
        result,
        Err(DomainError::CycleRejected {
            node: id(1),
            target: id(3)
        })
    );
    assert_eq!(chain.to_nested(), before);
    chain.check_invariants().unwrap();
}

#[rstest]
fn given_chain_when_moving_item_under_itself_then_cycle_rejected(mut chain: ItemArena) {
    assert!(matches!(
        chain.reparent(&id(2), Some(&id(2))),
        Err(DomainError::CycleRejected { .. })
    ));
}

#[rstest]
fn given_chain_when_deleting_b_then_a_remains_without_children(mut chain: ItemArena) {
    let before = chain.len();

    let detached = chain.remove_subtree(&id(2)).unwrap();

    assert_eq!(detached.item_count(), 2);
    assert_eq!(chain.len(), before - 2);
    assert_eq!(chain.to_nested(), vec![item(1, "A")]);
    chain.check_invariants().unwrap();
}

// ============================================================
// Forest properties
// ============================================================

#[rstest]
fn given_inventory_when_deleting_any_item_then_exactly_its_subtree_goes(inventory: ItemArena) {
    for (_, node) in inventory.iter() {
        let mut arena = inventory.clone();
        let expected = 1 + arena.count_descendants(&node.id).unwrap();
        let gone = excluded_set(&arena, &node.id).unwrap();

        let detached = arena.remove_subtree(&node.id).unwrap();

        assert_eq!(detached.item_count(), expected);
        assert_eq!(arena.len(), inventory.len() - expected);
        assert!(gone.iter().all(|g| !arena.contains(g)));
        for (_, rest) in arena.iter() {
            let path = arena.path_to(&rest.id).unwrap();
            assert!(path.iter().all(|p| !gone.contains(p)));
        }
        arena.check_invariants().unwrap();
    }
}

#[rstest]
fn given_inventory_when_inserting_then_deleting_then_siblings_restored(mut inventory: ItemArena) {
    let before = inventory.to_nested();

    inventory
        .insert_child(&id(2), id(99), ItemFields::new("Lentils"))
        .unwrap();
    assert_eq!(
        inventory.children_ids(&id(2)).unwrap(),
        vec![id(3), id(4), id(99)]
    );
    inventory.remove_subtree(&id(99)).unwrap();

    assert_eq!(inventory.to_nested(), before);
}

#[rstest]
fn given_inventory_when_filtering_every_item_then_subtree_never_eligible(inventory: ItemArena) {
    for (_, node) in inventory.iter() {
        let targets = eligible_target_ids(&inventory, &node.id).unwrap();
        for target in &targets {
            assert_ne!(*target, node.id);
            assert!(!inventory.is_ancestor(&node.id, target).unwrap());
        }
        let descendants = inventory.count_descendants(&node.id).unwrap();
        assert_eq!(targets.len(), inventory.len() - 1 - descendants);
    }
}

#[rstest]
fn given_inventory_when_moving_to_every_eligible_target_then_invariants_hold(
    inventory: ItemArena,
) {
    for (_, node) in inventory.iter() {
        for target in eligible_target_ids(&inventory, &node.id).unwrap() {
            let mut arena = inventory.clone();
            arena.reparent(&node.id, Some(&target)).unwrap();
            arena.check_invariants().unwrap();
            assert_eq!(arena.len(), inventory.len());
        }
    }
}

#[rstest]
fn given_missing_ids_when_operating_then_not_found(mut inventory: ItemArena) {
    let missing = id(404);
    assert_eq!(
        inventory.remove_subtree(&missing),
        Err(DomainError::NotFound(missing))
    );
    assert_eq!(
        inventory.reparent(&id(3), Some(&missing)),
        Err(DomainError::NotFound(missing))
    );
    assert_eq!(
        inventory.insert_child(&missing, id(50), ItemFields::new("x")),
        Err(DomainError::NotFound(missing))
    );
    assert_eq!(
        inventory.update_fields(&missing, ItemFields::new("x")),
        Err(DomainError::NotFound(missing))
    );
}

#[rstest]
fn given_fields_update_when_applied_then_position_and_identity_kept(mut inventory: ItemArena) {
    let previous = inventory
        .update_fields(
            &id(4),
            ItemFields::new(" Black beans ")
                .with_quantity(Quantity::new(3.0).unwrap())
                .with_unit("cans"),
        )
        .unwrap();

    assert_eq!(previous, ItemFields::new("Beans"));
    assert_eq!(inventory.children_ids(&id(2)).unwrap(), vec![id(3), id(4)]);
    assert_eq!(inventory.get(&id(4)).unwrap().name(), "Black beans");
}

// ============================================================
// Flattening
// ============================================================

#[rstest]
fn given_expansion_when_flattening_then_levels_step_by_at_most_one(inventory: ItemArena) {
    let mut expansion = ExpansionState::new();
    expansion.expand(id(1));
    expansion.expand(id(5));
    expansion.expand(id(7));

    let rows = flatten(&inventory, &expansion);

    let names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["Pantry", "Shelf", "Fridge", "Milk", "Garage", "Tools"]
    );
    assert_eq!(rows[0].level, 0);
    for pair in rows.windows(2) {
        assert!(pair[1].level <= pair[0].level + 1);
    }
    for row in &rows {
        let path = inventory.path_to(&row.id).unwrap();
        let ancestors = &path[..path.len() - 1];
        assert!(ancestors.iter().all(|a| expansion.is_expanded(a)));
    }
}

#[rstest]
fn given_same_inputs_when_flattening_twice_then_identical_and_source_untouched(
    inventory: ItemArena,
) {
    let mut expansion = ExpansionState::new();
    expansion.expand_all(&inventory);
    let before = inventory.to_nested();

    let first = flatten(&inventory, &expansion);
    let second = flatten(&inventory, &expansion);

    assert_eq!(first, second);
    assert_eq!(first.len(), inventory.len());
    assert_eq!(inventory.to_nested(), before);
}

#[rstest]
fn given_flat_rows_when_following_index_then_source_node_found(inventory: ItemArena) {
    let mut expansion = ExpansionState::new();
    expansion.expand_all(&inventory);

    for row in flatten(&inventory, &expansion) {
        let node = inventory.get_node(row.index).unwrap();
        assert_eq!(node.id, row.id);
        assert_eq!(row.expandable, node.has_children());
        assert_eq!(row.deletable, node.parent.is_some());
    }
}

// ============================================================
// Wire format
// ============================================================

#[test]
fn given_api_json_when_parsing_then_forest_built() {
    let json = r#"[
        {"id": 1, "name": "Pantry", "quantity": null, "unit": null, "children": [
            {"id": 2, "name": "Rice", "quantity": "2.5", "unit": "kg", "children": []},
            {"id": 3, "name": "Oil", "quantity": 1, "unit": "l"}
        ]}
    ]"#;

    let items: Vec<NestedItem> = serde_json::from_str(json).unwrap();
    let arena = ItemArena::from_nested(items).unwrap();

    assert_eq!(arena.len(), 3);
    let rice = arena.get(&id(2)).unwrap();
    assert_eq!(rice.fields.quantity, Some(Quantity::new(2.5).unwrap()));
    assert_eq!(rice.fields.unit.as_deref(), Some("kg"));
    assert!(arena.to_string().contains("Oil (1 l) [3]"));
}

#[test]
fn given_negative_quantity_when_parsing_then_rejected() {
    let json = r#"{"id": 1, "name": "Rice", "quantity": "-1"}"#;
    assert!(serde_json::from_str::<NestedItem>(json).is_err());
}

#[test]
fn given_duplicate_ids_when_building_then_rejected() {
    let result = ItemArena::from_nested(vec![
        item(1, "A").with_children(vec![item(2, "B")]),
        item(2, "again"),
    ]);
    assert_eq!(result.err(), Some(DomainError::DuplicateId(id(2))));
}
