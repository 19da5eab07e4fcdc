#![forbid(unsafe_code)]

use super::*;
use crate::ids::TemplateId;

fn tree_id() -> TreeId {
    TreeId::try_new("t1").expect("tree id")
}

fn id(value: &str) -> NodeId {
    NodeId::try_new(value).expect("node id")
}

fn pref(value: &str) -> ParentRef {
    ParentRef::parse(value).expect("parent ref")
}

fn node(value: &str, slots: &[(&str, u32)]) -> Node {
    let mut node = Node::new(id(value), TemplateId::try_new("task").expect("template"), value);
    for (parent, order) in slots {
        node = node.with_parent(pref(parent), *order);
    }
    node
}

fn sample() -> Forest {
    Forest::reconstruct(
        tree_id(),
        vec![
            node("P1", &[("root", 0)]),
            node("P2", &[("root", 1)]),
            node("A", &[("P1", 0), ("P2", 1)]),
            node("B", &[("P1", 1)]),
            node("C", &[("P2", 0)]),
            node("D", &[("A", 0)]),
        ],
    )
    .expect("reconstruct")
}

#[test]
fn reconstruct_indexes_every_instance_in_order() {
    let forest = sample();
    assert_eq!(forest.roots(), &[id("P1"), id("P2")]);
    assert_eq!(forest.children_of(&pref("P1")), &[id("A"), id("B")]);
    assert_eq!(forest.children_of(&pref("P2")), &[id("C"), id("A")]);
    assert_eq!(forest.len(), 6);
    assert_eq!(forest.instance_count(), 7);
    forest.check_invariants().expect("invariants");
}

#[test]
fn clone_instances_share_one_record_and_subtree() {
    let forest = sample();
    let tree = forest.try_tree().expect("tree");
    let under_p1 = &tree[0].children[0];
    let under_p2 = &tree[1].children[1];
    assert_eq!(under_p1.id, id("A"));
    assert_eq!(under_p2.id, id("A"));
    assert_eq!(under_p1.children, under_p2.children);
    assert_eq!(under_p2.parent, pref("P2"));
    assert_eq!(under_p2.order, 1);
}

#[test]
fn reconstruct_repairs_dangling_and_duplicate_refs() {
    let mut dup = node("X", &[("root", 2)]);
    dup.parent_ids.push(ParentRef::Root);
    dup.order.push(5);
    let (forest, report) = Forest::reconstruct_with_report(
        tree_id(),
        vec![
            node("P1", &[("root", 0)]),
            node("A", &[("P1", 0), ("ghost", 0)]),
            node("orphan", &[("ghost", 0)]),
            node("under_orphan", &[("orphan", 0)]),
            dup,
        ],
    )
    .expect("reconstruct");

    assert_eq!(report.duplicate_refs, vec![(id("X"), ParentRef::Root)]);
    assert!(report.dropped_refs.contains(&(id("A"), pref("ghost"))));
    assert_eq!(report.excised, vec![id("orphan"), id("under_orphan")]);
    assert_eq!(forest.node(&id("A")).expect("A").parent_ids, vec![pref("P1")]);
    assert_eq!(forest.node(&id("X")).expect("X").order, vec![2]);
    assert!(!forest.contains(&id("orphan")));
    assert!(!forest.contains(&id("under_orphan")));
}

#[test]
fn reconstruct_normalizes_parentless_records() {
    let (forest, report) =
        Forest::reconstruct_with_report(tree_id(), vec![node("legacy", &[])]).expect("reconstruct");
    assert_eq!(report.normalized, vec![id("legacy")]);
    assert!(report.is_clean());
    assert_eq!(forest.roots(), &[id("legacy")]);
}

#[test]
fn reconstruct_rejects_duplicate_ids_and_bad_shapes() {
    let err = Forest::reconstruct(
        tree_id(),
        vec![node("A", &[("root", 0)]), node("A", &[("root", 1)])],
    )
    .expect_err("duplicate");
    assert_eq!(err, ForestError::DuplicateNode(id("A")));

    let mut bad = node("B", &[("root", 0)]);
    bad.order.push(1);
    let err = Forest::reconstruct(tree_id(), vec![bad]).expect_err("shape");
    assert!(matches!(err, ForestError::Shape(ShapeError::LengthMismatch(_))));
}

#[test]
fn reconstruct_is_idempotent_over_flatten() {
    let forest = sample();
    let again = Forest::reconstruct(tree_id(), forest.flatten()).expect("reconstruct");
    assert_eq!(forest, again);
    assert_eq!(forest.fingerprint(), again.fingerprint());
}

#[test]
fn lookups_respect_parent_context() {
    let forest = sample();
    let (node, parent) = forest.find_node_and_parent(&id("A")).expect("A");
    assert_eq!(node.id, id("A"));
    assert_eq!(parent, &pref("P1"));

    let (_, parent) = forest
        .find_node_and_contextual_parent(&id("A"), &pref("P2"))
        .expect("A under P2");
    assert_eq!(parent, &pref("P2"));
    assert!(
        forest
            .find_node_and_contextual_parent(&id("A"), &ParentRef::Root)
            .is_none()
    );

    let p2 = pref("P2");
    let instance = forest.instance(&id("A"), &p2).expect("instance");
    assert_eq!(instance.order, 1);
    assert_eq!(instance.children, &[id("D")]);
}

#[test]
fn ancestry_follows_every_parent_reference() {
    let forest = sample();
    assert!(forest.is_ancestor(&id("P2"), &id("D")));
    assert!(forest.is_ancestor(&id("P1"), &id("D")));
    assert!(!forest.is_ancestor(&id("B"), &id("D")));
    assert!(!forest.is_ancestor(&id("D"), &id("D")));
}

#[test]
fn cycles_yield_an_empty_tree_instead_of_recursing() {
    let mut forest = sample();
    let mut a = forest.node(&id("A")).cloned().expect("A");
    let before = a.clone();
    a.parent_ids.push(pref("D"));
    a.order.push(0);
    forest
        .apply_images(
            &[NodeImage {
                id: id("A"),
                node: Some(before),
            }],
            &[NodeImage {
                id: id("A"),
                node: Some(a),
            }],
        )
        .expect("apply");

    assert!(matches!(forest.try_tree(), Err(ForestError::Cycle(_))));
    assert!(forest.tree().is_empty());
    assert!(forest.is_ancestor(&id("D"), &id("D")));
}

#[test]
fn apply_images_rejects_stale_and_orphaning_changes_without_mutating() {
    let mut forest = sample();
    let snapshot = forest.clone();

    let stale = forest.apply_images(
        &[NodeImage {
            id: id("B"),
            node: None,
        }],
        &[NodeImage {
            id: id("B"),
            node: Some(node("B", &[("root", 2)])),
        }],
    );
    assert_eq!(stale, Err(ForestError::Stale(id("B"))));

    let orphaning = forest.apply_images(
        &[NodeImage {
            id: id("A"),
            node: snapshot.node(&id("A")).cloned(),
        }],
        &[NodeImage {
            id: id("A"),
            node: None,
        }],
    );
    assert_eq!(
        orphaning,
        Err(ForestError::OrphanedChild {
            removed: id("A"),
            child: id("D"),
        })
    );

    let dangling = forest.apply_images(
        &[NodeImage {
            id: id("N"),
            node: None,
        }],
        &[NodeImage {
            id: id("N"),
            node: Some(node("N", &[("missing", 0)])),
        }],
    );
    assert!(matches!(dangling, Err(ForestError::DanglingParent { .. })));
    assert_eq!(forest, snapshot);
}

#[test]
fn check_invariants_reports_gaps() {
    let forest = Forest::reconstruct(
        tree_id(),
        vec![node("A", &[("root", 0)]), node("B", &[("root", 2)])],
    )
    .expect("reconstruct");
    assert!(matches!(
        forest.check_invariants(),
        Err(ForestError::Invariant(_))
    ));
}
