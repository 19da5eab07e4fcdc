#![forbid(unsafe_code)]

use super::*;
use crate::command::{Command, InstanceRef, StoreOp};
use crate::forest::Forest;
use crate::ids::TreeId;
use crate::node::{Node, NodeData};
use crate::template::{FieldKind, Template, TemplateSet};
use serde_json::json;

fn id(value: &str) -> NodeId {
    NodeId::try_new(value).expect("node id")
}

fn pref(value: &str) -> ParentRef {
    ParentRef::parse(value).expect("parent ref")
}

fn task() -> TemplateId {
    TemplateId::try_new("task").expect("template id")
}

fn node(value: &str, slots: &[(&str, u32)]) -> Node {
    let mut node = Node::new(id(value), task(), value);
    for (parent, order) in slots {
        node = node.with_parent(pref(parent), *order);
    }
    node
}

fn forest(nodes: Vec<Node>) -> Forest {
    Forest::reconstruct(TreeId::try_new("t").expect("tree id"), nodes).expect("reconstruct")
}

fn apply(forest: &Forest, command: &Command) -> Forest {
    let mut next = forest.clone();
    command.execute(&mut next).expect("execute");
    next.check_invariants().expect("invariants after execute");
    next
}

fn orders_under(forest: &Forest, parent: &str) -> Vec<(String, u32)> {
    let parent = pref(parent);
    forest
        .children_of(&parent)
        .iter()
        .map(|child| {
            let order = forest
                .node(child)
                .and_then(|node| node.order_under(&parent))
                .expect("order");
            (child.to_string(), order)
        })
        .collect()
}

#[test]
fn add_in_the_middle_shifts_later_siblings() {
    let base = forest(vec![
        node("a", &[("root", 0)]),
        node("b", &[("root", 1)]),
        node("c", &[("root", 2)]),
    ]);
    let new = NewNode::with_id(id("n"), task(), "new");
    let command = add_nodes(&base, &ParentRef::Root, vec![new], Some(1)).expect("add");

    assert_eq!(
        command.writes()[0],
        StoreOp::ReorderForAdd {
            parent: ParentRef::Root,
            from_order: 1,
        }
    );
    assert!(matches!(&command.writes()[1], StoreOp::CreateNodes(nodes) if nodes.len() == 1));
    assert_eq!(command.writes().len(), 2);

    let after = apply(&base, &command);
    assert_eq!(
        orders_under(&after, "root"),
        vec![
            ("a".to_string(), 0),
            ("n".to_string(), 1),
            ("b".to_string(), 2),
            ("c".to_string(), 3),
        ]
    );
    // the builder never touches its input
    assert_eq!(base.len(), 3);
}

#[test]
fn add_appends_by_default_and_validates_parent() {
    let base = forest(vec![node("p", &[("root", 0)])]);
    let command = add_nodes(
        &base,
        &pref("p"),
        vec![
            NewNode::with_id(id("x"), task(), "x"),
            NewNode::with_id(id("y"), task(), "y"),
        ],
        None,
    )
    .expect("add");
    assert!(matches!(command.writes(), [StoreOp::CreateNodes(nodes)] if nodes.len() == 2));
    let after = apply(&base, &command);
    assert_eq!(after.children_of(&pref("p")), &[id("x"), id("y")]);

    let missing = add_nodes(
        &base,
        &pref("ghost"),
        vec![NewNode::with_id(id("z"), task(), "z")],
        None,
    );
    assert_eq!(missing.err(), Some(BuildError::ParentNotFound(pref("ghost"))));

    let duplicate = add_nodes(
        &base,
        &ParentRef::Root,
        vec![NewNode::with_id(id("p"), task(), "p")],
        None,
    );
    assert_eq!(duplicate.err(), Some(BuildError::NodeExists(id("p"))));
}

#[test]
fn delete_of_one_clone_instance_only_unlinks_it() {
    let base = forest(vec![
        node("A", &[("root", 0), ("P2", 3)]),
        node("P2", &[("root", 1)]),
        node("c0", &[("P2", 0)]),
        node("c1", &[("P2", 1)]),
        node("c2", &[("P2", 2)]),
    ]);
    let command =
        delete_instances(&base, &[InstanceRef::new(id("A"), pref("P2"))]).expect("delete");
    let after = apply(&base, &command);

    let a = after.node(&id("A")).expect("A survives");
    assert_eq!(a.parent_ids, vec![ParentRef::Root]);
    assert_eq!(a.order, vec![0]);
    assert_eq!(after.roots(), &[id("A"), id("P2")]);
    assert_eq!(after.children_of(&pref("P2")), &[id("c0"), id("c1"), id("c2")]);
}

#[test]
fn delete_of_last_instance_cascades_to_exclusive_descendants() {
    let base = forest(vec![
        node("A", &[("root", 0)]),
        node("B", &[("root", 1)]),
        node("only", &[("A", 0)]),
        node("grand", &[("only", 0)]),
        node("shared", &[("A", 1), ("root", 2)]),
    ]);
    let command =
        delete_instances(&base, &[InstanceRef::new(id("A"), ParentRef::Root)]).expect("delete");
    let after = apply(&base, &command);

    assert!(!after.contains(&id("A")));
    assert!(!after.contains(&id("only")));
    assert!(!after.contains(&id("grand")));
    let shared = after.node(&id("shared")).expect("shared survives");
    assert_eq!(shared.parent_ids, vec![ParentRef::Root]);
    assert_eq!(
        orders_under(&after, "root"),
        vec![("B".to_string(), 0), ("shared".to_string(), 1)]
    );
    assert!(matches!(
        &command.writes()[0],
        StoreOp::DeleteNodes(targets) if targets.len() == 1
    ));
}

#[test]
fn delete_skips_targets_already_removed_by_an_earlier_cascade() {
    let base = forest(vec![node("A", &[("root", 0)]), node("K", &[("A", 0)])]);
    let command = delete_instances(
        &base,
        &[
            InstanceRef::new(id("A"), ParentRef::Root),
            InstanceRef::new(id("K"), pref("A")),
        ],
    )
    .expect("delete");
    let after = apply(&base, &command);
    assert!(after.is_empty());
    assert!(matches!(
        &command.writes()[0],
        StoreOp::DeleteNodes(targets) if targets.len() == 1
    ));
}

#[test]
fn move_reparents_and_closes_the_gap() {
    let base = forest(vec![
        node("W", &[("root", 0)]),
        node("Y", &[("root", 1)]),
        node("X", &[("root", 2)]),
        node("y0", &[("Y", 0)]),
    ]);
    let command =
        move_instance(&base, &id("X"), &ParentRef::Root, &pref("Y"), None).expect("move");
    let after = apply(&base, &command);

    let x = after.node(&id("X")).expect("X");
    assert_eq!(x.parent_ids, vec![pref("Y")]);
    assert_eq!(x.order, vec![1]);
    assert_eq!(after.roots(), &[id("W"), id("Y")]);
    assert_eq!(after.children_of(&pref("Y")), &[id("y0"), id("X")]);
}

#[test]
fn move_within_one_parent_reorders() {
    let base = forest(vec![
        node("a", &[("root", 0)]),
        node("b", &[("root", 1)]),
        node("c", &[("root", 2)]),
    ]);
    let command =
        move_instance(&base, &id("c"), &ParentRef::Root, &ParentRef::Root, Some(0)).expect("move");
    let after = apply(&base, &command);
    assert_eq!(after.roots(), &[id("c"), id("a"), id("b")]);
}

#[test]
fn move_and_clone_reject_cycles_and_duplicate_links() {
    let base = forest(vec![
        node("top", &[("root", 0)]),
        node("mid", &[("top", 0)]),
        node("leaf", &[("mid", 0)]),
    ]);
    let err = move_instance(&base, &id("top"), &ParentRef::Root, &pref("leaf"), None)
        .expect_err("cycle");
    assert!(matches!(err, BuildError::WouldCycle { .. }));

    let err = paste_as_clone(&base, &id("mid"), &pref("mid"), None).expect_err("self");
    assert!(matches!(err, BuildError::WouldCycle { .. }));

    let err = paste_as_clone(&base, &id("leaf"), &pref("mid"), None).expect_err("linked");
    assert!(matches!(err, BuildError::AlreadyLinked { .. }));
}

#[test]
fn paste_as_clone_appends_a_parent_reference() {
    let base = forest(vec![
        node("X", &[("root", 0)]),
        node("Y", &[("root", 1)]),
        node("y0", &[("Y", 0)]),
    ]);
    let command = paste_as_clone(&base, &id("X"), &pref("Y"), Some(0)).expect("clone");
    assert_eq!(
        command.writes()[0],
        StoreOp::AddParent {
            node: id("X"),
            parent: pref("Y"),
            order: 0,
        }
    );
    let after = apply(&base, &command);
    let x = after.node(&id("X")).expect("X");
    assert_eq!(x.parent_ids, vec![ParentRef::Root, pref("Y")]);
    assert_eq!(x.order, vec![0, 0]);
    assert_eq!(after.children_of(&pref("Y")), &[id("X"), id("y0")]);
    assert_eq!(after.instance_count(), 4);
}

#[test]
fn toggle_starred_stars_all_unless_all_are_starred() {
    let mut starred = node("s", &[("root", 0)]);
    starred.starred = true;
    let base = forest(vec![starred, node("u", &[("root", 1)])]);

    let command = toggle_starred(&base, &[id("s"), id("u")]).expect("toggle");
    let after = apply(&base, &command);
    assert!(after.nodes().all(|node| node.starred));

    let command = toggle_starred(&after, &[id("s"), id("u")]).expect("toggle back");
    let cleared = apply(&after, &command);
    assert!(cleared.nodes().all(|node| !node.starred));
}

#[test]
fn retemplate_remaps_by_field_name_and_renames() {
    let old = Template::new(task(), "Task")
        .with_field("f1", "Title", FieldKind::Text)
        .with_field("f2", "Effort", FieldKind::Number);
    let new_id = TemplateId::try_new("bug").expect("template id");
    let new = Template::new(new_id.clone(), "Bug")
        .with_field("b1", "Title", FieldKind::Text)
        .with_field("b2", "Done", FieldKind::Checkbox)
        .with_name_rule("Bug: {Title}");
    let templates: TemplateSet = [old, new].into_iter().collect();

    let base = forest(vec![
        node("n", &[("root", 0)])
            .with_field("f1", json!("crash"))
            .with_field("f2", json!(3)),
    ]);
    let command = batch_retemplate(&base, &[id("n")], &templates, &new_id).expect("retemplate");
    let after = apply(&base, &command);
    let n = after.node(&id("n")).expect("n");
    assert_eq!(n.template_id, new_id);
    assert_eq!(n.data.get("b1"), Some(&json!("crash")));
    assert_eq!(n.data.get("b2"), Some(&json!(false)));
    assert!(!n.data.contains_key("f2"));
    assert_eq!(n.name, "Bug: crash");

    let missing = TemplateId::try_new("nope").expect("template id");
    assert_eq!(
        batch_retemplate(&base, &[id("n")], &templates, &missing).err(),
        Some(BuildError::TemplateNotFound(missing))
    );
}

#[test]
fn batch_data_update_merges_into_every_target() {
    let base = forest(vec![
        node("a", &[("root", 0)]).with_field("keep", json!(1)),
        node("b", &[("root", 1)]),
    ]);
    let mut fields = NodeData::new();
    fields.insert("status".to_string(), json!("done"));
    let command = batch_update_data(&base, &[id("a"), id("b")], &fields).expect("batch");
    assert!(matches!(command.writes(), [StoreOp::UpdateNodes(updates)] if updates.len() == 2));
    let after = apply(&base, &command);
    for id in [id("a"), id("b")] {
        assert_eq!(after.node(&id).expect("node").data.get("status"), Some(&json!("done")));
    }
    assert_eq!(after.node(&id("a")).expect("a").data.get("keep"), Some(&json!(1)));
}

#[test]
fn name_propagation_touches_only_nodes_whose_name_changes() {
    let template = Template::new(task(), "Task")
        .with_field("f1", "Title", FieldKind::Text)
        .with_name_rule("{Title}");
    let base = forest(vec![
        node("a", &[("root", 0)]).with_field("f1", json!("alpha")),
        {
            let mut same = node("b", &[("root", 1)]).with_field("f1", json!("beta"));
            same.name = "beta".to_string();
            same
        },
    ]);
    let command = propagate_template_names(&base, &template).expect("propagate");
    assert_eq!(command.original_state().len(), 1);
    let after = apply(&base, &command);
    assert_eq!(after.node(&id("a")).expect("a").name, "alpha");

    let unruled = Template::new(task(), "Task");
    assert_eq!(
        propagate_template_names(&base, &unruled).err(),
        Some(BuildError::NoChanges)
    );
}

#[test]
fn update_node_merges_fields_and_reports_no_op() {
    let base = forest(vec![node("a", &[("root", 0)]).with_field("x", json!(1))]);
    let mut changes = NodeChanges::rename("renamed");
    changes.fields.insert("y".to_string(), json!(2));
    let command = update_node(&base, &id("a"), changes).expect("update");
    assert!(matches!(command.writes(), [StoreOp::UpdateNode(update)] if update.name.is_some()));
    let after = apply(&base, &command);
    let a = after.node(&id("a")).expect("a");
    assert_eq!(a.name, "renamed");
    assert_eq!(a.data.len(), 2);

    assert_eq!(
        update_node(&after, &id("a"), NodeChanges::rename("renamed")).err(),
        Some(BuildError::NoChanges)
    );
}

#[test]
fn resequence_parent_repairs_gaps() {
    let base = forest(vec![
        node("a", &[("root", 4)]),
        node("b", &[("root", 9)]),
        node("c", &[("root", 4)]),
    ]);
    let command = resequence_parent(&base, &ParentRef::Root).expect("resequence");
    assert_eq!(
        command.writes(),
        &[StoreOp::Resequence {
            parent: ParentRef::Root
        }]
    );
    let after = apply(&base, &command);
    assert_eq!(
        orders_under(&after, "root"),
        vec![
            ("a".to_string(), 0),
            ("c".to_string(), 1),
            ("b".to_string(), 2),
        ]
    );
}
