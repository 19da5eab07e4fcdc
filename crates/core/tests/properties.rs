#![forbid(unsafe_code)]

use cf_core::actions::{
    NewNode, add_nodes, delete_instances, move_instance, paste_as_clone, toggle_starred,
};
use cf_core::{
    Command, EngineConfig, Executor, Forest, InstanceRef, MemoryStore, Node, NodeId, ParentRef,
    TemplateId, TreeId,
};
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Op {
    Add { parent: usize, position: u8 },
    Delete { target: usize },
    Move { target: usize, to: usize, position: u8 },
    Paste { target: usize, to: usize, position: u8 },
    Star { target: usize },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (any::<usize>(), 0u8..6).prop_map(|(parent, position)| Op::Add { parent, position }),
        any::<usize>().prop_map(|target| Op::Delete { target }),
        (any::<usize>(), any::<usize>(), 0u8..6)
            .prop_map(|(target, to, position)| Op::Move { target, to, position }),
        (any::<usize>(), any::<usize>(), 0u8..6)
            .prop_map(|(target, to, position)| Op::Paste { target, to, position }),
        any::<usize>().prop_map(|target| Op::Star { target }),
    ]
}

fn tree() -> TreeId {
    TreeId::try_new("prop").expect("tree id")
}

fn template() -> TemplateId {
    TemplateId::try_new("task").expect("template id")
}

fn id(value: &str) -> NodeId {
    NodeId::try_new(value).expect("node id")
}

fn seed() -> Forest {
    Forest::reconstruct(
        tree(),
        vec![
            Node::new(id("a"), template(), "a").with_parent(ParentRef::Root, 0),
            Node::new(id("b"), template(), "b").with_parent(ParentRef::Root, 1),
            Node::new(id("c"), template(), "c").with_parent(ParentRef::Node(id("a")), 0),
        ],
    )
    .expect("seed")
}

fn instances(forest: &Forest) -> Vec<InstanceRef> {
    forest
        .nodes()
        .flat_map(|node| {
            node.parent_ids
                .iter()
                .map(|parent| InstanceRef::new(node.id.clone(), parent.clone()))
        })
        .collect()
}

fn pick_parent(forest: &Forest, index: usize) -> ParentRef {
    let ids: Vec<&NodeId> = forest.nodes().map(|node| &node.id).collect();
    match index % (ids.len() + 1) {
        0 => ParentRef::Root,
        n => ParentRef::Node(ids[n - 1].clone()),
    }
}

fn build(forest: &Forest, op: &Op, counter: &mut usize) -> Option<Command> {
    let all = instances(forest);
    let pick = |index: usize| all.get(index % all.len().max(1)).cloned();
    match op {
        Op::Add { parent, position } => {
            *counter += 1;
            let new = NewNode::with_id(id(&format!("n{counter}")), template(), "new");
            add_nodes(
                forest,
                &pick_parent(forest, *parent),
                vec![new],
                Some(u32::from(*position)),
            )
            .ok()
        }
        Op::Delete { target } => delete_instances(forest, &[pick(*target)?]).ok(),
        Op::Move {
            target,
            to,
            position,
        } => {
            let instance = pick(*target)?;
            move_instance(
                forest,
                &instance.node,
                &instance.parent,
                &pick_parent(forest, *to),
                Some(u32::from(*position)),
            )
            .ok()
        }
        Op::Paste {
            target,
            to,
            position,
        } => {
            let instance = pick(*target)?;
            paste_as_clone(
                forest,
                &instance.node,
                &pick_parent(forest, *to),
                Some(u32::from(*position)),
            )
            .ok()
        }
        Op::Star { target } => toggle_starred(forest, &[pick(*target)?.node]).ok(),
    }
}

fn assert_store_in_sync(
    executor: &mut Executor,
    store: &MemoryStore,
) -> Result<(), TestCaseError> {
    let outcomes = executor.flush();
    prop_assert!(outcomes.iter().all(|outcome| outcome.is_ok()), "{:?}", outcomes);
    let stored = Forest::reconstruct(tree(), store.nodes(&tree())).expect("reconstruct");
    prop_assert_eq!(&stored, &*executor.forest());
    Ok(())
}

proptest! {
    #[test]
    fn edits_keep_every_sibling_set_contiguous(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let mut executor = Executor::detached(seed(), EngineConfig::default());
        let mut counter = 0;
        for op in &ops {
            let forest = executor.forest();
            let Some(command) = build(&forest, op, &mut counter) else {
                continue;
            };
            executor.execute_command(command).expect("execute");
            let checked = executor.forest().check_invariants();
            prop_assert!(checked.is_ok(), "{:?} after {:?}", checked, op);
        }
    }

    #[test]
    fn undo_and_redo_are_exact(ops in prop::collection::vec(op_strategy(), 1..30)) {
        let config = EngineConfig {
            history_limit: 1_000,
            ..EngineConfig::default()
        };
        let mut executor = Executor::detached(seed(), config);
        let mut snapshots = vec![(*executor.forest()).clone()];
        let mut counter = 0;
        for op in &ops {
            let forest = executor.forest();
            let Some(command) = build(&forest, op, &mut counter) else {
                continue;
            };

            let mut scratch = (*forest).clone();
            command.execute(&mut scratch).expect("execute");
            let applied = scratch.clone();
            command.undo_state(&mut scratch).expect("undo_state");
            prop_assert_eq!(&scratch, &*forest);
            command.execute(&mut scratch).expect("re-execute");
            prop_assert_eq!(&scratch, &applied);

            executor.execute_command(command).expect("execute");
            snapshots.push((*executor.forest()).clone());
        }

        for expected in snapshots.iter().rev().skip(1) {
            prop_assert!(executor.undo().expect("undo"));
            prop_assert_eq!(&*executor.forest(), expected);
        }
        prop_assert!(!executor.can_undo());
        while executor.redo().expect("redo") {}
        prop_assert_eq!(&*executor.forest(), snapshots.last().expect("snapshot"));
    }

    #[test]
    fn reconstruction_is_idempotent(ops in prop::collection::vec(op_strategy(), 0..30)) {
        let mut executor = Executor::detached(seed(), EngineConfig::default());
        let mut counter = 0;
        for op in &ops {
            let forest = executor.forest();
            if let Some(command) = build(&forest, op, &mut counter) {
                executor.execute_command(command).expect("execute");
            }
        }
        let forest = executor.forest();
        let rebuilt = Forest::reconstruct(tree(), forest.flatten()).expect("reconstruct");
        prop_assert_eq!(&rebuilt, &*forest);
        prop_assert_eq!(rebuilt.fingerprint(), forest.fingerprint());
    }

    #[test]
    fn store_follows_post_undo_and_redo(ops in prop::collection::vec(op_strategy(), 1..25)) {
        let config = EngineConfig {
            history_limit: 1_000,
            ..EngineConfig::default()
        };
        let store = MemoryStore::with_nodes(&tree(), seed().flatten());
        let mut executor =
            Executor::new(seed(), Box::new(store.clone()), config).expect("executor");
        let mut counter = 0;
        for op in &ops {
            let forest = executor.forest();
            let Some(command) = build(&forest, op, &mut counter) else {
                continue;
            };
            executor.execute_command(command).expect("execute");
            assert_store_in_sync(&mut executor, &store)?;
        }
        while executor.undo().expect("undo") {
            assert_store_in_sync(&mut executor, &store)?;
        }
        while executor.redo().expect("redo") {
            assert_store_in_sync(&mut executor, &store)?;
        }
    }
}
