#![forbid(unsafe_code)]

use super::{BuildError, batch_update_plan, finish};
use crate::command::{Command, CommandPayload};
use crate::edit::EditSet;
use crate::forest::Forest;
use crate::template::Template;

/// Regenerates the derived name of every node using `template`, as one
/// command. Run after the template's name rule changes.
pub fn propagate_template_names(forest: &Forest, template: &Template) -> Result<Command, BuildError> {
    let mut edits = EditSet::new(forest);
    let mut node_ids = Vec::new();
    for node in forest.nodes().filter(|node| node.template_id == template.id) {
        let Some(name) = template.render_name(&node.data) else {
            continue;
        };
        if name == node.name {
            continue;
        }
        if let Some(record) = edits.node_mut(&node.id) {
            record.name = name;
            node_ids.push(node.id.clone());
        }
    }
    tracing::debug!(
        template = %template.id,
        renamed = node_ids.len(),
        "propagating template names"
    );
    let payload = CommandPayload::PropagateNames {
        template_id: template.id.clone(),
        node_ids,
    };
    finish(edits, payload, batch_update_plan)
}
