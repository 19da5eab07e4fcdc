#![forbid(unsafe_code)]

use super::{BuildError, batch_update_plan, finish};
use crate::command::{Command, CommandPayload};
use crate::edit::EditSet;
use crate::forest::Forest;
use crate::ids::{NodeId, TemplateId};
use crate::node::NodeData;
use crate::template::{TemplateSet, remap_data};

/// Merges the same `fields` into every target's payload.
pub fn batch_update_data(
    forest: &Forest,
    ids: &[NodeId],
    fields: &NodeData,
) -> Result<Command, BuildError> {
    if ids.is_empty() {
        return Err(BuildError::EmptyTargets);
    }
    let mut edits = EditSet::new(forest);
    for id in ids {
        let node = edits
            .node_mut(id)
            .ok_or_else(|| BuildError::NodeNotFound(id.clone()))?;
        for (key, value) in fields {
            node.data.insert(key.clone(), value.clone());
        }
    }
    let payload = CommandPayload::BatchUpdateData {
        node_ids: ids.to_vec(),
        fields: fields.keys().cloned().collect(),
    };
    finish(edits, payload, batch_update_plan)
}

/// Switches every target to `template_id`, carrying payload values across by
/// field name. Names are regenerated when the new template has a rule.
pub fn batch_retemplate(
    forest: &Forest,
    ids: &[NodeId],
    templates: &TemplateSet,
    template_id: &TemplateId,
) -> Result<Command, BuildError> {
    if ids.is_empty() {
        return Err(BuildError::EmptyTargets);
    }
    let new = templates
        .get(template_id)
        .ok_or_else(|| BuildError::TemplateNotFound(template_id.clone()))?;
    let mut edits = EditSet::new(forest);
    for id in ids {
        let node = edits
            .node(id)
            .ok_or_else(|| BuildError::NodeNotFound(id.clone()))?;
        if &node.template_id == template_id {
            continue;
        }
        let old = templates
            .get(&node.template_id)
            .ok_or_else(|| BuildError::TemplateNotFound(node.template_id.clone()))?;
        let data = remap_data(old, new, &node.data);
        let name = new.render_name(&data);
        if let Some(node) = edits.node_mut(id) {
            node.template_id = template_id.clone();
            node.data = data;
            if let Some(name) = name {
                node.name = name;
            }
        }
    }
    let payload = CommandPayload::BatchRetemplate {
        node_ids: ids.to_vec(),
        template_id: template_id.clone(),
    };
    finish(edits, payload, batch_update_plan)
}
