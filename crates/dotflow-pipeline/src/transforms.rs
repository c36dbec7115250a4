//! Graph transforms applied after parsing and before validation.
//!
//! Built-in transforms run first, in a fixed order: goal expansion, then the
//! model stylesheet. Caller-supplied transforms run afterwards in the order
//! given.

use dotflow_dot::{AttrValue, Graph};
use dotflow_types::Result;

use crate::stylesheet::{apply_stylesheet, parse_stylesheet};

/// A rewrite of the parsed graph.
pub trait GraphTransform: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, graph: &mut Graph) -> Result<()>;
}

/// Replaces every `$goal` in non-empty node prompts with the graph `goal`.
pub struct GoalExpansion;

impl GraphTransform for GoalExpansion {
    fn name(&self) -> &str {
        "goal_expansion"
    }

    fn apply(&self, graph: &mut Graph) -> Result<()> {
        let goal = match graph.str_attr("goal") {
            Some(goal) if !goal.is_empty() => goal.to_string(),
            _ => return Ok(()),
        };

        for node in graph.nodes.values_mut() {
            let Some(AttrValue::String(prompt)) = node.attrs.get_mut("prompt") else {
                continue;
            };
            if prompt.contains("$goal") {
                *prompt = prompt.replace("$goal", &goal);
            }
        }
        Ok(())
    }
}

/// Applies the `model_stylesheet` graph attribute.
pub struct ModelStylesheet;

impl GraphTransform for ModelStylesheet {
    fn name(&self) -> &str {
        "model_stylesheet"
    }

    fn apply(&self, graph: &mut Graph) -> Result<()> {
        let Some(source) = graph.str_attr("model_stylesheet") else {
            return Ok(());
        };
        if source.trim().is_empty() {
            return Ok(());
        }
        let stylesheet = parse_stylesheet(source);
        tracing::debug!(rules = stylesheet.rules.len(), "applying model stylesheet");
        apply_stylesheet(graph, &stylesheet);
        Ok(())
    }
}

/// Run the built-in transforms followed by `extra`.
pub fn apply_transforms(graph: &mut Graph, extra: &[Box<dyn GraphTransform>]) -> Result<()> {
    GoalExpansion.apply(graph)?;
    ModelStylesheet.apply(graph)?;
    for transform in extra {
        tracing::debug!(transform = transform.name(), "applying custom transform");
        transform.apply(graph)?;
    }
    Ok(())
}
