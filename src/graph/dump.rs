//! Text and Graphviz dumps of symbolic graphs, for test diagnostics.

use itertools::Itertools;
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};

use super::{OpKind, Value, post_order};

/// Renders the graphs reachable from `roots` as one line per node:
/// `%2 = F32[2, 2] add(%0, %1)`. Root nodes are marked.
pub fn to_text(roots: &[Value]) -> String {
    let order = post_order(roots);
    let slots: HashMap<usize, usize> = order
        .iter()
        .enumerate()
        .map(|(slot, value)| (value.id().get(), slot))
        .collect();
    let marked: HashSet<usize> = roots.iter().map(|value| value.id().get()).collect();

    let mut text = String::from("IR {\n");
    for (slot, value) in order.iter().enumerate() {
        let operands = value
            .operands()
            .iter()
            .map(|operand| format!("%{}", slots[&operand.id().get()]))
            .format(", ");
        let detail = match value.op() {
            OpKind::DeviceData(data) => format!(" device={}", data.device()),
            _ => String::new(),
        };
        let root = match marked.contains(&value.id().get()) {
            true => ", ROOT",
            false => "",
        };
        text.push_str(&format!(
            "  %{slot} = {}{} {}({operands}){detail}{root}\n",
            value.data_type(),
            value.layout(),
            value.op(),
        ));
    }
    text.push_str("}\n");
    text
}

/// Renders the graphs reachable from `roots` as a Graphviz digraph with one
/// node per IR value and one edge per operand use.
pub fn to_dot(roots: &[Value]) -> String {
    let order = post_order(roots);
    let slots: HashMap<usize, usize> = order
        .iter()
        .enumerate()
        .map(|(slot, value)| (value.id().get(), slot))
        .collect();

    let mut text = String::from("digraph ir {\n");
    for (slot, value) in order.iter().enumerate() {
        text.push_str(&format!(
            "  n{slot} [label=\"{}\\n{}{}\"];\n",
            value.op(),
            value.data_type(),
            value.layout(),
        ));
    }
    for (slot, value) in order.iter().enumerate() {
        for operand in value.operands() {
            text.push_str(&format!("  n{} -> n{slot};\n", slots[&operand.id().get()]));
        }
    }
    text.push_str("}\n");
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::literal::Literal;

    fn constant(data: &[f32]) -> Value {
        Value::constant(Literal::from_slice([data.len()], data).unwrap())
    }

    #[test]
    fn test_to_text() {
        let a = constant(&[1.0, 2.0]);
        let b = constant(&[3.0, 4.0]);
        let sum = a.try_add(&b).unwrap();

        let text = to_text(&[sum]);
        assert_eq!(
            text,
            "IR {\n\
             \x20 %0 = F32[2] constant()\n\
             \x20 %1 = F32[2] constant()\n\
             \x20 %2 = F32[2] add(%0, %1), ROOT\n\
             }\n"
        );
    }

    #[test]
    fn test_to_text_shared_subgraph() {
        let a = constant(&[1.0, 2.0]);
        let sum = a.try_add(&a).unwrap();

        // the shared operand is printed once and referenced twice
        let text = to_text(&[sum]);
        assert_eq!(text.matches("constant").count(), 1);
        assert!(text.contains("add(%0, %0)"));
    }

    #[test]
    fn test_to_dot() {
        let a = constant(&[1.0]);
        let neg = -a;

        let dot = to_dot(&[neg]);
        assert!(dot.starts_with("digraph ir {\n"));
        assert!(dot.contains("n0 [label=\"constant\\nF32[1]\"];"));
        assert!(dot.contains("n1 [label=\"neg\\nF32[1]\"];"));
        assert!(dot.contains("n0 -> n1;"));
    }
}
