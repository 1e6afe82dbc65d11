use std::sync::Arc;

use derive_more::{Deref, Display};
use rustc_hash::FxHashSet as HashSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{client::DataHandle, layout::Layout, literal::Literal, num::DataType};

pub mod dump;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("graph op error: operand layout {0} not match {1}")]
    Layout(Layout, Layout),
    #[error("graph op error: operand data type {0} not match {1}")]
    Type(DataType, DataType),
}

#[derive(Debug, Clone, Display)]
pub enum OpKind {
    /// A leaf referring to a buffer already resident on a device. Lowers to a
    /// computation parameter.
    #[display("device-data")]
    DeviceData(DataHandle),
    #[display("constant")]
    Constant(Literal),
    #[display("add")]
    Add,
    #[display("mul")]
    Mul,
    #[display("neg")]
    Neg,
}

#[derive(Debug)]
pub struct Node {
    op: OpKind,
    operands: Vec<Value>,
    layout: Layout,
    r#type: DataType,
    id: uid::Id<NodeId>,
}

impl Node {
    #[inline]
    pub fn op(&self) -> &OpKind {
        &self.op
    }

    #[inline]
    pub fn operands(&self) -> &[Value] {
        &self.operands
    }

    #[inline]
    pub fn layout(&self) -> Layout {
        self.layout.clone()
    }

    #[inline]
    pub fn data_type(&self) -> DataType {
        self.r#type
    }

    #[inline]
    pub fn id(&self) -> uid::Id<NodeId> {
        self.id
    }
}

/// A shared handle to a symbolic graph node.
#[derive(Debug, Clone, Deref)]
pub struct Value(Arc<Node>);

impl Value {
    fn node(op: OpKind, operands: Vec<Value>, layout: Layout, r#type: DataType) -> Self {
        let id = uid::Id::new();
        Self(Arc::new(Node {
            op,
            operands,
            layout,
            r#type,
            id,
        }))
    }

    pub fn device_data(data: DataHandle) -> Self {
        let layout = data.layout();
        let r#type = data.data_type();
        Self::node(OpKind::DeviceData(data), vec![], layout, r#type)
    }

    pub fn constant(literal: Literal) -> Self {
        let layout = literal.layout();
        let r#type = literal.data_type();
        Self::node(OpKind::Constant(literal), vec![], layout, r#type)
    }

    fn binary(op: OpKind, lhs: &Value, rhs: &Value) -> Result<Value, GraphError> {
        if lhs.layout() != rhs.layout() {
            return Err(GraphError::Layout(lhs.layout(), rhs.layout()));
        }
        if lhs.data_type() != rhs.data_type() {
            return Err(GraphError::Type(lhs.data_type(), rhs.data_type()));
        }
        let operands = vec![lhs.clone(), rhs.clone()];
        Ok(Self::node(op, operands, lhs.layout(), lhs.data_type()))
    }

    /// Element-wise addition. Returns error if the operand layouts or element
    /// types do not match.
    #[inline]
    pub fn try_add(&self, rhs: &Value) -> Result<Value, GraphError> {
        Self::binary(OpKind::Add, self, rhs)
    }

    /// Element-wise multiplication. Returns error if the operand layouts or
    /// element types do not match.
    #[inline]
    pub fn try_mul(&self, rhs: &Value) -> Result<Value, GraphError> {
        Self::binary(OpKind::Mul, self, rhs)
    }

    #[inline]
    pub fn neg(&self) -> Value {
        let operands = vec![self.clone()];
        Self::node(OpKind::Neg, operands, self.layout(), self.data_type())
    }
}

impl std::ops::Add<Value> for Value {
    type Output = Value;

    fn add(self, rhs: Value) -> Self::Output {
        self.try_add(&rhs).expect("value layouts must match")
    }
}

impl std::ops::Mul<Value> for Value {
    type Output = Value;

    fn mul(self, rhs: Value) -> Self::Output {
        self.try_mul(&rhs).expect("value layouts must match")
    }
}

impl std::ops::Neg for Value {
    type Output = Value;

    fn neg(self) -> Self::Output {
        Value::neg(&self)
    }
}

/// Deduplicated post-order over the graphs reachable from `roots`. Operands
/// always precede their users; shared subgraphs appear once.
pub fn post_order(roots: &[Value]) -> Vec<Value> {
    fn visit(value: &Value, visited: &mut HashSet<usize>, order: &mut Vec<Value>) {
        if !visited.insert(value.id().get()) {
            return;
        }
        for operand in value.operands() {
            visit(operand, visited, order);
        }
        order.push(value.clone());
    }

    let mut visited = HashSet::default();
    let mut order = Vec::new();
    for root in roots {
        visit(root, &mut visited, &mut order);
    }
    order
}
