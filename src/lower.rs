use rustc_hash::FxHashMap as HashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    client::DataHandle,
    graph::{OpKind, Value, post_order},
    layout::Layout,
    literal::Literal,
    num::DataType,
};

#[derive(Debug, Error)]
pub enum LowerError {
    #[error("lowering error: no results registered")]
    Empty,
}

/// Layout and element type of one program value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueShape {
    pub layout: Layout,
    pub r#type: DataType,
}

impl std::fmt::Display for ValueShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.r#type, self.layout)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramShape {
    pub parameters: Vec<ValueShape>,
    pub results: Vec<ValueShape>,
}

#[derive(Debug, Clone)]
pub enum InstrOp {
    Parameter(usize),
    Constant(Literal),
    Add,
    Mul,
    Neg,
}

/// One step of a lowered program. Operands refer to earlier instruction
/// slots.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub op: InstrOp,
    pub operands: Vec<usize>,
    pub layout: Layout,
    pub r#type: DataType,
}

/// A compilable unit produced by lowering: a straight-line program over
/// instruction slots, plus the shapes of its parameters and results.
#[derive(Debug, Clone)]
pub struct Computation {
    name: String,
    instructions: Vec<Instruction>,
    results: Vec<usize>,
    program_shape: ProgramShape,
}

impl Computation {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Instruction slots holding the program results, in registration order.
    #[inline]
    pub fn results(&self) -> &[usize] {
        &self.results
    }

    #[inline]
    pub fn program_shape(&self) -> &ProgramShape {
        &self.program_shape
    }

    #[cfg(test)]
    pub(crate) fn program_shape_mut(&mut self) -> &mut ProgramShape {
        &mut self.program_shape
    }
}

/// Turns a set of symbolic root values into a [`Computation`]. Device-data
/// leaves become parameters; [`LoweringContext::parameters_data`] yields the
/// buffers to feed them with, in parameter order.
#[derive(Debug, Default)]
pub struct LoweringContext {
    name: String,
    roots: Vec<Value>,
    parameters: Vec<DataHandle>,
}

impl LoweringContext {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            name,
            ..Default::default()
        }
    }

    /// Registers a root value as a program result.
    pub fn add_result(&mut self, value: Value) {
        self.roots.push(value);
    }

    /// Device buffers bound to the program parameters. Filled in by
    /// [`LoweringContext::build`].
    #[inline]
    pub fn parameters_data(&self) -> &[DataHandle] {
        &self.parameters
    }

    pub fn build(&mut self) -> Result<Computation, LowerError> {
        if self.roots.is_empty() {
            return Err(LowerError::Empty);
        }

        let order = post_order(&self.roots);
        let mut slots: HashMap<usize, usize> = HashMap::default();
        let mut bound: HashMap<usize, usize> = HashMap::default();
        let mut instructions = Vec::with_capacity(order.len());
        let mut parameters = Vec::new();
        let mut parameter_shapes = Vec::new();

        for value in &order {
            let op = match value.op() {
                OpKind::DeviceData(data) => {
                    // the same buffer feeds a single parameter
                    let index = match bound.get(&data.id().get()) {
                        Some(&index) => index,
                        None => {
                            let index = parameters.len();
                            bound.insert(data.id().get(), index);
                            parameters.push(data.clone());
                            parameter_shapes.push(ValueShape {
                                layout: value.layout(),
                                r#type: value.data_type(),
                            });
                            index
                        }
                    };
                    InstrOp::Parameter(index)
                }
                OpKind::Constant(literal) => InstrOp::Constant(literal.clone()),
                OpKind::Add => InstrOp::Add,
                OpKind::Mul => InstrOp::Mul,
                OpKind::Neg => InstrOp::Neg,
            };
            let operands = value
                .operands()
                .iter()
                .map(|operand| slots[&operand.id().get()])
                .collect();
            slots.insert(value.id().get(), instructions.len());
            instructions.push(Instruction {
                op,
                operands,
                layout: value.layout(),
                r#type: value.data_type(),
            });
        }

        let results: Vec<usize> = self
            .roots
            .iter()
            .map(|root| slots[&root.id().get()])
            .collect();
        let result_shapes = results
            .iter()
            .map(|&slot| {
                let instruction = &instructions[slot];
                ValueShape {
                    layout: instruction.layout.clone(),
                    r#type: instruction.r#type,
                }
            })
            .collect();

        self.parameters = parameters;
        Ok(Computation {
            name: self.name.clone(),
            instructions,
            results,
            program_shape: ProgramShape {
                parameters: parameter_shapes,
                results: result_shapes,
            },
        })
    }
}
