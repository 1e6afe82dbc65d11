//! The backend thread: owns the buffer stash and interprets compiled
//! programs. All device kinds execute here, on host.

use itertools::izip;
use rustc_hash::FxHashMap as HashMap;

use super::{ClientError, ClientEvent, DataHandle, Device, Executable};
use crate::{
    literal::Literal,
    lower::{Computation, InstrOp, Instruction, ValueShape},
    num::{Scalar, dispatch},
};

#[derive(Debug, Default)]
struct Stash {
    buffers: HashMap<usize, (Device, Literal)>,
}

impl Stash {
    fn insert(&mut self, device: Device, literal: Literal) -> DataHandle {
        let handle = DataHandle::new(device, literal.layout(), literal.data_type());
        self.buffers.insert(handle.id().get(), (device, literal));
        handle
    }

    fn fetch(&self, handle: &DataHandle) -> Result<&(Device, Literal), ClientError> {
        self.buffers
            .get(&handle.id().get())
            .ok_or(ClientError::Buffer(handle.id().get()))
    }
}

pub(crate) fn serve(receiver: flume::Receiver<ClientEvent>) {
    let mut stash = Stash::default();

    while let Ok(event) = receiver.recv() {
        match event {
            ClientEvent::Upload {
                literal,
                device,
                sender,
            } => {
                log::trace!("upload {}{} to {device}", literal.data_type(), literal.layout());
                let handle = stash.insert(device, literal);
                _ = sender.send(Ok(handle));
            }
            ClientEvent::Execute {
                executable,
                parameters,
                device,
                sender,
            } => {
                log::trace!(
                    "execute {} on {device}",
                    executable.computation().name()
                );
                let results = execute(&mut stash, &executable, &parameters, &device);
                _ = sender.send(results);
            }
            ClientEvent::Download { data, sender } => {
                log::trace!("download {} buffers", data.len());
                let literals = data
                    .iter()
                    .map(|handle| stash.fetch(handle).map(|(_, literal)| literal.clone()))
                    .collect();
                _ = sender.send(literals);
            }
        }
    }
}

fn execute(
    stash: &mut Stash,
    executable: &Executable,
    parameters: &[DataHandle],
    device: &Device,
) -> Result<Vec<DataHandle>, ClientError> {
    let shape = executable.computation().program_shape();
    if parameters.len() != shape.parameters.len() {
        return Err(ClientError::ParameterCount(
            shape.parameters.len(),
            parameters.len(),
        ));
    }

    let mut literals = Vec::with_capacity(parameters.len());
    for (index, handle) in parameters.iter().enumerate() {
        let (home, literal) = stash.fetch(handle)?;
        if home != device {
            return Err(ClientError::Placement(handle.id().get(), *home, *device));
        }
        let found = ValueShape {
            layout: literal.layout(),
            r#type: literal.data_type(),
        };
        if shape.parameters[index] != found {
            return Err(ClientError::Parameter(
                index,
                shape.parameters[index].clone(),
                found,
            ));
        }
        literals.push(literal.clone());
    }

    let results = run(executable.computation(), &literals)?;
    Ok(results
        .into_iter()
        .map(|literal| stash.insert(*device, literal))
        .collect())
}

fn run(computation: &Computation, parameters: &[Literal]) -> Result<Vec<Literal>, ClientError> {
    let mut slots: Vec<Literal> = Vec::with_capacity(computation.instructions().len());
    for instruction in computation.instructions() {
        let literal = match &instruction.op {
            InstrOp::Parameter(index) => parameters[*index].clone(),
            InstrOp::Constant(literal) => literal.clone(),
            InstrOp::Add | InstrOp::Mul | InstrOp::Neg => {
                let operands: Vec<&Literal> = instruction
                    .operands
                    .iter()
                    .map(|&slot| &slots[slot])
                    .collect();
                dispatch!(instruction.r#type, eval(instruction, &operands))?
            }
        };
        slots.push(literal);
    }
    Ok(computation
        .results()
        .iter()
        .map(|&slot| slots[slot].clone())
        .collect())
}

fn eval<T: Scalar>(
    instruction: &Instruction,
    operands: &[&Literal],
) -> Result<Literal, ClientError> {
    let binary = |f: fn(T, T) -> T| -> Result<Literal, ClientError> {
        let lhs: Vec<T> = bytemuck::pod_collect_to_vec(operands[0].data());
        let rhs: Vec<T> = bytemuck::pod_collect_to_vec(operands[1].data());
        let data: Vec<T> = izip!(lhs, rhs).map(|(x, y)| f(x, y)).collect();
        Ok(Literal::from_slice(instruction.layout.clone(), &data)?)
    };
    let unary = |f: fn(T) -> T| -> Result<Literal, ClientError> {
        let input: Vec<T> = bytemuck::pod_collect_to_vec(operands[0].data());
        let data: Vec<T> = input.into_iter().map(f).collect();
        Ok(Literal::from_slice(instruction.layout.clone(), &data)?)
    };
    match instruction.op {
        InstrOp::Add => binary(T::add),
        InstrOp::Mul => binary(T::mul),
        InstrOp::Neg => unary(T::neg),
        InstrOp::Parameter(_) | InstrOp::Constant(_) => unreachable!(),
    }
}
