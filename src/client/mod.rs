use std::{
    str::FromStr,
    sync::{Arc, OnceLock},
};

use derive_more::Display;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    layout::Layout,
    literal::{Literal, LiteralError},
    lower::{Computation, InstrOp, LowerError, ValueShape},
    num::DataType,
};

mod backend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum DeviceKind {
    #[display("CPU")]
    Cpu,
    #[display("GPU")]
    Gpu,
    #[display("TPU")]
    Tpu,
}

impl FromStr for DeviceKind {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CPU" => Ok(Self::Cpu),
            "GPU" => Ok(Self::Gpu),
            "TPU" => Ok(Self::Tpu),
            _ => Err(ClientError::ParseDevice(s.into())),
        }
    }
}

/// A compute target understood by the runtime, identified by hardware kind
/// and ordinal. Renders as `CPU:0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[display("{kind}:{ordinal}")]
pub struct Device {
    pub kind: DeviceKind,
    pub ordinal: usize,
}

impl FromStr for Device {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, ordinal) = s.split_once(':').ok_or(ClientError::ParseDevice(s.into()))?;
        let kind = kind.parse()?;
        let ordinal = ordinal
            .parse()
            .map_err(|_| ClientError::ParseDevice(s.into()))?;
        Ok(Self { kind, ordinal })
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BufferId;

/// A cloneable handle to a buffer resident on a device. The backing buffer
/// outlives every copy of the handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataHandle {
    id: uid::Id<BufferId>,
    device: Device,
    layout: Layout,
    r#type: DataType,
}

impl DataHandle {
    pub(crate) fn new(device: Device, layout: Layout, r#type: DataType) -> Self {
        let id = uid::Id::new();
        Self {
            id,
            device,
            layout,
            r#type,
        }
    }

    #[inline]
    pub fn id(&self) -> uid::Id<BufferId> {
        self.id
    }

    #[inline]
    pub fn device(&self) -> Device {
        self.device
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
    pub fn shape(&self) -> ValueShape {
        ValueShape {
            layout: self.layout(),
            r#type: self.r#type,
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("device parse error: invalid device string {0:?}")]
    ParseDevice(String),
    #[error("device error: {0} is not a local device")]
    UnknownDevice(Device),
    #[error("compile error: instruction {0} expects {1} operands, found {2}")]
    OperandCount(usize, usize, usize),
    #[error("compile error: instruction {0} refers to slot {1} not yet computed")]
    OperandSlot(usize, usize),
    #[error("compile error: instruction {0} shape {1} not match operand shape {2}")]
    OperandShape(usize, ValueShape, ValueShape),
    #[error("compile error: parameter index {0} out of range {1}")]
    ParameterIndex(usize, usize),
    #[error("compile error: parameter {0} declared {1}, lowered as {2}")]
    Signature(usize, ValueShape, ValueShape),
    #[error("compile error: result slot {0} out of range {1}")]
    ResultSlot(usize, usize),
    #[error("compile error: computation yields {0} results, instance requests {1}")]
    ResultCount(usize, usize),
    #[error("compile error: result shape {0} not match requested {1}")]
    ResultShape(ValueShape, ValueShape),
    #[error("execute error: parameter {0} expects shape {1}, found {2}")]
    Parameter(usize, ValueShape, ValueShape),
    #[error("execute error: computation expects {0} parameters, found {1}")]
    ParameterCount(usize, usize),
    #[error("transfer error: unknown or stale buffer {0}")]
    Buffer(usize),
    #[error("transfer error: buffer {0} resides on {1}, not {2}")]
    Placement(usize, Device, Device),
    #[error("client error: backend disconnected")]
    Disconnected,
    #[error(transparent)]
    Literal(#[from] LiteralError),
    #[error(transparent)]
    Lower(#[from] LowerError),
}

impl From<flume::RecvError> for ClientError {
    fn from(_: flume::RecvError) -> Self {
        Self::Disconnected
    }
}

/// One computation to compile, bound to its target device and the devices
/// participating in compilation.
#[derive(Debug, Clone)]
pub struct CompileInstance {
    pub computation: Computation,
    pub device: Device,
    pub compilation_devices: Vec<Device>,
    /// Expected result shapes; checked against the lowered program when set.
    pub result_shape: Option<Vec<ValueShape>>,
}

/// A validated program ready for execution on its target device.
#[derive(Debug, Clone)]
pub struct Executable {
    computation: Computation,
    device: Device,
    compilation_devices: Vec<Device>,
}

impl Executable {
    #[inline]
    pub fn computation(&self) -> &Computation {
        &self.computation
    }

    #[inline]
    pub fn device(&self) -> Device {
        self.device
    }

    #[inline]
    pub fn compilation_devices(&self) -> &[Device] {
        &self.compilation_devices
    }
}

pub(crate) enum ClientEvent {
    Upload {
        literal: Literal,
        device: Device,
        sender: flume::Sender<Result<DataHandle, ClientError>>,
    },
    Execute {
        executable: Arc<Executable>,
        parameters: Vec<DataHandle>,
        device: Device,
        sender: flume::Sender<Result<Vec<DataHandle>, ClientError>>,
    },
    Download {
        data: Vec<DataHandle>,
        sender: flume::Sender<Result<Vec<Literal>, ClientError>>,
    },
}

/// The process-wide compilation and execution service. Owns the device
/// topology and talks to the backend thread holding the buffer stash.
#[derive(Debug, Clone)]
pub struct Client {
    devices: Vec<Device>,
    default: Device,
    sender: flume::Sender<ClientEvent>,
}

static CLIENT: OnceLock<Client> = OnceLock::new();

impl Client {
    /// The singleton client, built from the environment on first use.
    pub fn get() -> &'static Client {
        CLIENT.get_or_init(|| ClientBuilder::from_env().build())
    }

    #[inline]
    pub fn default_device(&self) -> Device {
        self.default
    }

    #[inline]
    pub fn local_devices(&self) -> &[Device] {
        &self.devices
    }

    /// Devices across the whole fleet. A single-process runtime sees exactly
    /// its local devices.
    #[inline]
    pub fn all_devices(&self) -> &[Device] {
        &self.devices
    }

    /// Devices participating when compiling for `device`: every local device
    /// of the same hardware kind.
    pub fn compilation_devices(&self, device: &Device) -> Vec<Device> {
        self.devices
            .iter()
            .filter(|d| d.kind == device.kind)
            .copied()
            .collect()
    }

    /// Validates and seals each instance into an [`Executable`].
    pub fn compile(
        &self,
        instances: Vec<CompileInstance>,
    ) -> Result<Vec<Arc<Executable>>, ClientError> {
        instances
            .into_iter()
            .map(|instance| {
                let CompileInstance {
                    computation,
                    device,
                    compilation_devices,
                    result_shape,
                } = instance;
                if !self.devices.contains(&device) {
                    return Err(ClientError::UnknownDevice(device));
                }
                validate(&computation)?;
                if let Some(expected) = result_shape {
                    check_result_shape(&computation, &expected)?;
                }
                log::debug!("compiled computation {} for {device}", computation.name());
                Ok(Arc::new(Executable {
                    computation,
                    device,
                    compilation_devices,
                }))
            })
            .collect()
    }

    /// Runs the executable against device-resident parameter buffers and
    /// returns one result handle per program result.
    pub fn execute(
        &self,
        executable: &Arc<Executable>,
        parameters: &[DataHandle],
        device: &Device,
    ) -> Result<Vec<DataHandle>, ClientError> {
        if !self.devices.contains(device) {
            return Err(ClientError::UnknownDevice(*device));
        }
        let (sender, receiver) = flume::bounded(0);
        let event = ClientEvent::Execute {
            executable: executable.clone(),
            parameters: parameters.to_vec(),
            device: *device,
            sender,
        };
        self.sender
            .send(event)
            .map_err(|_| ClientError::Disconnected)?;
        receiver.recv()?
    }

    /// Uploads a host literal to `device` and returns the buffer handle.
    pub fn transfer_to_server(
        &self,
        literal: &Literal,
        device: &Device,
    ) -> Result<DataHandle, ClientError> {
        if !self.devices.contains(device) {
            return Err(ClientError::UnknownDevice(*device));
        }
        let (sender, receiver) = flume::bounded(0);
        let event = ClientEvent::Upload {
            literal: literal.clone(),
            device: *device,
            sender,
        };
        self.sender
            .send(event)
            .map_err(|_| ClientError::Disconnected)?;
        receiver.recv()?
    }

    /// Downloads device buffers as host literals, one per handle.
    pub fn transfer_from_server(&self, data: &[DataHandle]) -> Result<Vec<Literal>, ClientError> {
        let (sender, receiver) = flume::bounded(0);
        let event = ClientEvent::Download {
            data: data.to_vec(),
            sender,
        };
        self.sender
            .send(event)
            .map_err(|_| ClientError::Disconnected)?;
        receiver.recv()?
    }
}

fn validate(computation: &Computation) -> Result<(), ClientError> {
    let shape = computation.program_shape();
    let instructions = computation.instructions();

    for (index, instruction) in instructions.iter().enumerate() {
        let expect = match instruction.op {
            InstrOp::Parameter(_) | InstrOp::Constant(_) => 0,
            InstrOp::Neg => 1,
            InstrOp::Add | InstrOp::Mul => 2,
        };
        if instruction.operands.len() != expect {
            return Err(ClientError::OperandCount(
                index,
                expect,
                instruction.operands.len(),
            ));
        }
        for &slot in &instruction.operands {
            if slot >= index {
                return Err(ClientError::OperandSlot(index, slot));
            }
        }

        let found = ValueShape {
            layout: instruction.layout.clone(),
            r#type: instruction.r#type,
        };
        match &instruction.op {
            InstrOp::Parameter(i) => {
                let parameter = shape
                    .parameters
                    .get(*i)
                    .ok_or(ClientError::ParameterIndex(*i, shape.parameters.len()))?;
                if parameter != &found {
                    return Err(ClientError::Signature(*i, parameter.clone(), found));
                }
            }
            InstrOp::Constant(literal) => {
                let expected = ValueShape {
                    layout: literal.layout(),
                    r#type: literal.data_type(),
                };
                if expected != found {
                    return Err(ClientError::OperandShape(index, found, expected));
                }
            }
            InstrOp::Add | InstrOp::Mul | InstrOp::Neg => {
                for &slot in &instruction.operands {
                    let operand = &instructions[slot];
                    if operand.layout != instruction.layout || operand.r#type != instruction.r#type
                    {
                        let operand = ValueShape {
                            layout: operand.layout.clone(),
                            r#type: operand.r#type,
                        };
                        return Err(ClientError::OperandShape(index, found, operand));
                    }
                }
            }
        }
    }

    for &slot in computation.results() {
        if slot >= instructions.len() {
            return Err(ClientError::ResultSlot(slot, instructions.len()));
        }
    }
    Ok(())
}

fn check_result_shape(computation: &Computation, expected: &[ValueShape]) -> Result<(), ClientError> {
    let results = &computation.program_shape().results;
    if results.len() != expected.len() {
        return Err(ClientError::ResultCount(results.len(), expected.len()));
    }
    for (result, expected) in results.iter().zip(expected) {
        if result != expected {
            return Err(ClientError::ResultShape(result.clone(), expected.clone()));
        }
    }
    Ok(())
}

/// Configures a [`Client`] and spawns its backend thread.
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    pub devices: Vec<Device>,
}

impl ClientBuilder {
    pub fn new(kind: DeviceKind, count: usize) -> Self {
        let devices = (0..count.max(1))
            .map(|ordinal| Device { kind, ordinal })
            .collect();
        Self { devices }
    }

    /// Reads the device topology from `WEFT_DEVICE_KIND` and
    /// `WEFT_NUM_DEVICES`, defaulting to a single CPU device.
    pub fn from_env() -> Self {
        let kind = std::env::var("WEFT_DEVICE_KIND")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DeviceKind::Cpu);
        let count = std::env::var("WEFT_NUM_DEVICES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1);
        Self::new(kind, count)
    }

    pub fn build(self) -> Client {
        let Self { mut devices } = self;
        // an empty topology degenerates to the single host device
        if devices.is_empty() {
            devices.push(Device {
                kind: DeviceKind::Cpu,
                ordinal: 0,
            });
        }
        let default = devices[0];
        let (sender, receiver) = flume::unbounded();
        std::thread::spawn(move || backend::serve(receiver));
        Client {
            devices,
            default,
            sender,
        }
    }
}
