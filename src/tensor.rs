use crate::{
    client::{Client, ClientError, DataHandle, Device},
    layout::{IntoLayout, Layout},
    literal::{Literal, LiteralError},
    num::{DataType, Scalar},
};

/// Where a tensor's contents live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Place {
    Host(Literal),
    Device(DataHandle),
}

/// A runtime-typed tensor resident on either the host or a device. Moving it
/// across the boundary goes through the client transfer service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tensor {
    layout: Layout,
    r#type: DataType,
    place: Place,
}

impl Tensor {
    pub fn from_slice<T: Scalar>(
        layout: impl IntoLayout,
        data: &[T],
    ) -> Result<Self, LiteralError> {
        let literal = Literal::from_slice(layout, data)?;
        Ok(Self::from_literal(literal))
    }

    pub fn from_literal(literal: Literal) -> Self {
        let layout = literal.layout();
        let r#type = literal.data_type();
        Self {
            layout,
            r#type,
            place: Place::Host(literal),
        }
    }

    pub fn from_handle(data: DataHandle) -> Self {
        let layout = data.layout();
        let r#type = data.data_type();
        Self {
            layout,
            r#type,
            place: Place::Device(data),
        }
    }

    #[inline]
    pub fn layout(&self) -> Layout {
        self.layout.clone()
    }

    #[inline]
    pub fn data_type(&self) -> DataType {
        self.r#type
    }

    /// The device holding the tensor, if it is not host-resident.
    #[inline]
    pub fn device(&self) -> Option<Device> {
        match &self.place {
            Place::Host(_) => None,
            Place::Device(data) => Some(data.device()),
        }
    }

    #[inline]
    pub fn is_host(&self) -> bool {
        matches!(self.place, Place::Host(_))
    }

    #[inline]
    pub fn is_device(&self) -> bool {
        matches!(self.place, Place::Device(_))
    }

    #[inline]
    pub fn literal(&self) -> Option<&Literal> {
        match &self.place {
            Place::Host(literal) => Some(literal),
            Place::Device(_) => None,
        }
    }

    #[inline]
    pub fn handle(&self) -> Option<&DataHandle> {
        match &self.place {
            Place::Host(_) => None,
            Place::Device(data) => Some(data),
        }
    }

    /// The tensor's contents as a host literal, transferring from the device
    /// if needed.
    pub fn to_host_literal(&self) -> Result<Literal, ClientError> {
        match &self.place {
            Place::Host(literal) => Ok(literal.clone()),
            Place::Device(data) => {
                let literals = Client::get().transfer_from_server(std::slice::from_ref(data))?;
                literals
                    .into_iter()
                    .next()
                    .ok_or(ClientError::Buffer(data.id().get()))
            }
        }
    }

    /// Forces host residency. Host tensors come back unchanged; device
    /// tensors are transferred.
    pub fn to_host(&self) -> Result<Tensor, ClientError> {
        Ok(Self::from_literal(self.to_host_literal()?))
    }

    /// Uploads the tensor's contents to `device` and returns the buffer
    /// handle.
    pub fn upload(&self, device: &Device) -> Result<DataHandle, ClientError> {
        let literal = self.to_host_literal()?;
        Client::get().transfer_to_server(&literal, device)
    }

    /// Places the tensor on `device`, transferring through the host if it
    /// lives elsewhere.
    pub fn to_device(&self, device: &Device) -> Result<Tensor, ClientError> {
        match self.device() {
            Some(home) if home == *device => Ok(self.clone()),
            _ => Ok(Self::from_handle(self.upload(device)?)),
        }
    }

    /// Reads the contents back as typed elements.
    pub fn to_vec<T: Scalar>(&self) -> Result<Vec<T>, ClientError> {
        Ok(self.to_host_literal()?.to_vec::<T>()?)
    }
}
