//! `weft` materializes symbolic tensor computations into executable programs,
//! runs them on a registered device, and transfers the results back to host
//! memory. It exists to back integration tests of a lazy tensor frontend.
//!
//! ## Key Components
//! 1. **Numerical System**:
//!    - Scalar element types (`f32`, `f16`, `u8`, `u16`, `u32`).
//!    - Data type metadata ([`num::DataType`]) for tensor element representation.
//!
//! 2. **Host Values**:
//!    - Shapes ([`layout::Layout`]) for multidimensional data.
//!    - Host-resident typed buffers ([`literal::Literal`]), the transfer
//!      currency between host and device.
//!    - Tensors ([`tensor::Tensor`]) that live on either side and can be
//!      moved across with placement queries.
//!
//! 3. **Symbolic Graph**:
//!    - Shared graph values ([`graph::Value`]) over a small op vocabulary.
//!    - Text and Graphviz dumps of the graph for introspection.
//!    - A lowering context ([`lower::LoweringContext`]) that turns a set of
//!      root values into a compilable [`lower::Computation`] plus its
//!      parameter-data bindings.
//!
//! 4. **Execution**:
//!    - A process-wide [`client::Client`] registry enumerating devices and
//!      compiling, executing, and transferring against them.
//!    - A backend thread interpreting compiled programs over a buffer stash.
//!
//! The [`testing`] module ties all of the above into the assertion helpers
//! integration tests actually call.

pub mod client;
pub mod graph;
pub mod layout;
pub mod literal;
pub mod lower;
pub mod num;
pub mod tensor;
pub mod testing;
