//! Assertion helpers for integration tests: tensor comparators, device
//! enumeration, graph introspection, and the execute/fetch pipeline.
//!
//! Comparators report mismatches to the log and return `false` instead of
//! erroring, so call sites stay simple boolean assertions.

use itertools::izip;

use crate::{
    client::{Client, ClientError, CompileInstance, DataHandle, Device, DeviceKind},
    graph::{Value, dump},
    lower::LoweringContext,
    num::{DataType, Scalar, dispatch},
    tensor::Tensor,
};

/// Forces host residency. Device tensors trigger a transfer.
pub fn to_host_tensor(tensor: &Tensor) -> Result<Tensor, ClientError> {
    tensor.to_host()
}

fn host_lanes(lhs: &Tensor, rhs: &Tensor) -> Option<(Vec<f64>, Vec<f64>)> {
    let (lhs, rhs) = match (lhs.to_host_literal(), rhs.to_host_literal()) {
        (Ok(lhs), Ok(rhs)) => (lhs, rhs),
        (Err(err), _) | (_, Err(err)) => {
            log::error!("host transfer failed: {err}");
            return None;
        }
    };
    Some((lhs.to_f64_vec(), rhs.to_f64_vec()))
}

/// Rounds each lane through the given element type.
fn narrow_lanes(lanes: Vec<f64>, r#type: DataType) -> Vec<f64> {
    fn narrow<T: Scalar>(lanes: Vec<f64>) -> Vec<f64> {
        lanes
            .into_iter()
            .map(|lane| T::from_f64(lane).to_f64())
            .collect()
    }
    dispatch!(r#type, narrow(lanes))
}

fn check_shape(lhs: &Tensor, rhs: &Tensor, check_type: bool) -> bool {
    if lhs.layout() != rhs.layout() || (check_type && lhs.data_type() != rhs.data_type()) {
        log::error!(
            "different shape: {} {} -vs- {} {}",
            lhs.data_type(),
            lhs.layout(),
            rhs.data_type(),
            rhs.layout(),
        );
        return false;
    }
    true
}

/// Exact element equality. Shape or element type mismatch logs a diagnostic
/// and yields `false`.
pub fn equal_values(lhs: &Tensor, rhs: &Tensor) -> bool {
    if !check_shape(lhs, rhs, true) {
        return false;
    }
    let Some((lhs, rhs)) = host_lanes(lhs, rhs) else {
        return false;
    };
    izip!(lhs, rhs).all(|(x, y)| x == y)
}

/// Exact element equality across element types. The left tensor is converted
/// to the right's element type first, so an `F32` tensor equals the `F16`
/// tensor it rounds to. Only the shapes must match.
pub fn equal_values_no_element_type_check(lhs: &Tensor, rhs: &Tensor) -> bool {
    if !check_shape(lhs, rhs, false) {
        return false;
    }
    let r#type = rhs.data_type();
    let Some((lhs, rhs)) = host_lanes(lhs, rhs) else {
        return false;
    };
    let lhs = narrow_lanes(lhs, r#type);
    izip!(lhs, rhs).all(|(x, y)| x == y)
}

/// Approximate element equality under `|x - y| <= atol + rtol * |y|`. Shape
/// or element type mismatch logs a diagnostic and yields `false`; so does
/// any non-finite deviation.
pub fn close_values(lhs: &Tensor, rhs: &Tensor, rtol: f64, atol: f64) -> bool {
    if !check_shape(lhs, rhs, true) {
        return false;
    }
    let Some((lhs, rhs)) = host_lanes(lhs, rhs) else {
        return false;
    };
    let close = izip!(&lhs, &rhs).all(|(&x, &y)| (x - y).abs() <= atol + rtol * y.abs());
    if !close {
        log::error!("{lhs:?}\n-vs-\n{rhs:?}");
    }
    close
}

/// Invokes `devfn` with the registry's default device.
pub fn for_each_device(mut devfn: impl FnMut(&Device)) {
    let device = Client::get().default_device();
    devfn(&device);
}

/// Invokes `devfn` with the local and fleet-wide devices of the given kind.
/// Skipped entirely when no local device matches.
pub fn with_all_devices(kind: DeviceKind, mut devfn: impl FnMut(&[Device], &[Device])) {
    let client = Client::get();
    let devices: Vec<Device> = client
        .local_devices()
        .iter()
        .filter(|device| device.kind == kind)
        .copied()
        .collect();
    let all_devices: Vec<Device> = client
        .all_devices()
        .iter()
        .filter(|device| device.kind == kind)
        .copied()
        .collect();
    if !devices.is_empty() {
        devfn(&devices, &all_devices);
    }
}

/// Renders the graphs reachable from `roots` as text.
pub fn text_graph(roots: &[Value]) -> String {
    dump::to_text(roots)
}

/// Renders the graphs reachable from `roots` as a Graphviz digraph.
pub fn dot_graph(roots: &[Value]) -> String {
    dump::to_dot(roots)
}

/// Places the tensor on `device` and wraps the resulting buffer as a
/// device-data graph leaf.
pub fn tensor_ir_value(tensor: &Tensor, device: &Device) -> Result<Value, ClientError> {
    let data = tensor.upload(device)?;
    Ok(Value::device_data(data))
}

/// Lowers `roots` into a computation, compiles it for `device`, and runs it
/// against the parameter buffers collected during lowering. Returns one
/// result handle per root.
pub fn execute(roots: &[Value], device: &Device) -> Result<Vec<DataHandle>, ClientError> {
    let mut ctx = LoweringContext::new("execute");
    for root in roots {
        ctx.add_result(root.clone());
    }
    let computation = ctx.build()?;
    let result_shape = Some(computation.program_shape().results.clone());

    let client = Client::get();
    let instance = CompileInstance {
        compilation_devices: client.compilation_devices(device),
        computation,
        device: *device,
        result_shape,
    };
    let executables = client.compile(vec![instance])?;
    let executable = executables
        .first()
        .expect("compile returns one executable per instance");
    client.execute(executable, ctx.parameters_data(), device)
}

/// Transfers result buffers back to host and wraps each literal as a tensor
/// typed per its element type.
pub fn fetch(data: &[DataHandle]) -> Result<Vec<Tensor>, ClientError> {
    let literals = Client::get().transfer_from_server(data)?;
    Ok(literals.into_iter().map(Tensor::from_literal).collect())
}

/// [`execute`] then [`fetch`].
pub fn execute_and_fetch(roots: &[Value], device: &Device) -> Result<Vec<Tensor>, ClientError> {
    let results = execute(roots, device)?;
    fetch(&results)
}

#[cfg(test)]
mod tests {
    use half::f16;

    use super::*;
    use crate::{layout::Layout, num::DataType};

    fn tensor_f32(shape: impl crate::layout::IntoLayout, data: &[f32]) -> Tensor {
        Tensor::from_slice(shape, data).unwrap()
    }

    #[test]
    fn test_equal_values() {
        let a = tensor_f32([2, 2], &[1.0, 2.0, 3.0, 4.0]);
        let b = tensor_f32([2, 2], &[1.0, 2.0, 3.0, 4.0]);
        assert!(equal_values(&a, &b));

        let c = tensor_f32([2, 2], &[1.0, 2.0, 3.0, 5.0]);
        assert!(!equal_values(&a, &c));
    }

    #[test]
    fn test_equal_values_shape_mismatch() {
        let a = tensor_f32([4], &[1.0, 2.0, 3.0, 4.0]);
        let b = tensor_f32([2, 2], &[1.0, 2.0, 3.0, 4.0]);
        assert!(!equal_values(&a, &b));
    }

    #[test]
    fn test_equal_values_type_mismatch() {
        let a = tensor_f32([2], &[1.0, 2.0]);
        let b = Tensor::from_slice([2], &[1u32, 2]).unwrap();
        assert!(!equal_values(&a, &b));
        // same values, so the type-insensitive comparison accepts them
        assert!(equal_values_no_element_type_check(&a, &b));
    }

    #[test]
    fn test_equal_values_across_float_widths() {
        let a = tensor_f32([3], &[0.5, -1.0, 2.0]);
        let half = [0.5, -1.0, 2.0].map(f16::from_f64);
        let b = Tensor::from_slice([3], &half).unwrap();
        assert!(!equal_values(&a, &b));
        assert!(equal_values_no_element_type_check(&a, &b));
    }

    #[test]
    fn test_equal_values_narrows_to_rhs_type() {
        // 0.1 is inexact in every binary float width, so equality only holds
        // after rounding the wider side into the narrower element type
        let a = tensor_f32([2], &[0.1, 0.2]);
        let half = [0.1, 0.2].map(f16::from_f64);
        let b = Tensor::from_slice([2], &half).unwrap();
        assert!(equal_values_no_element_type_check(&a, &b));
        assert!(!equal_values_no_element_type_check(&b, &a));
    }

    #[test]
    fn test_equal_values_nan() {
        let a = tensor_f32([1], &[f32::NAN]);
        assert!(!equal_values(&a, &a.clone()));
    }

    #[test]
    fn test_close_values() {
        let a = tensor_f32([3], &[1.0, 2.0, 3.0]);
        let b = tensor_f32([3], &[1.001, 1.999, 3.0]);
        assert!(close_values(&a, &b, 1e-2, 1e-2));
        assert!(!close_values(&a, &b, 1e-5, 1e-5));

        // tolerance is relative to the right-hand side
        let c = tensor_f32([1], &[100.0]);
        let d = tensor_f32([1], &[101.0]);
        assert!(close_values(&c, &d, 1e-1, 0.0));
        assert!(!close_values(&c, &d, 1e-3, 0.0));
    }

    #[test]
    fn test_close_values_random() {
        fastrand::seed(42);
        let data: Vec<f32> = (0..64).map(|_| fastrand::f32() * 2.0 - 1.0).collect();
        let jittered: Vec<f32> = data.iter().map(|x| x + 1e-6 * x.signum()).collect();

        let a = tensor_f32([8, 8], &data);
        let b = tensor_f32([8, 8], &jittered);
        assert!(close_values(&a, &b, 1e-4, 1e-5));
        assert!(equal_values(&a, &a.clone()));
    }

    #[test]
    fn test_for_each_device() {
        let mut seen = Vec::new();
        for_each_device(|device| seen.push(*device));
        assert_eq!(seen, vec![Client::get().default_device()]);
    }

    #[test]
    fn test_with_all_devices() {
        let mut calls = 0;
        with_all_devices(DeviceKind::Cpu, |devices, all_devices| {
            calls += 1;
            assert!(!devices.is_empty());
            assert_eq!(devices.len(), all_devices.len());
        });
        assert_eq!(calls, 1);

        // no local GPU device in the default topology
        with_all_devices(DeviceKind::Gpu, |_, _| unreachable!());
    }

    #[test]
    fn test_tensor_ir_value() {
        let device = Client::get().default_device();
        let tensor = tensor_f32([2], &[1.0, 2.0]);
        let value = tensor_ir_value(&tensor, &device).unwrap();
        assert_eq!(value.layout(), Layout::from_shape([2]));
        assert_eq!(value.data_type(), DataType::F32);
        assert!(value.operands().is_empty());
    }

    #[test]
    fn test_graph_dumps() {
        let device = Client::get().default_device();
        let a = tensor_ir_value(&tensor_f32([2], &[1.0, 2.0]), &device).unwrap();
        let b = tensor_ir_value(&tensor_f32([2], &[3.0, 4.0]), &device).unwrap();
        let sum = a.try_add(&b).unwrap();

        let text = text_graph(std::slice::from_ref(&sum));
        assert!(text.contains("device-data() device=CPU:0"));
        assert!(text.contains("add(%0, %1), ROOT"));

        let dot = dot_graph(&[sum]);
        assert!(dot.contains("digraph ir {"));
        assert!(dot.contains("-> n2;"));
    }

    #[test]
    fn test_execute_and_fetch() {
        let device = Client::get().default_device();
        let x = tensor_f32([2, 2], &[1.0, 2.0, 3.0, 4.0]);
        let y = tensor_f32([2, 2], &[5.0, 6.0, 7.0, 8.0]);

        let a = tensor_ir_value(&x, &device).unwrap();
        let b = tensor_ir_value(&y, &device).unwrap();
        let sum = a.try_add(&b).unwrap();
        let product = sum.try_mul(&a).unwrap();

        let results = execute_and_fetch(&[sum, product], &device).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(Tensor::is_host));

        let expected = tensor_f32([2, 2], &[6.0, 8.0, 10.0, 12.0]);
        assert!(equal_values(&results[0], &expected));
        let expected = tensor_f32([2, 2], &[6.0, 16.0, 30.0, 48.0]);
        assert!(equal_values(&results[1], &expected));
    }

    #[test]
    fn test_execute_separately_then_fetch() {
        let device = Client::get().default_device();
        let x = tensor_f32([3], &[1.0, -2.0, 3.0]);

        let a = tensor_ir_value(&x, &device).unwrap();
        let results = execute(&[a.neg()], &device).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].device(), device);

        let fetched = fetch(&results).unwrap();
        let expected = tensor_f32([3], &[-1.0, 2.0, -3.0]);
        assert!(equal_values(&fetched[0], &expected));
    }

    #[test]
    fn test_execute_compares_against_device_tensor() {
        // a device-resident tensor compares transparently after host transfer
        let device = Client::get().default_device();
        let x = tensor_f32([2], &[1.5, 2.5]);
        let resident = x.to_device(&device).unwrap();
        assert!(equal_values(&x, &resident));
        assert!(close_values(&resident, &x, 1e-6, 1e-6));

        let host = to_host_tensor(&resident).unwrap();
        assert!(host.is_host());
        assert!(equal_values(&host, &x));
    }

    #[test]
    fn test_execute_empty_roots() {
        let device = Client::get().default_device();
        assert!(matches!(
            execute(&[], &device),
            Err(ClientError::Lower(crate::lower::LowerError::Empty))
        ));
    }
}
