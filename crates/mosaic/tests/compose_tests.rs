// Composition tests — shape inference, composers and derived views end-to-end

use mosaic::prelude::*;

// Helpers

fn dev() -> CpuDevice {
    CpuDevice
}

fn assert_close(a: &[f64], b: &[f64], tol: f64) {
    assert_eq!(a.len(), b.len(), "length mismatch: {} vs {}", a.len(), b.len());
    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        assert!((x - y).abs() < tol, "elem {}: {} vs {} (tol={})", i, x, y, tol);
    }
}

fn linear(i: usize, o: usize) -> Result<Wrapped<CpuBackend, Linear<CpuBackend>>> {
    Ok(wrap(Linear::<CpuBackend>::new(i, o, true, DType::F32, &dev())?, &dev())
        .with_input_shape(vec![None, Some(i)]))
}

fn tensor_values(v: &Value<CpuBackend>) -> Result<Vec<f64>> {
    v.as_tensor()?.to_f64_vec()
}

// Shape inference

#[test]
fn test_dynamic_dim_survives_inference() -> Result<()> {
    // [2, ?, 3] summed over the last axis keeps the dynamic axis at index 1.
    let reduce = Lambda::<CpuBackend>::new(
        |xs: &[Value<CpuBackend>]| Ok(xs[0].as_tensor()?.sum(2, false)?.into()),
        &dev(),
    )
    .with_input_shape(vec![Some(2usize), None, Some(3)]);
    assert_eq!(
        reduce.output_shape()?,
        Some(IoShape::from(vec![Some(2usize), None]))
    );

    let fc = linear(4, 7)?;
    assert_eq!(fc.output_shape()?, Some(IoShape::from(vec![None, Some(7usize)])));
    Ok(())
}

#[test]
fn test_probe_dtype_is_configurable() -> Result<()> {
    let fc = wrap(Linear::<CpuBackend>::new(2, 3, false, DType::F64, &dev())?, &dev())
        .with_input_shape(vec![None, Some(2usize)])
        .with_probe(ShapeProbe::new(&dev()).with_dtype(DType::F64));
    assert_eq!(fc.output_shape()?, Some(IoShape::from(vec![None, Some(3usize)])));
    Ok(())
}

// Sequential

#[test]
fn test_sequential_matches_manual_chain() -> Result<()> {
    let m1 = Linear::<CpuBackend>::new(4, 6, true, DType::F32, &dev())?;
    let m3 = Linear::<CpuBackend>::new(6, 2, true, DType::F32, &dev())?;
    let x = CpuTensor::rand((5, 4), DType::F32, &dev())?;
    let manual = m3.forward(&m1.forward(&x)?.relu()?)?;

    let seq = Sequential::new()
        .with_input_shape(vec![None, Some(4usize)])
        .add(wrap(m1, &dev()).with_input_shape(vec![None, Some(4usize)]))
        .add(wrap::<CpuBackend, _>(ReLU, &dev()).with_input_shape(vec![None, Some(6usize)]))
        .add(wrap(m3, &dev()).with_input_shape(vec![None, Some(6usize)]));

    assert_close(
        &seq.forward_tensor(&x)?.to_f64_vec()?,
        &manual.to_f64_vec()?,
        1e-6,
    );
    let last = seq.get(2).map(|m| m.output_shape()).transpose()?.flatten();
    assert_eq!(seq.output_shape()?, last);
    assert_eq!(seq.output_shape()?, Some(IoShape::from(vec![None, Some(2usize)])));

    // A slice starts where its first stage starts.
    let tail = seq.slice(1..3)?;
    assert_eq!(tail.input_shape(), seq.get(1).and_then(|m| m.input_shape()));
    assert_eq!(tail.input_shape(), Some(IoShape::from(vec![None, Some(6usize)])));
    Ok(())
}

#[test]
fn test_nested_sequential_names() -> Result<()> {
    let block = Sequential::new()
        .add_named("fc", linear(3, 3)?)?
        .add_named("act", wrap::<CpuBackend, _>(Tanh, &dev()))?;
    let model = Sequential::new()
        .add_named("block", block)?
        .add(linear(3, 1)?);
    let keys: Vec<String> = model.state_dict().into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec!["block.fc.weight", "block.fc.bias", "1.weight", "1.bias"]);
    assert_eq!(model.num_parameters(), 3 * 3 + 3 + 3 + 1);
    Ok(())
}

// Fan-out

#[test]
fn test_fork_and_parallel() -> Result<()> {
    let d = dev();
    let double = || {
        Lambda::<CpuBackend>::new(
            |xs: &[Value<CpuBackend>]| Ok(xs[0].as_tensor()?.affine(2.0, 0.0)?.into()),
            &d,
        )
    };
    let negate = || {
        Lambda::<CpuBackend>::new(
            |xs: &[Value<CpuBackend>]| Ok(xs[0].as_tensor()?.neg()?.into()),
            &d,
        )
    };
    let x = CpuTensor::from_f64_slice(&[1.0, 2.0], 2usize, DType::F64, &d)?;
    let y = CpuTensor::from_f64_slice(&[5.0, 7.0], 2usize, DType::F64, &d)?;

    let fork = Fork::new(vec![Branch::module(double()), Branch::module(negate())])?;
    let out = fork.forward(&[x.clone().into()])?.into_tuple()?;
    assert_eq!(tensor_values(&out[0])?, vec![2.0, 4.0]);
    assert_eq!(tensor_values(&out[1])?, vec![-1.0, -2.0]);

    let par = Parallel::new(vec![Branch::module(double()), Branch::module(negate())])?;
    let out = par.forward(&[x.into(), y.into()])?.into_tuple()?;
    assert_eq!(tensor_values(&out[0])?, vec![2.0, 4.0]);
    assert_eq!(tensor_values(&out[1])?, vec![-5.0, -7.0]);
    Ok(())
}

#[test]
fn test_fan_out_declares_branch_shapes() -> Result<()> {
    let par = Parallel::new(vec![Branch::module(linear(4, 2)?), Branch::module(linear(3, 5)?)])?;
    let expected = IoShape::Tuple(vec![
        Some(IoShape::from(vec![None, Some(2usize)])),
        Some(IoShape::from(vec![None, Some(5usize)])),
    ]);
    assert_eq!(par.input_shape(), Some(expected.clone()));
    assert_eq!(par.output_shape()?, Some(expected));
    Ok(())
}

// Shared

#[test]
fn test_shared_weights_follow_updates() -> Result<()> {
    let d = dev();
    let w = CpuTensor::from_f64_slice(&[1.0, 0.0, 0.0, 1.0], (2, 2), DType::F64, &d)?;
    let inner = Linear::from_tensors(w, None)?;
    let weight = inner.weight().clone();
    let shared = Shared::new(wrap(inner, &d))?;

    let xs: Vec<Value<CpuBackend>> = (1..=3)
        .map(|i| CpuTensor::full((1, 2), i as f64, DType::F64, &d).map(Value::from))
        .collect::<Result<_>>()?;
    let out = shared.forward(&xs)?.into_tuple()?;
    assert_eq!(out.len(), 3);
    assert_eq!(tensor_values(&out[2])?, vec![3.0, 3.0]);

    weight.update_data_inplace(&[2.0, 0.0, 0.0, 2.0])?;
    let out = shared.forward(&xs)?.into_tuple()?;
    for (i, v) in out.iter().enumerate() {
        let k = 2.0 * (i + 1) as f64;
        assert_eq!(tensor_values(v)?, vec![k, k]);
    }
    Ok(())
}

// Derived views

#[test]
fn test_regularizable_follows_flags_and_order() -> Result<()> {
    let first = linear(2, 3)?;
    let second = linear(3, 4)?;
    let third = linear(4, 1)?;
    let w1 = first.inner().weight().clone();
    let w3 = third.inner().weight().clone();
    second.inner().weight().set_requires_grad(false);

    let model = Sequential::new().add(first).add(second).add(third);
    let reg = model.regularizable();
    assert_eq!(reg.len(), 2);
    assert!(reg[0].shares_storage(&w1));
    assert!(reg[1].shares_storage(&w3));
    assert!(reg.iter().all(|t| t.dims().len() == 2));

    // Frozen weight leaves trainable too; the full mapping still has it.
    assert_eq!(model.trainable().len(), 5);
    assert_eq!(model.params().len(), 6);
    Ok(())
}

#[test]
fn test_fan_out_and_shared_views_are_empty() -> Result<()> {
    let fork = Fork::new(vec![Branch::module(linear(2, 2)?)])?;
    let par = Parallel::new(vec![Branch::module(linear(2, 2)?)])?;
    let shared = Shared::new(linear(2, 2)?)?;
    let nodes: [&dyn Module<CpuBackend>; 3] = [&fork, &par, &shared];
    for node in nodes {
        assert!(node.params().is_empty(), "{}", node.name());
        assert!(node.trainable().is_empty(), "{}", node.name());
        assert!(node.regularizable().is_empty(), "{}", node.name());
        assert_eq!(node.state_dict().len(), 2, "{}", node.name());
    }
    Ok(())
}

#[test]
fn test_describe_renders_tree() -> Result<()> {
    let model = Sequential::new()
        .with_input_shape(vec![None, Some(4usize)])
        .add(linear(4, 2)?)
        .add(wrap::<CpuBackend, _>(ReLU, &dev()));
    assert_eq!(
        describe(&model),
        "Sequential(input_shape=[?, 4])\n  (0): Linear(input_shape=[?, 4])\n  (1): ReLU(input_shape=None)\n"
    );
    Ok(())
}
