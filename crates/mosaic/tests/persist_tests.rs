// Persistence tests — save/load of whole module trees through safetensors

use std::path::PathBuf;

use mosaic::nn::safetensors::read_state;
use mosaic::prelude::*;

// Helpers

fn temp_file(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "mosaic_persist_{}_{tag}.safetensors",
        std::process::id()
    ))
}

fn build(hidden: usize) -> Result<Sequential<CpuBackend>> {
    let d = CpuDevice;
    let features = || vec![None, Some(hidden)];
    Ok(Sequential::new()
        .with_input_shape(vec![None, Some(4usize)])
        .add_named(
            "fc1",
            wrap(Linear::<CpuBackend>::new(4, hidden, true, DType::F32, &d)?, &d)
                .with_input_shape(vec![None, Some(4usize)]),
        )?
        .add_named(
            "bn",
            wrap(BatchNorm::<CpuBackend>::new(hidden, 1e-5, 0.1, DType::F32, &d)?, &d)
                .with_input_shape(features()),
        )?
        .add_named(
            "drop",
            wrap::<CpuBackend, _>(Dropout::new(0.5)?, &d).with_input_shape(features()),
        )?
        .add_named(
            "fc2",
            wrap(Linear::<CpuBackend>::new(hidden, 2, false, DType::F32, &d)?, &d)
                .with_input_shape(features()),
        )?)
}

fn snapshot(model: &dyn Module<CpuBackend>) -> Result<Vec<(String, Vec<f64>)>> {
    model
        .state_dict()
        .into_iter()
        .map(|(k, t)| Ok((k, t.to_f64_vec()?)))
        .collect()
}

// Tests

#[test]
fn test_save_then_load_restores_everything() -> Result<()> {
    let source = build(8)?;
    // Move the running statistics away from their initial values.
    source.forward_tensor(&CpuTensor::randn((16, 4), DType::F32, &CpuDevice)?)?;

    let path = temp_file("roundtrip");
    source.save(&path)?;

    let target = build(8)?;
    assert_ne!(snapshot(&source)?, snapshot(&target)?);
    target.load(&path, false)?;
    assert_eq!(snapshot(&source)?, snapshot(&target)?);
    assert!(target.is_training());

    // Keys and order on disk follow the state mapping.
    let on_disk: Vec<String> = read_state::<CpuBackend>(&path, &CpuDevice)?
        .into_iter()
        .map(|(k, _)| k)
        .collect();
    std::fs::remove_file(&path)?;
    assert_eq!(
        on_disk,
        vec![
            "fc1.weight",
            "fc1.bias",
            "bn.weight",
            "bn.bias",
            "bn.running_mean",
            "bn.running_var",
            "bn.num_batches_tracked",
            "fc2.weight",
        ]
    );
    Ok(())
}

#[test]
fn test_mismatched_file_leaves_module_untouched() -> Result<()> {
    let path = temp_file("mismatch");
    build(8)?.save(&path)?;

    let narrower = build(6)?;
    let before = snapshot(&narrower)?;
    let err = narrower.load(&path, true);
    assert!(matches!(err, Err(Error::StateShapeMismatch { ref name, .. }) if name == "fc1.weight"));
    assert_eq!(snapshot(&narrower)?, before);
    assert!(narrower.is_training());

    let extra = build(8)?.add_named(
        "head",
        wrap(Linear::<CpuBackend>::new(2, 2, true, DType::F32, &CpuDevice)?, &CpuDevice),
    )?;
    let before = snapshot(&extra)?;
    assert!(matches!(
        extra.load(&path, false),
        Err(Error::MissingKey(ref k)) if k == "head.weight"
    ));
    assert_eq!(snapshot(&extra)?, before);
    std::fs::remove_file(&path)?;
    Ok(())
}

#[test]
fn test_load_with_eval_switches_tree_to_inference() -> Result<()> {
    let path = temp_file("eval");
    let source = build(4)?;
    source.save(&path)?;

    let target = build(4)?;
    target.load(&path, true)?;
    std::fs::remove_file(&path)?;
    assert!(!target.is_training());
    assert!(target.iter().all(|(_, m)| !m.is_training()));

    // Inference is deterministic: Dropout off, BatchNorm on running stats.
    let x = CpuTensor::rand((3, 4), DType::F32, &CpuDevice)?;
    let a = target.forward_tensor(&x)?.to_f64_vec()?;
    let b = target.forward_tensor(&x)?.to_f64_vec()?;
    assert_eq!(a, b);
    Ok(())
}

#[test]
fn test_shape_inference_does_not_touch_state() -> Result<()> {
    let model = build(8)?;
    let before = snapshot(&model)?;
    assert_eq!(
        model.output_shape()?,
        Some(IoShape::from(vec![None, Some(2usize)]))
    );
    // Probe every stage, BatchNorm included.
    for (name, stage) in model.iter() {
        assert!(stage.output_shape()?.is_some(), "{name}");
    }
    assert_eq!(snapshot(&model)?, before);
    assert!(model.iter().all(|(_, m)| m.is_training()));
    Ok(())
}
