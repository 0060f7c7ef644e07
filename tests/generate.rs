use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use corpusbeam::generate::{ErrorRecord, ExecMode, Generator, Identity, Preprocessor};
use corpusbeam::schema::{Schema, VARIABLE};
use corpusbeam::tensor::{DType, Example, Tensor};
use corpusbeam::DatasetError;

/// Features `[n, 2]` of `n` frames; fails for `n == 0`.
fn frames(n: &usize, labels: &Vec<i64>) -> anyhow::Result<Example> {
    anyhow::ensure!(*n > 0, "no frames in clip");
    Ok(Example::new(
        Tensor::new(vec![1.0f32; n * 2], vec![*n, 2])?,
        Tensor::vector(labels.clone()),
    ))
}

fn generator(sources: Vec<usize>) -> anyhow::Result<Generator<usize, Vec<i64>>> {
    let labels = sources
        .iter()
        .map(|&n| i64::try_from(n).map(|v| vec![v]))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Generator::new(sources, labels, Arc::new(frames))?)
}

#[test]
fn retained_plus_failed_equals_input() -> anyhow::Result<()> {
    let sources = vec![3, 0, 5, 0, 3, 7];
    let r#gen = generator(sources.clone())?;
    let mut schema = Schema::new();
    let mut errors = ErrorRecord::new();

    let kept: Vec<Example> = r#gen.pass(&mut schema, &mut errors).collect();
    assert_eq!(kept.len() + errors.len(), sources.len());
    assert_eq!(kept.len(), 4);
    assert_eq!(errors.iter().map(|e| e.position).collect::<Vec<_>>(), vec![1, 3]);
    assert!(errors.entries()[0].reason.contains("no frames"));
    assert_eq!(errors.pairs(), vec![(&0, &vec![0]), (&0, &vec![0])]);
    Ok(())
}

#[test]
fn output_preserves_input_order() -> anyhow::Result<()> {
    let r#gen = generator(vec![2, 0, 4, 1])?;
    let mut schema = Schema::new();
    let mut errors = ErrorRecord::new();
    let rows: Vec<usize> = r#gen
        .pass(&mut schema, &mut errors)
        .map(|e| e.features.shape()[0])
        .collect();
    assert_eq!(rows, vec![2, 4, 1]);
    Ok(())
}

#[test]
fn pass_feeds_the_schema() -> anyhow::Result<()> {
    let r#gen = generator(vec![3, 5])?;
    let mut schema = Schema::new();
    let mut errors = ErrorRecord::new();
    let _ = r#gen.pass(&mut schema, &mut errors).count();

    let features = schema.features().expect("features slot");
    assert_eq!(features.dtype, DType::F32);
    assert_eq!(features.shape, vec![VARIABLE, 2]);
    assert_eq!(features.min_shape, vec![3, 2]);
    assert_eq!(features.max_shape, vec![5, 2]);
    Ok(())
}

#[test]
fn generator_is_restartable() -> anyhow::Result<()> {
    let r#gen = generator(vec![1, 0, 2])?;
    let mut schema = Schema::new();
    let mut first_errors = ErrorRecord::new();
    let first: Vec<Example> = r#gen.pass(&mut schema, &mut first_errors).collect();
    let mut second_errors = ErrorRecord::new();
    let second: Vec<Example> = r#gen.pass(&mut schema, &mut second_errors).collect();

    assert_eq!(first, second);
    assert_eq!(first_errors, second_errors);
    Ok(())
}

#[test]
fn pass_is_lazy() -> anyhow::Result<()> {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let r#gen = Generator::new(
        vec![1usize, 2, 3],
        vec![vec![0i64]; 3],
        Arc::new(move |n: &usize, y: &Vec<i64>| -> anyhow::Result<Example> {
            counter.fetch_add(1, Ordering::SeqCst);
            frames(n, y)
        }),
    )?;
    let mut schema = Schema::new();
    let mut errors = ErrorRecord::new();

    let mut pass = r#gen.pass(&mut schema, &mut errors);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    let _ = pass.next();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn prime_skips_failures_and_has_no_side_effects() -> anyhow::Result<()> {
    let r#gen = generator(vec![0, 0, 4, 6])?;
    let specs = r#gen.prime().expect("one item succeeds");
    assert_eq!(specs[0].dtype, DType::F32);
    assert_eq!(specs[0].shape, vec![4, 2]);
    assert_eq!(specs[1].dtype, DType::I64);

    // Priming does not hold anything back from the pass.
    let mut schema = Schema::new();
    let mut errors = ErrorRecord::new();
    assert_eq!(r#gen.pass(&mut schema, &mut errors).count(), 2);
    assert_eq!(errors.len(), 2);
    Ok(())
}

#[test]
fn prime_of_all_failing_input_is_none() -> anyhow::Result<()> {
    assert!(generator(vec![0, 0])?.prime().is_none());
    assert!(generator(Vec::new())?.prime().is_none());
    Ok(())
}

#[test]
fn results_expose_each_outcome() -> anyhow::Result<()> {
    let r#gen = generator(vec![2, 0])?;
    let outcomes: Vec<_> = r#gen.results().collect();
    assert!(outcomes[0].is_ok());
    let err = outcomes[1].as_ref().expect_err("empty clip fails");
    assert_eq!(err.position, 1);
    assert_eq!(err.origin, "0");
    assert!(err.to_string().contains("no frames"));
    Ok(())
}

#[test]
fn rank_conflicts_are_recorded_as_failures() -> anyhow::Result<()> {
    let r#gen = Generator::new(
        vec![1usize, 2, 3],
        vec![vec![0i64]; 3],
        Arc::new(|n: &usize, y: &Vec<i64>| -> anyhow::Result<Example> {
            let features = if *n == 2 {
                Tensor::vector(vec![0.0f32; 4])
            } else {
                Tensor::new(vec![0.0f32; n * 2], vec![*n, 2])?
            };
            Ok(Example::new(features, Tensor::vector(y.clone())))
        }),
    )?;
    let mut schema = Schema::new();
    let mut errors = ErrorRecord::new();
    let kept = r#gen.pass(&mut schema, &mut errors).count();

    assert_eq!(kept, 2);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors.entries()[0].position, 1);
    assert_eq!(schema.features().expect("features slot").rank(), 2);
    Ok(())
}

#[test]
fn parallel_pass_matches_sequential() -> anyhow::Result<()> {
    let sources: Vec<usize> = (0..64).map(|i| i % 7).collect();
    let r#gen = generator(sources)?;

    let mut seq_schema = Schema::new();
    let mut seq_errors = ErrorRecord::new();
    let seq = r#gen.collect_pass(&mut seq_schema, &mut seq_errors, ExecMode::Sequential);

    let mut par_schema = Schema::new();
    let mut par_errors = ErrorRecord::new();
    let par = r#gen.collect_pass(
        &mut par_schema,
        &mut par_errors,
        ExecMode::Parallel { threads: Some(4) },
    );

    assert_eq!(seq, par);
    assert_eq!(seq_schema, par_schema);
    assert_eq!(seq_errors, par_errors);
    Ok(())
}

#[test]
fn mismatched_lengths_are_rejected() -> anyhow::Result<()> {
    let err = Generator::new(vec![1usize, 2], vec![vec![0i64]], Arc::new(frames))
        .err()
        .expect("length mismatch");
    assert!(matches!(
        err,
        DatasetError::LengthMismatch {
            sources: 2,
            labels: 1
        }
    ));
    Ok(())
}

#[test]
fn identity_passes_tensors_through() -> anyhow::Result<()> {
    let source = Tensor::new(vec![1i32, 2, 3, 4], vec![2, 2])?;
    let example = Identity.process(&source, &vec![3, 1])?;
    assert_eq!(example.features, source);
    assert_eq!(example.labels.shape(), &[2]);
    Ok(())
}

#[test]
fn error_record_serializes_failures() -> anyhow::Result<()> {
    let r#gen = generator(vec![0])?;
    let mut schema = Schema::new();
    let mut errors = ErrorRecord::new();
    let _ = r#gen.pass(&mut schema, &mut errors).count();
    let json = errors.to_json()?;
    assert!(json.contains("\"position\": 0"));
    assert!(json.contains("no frames"));
    Ok(())
}
