use corpusbeam::schema::{Schema, VARIABLE, update};
use corpusbeam::tensor::{DType, TensorSpec};
use corpusbeam::DatasetError;

fn spec(dtype: DType, shape: &[usize]) -> TensorSpec {
    TensorSpec {
        dtype,
        shape: shape.to_vec(),
    }
}

fn pair(features: &[usize], labels: &[usize]) -> Vec<TensorSpec> {
    vec![spec(DType::F32, features), spec(DType::I64, labels)]
}

#[test]
fn first_observation_is_adopted() -> anyhow::Result<()> {
    let mut schema = Schema::new();
    assert!(schema.is_empty());
    schema.observe(&pair(&[10, 4], &[3]))?;

    let features = schema.features().expect("features slot");
    assert_eq!(features.dtype, DType::F32);
    assert_eq!(features.shape, vec![10, 4]);
    assert_eq!(features.min_shape, vec![10, 4]);
    assert_eq!(features.max_shape, vec![10, 4]);
    assert_eq!(schema.labels().expect("labels slot").shape, vec![3]);
    Ok(())
}

#[test]
fn observing_identical_examples_is_idempotent() -> anyhow::Result<()> {
    let specs = pair(&[10, 4], &[3]);
    let once = update(&Schema::new(), &specs)?;
    let twice = update(&once, &specs)?;
    assert_eq!(once, twice);
    Ok(())
}

#[test]
fn only_the_disagreeing_dimension_becomes_variable() -> anyhow::Result<()> {
    let mut schema = Schema::new();
    schema.observe(&pair(&[10, 4], &[3]))?;
    schema.observe(&pair(&[12, 4], &[3]))?;

    let features = schema.features().expect("features slot");
    assert_eq!(features.shape, vec![VARIABLE, 4]);
    assert_eq!(features.min_shape, vec![10, 4]);
    assert_eq!(features.max_shape, vec![12, 4]);
    assert!(features.is_ragged());
    assert_eq!(features.inner_shape(), Some(vec![4]));
    Ok(())
}

#[test]
fn variable_dimensions_never_narrow() -> anyhow::Result<()> {
    let mut schema = Schema::new();
    for rows in [10, 12, 10, 10] {
        schema.observe(&pair(&[rows, 4], &[1]))?;
    }
    assert_eq!(schema.features().expect("features slot").shape, vec![VARIABLE, 4]);
    Ok(())
}

#[test]
fn extents_are_tracked_per_dimension() -> anyhow::Result<()> {
    let mut schema = Schema::new();
    schema.observe(&pair(&[10, 2], &[1]))?;
    schema.observe(&pair(&[3, 8], &[1]))?;

    let features = schema.features().expect("features slot");
    assert_eq!(features.shape, vec![VARIABLE, VARIABLE]);
    assert_eq!(features.min_shape, vec![3, 2]);
    assert_eq!(features.max_shape, vec![10, 8]);
    assert_eq!(features.inner_shape(), None);
    Ok(())
}

#[test]
fn rank_mismatch_rejects_the_whole_example() -> anyhow::Result<()> {
    let mut schema = Schema::new();
    schema.observe(&pair(&[10, 4], &[3]))?;
    let before = schema.clone();

    // Labels would widen if applied; the features rank mismatch must prevent it.
    let err = schema
        .observe(&pair(&[10, 4, 1], &[5]))
        .expect_err("rank mismatch");
    assert!(matches!(err, DatasetError::SchemaRank { slot: 0, .. }));
    assert_eq!(schema, before);
    Ok(())
}

#[test]
fn slot_count_mismatch_is_an_error() -> anyhow::Result<()> {
    let mut schema = Schema::new();
    schema.observe(&pair(&[2], &[1]))?;
    let err = schema
        .observe(&[spec(DType::F32, &[2])])
        .expect_err("slot count mismatch");
    assert!(matches!(
        err,
        DatasetError::SlotCount {
            expected: 2,
            found: 1
        }
    ));
    Ok(())
}

#[test]
fn dtype_conflict_keeps_the_first_dtype() -> anyhow::Result<()> {
    let mut schema = Schema::new();
    schema.observe(&pair(&[4], &[1]))?;
    schema.observe(&[spec(DType::F64, &[4]), spec(DType::I64, &[1])])?;
    assert_eq!(schema.features().expect("features slot").dtype, DType::F32);
    Ok(())
}

#[test]
fn update_leaves_prior_untouched() -> anyhow::Result<()> {
    let prior = update(&Schema::new(), &pair(&[1], &[1]))?;
    let next = update(&prior, &pair(&[2], &[1]))?;
    assert_eq!(prior.features().expect("features slot").shape, vec![1]);
    assert_eq!(next.features().expect("features slot").shape, vec![VARIABLE]);
    Ok(())
}

#[test]
fn admits_checks_rank_and_fixed_dimensions() -> anyhow::Result<()> {
    let mut schema = Schema::new();
    schema.observe(&pair(&[10, 4], &[1]))?;
    schema.observe(&pair(&[7, 4], &[1]))?;
    let features = schema.features().expect("features slot");
    assert!(features.admits(&[99, 4]));
    assert!(!features.admits(&[99, 5]));
    assert!(!features.admits(&[4]));
    Ok(())
}

#[test]
fn schema_round_trips_through_json() -> anyhow::Result<()> {
    let mut schema = Schema::new();
    schema.observe(&pair(&[10, 4], &[3]))?;
    schema.observe(&pair(&[11, 4], &[2]))?;
    let json = serde_json::to_string(&schema)?;
    assert!(json.contains("\"f32\""));
    let back: Schema = serde_json::from_str(&json)?;
    assert_eq!(back, schema);
    Ok(())
}
