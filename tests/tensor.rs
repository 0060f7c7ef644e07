use corpusbeam::tensor::{DType, Example, Tensor, TensorData};
use corpusbeam::DatasetError;

#[test]
fn element_count_must_match_shape() -> anyhow::Result<()> {
    let err = Tensor::new(vec![1.0f32; 5], vec![2, 3]).expect_err("5 != 6");
    assert!(matches!(
        err,
        DatasetError::InvalidTensor {
            dtype: DType::F32,
            len: 5,
            expected: 6,
            ..
        }
    ));
    Ok(())
}

#[test]
fn rows_stack_into_a_matrix() -> anyhow::Result<()> {
    let t = Tensor::from_rows(&[vec![1i64, 2], vec![3, 4], vec![5, 6]])?;
    assert_eq!(t.shape(), &[3, 2]);
    assert_eq!(t.data(), &TensorData::I64(vec![1, 2, 3, 4, 5, 6]));
    assert!(Tensor::from_rows(&[vec![1i64, 2], vec![3]]).is_err());
    Ok(())
}

#[test]
fn scalars_have_rank_zero() -> anyhow::Result<()> {
    let t = Tensor::scalar(7u8);
    assert!(t.shape().is_empty());
    assert_eq!(t.len(), 1);
    assert_eq!(t.dtype(), DType::U8);
    Ok(())
}

#[test]
fn casting_keeps_shape_and_converts_values() -> anyhow::Result<()> {
    let t = Tensor::new(vec![1.9f64, -2.5], vec![2, 1])?;
    let cast = t.cast(DType::I32);
    assert_eq!(cast.shape(), &[2, 1]);
    assert_eq!(cast.data(), &TensorData::I32(vec![1, -2]));
    Ok(())
}

#[test]
fn append_converts_to_the_receiver_dtype() -> anyhow::Result<()> {
    let mut data = TensorData::empty(DType::F32);
    data.append(&TensorData::I64(vec![1, 2]));
    data.append(&TensorData::F64(vec![0.5]));
    assert_eq!(data, TensorData::F32(vec![1.0, 2.0, 0.5]));
    Ok(())
}

#[test]
fn example_specs_describe_both_slots() -> anyhow::Result<()> {
    let e = Example::new(
        Tensor::new(vec![0.0f32; 8], vec![2, 4])?,
        Tensor::vector(vec![1i64, 2, 3]),
    );
    let [features, labels] = e.specs();
    assert_eq!((features.dtype, features.shape), (DType::F32, vec![2, 4]));
    assert_eq!((labels.dtype, labels.shape), (DType::I64, vec![3]));
    Ok(())
}
