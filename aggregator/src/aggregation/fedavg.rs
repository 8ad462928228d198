use std::borrow::Borrow;

use comms::{ModelState, ShapeErr, Tensor};
use rayon::prelude::*;

use crate::{
    error::{CoordinatorErr, Result},
    registry::Contribution,
};

/// Averages the contributed models, weighting each one by its sample count.
///
/// Every parameter is averaged independently and in parallel:
/// `avg[key] = Σ(state_i[key] * samples_i) / Σ(samples_i)`, with each `samples_i / Σ(samples_i)`
/// computed in `f64` so huge sample counts neither overflow nor lose their proportions.
///
/// # Arguments
/// * `contributions` - The models to average, in any order.
///
/// # Returns
/// The averaged model, `NoContributors` if `contributions` is empty or
/// `IncompatibleModelShape` naming the first contributor whose parameters differ from the others.
pub fn weighted_average<C>(contributions: &[C]) -> Result<ModelState>
where
    C: Borrow<Contribution>,
{
    let contributions: Vec<&Contribution> = contributions.iter().map(Borrow::borrow).collect();

    let Some((first, rest)) = contributions.split_first() else {
        return Err(CoordinatorErr::NoContributors);
    };

    let reference = &first.state;
    for contribution in rest {
        reference
            .check_compatible(&contribution.state)
            .map_err(|source| CoordinatorErr::IncompatibleModelShape {
                worker_id: contribution.worker_id.clone(),
                source,
            })?;
    }

    // summed as u128, no amount of u64 counts overflows it
    let total = contributions
        .iter()
        .map(|c| u128::from(c.sample_count.get()))
        .sum::<u128>() as f64;

    let params: Vec<_> = reference.iter().collect();
    let averaged = params
        .par_iter()
        .map(|&(name, tensor)| -> Result<(String, Tensor)> {
            let mut acc = Tensor::zeros(tensor.shape());

            for contribution in &contributions {
                let shape_err = |source| CoordinatorErr::IncompatibleModelShape {
                    worker_id: contribution.worker_id.clone(),
                    source,
                };

                let param = contribution
                    .state
                    .get(name)
                    .ok_or_else(|| shape_err(ShapeErr::MissingParam(name.clone())))?;

                let weight = (contribution.sample_count.get() as f64 / total) as f32;
                acc.scaled_add(weight, param).map_err(shape_err)?;
            }

            Ok((name.clone(), acc))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(averaged.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use std::{num::NonZeroU64, sync::Arc};

    use super::*;
    use crate::registry::WorkerId;

    const TOLERANCE: f32 = 1e-5;

    fn contribution(id: &str, samples: u64, params: &[(&str, Vec<f32>)]) -> Contribution {
        let state = params
            .iter()
            .map(|(name, values)| (name.to_string(), Tensor::from_vec(values.clone())))
            .collect();

        Contribution {
            worker_id: WorkerId::new(id),
            sample_count: NonZeroU64::new(samples).unwrap(),
            state: Arc::new(state),
        }
    }

    fn assert_close(got: &Tensor, expected: &[f32]) {
        assert_eq!(got.len(), expected.len());
        for (g, e) in got.iter().zip(expected) {
            assert!((g - e).abs() < TOLERANCE, "got {g}, expected {e}");
        }
    }

    #[test]
    fn test_weighted_mean_of_single_param() {
        let contributions = [
            contribution("a", 3, &[("w", vec![2.0])]),
            contribution("b", 1, &[("w", vec![10.0])]),
        ];

        let avg = weighted_average(&contributions).unwrap();
        assert_close(avg.get("w").unwrap(), &[4.0]);
    }

    #[test]
    fn test_every_element_is_averaged_independently() {
        let contributions = [
            contribution("a", 1, &[("w", vec![1.0, 0.0]), ("b", vec![5.0])]),
            contribution("b", 1, &[("w", vec![3.0, 2.0]), ("b", vec![-5.0])]),
            contribution("c", 2, &[("w", vec![0.0, 1.0]), ("b", vec![1.0])]),
        ];

        let avg = weighted_average(&contributions).unwrap();
        assert_close(avg.get("w").unwrap(), &[1.0, 1.0]);
        assert_close(avg.get("b").unwrap(), &[0.5]);
    }

    #[test]
    fn test_huge_sample_counts() {
        let half = u64::MAX / 2 + 1;
        let contributions = [
            contribution("a", half, &[("w", vec![2.0])]),
            contribution("b", half, &[("w", vec![4.0])]),
        ];

        let avg = weighted_average(&contributions).unwrap();
        assert_close(avg.get("w").unwrap(), &[3.0]);

        let contributions = [
            contribution("a", u64::MAX, &[("w", vec![1.0])]),
            contribution("b", u64::MAX, &[("w", vec![1.0])]),
            contribution("c", 1, &[("w", vec![1e9])]),
        ];

        let avg = weighted_average(&contributions).unwrap();
        assert_close(avg.get("w").unwrap(), &[1.0]);
    }

    #[test]
    fn test_single_contributor_is_returned_as_is() {
        let contributions = [contribution("a", 7, &[("w", vec![0.25, -1.5])])];

        let avg = weighted_average(&contributions).unwrap();
        assert_close(avg.get("w").unwrap(), &[0.25, -1.5]);
    }

    #[test]
    fn test_no_contributors() {
        let contributions: [Contribution; 0] = [];
        assert!(matches!(
            weighted_average(&contributions),
            Err(CoordinatorErr::NoContributors)
        ));
    }

    #[test]
    fn test_mismatched_keys_name_the_offender() {
        let contributions = [
            contribution("a", 1, &[("w", vec![1.0])]),
            contribution("b", 1, &[("w", vec![1.0]), ("extra", vec![0.0])]),
        ];

        match weighted_average(&contributions) {
            Err(CoordinatorErr::IncompatibleModelShape { worker_id, source }) => {
                assert_eq!(worker_id.as_str(), "b");
                assert_eq!(source, ShapeErr::UnexpectedParam("extra".into()));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_mismatched_shapes_are_rejected() {
        let contributions = [
            contribution("a", 1, &[("w", vec![1.0, 2.0])]),
            contribution("b", 1, &[("w", vec![1.0])]),
        ];

        assert!(matches!(
            weighted_average(&contributions),
            Err(CoordinatorErr::IncompatibleModelShape { .. })
        ));
    }

    #[test]
    fn test_accepts_borrowed_contributions() {
        let owned = [
            contribution("a", 2, &[("w", vec![1.0])]),
            contribution("b", 2, &[("w", vec![3.0])]),
            contribution("c", 4, &[("w", vec![100.0])]),
        ];
        let without_c: Vec<&Contribution> = owned.iter().filter(|c| c.worker_id.as_str() != "c").collect();

        let avg = weighted_average(&without_c).unwrap();
        assert_close(avg.get("w").unwrap(), &[2.0]);
    }
}
