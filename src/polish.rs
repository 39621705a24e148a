//! Storage-oriented clean-up of an experiment before it is saved.

use crate::array::{ArrayData, DataType};
use crate::error::ScrnaError;
use crate::experiment::Experiment;
use crate::frame::DataFrame;

#[derive(Debug, Clone, Copy)]
pub struct PolishOptions {
    /// Assays denser than this become dense matrices, sparser ones become
    /// sparse. `None` keeps every assay's layout.
    pub reformat_assay_by_density: Option<f64>,
    /// Convert `number` assays holding only whole values to `integer`.
    pub attempt_integer_conversion: bool,
    pub remove_altexp_coldata: bool,
    pub forbid_nested_altexp: bool,
}

impl Default for PolishOptions {
    fn default() -> Self {
        Self {
            reformat_assay_by_density: Some(0.3),
            attempt_integer_conversion: true,
            remove_altexp_coldata: true,
            forbid_nested_altexp: true,
        }
    }
}

/// Reformats assays by density and integer-ness and tidies alternative
/// experiments. Lazy assays are realized along the way.
pub fn polish_dataset(
    experiment: Experiment,
    options: &PolishOptions,
) -> Result<Experiment, ScrnaError> {
    let experiment = experiment.try_map_assays(|_, assay| polish_assay(assay, options))?;

    experiment.try_map_alternative_experiments(|name, alt| {
        if options.forbid_nested_altexp && !alt.alternative_experiment_names().is_empty() {
            return Err(ScrnaError::NestedAlternativeExperiment(name.to_string()));
        }
        let alt = if options.remove_altexp_coldata {
            // Column names live on the column data, so they are carried over.
            let bare = DataFrame::new(
                alt.shape().1,
                alt.column_names().map(<[String]>::to_vec),
                Vec::new(),
            )?;
            alt.with_column_data(bare)?
        } else {
            alt
        };
        polish_dataset(alt, options)
    })
}

fn polish_assay(assay: ArrayData, options: &PolishOptions) -> Result<ArrayData, ScrnaError> {
    let mut assay = assay.realize()?;

    if let Some(threshold) = options.reformat_assay_by_density {
        assay = match assay {
            ArrayData::Dense(matrix) if matrix.density() < threshold => {
                ArrayData::Sparse(matrix.to_sparse())
            }
            ArrayData::Sparse(matrix) if matrix.density() >= threshold => {
                ArrayData::Dense(matrix.to_dense())
            }
            other => other,
        };
    }

    if options.attempt_integer_conversion && assay.dtype() == DataType::Number {
        assay = match assay {
            ArrayData::Dense(matrix) if all_whole(matrix.values()) => {
                ArrayData::Dense(matrix.with_dtype(DataType::Integer))
            }
            ArrayData::Sparse(matrix) if all_whole(matrix.data()) => {
                ArrayData::Sparse(matrix.with_dtype(DataType::Integer))
            }
            other => other,
        };
    }
    Ok(assay)
}

fn all_whole(values: &[f64]) -> bool {
    values.iter().all(|value| value.is_finite() && value.fract() == 0.0)
}
