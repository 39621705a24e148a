use serde::Serialize;

use crate::array::{ArrayData, DataType};
use crate::error::ScrnaError;
use crate::frame::DataFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentKind {
    SummarizedExperiment,
    SingleCellExperiment,
}

/// Index pairs between rows (or columns) of an experiment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairedRelation {
    first: Vec<usize>,
    second: Vec<usize>,
}

impl PairedRelation {
    pub fn new(first: Vec<usize>, second: Vec<usize>) -> Result<Self, ScrnaError> {
        if first.len() != second.len() {
            return Err(ScrnaError::DimensionMismatch {
                context: "paired relation".to_string(),
                expected: first.len(),
                found: second.len(),
            });
        }
        Ok(Self { first, second })
    }

    pub fn len(&self) -> usize {
        self.first.len()
    }

    pub fn is_empty(&self) -> bool {
        self.first.is_empty()
    }

    pub fn pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.first.iter().copied().zip(self.second.iter().copied())
    }

    fn max_index(&self) -> Option<usize> {
        self.first.iter().chain(self.second.iter()).copied().max()
    }
}

/// An assembled dataset: assays sharing one row and column space plus
/// their annotations and, for single-cell experiments, embeddings and
/// alternative experiments.
#[derive(Debug, Clone, PartialEq)]
pub struct Experiment {
    kind: ExperimentKind,
    nrow: usize,
    ncol: usize,
    assays: Vec<(String, ArrayData)>,
    row_data: DataFrame,
    column_data: DataFrame,
    reduced_dims: Vec<(String, ArrayData)>,
    alternative_experiments: Vec<(String, Experiment)>,
    row_pairs: Vec<(String, PairedRelation)>,
    column_pairs: Vec<(String, PairedRelation)>,
    main_experiment_name: Option<String>,
}

pub struct ExperimentBuilder {
    inner: Experiment,
}

impl ExperimentBuilder {
    pub fn assay(mut self, name: &str, data: ArrayData) -> Self {
        self.inner.assays.push((name.to_string(), data));
        self
    }

    pub fn row_data(mut self, frame: DataFrame) -> Self {
        self.inner.row_data = frame;
        self
    }

    pub fn column_data(mut self, frame: DataFrame) -> Self {
        self.inner.column_data = frame;
        self
    }

    pub fn reduced_dim(mut self, name: &str, data: ArrayData) -> Self {
        self.inner.reduced_dims.push((name.to_string(), data));
        self
    }

    pub fn alternative_experiment(mut self, name: &str, experiment: Experiment) -> Self {
        self.inner
            .alternative_experiments
            .push((name.to_string(), experiment));
        self
    }

    pub fn row_pair(mut self, name: &str, relation: PairedRelation) -> Self {
        self.inner.row_pairs.push((name.to_string(), relation));
        self
    }

    pub fn column_pair(mut self, name: &str, relation: PairedRelation) -> Self {
        self.inner.column_pairs.push((name.to_string(), relation));
        self
    }

    pub fn main_experiment_name(mut self, name: Option<String>) -> Self {
        self.inner.main_experiment_name = name;
        self
    }

    pub fn build(self) -> Result<Experiment, ScrnaError> {
        self.inner.validate()?;
        Ok(self.inner)
    }
}

impl Experiment {
    pub fn builder(kind: ExperimentKind, nrow: usize, ncol: usize) -> ExperimentBuilder {
        ExperimentBuilder {
            inner: Experiment {
                kind,
                nrow,
                ncol,
                assays: Vec::new(),
                row_data: DataFrame::empty(nrow),
                column_data: DataFrame::empty(ncol),
                reduced_dims: Vec::new(),
                alternative_experiments: Vec::new(),
                row_pairs: Vec::new(),
                column_pairs: Vec::new(),
                main_experiment_name: None,
            },
        }
    }

    fn validate(&self) -> Result<(), ScrnaError> {
        check_unique("assay", &self.assays)?;
        for (name, assay) in &self.assays {
            check_shape(&format!("assay {name:?}"), (self.nrow, self.ncol), assay.shape())?;
        }

        check_count("row annotations", self.nrow, self.row_data.row_count())?;
        check_count("column annotations", self.ncol, self.column_data.row_count())?;

        let is_single_cell = self.kind == ExperimentKind::SingleCellExperiment;
        if !is_single_cell
            && (!self.reduced_dims.is_empty() || !self.alternative_experiments.is_empty())
        {
            return Err(ScrnaError::Object {
                path: "experiment".to_string(),
                message: "only single-cell experiments carry reduced dimensions or alternative experiments"
                    .to_string(),
            });
        }

        check_unique("reduced dimension", &self.reduced_dims)?;
        for (name, dims) in &self.reduced_dims {
            check_count(
                &format!("rows of reduced dimension {name:?}"),
                self.ncol,
                dims.shape().0,
            )?;
        }

        check_unique("alternative experiment", &self.alternative_experiments)?;
        for (name, alt) in &self.alternative_experiments {
            check_count(
                &format!("columns of alternative experiment {name:?}"),
                self.ncol,
                alt.ncol,
            )?;
        }

        check_unique("row pair", &self.row_pairs)?;
        for (name, relation) in &self.row_pairs {
            check_pair_range(&format!("row pair {name:?}"), self.nrow, relation)?;
        }
        check_unique("column pair", &self.column_pairs)?;
        for (name, relation) in &self.column_pairs {
            check_pair_range(&format!("column pair {name:?}"), self.ncol, relation)?;
        }
        Ok(())
    }

    pub fn kind(&self) -> ExperimentKind {
        self.kind
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.nrow, self.ncol)
    }

    pub fn assay_names(&self) -> Vec<&str> {
        self.assays.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn assay(&self, name: &str) -> Option<&ArrayData> {
        find_named(&self.assays, name)
    }

    pub fn row_data(&self) -> &DataFrame {
        &self.row_data
    }

    pub fn column_data(&self) -> &DataFrame {
        &self.column_data
    }

    pub fn row_names(&self) -> Option<&[String]> {
        self.row_data.row_names()
    }

    pub fn column_names(&self) -> Option<&[String]> {
        self.column_data.row_names()
    }

    pub fn reduced_dim_names(&self) -> Vec<&str> {
        self.reduced_dims.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn reduced_dim(&self, name: &str) -> Option<&ArrayData> {
        find_named(&self.reduced_dims, name)
    }

    pub fn alternative_experiment_names(&self) -> Vec<&str> {
        self.alternative_experiments
            .iter()
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn alternative_experiment(&self, name: &str) -> Option<&Experiment> {
        find_named(&self.alternative_experiments, name)
    }

    pub fn row_pair(&self, name: &str) -> Option<&PairedRelation> {
        find_named(&self.row_pairs, name)
    }

    pub fn column_pair(&self, name: &str) -> Option<&PairedRelation> {
        find_named(&self.column_pairs, name)
    }

    pub fn main_experiment_name(&self) -> Option<&str> {
        self.main_experiment_name.as_deref()
    }

    /// Replaces every assay with `f(name, assay)`; shapes must not change.
    pub fn try_map_assays<F>(mut self, mut f: F) -> Result<Self, ScrnaError>
    where
        F: FnMut(&str, ArrayData) -> Result<ArrayData, ScrnaError>,
    {
        self.assays = map_arrays(self.assays, "assay", &mut f)?;
        Ok(self)
    }

    /// Replaces every reduced dimension with `f(name, dims)`; shapes must
    /// not change.
    pub fn try_map_reduced_dims<F>(mut self, mut f: F) -> Result<Self, ScrnaError>
    where
        F: FnMut(&str, ArrayData) -> Result<ArrayData, ScrnaError>,
    {
        self.reduced_dims = map_arrays(self.reduced_dims, "reduced dimension", &mut f)?;
        Ok(self)
    }

    pub fn try_map_alternative_experiments<F>(mut self, mut f: F) -> Result<Self, ScrnaError>
    where
        F: FnMut(&str, Experiment) -> Result<Experiment, ScrnaError>,
    {
        let mut mapped = Vec::with_capacity(self.alternative_experiments.len());
        for (name, alt) in self.alternative_experiments {
            let alt = f(&name, alt)?;
            check_count(
                &format!("columns of alternative experiment {name:?}"),
                self.ncol,
                alt.ncol,
            )?;
            mapped.push((name, alt));
        }
        self.alternative_experiments = mapped;
        Ok(self)
    }

    pub fn with_column_data(mut self, frame: DataFrame) -> Result<Self, ScrnaError> {
        check_count("column annotations", self.ncol, frame.row_count())?;
        self.column_data = frame;
        Ok(self)
    }

    pub fn summary(&self) -> ExperimentSummary {
        ExperimentSummary {
            kind: self.kind,
            rows: self.nrow,
            columns: self.ncol,
            assays: self
                .assays
                .iter()
                .map(|(name, data)| ArraySummary::new(name, data))
                .collect(),
            row_annotations: names_of(&self.row_data),
            column_annotations: names_of(&self.column_data),
            reduced_dimensions: self
                .reduced_dims
                .iter()
                .map(|(name, data)| ArraySummary::new(name, data))
                .collect(),
            alternative_experiments: self
                .alternative_experiments
                .iter()
                .map(|(name, _)| name.clone())
                .collect(),
            main_experiment_name: self.main_experiment_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExperimentSummary {
    pub kind: ExperimentKind,
    pub rows: usize,
    pub columns: usize,
    pub assays: Vec<ArraySummary>,
    pub row_annotations: Vec<String>,
    pub column_annotations: Vec<String>,
    pub reduced_dimensions: Vec<ArraySummary>,
    pub alternative_experiments: Vec<String>,
    pub main_experiment_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArraySummary {
    pub name: String,
    pub shape: (usize, usize),
    pub dtype: DataType,
    pub sparse: bool,
    pub realized: bool,
}

impl ArraySummary {
    fn new(name: &str, data: &ArrayData) -> Self {
        Self {
            name: name.to_string(),
            shape: data.shape(),
            dtype: data.dtype(),
            sparse: data.is_sparse(),
            realized: data.is_realized(),
        }
    }
}

fn names_of(frame: &DataFrame) -> Vec<String> {
    frame
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn find_named<'a, T>(items: &'a [(String, T)], name: &str) -> Option<&'a T> {
    items
        .iter()
        .find(|(candidate, _)| candidate == name)
        .map(|(_, item)| item)
}

fn map_arrays<F>(
    items: Vec<(String, ArrayData)>,
    what: &str,
    f: &mut F,
) -> Result<Vec<(String, ArrayData)>, ScrnaError>
where
    F: FnMut(&str, ArrayData) -> Result<ArrayData, ScrnaError>,
{
    let mut mapped = Vec::with_capacity(items.len());
    for (name, data) in items {
        let before = data.shape();
        let after = f(&name, data)?;
        check_shape(&format!("{what} {name:?}"), before, after.shape())?;
        mapped.push((name, after));
    }
    Ok(mapped)
}

fn check_unique<T>(what: &str, items: &[(String, T)]) -> Result<(), ScrnaError> {
    for (idx, (name, _)) in items.iter().enumerate() {
        if items[..idx].iter().any(|(other, _)| other == name) {
            return Err(ScrnaError::Object {
                path: "experiment".to_string(),
                message: format!("duplicate {what} name {name:?}"),
            });
        }
    }
    Ok(())
}

fn check_count(context: &str, expected: usize, found: usize) -> Result<(), ScrnaError> {
    if expected != found {
        return Err(ScrnaError::DimensionMismatch {
            context: context.to_string(),
            expected,
            found,
        });
    }
    Ok(())
}

fn check_shape(
    context: &str,
    expected: (usize, usize),
    found: (usize, usize),
) -> Result<(), ScrnaError> {
    check_count(&format!("rows of {context}"), expected.0, found.0)?;
    check_count(&format!("columns of {context}"), expected.1, found.1)
}

fn check_pair_range(
    context: &str,
    extent: usize,
    relation: &PairedRelation,
) -> Result<(), ScrnaError> {
    match relation.max_index() {
        Some(max) if max >= extent => Err(ScrnaError::Object {
            path: context.to_string(),
            message: format!("index {max} out of range for extent {extent}"),
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::DenseMatrix;

    fn dense(nrow: usize, ncol: usize) -> ArrayData {
        ArrayData::Dense(
            DenseMatrix::new(nrow, ncol, DataType::Number, vec![1.0; nrow * ncol]).unwrap(),
        )
    }

    #[test]
    fn assay_shape_must_match() {
        let err = Experiment::builder(ExperimentKind::SummarizedExperiment, 3, 2)
            .assay("counts", dense(3, 2))
            .assay("logcounts", dense(2, 2))
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Schema);
    }

    #[test]
    fn reduced_dims_need_single_cell() {
        let err = Experiment::builder(ExperimentKind::SummarizedExperiment, 3, 2)
            .reduced_dim("PCA", dense(2, 5))
            .build()
            .unwrap_err();
        assert!(matches!(err, ScrnaError::Object { .. }));

        let sce = Experiment::builder(ExperimentKind::SingleCellExperiment, 3, 2)
            .reduced_dim("PCA", dense(2, 5))
            .build()
            .unwrap();
        assert_eq!(sce.reduced_dim_names(), vec!["PCA"]);
    }

    #[test]
    fn pairs_must_be_in_range() {
        let err = Experiment::builder(ExperimentKind::SingleCellExperiment, 3, 2)
            .column_pair("knn", PairedRelation::new(vec![0, 1], vec![1, 2]).unwrap())
            .build()
            .unwrap_err();
        assert!(matches!(err, ScrnaError::Object { .. }));
    }
}
