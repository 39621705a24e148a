//! Reads dataset objects from their on-disk layout.
//!
//! Every object directory carries an `OBJECT` descriptor naming its type.
//! Experiments keep their children in fixed sub-directories; collections
//! list their member names in `names.json` next to numbered directories.

use std::fs;
use std::io;

use camino::Utf8Path;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::array::{ArrayData, DataType, ReloadedArray};
use crate::error::ScrnaError;
use crate::experiment::{Experiment, ExperimentKind, PairedRelation};
use crate::frame::{Column, DataFrame};

pub const OBJECT_FILE: &str = "OBJECT";
pub const METADATA_FILE: &str = "_bioconductor.json";
pub const NAMES_FILE: &str = "names.json";
pub const CONTENTS_FILE: &str = "contents.json";

pub const ASSAYS_DIR: &str = "assays";
pub const ROW_DATA_DIR: &str = "row_data";
pub const COLUMN_DATA_DIR: &str = "column_data";
pub const REDUCED_DIMS_DIR: &str = "reduced_dimensions";
pub const ALT_EXPS_DIR: &str = "alternative_experiments";
pub const ROW_PAIRS_DIR: &str = "row_pairs";
pub const COLUMN_PAIRS_DIR: &str = "column_pairs";

#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    pub realize_assays: bool,
    pub realize_reduced_dims: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    SummarizedExperiment,
    SingleCellExperiment,
    DataFrame,
    DenseArray,
    CompressedSparseMatrix,
    PairedRelation,
}

impl ObjectType {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "summarized_experiment" => Some(ObjectType::SummarizedExperiment),
            "single_cell_experiment" => Some(ObjectType::SingleCellExperiment),
            "data_frame" => Some(ObjectType::DataFrame),
            "dense_array" => Some(ObjectType::DenseArray),
            "compressed_sparse_matrix" => Some(ObjectType::CompressedSparseMatrix),
            "paired_relation" => Some(ObjectType::PairedRelation),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ObjectDescriptor {
    #[serde(rename = "type")]
    object_type: String,
    #[serde(default)]
    summarized_experiment: Option<ExperimentInfo>,
    #[serde(default)]
    single_cell_experiment: Option<SingleCellInfo>,
    #[serde(default)]
    data_frame: Option<FrameInfo>,
    #[serde(default)]
    dense_array: Option<ArrayInfo>,
    #[serde(default)]
    compressed_sparse_matrix: Option<ArrayInfo>,
}

#[derive(Debug, Deserialize)]
struct ExperimentInfo {
    dimensions: [usize; 2],
}

#[derive(Debug, Default, Deserialize)]
struct SingleCellInfo {
    #[serde(default)]
    main_experiment_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FrameInfo {
    row_count: usize,
}

#[derive(Debug, Deserialize)]
struct ArrayInfo {
    shape: [usize; 2],
    dtype: DataType,
}

#[derive(Debug, Deserialize)]
struct FrameContents {
    #[serde(default)]
    row_names: Option<Vec<String>>,
    #[serde(default)]
    columns: Vec<FrameColumn>,
}

#[derive(Debug, Deserialize)]
struct FrameColumn {
    name: String,
    data: Column,
}

#[derive(Debug, Deserialize)]
struct PairContents {
    first: Vec<usize>,
    second: Vec<usize>,
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Utf8Path) -> Result<T, ScrnaError> {
    let content = fs::read_to_string(path.as_std_path()).map_err(|err| {
        if err.kind() == io::ErrorKind::NotFound {
            ScrnaError::Object {
                path: path.to_string(),
                message: "file is missing".to_string(),
            }
        } else {
            ScrnaError::Filesystem(format!("read {path}: {err}"))
        }
    })?;
    serde_json::from_str(&content).map_err(|err| ScrnaError::Object {
        path: path.to_string(),
        message: err.to_string(),
    })
}

fn read_descriptor(dir: &Utf8Path) -> Result<(ObjectType, ObjectDescriptor), ScrnaError> {
    let descriptor: ObjectDescriptor = read_json(&dir.join(OBJECT_FILE))?;
    let object_type =
        ObjectType::parse(&descriptor.object_type).ok_or_else(|| ScrnaError::Object {
            path: dir.to_string(),
            message: format!("unsupported object type {:?}", descriptor.object_type),
        })?;
    Ok((object_type, descriptor))
}

/// Returns the declared type of the object stored in `dir`.
pub fn read_object_type(dir: &Utf8Path) -> Result<ObjectType, ScrnaError> {
    read_descriptor(dir).map(|(object_type, _)| object_type)
}

fn read_names(dir: &Utf8Path) -> Result<Vec<String>, ScrnaError> {
    let path = dir.join(NAMES_FILE);
    if !path.as_std_path().exists() {
        return Ok(Vec::new());
    }
    read_json(&path)
}

fn wrong_type(dir: &Utf8Path, expected: &str, found: ObjectType) -> ScrnaError {
    ScrnaError::Object {
        path: dir.to_string(),
        message: format!("expected {expected}, found {found:?}"),
    }
}

fn missing_section(dir: &Utf8Path, section: &str) -> ScrnaError {
    ScrnaError::Object {
        path: dir.to_string(),
        message: format!("descriptor lacks the {section} section"),
    }
}

/// Opens an array as a lazy handle; only the descriptor is read.
pub fn read_array(dir: &Utf8Path) -> Result<ArrayData, ScrnaError> {
    let (object_type, descriptor) = read_descriptor(dir)?;
    let (info, sparse) = match object_type {
        ObjectType::DenseArray => (
            descriptor
                .dense_array
                .ok_or_else(|| missing_section(dir, "dense_array"))?,
            false,
        ),
        ObjectType::CompressedSparseMatrix => (
            descriptor
                .compressed_sparse_matrix
                .ok_or_else(|| missing_section(dir, "compressed_sparse_matrix"))?,
            true,
        ),
        other => return Err(wrong_type(dir, "an array", other)),
    };
    Ok(ArrayData::Reloaded(ReloadedArray::new(
        dir.to_path_buf(),
        (info.shape[0], info.shape[1]),
        info.dtype,
        sparse,
    )))
}

pub fn read_data_frame(dir: &Utf8Path) -> Result<DataFrame, ScrnaError> {
    let (object_type, descriptor) = read_descriptor(dir)?;
    if object_type != ObjectType::DataFrame {
        return Err(wrong_type(dir, "a data frame", object_type));
    }
    let info = descriptor
        .data_frame
        .ok_or_else(|| missing_section(dir, "data_frame"))?;
    let contents: FrameContents = read_json(&dir.join(CONTENTS_FILE))?;
    let columns = contents
        .columns
        .into_iter()
        .map(|column| (column.name, column.data))
        .collect();
    DataFrame::new(info.row_count, contents.row_names, columns).map_err(|err| locate(dir, err))
}

fn read_paired_relation(dir: &Utf8Path) -> Result<PairedRelation, ScrnaError> {
    let (object_type, _) = read_descriptor(dir)?;
    if object_type != ObjectType::PairedRelation {
        return Err(wrong_type(dir, "a paired relation", object_type));
    }
    let contents: PairContents = read_json(&dir.join(CONTENTS_FILE))?;
    PairedRelation::new(contents.first, contents.second).map_err(|err| locate(dir, err))
}

/// Reads a (single-cell) experiment and everything below it.
pub fn read_experiment(dir: &Utf8Path, options: &ReadOptions) -> Result<Experiment, ScrnaError> {
    let (object_type, descriptor) = read_descriptor(dir)?;
    let kind = match object_type {
        ObjectType::SummarizedExperiment => ExperimentKind::SummarizedExperiment,
        ObjectType::SingleCellExperiment => ExperimentKind::SingleCellExperiment,
        other => return Err(wrong_type(dir, "an experiment", other)),
    };
    let info = descriptor
        .summarized_experiment
        .ok_or_else(|| missing_section(dir, "summarized_experiment"))?;
    let [nrow, ncol] = info.dimensions;

    let mut builder = Experiment::builder(kind, nrow, ncol);

    let assays_dir = dir.join(ASSAYS_DIR);
    for (idx, name) in read_names(&assays_dir)?.iter().enumerate() {
        let mut assay = read_array(&assays_dir.join(idx.to_string()))?;
        if options.realize_assays {
            assay = assay.realize()?;
        }
        builder = builder.assay(name, assay);
    }

    let row_data_dir = dir.join(ROW_DATA_DIR);
    if row_data_dir.as_std_path().exists() {
        builder = builder.row_data(read_data_frame(&row_data_dir)?);
    }
    let column_data_dir = dir.join(COLUMN_DATA_DIR);
    if column_data_dir.as_std_path().exists() {
        builder = builder.column_data(read_data_frame(&column_data_dir)?);
    }

    if kind == ExperimentKind::SingleCellExperiment {
        let sce = descriptor.single_cell_experiment.unwrap_or_default();
        builder = builder.main_experiment_name(sce.main_experiment_name);

        let reduced_dir = dir.join(REDUCED_DIMS_DIR);
        for (idx, name) in read_names(&reduced_dir)?.iter().enumerate() {
            let mut dims = read_array(&reduced_dir.join(idx.to_string()))?;
            if options.realize_reduced_dims {
                dims = dims.realize()?;
            }
            builder = builder.reduced_dim(name, dims);
        }

        let alt_dir = dir.join(ALT_EXPS_DIR);
        for (idx, name) in read_names(&alt_dir)?.iter().enumerate() {
            let alt = read_experiment(&alt_dir.join(idx.to_string()), options)?;
            builder = builder.alternative_experiment(name, alt);
        }
    }

    let row_pairs_dir = dir.join(ROW_PAIRS_DIR);
    for (idx, name) in read_names(&row_pairs_dir)?.iter().enumerate() {
        builder = builder.row_pair(name, read_paired_relation(&row_pairs_dir.join(idx.to_string()))?);
    }
    let column_pairs_dir = dir.join(COLUMN_PAIRS_DIR);
    for (idx, name) in read_names(&column_pairs_dir)?.iter().enumerate() {
        builder = builder.column_pair(
            name,
            read_paired_relation(&column_pairs_dir.join(idx.to_string()))?,
        );
    }

    builder.build().map_err(|err| locate(dir, err))
}

fn locate(dir: &Utf8Path, err: ScrnaError) -> ScrnaError {
    match err {
        ScrnaError::DimensionMismatch {
            context,
            expected,
            found,
        } => ScrnaError::DimensionMismatch {
            context: format!("{dir}: {context}"),
            expected,
            found,
        },
        other => other,
    }
}
