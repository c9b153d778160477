pub mod coordinate;
pub mod error;
pub mod grading;
pub mod layer;
pub mod model;
pub mod report;
pub mod rules;
pub mod shapefile;

pub use coordinate::{CoordinateProperty, ReportedParcel};
pub use error::{Error, Result};
pub use grading::PatchGrades;
pub use model::{Crop, EvaluationFactor, FactorKind, LandClass, Patch, UtilizationKind};
pub use rules::{MemoryRuleLookup, RuleLookup};
pub use shapefile::{DbfFile, FieldType, Geometry, ShapeType, ShpReader, ShpWriter};
