pub mod dbf;
pub mod shp;

pub use dbf::{DbfField, DbfFile, FieldType};
pub use shp::{Geometry, ShapeType, ShpReader, ShpWriter};
