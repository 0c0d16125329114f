// Sub-modules
pub mod dr;
pub mod eltorito;
pub mod path_table;
pub mod susp;
pub mod udf;
pub mod vd;

pub use dr::{DirRecord, DirStream, FileFlags};
pub use eltorito::{BootCatalog, BootEntry, BootMedia, BootPlatform, SectionHeader, ValidationEntry};
pub use path_table::PathTableRecord;
pub use susp::{RockRidge, RrVersion, SlComponent, SuspEntry, TfFlags};
pub use vd::{BootRecordVd, Pvd, VolumeDescriptor};
