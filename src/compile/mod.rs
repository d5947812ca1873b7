// Dataset compilation module
// Walks the category roots and feeds each new folder into its dataset

pub mod compiler;
pub mod folders;

pub use compiler::{
    Category, CompileError, CompileResult, CompileSummary, DatasetAssignment, ExampleBuilders,
    FeatureCompiler, FolderOutcome, FolderProgress, ProcessedFolderSet,
};
pub use folders::{folder_name, DirectoryListing, FsDirectoryListing};
