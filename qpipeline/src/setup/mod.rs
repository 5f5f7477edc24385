//! Study setup support: input validation, folder scaffolding, the batch
//! parameter file and the scan-name mapping consumed by the setup stages.

mod hooks;
mod mapping;
mod scaffold;

pub use hooks::SetupHooks;
pub use mapping::{map_label, ScanMapping, MAPPING_FILE};
pub use scaffold::{
    check_bids_folder, check_paths_absolute, create_run_root, remove_temporary_files,
    BatchSource, DataType, BATCH_FILE,
};
