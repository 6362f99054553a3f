pub mod dump;
pub mod enumerate;
pub mod module_registry;
pub mod progress;
pub mod result_error;
pub mod storage;
pub mod task;
pub mod tenant;
pub mod validate;

macro_rules! function_path {
    () => {
        concat!(module_path!(), "::", function_name!(), " ", file!(), ":", line!())
    };
}

pub(crate) use function_path;
