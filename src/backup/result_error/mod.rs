use std::fmt::{Debug, Display};
pub mod error;
pub mod result;

pub trait WithDebugObjectAndFnName<S: Into<String>, O: Debug + 'static> {
    fn with_debug_object_and_fn_name(self, obj: O, fn_name: S) -> Self;
}

pub trait WithMsg<S: Into<String>> {
    fn with_msg(self, msg: S) -> Self;
}

/// Absorbs a non-fatal error: logs it at `warn` level and yields `None`.
pub trait WarnAndDiscard<T> {
    fn warn_and_discard<D: Display>(self, context: D) -> Option<T>;
}

impl<T, E: Display> WarnAndDiscard<T> for std::result::Result<T, E> {
    fn warn_and_discard<D: Display>(self, context: D) -> Option<T> {
        match self {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!("{context}: {e}");
                None
            }
        }
    }
}
