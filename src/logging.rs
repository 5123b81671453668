use crate::error::LoadError;

/// Log a [`LoadError`] at error level, with optional context.
pub fn log_load_error(error: &LoadError, context: Option<&str>) {
    match context {
        Some(ctx) => log::error!("{ctx}: {error}"),
        None => log::error!("{error}"),
    }
}

/// Result extension for convenient error logging
pub trait ResultExt<T, E> {
    fn log_error(self, context: Option<&str>) -> Self;
}

impl<T> ResultExt<T, LoadError> for Result<T, LoadError> {
    fn log_error(self, context: Option<&str>) -> Self {
        if let Err(ref error) = self {
            log_load_error(error, context);
        }
        self
    }
}
