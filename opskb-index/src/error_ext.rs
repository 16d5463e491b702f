use opskb_core::error::{Error, Result};

/// Lift driver errors into [`Error::Store`]
pub(crate) trait SqlResultExt<T> {
    fn store_err(self) -> Result<T>;
}

impl<T> SqlResultExt<T> for std::result::Result<T, rusqlite::Error> {
    fn store_err(self) -> Result<T> {
        self.map_err(Error::store)
    }
}
