use std::fmt;
use std::ops::Deref;

use snapdiff_types::DatasetId;

use crate::error::StoreResult;
use crate::traits::{DatasetCatalog, DatasetInfo};

/// Scoped hold on a dataset. Released when dropped.
pub struct DatasetHold<'a> {
    catalog: &'a dyn DatasetCatalog,
    info: DatasetInfo,
}

impl<'a> DatasetHold<'a> {
    /// Take a hold on `id`. Nothing is held if this returns an error.
    pub fn acquire(catalog: &'a dyn DatasetCatalog, id: DatasetId) -> StoreResult<Self> {
        let info = catalog.hold_dataset(id)?;
        Ok(Self { catalog, info })
    }

    pub fn info(&self) -> &DatasetInfo {
        &self.info
    }
}

impl Deref for DatasetHold<'_> {
    type Target = DatasetInfo;

    fn deref(&self) -> &DatasetInfo {
        &self.info
    }
}

impl Drop for DatasetHold<'_> {
    fn drop(&mut self) {
        self.catalog.release_dataset(self.info.id);
    }
}

impl fmt::Debug for DatasetHold<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatasetHold")
            .field("dataset", &self.info.id)
            .field("dir", &self.info.dir.id)
            .finish()
    }
}
