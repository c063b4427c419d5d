//! Named scalars shared between streams outside the tuple buffers.
//!
//! One manager is created per top-level execution context and handed
//! explicitly to every graph built in it. Several concurrently open graphs may
//! reference the same manager, so all access goes through one mutex.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::id::DynamicParamId;
use crate::tuple::{DataType, Datum};

#[derive(Debug, Clone, PartialEq)]
pub struct DynamicParam {
    pub data_type: DataType,
    pub value: Datum,
}

#[derive(Debug, Clone, Default)]
pub struct DynamicParamManager {
    inner: Arc<Mutex<HashMap<DynamicParamId, DynamicParam>>>,
}

impl DynamicParamManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<DynamicParamId, DynamicParam>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a parameter initialized to NULL.
    ///
    /// With `fail_if_exists` a second create is an error; otherwise it leaves
    /// the existing value alone.
    pub fn create_param(
        &self,
        id: DynamicParamId,
        data_type: DataType,
        fail_if_exists: bool,
    ) -> Result<()> {
        let mut map = self.lock();
        if map.contains_key(&id) {
            if fail_if_exists {
                return Err(Error::DuplicateParam(id));
            }
            return Ok(());
        }
        map.insert(
            id,
            DynamicParam {
                data_type,
                value: Datum::Null,
            },
        );
        Ok(())
    }

    pub fn remove_param(&self, id: DynamicParamId) -> Result<()> {
        self.lock()
            .remove(&id)
            .map(|_| ())
            .ok_or(Error::MissingParam(id))
    }

    pub fn read_param(&self, id: DynamicParamId) -> Result<Datum> {
        self.lock()
            .get(&id)
            .map(|p| p.value.clone())
            .ok_or(Error::MissingParam(id))
    }

    pub fn write_param(&self, id: DynamicParamId, value: Datum) -> Result<()> {
        let mut map = self.lock();
        let param = map.get_mut(&id).ok_or(Error::MissingParam(id))?;
        if let Some(ty) = value.data_type() {
            if ty != param.data_type {
                return Err(Error::Value(format!(
                    "{id} holds {:?}, cannot store {:?}",
                    param.data_type, ty
                )));
            }
        }
        param.value = value;
        Ok(())
    }

    /// Atomically add one to an `Int64` parameter (NULL counts as zero) and
    /// return the new value.
    pub fn increment_counter(&self, id: DynamicParamId) -> Result<i64> {
        let mut map = self.lock();
        let param = map.get_mut(&id).ok_or(Error::MissingParam(id))?;
        let next = match &param.value {
            Datum::Null => 1,
            Datum::Int64(v) => v
                .checked_add(1)
                .ok_or_else(|| Error::Value(format!("{id} counter overflowed at {v}")))?,
            other => {
                return Err(Error::Value(format!("{id} holds non-counter {other}")));
            }
        };
        param.value = Datum::Int64(next);
        Ok(next)
    }

    pub fn contains(&self, id: DynamicParamId) -> bool {
        self.lock().contains_key(&id)
    }
}
