//! Strongly typed facade over an [`ObjectProvider`].

use std::marker::PhantomData;
use std::sync::Arc;

use uuid::Uuid;

use crate::domain::{InfoObject, TypedInfo};

use super::error::ProviderError;
use super::object_provider::{Lookup, ObjectProvider};

pub struct TypedProvider<T> {
    inner: Arc<ObjectProvider>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for TypedProvider<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _marker: PhantomData,
        }
    }
}

impl<T: TypedInfo> TypedProvider<T> {
    pub fn new(inner: Arc<ObjectProvider>) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    pub fn untyped(&self) -> &Arc<ObjectProvider> {
        &self.inner
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<T>, ProviderError> {
        convert(self.inner.get_by_id(id, false).await)
    }

    /// Strict lookup: fails with [`ProviderError::NotFound`].
    pub async fn require_by_id(&self, id: i64) -> Result<T, ProviderError> {
        let object = self
            .inner
            .get_by_id(id, true)
            .await?
            .ok_or_else(|| ProviderError::not_found(self.type_name(), id.to_string()))?;
        Ok(T::from_object(&object)?)
    }

    pub async fn get_by_name(&self, name: &str) -> Result<Option<T>, ProviderError> {
        convert(self.inner.get_by_name(name, false).await)
    }

    pub async fn get_by_full_name(&self, full_name: &str) -> Result<Option<T>, ProviderError> {
        convert(self.inner.get_by_full_name(full_name, false).await)
    }

    pub async fn get_by_guid(&self, guid: Uuid) -> Result<Option<T>, ProviderError> {
        convert(self.inner.get_by_guid(guid, false).await)
    }

    /// Persist `value`; returns it as stored, with any assigned identity.
    pub async fn set(&self, value: &T) -> Result<T, ProviderError> {
        let object = value.to_object(self.inner.descriptor())?;
        let stored = self.inner.set(object).await?;
        Ok(T::from_object(&stored)?)
    }

    pub async fn delete(&self, value: &T) -> Result<(), ProviderError> {
        let object: InfoObject = value.to_object(self.inner.descriptor())?;
        self.inner.delete(&object).await
    }

    fn type_name(&self) -> &str {
        self.inner.descriptor().object_type().as_str()
    }
}

fn convert<T: TypedInfo>(lookup: Lookup) -> Result<Option<T>, ProviderError> {
    match lookup? {
        Some(object) => Ok(Some(T::from_object(&object)?)),
        None => Ok(None),
    }
}
