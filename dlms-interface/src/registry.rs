//! Registry of the COSEM objects of one logical device

use crate::object::CosemObject;
use dlms_core::{DlmsError, DlmsResult, ObisCode};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;

/// Objects keyed by logical name
///
/// Lookups clone the `Arc` and release the lock before the caller touches the
/// object, so objects may resolve other objects through the registry.
#[derive(Default)]
pub struct ObjectRegistry {
    objects: RwLock<HashMap<ObisCode, Arc<dyn CosemObject>>>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an object
    ///
    /// # Errors
    ///
    /// Returns [`DlmsError::InvalidState`] if the logical name is taken.
    pub async fn register(&self, object: Arc<dyn CosemObject>) -> DlmsResult<()> {
        let logical_name = object.obis_code();
        let mut objects = self.objects.write().await;
        if objects.contains_key(&logical_name) {
            return Err(DlmsError::InvalidState(format!(
                "object {} already registered",
                logical_name
            )));
        }
        log::debug!(
            "registered class {} object {}",
            object.class_id(),
            logical_name
        );
        objects.insert(logical_name, object);
        Ok(())
    }

    pub async fn get(&self, logical_name: &ObisCode) -> Option<Arc<dyn CosemObject>> {
        self.objects.read().await.get(logical_name).cloned()
    }

    /// Look up an object and check its class
    ///
    /// # Errors
    ///
    /// [`DlmsError::ObjectNotFound`] if nothing is registered under
    /// `logical_name`, [`DlmsError::ClassMismatch`] if the object has another
    /// class id.
    pub async fn resolve(
        &self,
        class_id: u16,
        logical_name: &ObisCode,
    ) -> DlmsResult<Arc<dyn CosemObject>> {
        let object = self
            .get(logical_name)
            .await
            .ok_or_else(|| DlmsError::ObjectNotFound(logical_name.to_string()))?;
        if object.class_id() != class_id {
            return Err(DlmsError::ClassMismatch {
                logical_name: logical_name.to_string(),
                expected: class_id,
                actual: object.class_id(),
            });
        }
        Ok(object)
    }

    pub async fn remove(&self, logical_name: &ObisCode) -> Option<Arc<dyn CosemObject>> {
        self.objects.write().await.remove(logical_name)
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    /// All logical names, sorted
    pub async fn logical_names(&self) -> Vec<ObisCode> {
        let mut names: Vec<ObisCode> = self.objects.read().await.keys().copied().collect();
        names.sort();
        names
    }

    /// Objects whose logical name matches a wildcard pattern, sorted by name
    pub async fn find(&self, pattern: &ObisCode) -> Vec<Arc<dyn CosemObject>> {
        let mut found: Vec<Arc<dyn CosemObject>> = self
            .objects
            .read()
            .await
            .iter()
            .filter(|(name, _)| name.matches(pattern))
            .map(|(_, object)| object.clone())
            .collect();
        found.sort_by_key(|object| object.obis_code());
        found
    }
}

/// Upgrade the back reference an object keeps to its registry
pub(crate) fn upgrade(registry: &Weak<ObjectRegistry>) -> DlmsResult<Arc<ObjectRegistry>> {
    registry
        .upgrade()
        .ok_or_else(|| DlmsError::InvalidState("object registry has been dropped".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Data;
    use dlms_core::{DataObject, DataObjectType};

    fn data(obis: ObisCode) -> Arc<dyn CosemObject> {
        Arc::new(Data::new(obis, DataObjectType::Unsigned, DataObject::Unsigned8(0)).unwrap())
    }

    #[tokio::test]
    async fn test_register_and_resolve() {
        let registry = ObjectRegistry::new();
        let obis = ObisCode::new(0, 0, 96, 1, 0, 255);
        registry.register(data(obis)).await.unwrap();

        assert_eq!(registry.resolve(1, &obis).await.unwrap().obis_code(), obis);
        assert!(matches!(
            registry.resolve(3, &obis).await,
            Err(DlmsError::ClassMismatch { expected: 3, actual: 1, .. })
        ));
        assert!(matches!(
            registry.resolve(1, &ObisCode::new(0, 0, 96, 1, 1, 255)).await,
            Err(DlmsError::ObjectNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let registry = ObjectRegistry::new();
        let obis = ObisCode::new(0, 0, 96, 1, 0, 255);
        registry.register(data(obis)).await.unwrap();
        assert!(matches!(
            registry.register(data(obis)).await,
            Err(DlmsError::InvalidState(_))
        ));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_find_by_pattern() {
        let registry = ObjectRegistry::new();
        registry.register(data(ObisCode::new(0, 0, 96, 1, 1, 255))).await.unwrap();
        registry.register(data(ObisCode::new(0, 0, 96, 1, 0, 255))).await.unwrap();
        registry.register(data(ObisCode::new(0, 0, 42, 0, 0, 255))).await.unwrap();

        let found = registry.find(&ObisCode::new(0, 0, 96, 1, 255, 255)).await;
        let names: Vec<ObisCode> = found.iter().map(|o| o.obis_code()).collect();
        assert_eq!(
            names,
            vec![ObisCode::new(0, 0, 96, 1, 0, 255), ObisCode::new(0, 0, 96, 1, 1, 255)]
        );

        assert!(registry.remove(&ObisCode::new(0, 0, 42, 0, 0, 255)).await.is_some());
        assert_eq!(registry.logical_names().await.len(), 2);
    }
}
