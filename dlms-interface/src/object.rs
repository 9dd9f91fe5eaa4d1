//! COSEM object dispatch
//!
//! Every interface class describes its attributes and methods once in an
//! [`ObjectSchema`] and implements [`CosemObject::handle_get`] /
//! [`CosemObject::handle_set`] (and optionally [`CosemObject::handle_action`]).
//! The provided `get_attribute` / `set_attribute` / `invoke_method` methods do
//! the id and access checks, so the class code only sees valid requests.

use async_trait::async_trait;
use dlms_core::{DataObject, DataObjectType, DlmsError, DlmsResult, ObisCode};
use std::collections::BTreeMap;

/// Attribute id of `logical_name`, present on every object
pub const ATTR_LOGICAL_NAME: u8 = 1;

/// Access mode of an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeAccess {
    NoAccess,
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AttributeAccess {
    pub fn is_readable(&self) -> bool {
        matches!(self, AttributeAccess::ReadOnly | AttributeAccess::ReadWrite)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDescriptor {
    pub id: u8,
    pub name: &'static str,
    pub data_type: DataObjectType,
    pub access: AttributeAccess,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub id: u8,
    pub name: &'static str,
}

/// Fixed attribute and method layout of one object instance
///
/// Built once at construction; there is no way to change it afterwards
/// other than building a new schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSchema {
    class_id: u16,
    logical_name: ObisCode,
    attributes: BTreeMap<u8, AttributeDescriptor>,
    methods: BTreeMap<u8, MethodDescriptor>,
}

impl ObjectSchema {
    /// Create a schema with the mandatory read-only `logical_name` attribute
    pub fn new(class_id: u16, logical_name: ObisCode) -> Self {
        let mut attributes = BTreeMap::new();
        attributes.insert(
            ATTR_LOGICAL_NAME,
            AttributeDescriptor {
                id: ATTR_LOGICAL_NAME,
                name: "logical_name",
                data_type: DataObjectType::OctetString,
                access: AttributeAccess::ReadOnly,
            },
        );
        Self {
            class_id,
            logical_name,
            attributes,
            methods: BTreeMap::new(),
        }
    }

    /// Register an attribute. Attribute 1 is reserved and cannot be replaced.
    pub fn with_attribute(
        mut self,
        id: u8,
        name: &'static str,
        data_type: DataObjectType,
        access: AttributeAccess,
    ) -> Self {
        if id != ATTR_LOGICAL_NAME {
            self.attributes.insert(
                id,
                AttributeDescriptor {
                    id,
                    name,
                    data_type,
                    access,
                },
            );
        }
        self
    }

    pub fn with_method(mut self, id: u8, name: &'static str) -> Self {
        self.methods.insert(id, MethodDescriptor { id, name });
        self
    }

    pub fn class_id(&self) -> u16 {
        self.class_id
    }

    pub fn logical_name(&self) -> ObisCode {
        self.logical_name
    }

    pub fn attribute(&self, id: u8) -> Option<&AttributeDescriptor> {
        self.attributes.get(&id)
    }

    pub fn method(&self, id: u8) -> Option<&MethodDescriptor> {
        self.methods.get(&id)
    }

    /// Registered attributes in id order
    pub fn attributes(&self) -> impl Iterator<Item = &AttributeDescriptor> {
        self.attributes.values()
    }

    /// Registered methods in id order
    pub fn methods(&self) -> impl Iterator<Item = &MethodDescriptor> {
        self.methods.values()
    }

    pub fn invalid_attribute(&self, attribute_id: u8) -> DlmsError {
        DlmsError::InvalidAttributeId {
            class_id: self.class_id,
            attribute_id,
        }
    }

    pub fn invalid_method(&self, method_id: u8) -> DlmsError {
        DlmsError::InvalidMethodId {
            class_id: self.class_id,
            method_id,
        }
    }
}

/// Common behaviour of all COSEM interface class instances
///
/// Implementations own their attribute values behind a per-object lock, so
/// the same instance can be shared by every session.
#[async_trait]
pub trait CosemObject: Send + Sync {
    fn schema(&self) -> &ObjectSchema;

    fn class_id(&self) -> u16 {
        self.schema().class_id()
    }

    fn obis_code(&self) -> ObisCode {
        self.schema().logical_name()
    }

    /// Read a registered, readable attribute other than `logical_name`
    async fn handle_get(&self, attribute_id: u8) -> DlmsResult<DataObject>;

    /// Write a registered, writable attribute
    async fn handle_set(&self, attribute_id: u8, value: DataObject) -> DlmsResult<()>;

    /// Run a registered method
    async fn handle_action(
        &self,
        method_id: u8,
        _parameters: Option<DataObject>,
    ) -> DlmsResult<Option<DataObject>> {
        Err(DlmsError::NotImplemented(format!(
            "method {} of class {}",
            method_id,
            self.class_id()
        )))
    }

    async fn get_attribute(&self, attribute_id: u8) -> DlmsResult<DataObject> {
        let schema = self.schema();
        let descriptor = schema
            .attribute(attribute_id)
            .ok_or_else(|| schema.invalid_attribute(attribute_id))?;
        if attribute_id == ATTR_LOGICAL_NAME {
            return Ok(DataObject::OctetString(schema.logical_name().to_bytes().to_vec()));
        }
        if !descriptor.access.is_readable() {
            return Err(DlmsError::AccessDenied(format!(
                "attribute {} ({}) of {} is not readable",
                attribute_id,
                descriptor.name,
                schema.logical_name()
            )));
        }
        self.handle_get(attribute_id).await
    }

    async fn set_attribute(&self, attribute_id: u8, value: DataObject) -> DlmsResult<()> {
        let schema = self.schema();
        let descriptor = schema
            .attribute(attribute_id)
            .ok_or_else(|| schema.invalid_attribute(attribute_id))?;
        match descriptor.access {
            AttributeAccess::ReadOnly => Err(DlmsError::ReadOnlyViolation(attribute_id)),
            AttributeAccess::NoAccess => Err(DlmsError::AccessDenied(format!(
                "attribute {} ({}) of {} is not accessible",
                attribute_id,
                descriptor.name,
                schema.logical_name()
            ))),
            AttributeAccess::WriteOnly | AttributeAccess::ReadWrite => {
                self.handle_set(attribute_id, value).await
            }
        }
    }

    async fn invoke_method(
        &self,
        method_id: u8,
        parameters: Option<DataObject>,
    ) -> DlmsResult<Option<DataObject>> {
        let schema = self.schema();
        if schema.method(method_id).is_none() {
            return Err(schema.invalid_method(method_id));
        }
        self.handle_action(method_id, parameters).await
    }
}

/// Fetch a required method parameter
pub(crate) fn required_parameter(
    method_id: u8,
    parameters: Option<DataObject>,
) -> DlmsResult<DataObject> {
    parameters.ok_or_else(|| {
        DlmsError::TypeMismatch(format!("method {} requires a parameter", method_id))
    })
}
