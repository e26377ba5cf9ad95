//! Typed and untyped views of stored objects
//!
//! The store persists [`DynObject`]s (spec and status as JSON) so a single
//! backend can hold every kind. Typed resources convert to and from that
//! shape through the [`Resource`] trait.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::meta::{Kind, NamespacedName, ObjectMeta};

/// Untyped stored document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynObject {
    pub kind: Kind,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: Value,
    #[serde(default)]
    pub status: Value,
}

impl DynObject {
    pub fn key(&self) -> NamespacedName {
        self.metadata.key()
    }
}

/// A typed stored object shaped as `{metadata, spec, status?}`
pub trait Resource: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: Kind;

    fn meta(&self) -> &ObjectMeta;

    fn meta_mut(&mut self) -> &mut ObjectMeta;

    fn key(&self) -> NamespacedName {
        self.meta().key()
    }

    fn to_dyn(&self) -> Result<DynObject, serde_json::Error> {
        let mut fields = match serde_json::to_value(self)? {
            Value::Object(map) => map,
            other => {
                return Err(serde::ser::Error::custom(format!(
                    "{} did not serialize to an object: {}",
                    Self::KIND,
                    other
                )));
            }
        };

        Ok(DynObject {
            kind: Self::KIND,
            metadata: serde_json::from_value(fields.remove("metadata").unwrap_or_default())?,
            spec: fields.remove("spec").unwrap_or_default(),
            status: fields.remove("status").unwrap_or_default(),
        })
    }

    fn from_dyn(obj: DynObject) -> Result<Self, serde_json::Error> {
        if obj.kind != Self::KIND {
            return Err(serde::de::Error::custom(format!(
                "expected {} but found {}",
                Self::KIND,
                obj.kind
            )));
        }

        let mut fields = Map::new();
        fields.insert("metadata".to_string(), serde_json::to_value(obj.metadata)?);
        fields.insert("spec".to_string(), obj.spec);
        if !obj.status.is_null() {
            fields.insert("status".to_string(), obj.status);
        }
        serde_json::from_value(Value::Object(fields))
    }
}

/// A resource with an observed status written through the status-only path
pub trait Stateful: Resource {
    type Status: Clone + Send + Sync;

    fn status(&self) -> &Self::Status;

    fn status_mut(&mut self) -> &mut Self::Status;
}

/// Implements [`Resource`] for a `{metadata, spec, ...}` struct
macro_rules! impl_resource {
    ($ty:ty, $kind:expr) => {
        impl $crate::domain::object::Resource for $ty {
            const KIND: $crate::domain::meta::Kind = $kind;

            fn meta(&self) -> &$crate::domain::meta::ObjectMeta {
                &self.metadata
            }

            fn meta_mut(&mut self) -> &mut $crate::domain::meta::ObjectMeta {
                &mut self.metadata
            }
        }
    };
}

pub(crate) use impl_resource;
