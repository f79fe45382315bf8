//! JSON interchange form of a heap graph.
//!
//! Used by the CLI and by tests to feed already-parsed heaps into the analyzer.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::memory::{HeapGraphBuilder, MemoryHeapGraph};
use super::{
    Field, FieldValue, GcRootKind, HeapClass, HeapError, HeapGraph, HeapIndexer, HeapInstance,
    ObjectArray, ObjectId, PrimitiveArray, PrimitiveType,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HeapDocument {
    pub classes: Vec<ClassRecord>,
    pub instances: Vec<InstanceRecord>,
    pub primitive_arrays: Vec<PrimitiveArrayRecord>,
    pub object_arrays: Vec<ObjectArrayRecord>,
    pub gc_roots: Vec<RootRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassRecord {
    pub id: ObjectId,
    pub name: String,
    #[serde(default)]
    pub superclass: Option<ObjectId>,
    #[serde(default)]
    pub static_fields: Vec<FieldRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldRecord {
    /// Defaults to the owning class for static fields.
    #[serde(default)]
    pub declaring_class: Option<ObjectId>,
    pub name: String,
    pub value: FieldValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: ObjectId,
    pub class: ObjectId,
    #[serde(default)]
    pub fields: Vec<FieldRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimitiveArrayRecord {
    pub id: ObjectId,
    pub element_type: PrimitiveType,
    pub length: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectArrayRecord {
    pub id: ObjectId,
    pub class: ObjectId,
    #[serde(default)]
    pub elements: Vec<Option<ObjectId>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootRecord {
    pub id: ObjectId,
    pub kind: GcRootKind,
}

impl HeapDocument {
    pub fn from_json(json: &str, origin: &str) -> Result<Self, HeapError> {
        serde_json::from_str(json).map_err(|e| HeapError::Malformed {
            path: origin.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn load(path: &Path) -> Result<Self, HeapError> {
        let contents = std::fs::read_to_string(path).map_err(|source| HeapError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&contents, &path.display().to_string())
    }

    pub fn into_graph(self) -> Result<MemoryHeapGraph, HeapError> {
        let mut builder = HeapGraphBuilder::new();

        for class in self.classes {
            let owner = class.id;
            builder.insert_class(HeapClass {
                id: class.id,
                name: class.name,
                superclass_id: class.superclass,
                static_fields: into_fields(class.static_fields, Some(owner))?,
            })?;
        }
        for instance in self.instances {
            builder.insert_instance(HeapInstance {
                id: instance.id,
                class_id: instance.class,
                fields: into_fields(instance.fields, None)?,
            })?;
        }
        for array in self.primitive_arrays {
            builder.insert_primitive_array(PrimitiveArray {
                id: array.id,
                element_type: array.element_type,
                length: array.length,
            })?;
        }
        for array in self.object_arrays {
            builder.insert_object_array(ObjectArray {
                id: array.id,
                array_class_id: array.class,
                elements: array.elements,
            })?;
        }
        for root in self.gc_roots {
            builder.root(root.id, root.kind);
        }

        Ok(builder.build())
    }
}

fn into_fields(records: Vec<FieldRecord>, owner: Option<ObjectId>) -> Result<Vec<Field>, HeapError> {
    records
        .into_iter()
        .map(|record| {
            let declaring_class =
                record
                    .declaring_class
                    .or(owner)
                    .ok_or_else(|| HeapError::Malformed {
                        path: String::from("<document>"),
                        reason: format!("instance field `{}` has no declaring class", record.name),
                    })?;
            Ok(Field::new(declaring_class, record.name, record.value))
        })
        .collect()
}

/// Indexes heap dumps written as [`HeapDocument`] JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonHeapIndexer;

impl HeapIndexer for JsonHeapIndexer {
    fn index(&self, path: &Path) -> Result<Box<dyn HeapGraph + Send + Sync>, HeapError> {
        let graph = HeapDocument::load(path)?.into_graph()?;
        tracing::info!(
            path = %path.display(),
            objects = graph.object_count(),
            "indexed heap document"
        );
        Ok(Box::new(graph))
    }
}
