//! Read-only view of one heap snapshot.
//!
//! Everything the analysis needs from a parsed dump goes through [`HeapGraph`].
//! Objects are addressed by opaque [`ObjectId`] handles; the graph may contain
//! arbitrary cycles, so nothing here holds owned pointers between objects.

pub mod document;
pub mod memory;

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use document::{HeapDocument, JsonHeapIndexer};
pub use memory::{HeapGraphBuilder, MemoryHeapGraph};

pub type ObjectId = u64;

pub const OBJECT_CLASS_NAME: &str = "java.lang.Object";

/// Size of one reference slot in an object array record.
pub const REFERENCE_SIZE: u64 = 4;

const PRIMITIVE_WRAPPERS: [&str; 8] = [
    "java.lang.Boolean",
    "java.lang.Character",
    "java.lang.Float",
    "java.lang.Double",
    "java.lang.Byte",
    "java.lang.Short",
    "java.lang.Integer",
    "java.lang.Long",
];

/// Keep only the low 32 bits; the high bits are a tag of the dump format.
pub fn mask_object_id(id: ObjectId) -> u64 {
    id & 0xffff_ffff
}

pub fn is_primitive_wrapper(class_name: &str) -> bool {
    PRIMITIVE_WRAPPERS.contains(&class_name)
}

#[derive(Debug, Error)]
pub enum HeapError {
    #[error("field {class}.{field} not found on instance {object_id:#x}")]
    MissingField {
        object_id: ObjectId,
        class: String,
        field: String,
    },
    #[error("field {class}.{field} is {actual}, expected {expected}")]
    FieldType {
        class: String,
        field: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("object {0:#x} is not in the heap graph")]
    UnknownObject(ObjectId),
    #[error("object id {0:#x} appears more than once")]
    DuplicateObject(ObjectId),
    #[error("failed to read heap dump {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("heap dump {path} is malformed: {reason}")]
    Malformed { path: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    Boolean(bool),
    Char(u16),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Object(Option<ObjectId>),
}

impl FieldValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Boolean(_) => "boolean",
            FieldValue::Char(_) => "char",
            FieldValue::Byte(_) => "byte",
            FieldValue::Short(_) => "short",
            FieldValue::Int(_) => "int",
            FieldValue::Long(_) => "long",
            FieldValue::Float(_) => "float",
            FieldValue::Double(_) => "double",
            FieldValue::Object(_) => "object",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            FieldValue::Boolean(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match *self {
            FieldValue::Int(v) => Some(v),
            _ => None,
        }
    }

    /// `Some(None)` is a null reference; `None` means this is not a reference.
    pub fn as_object(&self) -> Option<Option<ObjectId>> {
        match *self {
            FieldValue::Object(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub declaring_class: ObjectId,
    pub name: String,
    pub value: FieldValue,
}

impl Field {
    pub fn new(declaring_class: ObjectId, name: impl Into<String>, value: FieldValue) -> Self {
        Self {
            declaring_class,
            name: name.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeapClass {
    pub id: ObjectId,
    pub name: String,
    pub superclass_id: Option<ObjectId>,
    pub static_fields: Vec<Field>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeapInstance {
    pub id: ObjectId,
    pub class_id: ObjectId,
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveType {
    Boolean,
    Char,
    Float,
    Double,
    Byte,
    Short,
    Int,
    Long,
}

impl PrimitiveType {
    pub fn byte_size(self) -> u64 {
        match self {
            PrimitiveType::Boolean | PrimitiveType::Byte => 1,
            PrimitiveType::Char | PrimitiveType::Short => 2,
            PrimitiveType::Float | PrimitiveType::Int => 4,
            PrimitiveType::Double | PrimitiveType::Long => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PrimitiveType::Boolean => "boolean",
            PrimitiveType::Char => "char",
            PrimitiveType::Float => "float",
            PrimitiveType::Double => "double",
            PrimitiveType::Byte => "byte",
            PrimitiveType::Short => "short",
            PrimitiveType::Int => "int",
            PrimitiveType::Long => "long",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrimitiveArray {
    pub id: ObjectId,
    pub element_type: PrimitiveType,
    pub length: u64,
}

impl PrimitiveArray {
    pub fn array_class_name(&self) -> String {
        format!("{}[]", self.element_type.name())
    }

    pub fn byte_size(&self) -> u64 {
        self.length.saturating_mul(self.element_type.byte_size())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectArray {
    pub id: ObjectId,
    pub array_class_id: ObjectId,
    pub elements: Vec<Option<ObjectId>>,
}

impl ObjectArray {
    pub fn byte_size(&self) -> u64 {
        self.elements.len() as u64 * REFERENCE_SIZE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GcRootKind {
    JniGlobal,
    JniLocal,
    JavaFrame,
    NativeStack,
    StickyClass,
    ThreadBlock,
    MonitorUsed,
    ThreadObject,
    Unknown,
}

impl GcRootKind {
    pub fn description(self) -> &'static str {
        match self {
            GcRootKind::JniGlobal => "Global variable in native code",
            GcRootKind::JniLocal => "Local variable in native code",
            GcRootKind::JavaFrame => "Java local variable",
            GcRootKind::NativeStack => "Input or output parameters in native code",
            GcRootKind::StickyClass => "System class",
            GcRootKind::ThreadBlock => "Thread block",
            GcRootKind::MonitorUsed => {
                "Monitor (anything that called the wait() or notify() methods, or that is synchronized.)"
            }
            GcRootKind::ThreadObject => "Thread object",
            GcRootKind::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for GcRootKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcRoot {
    pub id: ObjectId,
    pub kind: GcRootKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferenceKind {
    InstanceField,
    StaticField,
    ArrayEntry,
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReferenceKind::InstanceField => "INSTANCE_FIELD",
            ReferenceKind::StaticField => "STATIC_FIELD",
            ReferenceKind::ArrayEntry => "ARRAY_ENTRY",
        };
        f.write_str(name)
    }
}

/// One outgoing edge of the reference graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub from: ObjectId,
    pub to: ObjectId,
    pub kind: ReferenceKind,
    /// Field name, or `[index]` for array entries.
    pub name: String,
    /// Class that declares the field; `None` for array entries.
    pub declaring_class: Option<ObjectId>,
}

#[derive(Debug, Clone, Copy)]
pub enum HeapObject<'a> {
    Class(&'a HeapClass),
    Instance(&'a HeapInstance),
    ObjectArray(&'a ObjectArray),
    PrimitiveArray(&'a PrimitiveArray),
}

impl HeapObject<'_> {
    pub fn id(&self) -> ObjectId {
        match self {
            HeapObject::Class(c) => c.id,
            HeapObject::Instance(i) => i.id,
            HeapObject::ObjectArray(a) => a.id,
            HeapObject::PrimitiveArray(a) => a.id,
        }
    }

    /// Short type tag used as the terminal entry of a leak trace.
    pub fn type_name(&self) -> &'static str {
        match self {
            HeapObject::Class(_) => "CLASS",
            HeapObject::Instance(_) => "INSTANCE",
            HeapObject::ObjectArray(_) => "OBJECT_ARRAY",
            HeapObject::PrimitiveArray(_) => "PRIMITIVE_ARRAY",
        }
    }
}

/// Query surface over one indexed heap snapshot.
///
/// Implementations are read-only for the whole lifetime of an analysis run.
/// Iteration order must be stable so repeated analyses of the same graph agree.
pub trait HeapGraph {
    fn find_class_by_name(&self, name: &str) -> Option<&HeapClass>;

    fn find_object_by_id(&self, id: ObjectId) -> Option<HeapObject<'_>>;

    fn instances(&self) -> Box<dyn Iterator<Item = &HeapInstance> + '_>;

    fn primitive_arrays(&self) -> Box<dyn Iterator<Item = &PrimitiveArray> + '_>;

    fn object_arrays(&self) -> Box<dyn Iterator<Item = &ObjectArray> + '_>;

    fn gc_roots(&self) -> Box<dyn Iterator<Item = &GcRoot> + '_>;

    fn class(&self, id: ObjectId) -> Option<&HeapClass> {
        match self.find_object_by_id(id)? {
            HeapObject::Class(class) => Some(class),
            _ => None,
        }
    }

    /// The class chain from `class_id` (inclusive) up to `java.lang.Object`.
    fn class_hierarchy(&self, class_id: ObjectId) -> Vec<&HeapClass> {
        let mut chain = Vec::new();
        let mut next = Some(class_id);
        while let Some(id) = next {
            let Some(class) = self.class(id) else {
                break;
            };
            // Malformed dumps can contain superclass cycles.
            if chain.iter().any(|c: &&HeapClass| c.id == class.id) {
                break;
            }
            chain.push(class);
            next = class.superclass_id;
        }
        chain
    }

    /// Display name of any object: class name, array class name, or instance class name.
    fn class_name_of(&self, id: ObjectId) -> Option<String> {
        match self.find_object_by_id(id)? {
            HeapObject::Class(class) => Some(class.name.clone()),
            HeapObject::Instance(instance) => {
                self.class(instance.class_id).map(|c| c.name.clone())
            }
            HeapObject::ObjectArray(array) => {
                self.class(array.array_class_id).map(|c| c.name.clone())
            }
            HeapObject::PrimitiveArray(array) => Some(array.array_class_name()),
        }
    }

    /// Field lookup by declaring class name, failing loudly when absent.
    fn field<'g>(
        &'g self,
        instance: &'g HeapInstance,
        declaring_class: &str,
        name: &str,
    ) -> Result<&'g FieldValue, HeapError> {
        instance
            .fields
            .iter()
            .find(|field| {
                field.name == name
                    && self
                        .class(field.declaring_class)
                        .is_some_and(|class| class.name == declaring_class)
            })
            .map(|field| &field.value)
            .ok_or_else(|| HeapError::MissingField {
                object_id: instance.id,
                class: declaring_class.to_string(),
                field: name.to_string(),
            })
    }

    fn bool_field(
        &self,
        instance: &HeapInstance,
        declaring_class: &str,
        name: &str,
    ) -> Result<bool, HeapError> {
        let value = self.field(instance, declaring_class, name)?;
        value.as_bool().ok_or_else(|| HeapError::FieldType {
            class: declaring_class.to_string(),
            field: name.to_string(),
            expected: "boolean",
            actual: value.type_name(),
        })
    }

    fn int_field(
        &self,
        instance: &HeapInstance,
        declaring_class: &str,
        name: &str,
    ) -> Result<i32, HeapError> {
        let value = self.field(instance, declaring_class, name)?;
        value.as_int().ok_or_else(|| HeapError::FieldType {
            class: declaring_class.to_string(),
            field: name.to_string(),
            expected: "int",
            actual: value.type_name(),
        })
    }

    /// Outgoing references of `id`, in field (or element) order.
    fn references_from(&self, id: ObjectId) -> Vec<Reference> {
        let Some(object) = self.find_object_by_id(id) else {
            return Vec::new();
        };
        match object {
            HeapObject::Class(class) => {
                field_references(id, &class.static_fields, ReferenceKind::StaticField)
            }
            HeapObject::Instance(instance) => {
                field_references(id, &instance.fields, ReferenceKind::InstanceField)
            }
            HeapObject::ObjectArray(array) => array
                .elements
                .iter()
                .enumerate()
                .filter_map(|(index, element)| {
                    element.map(|to| Reference {
                        from: id,
                        to,
                        kind: ReferenceKind::ArrayEntry,
                        name: format!("[{index}]"),
                        declaring_class: None,
                    })
                })
                .collect(),
            HeapObject::PrimitiveArray(_) => Vec::new(),
        }
    }
}

fn field_references(from: ObjectId, fields: &[Field], kind: ReferenceKind) -> Vec<Reference> {
    fields
        .iter()
        .filter_map(|field| match field.value {
            FieldValue::Object(Some(to)) => Some(Reference {
                from,
                to,
                kind,
                name: field.name.clone(),
                declaring_class: Some(field.declaring_class),
            }),
            _ => None,
        })
        .collect()
}

/// Turns a dump file on disk into a queryable graph.
pub trait HeapIndexer: Send + Sync {
    fn index(&self, path: &Path) -> Result<Box<dyn HeapGraph + Send + Sync>, HeapError>;
}
