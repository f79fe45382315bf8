use std::collections::HashMap;

use super::{
    Field, FieldValue, GcRoot, GcRootKind, HeapClass, HeapError, HeapGraph, HeapInstance,
    HeapObject, ObjectArray, ObjectId, PrimitiveArray, PrimitiveType,
};

/// Generated ids carry a tag in the high bits, like real dump identifiers do.
const FIRST_GENERATED_ID: ObjectId = 0x7_0000_1000;

#[derive(Debug, Clone)]
enum Node {
    Class(HeapClass),
    Instance(HeapInstance),
    ObjectArray(ObjectArray),
    PrimitiveArray(PrimitiveArray),
}

/// Arena-backed heap graph: nodes live in one `Vec`, addressed through an id index.
#[derive(Debug, Clone, Default)]
pub struct MemoryHeapGraph {
    nodes: Vec<Node>,
    index: HashMap<ObjectId, usize>,
    classes_by_name: HashMap<String, ObjectId>,
    instances: Vec<usize>,
    primitive_arrays: Vec<usize>,
    object_arrays: Vec<usize>,
    roots: Vec<GcRoot>,
}

impl MemoryHeapGraph {
    pub fn object_count(&self) -> usize {
        self.nodes.len()
    }

    fn node(&self, slot: usize) -> &Node {
        &self.nodes[slot]
    }
}

impl HeapGraph for MemoryHeapGraph {
    fn find_class_by_name(&self, name: &str) -> Option<&HeapClass> {
        let id = self.classes_by_name.get(name)?;
        self.class(*id)
    }

    fn find_object_by_id(&self, id: ObjectId) -> Option<HeapObject<'_>> {
        let slot = *self.index.get(&id)?;
        Some(match self.node(slot) {
            Node::Class(class) => HeapObject::Class(class),
            Node::Instance(instance) => HeapObject::Instance(instance),
            Node::ObjectArray(array) => HeapObject::ObjectArray(array),
            Node::PrimitiveArray(array) => HeapObject::PrimitiveArray(array),
        })
    }

    fn instances(&self) -> Box<dyn Iterator<Item = &HeapInstance> + '_> {
        Box::new(self.instances.iter().filter_map(|&slot| match self.node(slot) {
            Node::Instance(instance) => Some(instance),
            _ => None,
        }))
    }

    fn primitive_arrays(&self) -> Box<dyn Iterator<Item = &PrimitiveArray> + '_> {
        Box::new(
            self.primitive_arrays
                .iter()
                .filter_map(|&slot| match self.node(slot) {
                    Node::PrimitiveArray(array) => Some(array),
                    _ => None,
                }),
        )
    }

    fn object_arrays(&self) -> Box<dyn Iterator<Item = &ObjectArray> + '_> {
        Box::new(self.object_arrays.iter().filter_map(|&slot| match self.node(slot) {
            Node::ObjectArray(array) => Some(array),
            _ => None,
        }))
    }

    fn gc_roots(&self) -> Box<dyn Iterator<Item = &GcRoot> + '_> {
        Box::new(self.roots.iter())
    }
}

/// Incrementally assembles a [`MemoryHeapGraph`].
///
/// The `class`/`instance`/`*_array` helpers allocate ids; the `insert_*` methods
/// take explicit ids and reject duplicates, which is what the document loader uses.
#[derive(Debug)]
pub struct HeapGraphBuilder {
    graph: MemoryHeapGraph,
    next_id: ObjectId,
}

impl Default for HeapGraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HeapGraphBuilder {
    pub fn new() -> Self {
        Self {
            graph: MemoryHeapGraph::default(),
            next_id: FIRST_GENERATED_ID,
        }
    }

    fn allocate_id(&mut self) -> ObjectId {
        while self.graph.index.contains_key(&self.next_id) {
            self.next_id += 1;
        }
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn push(&mut self, id: ObjectId, node: Node) -> Result<usize, HeapError> {
        if self.graph.index.contains_key(&id) {
            return Err(HeapError::DuplicateObject(id));
        }
        let slot = self.graph.nodes.len();
        self.graph.nodes.push(node);
        self.graph.index.insert(id, slot);
        Ok(slot)
    }

    pub fn insert_class(&mut self, class: HeapClass) -> Result<ObjectId, HeapError> {
        let id = class.id;
        let name = class.name.clone();
        self.push(id, Node::Class(class))?;
        self.graph.classes_by_name.entry(name).or_insert(id);
        Ok(id)
    }

    pub fn insert_instance(&mut self, instance: HeapInstance) -> Result<ObjectId, HeapError> {
        let id = instance.id;
        let slot = self.push(id, Node::Instance(instance))?;
        self.graph.instances.push(slot);
        Ok(id)
    }

    pub fn insert_primitive_array(&mut self, array: PrimitiveArray) -> Result<ObjectId, HeapError> {
        let id = array.id;
        let slot = self.push(id, Node::PrimitiveArray(array))?;
        self.graph.primitive_arrays.push(slot);
        Ok(id)
    }

    pub fn insert_object_array(&mut self, array: ObjectArray) -> Result<ObjectId, HeapError> {
        let id = array.id;
        let slot = self.push(id, Node::ObjectArray(array))?;
        self.graph.object_arrays.push(slot);
        Ok(id)
    }

    pub fn class(&mut self, name: &str, superclass_id: Option<ObjectId>) -> ObjectId {
        self.class_with_statics(name, superclass_id, Vec::new())
    }

    /// Static fields are declared by the new class itself.
    pub fn class_with_statics(
        &mut self,
        name: &str,
        superclass_id: Option<ObjectId>,
        statics: Vec<(&str, FieldValue)>,
    ) -> ObjectId {
        let id = self.allocate_id();
        let static_fields = statics
            .into_iter()
            .map(|(field, value)| Field::new(id, field, value))
            .collect();
        let class = HeapClass {
            id,
            name: name.to_string(),
            superclass_id,
            static_fields,
        };
        self.insert_class(class)
            .expect("allocated ids are never in use");
        id
    }

    pub fn instance(&mut self, class_id: ObjectId, fields: Vec<Field>) -> ObjectId {
        let id = self.allocate_id();
        self.insert_instance(HeapInstance {
            id,
            class_id,
            fields,
        })
        .expect("allocated ids are never in use");
        id
    }

    pub fn primitive_array(&mut self, element_type: PrimitiveType, length: u64) -> ObjectId {
        let id = self.allocate_id();
        self.insert_primitive_array(PrimitiveArray {
            id,
            element_type,
            length,
        })
        .expect("allocated ids are never in use");
        id
    }

    pub fn object_array(
        &mut self,
        array_class_id: ObjectId,
        elements: Vec<Option<ObjectId>>,
    ) -> ObjectId {
        let id = self.allocate_id();
        self.insert_object_array(ObjectArray {
            id,
            array_class_id,
            elements,
        })
        .expect("allocated ids are never in use");
        id
    }

    pub fn root(&mut self, id: ObjectId, kind: GcRootKind) -> &mut Self {
        self.graph.roots.push(GcRoot { id, kind });
        self
    }

    /// Replace the fields of an already-inserted instance, e.g. to close a cycle.
    pub fn set_fields(&mut self, id: ObjectId, fields: Vec<Field>) -> Result<(), HeapError> {
        let slot = *self
            .graph
            .index
            .get(&id)
            .ok_or(HeapError::UnknownObject(id))?;
        match &mut self.graph.nodes[slot] {
            Node::Instance(instance) => {
                instance.fields = fields;
                Ok(())
            }
            _ => Err(HeapError::UnknownObject(id)),
        }
    }

    pub fn build(self) -> MemoryHeapGraph {
        self.graph
    }
}
