//! Single-pass leak classification over every instance and array in a heap.

use std::collections::{BTreeSet, HashMap};

use crate::config::AnalysisConfig;
use crate::heap::{
    FieldValue, HeapError, HeapGraph, HeapInstance, ObjectId, is_primitive_wrapper,
    mask_object_id,
};

/// Upper bound on recorded candidates per originating class.
pub const SAME_CLASS_LEAK_CAP: usize = 45;

pub const ACTIVITY_CLASS_NAME: &str = "android.app.Activity";
pub const BITMAP_CLASS_NAME: &str = "android.graphics.Bitmap";
pub const NATIVE_ALLOCATION_CLASS_NAME: &str = "libcore.util.NativeAllocationRegistry";
pub const NATIVE_ALLOCATION_CLEANER_THUNK_CLASS_NAME: &str =
    "libcore.util.NativeAllocationRegistry$CleanerThunk";
pub const WINDOW_CLASS_NAME: &str = "android.view.Window";

/// Fragment base classes, in lookup order; the first one present in the heap wins.
pub const FRAGMENT_CLASS_NAMES: [&str; 3] = [
    "androidx.fragment.app.Fragment",
    "android.app.Fragment",
    "android.support.v4.app.Fragment",
];

const DESTROYED_FIELD_NAME: &str = "mDestroyed";
const FINISHED_FIELD_NAME: &str = "mFinished";
const FRAGMENT_MANAGER_FIELD_NAME: &str = "mFragmentManager";
const FRAGMENT_CALLED_FIELD_NAME: &str = "mCalled";

pub const ACTIVITY_LEAK_REASON: &str = "Activity Leak";
pub const FRAGMENT_LEAK_REASON: &str = "Fragment Leak";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeakCandidate {
    pub object_id: ObjectId,
    pub class_name: String,
    pub reason: String,
}

/// Instance counts for one watched class, in first-encounter order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassTally {
    pub class_name: String,
    pub instance_count: u64,
    pub leak_count: u64,
}

/// Oversized object record; `object_id` is already masked for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BigObject {
    pub class_name: String,
    pub size: u64,
    pub object_id: u64,
    pub ext_detail: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub candidates: Vec<LeakCandidate>,
    pub class_tallies: Vec<ClassTally>,
    pub big_objects: Vec<BigObject>,
}

impl Classification {
    pub fn ids(&self) -> BTreeSet<ObjectId> {
        self.candidates.iter().map(|c| c.object_id).collect()
    }

    pub fn reason(&self, id: ObjectId) -> Option<&str> {
        self.candidates
            .iter()
            .find(|c| c.object_id == id)
            .map(|c| c.reason.as_str())
    }

    pub fn candidates_of(&self, class_name: &str) -> usize {
        self.candidates
            .iter()
            .filter(|c| c.class_name == class_name)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Activity,
    Fragment,
    Bitmap,
    TallyOnly,
    Other,
}

/// Class ids of the watched base classes, resolved once per heap.
struct Markers {
    activity: Option<ObjectId>,
    fragment: Option<(ObjectId, String)>,
    bitmap: Option<ObjectId>,
    tally_only: Vec<ObjectId>,
}

impl Markers {
    fn resolve<G: HeapGraph + ?Sized>(graph: &G) -> Self {
        let id_of = |name: &str| graph.find_class_by_name(name).map(|c| c.id);
        let fragment = FRAGMENT_CLASS_NAMES
            .iter()
            .find_map(|name| graph.find_class_by_name(name))
            .map(|c| (c.id, c.name.clone()));
        let tally_only = [
            NATIVE_ALLOCATION_CLASS_NAME,
            NATIVE_ALLOCATION_CLEANER_THUNK_CLASS_NAME,
            WINDOW_CLASS_NAME,
        ]
        .into_iter()
        .filter_map(id_of)
        .collect();

        Markers {
            activity: id_of(ACTIVITY_CLASS_NAME),
            fragment,
            bitmap: id_of(BITMAP_CLASS_NAME),
            tally_only,
        }
    }

    /// `super1` sits just below `java.lang.Object`; `super4` three further down.
    fn family(&self, super1: Option<ObjectId>, super4: Option<ObjectId>) -> Family {
        if self.activity.is_some() && self.activity == super4 {
            Family::Activity
        } else if self.fragment.as_ref().map(|(id, _)| *id).is_some_and(|id| Some(id) == super1) {
            Family::Fragment
        } else if self.bitmap.is_some() && self.bitmap == super1 {
            Family::Bitmap
        } else if super1.is_some_and(|id| self.tally_only.contains(&id)) {
            Family::TallyOnly
        } else {
            Family::Other
        }
    }
}

struct Classifier<'g, G: HeapGraph + ?Sized> {
    graph: &'g G,
    config: &'g AnalysisConfig,
    markers: Markers,
    families: HashMap<ObjectId, Family>,
    tally_index: HashMap<ObjectId, usize>,
    per_class: HashMap<String, usize>,
    out: Classification,
}

impl<'g, G: HeapGraph + ?Sized> Classifier<'g, G> {
    fn family_of(&mut self, class_id: ObjectId) -> Family {
        if let Some(family) = self.families.get(&class_id) {
            return *family;
        }
        let hierarchy = self.graph.class_hierarchy(class_id);
        let marker = |from_end: usize| {
            hierarchy
                .len()
                .checked_sub(from_end)
                .and_then(|i| hierarchy.get(i))
                .map(|c| c.id)
        };
        let family = self.markers.family(marker(2), marker(5));
        self.families.insert(class_id, family);
        family
    }

    fn tally(&mut self, class_id: ObjectId, leaking: bool) {
        let slot = match self.tally_index.get(&class_id) {
            Some(slot) => *slot,
            None => {
                let class_name = self
                    .graph
                    .class(class_id)
                    .map(|c| c.name.clone())
                    .unwrap_or_default();
                self.out.class_tallies.push(ClassTally {
                    class_name,
                    instance_count: 0,
                    leak_count: 0,
                });
                let slot = self.out.class_tallies.len() - 1;
                self.tally_index.insert(class_id, slot);
                slot
            }
        };
        let tally = &mut self.out.class_tallies[slot];
        tally.instance_count += 1;
        if leaking {
            tally.leak_count += 1;
        }
    }

    /// Records a candidate unless its class already hit the cap.
    fn admit(&mut self, object_id: ObjectId, class_name: &str, reason: String) -> bool {
        let count = self.per_class.entry(class_name.to_string()).or_default();
        if *count >= SAME_CLASS_LEAK_CAP {
            return false;
        }
        *count += 1;
        tracing::debug!(
            class = class_name,
            object_id = mask_object_id(object_id),
            reason = %reason,
            "leak candidate"
        );
        self.out.candidates.push(LeakCandidate {
            object_id,
            class_name: class_name.to_string(),
            reason,
        });
        true
    }

    fn visit_instance(&mut self, instance: &HeapInstance) -> Result<(), HeapError> {
        let Some(class) = self.graph.class(instance.class_id) else {
            return Err(HeapError::UnknownObject(instance.class_id));
        };
        if is_primitive_wrapper(&class.name) {
            return Ok(());
        }
        let class_name = class.name.clone();

        match self.family_of(instance.class_id) {
            Family::Activity => {
                let destroyed =
                    self.graph
                        .bool_field(instance, ACTIVITY_CLASS_NAME, DESTROYED_FIELD_NAME)?;
                let finished =
                    self.graph
                        .bool_field(instance, ACTIVITY_CLASS_NAME, FINISHED_FIELD_NAME)?;
                let leaking = destroyed || finished;
                self.tally(instance.class_id, leaking);
                if leaking {
                    self.admit(instance.id, &class_name, ACTIVITY_LEAK_REASON.to_string());
                }
            }
            Family::Fragment => {
                let leaking = self.fragment_is_detached(instance);
                self.tally(instance.class_id, leaking);
                if leaking {
                    self.admit(instance.id, &class_name, FRAGMENT_LEAK_REASON.to_string());
                }
            }
            Family::Bitmap => {
                let width = self.graph.int_field(instance, BITMAP_CLASS_NAME, "mWidth")?;
                let height = self.graph.int_field(instance, BITMAP_CLASS_NAME, "mHeight")?;
                let area = u64::from(width.max(0).unsigned_abs())
                    * u64::from(height.max(0).unsigned_abs());
                let leaking = area >= self.config.big_bitmap_pixels;
                self.tally(instance.class_id, leaking);
                if leaking {
                    let reason = format!("Bitmap Size Over Threshold, {width}x{height}");
                    if self.admit(instance.id, &class_name, reason) {
                        self.out.big_objects.push(BigObject {
                            class_name,
                            size: area,
                            object_id: mask_object_id(instance.id),
                            ext_detail: Some(format!("{width} x {height}")),
                        });
                    }
                }
            }
            Family::TallyOnly => self.tally(instance.class_id, false),
            Family::Other => {}
        }
        Ok(())
    }

    /// A fragment whose manager was cleared after its lifecycle ran.
    fn fragment_is_detached(&self, instance: &HeapInstance) -> bool {
        let Some((_, base)) = self.markers.fragment.as_ref() else {
            return false;
        };
        let manager_cleared = matches!(
            self.graph
                .field(instance, base, FRAGMENT_MANAGER_FIELD_NAME),
            Ok(FieldValue::Object(None))
        );
        manager_cleared
            && self
                .graph
                .bool_field(instance, base, FRAGMENT_CALLED_FIELD_NAME)
                .unwrap_or(false)
    }

    fn visit_arrays(&mut self) {
        let graph = self.graph;
        for array in graph.primitive_arrays() {
            let size = array.byte_size();
            if size < self.config.big_primitive_array_bytes {
                continue;
            }
            let class_name = array.array_class_name();
            let reason = format!("Primitive Array Size Over Threshold, {size}");
            if self.admit(array.id, &class_name, reason) {
                self.out.big_objects.push(BigObject {
                    class_name,
                    size,
                    object_id: mask_object_id(array.id),
                    ext_detail: None,
                });
            }
        }
        for array in graph.object_arrays() {
            let size = array.byte_size();
            if size < self.config.big_object_array_bytes {
                continue;
            }
            let class_name = graph
                .class(array.array_class_id)
                .map(|c| c.name.clone())
                .unwrap_or_else(|| String::from("java.lang.Object[]"));
            let reason = format!("Object Array Size Over Threshold, {size}");
            if self.admit(array.id, &class_name, reason) {
                self.out.big_objects.push(BigObject {
                    class_name,
                    size,
                    object_id: mask_object_id(array.id),
                    ext_detail: None,
                });
            }
        }
    }
}

/// Walks the heap once and flags leak candidates.
///
/// Instances come first, then primitive arrays, then object arrays. A missing
/// field on an activity or bitmap aborts the run: the heap does not have the
/// shape the rules assume.
pub fn classify<G: HeapGraph + ?Sized>(
    graph: &G,
    config: &AnalysisConfig,
) -> Result<Classification, HeapError> {
    let mut classifier = Classifier {
        graph,
        config,
        markers: Markers::resolve(graph),
        families: HashMap::new(),
        tally_index: HashMap::new(),
        per_class: HashMap::new(),
        out: Classification::default(),
    };

    for instance in graph.instances() {
        classifier.visit_instance(instance)?;
    }
    classifier.visit_arrays();

    let out = classifier.out;
    tracing::info!(
        candidates = out.candidates.len(),
        tallied_classes = out.class_tallies.len(),
        big_objects = out.big_objects.len(),
        "classification finished"
    );
    Ok(out)
}
