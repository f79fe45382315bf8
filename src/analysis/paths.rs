//! Shortest reference paths from GC roots to leak candidates.
//!
//! Breadth-first from every root at once. Edges matched as library leaks are
//! pushed to a second queue that only drains once the first is empty, so a
//! candidate gets a library-leak path only when no plain path of any length
//! exists.

use std::collections::{HashMap, HashSet, VecDeque};

use sha2::{Digest, Sha256};

use super::classifier::LeakCandidate;
use super::matchers::ReferenceMatcher;
use crate::heap::{GcRootKind, HeapError, HeapGraph, ObjectId, Reference, ReferenceKind};

/// One hop of a leak trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceReference {
    pub origin_class: String,
    pub name: String,
    pub kind: ReferenceKind,
    pub declaring_class: Option<String>,
}

impl TraceReference {
    /// `Class.field`, or the bare array class for array entries.
    pub fn display(&self) -> String {
        match self.kind {
            ReferenceKind::ArrayEntry => self.origin_class.clone(),
            _ => format!("{}.{}", self.origin_class, self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeakingObject {
    pub object_id: ObjectId,
    pub class_name: String,
    pub type_name: &'static str,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeakTrace {
    pub gc_root: GcRootKind,
    pub path: Vec<TraceReference>,
    pub leaking: LeakingObject,
}

impl LeakTrace {
    /// Hash of the root kind and the `(class, reference kind)` chain, leaking class included.
    pub fn signature(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("{:?}", self.gc_root).as_bytes());
        for hop in &self.path {
            hasher.update(b"\n");
            hasher.update(hop.origin_class.as_bytes());
            hasher.update(b"#");
            hasher.update(hop.kind.to_string().as_bytes());
        }
        hasher.update(b"\n");
        hasher.update(self.leaking.class_name.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Candidates whose traces share one signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeakGroup {
    pub signature: String,
    pub trace: LeakTrace,
    pub object_ids: Vec<ObjectId>,
    /// Set for library leaks: the matcher that explains the path.
    pub library_description: Option<String>,
}

impl LeakGroup {
    pub fn instance_count(&self) -> usize {
        self.object_ids.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathFindings {
    pub application_leaks: Vec<LeakGroup>,
    /// At most one group.
    pub library_leaks: Vec<LeakGroup>,
    pub unreachable: Vec<ObjectId>,
}

#[derive(Debug, Clone)]
struct Visit {
    parent: Option<Reference>,
    root: GcRootKind,
    /// Index of the library matcher on this path, if any.
    library: Option<usize>,
    done: bool,
}

/// Computes one shortest path per reachable candidate and groups them.
pub fn find_paths<G: HeapGraph + ?Sized>(
    graph: &G,
    candidates: &[LeakCandidate],
    matchers: &[ReferenceMatcher],
) -> Result<PathFindings, HeapError> {
    let wanted: HashSet<ObjectId> = candidates.iter().map(|c| c.object_id).collect();
    let Search { order, visits } = search(graph, &wanted, matchers);

    let mut findings = PathFindings::default();
    let mut app_index: HashMap<String, usize> = HashMap::new();
    let mut lib_index: HashMap<String, usize> = HashMap::new();
    let mut reached = HashSet::new();

    for object_id in order {
        let candidate = candidates
            .iter()
            .find(|c| c.object_id == object_id)
            .ok_or(HeapError::UnknownObject(object_id))?;
        let trace = build_trace(graph, object_id, &visits, candidate)?;
        let signature = trace.signature();
        reached.insert(object_id);

        let library = visits
            .get(&object_id)
            .and_then(|v| v.library)
            .and_then(|i| matchers.get(i))
            .and_then(|m| m.description().map(str::to_string));
        let (groups, index) = if library.is_some() {
            (&mut findings.library_leaks, &mut lib_index)
        } else {
            (&mut findings.application_leaks, &mut app_index)
        };
        match index.get(&signature) {
            Some(&slot) => groups[slot].object_ids.push(object_id),
            None => {
                index.insert(signature.clone(), groups.len());
                groups.push(LeakGroup {
                    signature,
                    trace,
                    object_ids: vec![object_id],
                    library_description: library,
                });
            }
        }
    }

    findings.unreachable = candidates
        .iter()
        .map(|c| c.object_id)
        .filter(|id| !reached.contains(id))
        .collect();
    for id in &findings.unreachable {
        tracing::debug!(object_id = id, "candidate not reachable from any gc root");
    }

    let library_groups = findings.library_leaks.len();
    findings.library_leaks.truncate(1);
    tracing::info!(
        application_leaks = findings.application_leaks.len(),
        library_leaks = library_groups,
        unreachable = findings.unreachable.len(),
        "gc paths computed"
    );
    Ok(findings)
}

/// Candidates in discovery order plus the final visit table.
///
/// Parent links of dequeued nodes never change, so the final table still holds
/// the shortest path of every candidate.
struct Search {
    order: Vec<ObjectId>,
    visits: HashMap<ObjectId, Visit>,
}

fn search<G: HeapGraph + ?Sized>(
    graph: &G,
    wanted: &HashSet<ObjectId>,
    matchers: &[ReferenceMatcher],
) -> Search {
    let mut visits: HashMap<ObjectId, Visit> = HashMap::new();
    let mut plain: VecDeque<ObjectId> = VecDeque::new();
    let mut deferred: VecDeque<ObjectId> = VecDeque::new();
    let mut order = Vec::new();

    for root in graph.gc_roots() {
        if visits.contains_key(&root.id) || graph.find_object_by_id(root.id).is_none() {
            continue;
        }
        visits.insert(
            root.id,
            Visit {
                parent: None,
                root: root.kind,
                library: None,
                done: false,
            },
        );
        plain.push_back(root.id);
    }

    while order.len() < wanted.len() {
        let Some(current) = plain.pop_front().or_else(|| deferred.pop_front()) else {
            break;
        };
        let Some(visit) = visits.get_mut(&current) else {
            continue;
        };
        if visit.done {
            continue;
        }
        visit.done = true;
        let (root, library) = (visit.root, visit.library);

        if wanted.contains(&current) {
            order.push(current);
        }

        for reference in graph.references_from(current) {
            let edge_library = match ReferenceMatcher::find(matchers, graph, &reference) {
                Some((_, matcher)) if matcher.is_ignored() => continue,
                Some((index, _)) => Some(index),
                None => None,
            };
            let path_library = library.or(edge_library);

            match visits.get_mut(&reference.to) {
                None => {
                    let target = reference.to;
                    visits.insert(
                        target,
                        Visit {
                            parent: Some(reference),
                            root,
                            library: path_library,
                            done: false,
                        },
                    );
                    if path_library.is_some() {
                        deferred.push_back(target);
                    } else {
                        plain.push_back(target);
                    }
                }
                // A plain edge beats a library one to a node still waiting in the queue.
                Some(existing)
                    if !existing.done && existing.library.is_some() && path_library.is_none() =>
                {
                    let target = reference.to;
                    existing.parent = Some(reference);
                    existing.root = root;
                    existing.library = None;
                    plain.push_back(target);
                }
                Some(_) => {}
            }
        }
    }

    Search { order, visits }
}

fn build_trace<G: HeapGraph + ?Sized>(
    graph: &G,
    object_id: ObjectId,
    visits: &HashMap<ObjectId, Visit>,
    candidate: &LeakCandidate,
) -> Result<LeakTrace, HeapError> {
    let mut hops = Vec::new();
    let mut cursor = object_id;
    let mut root = GcRootKind::Unknown;
    while let Some(visit) = visits.get(&cursor) {
        root = visit.root;
        let Some(parent) = &visit.parent else {
            break;
        };
        hops.push(parent.clone());
        cursor = parent.from;
        if hops.len() > visits.len() {
            break;
        }
    }
    hops.reverse();

    let path = hops
        .into_iter()
        .map(|reference| {
            let origin_class = graph
                .class_name_of(reference.from)
                .ok_or(HeapError::UnknownObject(reference.from))?;
            let declaring_class = reference
                .declaring_class
                .and_then(|id| graph.class(id))
                .map(|c| c.name.clone());
            Ok(TraceReference {
                origin_class,
                name: reference.name,
                kind: reference.kind,
                declaring_class,
            })
        })
        .collect::<Result<Vec<_>, HeapError>>()?;

    let object = graph
        .find_object_by_id(object_id)
        .ok_or(HeapError::UnknownObject(object_id))?;
    let class_name = graph
        .class_name_of(object_id)
        .ok_or(HeapError::UnknownObject(object_id))?;

    Ok(LeakTrace {
        gc_root: root,
        path,
        leaking: LeakingObject {
            object_id,
            class_name,
            type_name: object.type_name(),
            reason: candidate.reason.clone(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::{Field, FieldValue, HeapGraphBuilder, MemoryHeapGraph, OBJECT_CLASS_NAME};

    fn candidate(object_id: ObjectId, class_name: &str) -> LeakCandidate {
        LeakCandidate {
            object_id,
            class_name: class_name.to_string(),
            reason: "Activity Leak".to_string(),
        }
    }

    fn object_field(declaring: ObjectId, name: &str, to: ObjectId) -> Field {
        Field::new(declaring, name, FieldValue::Object(Some(to)))
    }

    struct Fixture {
        b: HeapGraphBuilder,
        object: ObjectId,
        leaky: ObjectId,
    }

    fn fixture() -> Fixture {
        let mut b = HeapGraphBuilder::new();
        let object = b.class(OBJECT_CLASS_NAME, None);
        let leaky = b.class("com.example.LeakyActivity", Some(object));
        Fixture { b, object, leaky }
    }

    fn run(graph: &MemoryHeapGraph, candidates: &[LeakCandidate]) -> PathFindings {
        find_paths(graph, candidates, &ReferenceMatcher::app_defaults()).unwrap()
    }

    #[test]
    fn identical_chains_collapse_into_one_group() {
        let mut f = fixture();
        let first = f.b.instance(f.leaky, Vec::new());
        let second = f.b.instance(f.leaky, Vec::new());
        let array_class = f.b.class("java.lang.Object[]", Some(f.object));
        let elements = f.b.object_array(array_class, vec![Some(first), None, Some(second)]);
        let list_class = f.b.class("java.util.ArrayList", Some(f.object));
        let list = f.b.instance(list_class, vec![object_field(list_class, "elementData", elements)]);
        let registry = f.b.class_with_statics(
            "com.example.Registry",
            Some(f.object),
            vec![("sActivities", FieldValue::Object(Some(list)))],
        );
        f.b.root(registry, GcRootKind::StickyClass);
        let graph = f.b.build();

        let findings = run(
            &graph,
            &[
                candidate(first, "com.example.LeakyActivity"),
                candidate(second, "com.example.LeakyActivity"),
            ],
        );

        assert_eq!(findings.application_leaks.len(), 1);
        let group = &findings.application_leaks[0];
        assert_eq!(group.instance_count(), 2);
        assert_eq!(group.object_ids, vec![first, second]);
        assert_eq!(group.trace.gc_root, GcRootKind::StickyClass);
        let hops: Vec<String> = group.trace.path.iter().map(TraceReference::display).collect();
        assert_eq!(
            hops,
            vec![
                "com.example.Registry.sActivities",
                "java.util.ArrayList.elementData",
                "java.lang.Object[]",
            ]
        );
        assert_eq!(group.trace.leaking.type_name, "INSTANCE");
        assert_eq!(group.signature.len(), 64);
    }

    #[test]
    fn shortest_path_wins() {
        let mut f = fixture();
        let leak = f.b.instance(f.leaky, Vec::new());
        let holder = f.b.class("com.example.Holder", Some(f.object));
        let near = f.b.instance(holder, vec![object_field(holder, "target", leak)]);
        let middle = f.b.instance(holder, vec![object_field(holder, "next", near)]);
        let far = f.b.instance(holder, vec![object_field(holder, "next", middle)]);
        f.b.root(far, GcRootKind::JavaFrame);
        f.b.root(near, GcRootKind::JniGlobal);
        let graph = f.b.build();

        let findings = run(&graph, &[candidate(leak, "com.example.LeakyActivity")]);

        let trace = &findings.application_leaks[0].trace;
        assert_eq!(trace.gc_root, GcRootKind::JniGlobal);
        assert_eq!(trace.path.len(), 1);
        assert_eq!(trace.path[0].declaring_class.as_deref(), Some("com.example.Holder"));
    }

    #[test]
    fn framework_references_are_library_leaks_and_capped_at_one() {
        let mut f = fixture();
        let imm = f.b.class("android.view.inputmethod.InputMethodManager", Some(f.object));
        let user_manager = f.b.class("android.os.UserManager", Some(f.object));
        let by_imm = f.b.instance(f.leaky, Vec::new());
        let by_user = f.b.instance(f.leaky, Vec::new());
        let imm_instance = f.b.instance(imm, vec![object_field(imm, "mServedView", by_imm)]);
        let um_instance = f.b.instance(
            user_manager,
            vec![object_field(user_manager, "mContext", by_user)],
        );
        f.b.root(imm_instance, GcRootKind::JniGlobal);
        f.b.root(um_instance, GcRootKind::JniGlobal);
        let graph = f.b.build();

        let findings = run(
            &graph,
            &[
                candidate(by_imm, "com.example.LeakyActivity"),
                candidate(by_user, "com.example.LeakyActivity"),
            ],
        );

        assert!(findings.application_leaks.is_empty());
        assert_eq!(findings.library_leaks.len(), 1);
        assert!(findings.library_leaks[0].library_description.is_some());
    }

    #[test]
    fn plain_path_is_preferred_over_library_path() {
        let mut f = fixture();
        let imm = f.b.class("android.view.inputmethod.InputMethodManager", Some(f.object));
        let holder = f.b.class("com.example.Holder", Some(f.object));
        let leak = f.b.instance(f.leaky, Vec::new());
        let imm_instance = f.b.instance(imm, vec![object_field(imm, "mServedView", leak)]);
        let inner = f.b.instance(holder, vec![object_field(holder, "activity", leak)]);
        let outer = f.b.instance(holder, vec![object_field(holder, "inner", inner)]);
        f.b.root(imm_instance, GcRootKind::JniGlobal);
        f.b.root(outer, GcRootKind::JniGlobal);
        let graph = f.b.build();

        let findings = run(&graph, &[candidate(leak, "com.example.LeakyActivity")]);

        assert!(findings.library_leaks.is_empty());
        assert_eq!(findings.application_leaks[0].trace.path.len(), 2);
    }

    #[test]
    fn ignored_edges_are_not_followed() {
        let mut f = fixture();
        let reference = f.b.class("java.lang.ref.Reference", Some(f.object));
        let weak = f.b.class("java.lang.ref.WeakReference", Some(reference));
        let leak = f.b.instance(f.leaky, Vec::new());
        let holder = f.b.instance(weak, vec![object_field(reference, "referent", leak)]);
        f.b.root(holder, GcRootKind::JniGlobal);
        let graph = f.b.build();

        let findings = run(&graph, &[candidate(leak, "com.example.LeakyActivity")]);

        assert!(findings.application_leaks.is_empty());
        assert_eq!(findings.unreachable, vec![leak]);
    }

    #[test]
    fn cycles_terminate() {
        let mut f = fixture();
        let node = f.b.class("com.example.Node", Some(f.object));
        let a = f.b.instance(node, Vec::new());
        let c = f.b.instance(node, vec![object_field(node, "next", a)]);
        f.b.set_fields(a, vec![object_field(node, "next", c)]).unwrap();
        let leak = f.b.instance(f.leaky, Vec::new());
        f.b.root(a, GcRootKind::ThreadObject);
        let graph = f.b.build();

        let findings = run(&graph, &[candidate(leak, "com.example.LeakyActivity")]);
        assert_eq!(findings.unreachable, vec![leak]);
    }

    #[test]
    fn rooted_candidate_has_empty_path() {
        let mut f = fixture();
        let leak = f.b.instance(f.leaky, Vec::new());
        f.b.root(leak, GcRootKind::JniLocal);
        let graph = f.b.build();

        let findings = run(&graph, &[candidate(leak, "com.example.LeakyActivity")]);
        let trace = &findings.application_leaks[0].trace;
        assert!(trace.path.is_empty());
        assert_eq!(trace.leaking.class_name, "com.example.LeakyActivity");
    }
}
