//! Known reference patterns that the path finder treats specially.

use crate::heap::{HeapGraph, Reference, ReferenceKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferencePattern {
    InstanceField { class_name: String, field_name: String },
    StaticField { class_name: String, field_name: String },
}

impl ReferencePattern {
    pub fn instance_field(class_name: &str, field_name: &str) -> Self {
        ReferencePattern::InstanceField {
            class_name: class_name.to_string(),
            field_name: field_name.to_string(),
        }
    }

    pub fn static_field(class_name: &str, field_name: &str) -> Self {
        ReferencePattern::StaticField {
            class_name: class_name.to_string(),
            field_name: field_name.to_string(),
        }
    }

    fn matches<G: HeapGraph + ?Sized>(&self, graph: &G, reference: &Reference) -> bool {
        let (kind, class_name, field_name) = match self {
            ReferencePattern::InstanceField {
                class_name,
                field_name,
            } => (ReferenceKind::InstanceField, class_name, field_name),
            ReferencePattern::StaticField {
                class_name,
                field_name,
            } => (ReferenceKind::StaticField, class_name, field_name),
        };
        reference.kind == kind
            && reference.name == *field_name
            && reference
                .declaring_class
                .and_then(|id| graph.class(id))
                .is_some_and(|class| class.name == *class_name)
    }
}

impl std::fmt::Display for ReferencePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReferencePattern::InstanceField {
                class_name,
                field_name,
            } => write!(f, "instance field {class_name}#{field_name}"),
            ReferencePattern::StaticField {
                class_name,
                field_name,
            } => write!(f, "static field {class_name}#{field_name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatcherKind {
    /// Paths through the edge are reported, but as library leaks.
    LibraryLeak { description: String },
    /// The edge is never followed.
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceMatcher {
    pub pattern: ReferencePattern,
    pub kind: MatcherKind,
}

impl ReferenceMatcher {
    pub fn library_leak(pattern: ReferencePattern, description: &str) -> Self {
        ReferenceMatcher {
            pattern,
            kind: MatcherKind::LibraryLeak {
                description: description.to_string(),
            },
        }
    }

    pub fn ignored(pattern: ReferencePattern) -> Self {
        ReferenceMatcher {
            pattern,
            kind: MatcherKind::Ignored,
        }
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self.kind, MatcherKind::Ignored)
    }

    pub fn description(&self) -> Option<&str> {
        match &self.kind {
            MatcherKind::LibraryLeak { description } => Some(description),
            MatcherKind::Ignored => None,
        }
    }

    /// First matcher that applies to `reference`, with its catalogue index.
    pub fn find<'m, G: HeapGraph + ?Sized>(
        matchers: &'m [ReferenceMatcher],
        graph: &G,
        reference: &Reference,
    ) -> Option<(usize, &'m ReferenceMatcher)> {
        matchers
            .iter()
            .enumerate()
            .find(|(_, matcher)| matcher.pattern.matches(graph, reference))
    }

    /// Catalogue of framework references known to retain app objects.
    pub fn app_defaults() -> Vec<ReferenceMatcher> {
        vec![
            ReferenceMatcher::library_leak(
                ReferencePattern::instance_field(
                    "android.view.inputmethod.InputMethodManager",
                    "mNextServedView",
                ),
                "InputMethodManager keeps a reference to the last focused view until another view gains focus.",
            ),
            ReferenceMatcher::library_leak(
                ReferencePattern::instance_field(
                    "android.view.inputmethod.InputMethodManager",
                    "mServedView",
                ),
                "InputMethodManager keeps a reference to the served view after the window is gone.",
            ),
            ReferenceMatcher::library_leak(
                ReferencePattern::static_field("android.text.TextLine", "sCached"),
                "TextLine caches recently used instances, each holding its last spanned text.",
            ),
            ReferenceMatcher::library_leak(
                ReferencePattern::static_field("android.net.ConnectivityManager", "sInstance"),
                "ConnectivityManager keeps the first Context it was created with in a static singleton.",
            ),
            ReferenceMatcher::library_leak(
                ReferencePattern::instance_field("android.media.AudioManager", "mContext_static"),
                "AudioManager keeps the first Context it was created with.",
            ),
            ReferenceMatcher::library_leak(
                ReferencePattern::instance_field(
                    "android.app.ActivityThread$ActivityClientRecord",
                    "nextIdle",
                ),
                "ActivityClientRecord.nextIdle keeps destroyed activities reachable until the main thread is idle.",
            ),
            ReferenceMatcher::library_leak(
                ReferencePattern::instance_field("android.os.UserManager", "mContext"),
                "UserManager keeps the first Context it was created with.",
            ),
            ReferenceMatcher::ignored(ReferencePattern::instance_field(
                "java.lang.ref.Reference",
                "referent",
            )),
        ]
    }
}
