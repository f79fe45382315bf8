use std::sync::Arc;

use insta::assert_snapshot;
use oomwatch::analysis::report::{ClassInfo, LeakObject};
use oomwatch::analysis::{
    AnalysisService, ReferenceMatcher, RunningInfo, classify, find_paths, write_report,
};
use oomwatch::config::AnalysisConfig;
use oomwatch::heap::{HeapDocument, JsonHeapIndexer};

const HEAP: &str = r#"{
    "classes": [
        {"id": 1, "name": "java.lang.Object"},
        {"id": 2, "name": "android.content.Context", "superclass": 1},
        {"id": 3, "name": "android.content.ContextWrapper", "superclass": 2},
        {"id": 4, "name": "android.view.ContextThemeWrapper", "superclass": 3},
        {"id": 5, "name": "android.app.Activity", "superclass": 4},
        {"id": 6, "name": "com.example.MainActivity", "superclass": 5},
        {"id": 7, "name": "com.example.SettingsActivity", "superclass": 5},
        {"id": 8, "name": "com.example.App", "superclass": 1,
         "static_fields": [{"name": "sLast", "value": {"object": 100}}]},
        {"id": 9, "name": "android.view.inputmethod.InputMethodManager", "superclass": 1,
         "static_fields": [{"name": "sInstance", "value": {"object": 300}}]}
    ],
    "instances": [
        {"id": 100, "class": 6, "fields": [
            {"declaring_class": 5, "name": "mDestroyed", "value": {"boolean": true}},
            {"declaring_class": 5, "name": "mFinished", "value": {"boolean": false}}
        ]},
        {"id": 101, "class": 6, "fields": [
            {"declaring_class": 5, "name": "mDestroyed", "value": {"boolean": true}},
            {"declaring_class": 5, "name": "mFinished", "value": {"boolean": true}}
        ]},
        {"id": 102, "class": 7, "fields": [
            {"declaring_class": 5, "name": "mDestroyed", "value": {"boolean": false}},
            {"declaring_class": 5, "name": "mFinished", "value": {"boolean": false}}
        ]},
        {"id": 300, "class": 9, "fields": [
            {"declaring_class": 9, "name": "mServedView", "value": {"object": 101}}
        ]}
    ],
    "primitive_arrays": [
        {"id": 400, "element_type": "byte", "length": 300000}
    ],
    "gc_roots": [
        {"id": 8, "kind": "sticky_class"},
        {"id": 9, "kind": "sticky_class"},
        {"id": 400, "kind": "java_frame"}
    ]
}"#;

#[test]
fn classification_finds_destroyed_activities_and_big_arrays() {
    let graph = HeapDocument::from_json(HEAP, "inline")
        .unwrap()
        .into_graph()
        .unwrap();
    let classification = classify(&graph, &AnalysisConfig::default()).unwrap();

    let ids: Vec<u64> = classification.candidates.iter().map(|c| c.object_id).collect();
    assert_eq!(ids, vec![100, 101, 400]);
    assert!(classification.reason(102).is_none());

    let findings = find_paths(
        &graph,
        &classification.candidates,
        &ReferenceMatcher::app_defaults(),
    )
    .unwrap();
    assert_eq!(findings.application_leaks.len(), 2);
    assert_eq!(findings.library_leaks.len(), 1);
    assert_eq!(findings.library_leaks[0].object_ids, vec![101]);
    assert!(findings.unreachable.is_empty());
}

#[test]
fn report_lists_app_leaks_before_library_leak() {
    let dir = tempfile::tempdir().unwrap();
    let heap = dir.path().join("1.0_1.hprof");
    std::fs::write(&heap, HEAP).unwrap();

    let service = AnalysisService::new(Arc::new(JsonHeapIndexer), AnalysisConfig::default());
    let running_info = RunningInfo {
        dump_reason: "reason_thread_oom".to_string(),
        ..RunningInfo::default()
    };
    let report = service.run(&heap, running_info).unwrap();

    assert!(report.analysis_done);
    assert_eq!(report.running_info.dump_reason, "reason_thread_oom");
    assert!(report.running_info.filter_instance_time.is_some());
    assert!(report.running_info.find_gc_path_time.is_some());
    assert_eq!(
        report.class_infos,
        vec![
            ClassInfo {
                class_name: "com.example.MainActivity".into(),
                instance_count: 2,
                leak_instance_count: 2,
            },
            ClassInfo {
                class_name: "com.example.SettingsActivity".into(),
                instance_count: 1,
                leak_instance_count: 0,
            },
        ]
    );
    assert_eq!(
        report.leak_objects,
        vec![LeakObject {
            class_name: "byte[]".into(),
            size: 300_000,
            object_id: 400,
            ext_detail: None,
        }]
    );

    assert_snapshot!(serde_json::to_string_pretty(&report.gc_paths).unwrap(), @r#"
    [
      {
        "instanceCount": 1,
        "leakReason": "Primitive Array Size Over Threshold, 300000",
        "gcRoot": "Java local variable",
        "signature": "7ab0be2a363fb9117ed685d7b2ba4ef2bd387c6b1ab34c6135764572fed1e217",
        "path": [
          {
            "reference": "byte[]",
            "referenceType": "PRIMITIVE_ARRAY"
          }
        ]
      },
      {
        "instanceCount": 1,
        "leakReason": "Activity Leak",
        "gcRoot": "System class",
        "signature": "4cd69f8c4f90405cb4d67699d6fee996ce429f79837118e46d9c1ce7a1598577",
        "path": [
          {
            "reference": "com.example.App.sLast",
            "referenceType": "STATIC_FIELD",
            "declaredClass": "com.example.App"
          },
          {
            "reference": "com.example.MainActivity",
            "referenceType": "INSTANCE"
          }
        ]
      },
      {
        "instanceCount": 1,
        "leakReason": "Activity Leak",
        "gcRoot": "System class",
        "signature": "d9f11a5052a531f1ccb6b0e3b94e23b691cfc6db40e5073bb250bcb48536bef2",
        "path": [
          {
            "reference": "android.view.inputmethod.InputMethodManager.sInstance",
            "referenceType": "STATIC_FIELD",
            "declaredClass": "android.view.inputmethod.InputMethodManager"
          },
          {
            "reference": "android.view.inputmethod.InputMethodManager.mServedView",
            "referenceType": "INSTANCE_FIELD",
            "declaredClass": "android.view.inputmethod.InputMethodManager"
          },
          {
            "reference": "com.example.MainActivity",
            "referenceType": "INSTANCE"
          }
        ]
      }
    ]
    "#);

    let out = dir.path().join("1.0_1.json");
    write_report(&report, &out).unwrap();
    let reread: oomwatch::analysis::HeapReport =
        serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
    assert_eq!(reread.gc_paths, report.gc_paths);
}

#[test]
fn without_matchers_every_leak_is_an_application_leak() {
    let graph = HeapDocument::from_json(HEAP, "inline")
        .unwrap()
        .into_graph()
        .unwrap();
    let classification = classify(&graph, &AnalysisConfig::default()).unwrap();
    let findings = find_paths(&graph, &classification.candidates, &[]).unwrap();
    assert_eq!(findings.application_leaks.len(), 3);
    assert!(findings.library_leaks.is_empty());
}

#[test]
fn malformed_heap_fails_indexing() {
    let dir = tempfile::tempdir().unwrap();
    let heap = dir.path().join("broken.hprof");
    std::fs::write(&heap, "{\"classes\": 3}").unwrap();

    let service = AnalysisService::new(Arc::new(JsonHeapIndexer), AnalysisConfig::default());
    let err = service.run(&heap, RunningInfo::default()).unwrap_err();
    assert!(matches!(err, oomwatch::analysis::AnalysisError::Index(_)));

    let empty = dir.path().join("empty.hprof");
    std::fs::write(&empty, "").unwrap();
    let err = service.run(&empty, RunningInfo::default()).unwrap_err();
    assert!(matches!(err, oomwatch::analysis::AnalysisError::EmptyDump(_)));
}

#[test]
fn oversized_array_length_is_reported_without_overflow() {
    let doc = r#"{
        "classes": [{"id": 1, "name": "java.lang.Object"}],
        "primitive_arrays": [
            {"id": 7, "element_type": "long", "length": 4611686018427387904}
        ],
        "gc_roots": [{"id": 7, "kind": "java_frame"}]
    }"#;
    let graph = HeapDocument::from_json(doc, "inline")
        .unwrap()
        .into_graph()
        .unwrap();
    let classification = classify(&graph, &AnalysisConfig::default()).unwrap();

    assert_eq!(classification.candidates.len(), 1);
    assert_eq!(classification.big_objects[0].class_name, "long[]");
    assert_eq!(classification.big_objects[0].size, u64::MAX);
}
