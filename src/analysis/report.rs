//! The JSON report: run metadata plus everything the analysis found.

use serde::{Deserialize, Serialize};

use super::classifier::Classification;
use super::paths::{LeakGroup, PathFindings};
use crate::heap::mask_object_id;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningInfo {
    pub jvm_max_mb: u64,
    pub jvm_used_mb: u64,
    pub vss_mb: u64,
    pub rss_mb: u64,
    pub thread_count: u32,
    pub fd_count: u32,
    pub thread_list: Vec<String>,
    pub fd_list: Vec<String>,
    pub os: String,
    pub os_version: String,
    pub arch: String,
    pub app_version: String,
    pub current_page: String,
    pub usage_seconds: u64,
    /// Unix seconds.
    pub now_time: u64,
    pub device_mem_total_mb: u64,
    pub device_mem_available_mb: u64,
    pub dump_reason: String,
    pub monitor_version: String,
    /// Seconds spent classifying.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_instance_time: Option<f64>,
    /// Seconds spent finding GC paths.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub find_gc_path_time: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassInfo {
    pub class_name: String,
    pub instance_count: u64,
    pub leak_instance_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeakObject {
    pub class_name: String,
    pub size: u64,
    pub object_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext_detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathItem {
    pub reference: String,
    pub reference_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub declared_class: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcPath {
    pub instance_count: usize,
    pub leak_reason: String,
    pub gc_root: String,
    pub signature: String,
    pub path: Vec<PathItem>,
}

impl GcPath {
    fn from_group(group: &LeakGroup) -> Self {
        let trace = &group.trace;
        let mut path: Vec<PathItem> = trace
            .path
            .iter()
            .map(|hop| PathItem {
                reference: hop.display(),
                reference_type: hop.kind.to_string(),
                declared_class: hop.declaring_class.clone(),
            })
            .collect();
        path.push(PathItem {
            reference: trace.leaking.class_name.clone(),
            reference_type: trace.leaking.type_name.to_string(),
            declared_class: None,
        });

        GcPath {
            instance_count: group.instance_count(),
            leak_reason: trace.leaking.reason.clone(),
            gc_root: trace.gc_root.description().to_string(),
            signature: group.signature.clone(),
            path,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeapReport {
    pub running_info: RunningInfo,
    pub gc_paths: Vec<GcPath>,
    pub class_infos: Vec<ClassInfo>,
    pub leak_objects: Vec<LeakObject>,
    pub analysis_done: bool,
    pub re_analysis_times: u32,
}

impl HeapReport {
    /// Application leaks come before the library leak.
    pub fn assemble(
        running_info: RunningInfo,
        classification: &Classification,
        findings: &PathFindings,
    ) -> Self {
        let gc_paths = findings
            .application_leaks
            .iter()
            .chain(findings.library_leaks.iter())
            .map(GcPath::from_group)
            .collect();
        let class_infos = classification
            .class_tallies
            .iter()
            .map(|tally| ClassInfo {
                class_name: tally.class_name.clone(),
                instance_count: tally.instance_count,
                leak_instance_count: tally.leak_count,
            })
            .collect();
        let leak_objects = classification
            .big_objects
            .iter()
            .map(|big| LeakObject {
                class_name: big.class_name.clone(),
                size: big.size,
                object_id: mask_object_id(big.object_id),
                ext_detail: big.ext_detail.clone(),
            })
            .collect();

        HeapReport {
            running_info,
            gc_paths,
            class_infos,
            leak_objects,
            analysis_done: true,
            re_analysis_times: 0,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::classifier::{BigObject, ClassTally};
    use crate::analysis::paths::{LeakTrace, LeakingObject, TraceReference};
    use crate::heap::{GcRootKind, ReferenceKind};

    fn group(signature: &str, reason: &str) -> LeakGroup {
        LeakGroup {
            signature: signature.to_string(),
            trace: LeakTrace {
                gc_root: GcRootKind::StickyClass,
                path: vec![
                    TraceReference {
                        origin_class: "com.example.Registry".into(),
                        name: "sItems".into(),
                        kind: ReferenceKind::StaticField,
                        declaring_class: Some("com.example.Registry".into()),
                    },
                    TraceReference {
                        origin_class: "java.lang.Object[]".into(),
                        name: "[3]".into(),
                        kind: ReferenceKind::ArrayEntry,
                        declaring_class: None,
                    },
                ],
                leaking: LeakingObject {
                    object_id: 0x7_0000_1234,
                    class_name: "com.example.MainActivity".into(),
                    type_name: "INSTANCE",
                    reason: reason.into(),
                },
            },
            object_ids: vec![1, 2, 3],
            library_description: None,
        }
    }

    #[test]
    fn assemble_shapes_paths_and_tallies() {
        let classification = Classification {
            candidates: Vec::new(),
            class_tallies: vec![ClassTally {
                class_name: "com.example.MainActivity".into(),
                instance_count: 4,
                leak_count: 3,
            }],
            big_objects: vec![BigObject {
                class_name: "android.graphics.Bitmap".into(),
                size: 1_050_000,
                object_id: 0x7_0000_0042,
                ext_detail: Some("1000 x 1050".into()),
            }],
        };
        let findings = PathFindings {
            application_leaks: vec![group("app", "Activity Leak")],
            library_leaks: vec![group("lib", "Activity Leak")],
            unreachable: Vec::new(),
        };

        let report = HeapReport::assemble(RunningInfo::default(), &classification, &findings);

        assert!(report.analysis_done);
        assert_eq!(report.gc_paths.len(), 2);
        assert_eq!(report.gc_paths[0].signature, "app");
        assert_eq!(report.gc_paths[1].signature, "lib");
        let path: Vec<&str> = report.gc_paths[0]
            .path
            .iter()
            .map(|item| item.reference.as_str())
            .collect();
        assert_eq!(
            path,
            vec![
                "com.example.Registry.sItems",
                "java.lang.Object[]",
                "com.example.MainActivity",
            ]
        );
        assert_eq!(report.gc_paths[0].path[2].reference_type, "INSTANCE");
        assert_eq!(report.gc_paths[0].gc_root, "System class");
        assert_eq!(report.gc_paths[0].instance_count, 3);
        assert_eq!(report.leak_objects[0].object_id, 0x42);
        assert_eq!(report.class_infos[0].leak_instance_count, 3);
    }

    #[test]
    fn optional_timings_are_omitted_until_measured() {
        let json = serde_json::to_value(RunningInfo::default()).unwrap();
        assert!(json.get("filterInstanceTime").is_none());
        assert!(json.get("jvmMaxMb").is_some());

        let measured = RunningInfo {
            find_gc_path_time: Some(1.5),
            ..RunningInfo::default()
        };
        let json = serde_json::to_value(measured).unwrap();
        assert_eq!(json["findGcPathTime"], 1.5);
    }
}
