//! Scheduling affinity for component pods

use std::collections::BTreeMap;

use convoy_common::crd::PodAffinityType;
use k8s_openapi::api::core::v1::{
    Affinity, NodeAffinity, NodeSelector, NodeSelectorRequirement, NodeSelectorTerm, PodAffinity,
    PodAffinityTerm, PodAntiAffinity, WeightedPodAffinityTerm,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

/// Topology key the pod (anti-)affinity preference spreads over
pub const HOST_TOPOLOGY_KEY: &str = "kubernetes.io/hostname";

/// Build the affinity for a component
///
/// Each node selector label becomes its own required term (`key In [value]`).
/// `prefer-gather` and `prefer-fanout` add a single weighted preference over
/// the component's own pods. Returns `None` when neither applies.
pub fn plan(
    node_selector_labels: &BTreeMap<String, String>,
    pod_affinity_type: PodAffinityType,
    component_labels: &BTreeMap<String, String>,
) -> Option<Affinity> {
    let node_affinity = if node_selector_labels.is_empty() {
        None
    } else {
        let terms = node_selector_labels
            .iter()
            .map(|(key, value)| NodeSelectorTerm {
                match_expressions: Some(vec![NodeSelectorRequirement {
                    key: key.clone(),
                    operator: "In".to_string(),
                    values: Some(vec![value.clone()]),
                }]),
                ..Default::default()
            })
            .collect();
        Some(NodeAffinity {
            required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                node_selector_terms: terms,
            }),
            ..Default::default()
        })
    };

    let preferred = || {
        Some(vec![WeightedPodAffinityTerm {
            weight: 1,
            pod_affinity_term: PodAffinityTerm {
                label_selector: Some(LabelSelector {
                    match_labels: Some(component_labels.clone()),
                    ..Default::default()
                }),
                topology_key: HOST_TOPOLOGY_KEY.to_string(),
                ..Default::default()
            },
        }])
    };

    let (pod_affinity, pod_anti_affinity) = match pod_affinity_type {
        PodAffinityType::None => (None, None),
        PodAffinityType::PreferGather => (
            Some(PodAffinity {
                preferred_during_scheduling_ignored_during_execution: preferred(),
                ..Default::default()
            }),
            None,
        ),
        PodAffinityType::PreferFanout => (
            None,
            Some(PodAntiAffinity {
                preferred_during_scheduling_ignored_during_execution: preferred(),
                ..Default::default()
            }),
        ),
    };

    if node_affinity.is_none() && pod_affinity.is_none() && pod_anti_affinity.is_none() {
        return None;
    }

    Some(Affinity {
        node_affinity,
        pod_affinity,
        pod_anti_affinity,
    })
}
