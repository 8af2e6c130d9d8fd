//! Mapping of apiVersion/kind to REST endpoints
//!
//! Lookups go, in order, through explicit mappings, the process-lifetime cache,
//! the server's `APIResourceList`, and finally a pluralization heuristic.

use indexmap::IndexMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::APIResourceList;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::resource::split_api_version;

/// Cluster-scoped resources known to the heuristic fallback
const CLUSTER_SCOPED: &[&str] = &[
    "namespaces",
    "nodes",
    "persistentvolumes",
    "clusterroles",
    "clusterrolebindings",
    "customresourcedefinitions",
    "storageclasses",
    "priorityclasses",
    "ingressclasses",
    "mutatingwebhookconfigurations",
    "validatingwebhookconfigurations",
    "apiservices",
];

/// Where the collection of a kind lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceInfo {
    /// Discovered or guessed from the API group layout
    Discovered {
        /// `/api/v1` or `/apis/{group}/{version}`
        prefix: String,
        plural: String,
        namespaced: bool,
    },
    /// Explicit collection path, `{namespace}` substituted when present
    Mapped { template: String },
}

impl ResourceInfo {
    pub fn is_namespaced(&self) -> bool {
        match self {
            Self::Discovered { namespaced, .. } => *namespaced,
            Self::Mapped { template } => template.contains("{namespace}"),
        }
    }

    /// Collection path for a namespace (ignored when cluster scoped)
    pub fn collection_path(&self, namespace: &str) -> String {
        match self {
            Self::Discovered {
                prefix,
                plural,
                namespaced: true,
            } => format!("{}/namespaces/{}/{}", prefix, namespace, plural),
            Self::Discovered { prefix, plural, .. } => format!("{}/{}", prefix, plural),
            Self::Mapped { template } => template.replace("{namespace}", namespace),
        }
    }

    pub fn item_path(&self, namespace: &str, name: &str) -> String {
        format!("{}/{}", self.collection_path(namespace), name)
    }
}

/// API root for an apiVersion
pub fn api_prefix(api_version: &str) -> String {
    match split_api_version(api_version) {
        ("", version) => format!("/api/{}", version),
        (group, version) => format!("/apis/{}/{}", group, version),
    }
}

/// Lowercase plural guess for a kind
pub fn guess_plural(kind: &str) -> String {
    let lower = kind.to_ascii_lowercase();
    if lower.ends_with('s') || lower.ends_with('x') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if let Some(stem) = lower.strip_suffix('y')
        && !stem.ends_with(['a', 'e', 'i', 'o', 'u'])
    {
        format!("{}ies", stem)
    } else {
        format!("{}s", lower)
    }
}

/// Heuristic resource info when the server does not describe the kind
pub fn fallback(api_version: &str, kind: &str) -> ResourceInfo {
    let plural = guess_plural(kind);
    let namespaced = !CLUSTER_SCOPED.contains(&plural.as_str());
    ResourceInfo::Discovered {
        prefix: api_prefix(api_version),
        plural,
        namespaced,
    }
}

/// Find a kind in a discovery document, ignoring subresources
pub fn from_resource_list(list: &APIResourceList, api_version: &str, kind: &str) -> Option<ResourceInfo> {
    list.resources
        .iter()
        .find(|r| r.kind == kind && !r.name.contains('/'))
        .map(|r| ResourceInfo::Discovered {
            prefix: api_prefix(api_version),
            plural: r.name.clone(),
            namespaced: r.namespaced,
        })
}

/// Discovery cache, cleared only explicitly
#[derive(Debug, Default)]
pub struct DiscoveryCache {
    mapping: IndexMap<String, String>,
    resolved: Mutex<HashMap<(String, String), ResourceInfo>>,
    lists: Mutex<HashMap<String, Option<APIResourceList>>>,
}

impl DiscoveryCache {
    /// `mapping` is `kind -> collection path template`
    pub fn new(mapping: IndexMap<String, String>) -> Self {
        Self {
            mapping,
            ..Default::default()
        }
    }

    pub fn mapped(&self, kind: &str) -> Option<ResourceInfo> {
        self.mapping.get(kind).map(|template| ResourceInfo::Mapped {
            template: template.clone(),
        })
    }

    pub fn get(&self, api_version: &str, kind: &str) -> Option<ResourceInfo> {
        let resolved = self.resolved.lock().unwrap_or_else(|e| e.into_inner());
        resolved
            .get(&(api_version.to_string(), kind.to_string()))
            .cloned()
    }

    pub fn insert(&self, api_version: &str, kind: &str, info: ResourceInfo) {
        let mut resolved = self.resolved.lock().unwrap_or_else(|e| e.into_inner());
        resolved.insert((api_version.to_string(), kind.to_string()), info);
    }

    /// Cached discovery document; `Some(None)` records a missing group version
    pub fn list(&self, api_version: &str) -> Option<Option<APIResourceList>> {
        let lists = self.lists.lock().unwrap_or_else(|e| e.into_inner());
        lists.get(api_version).cloned()
    }

    pub fn insert_list(&self, api_version: &str, list: Option<APIResourceList>) {
        let mut lists = self.lists.lock().unwrap_or_else(|e| e.into_inner());
        lists.insert(api_version.to_string(), list);
    }

    pub fn clear(&self) {
        self.resolved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.lists.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn len(&self) -> usize {
        self.resolved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_prefix() {
        assert_eq!(api_prefix("v1"), "/api/v1");
        assert_eq!(api_prefix("apps/v1"), "/apis/apps/v1");
    }

    #[test]
    fn test_guess_plural() {
        assert_eq!(guess_plural("Deployment"), "deployments");
        assert_eq!(guess_plural("Ingress"), "ingresses");
        assert_eq!(guess_plural("NetworkPolicy"), "networkpolicies");
        assert_eq!(guess_plural("Gateway"), "gateways");
    }

    #[test]
    fn test_fallback_scope() {
        let node = fallback("v1", "Node");
        assert!(!node.is_namespaced());
        assert_eq!(node.collection_path("ignored"), "/api/v1/nodes");

        let role = fallback("rbac.authorization.k8s.io/v1", "ClusterRole");
        assert_eq!(
            role.item_path("x", "admin"),
            "/apis/rbac.authorization.k8s.io/v1/clusterroles/admin"
        );

        let svc = fallback("v1", "Service");
        assert_eq!(svc.item_path("apps", "web"), "/api/v1/namespaces/apps/services/web");
    }

    #[test]
    fn test_from_resource_list_skips_subresources() {
        let list: APIResourceList = serde_json::from_value(serde_json::json!({
            "groupVersion": "apps/v1",
            "resources": [
                {"name": "deployments/status", "singularName": "", "namespaced": true, "kind": "Deployment", "verbs": ["get"]},
                {"name": "deployments", "singularName": "deployment", "namespaced": true, "kind": "Deployment", "verbs": ["get", "create"]}
            ]
        }))
        .unwrap();
        let info = from_resource_list(&list, "apps/v1", "Deployment").unwrap();
        assert_eq!(info.item_path("ns", "web"), "/apis/apps/v1/namespaces/ns/deployments/web");
        assert!(from_resource_list(&list, "apps/v1", "StatefulSet").is_none());
    }

    #[test]
    fn test_mapping_and_cache() {
        let cache = DiscoveryCache::new(
            [("Widget".to_string(), "/apis/acme.io/v1/namespaces/{namespace}/widgetz".to_string())]
                .into_iter()
                .collect(),
        );
        let mapped = cache.mapped("Widget").unwrap();
        assert!(mapped.is_namespaced());
        assert_eq!(mapped.item_path("a", "w"), "/apis/acme.io/v1/namespaces/a/widgetz/w");

        cache.insert("v1", "Service", fallback("v1", "Service"));
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
