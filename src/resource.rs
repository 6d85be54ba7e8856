use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_NAMESPACE: &str = "default";

/// Namespaced name identifying a request resource within the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    pub namespace: String,
    pub name: String,
}

impl ResourceId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid resource id '{0}': expected 'namespace/name' or 'name'")]
pub struct ParseResourceIdError(String);

impl FromStr for ResourceId {
    type Err = ParseResourceIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, name) = match s.split_once('/') {
            Some((ns, name)) => (ns, name),
            None => (DEFAULT_NAMESPACE, s),
        };
        if namespace.is_empty() || name.is_empty() || name.contains('/') {
            return Err(ParseResourceIdError(s.to_string()));
        }
        Ok(Self::new(namespace, name))
    }
}

/// The HTTP call a resource asks for. Written by whoever created the
/// resource; the reconciler only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestSpec {
    pub path: String,
    pub method: String,
    #[serde(default)]
    pub body: String,
    /// `"name:value"` entries, attached in order.
    #[serde(default)]
    pub headers: Vec<String>,
}

/// Outcome of the call. An empty `code` means the call has not been made.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestStatus {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub body: String,
}

impl RequestStatus {
    /// Whether the call for this resource has already been recorded.
    ///
    /// This is the only gate on execution: it must be evaluated against
    /// freshly fetched state on every pass.
    pub fn is_completed(&self) -> bool {
        !self.code.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub name: String,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

/// A request resource as held by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub metadata: Metadata,
    pub spec: RequestSpec,
    #[serde(default)]
    pub status: RequestStatus,
}

impl Request {
    pub fn new(id: &ResourceId, spec: RequestSpec) -> Self {
        Self {
            metadata: Metadata {
                namespace: id.namespace.clone(),
                name: id.name.clone(),
            },
            spec,
            status: RequestStatus::default(),
        }
    }

    pub fn id(&self) -> ResourceId {
        ResourceId::new(&self.metadata.namespace, &self.metadata.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_namespaced_id() {
        let id: ResourceId = "team-a/ping".parse().unwrap();
        assert_eq!(id, ResourceId::new("team-a", "ping"));
        assert_eq!(id.to_string(), "team-a/ping");
    }

    #[test]
    fn bare_name_uses_default_namespace() {
        let id: ResourceId = "ping".parse().unwrap();
        assert_eq!(id.namespace, "default");
    }

    #[test]
    fn rejects_malformed_ids() {
        for bad in ["", "/x", "ns/", "a/b/c"] {
            assert!(bad.parse::<ResourceId>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn status_completion_tracks_code() {
        assert!(!RequestStatus::default().is_completed());
        let done = RequestStatus {
            code: "204".to_string(),
            body: String::new(),
        };
        assert!(done.is_completed());
    }

    #[test]
    fn metadata_serializes_only_identity() {
        let req = Request::new(&ResourceId::new("team-a", "ping"), RequestSpec::default());
        let value = serde_yaml::to_value(&req.metadata).unwrap();
        let keys: Vec<&str> = value
            .as_mapping()
            .unwrap()
            .keys()
            .filter_map(serde_yaml::Value::as_str)
            .collect();
        assert_eq!(keys, vec!["namespace", "name"]);
    }

    #[test]
    fn deserializes_wire_format_with_defaults() {
        let yaml = r#"
metadata:
  name: ping
spec:
  path: http://svc/ping
  method: get
"#;
        let req: Request = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(req.id(), ResourceId::new("default", "ping"));
        assert_eq!(req.spec.method, "get");
        assert!(req.spec.body.is_empty());
        assert!(req.spec.headers.is_empty());
        assert_eq!(req.status, RequestStatus::default());
    }
}
