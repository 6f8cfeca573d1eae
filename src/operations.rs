//! Operation Registry (spec.md §4.3).
//!
//! A service-scoped map of operation-name → parsed GraphQL operation. The
//! registry never validates a `.graphql` document against a schema — the
//! reduced core treats operations as opaque strings paired with a parsed
//! name and type, the upstream GraphQL server being the source of truth
//! (spec.md §3).

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_graphql_parser::types::{DocumentOperations, OperationType};

/// GraphQL operation kind; also doubles as the `Query`/`Mutation`/
/// `Subscription` RPC-method-name prefix spec.md §3 requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl OperationKind {
    /// The prefix a method name carries for this kind (spec.md §3).
    pub fn prefix(self) -> &'static str {
        match self {
            OperationKind::Query => "Query",
            OperationKind::Mutation => "Mutation",
            OperationKind::Subscription => "Subscription",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Query => write!(f, "query"),
            OperationKind::Mutation => write!(f, "mutation"),
            OperationKind::Subscription => write!(f, "subscription"),
        }
    }
}

/// One loaded `.graphql` file: a name, a type, and the raw document sent
/// upstream verbatim.
#[derive(Debug, Clone)]
pub struct OperationRecord {
    pub name: String,
    pub kind: OperationKind,
    pub raw: String,
    pub source_path: PathBuf,
}

type ServiceMap = HashMap<String, Arc<OperationRecord>>;

/// Service-scoped, hot-reloadable operation catalog.
///
/// A single `RwLock` guards the outer `service_fqn -> operations` map.
/// Replacing one service's entry during a reload takes the writer lock
/// only long enough to swap in a pre-built inner map — readers never
/// observe a half-populated map (spec.md §3/§5).
#[derive(Default)]
pub struct OperationRegistry {
    services: RwLock<HashMap<String, ServiceMap>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads and parses each `.graphql` file in `paths`, then atomically
    /// replaces `service_fqn`'s entire entry with the freshly built map.
    ///
    /// Per-file I/O or parse failures are not fatal to the whole load: the
    /// file is skipped with a warning and the rest still load, since the
    /// reduced core performs no schema validation that would make a
    /// partially-loaded registry unsafe to serve from.
    pub fn load_for_service(&self, service_fqn: &str, paths: &[PathBuf]) {
        let mut fresh = ServiceMap::new();

        for path in paths {
            let contents = match std::fs::read_to_string(path) {
                Ok(c) => c,
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping unreadable operation file");
                    continue;
                }
            };

            let fallback_name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("operation")
                .to_string();

            let (kind, name) = parse_operation_name_and_kind(&contents, &fallback_name);

            fresh.insert(
                name.clone(),
                Arc::new(OperationRecord {
                    name,
                    kind,
                    raw: contents,
                    source_path: path.clone(),
                }),
            );
        }

        let mut services = self.services.write().expect("operation registry lock poisoned");
        services.insert(service_fqn.to_string(), fresh);
    }

    pub fn get_for_service(&self, service_fqn: &str, name: &str) -> Option<Arc<OperationRecord>> {
        let services = self.services.read().expect("operation registry lock poisoned");
        services.get(service_fqn)?.get(name).cloned()
    }

    /// Inserts a single record into a service's map, creating the map if
    /// necessary. Used by startup paths that pre-populate synthesized
    /// operations outside of the normal file-based load.
    pub fn add_for_service(&self, service_fqn: &str, record: OperationRecord) {
        let mut services = self.services.write().expect("operation registry lock poisoned");
        services
            .entry(service_fqn.to_string())
            .or_default()
            .insert(record.name.clone(), Arc::new(record));
    }

    pub fn clear(&self) {
        let mut services = self.services.write().expect("operation registry lock poisoned");
        services.clear();
    }

    pub fn count(&self) -> usize {
        let services = self.services.read().expect("operation registry lock poisoned");
        services.values().map(|m| m.len()).sum()
    }

    pub fn count_for_service(&self, service_fqn: &str) -> usize {
        let services = self.services.read().expect("operation registry lock poisoned");
        services.get(service_fqn).map(|m| m.len()).unwrap_or(0)
    }
}

/// Parses just enough of a `.graphql` document to recover its declared
/// operation name and type, using `async-graphql-parser` (already pulled
/// in transitively by the teacher crate's `async-graphql` dependency, so
/// this never hand-rolls a GraphQL tokenizer). Falls back to
/// `(OperationKind::Query, fallback_name)` when the document doesn't parse
/// or declares no name — the raw string is still forwarded verbatim
/// regardless, since the core path performs no schema validation.
pub fn parse_operation_name_and_kind(source: &str, fallback_name: &str) -> (OperationKind, String) {
    let Ok(document) = async_graphql_parser::parse_query(source) else {
        return (OperationKind::Query, fallback_name.to_string());
    };

    match document.operations {
        DocumentOperations::Single(op) => {
            let kind = operation_type_to_kind(op.node.ty);
            (kind, fallback_name.to_string())
        }
        DocumentOperations::Multiple(map) => match map.into_iter().next() {
            Some((name, op)) => (operation_type_to_kind(op.node.ty), name.to_string()),
            None => (OperationKind::Query, fallback_name.to_string()),
        },
    }
}

fn operation_type_to_kind(ty: OperationType) -> OperationKind {
    match ty {
        OperationType::Query => OperationKind::Query,
        OperationType::Mutation => OperationKind::Mutation,
        OperationType::Subscription => OperationKind::Subscription,
    }
}

/// Strips a leading `Query`/`Mutation`/`Subscription` prefix from a method
/// name, per spec.md §4.6's operation lookup rule — but only if something
/// remains after stripping (`QueryQuery` isn't stripped to empty).
pub fn strip_operation_prefix(method_name: &str) -> Option<&str> {
    for prefix in ["Query", "Mutation", "Subscription"] {
        if let Some(rest) = method_name.strip_prefix(prefix) {
            if !rest.is_empty() {
                return Some(rest);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_named_query() {
        let (kind, name) = parse_operation_name_and_kind(
            "query GetUser($id: Int!) { user(id: $id) { id name } }",
            "fallback",
        );
        assert_eq!(kind, OperationKind::Query);
        assert_eq!(name, "GetUser");
    }

    #[test]
    fn anonymous_operation_falls_back_to_filename_stem() {
        let (kind, name) = parse_operation_name_and_kind("{ user { id } }", "get_user");
        assert_eq!(kind, OperationKind::Query);
        assert_eq!(name, "get_user");
    }

    #[test]
    fn unparsable_file_falls_back_without_failing_the_whole_load() {
        let (kind, name) = parse_operation_name_and_kind("not even close to graphql {{{", "broken");
        assert_eq!(kind, OperationKind::Query);
        assert_eq!(name, "broken");
    }

    #[test]
    fn strip_prefix_rules() {
        assert_eq!(strip_operation_prefix("QueryGetUser"), Some("GetUser"));
        assert_eq!(strip_operation_prefix("MutationUpdateGreeting"), Some("UpdateGreeting"));
        assert_eq!(strip_operation_prefix("SubscriptionTick"), Some("Tick"));
        assert_eq!(strip_operation_prefix("GetUser"), None);
        assert_eq!(strip_operation_prefix("Query"), None);
    }

    #[test]
    fn load_is_service_scoped_and_skips_unreadable_files() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("get_user.graphql");
        std::fs::File::create(&good)
            .unwrap()
            .write_all(b"query GetUser { user { id } }")
            .unwrap();
        let missing = dir.path().join("does_not_exist.graphql");

        let registry = OperationRegistry::new();
        registry.load_for_service("svc.A", &[good, missing]);

        assert_eq!(registry.count_for_service("svc.A"), 1);
        assert!(registry.get_for_service("svc.A", "GetUser").is_some());
        // Scoping: the same operation name is absent from an unrelated service.
        assert!(registry.get_for_service("svc.B", "GetUser").is_none());
    }

    #[test]
    fn reload_swaps_atomically() {
        let registry = OperationRegistry::new();
        registry.add_for_service(
            "svc.A",
            OperationRecord {
                name: "Foo".to_string(),
                kind: OperationKind::Query,
                raw: "query Foo { x }".to_string(),
                source_path: PathBuf::from("foo.graphql"),
            },
        );
        assert!(registry.get_for_service("svc.A", "Foo").is_some());

        registry.load_for_service("svc.A", &[]);
        assert_eq!(registry.count_for_service("svc.A"), 0);
    }
}
