//! Descriptor Loader (spec.md §4.1).
//!
//! Ingests `.proto` files and produces the service/method/message
//! descriptors the rest of the gateway walks. Descriptors themselves are
//! not reimplemented: `prost_reflect::DescriptorPool` already is the
//! arena-of-descriptors-keyed-by-fully-qualified-name design spec.md §9
//! calls for, and already solves cyclic message graphs (a list of `Tree`
//! referencing itself) by storing field edges as descriptor handles rather
//! than owning values. `.proto` text is compiled to descriptors at runtime
//! with `protox`, since the service catalog isn't known until the gateway
//! points at a `services_dir`.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use prost_reflect::{DescriptorPool, MessageDescriptor, MethodDescriptor, ServiceDescriptor};

use crate::error::{Error, Result};

/// Thread-safe, append-mostly store of compiled descriptors.
///
/// Reads never block on each other or on writes in progress beyond a
/// normal `RwLock` read acquisition: the pool itself is immutable once
/// built, so a `load`/`reload` builds an entirely new `DescriptorPool`
/// off to the side and only takes the write lock to swap it in, matching
/// spec.md §5 ("no suspension happens inside the registry's critical
/// section other than the map swap itself" — the same discipline applies
/// here).
pub struct DescriptorLoader {
    state: RwLock<LoaderState>,
}

#[derive(Default, Clone)]
struct LoaderState {
    pool: DescriptorPool,
    /// package name -> the source directory that first declared it.
    packages: HashMap<String, PathBuf>,
    /// file paths already folded into `pool`; re-registering is a no-op.
    registered_files: HashSet<PathBuf>,
}

impl Default for DescriptorLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl DescriptorLoader {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LoaderState::default()),
        }
    }

    /// Loads every `*.proto` file found (recursively) under each directory
    /// in `dirs`, using that directory as the import root for its own
    /// files. Fails with `Error::InvalidInput` if any file fails to parse,
    /// or if two files across *different* source directories declare the
    /// same `package`.
    pub fn load<P: AsRef<Path>>(&self, dirs: &[P]) -> Result<()> {
        let mut next = {
            let guard = self.state.read().expect("descriptor loader lock poisoned");
            guard.clone()
        };

        let mut all_files = pool_to_file_descriptor_protos(&next.pool);

        for dir in dirs {
            let dir = dir.as_ref();
            let dir_canonical = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
            let proto_files = find_proto_files(dir);
            if proto_files.is_empty() {
                continue;
            }

            let unregistered: Vec<&PathBuf> = proto_files
                .iter()
                .filter(|p| !next.registered_files.contains(*p))
                .collect();
            if unregistered.is_empty() {
                continue;
            }

            let compiled = protox::compile(unregistered.iter().map(|p| p.as_path()), [dir])
                .map_err(|e| Error::InvalidInput(format!("failed to parse .proto files under {}: {e}", dir.display())))?;

            for file in &compiled.file {
                if let Some(package) = file.package.as_ref().filter(|p| !p.is_empty()) {
                    if let Some(existing_dir) = next.packages.get(package) {
                        if existing_dir != &dir_canonical {
                            return Err(Error::InvalidInput(format!(
                                "package `{package}` declared in both {} and {} — package names must be globally unique",
                                existing_dir.display(),
                                dir_canonical.display()
                            )));
                        }
                    } else {
                        next.packages.insert(package.clone(), dir_canonical.clone());
                    }
                }
            }

            all_files.extend(compiled.file);
            for path in proto_files {
                next.registered_files.insert(path);
            }
        }

        let deduped = dedup_file_descriptor_protos(all_files);
        let pool = DescriptorPool::from_file_descriptor_set(prost_types::FileDescriptorSet { file: deduped })
            .map_err(|e| Error::Descriptor(format!("failed to build descriptor pool: {e}")))?;
        next.pool = pool;

        let mut guard = self.state.write().expect("descriptor loader lock poisoned");
        *guard = next;
        Ok(())
    }

    /// Drops all loaded descriptors (used by `Reload` before re-populating,
    /// and by tests).
    pub fn clear(&self) {
        let mut guard = self.state.write().expect("descriptor loader lock poisoned");
        *guard = LoaderState::default();
    }

    /// Registers a file path as already processed without touching the
    /// pool. Re-registering an already-known path is a silent no-op, per
    /// spec.md §4.1 ("Reload may re-process identical files").
    pub fn register_file_path(&self, path: &Path) {
        let mut guard = self.state.write().expect("descriptor loader lock poisoned");
        guard.registered_files.insert(path.to_path_buf());
    }

    pub fn service(&self, fqn: &str) -> Option<ServiceDescriptor> {
        let guard = self.state.read().expect("descriptor loader lock poisoned");
        guard.pool.get_service_by_name(fqn)
    }

    pub fn method(&self, service_fqn: &str, method_name: &str) -> Option<MethodDescriptor> {
        let service = self.service(service_fqn)?;
        service.methods().find(|m| m.name() == method_name)
    }

    pub fn message_by_name(&self, full_name: &str) -> Option<MessageDescriptor> {
        let guard = self.state.read().expect("descriptor loader lock poisoned");
        guard.pool.get_message_by_name(full_name)
    }

    /// Full snapshot of the loaded descriptors (cheap: `DescriptorPool` is
    /// internally reference-counted).
    pub fn snapshot(&self) -> DescriptorPool {
        self.state.read().expect("descriptor loader lock poisoned").pool.clone()
    }

    pub fn services(&self) -> Vec<ServiceDescriptor> {
        self.state
            .read()
            .expect("descriptor loader lock poisoned")
            .pool
            .services()
            .collect()
    }
}

fn pool_to_file_descriptor_protos(pool: &DescriptorPool) -> Vec<prost_types::FileDescriptorProto> {
    pool.files().map(|f| f.file_descriptor_proto().clone()).collect()
}

fn dedup_file_descriptor_protos(
    files: Vec<prost_types::FileDescriptorProto>,
) -> Vec<prost_types::FileDescriptorProto> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(files.len());
    for file in files {
        let name = file.name.clone().unwrap_or_default();
        if seen.insert(name) {
            out.push(file);
        }
    }
    out
}

fn find_proto_files(dir: &Path) -> Vec<PathBuf> {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.path().extension().map(|ext| ext == "proto").unwrap_or(false))
        .map(|entry| entry.into_path())
        .collect()
}
