//! Service Discovery (spec.md §4.2).
//!
//! Turns a `services_dir` into a list of service bundles: one per immediate
//! subdirectory, each pairing its `.proto` files with its `.graphql`
//! operation files. This is the layer that makes operation scoping
//! possible — everything downstream keys operations by the bundle's
//! service FQN, never by a bare operation name, which is the
//! security-relevant property spec.md §4.2 calls out.

use std::path::{Path, PathBuf};

use crate::descriptor::DescriptorLoader;
use crate::error::{Error, Result};

/// One discovered `services/<name>/` directory.
#[derive(Debug, Clone)]
pub struct ServiceBundle {
    pub dir: PathBuf,
    pub proto_files: Vec<PathBuf>,
    pub graphql_files: Vec<PathBuf>,
    pub service_fqn: String,
}

/// Walks `services_dir`'s immediate subdirectories and resolves each into a
/// [`ServiceBundle`]. A subdirectory with zero `.proto` files is skipped
/// (not every directory under `services_dir` needs to be a bundle); a
/// subdirectory whose `.proto` files declare zero or more than one distinct
/// service FQN fails with `Error::InvalidInput`, since the registry has no
/// way to scope operations to an ambiguous bundle.
pub fn discover(services_dir: &Path) -> Result<Vec<ServiceBundle>> {
    let mut bundles = Vec::new();

    let entries = std::fs::read_dir(services_dir).map_err(Error::Io)?;
    let mut subdirs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    subdirs.sort();

    for dir in subdirs {
        let proto_files = list_files_with_extension(&dir, "proto")?;
        if proto_files.is_empty() {
            continue;
        }
        let graphql_files = list_files_with_extension(&dir, "graphql")?;

        let service_fqn = resolve_bundle_service_fqn(&dir, &proto_files)?;

        bundles.push(ServiceBundle {
            dir: dir.canonicalize().unwrap_or(dir),
            proto_files,
            graphql_files,
            service_fqn,
        });
    }

    Ok(bundles)
}

fn resolve_bundle_service_fqn(dir: &Path, proto_files: &[PathBuf]) -> Result<String> {
    let loader = DescriptorLoader::new();
    loader.load(&[dir])?;

    let services = loader.services();
    match services.len() {
        0 => Err(Error::InvalidInput(format!(
            "bundle {} declares no service across its .proto files ({} file(s))",
            dir.display(),
            proto_files.len()
        ))),
        1 => Ok(services[0].full_name().to_string()),
        _ => Err(Error::InvalidInput(format!(
            "bundle {} declares {} distinct services; exactly one is required per bundle",
            dir.display(),
            services.len()
        ))),
    }
}

fn list_files_with_extension(dir: &Path, ext: &str) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(Error::Io)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().map(|e| e == ext).unwrap_or(false))
        .collect();
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, contents: &str) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn discovers_one_bundle_per_subdirectory() {
        let root = tempfile::tempdir().unwrap();
        let user_dir = root.path().join("user");
        std::fs::create_dir(&user_dir).unwrap();
        write_file(
            &user_dir,
            "user.proto",
            r#"syntax = "proto3"; package user.v1; message M { string x = 1; } service UserService { rpc QueryGetUser(M) returns (M); }"#,
        );
        write_file(&user_dir, "get_user.graphql", "query GetUser { user { id } }");

        // Not a bundle: no .proto files.
        let not_a_bundle = root.path().join("notes");
        std::fs::create_dir(&not_a_bundle).unwrap();
        write_file(&not_a_bundle, "readme.txt", "hello");

        let bundles = discover(root.path()).expect("discovery should succeed");
        assert_eq!(bundles.len(), 1);
        assert_eq!(bundles[0].service_fqn, "user.v1.UserService");
        assert_eq!(bundles[0].graphql_files.len(), 1);
    }

    #[test]
    fn bundle_with_two_services_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("ambiguous");
        std::fs::create_dir(&dir).unwrap();
        write_file(
            &dir,
            "two.proto",
            r#"syntax = "proto3"; package ambiguous.v1;
            message M { string x = 1; }
            service A { rpc QueryA(M) returns (M); }
            service B { rpc QueryB(M) returns (M); }"#,
        );

        let err = discover(root.path()).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
