//! Lexical path handling for names inside a layer archive.
//!
//! Names in tar archives always use `/` as separator, so they are handled
//! as plain strings instead of [`std::path::Path`], which would use the
//! separator of the host.

/// Compute the path of the entry referenced by a link.
///
/// `link_target` is relative to the directory containing `current`. If
/// `link_target` is absolute, it is relative to the root of the layer.
///
/// `.` and `..` components are resolved lexically. Like in the root
/// directory of a container, `..` never goes above the root of the layer.
pub(crate) fn resolve_link(current: &str, link_target: &str) -> String {
    let mut components: Vec<&str> = Vec::new();

    if !link_target.starts_with('/') {
        push_components(&mut components, parent(current));
    }

    push_components(&mut components, link_target);

    components.join("/")
}

/// Return the directory of `path`, or an empty string if it is a file
/// in the root.
fn parent(path: &str) -> &str {
    let path = path.trim_end_matches('/');
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or_default()
}

fn push_components<'a>(components: &mut Vec<&'a str>, path: &'a str) {
    for component in path.split('/') {
        match component {
            "" | "." => continue,

            ".." => {
                components.pop();
            }

            normal => components.push(normal),
        }
    }
}

#[test]
fn relative_to_directory() {
    assert_eq!(resolve_link("package.yaml", "real.yaml"), "real.yaml");
    assert_eq!(resolve_link("a/b/package.yaml", "c.yaml"), "a/b/c.yaml");
    assert_eq!(
        resolve_link("a/b/package.yaml", "./x/../c.yaml"),
        "a/b/c.yaml"
    );
}

#[test]
fn parent_components() {
    assert_eq!(
        resolve_link("pkg/package.yaml", "../shared/package.yaml"),
        "shared/package.yaml"
    );

    assert_eq!(resolve_link("a/b/c", "../../d"), "d");
}

#[test]
fn never_above_root() {
    assert_eq!(
        resolve_link("package.yaml", "../shared/package.yaml"),
        "shared/package.yaml"
    );

    assert_eq!(resolve_link("a/b", "../../../../etc/x"), "etc/x");
}

#[test]
fn absolute_targets() {
    assert_eq!(resolve_link("a/b/package.yaml", "/opt/pkg.yaml"), "opt/pkg.yaml");
    assert_eq!(resolve_link("a/package.yaml", "//opt/./pkg.yaml"), "opt/pkg.yaml");
}

#[test]
fn dot_prefixed_names() {
    assert_eq!(resolve_link("./a/package.yaml", "b.yaml"), "a/b.yaml");
}
