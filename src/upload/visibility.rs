//! Effective visibility resolution.
//!
//! A record either forces its visibility or inherits it from its container.
//! A container is public only when its own rule lets anyone view it; a
//! container that inherits defers to its parent, and a root that inherits is
//! public.

use std::collections::HashSet;

use tracing::warn;

use super::store::{AccessRule, Container, ContainerId, ContainerTree, Visibility, VisibilityMode};
use crate::{DepotError, Result};

/// Walks a container and its ancestors, failing on cycles.
struct Ancestry<'a> {
    tree: &'a dyn ContainerTree,
    next: Option<ContainerId>,
    seen: HashSet<ContainerId>,
}

impl<'a> Ancestry<'a> {
    fn new(tree: &'a dyn ContainerTree, start: ContainerId) -> Self {
        Self {
            tree,
            next: Some(start),
            seen: HashSet::new(),
        }
    }

    async fn next(&mut self) -> Result<Option<Container>> {
        let Some(id) = self.next else {
            return Ok(None);
        };
        if !self.seen.insert(id) {
            warn!(container = %id, "Container hierarchy loops back on itself");
            return Err(DepotError::VisibilityCycle(id));
        }
        let container = self.tree.require(id).await?;
        self.next = container.parent;
        Ok(Some(container))
    }
}

/// Visibility of a container, following inherited rules up the tree.
pub async fn container_visibility(
    tree: &dyn ContainerTree,
    container: ContainerId,
) -> Result<Visibility> {
    let mut ancestry = Ancestry::new(tree, container);
    while let Some(current) = ancestry.next().await? {
        match current.access_rule {
            AccessRule::Anyone => return Ok(Visibility::Public),
            AccessRule::LoggedInUsers | AccessRule::OnlyTheseUsers(_) => {
                return Ok(Visibility::Protected)
            }
            AccessRule::Inherit => continue,
        }
    }
    Ok(Visibility::Public)
}

/// Effective visibility of a record with `mode` stored in `container`.
pub async fn resolve_visibility(
    tree: &dyn ContainerTree,
    mode: VisibilityMode,
    container: ContainerId,
) -> Result<Visibility> {
    match mode {
        VisibilityMode::Forced(visibility) => Ok(visibility),
        VisibilityMode::Inherit => container_visibility(tree, container).await,
    }
}

/// Slash-separated path of container names from the root down.
pub async fn container_path(tree: &dyn ContainerTree, container: ContainerId) -> Result<String> {
    let mut names = Vec::new();
    let mut ancestry = Ancestry::new(tree, container);
    while let Some(current) = ancestry.next().await? {
        names.push(current.name);
    }
    names.reverse();
    Ok(names.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::MemoryCatalog;

    async fn tree() -> (MemoryCatalog, ContainerId, ContainerId, ContainerId) {
        let catalog = MemoryCatalog::new();
        let public = catalog.add_container("public", None, AccessRule::Anyone);
        let members = catalog.add_container("members", None, AccessRule::LoggedInUsers);
        let nested = catalog.add_container("nested", Some(members), AccessRule::Inherit);
        (catalog, public, members, nested)
    }

    #[tokio::test]
    async fn test_inherit_under_public_container() {
        let (catalog, public, _, _) = tree().await;
        let v = resolve_visibility(&catalog, VisibilityMode::Inherit, public)
            .await
            .unwrap();
        assert_eq!(v, Visibility::Public);
    }

    #[tokio::test]
    async fn test_inherit_under_restricted_container() {
        let (catalog, _, members, nested) = tree().await;
        let v = resolve_visibility(&catalog, VisibilityMode::Inherit, members)
            .await
            .unwrap();
        assert_eq!(v, Visibility::Protected);

        let v = resolve_visibility(&catalog, VisibilityMode::Inherit, nested)
            .await
            .unwrap();
        assert_eq!(v, Visibility::Protected);
    }

    #[tokio::test]
    async fn test_forced_wins() {
        let (catalog, public, members, _) = tree().await;
        let v = resolve_visibility(
            &catalog,
            VisibilityMode::Forced(Visibility::Protected),
            public,
        )
        .await
        .unwrap();
        assert_eq!(v, Visibility::Protected);

        let v = resolve_visibility(&catalog, VisibilityMode::Forced(Visibility::Public), members)
            .await
            .unwrap();
        assert_eq!(v, Visibility::Public);
    }

    #[tokio::test]
    async fn test_only_these_users_is_protected() {
        let catalog = MemoryCatalog::new();
        let secret = catalog.add_container(
            "my-secret-folder",
            None,
            AccessRule::OnlyTheseUsers(vec!["admin".into()]),
        );
        assert_eq!(
            container_visibility(&catalog, secret).await.unwrap(),
            Visibility::Protected
        );
    }

    #[tokio::test]
    async fn test_root_without_rule_is_public() {
        let catalog = MemoryCatalog::new();
        let root = catalog.add_container("Uploads", None, AccessRule::Inherit);
        let child = catalog.add_container("child", Some(root), AccessRule::Inherit);
        assert_eq!(
            container_visibility(&catalog, child).await.unwrap(),
            Visibility::Public
        );
    }

    #[tokio::test]
    async fn test_public_child_of_protected_parent() {
        let catalog = MemoryCatalog::new();
        let parent = catalog.add_container("locked", None, AccessRule::LoggedInUsers);
        let child = catalog.add_container("open", Some(parent), AccessRule::Anyone);
        assert_eq!(
            container_visibility(&catalog, child).await.unwrap(),
            Visibility::Public
        );
    }

    #[tokio::test]
    async fn test_cycle_fails_fast() {
        let catalog = MemoryCatalog::new();
        let a = catalog.add_container("a", None, AccessRule::Inherit);
        let b = catalog.add_container("b", Some(a), AccessRule::Inherit);
        catalog.set_parent(a, Some(b));

        let result = container_visibility(&catalog, b).await;
        assert!(matches!(result, Err(DepotError::VisibilityCycle(_))));

        let result = container_path(&catalog, a).await;
        assert!(matches!(result, Err(DepotError::VisibilityCycle(_))));
    }

    #[tokio::test]
    async fn test_missing_container() {
        let catalog = MemoryCatalog::new();
        let result = container_visibility(&catalog, ContainerId(42)).await;
        assert!(matches!(result, Err(DepotError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_container_path() {
        let (catalog, public, _, nested) = tree().await;
        assert_eq!(container_path(&catalog, public).await.unwrap(), "public");
        assert_eq!(
            container_path(&catalog, nested).await.unwrap(),
            "members/nested"
        );
    }
}
