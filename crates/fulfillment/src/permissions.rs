//! Permission checks before mutating steps.

use std::collections::HashSet;
use std::sync::Arc;

/// Module names used in permission checks.
pub mod modules {
    pub const INVENTORY: &str = "inventory";
    pub const INVOICING: &str = "invoicing";
    pub const FINANCE: &str = "finance";
    pub const PRODUCTION: &str = "production";
    pub const SALES: &str = "sales";
}

/// Action names used in permission checks.
pub mod actions {
    pub const CREATE: &str = "create";
    pub const UPDATE: &str = "update";
    pub const CANCEL: &str = "cancel";
    pub const RESERVE: &str = "reserve";
    pub const CONSUME: &str = "consume";
}

/// Decides whether an actor may perform an action on a module.
pub trait PermissionChecker: Send + Sync {
    fn is_allowed(&self, actor: &str, module: &str, action: &str) -> bool;
}

impl<T: PermissionChecker + ?Sized> PermissionChecker for Arc<T> {
    fn is_allowed(&self, actor: &str, module: &str, action: &str) -> bool {
        (**self).is_allowed(actor, module, action)
    }
}

/// Grants everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PermissionChecker for AllowAll {
    fn is_allowed(&self, _actor: &str, _module: &str, _action: &str) -> bool {
        true
    }
}

/// Fixed grant table. `"*"` as the action grants every action on a module.
#[derive(Debug, Clone, Default)]
pub struct StaticPermissions {
    grants: HashSet<(String, String, String)>,
}

impl StaticPermissions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(
        mut self,
        actor: impl Into<String>,
        module: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        self.grants
            .insert((actor.into(), module.into(), action.into()));
        self
    }
}

impl PermissionChecker for StaticPermissions {
    fn is_allowed(&self, actor: &str, module: &str, action: &str) -> bool {
        [action, "*"].iter().any(|a| {
            self.grants
                .contains(&(actor.to_string(), module.to_string(), a.to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_all() {
        assert!(AllowAll.is_allowed("anyone", modules::FINANCE, actions::CANCEL));
    }

    #[test]
    fn test_static_grants() {
        let permissions = StaticPermissions::new()
            .grant("ana", modules::INVOICING, actions::CREATE)
            .grant("ana", modules::FINANCE, "*");

        assert!(permissions.is_allowed("ana", modules::INVOICING, actions::CREATE));
        assert!(!permissions.is_allowed("ana", modules::INVOICING, actions::CANCEL));
        assert!(permissions.is_allowed("ana", modules::FINANCE, actions::CANCEL));
        assert!(!permissions.is_allowed("rui", modules::FINANCE, actions::CREATE));
    }
}
