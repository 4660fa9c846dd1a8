use serde::{Deserialize, Serialize};

/// Platform permission bits the bot cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Discord "Manage Server".
    ManageGuild,
    /// Discord "Manage Messages".
    ManageMessages,
}

/// Resolved platform permissions of one member in one guild.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PermissionSet {
    pub manage_guild: bool,
    pub manage_messages: bool,
}

impl PermissionSet {
    pub const ALL: Self = Self {
        manage_guild: true,
        manage_messages: true,
    };

    pub fn has(&self, permission: Permission) -> bool {
        match permission {
            Permission::ManageGuild => self.manage_guild,
            Permission::ManageMessages => self.manage_messages,
        }
    }
}

/// Which checks apply to a privileged operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessRule {
    /// Whether the static owner is always authorized.
    pub owner_bypass: bool,
    /// Platform permission that grants access on its own.
    pub elevated: Permission,
}

impl AccessRule {
    /// Staff commands: owner, Manage Server, or an allow-listed role.
    pub const STAFF: Self = Self {
        owner_bypass: true,
        elevated: Permission::ManageGuild,
    };

    /// CODE alerts: Manage Messages or an allow-listed role.
    pub const ALERT: Self = Self {
        owner_bypass: false,
        elevated: Permission::ManageMessages,
    };
}

/// Why an actor was let through. Logged, never cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grant {
    Owner,
    Elevated(Permission),
    Role(String),
}

/// Who is asking, as far as authorization is concerned.
#[derive(Debug, Clone, Copy)]
pub struct Principal<'a> {
    pub id: u64,
    pub permissions: PermissionSet,
    pub role_names: &'a [String],
}

/// Decide whether `principal` may perform an operation guarded by `rule`.
///
/// Precedence: owner, then elevated permission, then the first of the actor's
/// roles found in `allowed_roles` (exact, case-sensitive).
pub fn evaluate(
    principal: Principal<'_>,
    rule: AccessRule,
    owner_id: u64,
    allowed_roles: &[String],
) -> Option<Grant> {
    if rule.owner_bypass && principal.id == owner_id {
        return Some(Grant::Owner);
    }
    if principal.permissions.has(rule.elevated) {
        return Some(Grant::Elevated(rule.elevated));
    }
    principal
        .role_names
        .iter()
        .find(|role| allowed_roles.iter().any(|allowed| allowed == *role))
        .map(|role| Grant::Role(role.clone()))
}

/// Evaluator bound to the static owner identity. The allow-list is passed on
/// every call because it changes at runtime.
#[derive(Debug, Clone, Copy)]
pub struct PermissionEvaluator {
    owner_id: u64,
}

impl PermissionEvaluator {
    pub fn new(owner_id: u64) -> Self {
        Self { owner_id }
    }

    pub fn owner_id(&self) -> u64 {
        self.owner_id
    }

    pub fn is_owner(&self, actor_id: u64) -> bool {
        actor_id == self.owner_id
    }

    pub fn authorize(
        &self,
        principal: Principal<'_>,
        rule: AccessRule,
        allowed_roles: &[String],
    ) -> Option<Grant> {
        evaluate(principal, rule, self.owner_id, allowed_roles)
    }

    pub fn is_authorized(
        &self,
        principal: Principal<'_>,
        rule: AccessRule,
        allowed_roles: &[String],
    ) -> bool {
        self.authorize(principal, rule, allowed_roles).is_some()
    }
}
