use crate::models::Role;

/// Who is asking for a change. `Gateway` is only ever constructed by the
/// payment adapter when it applies a verified callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    User { id: String, role: Role },
    Gateway,
}

impl Actor {
    pub fn customer(id: impl Into<String>) -> Self {
        Actor::User {
            id: id.into(),
            role: Role::Customer,
        }
    }

    pub fn vendor(id: impl Into<String>) -> Self {
        Actor::User {
            id: id.into(),
            role: Role::Vendor,
        }
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Actor::User {
            id: id.into(),
            role: Role::Admin,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            Actor::User { id, .. } => Some(id),
            Actor::Gateway => None,
        }
    }

    pub fn role(&self) -> Option<Role> {
        match self {
            Actor::User { role, .. } => Some(*role),
            Actor::Gateway => None,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role() == Some(Role::Admin)
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Actor::User { id, role } => write!(f, "{}:{id}", role.as_str()),
            Actor::Gateway => f.write_str("gateway"),
        }
    }
}
