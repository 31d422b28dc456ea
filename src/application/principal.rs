//! Authenticated caller identity.
//!
//! The host's authentication layer inserts a [`Principal`] into request
//! extensions. The output cache only asks whether one is present; the error
//! handler also checks its roles.

/// Roles allowed to see detailed error output.
pub const EDITOR_ROLES: [&str; 3] = ["WebAdmins", "WebEditors", "Administrators"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub name: String,
    pub roles: Vec<String>,
}

impl Principal {
    pub fn new<I, S>(name: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_in_role(&self, role: &str) -> bool {
        self.roles.iter().any(|candidate| candidate == role)
    }

    pub fn is_editor_or_admin(&self) -> bool {
        EDITOR_ROLES.iter().any(|role| self.is_in_role(role))
    }
}
