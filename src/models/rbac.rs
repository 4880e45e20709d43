use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// Identities owned by the coarse RBAC layer. This crate only consumes them:
// whether a role may touch a resource at all is decided upstream.

/// Numeric user identifier as issued by the session layer.
pub type UserId = u64;

macro_rules! rbac_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $label:literal { $($variant:ident => $wire:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.pad(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                let normalized = value.trim().replace('-', "_").to_ascii_uppercase();
                $name::ALL
                    .iter()
                    .copied()
                    .find(|candidate| candidate.as_str() == normalized)
                    .ok_or_else(|| format!("unknown {}: {}", $label, value))
            }
        }
    };
}

rbac_enum! {
    /// Who is acting.
    Role, "role" {
        Admin => "ADMIN",
        SalesManager => "SALES_MANAGER",
        SalesRep => "SALES_REP",
        Marketing => "MARKETING",
        CustomerService => "CUSTOMER_SERVICE",
        Viewer => "VIEWER",
    }
}

rbac_enum! {
    /// What is being acted upon.
    Resource, "resource" {
        Customers => "CUSTOMERS",
        Contacts => "CONTACTS",
        Opportunities => "OPPORTUNITIES",
        Proposals => "PROPOSALS",
        Products => "PRODUCTS",
        Interactions => "INTERACTIONS",
        Reports => "REPORTS",
        Users => "USERS",
    }
}

rbac_enum! {
    /// The operation being attempted.
    Action, "action" {
        Create => "CREATE",
        Read => "READ",
        Update => "UPDATE",
        Delete => "DELETE",
        Export => "EXPORT",
        Import => "IMPORT",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wire_names_leniently() {
        assert_eq!("SALES_REP".parse::<Role>().unwrap(), Role::SalesRep);
        assert_eq!("sales-rep".parse::<Role>().unwrap(), Role::SalesRep);
        assert_eq!("customers".parse::<Resource>().unwrap(), Resource::Customers);
        assert!("JANITOR".parse::<Role>().is_err());
    }

    #[test]
    fn serde_uses_screaming_snake_case() {
        let json = serde_json::to_string(&Role::CustomerService).unwrap();
        assert_eq!(json, "\"CUSTOMER_SERVICE\"");
        let action: Action = serde_json::from_str("\"DELETE\"").unwrap();
        assert_eq!(action, Action::Delete);
    }
}
