//! Role resolution: which host and interface plays client and server.

use serde::Serialize;

use crate::matrix::TestCase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Server,
}

impl Role {
    /// Suffix of the benchmark binary this role runs (`<kind><suffix>`).
    pub fn binary_suffix(self) -> &'static str {
        match self {
            Role::Client => "ping",
            Role::Server => "inetd",
        }
    }

    pub fn peer(self) -> Role {
        match self {
            Role::Client => Role::Server,
            Role::Server => Role::Client,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Client => write!(f, "client"),
            Role::Server => write!(f, "server"),
        }
    }
}

/// Role bindings for exactly one test case.
///
/// Built fresh for every case; nothing else carries host or interface
/// names between cases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleBinding {
    client_host: String,
    server_host: String,
    client_iface: String,
    server_iface: String,
}

impl RoleBinding {
    pub fn for_case(case: &TestCase) -> Self {
        Self {
            client_host: case.client.clone(),
            server_host: case.server.clone(),
            client_iface: case.client_iface.clone(),
            server_iface: case.server_iface.clone(),
        }
    }

    pub fn host(&self, role: Role) -> &str {
        match role {
            Role::Client => &self.client_host,
            Role::Server => &self.server_host,
        }
    }

    /// Interface name to use for commands executed in `role`'s host.
    pub fn iface(&self, role: Role) -> &str {
        match role {
            Role::Client => &self.client_iface,
            Role::Server => &self.server_iface,
        }
    }

    /// Both roles, client first.
    pub fn roles(&self) -> [Role; 2] {
        [Role::Client, Role::Server]
    }
}
