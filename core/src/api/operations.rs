//! The control API operations the orchestrator relies on.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    View,
    Action,
    Other,
}

impl OperationKind {
    fn as_str(self) -> &'static str {
        match self {
            OperationKind::View => "view",
            OperationKind::Action => "action",
            OperationKind::Other => "other",
        }
    }
}

/// One endpoint of the daemon's control API, addressed as `component/kind/name`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Operation {
    pub component: &'static str,
    pub kind: OperationKind,
    pub name: &'static str,
}

impl Operation {
    const fn view(component: &'static str, name: &'static str) -> Self {
        Self { component, kind: OperationKind::View, name }
    }

    const fn action(component: &'static str, name: &'static str) -> Self {
        Self { component, kind: OperationKind::Action, name }
    }

    const fn other(component: &'static str, name: &'static str) -> Self {
        Self { component, kind: OperationKind::Other, name }
    }

    /// Path below the API root, without the output-format prefix.
    pub fn path(&self) -> String {
        format!("{}/{}/{}/", self.component, self.kind.as_str(), self.name)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.component, self.name)
    }
}

pub const VERSION: Operation = Operation::view("core", "version");
pub const XML_REPORT: Operation = Operation::other("core", "xmlreport");

pub const NEW_CONTEXT: Operation = Operation::action("context", "newContext");
pub const INCLUDE_IN_CONTEXT: Operation = Operation::action("context", "includeInContext");
pub const EXCLUDE_FROM_CONTEXT: Operation = Operation::action("context", "excludeFromContext");
pub const EXPORT_CONTEXT: Operation = Operation::action("context", "exportContext");
pub const IMPORT_URLS: Operation = Operation::action("importurls", "importurls");

pub const SET_AUTHENTICATION_METHOD: Operation =
    Operation::action("authentication", "setAuthenticationMethod");
pub const SET_LOGGED_IN_INDICATOR: Operation =
    Operation::action("authentication", "setLoggedInIndicator");
pub const ADD_ANTI_CSRF_TOKEN: Operation = Operation::action("acsrf", "addOptionToken");
pub const LOAD_SCRIPT: Operation = Operation::action("script", "load");

pub const NEW_USER: Operation = Operation::action("users", "newUser");
pub const SET_AUTHENTICATION_CREDENTIALS: Operation =
    Operation::action("users", "setAuthenticationCredentials");
pub const SET_USER_ENABLED: Operation = Operation::action("users", "setUserEnabled");

pub const SET_FORCED_USER_MODE_ENABLED: Operation =
    Operation::action("forcedUser", "setForcedUserModeEnabled");
pub const SET_FORCED_USER: Operation = Operation::action("forcedUser", "setForcedUser");

pub const SPIDER_SCAN: Operation = Operation::action("spider", "scan");
pub const SPIDER_SCAN_AS_USER: Operation = Operation::action("spider", "scanAsUser");
pub const SPIDER_STATUS: Operation = Operation::view("spider", "status");
pub const SPIDER_ADDED_NODES: Operation = Operation::view("spider", "addedNodes");

pub const PASSIVE_RECORDS_TO_SCAN: Operation = Operation::view("pscan", "recordsToScan");

pub const ACTIVE_SCAN: Operation = Operation::action("ascan", "scan");
pub const ACTIVE_SCAN_AS_USER: Operation = Operation::action("ascan", "scanAsUser");
pub const ACTIVE_SCAN_STATUS: Operation = Operation::view("ascan", "status");
