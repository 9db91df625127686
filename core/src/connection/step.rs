// Connection steps and relay/session sub-states

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionStep {
    Idle,
    Starting,
    UriRequesting,
    UriReceived,
    DeeplinkDispatching,
    DeeplinkDispatched,
    AwaitingApproval,
    ApprovalReceived,
    ApprovalRejected,
    ApprovalTimeout,
    SessionEstablishing,
    SessionEstablished,
    RelayError,
    DeeplinkError,
    SessionError,
    Failed,
}

impl ConnectionStep {
    pub const ALL: [ConnectionStep; 16] = [
        ConnectionStep::Idle,
        ConnectionStep::Starting,
        ConnectionStep::UriRequesting,
        ConnectionStep::UriReceived,
        ConnectionStep::DeeplinkDispatching,
        ConnectionStep::DeeplinkDispatched,
        ConnectionStep::AwaitingApproval,
        ConnectionStep::ApprovalReceived,
        ConnectionStep::ApprovalRejected,
        ConnectionStep::ApprovalTimeout,
        ConnectionStep::SessionEstablishing,
        ConnectionStep::SessionEstablished,
        ConnectionStep::RelayError,
        ConnectionStep::DeeplinkError,
        ConnectionStep::SessionError,
        ConnectionStep::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::UriRequesting => "uriRequesting",
            Self::UriReceived => "uriReceived",
            Self::DeeplinkDispatching => "deeplinkDispatching",
            Self::DeeplinkDispatched => "deeplinkDispatched",
            Self::AwaitingApproval => "awaitingApproval",
            Self::ApprovalReceived => "approvalReceived",
            Self::ApprovalRejected => "approvalRejected",
            Self::ApprovalTimeout => "approvalTimeout",
            Self::SessionEstablishing => "sessionEstablishing",
            Self::SessionEstablished => "sessionEstablished",
            Self::RelayError => "relayError",
            Self::DeeplinkError => "deeplinkError",
            Self::SessionError => "sessionError",
            Self::Failed => "failed",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::ApprovalRejected
                | Self::ApprovalTimeout
                | Self::RelayError
                | Self::DeeplinkError
                | Self::SessionError
                | Self::Failed
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::SessionEstablished)
    }

    /// Neither idle nor terminal
    pub fn is_in_progress(&self) -> bool {
        !matches!(self, Self::Idle) && !self.is_error() && !self.is_success()
    }

    pub fn is_terminal(&self) -> bool {
        self.is_error() || self.is_success()
    }
}

impl std::fmt::Display for ConnectionStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelayState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl std::fmt::Display for RelayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    None,
    Proposed,
    Approved,
    Rejected,
    Deleted,
    Error,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Proposed => write!(f, "proposed"),
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
            Self::Deleted => write!(f, "deleted"),
            Self::Error => write!(f, "error"),
        }
    }
}
