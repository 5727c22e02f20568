use std::io;

use thiserror::Error;

/// Errors of a single probe run. None of them stop the measurement loop.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("failed to resolve {address}: {source}")]
    Resolve {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("no IPv4 address found for {0}")]
    NoIpv4Address(String),

    #[error("permission denied: raw sockets require root privileges")]
    PermissionDenied,

    #[error("failed to open icmp socket: {0}")]
    Socket(io::Error),

    #[error("failed to send echo request: {0}")]
    Send(io::Error),

    #[error("failed to receive echo reply: {0}")]
    Receive(io::Error),

    #[error("sender thread panicked")]
    SenderPanicked,
}

impl ProbeError {
    /// Map a socket creation error, keeping permission problems apart.
    pub(crate) fn socket(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::PermissionDenied {
            ProbeError::PermissionDenied
        } else {
            ProbeError::Socket(e)
        }
    }
}

/// Errors of the startup privilege check.
#[derive(Error, Debug)]
pub enum PrivilegeError {
    #[error("unable to get current user (uid {0})")]
    UnknownUser(u32),

    #[error("this program should be run as root, current user is {0}")]
    NotRoot(String),

    #[error("privilege check is not supported on this platform")]
    Unsupported,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_error_keeps_permission_denied_apart() {
        let denied = io::Error::from(io::ErrorKind::PermissionDenied);
        assert!(matches!(ProbeError::socket(denied), ProbeError::PermissionDenied));

        let other = io::Error::from(io::ErrorKind::AddrNotAvailable);
        assert!(matches!(ProbeError::socket(other), ProbeError::Socket(_)));
    }

    #[test]
    fn not_root_message_names_the_user() {
        let e = PrivilegeError::NotRoot("alice".to_string());
        assert_eq!(
            e.to_string(),
            "this program should be run as root, current user is alice"
        );
    }
}
