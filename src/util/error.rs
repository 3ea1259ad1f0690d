use crate::config::ConfigError;
use crate::membership::MembershipError;
use crate::peer::EndorserError;
use crate::status::{ClientCode, Status, StatusGroup};
use thiserror::Error;

/// Error returned by the public client surface.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Status(#[from] Status),
    #[error("multiple errors occurred: [{}]", join_errors(.0))]
    Multiple(Vec<ClientError>),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Membership(#[from] MembershipError),
    #[error(transparent)]
    Endorser(#[from] EndorserError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("channel context is missing {0}")]
    MissingCollaborator(&'static str),
}

fn join_errors(errors: &[ClientError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ClientError {
    /// Collapses a list of errors; a single error is returned as is.
    pub fn multiple(mut errors: Vec<ClientError>) -> Self {
        if errors.len() == 1 {
            if let Some(err) = errors.pop() {
                return err;
            }
        }
        ClientError::Multiple(errors)
    }

    pub fn status(&self) -> Option<&Status> {
        match self {
            ClientError::Status(status) => Some(status),
            _ => None,
        }
    }

    /// Every peer endpoint this error can be attributed to.
    pub fn endpoints(&self) -> Vec<&str> {
        let mut endpoints = Vec::new();
        self.collect_endpoints(&mut endpoints);
        endpoints
    }

    fn collect_endpoints<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            ClientError::Status(status) => {
                if let Some(endpoint) = status.endpoint() {
                    out.push(endpoint);
                }
            }
            ClientError::Multiple(errors) => {
                for err in errors {
                    err.collect_endpoints(out);
                }
            }
            _ => {}
        }
    }

    /// Visits every status contained in this error, including nested ones.
    pub fn any_status(&self, predicate: &dyn Fn(&Status) -> bool) -> bool {
        match self {
            ClientError::Status(status) => predicate(status),
            ClientError::Multiple(errors) => errors.iter().any(|err| err.any_status(predicate)),
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.status().map(Status::is_timeout).unwrap_or(false)
    }

    pub fn is_client_code(&self, group: StatusGroup, code: ClientCode) -> bool {
        self.status().map(|s| s.is(group, code)).unwrap_or(false)
    }
}
