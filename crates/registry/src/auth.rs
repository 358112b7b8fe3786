//! Optional authentication interception, per spec section 6 "Auth
//! service". No C++ counterpart ships a pluggable auth backend in the
//! retrieved sources; this is grounded on the teacher's async-trait
//! service pattern instead.

use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct AuthRequestData {
    pub vhost: String,
    pub mechanism: String,
    pub credentials: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    Allow,
    Deny(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResponseData {
    pub decision: AuthDecision,
}

impl AuthResponseData {
    pub fn allow() -> Self {
        AuthResponseData {
            decision: AuthDecision::Allow,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        AuthResponseData {
            decision: AuthDecision::Deny(reason.into()),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self.decision, AuthDecision::Allow)
    }
}

#[async_trait]
pub trait AuthIntercept: Send + Sync {
    async fn authenticate(&self, request: &AuthRequestData) -> AuthResponseData;
}

/// The out-of-the-box behaviour: every vhost/mechanism/credential
/// combination is allowed. Installed unless an operator wires in a
/// real backend.
pub struct DefaultAuthIntercept;

#[async_trait]
impl AuthIntercept for DefaultAuthIntercept {
    async fn authenticate(&self, _request: &AuthRequestData) -> AuthResponseData {
        AuthResponseData::allow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_intercept_always_allows() {
        let intercept = DefaultAuthIntercept;
        let request = AuthRequestData {
            vhost: "/".to_string(),
            mechanism: "PLAIN".to_string(),
            credentials: b"\0guest\0guest".to_vec(),
        };
        let response = intercept.authenticate(&request).await;
        assert!(response.is_allowed());
    }
}
