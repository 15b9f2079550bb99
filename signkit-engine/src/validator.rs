//! Namespace and payload validation.
//!
//! Pure functions over protocol values. A failure is a [`ValidationError`]
//! that converts both into the caller-facing [`SignError`] and into the
//! [`PeerError`] sent back to a peer whose request failed validation.

use std::collections::BTreeSet;

use serde_json::Value;
use signkit_lib::{SignError, WEEK_IN_SECONDS};

use crate::namespace::{
    account_chain, is_chain_id, is_namespace_key, ProposalNamespaces, SessionNamespaces,
};
use crate::rpc::{EventParams, PeerError, SessionRequestParams};

/// Validation failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("unsupported namespace key: {0}")]
    UnsupportedNamespaceKey(String),

    #[error("unsupported chains: {0}")]
    UnsupportedChains(String),

    #[error("unsupported accounts: {0}")]
    UnsupportedAccounts(String),

    #[error("unsupported methods: {0}")]
    UnsupportedMethods(String),

    #[error("unsupported events: {0}")]
    UnsupportedEvents(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("invalid extend: {0}")]
    InvalidExtend(String),

    #[error("unauthorized method: {0}")]
    UnauthorizedMethod(String),

    #[error("unauthorized event: {0}")]
    UnauthorizedEvent(String),
}

impl ValidationError {
    /// Whether the failure concerns namespace structure.
    pub fn is_namespace(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedNamespaceKey(_)
                | Self::UnsupportedChains(_)
                | Self::UnsupportedAccounts(_)
                | Self::UnsupportedMethods(_)
                | Self::UnsupportedEvents(_)
        )
    }

    /// Peer-facing error for a request that failed this validation.
    pub fn to_peer_error(&self) -> PeerError {
        match self {
            Self::UnsupportedNamespaceKey(m) => PeerError::unsupported_namespace_key(m),
            Self::UnsupportedChains(m) => PeerError::unsupported_chains(m),
            Self::UnsupportedAccounts(m) => PeerError::unsupported_accounts(m),
            Self::UnsupportedMethods(m) => PeerError::unsupported_methods(m),
            Self::UnsupportedEvents(m) => PeerError::unsupported_events(m),
            Self::InvalidRequest(m) => PeerError::invalid_method(m),
            Self::InvalidEvent(m) => PeerError::invalid_event(m),
            Self::InvalidExtend(m) => PeerError::invalid_extend_request(m),
            Self::UnauthorizedMethod(m) => PeerError::unauthorized_method(m),
            Self::UnauthorizedEvent(m) => PeerError::unauthorized_event(m),
        }
    }
}

impl From<ValidationError> for SignError {
    fn from(err: ValidationError) -> Self {
        let message = err.to_string();
        match err {
            ValidationError::InvalidRequest(_) => SignError::InvalidRequest(message),
            ValidationError::InvalidEvent(_) => SignError::InvalidEvent(message),
            ValidationError::InvalidExtend(_) => SignError::InvalidExtend(message),
            ValidationError::UnauthorizedMethod(_) => SignError::UnauthorizedMethod(message),
            ValidationError::UnauthorizedEvent(_) => SignError::UnauthorizedEvent(message),
            _ => SignError::InvalidNamespace(message),
        }
    }
}

/// Result of a validation.
pub type ValidationResult = std::result::Result<(), ValidationError>;

/// Validate namespaces requested by a proposal.
///
/// Every key must be a valid namespace key and every namespace must list at
/// least one CAIP-2 chain belonging to that key.
pub fn validate_proposal_namespaces(namespaces: &ProposalNamespaces) -> ValidationResult {
    if namespaces.is_empty() {
        return Err(ValidationError::UnsupportedNamespaceKey(
            "no namespaces requested".into(),
        ));
    }

    for (key, namespace) in namespaces {
        if !is_namespace_key(key) {
            return Err(ValidationError::UnsupportedNamespaceKey(key.clone()));
        }
        if namespace.chains.is_empty() {
            return Err(ValidationError::UnsupportedChains(format!(
                "namespace {} declares no chains",
                key
            )));
        }
        for chain in &namespace.chains {
            if !is_chain_id(chain) || chain_namespace(chain) != Some(key.as_str()) {
                return Err(ValidationError::UnsupportedChains(format!(
                    "{} is not a chain of namespace {}",
                    chain, key
                )));
            }
        }
    }
    Ok(())
}

/// Validate that session namespaces narrow the proposal they answer.
///
/// Violations are rejected, never clamped.
pub fn validate_session_namespaces(
    namespaces: &SessionNamespaces,
    proposal: &ProposalNamespaces,
) -> ValidationResult {
    if namespaces.is_empty() {
        return Err(ValidationError::UnsupportedNamespaceKey(
            "no namespaces granted".into(),
        ));
    }

    for (key, namespace) in namespaces {
        let requested = proposal.get(key).ok_or_else(|| {
            ValidationError::UnsupportedNamespaceKey(format!("{} was not requested", key))
        })?;

        if namespace.accounts.is_empty() {
            return Err(ValidationError::UnsupportedAccounts(format!(
                "namespace {} grants no accounts",
                key
            )));
        }
        for account in &namespace.accounts {
            let chain = account_chain(account).ok_or_else(|| {
                ValidationError::UnsupportedAccounts(format!("{} is not a CAIP-10 account", account))
            })?;
            if !requested.chains.iter().any(|c| c == chain) {
                return Err(ValidationError::UnsupportedChains(format!(
                    "{} was not requested in namespace {}",
                    chain, key
                )));
            }
        }

        let methods: BTreeSet<&str> = requested.methods.iter().map(String::as_str).collect();
        if let Some(method) = namespace.methods.iter().find(|m| !methods.contains(m.as_str())) {
            return Err(ValidationError::UnsupportedMethods(format!(
                "{} was not requested in namespace {}",
                method, key
            )));
        }

        let events: BTreeSet<&str> = requested.events.iter().map(String::as_str).collect();
        if let Some(event) = namespace.events.iter().find(|e| !events.contains(e.as_str())) {
            return Err(ValidationError::UnsupportedEvents(format!(
                "{} was not requested in namespace {}",
                event, key
            )));
        }
    }
    Ok(())
}

/// Validate the shape of a session request.
pub fn validate_session_request(request: &SessionRequestParams) -> ValidationResult {
    if !is_chain_id(&request.chain_id) {
        return Err(ValidationError::InvalidRequest(format!(
            "invalid chain id {}",
            request.chain_id
        )));
    }
    if request.request.method.is_empty() {
        return Err(ValidationError::InvalidRequest("empty method".into()));
    }
    if request.request.params.is_empty() {
        return Err(ValidationError::InvalidRequest("empty params".into()));
    }
    Ok(())
}

/// Validate the shape of a session event.
pub fn validate_event(event: &EventParams) -> ValidationResult {
    if !is_chain_id(&event.chain_id) {
        return Err(ValidationError::InvalidEvent(format!(
            "invalid chain id {}",
            event.chain_id
        )));
    }
    if event.event.name.is_empty() {
        return Err(ValidationError::InvalidEvent("empty event name".into()));
    }
    let empty_data = match &event.event.data {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    };
    if empty_data {
        return Err(ValidationError::InvalidEvent("empty event data".into()));
    }
    Ok(())
}

/// Validate that `method` may be called on `chain_id` within the session.
pub fn validate_method_authorization(
    chain_id: &str,
    method: &str,
    namespaces: &SessionNamespaces,
) -> ValidationResult {
    let authorized = namespaces
        .values()
        .any(|ns| ns.has_chain(chain_id) && ns.methods.iter().any(|m| m == method));
    if authorized {
        Ok(())
    } else {
        Err(ValidationError::UnauthorizedMethod(format!(
            "{} on {}",
            method, chain_id
        )))
    }
}

/// Validate that `event` may be emitted on `chain_id` within the session.
pub fn validate_event_authorization(
    chain_id: &str,
    event: &str,
    namespaces: &SessionNamespaces,
) -> ValidationResult {
    let authorized = namespaces
        .values()
        .any(|ns| ns.has_chain(chain_id) && ns.events.iter().any(|e| e == event));
    if authorized {
        Ok(())
    } else {
        Err(ValidationError::UnauthorizedEvent(format!(
            "{} on {}",
            event, chain_id
        )))
    }
}

/// Validate an extension: the expiry must grow, by at most a week.
pub fn validate_extend(new_expiry: i64, current_expiry: i64) -> ValidationResult {
    if new_expiry <= current_expiry {
        return Err(ValidationError::InvalidExtend(format!(
            "expiry {} does not extend {}",
            new_expiry, current_expiry
        )));
    }
    if new_expiry - current_expiry > WEEK_IN_SECONDS as i64 {
        return Err(ValidationError::InvalidExtend(format!(
            "expiry {} extends {} by more than a week",
            new_expiry, current_expiry
        )));
    }
    Ok(())
}

fn chain_namespace(chain_id: &str) -> Option<&str> {
    chain_id.split_once(':').map(|(namespace, _)| namespace)
}
