//! # Router Errors
//!
//! Every failure of the routing and liquidity engine surfaces as a [`RouterError`].
//! All of them abort the current top-level call; the chain checkpoint taken on entry
//! is reverted so callers never observe partial token movements.
//!
//! Off-chain tooling can use [`RouterError::category`] to tell slippage apart from
//! misconfiguration or an unsupported venue without matching on every variant.

use ethers::types::{Address, U256};
use thiserror::Error;

use crate::venue::{EndpointKind, VenueId};

/// Coarse classification of router failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed input: zero address, zero amount, short path, ...
    Validation,
    /// Registry / route store does not allow the requested operation.
    Configuration,
    /// No pool could be found for a pair.
    Discovery,
    /// Slippage bound or ratio arithmetic failure.
    Economic,
    /// The route recursion bound was hit.
    ResourceBound,
    /// A collaborator call (token, venue endpoint, checkpoint) failed.
    Chain,
}

impl ErrorCategory {
    /// Metric / log label.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Discovery => "discovery",
            ErrorCategory::Economic => "economic",
            ErrorCategory::ResourceBound => "resource_bound",
            ErrorCategory::Chain => "chain",
        }
    }
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("zero address supplied for {0}")]
    ZeroAddress(&'static str),

    #[error("amount must be greater than zero")]
    ZeroAmount,

    #[error("token in and token out are identical: {0:?}")]
    IdenticalTokens(Address),

    #[error("path must contain at least two tokens, got {0}")]
    PathTooShort(usize),

    #[error("amount {0} does not fit into a 128-bit venue quantity")]
    AmountOverflow(U256),

    #[error("liquidity target is not valid for venue {0}")]
    TargetMismatch(VenueId),

    #[error("deadline {deadline} has passed, block timestamp is {now}")]
    DeadlineExpired { deadline: U256, now: U256 },

    #[error("{owner:?} holds {held} position units, {requested} requested")]
    InsufficientPosition {
        owner: Address,
        held: U256,
        requested: U256,
    },

    #[error("unsupported venue: {0}")]
    UnsupportedVenue(String),

    #[error("venue {venue} has no {endpoint} endpoint configured")]
    MissingEndpoint {
        venue: VenueId,
        endpoint: EndpointKind,
    },

    #[error("no route configured from {from:?} to {to:?}")]
    NoRoute { from: Address, to: Address },

    #[error("invalid route: {0}")]
    InvalidRoute(String),

    #[error("caller {0:?} is not the router operator")]
    Unauthorized(Address),

    #[error("no pool found for {token_a:?}/{token_b:?} on {venue}")]
    NoPool {
        token_a: Address,
        token_b: Address,
        venue: VenueId,
    },

    #[error("no pool for multihop step {token_a:?}/{token_b:?} on {venue}")]
    NoPoolForMultihop {
        token_a: Address,
        token_b: Address,
        venue: VenueId,
    },

    #[error("insufficient output: received {actual}, minimum {minimum}")]
    InsufficientOutput { actual: U256, minimum: U256 },

    #[error("zero total ratio while splitting liquidity input")]
    ZeroTotalRatio,

    #[error("arithmetic overflow in {0}")]
    Overflow(&'static str),

    #[error("path length exceeded: route expansion reached {max} descents")]
    PathLengthExceeded { max: usize },

    #[error(transparent)]
    Chain(#[from] anyhow::Error),
}

impl RouterError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            RouterError::ZeroAddress(_)
            | RouterError::ZeroAmount
            | RouterError::IdenticalTokens(_)
            | RouterError::PathTooShort(_)
            | RouterError::AmountOverflow(_)
            | RouterError::TargetMismatch(_)
            | RouterError::DeadlineExpired { .. }
            | RouterError::InsufficientPosition { .. } => ErrorCategory::Validation,
            RouterError::UnsupportedVenue(_)
            | RouterError::MissingEndpoint { .. }
            | RouterError::NoRoute { .. }
            | RouterError::InvalidRoute(_)
            | RouterError::Unauthorized(_) => ErrorCategory::Configuration,
            RouterError::NoPool { .. } | RouterError::NoPoolForMultihop { .. } => {
                ErrorCategory::Discovery
            }
            RouterError::InsufficientOutput { .. }
            | RouterError::ZeroTotalRatio
            | RouterError::Overflow(_) => ErrorCategory::Economic,
            RouterError::PathLengthExceeded { .. } => ErrorCategory::ResourceBound,
            RouterError::Chain(_) => ErrorCategory::Chain,
        }
    }
}

pub type RouterResult<T> = Result<T, RouterError>;

/// Rejects the zero address for the named argument.
pub fn ensure_address(address: Address, what: &'static str) -> RouterResult<()> {
    if address.is_zero() {
        return Err(RouterError::ZeroAddress(what));
    }
    Ok(())
}

/// Rejects a zero amount.
pub fn ensure_amount(amount: U256) -> RouterResult<()> {
    if amount.is_zero() {
        return Err(RouterError::ZeroAmount);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(RouterError::ZeroAmount.category(), ErrorCategory::Validation);
        assert_eq!(
            RouterError::UnsupportedVenue("99".into()).category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            RouterError::InsufficientOutput {
                actual: U256::from(1),
                minimum: U256::from(2)
            }
            .category(),
            ErrorCategory::Economic
        );
        assert_eq!(
            RouterError::PathLengthExceeded { max: 20 }.category(),
            ErrorCategory::ResourceBound
        );
        assert_eq!(
            RouterError::from(anyhow::anyhow!("execution reverted")).category(),
            ErrorCategory::Chain
        );
        assert_eq!(
            RouterError::DeadlineExpired {
                deadline: U256::from(10),
                now: U256::from(11)
            }
            .category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            RouterError::InsufficientPosition {
                owner: Address::repeat_byte(0x66),
                held: U256::zero(),
                requested: U256::one()
            }
            .category(),
            ErrorCategory::Validation
        );
    }

    #[test]
    fn test_ensure_helpers() {
        assert!(ensure_address(Address::zero(), "recipient").is_err());
        assert!(ensure_address(Address::repeat_byte(1), "recipient").is_ok());
        assert!(matches!(ensure_amount(U256::zero()), Err(RouterError::ZeroAmount)));
        assert!(ensure_amount(U256::one()).is_ok());
    }
}
