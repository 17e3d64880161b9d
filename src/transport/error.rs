//! RPC error classification helpers.

use alloy::transports::{RpcError, TransportError, TransportErrorKind};

/// How a failed RPC call should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcErrorClass {
    /// The endpoint is throttling us. Back off, then retry or fail over.
    RateLimited,
    /// The endpoint is unreachable or misbehaving. Fail over, then retry.
    Network,
    /// Retrying cannot help. Propagate immediately.
    Terminal,
}

/// JSON-RPC error code some providers use for rate limiting.
const LIMIT_EXCEEDED_CODE: i64 = -32005;

/// An extension trait for [`TransportError`].
pub trait TransportErrExt {
    /// Classifies the error for the failover loop.
    fn classify(&self) -> RpcErrorClass;

    /// Whether this error signals rate limiting.
    fn is_rate_limited(&self) -> bool {
        self.classify() == RpcErrorClass::RateLimited
    }
}

impl TransportErrExt for TransportError {
    fn classify(&self) -> RpcErrorClass {
        match self {
            RpcError::ErrorResp(resp) => {
                let message = resp.message.to_lowercase();
                if resp.code == LIMIT_EXCEEDED_CODE
                    || message.contains("rate limit")
                    || message.contains("too many requests")
                {
                    RpcErrorClass::RateLimited
                } else {
                    RpcErrorClass::Terminal
                }
            }
            RpcError::Transport(kind) => {
                if let TransportErrorKind::HttpError(http) = kind
                    && http.status == 429
                {
                    return RpcErrorClass::RateLimited;
                }
                RpcErrorClass::Network
            }
            RpcError::NullResp => RpcErrorClass::Network,
            _ => RpcErrorClass::Terminal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::rpc::json_rpc::ErrorPayload;

    fn error_resp(code: i64, message: &str) -> TransportError {
        RpcError::ErrorResp(ErrorPayload {
            code,
            message: message.to_string().into(),
            data: None,
        })
    }

    #[test]
    fn rate_limit_responses() {
        assert!(error_resp(LIMIT_EXCEEDED_CODE, "limit exceeded").is_rate_limited());
        assert!(error_resp(-32000, "Too Many Requests").is_rate_limited());
        assert!(error_resp(-32000, "rate limit reached").is_rate_limited());
    }

    #[test]
    fn revert_is_terminal() {
        assert_eq!(error_resp(3, "execution reverted").classify(), RpcErrorClass::Terminal);
    }

    #[test]
    fn transport_failures_are_network() {
        let err = TransportErrorKind::custom_str("connection refused");
        assert_eq!(err.classify(), RpcErrorClass::Network);
    }
}
