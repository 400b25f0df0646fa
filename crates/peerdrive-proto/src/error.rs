//! Protocol error types

use thiserror::Error;

use peerdrive_core::domain::ExchangeId;

use crate::message::MessageKind;

/// Errors raised inside the protocol engine
///
/// A wrong-typed message is logged and dropped by whoever sees it; it
/// never crashes an exchange, it just fails to count toward completion.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtoError {
    /// A message of an unexpected kind arrived for an exchange
    #[error("expected {expected} for exchange {exchange_id} but got {got}")]
    UnexpectedMessage {
        exchange_id: ExchangeId,
        expected: MessageKind,
        got: MessageKind,
    },

    /// No handler is registered for a request kind
    #[error("no handler registered for {0} requests")]
    NoHandler(MessageKind),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unexpected_message_display() {
        let err = ProtoError::UnexpectedMessage {
            exchange_id: ExchangeId::new(),
            expected: MessageKind::OfferResponse,
            got: MessageKind::PushResponse,
        };
        let text = err.to_string();
        assert!(text.contains("OfferResponse"));
        assert!(text.contains("PushResponse"));
    }
}
