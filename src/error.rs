//! Closed error taxonomy for network controller data operations.
//!
//! These values are returned, never thrown, from the path-addressed data
//! APIs (`update_data`, `get_data`, `reset_data`, list operations) and from
//! counter/connection lookups. The control handler layer converts any
//! `NetError` into an `ErrorReply{error: kind_name, detail}` envelope. The
//! one exception is [`NetError::MessageNotUnique`], which the name
//! resolution helper raises as a genuine `Result::Err` rather than
//! returning as a value, because it signals a configuration error rather
//! than an operational one.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NetError {
    #[error("{0}")]
    Generic(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not a list: {0}")]
    NotAList(String),

    #[error("index out of range: {0}")]
    IndexOutOfRange(String),

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("message not found: {0}")]
    MessageNotFound(String),

    #[error("message name is not unique across nodes: {0}")]
    MessageNotUnique(String),

    #[error("message is not an outgoing message: {0}")]
    NotOutMessage(String),
}

impl NetError {
    /// Stable string tag used verbatim as the control protocol's
    /// `ErrorReply.error` field.
    pub fn kind_name(&self) -> &'static str {
        match self {
            NetError::Generic(_) => "GENERIC",
            NetError::NotFound(_) => "NOT_FOUND",
            NetError::NotAList(_) => "NOT_A_LIST",
            NetError::IndexOutOfRange(_) => "INDEX_OUT_OF_RANGE",
            NetError::NodeNotFound(_) => "NODE_NOT_FOUND",
            NetError::MessageNotFound(_) => "MESSAGE_NOT_FOUND",
            NetError::MessageNotUnique(_) => "MESSAGE_NOT_UNIQUE",
            NetError::NotOutMessage(_) => "NOT_OUT_MESSAGE",
        }
    }

    pub fn detail(&self) -> String {
        self.to_string()
    }
}

pub type NetResult<T> = Result<T, NetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_are_stable() {
        assert_eq!(NetError::Generic("x".into()).kind_name(), "GENERIC");
        assert_eq!(NetError::NotFound("x".into()).kind_name(), "NOT_FOUND");
        assert_eq!(NetError::NotAList("x".into()).kind_name(), "NOT_A_LIST");
        assert_eq!(
            NetError::IndexOutOfRange("x".into()).kind_name(),
            "INDEX_OUT_OF_RANGE"
        );
        assert_eq!(NetError::NodeNotFound("x".into()).kind_name(), "NODE_NOT_FOUND");
        assert_eq!(
            NetError::MessageNotFound("x".into()).kind_name(),
            "MESSAGE_NOT_FOUND"
        );
        assert_eq!(
            NetError::MessageNotUnique("x".into()).kind_name(),
            "MESSAGE_NOT_UNIQUE"
        );
        assert_eq!(NetError::NotOutMessage("x".into()).kind_name(), "NOT_OUT_MESSAGE");
    }
}
