//! A2A request errors and their JSON-RPC codes

use thiserror::Error;

use crate::convert::ConversionError;
use crate::protocol::{
    INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, JsonRpcError, METHOD_NOT_FOUND, PARSE_ERROR,
    TASK_NOT_FOUND, UNSUPPORTED_OPERATION,
};

#[derive(Debug, Error)]
pub enum A2aError {
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Method not found: {0}")]
    MethodNotFound(String),
    #[error("Invalid params: {0}")]
    InvalidParams(String),
    #[error("Task not found: {0}")]
    TaskNotFound(String),
    #[error("This operation is not supported")]
    UnsupportedOperation,
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl A2aError {
    pub fn code(&self) -> i32 {
        match self {
            Self::Parse(_) => PARSE_ERROR,
            Self::InvalidRequest(_) => INVALID_REQUEST,
            Self::MethodNotFound(_) => METHOD_NOT_FOUND,
            Self::InvalidParams(_) | Self::Conversion(_) => INVALID_PARAMS,
            Self::TaskNotFound(_) => TASK_NOT_FOUND,
            Self::UnsupportedOperation => UNSUPPORTED_OPERATION,
            Self::Internal(_) => INTERNAL_ERROR,
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }

    pub fn to_rpc(&self) -> JsonRpcError {
        JsonRpcError {
            code: self.code(),
            message: format!("{:#}", self),
            data: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(A2aError::UnsupportedOperation.code(), -32004);
        assert_eq!(A2aError::TaskNotFound("t".into()).code(), -32001);
        assert_eq!(
            A2aError::Conversion(ConversionError::UnsupportedPart("x".into())).code(),
            -32602
        );
        let internal = A2aError::from(anyhow::anyhow!("model exploded"));
        assert!(internal.is_internal());
        assert_eq!(internal.to_rpc().code, -32603);
        assert!(internal.to_rpc().message.contains("model exploded"));
    }
}
