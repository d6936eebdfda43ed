pub type RpcResult<T> = std::result::Result<T, crate::error::RpcError>;
