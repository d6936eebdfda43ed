pub use crate::api::{Api, ApiInterface, ApiTarget, CallScope, OperationDecl, OperationFn, Vtable};
pub use crate::callback::{Callback, CallbackKind};
pub use crate::connection::{ApiConnection, ApiId, CallbackId, RequestId, Transport};
pub use crate::error::{ErrorKind, RpcError};
pub use crate::json;
pub use crate::messages::OpRef;
pub use crate::result::RpcResult;
pub use crate::value::{from_variant, to_variant, Variant, VariantObject};
pub use ahash::AHashMap;
pub use async_trait::async_trait;
pub use ferrite_core::channel::{oneshot, Channel, Receiver, Sender};
pub use ferrite_log::prelude::*;
pub use serde::{de::DeserializeOwned, Deserialize, Serialize};
pub use std::fmt::Debug;
pub use std::marker::PhantomData;
pub use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
pub use std::sync::{Arc, Mutex, Weak};
