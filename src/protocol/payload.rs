use serde::{Deserialize, Serialize};

use crate::error::DriverError;

/// Body of a `find` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindRequest<Q> {
    /// Collection name
    pub cl: String,
    pub query: Option<Q>,
}

impl<Q> FindRequest<Q> {
    pub fn new(collection: &str, query: Option<Q>) -> Self {
        Self {
            cl: collection.to_string(),
            query,
        }
    }
}

/// Encode a request body (named serialization, so maps keep string keys)
pub fn encode_payload<T: Serialize>(msg: &T) -> Result<Vec<u8>, DriverError> {
    Ok(rmp_serde::to_vec_named(msg)?)
}

/// Decode a response body
pub fn decode_payload<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, DriverError> {
    Ok(rmp_serde::from_slice(data)?)
}
