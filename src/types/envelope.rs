//! The one response envelope of the read API: `{ "data": ... }`

use serde::{Deserialize, Serialize};

/// Successful response body
///
/// Decoding rejects unknown top-level fields, so a change of response shape
/// surfaces as a parse error instead of being guessed around.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DataEnvelope<T> {
    pub data: T,
}

impl<T> DataEnvelope<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}
