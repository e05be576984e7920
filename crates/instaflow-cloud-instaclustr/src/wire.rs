//! Wire helpers shared by the resource families

use serde::{Deserialize, Serialize, Serializer};
use std::fmt::Display;

/// An address block as the API reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    pub network: String,
    pub prefix_length: u8,
}

impl Network {
    /// Parse `a.b.c.d/len`.
    pub fn parse(cidr: &str) -> Option<Self> {
        let (network, prefix) = cidr.split_once('/')?;
        if network.is_empty() {
            return None;
        }
        let prefix_length = prefix.parse::<u8>().ok().filter(|p| *p <= 128)?;
        Some(Self {
            network: network.to_string(),
            prefix_length,
        })
    }

    /// `a.b.c.d/len` notation
    pub fn cidr(&self) -> String {
        format!("{}/{}", self.network, self.prefix_length)
    }
}

/// The API takes booleans and counts as JSON strings in request bodies.
pub(crate) fn as_string<T: Display, S: Serializer>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}
