//! Case-insensitive handling of layer type names.
//!
//! Type names such as `Convolution`, `convolution` and `CONVOLUTION` all refer
//! to the same layer type. Every place that compares or stores type names goes
//! through this module.

use std::fmt;
use std::hash::{Hash, Hasher};

/// Compares two type names ignoring ASCII case.
pub fn eq(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Map key that hashes and compares its string ignoring ASCII case,
/// while remembering the spelling it was created with.
#[derive(Debug, Clone)]
pub struct CaselessKey(String);

impl CaselessKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The name as it was originally spelled.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for CaselessKey {
    fn eq(&self, other: &Self) -> bool {
        eq(&self.0, &other.0)
    }
}

impl Eq for CaselessKey {}

impl Hash for CaselessKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for byte in self.0.bytes() {
            state.write_u8(byte.to_ascii_lowercase());
        }
        state.write_u8(0xff);
    }
}

impl fmt::Display for CaselessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CaselessKey {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}
