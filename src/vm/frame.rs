use std::collections::HashMap;

use super::value::Handle;

/// One function activation: the frame's named-variable bindings plus the
/// executing function value, pinned here so its captured environment stays
/// reachable for the collector and for name resolution.
#[derive(Debug, Default)]
pub struct Frame {
    pub named: HashMap<Vec<u8>, Handle>,
    pub function: Option<Handle>,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_function(function: Handle) -> Self {
        Self {
            named: HashMap::new(),
            function: Some(function),
        }
    }
}
