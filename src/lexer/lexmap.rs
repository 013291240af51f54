use std::collections::HashMap;

use super::Token;

/// The fixed keyword/punctuation table. `can_match` asks whether any entry
/// starts with the given prefix, which is what drives longest-match lexing.
#[derive(Debug, Clone, Default)]
pub struct LexMap {
    map: HashMap<&'static str, Token>,
}

impl LexMap {
    pub fn insert(&mut self, key: &'static str, value: Token) {
        self.map.insert(key, value);
    }

    pub fn can_match(&self, key: &[u8]) -> bool {
        for map_key in self.map.keys() {
            if map_key.as_bytes().starts_with(key) {
                return true;
            }
        }
        false
    }

    pub fn get(&self, key: &[u8]) -> Option<Token> {
        self.map
            .iter()
            .find(|(map_key, _)| map_key.as_bytes() == key)
            .map(|(_, token)| token.clone())
    }
}
