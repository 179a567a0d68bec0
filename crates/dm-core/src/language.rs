//! Localized word lists.

use std::collections::HashMap;

/// `{name, words}` for one language (e.g. `"en"`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LanguagePack {
    pub name: String,
    pub words: HashMap<String, String>,
}

impl LanguagePack {
    pub fn new(name: impl Into<String>, words: HashMap<String, String>) -> Self {
        Self {
            name: name.into(),
            words,
        }
    }
}

impl From<LanguagePack> for dm_proto::LanguagePackPayload {
    fn from(pack: LanguagePack) -> Self {
        dm_proto::LanguagePackPayload {
            name: pack.name,
            words: pack.words,
        }
    }
}

impl From<dm_proto::LanguagePackPayload> for LanguagePack {
    fn from(payload: dm_proto::LanguagePackPayload) -> Self {
        LanguagePack {
            name: payload.name,
            words: payload.words,
        }
    }
}
