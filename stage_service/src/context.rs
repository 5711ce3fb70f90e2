use crate::i18n::Lang;

/// Who is calling and on behalf of which gateway. Resolved once per request
/// and passed explicitly to every write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub gateway_id: i64,
    pub username: String,
    pub lang: Lang,
}

impl RequestContext {
    pub fn new(gateway_id: i64, username: impl Into<String>) -> Self {
        Self {
            gateway_id,
            username: username.into(),
            lang: Lang::Zh,
        }
    }

    pub fn with_lang(mut self, lang: Lang) -> Self {
        self.lang = lang;
        self
    }
}
