use std::{borrow::Cow, collections::BTreeMap};

use super::Code;

/// Query-string style parameters. Repeated keys accumulate their values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    inner: BTreeMap<String, Vec<String>>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `value` to the list stored under `key`.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.inner.entry(key.into()).or_default().push(value.into());
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.inner.get(key).map(Vec::as_slice)
    }

    /// First value stored under `key`.
    pub fn first(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| v.first()).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Iterates over every `(key, value)` pair, keys in order, values in
    /// insertion order.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner
            .iter()
            .flat_map(|(k, values)| values.iter().map(move |v| (k.as_str(), v.as_str())))
    }
}

impl<K, V> FromIterator<(K, V)> for Params
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}

/// The logical unit exchanged over the wire.
///
/// `content` of `None` is distinct from empty content and survives the codec
/// as such.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub code: Code,
    pub content: Option<Vec<u8>>,
    pub params: Params,
}

impl Message {
    pub fn new(code: Code) -> Self {
        Self {
            code,
            content: None,
            params: Params::default(),
        }
    }

    pub fn with_content(mut self, content: impl Into<Vec<u8>>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key, value);
        self
    }

    pub fn success(content: impl Into<Vec<u8>>) -> Self {
        Self::new(Code::SUCCESS).with_content(content)
    }

    pub fn error(description: impl Into<String>) -> Self {
        Self::new(Code::ERROR).with_content(description.into())
    }

    pub fn is_success(&self) -> bool {
        self.code == Code::SUCCESS
    }

    /// Content as text, replacing invalid UTF-8 sequences.
    pub fn text(&self) -> Option<Cow<'_, str>> {
        self.content.as_deref().map(String::from_utf8_lossy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_accumulate_repeated_keys() {
        let params: Params = [("a", "1"), ("b", "2"), ("a", "3")].into_iter().collect();

        assert_eq!(params.len(), 2);
        assert_eq!(params.get("a").unwrap(), ["1", "3"]);
        assert_eq!(params.first("b"), Some("2"));
        assert_eq!(
            params.pairs().collect::<Vec<_>>(),
            vec![("a", "1"), ("a", "3"), ("b", "2")]
        );
    }

    #[test]
    fn message_builders() {
        let msg = Message::new(Code::CMD)
            .with_content("uname -a")
            .with_param("shell", "sh");

        assert_eq!(msg.text().unwrap(), "uname -a");
        assert_eq!(msg.params.first("shell"), Some("sh"));
        assert!(!msg.is_success());
        assert!(Message::success("ok").is_success());
        assert_eq!(Message::new(Code::PWD).content, None);
    }
}
