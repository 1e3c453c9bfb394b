// 📨 Tracking request strings
// Ordered, form-encoded `key=value&...` parameters as sent to the entrypoint

use std::fmt;

fn encode(text: &str) -> String {
    urlencoding::encode(text).into_owned()
}

fn decode(text: &str) -> String {
    urlencoding::decode(text)
        .map(|d| d.into_owned())
        .unwrap_or_else(|_| text.to_string())
}

/// Parameters kept in insertion order, stored already encoded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestParams {
    pairs: Vec<(String, String)>,
}

impl RequestParams {
    pub fn new() -> Self {
        RequestParams { pairs: Vec::new() }
    }

    /// Parse an encoded request; a leading `?` or `&` and empty segments are ignored
    pub fn parse(request: &str) -> Self {
        let pairs = request
            .trim_start_matches(['?', '&'])
            .split('&')
            .filter(|segment| !segment.is_empty())
            .map(|segment| match segment.split_once('=') {
                Some((key, value)) => (key.to_string(), value.to_string()),
                None => (segment.to_string(), String::new()),
            })
            .collect();

        RequestParams { pairs }
    }

    /// Append a parameter, encoding both key and value
    pub fn push(&mut self, key: &str, value: &str) {
        self.pairs.push((encode(key), encode(value)));
    }

    /// Replace the first occurrence of `key` (dropping later ones) or append it
    pub fn set(&mut self, key: &str, value: &str) {
        let encoded_key = encode(key);
        match self.pairs.iter().position(|(k, _)| *k == encoded_key) {
            Some(index) => {
                self.pairs[index].1 = encode(value);
                let mut seen = 0;
                self.pairs.retain(|(k, _)| {
                    if *k != encoded_key {
                        return true;
                    }
                    seen += 1;
                    seen == 1
                });
            }
            None => self.pairs.push((encoded_key, encode(value))),
        }
    }

    /// Remove every occurrence of `key`
    pub fn remove(&mut self, key: &str) {
        let encoded_key = encode(key);
        self.pairs.retain(|(k, _)| *k != encoded_key);
    }

    /// Decoded value of the first occurrence of `key`
    pub fn get(&self, key: &str) -> Option<String> {
        let encoded_key = encode(key);
        self.pairs
            .iter()
            .find(|(k, _)| *k == encoded_key)
            .map(|(_, v)| decode(v))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Decoded keys in order
    pub fn keys(&self) -> Vec<String> {
        self.pairs.iter().map(|(k, _)| decode(k)).collect()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl fmt::Display for RequestParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, (key, value)) in self.pairs.iter().enumerate() {
            if index > 0 {
                f.write_str("&")?;
            }
            write!(f, "{}={}", key, value)?;
        }
        Ok(())
    }
}
