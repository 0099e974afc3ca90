use tracing::debug;

use crate::Service;

/// Whitespace separated `key=value` tokens, split on the first `=`.
///
/// Tokens without `=` (or with an empty key) are not an error; they are kept
/// in `skipped` so callers can report them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsList {
    pub pairs: Vec<(String, String)>,
    pub skipped: Vec<String>,
}

impl SettingsList {
    pub fn parse(input: &str) -> Self {
        let mut out = Self::default();
        for token in input.split_whitespace() {
            match token.split_once('=') {
                Some((key, value)) if !key.is_empty() => out.pairs.push((key.to_string(), value.to_string())),
                _ => out.skipped.push(token.to_string()),
            }
        }
        out
    }

    pub fn is_empty(&self) -> bool { self.pairs.is_empty() }

    pub fn apply_to<S: Service + ?Sized>(&self, service: &mut S) {
        for (key, value) in &self.pairs {
            service.set(key, value);
        }
        for token in &self.skipped {
            debug!(token = %token, "ignoring setting without key=value");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keeps_order_and_skips_malformed() {
        let s = SettingsList::parse("  a=1 junk b=  c=x=y =z ");
        assert_eq!(
            s.pairs,
            vec![("a".into(), "1".into()), ("b".into(), "".into()), ("c".into(), "x=y".into())]
        );
        assert_eq!(s.skipped, vec!["junk".to_string(), "=z".to_string()]);
    }

    #[test]
    fn test_parse_empty() {
        let s = SettingsList::parse("");
        assert!(s.is_empty());
        assert!(s.skipped.is_empty());
    }
}
