//! Author-scheme residue references.
//!
//! An [`AuthorRef`] names a residue the way the structure file's author did: chain letter,
//! sequence number, and optional insertion code. It is the key of the mapping table and the
//! parsed form of every user hotspot.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Residue identity in the author numbering scheme.
///
/// Insertion codes are stored as an uppercase character or `None`; whitespace and the mmCIF
/// placeholders never reach this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "AuthorRefRepr", into = "AuthorRefRepr")]
pub struct AuthorRef {
    pub chain: String,
    pub seq_num: i32,
    pub insertion_code: Option<char>,
}

impl AuthorRef {
    /// Builds a reference, normalizing the insertion code.
    ///
    /// # Arguments
    ///
    /// * `chain` - Author chain identifier; surrounding whitespace is trimmed.
    /// * `seq_num` - Author sequence number.
    /// * `insertion_code` - Optional insertion code; blanks become `None`, letters are uppercased.
    pub fn new(chain: impl Into<String>, seq_num: i32, insertion_code: Option<char>) -> Self {
        let chain: String = chain.into();
        Self {
            chain: chain.trim().to_string(),
            seq_num,
            insertion_code: normalize_insertion_code(insertion_code),
        }
    }

    /// Residue part of the token, e.g. `52A`.
    pub fn residue_token(&self) -> String {
        match self.insertion_code {
            Some(code) => format!("{}{}", self.seq_num, code),
            None => self.seq_num.to_string(),
        }
    }

    /// Textual hotspot form, e.g. `L:52A`.
    pub fn token(&self) -> String {
        format!("{}:{}", self.chain, self.residue_token())
    }

    pub fn insertion_code_str(&self) -> String {
        self.insertion_code.map(String::from).unwrap_or_default()
    }
}

impl fmt::Display for AuthorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chain, self.residue_token())
    }
}

pub(crate) fn normalize_insertion_code(code: Option<char>) -> Option<char> {
    code.filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
}

#[derive(Serialize, Deserialize)]
struct AuthorRefRepr {
    chain: String,
    sequence_number: i32,
    #[serde(default)]
    insertion_code: String,
}

impl TryFrom<AuthorRefRepr> for AuthorRef {
    type Error = String;

    fn try_from(repr: AuthorRefRepr) -> Result<Self, Self::Error> {
        let mut chars = repr.insertion_code.trim().chars();
        let code = chars.next();
        if chars.next().is_some() {
            return Err(format!(
                "insertion code '{}' must be a single character",
                repr.insertion_code
            ));
        }
        Ok(AuthorRef::new(repr.chain, repr.sequence_number, code))
    }
}

impl From<AuthorRef> for AuthorRefRepr {
    fn from(value: AuthorRef) -> Self {
        Self {
            insertion_code: value.insertion_code_str(),
            chain: value.chain,
            sequence_number: value.seq_num,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn author_ref_new_normalizes_insertion_code() {
        assert_eq!(AuthorRef::new("A", 52, Some('a')).insertion_code, Some('A'));
        assert_eq!(AuthorRef::new("A", 52, Some(' ')).insertion_code, None);
        assert_eq!(AuthorRef::new(" H ", 1, None).chain, "H");
    }

    #[test]
    fn author_ref_tokens_render_insertion_codes() {
        let plain = AuthorRef::new("H", 5, None);
        let inserted = AuthorRef::new("L", 52, Some('A'));

        assert_eq!(plain.token(), "H:5");
        assert_eq!(inserted.token(), "L:52A");
        assert_eq!(inserted.residue_token(), "52A");
        assert_eq!(inserted.to_string(), "L:52A");
        assert_eq!(AuthorRef::new("T", -3, None).token(), "T:-3");
    }

    #[test]
    fn author_ref_serializes_with_empty_insertion_code() {
        let value = serde_json::to_value(AuthorRef::new("H", 5, None)).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"chain": "H", "sequence_number": 5, "insertion_code": ""})
        );
    }

    #[test]
    fn author_ref_deserialization_rejects_long_insertion_codes() {
        let ok: AuthorRef = serde_json::from_str(
            r#"{"chain": "L", "sequence_number": 52, "insertion_code": "a"}"#,
        )
        .unwrap();
        assert_eq!(ok, AuthorRef::new("L", 52, Some('A')));

        let err = serde_json::from_str::<AuthorRef>(
            r#"{"chain": "L", "sequence_number": 52, "insertion_code": "AB"}"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn author_ref_orders_by_chain_then_number_then_code() {
        let mut refs = vec![
            AuthorRef::new("L", 53, None),
            AuthorRef::new("H", 2, None),
            AuthorRef::new("L", 52, Some('A')),
            AuthorRef::new("L", 52, None),
        ];
        refs.sort();
        let tokens: Vec<_> = refs.iter().map(|r| r.token()).collect();
        assert_eq!(tokens, vec!["H:2", "L:52", "L:52A", "L:53"]);
    }
}
