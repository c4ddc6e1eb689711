use rand::{Rng, distr::Alphanumeric};
use serde::de;
use unicode_segmentation::UnicodeSegmentation;

const CODE_LENGTH: usize = 32;

/// Secret code that authenticates edit, confirm and unsubscribe requests
/// coming from someone who is not logged in.
#[derive(Clone, PartialEq, Eq)]
pub struct VerificationCode(String);

impl VerificationCode {
    pub fn new() -> Self {
        let mut rng = rand::rng();
        let code = std::iter::repeat_with(|| rng.sample(Alphanumeric))
            .map(char::from)
            .take(CODE_LENGTH)
            .collect();
        Self(code)
    }

    pub fn parse(s: String) -> Result<Self, String> {
        let is_wrong_length = s.graphemes(true).count() != CODE_LENGTH;
        let is_not_alphanumeric = s.chars().any(|c| !c.is_ascii_alphanumeric());

        if is_wrong_length || is_not_alphanumeric {
            Err("Invalid verification code.".to_string())
        } else {
            Ok(Self(s))
        }
    }

    /// Compares with a submitted code without stopping at the first mismatch.
    pub fn matches(&self, candidate: &str) -> bool {
        let (expected, candidate) = (self.0.as_bytes(), candidate.as_bytes());
        expected.len() == candidate.len()
            && expected
                .iter()
                .zip(candidate)
                .fold(0u8, |diff, (a, b)| diff | (a ^ b))
                == 0
    }
}

impl Default for VerificationCode {
    fn default() -> Self {
        Self::new()
    }
}

// Never print the code itself.
impl std::fmt::Debug for VerificationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("VerificationCode([REDACTED])")
    }
}

struct VerificationCodeVisitor;

impl de::Visitor<'_> for VerificationCodeVisitor {
    type Value = VerificationCode;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("a valid verification code string")
    }

    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        VerificationCode::parse(value.to_string()).map_err(de::Error::custom)
    }

    fn visit_string<E>(self, value: String) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        VerificationCode::parse(value).map_err(de::Error::custom)
    }
}

impl<'de> serde::Deserialize<'de> for VerificationCode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_string(VerificationCodeVisitor)
    }
}

impl AsRef<str> for VerificationCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
