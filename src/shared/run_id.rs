use serde::{Deserialize, Serialize};

/// Identifier of one agent or plan run. The id doubles as the journal
/// file stem (`<run-id>.jsonl`) and prefixes every journal entry id and
/// backup artifact name, so the charset is restricted to what is safe
/// in a file name on every platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RunId(String);

#[derive(Debug, thiserror::Error)]
#[error("invalid run id `{0}`: only ASCII letters, digits, '-' and '_' are allowed")]
pub struct InvalidRunId(String);

impl RunId {
    pub fn parse(raw: &str) -> Result<Self, InvalidRunId> {
        let acceptable = !raw.is_empty()
            && raw
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if acceptable {
            Ok(Self(raw.to_string()))
        } else {
            Err(InvalidRunId(raw.to_string()))
        }
    }

    /// Mints an id unique across processes sharing one journal
    /// directory: UTC second resolution plus a random suffix to break
    /// same-second collisions.
    pub fn mint(now: chrono::DateTime<chrono::Utc>) -> Self {
        use rand::Rng as _;
        let suffix: u32 = rand::thread_rng().gen_range(0x1000..0xffff);
        Self(format!("run-{}-{suffix:04x}", now.format("%Y%m%d%H%M%S")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RunId {
    type Error = InvalidRunId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RunId> for String {
    fn from(id: RunId) -> Self {
        id.0
    }
}
