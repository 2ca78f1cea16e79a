use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;

/// Longest child id. Leaves room for the `scripts-` custom id prefix within
/// the provider's 64 character limit.
pub const MAX_CHILD_ID_LEN: usize = 56;
const ID_HASH_LEN: usize = 10;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AngleType {
    Positive,
    Negative,
}

impl AngleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
        }
    }

    /// Prefix used when deriving angle ids.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            Self::Positive => "pos",
            Self::Negative => "neg",
        }
    }
}

/// A marketing angle produced by the angles phase. Immutable once committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MarketingAngle {
    pub id: String,
    pub number: u32,
    pub category: String,
    pub concept: String,
    #[serde(rename = "type")]
    pub angle_type: AngleType,
}

impl MarketingAngle {
    pub fn new(
        angle_type: AngleType,
        number: u32,
        category: impl Into<String>,
        concept: impl Into<String>,
    ) -> Self {
        Self {
            id: Self::derive_id(angle_type, number),
            number,
            category: category.into(),
            concept: concept.into(),
            angle_type,
        }
    }

    pub fn derive_id(angle_type: AngleType, number: u32) -> String {
        format!("{}-{}", angle_type.id_prefix(), number)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Hook {
    pub id: String,
    pub text: String,
    pub category: String,
    pub angle_id: String,
}

impl Hook {
    pub fn new(
        angle_id: &str,
        raw_id: &str,
        category: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: child_id(angle_id, raw_id),
            text: text.into(),
            category: category.into(),
            angle_id: angle_id.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Script {
    pub id: String,
    pub content: String,
    pub cta: String,
    pub hook_id: String,
    pub version: String,
}

impl Script {
    pub fn new(
        hook_id: &str,
        raw_id: &str,
        content: impl Into<String>,
        cta: impl Into<String>,
        attempt: u32,
    ) -> Self {
        Self {
            id: child_id(hook_id, raw_id),
            content: content.into(),
            cta: cta.into(),
            hook_id: hook_id.to_string(),
            version: format!("v{}", attempt),
        }
    }
}

/// Derive a stable child id scoped under its parent.
///
/// Provider-supplied ids are only unique within a single response, so they are
/// namespaced by the parent id and reduced to `[A-Za-z0-9_-]`. If the raw id
/// already carries the parent prefix it is not repeated. Ids longer than
/// [`MAX_CHILD_ID_LEN`] are cut and suffixed with a hash of the full id.
pub fn child_id(parent_id: &str, raw_id: &str) -> String {
    let raw = sanitize_id(raw_id);
    let prefix = format!("{}-", parent_id);
    let id = if raw.starts_with(&prefix) {
        raw
    } else {
        format!("{}{}", prefix, raw)
    };
    bound_id(id)
}

fn bound_id(id: String) -> String {
    if id.len() <= MAX_CHILD_ID_LEN {
        return id;
    }
    let mut hasher = Sha256::new();
    hasher.update(id.as_bytes());
    let digest = hex::encode(hasher.finalize());

    let keep = MAX_CHILD_ID_LEN - ID_HASH_LEN - 1;
    let head: String = id.chars().take(keep).collect();
    format!("{}-{}", head, &digest[..ID_HASH_LEN])
}

pub fn sanitize_id(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}
