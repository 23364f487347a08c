//! Domain entities: core data structures

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::error::{DomainError, DomainResult};

const LOCAL_PREFIX: &str = "local-";

/// Identity of an item in the forest.
///
/// Persisted items carry the id assigned by the remote API. Items inserted
/// optimistically carry a local placeholder until the remote create call
/// answers with the real id. The two variants never compare equal, so a
/// placeholder can never collide with a server id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawItemId", into = "RawItemId")]
pub enum ItemId {
    Remote(u64),
    Local(u64),
}

impl ItemId {
    /// The server-assigned id, or None for a local placeholder.
    pub fn remote(&self) -> Option<u64> {
        match self {
            ItemId::Remote(id) => Some(*id),
            ItemId::Local(_) => None,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, ItemId::Local(_))
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemId::Remote(id) => write!(f, "{}", id),
            ItemId::Local(id) => write!(f, "{}{}", LOCAL_PREFIX, id),
        }
    }
}

impl FromStr for ItemId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let parsed = match s.strip_prefix(LOCAL_PREFIX) {
            Some(rest) => rest.parse().map(ItemId::Local),
            None => s.parse().map(ItemId::Remote),
        };
        parsed.map_err(|_| DomainError::InvalidInput(format!("not an item id: {:?}", s)))
    }
}

/// Wire form of an id: remote ids travel as plain numbers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawItemId {
    Number(u64),
    Text(String),
}

impl TryFrom<RawItemId> for ItemId {
    type Error = DomainError;

    fn try_from(raw: RawItemId) -> Result<Self, Self::Error> {
        match raw {
            RawItemId::Number(id) => Ok(ItemId::Remote(id)),
            RawItemId::Text(text) => text.parse(),
        }
    }
}

impl From<ItemId> for RawItemId {
    fn from(id: ItemId) -> Self {
        match id {
            ItemId::Remote(id) => RawItemId::Number(id),
            local => RawItemId::Text(local.to_string()),
        }
    }
}

/// A non-negative, finite amount.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "RawQuantity", into = "f64")]
pub struct Quantity(f64);

impl Quantity {
    pub fn new(value: f64) -> DomainResult<Self> {
        if !value.is_finite() || value < 0.0 {
            return Err(DomainError::InvalidInput(format!(
                "quantity must be a non-negative number, got {}",
                value
            )));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.fract() == 0.0 {
            write!(f, "{}", self.0 as u64)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<Quantity> for f64 {
    fn from(quantity: Quantity) -> Self {
        quantity.0
    }
}

impl FromStr for Quantity {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: f64 = s
            .trim()
            .parse()
            .map_err(|_| DomainError::InvalidInput(format!("not a quantity: {:?}", s)))?;
        Quantity::new(value)
    }
}

/// The remote API has delivered quantities both as numbers and as strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawQuantity {
    Number(f64),
    Text(String),
}

impl TryFrom<RawQuantity> for Quantity {
    type Error = DomainError;

    fn try_from(raw: RawQuantity) -> Result<Self, Self::Error> {
        match raw {
            RawQuantity::Number(value) => Quantity::new(value),
            RawQuantity::Text(text) => text.parse(),
        }
    }
}

/// Accepts a missing, null or blank quantity as None.
fn optional_quantity<'de, D>(deserializer: D) -> Result<Option<Quantity>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<RawQuantity>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawQuantity::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(raw) => Quantity::try_from(raw)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

/// Editable attributes of an item.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ItemFields {
    pub name: String,
    #[serde(default, deserialize_with = "optional_quantity")]
    pub quantity: Option<Quantity>,
    #[serde(default)]
    pub unit: Option<String>,
}

impl ItemFields {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            quantity: None,
            unit: None,
        }
    }

    pub fn with_quantity(mut self, quantity: Quantity) -> Self {
        self.quantity = Some(quantity);
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Normalize and check the fields.
    ///
    /// The name is trimmed and must not be empty; a blank unit becomes None.
    pub fn validated(self) -> DomainResult<Self> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(DomainError::InvalidInput("item name must not be empty".into()));
        }
        let unit = self
            .unit
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());
        Ok(Self {
            name,
            quantity: self.quantity,
            unit,
        })
    }
}

impl fmt::Display for ItemFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        match (&self.quantity, &self.unit) {
            (Some(q), Some(u)) => write!(f, " ({} {})", q, u),
            (Some(q), None) => write!(f, " ({})", q),
            (None, Some(u)) => write!(f, " ({})", u),
            (None, None) => Ok(()),
        }
    }
}

/// Nested form of an item, as delivered by the remote API and as produced
/// by forest snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedItem {
    pub id: ItemId,
    pub name: String,
    #[serde(default, deserialize_with = "optional_quantity")]
    pub quantity: Option<Quantity>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub children: Vec<NestedItem>,
}

impl NestedItem {
    pub fn new(id: ItemId, fields: ItemFields) -> Self {
        Self {
            id,
            name: fields.name,
            quantity: fields.quantity,
            unit: fields.unit,
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<NestedItem>) -> Self {
        self.children = children;
        self
    }

    pub fn fields(&self) -> ItemFields {
        ItemFields {
            name: self.name.clone(),
            quantity: self.quantity,
            unit: self.unit.clone(),
        }
    }

    /// Number of items in this subtree, including the item itself.
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(NestedItem::subtree_len).sum::<usize>()
    }

    /// Ids of this subtree in pre-order.
    pub fn ids(&self) -> Vec<ItemId> {
        let mut ids = Vec::new();
        let mut stack = vec![self];
        while let Some(item) = stack.pop() {
            ids.push(item.id);
            stack.extend(item.children.iter().rev());
        }
        ids
    }
}

/// Flat description of a single item, as answered by the remote create and
/// update calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDescriptor {
    pub id: ItemId,
    pub name: String,
    #[serde(default, deserialize_with = "optional_quantity")]
    pub quantity: Option<Quantity>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub parent_id: Option<ItemId>,
}

impl ItemDescriptor {
    pub fn fields(&self) -> ItemFields {
        ItemFields {
            name: self.name.clone(),
            quantity: self.quantity,
            unit: self.unit.clone(),
        }
    }
}
