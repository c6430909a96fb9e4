use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One day's liturgy as returned by the remote API.
///
/// The cache stores and returns this value untouched; it only looks inside to
/// decide whether the payload is empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LiturgyDocument(Value);

impl LiturgyDocument {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Parse a stored or received JSON string
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json).map(Self)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.0)
    }

    /// `null`, `{}` and `[]` all mean the API had nothing for the date
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            Value::Array(items) => items.is_empty(),
            _ => false,
        }
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Typed view over the well-known fields. Missing or oddly shaped fields
    /// come back as `None` rather than failing the whole document.
    pub fn summary(&self) -> LiturgySummary {
        serde_json::from_value(self.0.clone()).unwrap_or_default()
    }
}

impl From<Value> for LiturgyDocument {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiturgySummary {
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub liturgia: Option<String>,
    #[serde(default)]
    pub cor: Option<String>,
    /// Collect (opening prayer) of the day
    #[serde(default)]
    pub dia: Option<String>,
    #[serde(default)]
    pub oferendas: Option<String>,
    #[serde(default)]
    pub comunhao: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub primeira_leitura: Option<Reading>,
    #[serde(default, deserialize_with = "lenient")]
    pub segunda_leitura: Option<SecondReading>,
    #[serde(default, deserialize_with = "lenient")]
    pub salmo: Option<Psalm>,
    #[serde(default, deserialize_with = "lenient")]
    pub evangelho: Option<Reading>,
    #[serde(default, deserialize_with = "lenient")]
    pub antifonas: Option<Antiphons>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Reading {
    #[serde(default)]
    pub referencia: Option<String>,
    #[serde(default)]
    pub titulo: Option<String>,
    #[serde(default)]
    pub texto: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Psalm {
    #[serde(default)]
    pub referencia: Option<String>,
    #[serde(default)]
    pub refrao: Option<String>,
    #[serde(default)]
    pub texto: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Antiphons {
    #[serde(default)]
    pub entrada: Option<String>,
    #[serde(default)]
    pub comunhao: Option<String>,
}

/// Weekdays carry a plain note ("Não há segunda leitura hoje!") instead of a
/// reading object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SecondReading {
    Reading(Reading),
    Note(String),
}

impl SecondReading {
    pub fn reference(&self) -> Option<&str> {
        match self {
            SecondReading::Reading(r) => r.referencia.as_deref(),
            SecondReading::Note(_) => None,
        }
    }
}

/// Deserialize an optional field, turning shape mismatches into `None`.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

impl LiturgySummary {
    /// References of the day's readings, in liturgical order
    pub fn references(&self) -> Vec<&str> {
        let mut refs = Vec::new();
        if let Some(r) = self.primeira_leitura.as_ref().and_then(|r| r.referencia.as_deref()) {
            refs.push(r);
        }
        if let Some(r) = self.salmo.as_ref().and_then(|p| p.referencia.as_deref()) {
            refs.push(r);
        }
        if let Some(r) = self.segunda_leitura.as_ref().and_then(|s| s.reference()) {
            refs.push(r);
        }
        if let Some(r) = self.evangelho.as_ref().and_then(|r| r.referencia.as_deref()) {
            refs.push(r);
        }
        refs
    }
}
