//! Call/SMS detail record model
//!
//! A [`Cdr`] only ever holds attributes named by [`CdrField`], in the order of
//! the [`FieldSet`] it was projected through. Unknown source attributes cannot
//! be represented, and absent ones are simply not present.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SyncError};

macro_rules! cdr_fields {
    ($($variant:ident => $name:literal,)+) => {
        /// Every attribute the provider may put in a CDR payload
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "&'static str")]
        pub enum CdrField {
            $($variant,)+
        }

        impl CdrField {
            pub const ALL: &'static [CdrField] = &[$(CdrField::$variant,)+];

            /// Attribute name exactly as it appears in the payload and ledger header
            pub fn name(self) -> &'static str {
                match self {
                    $(CdrField::$variant => $name,)+
                }
            }
        }

        impl FromStr for CdrField {
            type Err = SyncError;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($name => Ok(CdrField::$variant),)+
                    _ => Err(SyncError::config(format!("Unknown CDR field '{}'", s))),
                }
            }
        }
    };
}

cdr_fields! {
    AccountId => "AccountID",
    ApplicationId => "ApplicationId",
    ApplicationType => "ApplicationType",
    BrowserIp => "BrowserIP",
    Called => "Called",
    Caller => "Caller",
    CallId => "CallID",
    Channel => "Channel",
    DateCreated => "DateCreated",
    DateUpdated => "DateUpdated",
    DeliveryStatus => "DeliveryStatus",
    Duration => "Duration",
    EndTime => "EndTime",
    Flags => "Flags",
    Id => "ID",
    MessageBody => "MessageBody",
    MessageCount => "MessageCount",
    Network => "Network",
    ParentCallId => "ParentCallID",
    ParentSessionId => "ParentSessionID",
    PhoneNumberSid => "PhoneNumberSid",
    Ppid => "PPID",
    ProviderId => "ProviderID",
    ProviderName => "ProviderName",
    RecordingDuration => "RecordingDuration",
    ResponseCode => "ResponseCode",
    ServiceId => "ServiceId",
    SessionId => "SessionID",
    SipSessionId => "SipSessionID",
    StartTime => "StartTime",
    StartUrl => "StartUrl",
    Status => "Status",
    StatusCode => "StatusCode",
}

impl fmt::Display for CdrField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<String> for CdrField {
    type Error = SyncError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<CdrField> for &'static str {
    fn from(field: CdrField) -> Self {
        field.name()
    }
}

/// Attributes exported by default, in ledger column order
const STANDARD_FIELDS: &[CdrField] = &[
    CdrField::AccountId,
    CdrField::ApplicationId,
    CdrField::Called,
    CdrField::Caller,
    CdrField::Channel,
    CdrField::DateCreated,
    CdrField::DateUpdated,
    CdrField::DeliveryStatus,
    CdrField::Duration,
    CdrField::EndTime,
    CdrField::MessageBody,
    CdrField::Network,
    CdrField::ResponseCode,
    CdrField::SessionId,
    CdrField::StartTime,
    CdrField::Status,
    CdrField::StatusCode,
];

/// Ordered, duplicate-free selection of exported attributes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<CdrField>", into = "Vec<CdrField>")]
pub struct FieldSet(Vec<CdrField>);

impl FieldSet {
    /// Field set exporting `fields` in the given order
    ///
    /// Fails with [`SyncError::Config`] when `fields` is empty or names a
    /// field twice.
    pub fn new(fields: Vec<CdrField>) -> Result<Self> {
        if fields.is_empty() {
            return Err(SyncError::config("Field set must name at least one CDR field"));
        }
        for (idx, field) in fields.iter().enumerate() {
            if fields[..idx].contains(field) {
                return Err(SyncError::config(format!("Field '{}' listed twice", field)));
            }
        }
        Ok(Self(fields))
    }

    /// The default ledger columns, alphabetical by attribute name
    pub fn standard() -> Self {
        Self(STANDARD_FIELDS.to_vec())
    }

    pub fn contains(&self, field: CdrField) -> bool {
        self.0.contains(&field)
    }

    /// Column index of `field` in the ledger
    pub fn position(&self, field: CdrField) -> Option<usize> {
        self.0.iter().position(|f| *f == field)
    }

    pub fn iter(&self) -> impl Iterator<Item = CdrField> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Attribute names in column order, as written to the ledger header
    pub fn header(&self) -> Vec<&'static str> {
        self.iter().map(CdrField::name).collect()
    }
}

impl Default for FieldSet {
    fn default() -> Self {
        Self::standard()
    }
}

impl TryFrom<Vec<CdrField>> for FieldSet {
    type Error = SyncError;

    fn try_from(fields: Vec<CdrField>) -> Result<Self> {
        Self::new(fields)
    }
}

impl From<FieldSet> for Vec<CdrField> {
    fn from(set: FieldSet) -> Self {
        set.0
    }
}

/// Comma separated attribute names, e.g. `"DateCreated,Caller,Called"`
impl FromStr for FieldSet {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        let fields = s
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::parse)
            .collect::<Result<Vec<_>>>()?;
        Self::new(fields)
    }
}

/// A single attribute value
#[derive(Debug, Clone, PartialEq)]
pub enum CdrValue {
    Text(String),
    Integer(i64),
    /// Non-integral or out of `i64` range numbers
    Number(serde_json::Number),
    Boolean(bool),
}

impl CdrValue {
    /// Convert a payload value; `null` has no representation
    pub fn from_json(value: serde_json::Value) -> Option<Self> {
        use serde_json::Value;

        match value {
            Value::Null => None,
            Value::String(s) => Some(CdrValue::Text(s)),
            Value::Bool(b) => Some(CdrValue::Boolean(b)),
            Value::Number(n) => Some(match n.as_i64() {
                Some(i) => CdrValue::Integer(i),
                None => CdrValue::Number(n),
            }),
            nested @ (Value::Array(_) | Value::Object(_)) => Some(CdrValue::Text(nested.to_string())),
        }
    }

    /// The value when it was decoded as a whole number
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            CdrValue::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl fmt::Display for CdrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CdrValue::Text(s) => f.write_str(s),
            CdrValue::Integer(i) => write!(f, "{}", i),
            CdrValue::Number(n) => write!(f, "{}", n),
            CdrValue::Boolean(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for CdrValue {
    fn from(s: &str) -> Self {
        CdrValue::Text(s.to_string())
    }
}

impl From<i64> for CdrValue {
    fn from(i: i64) -> Self {
        CdrValue::Integer(i)
    }
}

impl Serialize for CdrValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            CdrValue::Text(s) => serializer.serialize_str(s),
            CdrValue::Integer(i) => serializer.serialize_i64(*i),
            CdrValue::Number(n) => n.serialize(serializer),
            CdrValue::Boolean(b) => serializer.serialize_bool(*b),
        }
    }
}

/// One normalised call or message record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cdr {
    fields: Vec<(CdrField, CdrValue)>,
}

impl Cdr {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `field`, replacing any earlier value while keeping its position
    pub fn insert(&mut self, field: CdrField, value: impl Into<CdrValue>) {
        let value = value.into();
        match self.fields.iter_mut().find(|(f, _)| *f == field) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((field, value)),
        }
    }

    /// Builder form of [`Cdr::insert`]
    pub fn with(mut self, field: CdrField, value: impl Into<CdrValue>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn get(&self, field: CdrField) -> Option<&CdrValue> {
        self.fields.iter().find(|(f, _)| *f == field).map(|(_, v)| v)
    }

    pub fn contains(&self, field: CdrField) -> bool {
        self.get(field).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (CdrField, &CdrValue)> + '_ {
        self.fields.iter().map(|(f, v)| (*f, v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Compact JSON object with keys in projection order
    pub fn to_json(&self) -> String {
        // Keys are plain strings and values are scalars, so this cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl Serialize for Cdr {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (field, value) in &self.fields {
            map.serialize_entry(field.name(), value)?;
        }
        map.end()
    }
}
