//! Ad request parameters
//!
//! Ad links are URL templates. Before a candidate is loaded its placeholders
//! are expanded, the tracking identifiers appended and the resulting query
//! string handed to the SDK as a flat parameter map.

use crate::error::{Error, Result};
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;
use uuid::Uuid;

/// Ad network account the requests are billed to
pub const AD_FOX_OWNER_ID: &str = "264443";

const EVENT_ID_PLACEHOLDER: &str = "$$$eid1$$$";
const BLOCK_ID_PLACEHOLDER: &str = "$$$pr$$$";
const PLACEMENT_ID_PLACEHOLDER: &str = "$$$plid$$$";

/// Device class, selects the placement id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    #[default]
    Desktop,
    Mobile,
}

impl DeviceClass {
    pub fn placement_id(&self) -> u32 {
        match self {
            DeviceClass::Desktop => 229_103,
            DeviceClass::Mobile => 229_104,
        }
    }
}

/// Parameters handed to the SDK's loader for one candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdFoxParameters {
    pub owner_id: String,
    pub params: BTreeMap<String, String>,
}

/// Per-viewer values substituted into ad links
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdRequestContext {
    #[serde(default)]
    pub device: DeviceClass,
    /// Safari gets an external id appended, since its third-party cookies
    /// are blocked
    #[serde(default)]
    pub is_safari: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default = "default_block_id")]
    pub block_id: String,
}

fn default_block_id() -> String {
    "123123".to_string()
}

impl Default for AdRequestContext {
    fn default() -> Self {
        Self {
            device: DeviceClass::default(),
            is_safari: false,
            external_id: None,
            user_id: None,
            block_id: default_block_id(),
        }
    }
}

impl AdRequestContext {
    /// Expand `link` into the parameter map for a loader
    pub fn parameters_for(&self, link: &str) -> Result<AdFoxParameters> {
        let url = Url::parse(&self.expand(link))
            .map_err(|e| Error::InvalidConfig(format!("invalid ad link {}: {}", link, e)))?;

        let params = url.query().map(query_parameters).unwrap_or_default();

        Ok(AdFoxParameters {
            owner_id: AD_FOX_OWNER_ID.to_string(),
            params,
        })
    }

    /// Substitute placeholders and append tracking parameters. Every call
    /// mints fresh event ids.
    pub fn expand(&self, link: &str) -> String {
        let mut expanded = link
            .replace(EVENT_ID_PLACEHOLDER, &Uuid::new_v4().to_string())
            .replace(BLOCK_ID_PLACEHOLDER, &self.block_id)
            .replace(PLACEMENT_ID_PLACEHOLDER, &self.device.placement_id().to_string());

        if let (true, Some(external_id)) = (self.is_safari, self.external_id.as_deref()) {
            expanded.push_str("&extid_tag=adfox&extid=");
            expanded.push_str(external_id);
        }

        expanded.push_str(&format!(
            "&eid6={}&eid7={}&eid8={}",
            self.user_id.as_deref().unwrap_or("null"),
            Uuid::new_v4(),
            Uuid::new_v4()
        ));

        collapse_separators(&expanded)
    }
}

/// Split a raw query into key/value pairs. Only values are percent-decoded
/// and a `+` stays literal; pairs with an empty key or value are dropped.
fn query_parameters(query: &str) -> BTreeMap<String, String> {
    query
        .split('&')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            if key.is_empty() || value.is_empty() {
                return None;
            }
            let value = percent_decode_str(value).decode_utf8_lossy();
            Some((key.to_string(), value.into_owned()))
        })
        .collect()
}

/// Fold runs of `&` into one and drop a trailing `&`
fn collapse_separators(link: &str) -> String {
    let mut out = String::with_capacity(link.len());
    for c in link.chars() {
        if c == '&' && out.ends_with('&') {
            continue;
        }
        out.push(c);
    }
    if out.ends_with('&') {
        out.pop();
    }
    out
}
