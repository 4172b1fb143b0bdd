use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// Property holding the region name in the boundary collection.
pub const REGION_NAME_PROPERTY: &str = "NAME";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type", default = "collection_type")]
    pub kind: String,
    #[serde(default)]
    pub features: Vec<Feature>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type", default = "feature_type")]
    pub kind: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub geometry: Value,
}

fn collection_type() -> String {
    "FeatureCollection".to_string()
}

fn feature_type() -> String {
    "Feature".to_string()
}

impl Feature {
    pub fn region_name(&self) -> Option<&str> {
        self.properties.get(REGION_NAME_PROPERTY)?.as_str()
    }
}

impl FeatureCollection {
    pub fn new(features: Vec<Feature>) -> Self {
        Self {
            kind: collection_type(),
            features,
        }
    }

    /// Features whose region name equals `selected`, ignoring case. A postal
    /// code also matches its full state name.
    pub fn matching(&self, selected: &str) -> FeatureCollection {
        let wanted = selected.to_lowercase();
        let full = state_name(selected).map(str::to_lowercase);
        let features = self
            .features
            .iter()
            .filter(|f| {
                f.region_name().map_or(false, |name| {
                    let name = name.to_lowercase();
                    name == wanted || full.as_deref() == Some(name.as_str())
                })
            })
            .cloned()
            .collect();
        FeatureCollection::new(features)
    }
}

/// Where region outlines come from.
#[async_trait]
pub trait BoundarySource: Send + Sync {
    async fn fetch(&self) -> Result<FeatureCollection>;
}

/// Builds the source for a configured location: `http(s)://` URLs are fetched
/// over the network, anything else is read as a local GeoJSON file.
pub fn source_for(location: &str) -> Box<dyn BoundarySource> {
    if location.starts_with("http://") || location.starts_with("https://") {
        Box::new(HttpBoundarySource::new(location))
    } else {
        let path = location.strip_prefix("file://").unwrap_or(location);
        Box::new(FileBoundarySource::new(path))
    }
}

pub struct HttpBoundarySource {
    client: Client,
    url: String,
}

impl HttpBoundarySource {
    pub fn new(url: &str) -> Self {
        Self {
            client: Client::new(),
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl BoundarySource for HttpBoundarySource {
    async fn fetch(&self) -> Result<FeatureCollection> {
        let resp = self.client.get(&self.url).send().await?;
        if !resp.status().is_success() {
            bail!("boundary service returned {}", resp.status());
        }
        Ok(resp.json().await?)
    }
}

pub struct FileBoundarySource {
    path: PathBuf,
}

impl FileBoundarySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl BoundarySource for FileBoundarySource {
    async fn fetch(&self) -> Result<FeatureCollection> {
        let raw = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("cannot read {}", self.path.display()))?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

/// Fixed in-memory collection.
pub struct StaticBoundarySource(pub FeatureCollection);

#[async_trait]
impl BoundarySource for StaticBoundarySource {
    async fn fetch(&self) -> Result<FeatureCollection> {
        Ok(self.0.clone())
    }
}

const STATE_NAMES: [(&str, &str); 52] = [
    ("AL", "Alabama"),
    ("AK", "Alaska"),
    ("AZ", "Arizona"),
    ("AR", "Arkansas"),
    ("CA", "California"),
    ("CO", "Colorado"),
    ("CT", "Connecticut"),
    ("DE", "Delaware"),
    ("DC", "District of Columbia"),
    ("FL", "Florida"),
    ("GA", "Georgia"),
    ("HI", "Hawaii"),
    ("ID", "Idaho"),
    ("IL", "Illinois"),
    ("IN", "Indiana"),
    ("IA", "Iowa"),
    ("KS", "Kansas"),
    ("KY", "Kentucky"),
    ("LA", "Louisiana"),
    ("ME", "Maine"),
    ("MD", "Maryland"),
    ("MA", "Massachusetts"),
    ("MI", "Michigan"),
    ("MN", "Minnesota"),
    ("MS", "Mississippi"),
    ("MO", "Missouri"),
    ("MT", "Montana"),
    ("NE", "Nebraska"),
    ("NV", "Nevada"),
    ("NH", "New Hampshire"),
    ("NJ", "New Jersey"),
    ("NM", "New Mexico"),
    ("NY", "New York"),
    ("NC", "North Carolina"),
    ("ND", "North Dakota"),
    ("OH", "Ohio"),
    ("OK", "Oklahoma"),
    ("OR", "Oregon"),
    ("PA", "Pennsylvania"),
    ("PR", "Puerto Rico"),
    ("RI", "Rhode Island"),
    ("SC", "South Carolina"),
    ("SD", "South Dakota"),
    ("TN", "Tennessee"),
    ("TX", "Texas"),
    ("UT", "Utah"),
    ("VT", "Vermont"),
    ("VA", "Virginia"),
    ("WA", "Washington"),
    ("WV", "West Virginia"),
    ("WI", "Wisconsin"),
    ("WY", "Wyoming"),
];

/// Full name for a two-letter postal code.
pub fn state_name(code: &str) -> Option<&'static str> {
    STATE_NAMES
        .iter()
        .find(|(c, _)| c.eq_ignore_ascii_case(code))
        .map(|(_, name)| *name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn region(name: &str) -> Feature {
        Feature {
            kind: feature_type(),
            properties: json!({ "NAME": name }).as_object().cloned().unwrap_or_default(),
            geometry: json!({"type": "Polygon", "coordinates": []}),
        }
    }

    #[test]
    fn matching_ignores_case() {
        let fc = FeatureCollection::new(vec![region("California"), region("Oregon")]);
        let hit = fc.matching("california");
        assert_eq!(hit.features.len(), 1);
        assert_eq!(hit.features[0].region_name(), Some("California"));
    }

    #[test]
    fn postal_code_matches_full_name() {
        let fc = FeatureCollection::new(vec![region("New York"), region("Texas")]);
        let hit = fc.matching("NY");
        assert_eq!(hit.features.len(), 1);
        assert_eq!(hit.features[0].region_name(), Some("New York"));
    }

    #[test]
    fn unknown_region_matches_nothing() {
        let fc = FeatureCollection::new(vec![region("Texas")]);
        assert!(fc.matching("Atlantis").features.is_empty());
    }

    #[test]
    fn collection_parses_census_shape() {
        let raw = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","properties":{"GEO_ID":"0400000US06","STATE":"06","NAME":"California"},
             "geometry":{"type":"Polygon","coordinates":[[[-120.0,35.0],[-119.0,35.0],[-119.0,36.0]]]}}]}"#;
        let fc: FeatureCollection = serde_json::from_str(raw).unwrap();
        assert_eq!(fc.features[0].region_name(), Some("California"));
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let src = FileBoundarySource::new("/nonexistent/boundaries.json");
        assert!(src.fetch().await.is_err());
    }
}
