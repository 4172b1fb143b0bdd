//! Map presenter: turns a result set into a deck.gl JSON description.

use serde::Serialize;
use std::sync::Arc;

use crate::filter::{FilterCriteria, ResultSet};
use crate::logging::{self, log, obj, v_str, Domain, Level};

pub mod boundary;

pub use boundary::{BoundarySource, Feature, FeatureCollection};

/// Geographic center of the contiguous United States.
pub const FALLBACK_LATITUDE: f64 = 37.0902;
pub const FALLBACK_LONGITUDE: f64 = -95.7129;
pub const CONTINENTAL_ZOOM: f64 = 3.0;
pub const REGIONAL_ZOOM: f64 = 6.0;

pub const POINT_RADIUS: u32 = 4000;
pub const POINT_FILL: [u8; 4] = [200, 30, 0, 160];
pub const BOUNDARY_FILL: [u8; 4] = [255, 255, 0, 100];
pub const BOUNDARY_LINE: [u8; 3] = [255, 255, 0];

pub const TOOLTIP_HTML: &str = "<b>{name}</b><br/>{city}, {state}<br/>Tuition: ${tuition}<br/>Total: ${total_cost}";

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ViewState {
    pub latitude: f64,
    pub longitude: f64,
    pub zoom: f64,
    pub pitch: f64,
}

/// Mean position of the results at regional zoom, or the continental
/// fallback when there is nothing to show.
pub fn view_anchor(results: &ResultSet<'_>) -> ViewState {
    let coords: Vec<(f64, f64)> = results
        .records()
        .iter()
        .filter_map(|u| u.coordinates())
        .collect();
    if coords.is_empty() {
        return ViewState {
            latitude: FALLBACK_LATITUDE,
            longitude: FALLBACK_LONGITUDE,
            zoom: CONTINENTAL_ZOOM,
            pitch: 0.0,
        };
    }
    let n = coords.len() as f64;
    let (lat_sum, lon_sum) = coords
        .iter()
        .fold((0.0, 0.0), |(la, lo), (lat, lon)| (la + lat, lo + lon));
    ViewState {
        latitude: lat_sum / n,
        longitude: lon_sum / n,
        zoom: REGIONAL_ZOOM,
        pitch: 0.0,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapPoint {
    pub position: [f64; 2],
    pub name: String,
    pub city: String,
    pub state: String,
    pub tuition: Option<f64>,
    pub total_cost: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScatterLayer {
    pub id: String,
    pub data: Vec<MapPoint>,
    pub get_position: String,
    pub get_radius: u32,
    pub get_fill_color: [u8; 4],
    pub pickable: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundaryLayer {
    pub id: String,
    pub data: FeatureCollection,
    pub stroked: bool,
    pub filled: bool,
    pub get_fill_color: [u8; 4],
    pub get_line_color: [u8; 3],
    pub line_width_min_pixels: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "@@type")]
pub enum Layer {
    ScatterplotLayer(ScatterLayer),
    GeoJsonLayer(BoundaryLayer),
}

#[derive(Debug, Clone, Serialize)]
pub struct Tooltip {
    pub html: &'static str,
    pub style: TooltipStyle,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TooltipStyle {
    pub background_color: &'static str,
    pub color: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeckSpec {
    pub map_style: String,
    pub initial_view_state: ViewState,
    pub layers: Vec<Layer>,
    pub tooltip: Tooltip,
}

impl DeckSpec {
    pub fn has_boundary(&self) -> bool {
        self.layers
            .iter()
            .any(|l| matches!(l, Layer::GeoJsonLayer(_)))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MapView {
    pub deck: DeckSpec,
    pub summary: String,
    pub count: usize,
}

pub fn point_layer(results: &ResultSet<'_>) -> ScatterLayer {
    let data = results
        .records()
        .iter()
        .filter_map(|u| {
            let (lat, lon) = u.coordinates()?;
            Some(MapPoint {
                position: [lon, lat],
                name: u.name.clone()?,
                city: u.city.clone().unwrap_or_default(),
                state: u.state.clone().unwrap_or_default(),
                tuition: u.tuition_out_of_state,
                total_cost: u.total_estimated_cost(),
            })
        })
        .collect();
    ScatterLayer {
        id: "universities".to_string(),
        data,
        get_position: "@@=position".to_string(),
        get_radius: POINT_RADIUS,
        get_fill_color: POINT_FILL,
        pickable: true,
    }
}

pub fn boundary_layer(regions: FeatureCollection) -> BoundaryLayer {
    BoundaryLayer {
        id: "state-boundary".to_string(),
        data: regions,
        stroked: true,
        filled: true,
        get_fill_color: BOUNDARY_FILL,
        get_line_color: BOUNDARY_LINE,
        line_width_min_pixels: 2,
    }
}

/// "Showing N universities under $B total estimated cost."
pub fn summary_line(count: usize, budget: f64) -> String {
    format!(
        "Showing {} universities under ${} total estimated cost.",
        count,
        thousands(budget.max(0.0).round() as u64)
    )
}

fn thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

pub struct MapPresenter {
    boundary: Arc<dyn BoundarySource>,
    map_style: String,
}

impl MapPresenter {
    pub fn new(boundary: Arc<dyn BoundarySource>, map_style: &str) -> Self {
        Self {
            boundary,
            map_style: map_style.to_string(),
        }
    }

    pub async fn present(&self, results: &ResultSet<'_>, criteria: &FilterCriteria) -> MapView {
        let _scope = logging::ProfileScope::new("map_present");
        let mut layers = vec![Layer::ScatterplotLayer(point_layer(results))];
        if let Some(state) = criteria.state.selected() {
            if let Some(overlay) = self.boundary_overlay(state).await {
                layers.push(Layer::GeoJsonLayer(overlay));
            }
        }

        MapView {
            deck: DeckSpec {
                map_style: self.map_style.clone(),
                initial_view_state: view_anchor(results),
                layers,
                tooltip: Tooltip {
                    html: TOOLTIP_HTML,
                    style: TooltipStyle {
                        background_color: "white",
                        color: "black",
                    },
                },
            },
            summary: summary_line(results.len(), criteria.max_total_cost),
            count: results.len(),
        }
    }

    /// Outline of the selected state. Any failure leaves the map point-only.
    async fn boundary_overlay(&self, state: &str) -> Option<BoundaryLayer> {
        let regions = match self.boundary.fetch().await {
            Ok(regions) => regions,
            Err(err) => {
                logging::log_boundary_skipped(state, &err.to_string());
                return None;
            }
        };
        let matched = regions.matching(state);
        if matched.features.is_empty() {
            log(
                Level::Debug,
                Domain::Map,
                "boundary_no_match",
                obj(&[("state", v_str(state))]),
            );
            return None;
        }
        Some(boundary_layer(matched))
    }
}

#[cfg(test)]
mod tests {
    use super::boundary::StaticBoundarySource;
    use super::*;
    use crate::data::{RawUniversity, University};
    use crate::filter::{apply, SizeRange, StateSelection};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    struct Unreachable;

    #[async_trait]
    impl BoundarySource for Unreachable {
        async fn fetch(&self) -> anyhow::Result<FeatureCollection> {
            Err(anyhow!("connection refused"))
        }
    }

    fn uni(name: &str, state: &str, lat: f64, lon: f64) -> University {
        University::from(RawUniversity {
            name: Some(name.to_string()),
            city: Some("City".to_string()),
            state: Some(state.to_string()),
            latitude: Some(lat),
            longitude: Some(lon),
            tuition_out_of_state: Some(20_000.0),
            avg_monthly_cost: Some(1_000.0),
            program_code: Some("1107".to_string()),
            enrollment: Some(5_000.0),
        })
    }

    fn criteria(state: StateSelection) -> FilterCriteria {
        FilterCriteria {
            state,
            keyword: String::new(),
            size: SizeRange { min: 0, max: 100_000 },
            max_total_cost: 50_000.0,
        }
    }

    fn california() -> FeatureCollection {
        FeatureCollection::new(vec![Feature {
            kind: "Feature".to_string(),
            properties: json!({"NAME": "California"}).as_object().cloned().unwrap_or_default(),
            geometry: json!({"type": "Polygon", "coordinates": []}),
        }])
    }

    #[test]
    fn empty_results_fall_back_to_continental_view() {
        let records: Vec<University> = Vec::new();
        let results = apply(&records, &criteria(StateSelection::All), &mut StdRng::seed_from_u64(0));
        let view = view_anchor(&results);
        assert_eq!(view.latitude, FALLBACK_LATITUDE);
        assert_eq!(view.longitude, FALLBACK_LONGITUDE);
        assert_eq!(view.zoom, CONTINENTAL_ZOOM);
    }

    #[test]
    fn anchor_is_mean_of_coordinates() {
        let records = vec![uni("a", "CA", 30.0, -120.0), uni("b", "CA", 40.0, -110.0)];
        let results = apply(&records, &criteria(StateSelection::All), &mut StdRng::seed_from_u64(0));
        let view = view_anchor(&results);
        assert!((view.latitude - 35.0).abs() < 1e-9);
        assert!((view.longitude + 115.0).abs() < 1e-9);
        assert_eq!(view.zoom, REGIONAL_ZOOM);
    }

    #[test]
    fn points_are_lon_lat_with_tooltip_fields() {
        let records = vec![uni("a", "CA", 30.0, -120.0)];
        let results = apply(&records, &criteria(StateSelection::All), &mut StdRng::seed_from_u64(0));
        let layer = point_layer(&results);
        assert_eq!(layer.data[0].position, [-120.0, 30.0]);
        assert_eq!(layer.data[0].total_cost, Some(29_000.0));
        assert_eq!(layer.get_radius, POINT_RADIUS);
    }

    #[test]
    fn summary_uses_thousands_separators() {
        assert_eq!(
            summary_line(12, 40_000.0),
            "Showing 12 universities under $40,000 total estimated cost."
        );
        assert_eq!(thousands(1_234_567), "1,234,567");
        assert_eq!(thousands(999), "999");
    }

    #[test]
    fn deck_serializes_with_layer_type_tags() {
        let records = vec![uni("a", "CA", 30.0, -120.0)];
        let results = apply(&records, &criteria(StateSelection::All), &mut StdRng::seed_from_u64(0));
        let layers = vec![
            Layer::ScatterplotLayer(point_layer(&results)),
            Layer::GeoJsonLayer(boundary_layer(california())),
        ];
        let value = serde_json::to_value(&layers).unwrap();
        assert_eq!(value[0]["@@type"], "ScatterplotLayer");
        assert_eq!(value[0]["getFillColor"], json!([200, 30, 0, 160]));
        assert_eq!(value[1]["@@type"], "GeoJsonLayer");
        assert_eq!(value[1]["lineWidthMinPixels"], 2);
    }

    #[tokio::test]
    async fn selected_state_adds_boundary_overlay() {
        let presenter = MapPresenter::new(Arc::new(StaticBoundarySource(california())), "style");
        let records = vec![uni("a", "California", 36.0, -119.0)];
        let c = criteria(StateSelection::Only("California".to_string()));
        let results = apply(&records, &c, &mut StdRng::seed_from_u64(0));
        let view = presenter.present(&results, &c).await;
        assert_eq!(view.deck.layers.len(), 2);
        assert!(view.deck.has_boundary());
    }

    #[tokio::test]
    async fn unmatched_state_renders_points_only() {
        let presenter = MapPresenter::new(Arc::new(StaticBoundarySource(california())), "style");
        let records = vec![uni("a", "Ohio", 40.0, -83.0)];
        let c = criteria(StateSelection::Only("Ohio".to_string()));
        let results = apply(&records, &c, &mut StdRng::seed_from_u64(0));
        let view = presenter.present(&results, &c).await;
        assert_eq!(view.deck.layers.len(), 1);
        assert!(!view.deck.has_boundary());
        assert_eq!(view.count, 1);
    }

    #[tokio::test]
    async fn boundary_failure_is_silent() {
        let presenter = MapPresenter::new(Arc::new(Unreachable), "style");
        let records = vec![uni("a", "CA", 36.0, -119.0)];
        let c = criteria(StateSelection::Only("CA".to_string()));
        let results = apply(&records, &c, &mut StdRng::seed_from_u64(0));
        let view = presenter.present(&results, &c).await;
        assert!(!view.deck.has_boundary());
        assert_eq!(view.count, 1);
    }

    #[tokio::test]
    async fn all_states_never_fetches_boundary() {
        let presenter = MapPresenter::new(Arc::new(Unreachable), "style");
        let records: Vec<University> = Vec::new();
        let c = criteria(StateSelection::All);
        let results = apply(&records, &c, &mut StdRng::seed_from_u64(0));
        let view = presenter.present(&results, &c).await;
        assert_eq!(view.deck.layers.len(), 1);
        assert_eq!(view.deck.initial_view_state.zoom, CONTINENTAL_ZOOM);
    }
}
