use serde::Serialize;

/// Months of living cost counted per academic year.
pub const ACADEMIC_MONTHS: f64 = 9.0;

/// Row values as read from the file, before derived columns are computed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawUniversity {
    pub name: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub tuition_out_of_state: Option<f64>,
    pub avg_monthly_cost: Option<f64>,
    pub program_code: Option<String>,
    pub enrollment: Option<f64>,
}

/// One institution. Derived costs are fixed at construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct University {
    pub name: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub tuition_out_of_state: Option<f64>,
    pub avg_monthly_cost: Option<f64>,
    pub program_code: Option<String>,
    pub enrollment: Option<f64>,
    annual_living_cost: Option<f64>,
    total_estimated_cost: Option<f64>,
}

impl University {
    pub fn annual_living_cost(&self) -> Option<f64> {
        self.annual_living_cost
    }

    pub fn total_estimated_cost(&self) -> Option<f64> {
        self.total_estimated_cost
    }

    /// Latitude and longitude, when both are present.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        Some((self.latitude?, self.longitude?))
    }

    /// Whether the record can be placed and labelled on the map.
    pub fn is_mappable(&self) -> bool {
        self.coordinates().is_some() && self.name.is_some()
    }
}

impl From<RawUniversity> for University {
    fn from(raw: RawUniversity) -> Self {
        let annual_living_cost = raw.avg_monthly_cost.map(|m| m * ACADEMIC_MONTHS);
        let total_estimated_cost = match (raw.tuition_out_of_state, annual_living_cost) {
            (Some(tuition), Some(living)) => Some(tuition + living),
            _ => None,
        };
        Self {
            name: raw.name,
            city: raw.city,
            state: raw.state,
            latitude: raw.latitude,
            longitude: raw.longitude,
            tuition_out_of_state: raw.tuition_out_of_state,
            avg_monthly_cost: raw.avg_monthly_cost,
            program_code: raw.program_code,
            enrollment: raw.enrollment,
            annual_living_cost,
            total_estimated_cost,
        }
    }
}

pub(crate) fn parse_text(cell: Option<&str>) -> Option<String> {
    let trimmed = cell?.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Empty, unparseable and non-finite cells are absent.
pub(crate) fn parse_num(cell: Option<&str>) -> Option<f64> {
    cell?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}
