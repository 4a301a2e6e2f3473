pub mod geometry;
pub mod projection;
pub mod shapefile_zip;

use geo::MultiPolygon;
use shapefile::dbase::{FieldValue, Record};

/// Attribute columns of the unified territory layer, in the order the
/// source shapefile carries them.
pub const ATTRIBUTE_COLUMNS: [&str; 8] = [
    "id_rtdaf",
    "nom_terr",
    "etnia",
    "departamen",
    "municipio",
    "etapa",
    "estado_act",
    "cn_ci",
];

#[derive(Debug, thiserror::Error)]
pub enum GeodataError {
    #[error("no .shp file found inside the archive")]
    MissingShapefile,
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("shapefile error: {0}")]
    Shapefile(#[from] shapefile::Error),
    #[error("attribute table error: {0}")]
    Dbase(#[from] shapefile::dbase::Error),
    #[error("unsupported coordinate reference system: {0}")]
    UnsupportedCrs(String),
    #[error("projection error: {0}")]
    Projection(String),
    #[error("geometry error: {0}")]
    Geometry(String),
    #[error("download failed: {0}")]
    Download(String),
    #[error("invalid attribute field: {0}")]
    Field(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("background task failed: {0}")]
    Task(String),
}

/// One ethnic-territory polygon with its normalized attribute row.
/// Geometry is always WGS84 by the time a `Territory` exists.
#[derive(Debug, Clone)]
pub struct Territory {
    pub id_rtdaf: String,
    pub nom_terr: String,
    pub etnia: String,
    pub departamen: String,
    pub municipio: String,
    pub etapa: String,
    pub estado_act: String,
    pub cn_ci: String,
    pub area_ha: f64,
    pub geometry: MultiPolygon<f64>,
}

impl Territory {
    /// Builds a territory from a shapefile record, applying the same
    /// normalization the dashboard always applied: `etapa` and `cn_ci`
    /// lowercased, `estado_act` trimmed, `area_ha` coerced to a number
    /// with non-numeric values becoming 0.
    pub fn from_parts(geometry: MultiPolygon<f64>, record: &Record) -> Self {
        Self {
            id_rtdaf: record_text(record, "id_rtdaf"),
            nom_terr: record_text(record, "nom_terr"),
            etnia: record_text(record, "etnia"),
            departamen: record_text(record, "departamen"),
            municipio: record_text(record, "municipio"),
            etapa: record_text(record, "etapa").to_lowercase(),
            estado_act: record_text(record, "estado_act"),
            cn_ci: record_text(record, "cn_ci").to_lowercase(),
            area_ha: record_number(record, "area_ha"),
            geometry,
        }
    }

    pub fn kind(&self) -> TerritoryKind {
        TerritoryKind::from_cn_ci(&self.cn_ci)
    }

    pub fn area_label(&self) -> String {
        format_area_label(self.area_ha)
    }
}

/// `cn_ci` distinguishes indigenous councils (`ci`) from
/// afro-descendant community councils (`cn`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerritoryKind {
    Indigenous,
    AfroDescendant,
}

impl TerritoryKind {
    pub fn from_cn_ci(cn_ci: &str) -> Self {
        if cn_ci == "ci" {
            TerritoryKind::Indigenous
        } else {
            TerritoryKind::AfroDescendant
        }
    }

    pub fn fill_color(&self) -> &'static str {
        match self {
            TerritoryKind::Indigenous => "#228B22",
            TerritoryKind::AfroDescendant => "#8B4513",
        }
    }

    pub fn legend_label(&self) -> &'static str {
        match self {
            TerritoryKind::Indigenous => "Territorio indígena (ci)",
            TerritoryKind::AfroDescendant => "Territorio afrodescendiente (cn)",
        }
    }
}

/// Formats hectares the way the dashboard always displayed them:
/// whole hectares plus the fractional remainder in square meters,
/// e.g. `12 ha + 3,456 m²`.
pub fn format_area_label(area_ha: f64) -> String {
    let area_ha = if area_ha.is_finite() { area_ha } else { 0.0 };
    let whole = area_ha.trunc() as i64;
    let frac_m2 = ((area_ha - whole as f64) * 10_000.0).round() as i64;
    format!("{whole} ha + {} m²", group_thousands(frac_m2))
}

fn group_thousands(value: i64) -> String {
    let digits = value.abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if value < 0 {
        format!("-{grouped}")
    } else {
        grouped
    }
}

fn record_text(record: &Record, field: &str) -> String {
    match record.get(field) {
        Some(FieldValue::Character(Some(value))) => value.trim().to_string(),
        Some(FieldValue::Memo(value)) => value.trim().to_string(),
        Some(FieldValue::Numeric(Some(value))) => format_numeric_text(*value),
        Some(FieldValue::Float(Some(value))) => format_numeric_text(f64::from(*value)),
        Some(FieldValue::Integer(value)) => value.to_string(),
        Some(FieldValue::Double(value)) => format_numeric_text(*value),
        Some(FieldValue::Logical(Some(value))) => value.to_string(),
        _ => String::new(),
    }
}

fn format_numeric_text(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

fn record_number(record: &Record, field: &str) -> f64 {
    let value = match record.get(field) {
        Some(FieldValue::Numeric(Some(value))) => *value,
        Some(FieldValue::Float(Some(value))) => f64::from(*value),
        Some(FieldValue::Integer(value)) => f64::from(*value),
        Some(FieldValue::Double(value)) => *value,
        Some(FieldValue::Character(Some(value))) => value.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    };
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Sidebar filter selection. Empty multi-select lists mean "no
/// constraint", `id` is a substring match, `nombre` is exact.
#[derive(Debug, Clone, Default)]
pub struct TerritoryFilter {
    pub etapa: Vec<String>,
    pub estado: Vec<String>,
    pub tipo: Vec<String>,
    pub departamento: Vec<String>,
    pub id: Option<String>,
    pub nombre: Option<String>,
}

impl TerritoryFilter {
    pub fn matches(&self, territory: &Territory) -> bool {
        (self.etapa.is_empty() || self.etapa.iter().any(|v| v == &territory.etapa))
            && (self.estado.is_empty() || self.estado.iter().any(|v| v == &territory.estado_act))
            && (self.tipo.is_empty() || self.tipo.iter().any(|v| v == &territory.cn_ci))
            && (self.departamento.is_empty()
                || self.departamento.iter().any(|v| v == &territory.departamen))
            && self
                .id
                .as_deref()
                .map_or(true, |needle| territory.id_rtdaf.contains(needle))
            && self
                .nombre
                .as_deref()
                .map_or(true, |name| territory.nom_terr == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, MultiPolygon};

    fn sample_record() -> Record {
        let mut record = Record::default();
        record.insert(
            "id_rtdaf".to_string(),
            FieldValue::Numeric(Some(40123.0)),
        );
        record.insert(
            "nom_terr".to_string(),
            FieldValue::Character(Some("Resguardo Yurupari  ".to_string())),
        );
        record.insert(
            "etnia".to_string(),
            FieldValue::Character(Some("Cubeo".to_string())),
        );
        record.insert(
            "departamen".to_string(),
            FieldValue::Character(Some("Vaupés".to_string())),
        );
        record.insert(
            "municipio".to_string(),
            FieldValue::Character(Some("Mitú".to_string())),
        );
        record.insert(
            "etapa".to_string(),
            FieldValue::Character(Some("ADMINISTRATIVA".to_string())),
        );
        record.insert(
            "estado_act".to_string(),
            FieldValue::Character(Some("  Activo ".to_string())),
        );
        record.insert(
            "cn_ci".to_string(),
            FieldValue::Character(Some("CI".to_string())),
        );
        record.insert("area_ha".to_string(), FieldValue::Numeric(Some(1520.75)));
        record
    }

    fn unit_square() -> MultiPolygon<f64> {
        MultiPolygon(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 1.0, y: 1.0),
            (x: 0.0, y: 1.0),
        ]])
    }

    #[test]
    fn from_parts_normalizes_attributes() {
        let territory = Territory::from_parts(unit_square(), &sample_record());
        assert_eq!(territory.id_rtdaf, "40123");
        assert_eq!(territory.nom_terr, "Resguardo Yurupari");
        assert_eq!(territory.etapa, "administrativa");
        assert_eq!(territory.estado_act, "Activo");
        assert_eq!(territory.cn_ci, "ci");
        assert_eq!(territory.area_ha, 1520.75);
        assert_eq!(territory.kind(), TerritoryKind::Indigenous);
    }

    #[test]
    fn non_numeric_area_coerces_to_zero() {
        let mut record = sample_record();
        record.insert(
            "area_ha".to_string(),
            FieldValue::Character(Some("n/a".to_string())),
        );
        let territory = Territory::from_parts(unit_square(), &record);
        assert_eq!(territory.area_ha, 0.0);
    }

    #[test]
    fn missing_attributes_become_empty_strings() {
        let record = Record::default();
        let territory = Territory::from_parts(unit_square(), &record);
        assert_eq!(territory.nom_terr, "");
        assert_eq!(territory.area_ha, 0.0);
        assert_eq!(territory.kind(), TerritoryKind::AfroDescendant);
    }

    #[test]
    fn area_label_matches_dashboard_format() {
        assert_eq!(format_area_label(12.3456), "12 ha + 3,456 m²");
        assert_eq!(format_area_label(0.0), "0 ha + 0 m²");
        assert_eq!(format_area_label(1520.75), "1520 ha + 7,500 m²");
        // Rounding can push the remainder to a full hectare; the label
        // shows 10,000 m² rather than carrying into the whole part.
        assert_eq!(format_area_label(1.99999), "1 ha + 10,000 m²");
    }

    #[test]
    fn filter_applies_each_constraint() {
        let territory = Territory::from_parts(unit_square(), &sample_record());

        let mut filter = TerritoryFilter::default();
        assert!(filter.matches(&territory));

        filter.etapa = vec!["administrativa".to_string()];
        filter.tipo = vec!["ci".to_string()];
        filter.id = Some("401".to_string());
        assert!(filter.matches(&territory));

        filter.departamento = vec!["Chocó".to_string()];
        assert!(!filter.matches(&territory));
    }

    #[test]
    fn name_filter_is_exact() {
        let territory = Territory::from_parts(unit_square(), &sample_record());
        let filter = TerritoryFilter {
            nombre: Some("Resguardo".to_string()),
            ..Default::default()
        };
        assert!(!filter.matches(&territory));

        let filter = TerritoryFilter {
            nombre: Some("Resguardo Yurupari".to_string()),
            ..Default::default()
        };
        assert!(filter.matches(&territory));
    }
}
