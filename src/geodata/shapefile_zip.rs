//! Reading and writing zipped ESRI shapefile bundles. The actual
//! format handling is delegated to the `shapefile` and `zip` crates;
//! this module only wires archives, sidecars, and geo types together.

use geo::MultiPolygon;
use shapefile::dbase::{FieldValue, Record, TableWriterBuilder};
use shapefile::{Point, Polygon, PolygonRing, Shape};
use std::fs;
use std::io::{Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

use super::{GeodataError, Territory};

/// Esri WKT written alongside exported shapefiles.
const WGS84_PRJ: &str = r#"GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137.0,298.257223563]],PRIMEM["Greenwich",0.0],UNIT["Degree",0.0174532925199433]]"#;

/// Polygon features and the `.prj` sidecar pulled out of an archive.
/// Geometry is still in the archive's own CRS at this point.
#[derive(Debug)]
pub struct ShapefileArchive {
    pub features: Vec<(MultiPolygon<f64>, Record)>,
    pub prj: Option<String>,
}

pub fn read_zip_bytes(bytes: &[u8]) -> Result<ShapefileArchive, GeodataError> {
    let tmpdir = TempDir::new()?;
    let extracted = extract_archive(Cursor::new(bytes), tmpdir.path())?;
    read_extracted(&extracted)
}

pub fn read_zip_path(path: &Path) -> Result<ShapefileArchive, GeodataError> {
    let tmpdir = TempDir::new()?;
    let file = fs::File::open(path)?;
    let extracted = extract_archive(file, tmpdir.path())?;
    read_extracted(&extracted)
}

fn extract_archive<R: Read + Seek>(
    reader: R,
    dest: &Path,
) -> Result<Vec<PathBuf>, GeodataError> {
    let mut archive = ZipArchive::new(reader)?;
    let mut written = Vec::new();
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        // Entries escaping the extraction dir are skipped, not fatal.
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            tracing::warn!(entry = entry.name(), "skipping unsafe archive entry");
            continue;
        };
        if entry.is_dir() {
            continue;
        }
        let target = dest.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = fs::File::create(&target)?;
        std::io::copy(&mut entry, &mut out)?;
        written.push(target);
    }
    Ok(written)
}

fn read_extracted(paths: &[PathBuf]) -> Result<ShapefileArchive, GeodataError> {
    let shp_path = paths
        .iter()
        .find(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map_or(false, |ext| ext.eq_ignore_ascii_case("shp"))
        })
        .ok_or(GeodataError::MissingShapefile)?;

    let prj = read_sidecar(shp_path, "prj");

    let mut features = Vec::new();
    for pair in shapefile::read_as::<_, Shape, Record>(shp_path)? {
        let (shape, record) = pair;
        match shape {
            Shape::Polygon(polygon) => {
                let geometry: MultiPolygon<f64> = polygon.into();
                features.push((geometry, record));
            }
            Shape::NullShape => {}
            other => {
                tracing::warn!(shape = %other.shapetype(), "skipping non-polygon shape");
            }
        }
    }

    Ok(ShapefileArchive { features, prj })
}

fn read_sidecar(shp_path: &Path, extension: &str) -> Option<String> {
    for candidate in [
        shp_path.with_extension(extension),
        shp_path.with_extension(extension.to_uppercase()),
    ] {
        if let Ok(contents) = fs::read_to_string(&candidate) {
            return Some(contents);
        }
    }
    None
}

/// Writes territories as a `.shp/.shx/.dbf/.prj/.cpg` bundle and
/// returns the zip bytes. Geometry is written as-is (WGS84).
pub fn write_territories_zip(
    territories: &[Territory],
    base_name: &str,
) -> Result<Vec<u8>, GeodataError> {
    let tmpdir = TempDir::new()?;
    let shp_path = tmpdir.path().join(format!("{base_name}.shp"));

    let table = TableWriterBuilder::new()
        .add_character_field(field_name("id_rtdaf")?, 32)
        .add_character_field(field_name("nom_terr")?, 254)
        .add_character_field(field_name("etnia")?, 100)
        .add_character_field(field_name("departamen")?, 100)
        .add_character_field(field_name("municipio")?, 100)
        .add_character_field(field_name("etapa")?, 50)
        .add_character_field(field_name("estado_act")?, 100)
        .add_character_field(field_name("cn_ci")?, 10)
        .add_numeric_field(field_name("area_ha")?, 19, 4);

    let mut writer = shapefile::Writer::from_path(&shp_path, table)?;
    for territory in territories {
        let shape = polygon_shape(&territory.geometry);
        let record = territory_record(territory);
        writer.write_shape_and_record(&shape, &record)?;
    }
    drop(writer);

    fs::write(shp_path.with_extension("prj"), WGS84_PRJ)?;
    fs::write(shp_path.with_extension("cpg"), "UTF-8")?;

    let mut buffer = Cursor::new(Vec::new());
    {
        let mut zip = ZipWriter::new(&mut buffer);
        let options = FileOptions::default();
        for ext in ["shp", "shx", "dbf", "prj", "cpg"] {
            let path = shp_path.with_extension(ext);
            if !path.exists() {
                continue;
            }
            let contents = fs::read(&path)?;
            write_zip_entry(&mut zip, &format!("{base_name}.{ext}"), &contents, options)?;
        }
        zip.finish()?;
    }

    Ok(buffer.into_inner())
}

fn write_zip_entry<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    name: &str,
    contents: &[u8],
    options: FileOptions,
) -> Result<(), GeodataError> {
    zip.start_file(name, options)?;
    zip.write_all(contents)?;
    Ok(())
}

fn field_name(name: &'static str) -> Result<shapefile::dbase::FieldName, GeodataError> {
    shapefile::dbase::FieldName::try_from(name)
        .map_err(|err| GeodataError::Field(format!("{name}: {err:?}")))
}

fn polygon_shape(geometry: &MultiPolygon<f64>) -> Polygon {
    let mut rings = Vec::new();
    for polygon in &geometry.0 {
        rings.push(PolygonRing::Outer(ring_points(polygon.exterior())));
        for interior in polygon.interiors() {
            rings.push(PolygonRing::Inner(ring_points(interior)));
        }
    }
    Polygon::with_rings(rings)
}

fn ring_points(ring: &geo::LineString<f64>) -> Vec<Point> {
    ring.coords().map(|c| Point::new(c.x, c.y)).collect()
}

fn territory_record(territory: &Territory) -> Record {
    let mut record = Record::default();
    let mut text = |name: &str, value: &str| {
        record.insert(
            name.to_string(),
            FieldValue::Character(Some(value.to_string())),
        );
    };
    text("id_rtdaf", &territory.id_rtdaf);
    text("nom_terr", &territory.nom_terr);
    text("etnia", &territory.etnia);
    text("departamen", &territory.departamen);
    text("municipio", &territory.municipio);
    text("etapa", &territory.etapa);
    text("estado_act", &territory.estado_act);
    text("cn_ci", &territory.cn_ci);
    record.insert(
        "area_ha".to_string(),
        FieldValue::Numeric(Some(territory.area_ha)),
    );
    record
}
